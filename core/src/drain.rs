use std::time::Duration;

pub use internal::{
	DrainMode, ReleaseShutdown as DrainBlocker, Signal as DrainTrigger, Watch as DrainWatcher,
};
use tracing::{debug, info, warn};

/// New constructs a new pair for draining.
/// * `DrainTrigger` can be used to start a draining sequence and wait for it to complete.
/// * `DrainWatcher` should be held by anything that wants to participate in the draining. This
///   can be cloned, and a drain will not complete until all outstanding `DrainWatcher`s are
///   dropped.
pub fn new() -> (DrainTrigger, DrainWatcher) {
	internal::channel()
}

/// Runs a future with graceful shutdown/draining support. `make_future` receives a fresh
/// `DrainWatcher` it must hold for the duration of its work, and a deadline; once the deadline
/// elapses without all watchers dropping, the caller should force a stop.
pub async fn run_with_drain<F, O>(
	component: String,
	drain: DrainWatcher,
	deadline: Duration,
	make_future: F,
) where
	F: FnOnce(DrainWatcher) -> O,
	O: Future<Output = ()> + Send + 'static,
{
	let (sub_drain_signal, sub_drain) = new();
	let fut = make_future(sub_drain);
	let watch = async move {
		let blocker = drain.wait_for_drain().await;
		if blocker.mode() == DrainMode::Graceful {
			info!(component, "drain started, waiting {:?} for in-flight work to complete", deadline);
			if tokio::time::timeout(deadline, sub_drain_signal.start_drain_and_wait(DrainMode::Graceful))
				.await
				.is_err()
			{
				warn!(component, "drain deadline expired with work still pending");
			}
		} else {
			debug!(component, "terminating immediately");
		}
		info!(component, "shutdown complete");
	};
	tokio::select! {
		_ = fut => {},
		_ = watch => {},
	}
}

mod internal {
	use tokio::sync::{mpsc, watch};

	enum Never {}

	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub enum DrainMode {
		Immediate,
		Graceful,
	}

	/// Creates a drain channel pair.
	pub fn channel() -> (Signal, Watch) {
		let (signal_tx, signal_rx) = watch::channel(None);
		let (drained_tx, drained_rx) = mpsc::channel(1);
		(
			Signal { drained_rx, signal_tx },
			Watch { drained_tx, signal_rx },
		)
	}

	/// Sends a drain command to all watchers and waits for them all to be dropped.
	pub struct Signal {
		drained_rx: mpsc::Receiver<Never>,
		signal_tx: watch::Sender<Option<DrainMode>>,
	}

	/// Watches for a drain command. All clones must be dropped for a `Signal` to complete.
	#[derive(Clone)]
	pub struct Watch {
		drained_tx: mpsc::Sender<Never>,
		signal_rx: watch::Receiver<Option<DrainMode>>,
	}

	/// Held once the drain has been signaled; drop it once cleanup is finished.
	#[must_use = "DrainBlocker should be dropped explicitly to release the drain"]
	#[allow(dead_code)]
	pub struct ReleaseShutdown(mpsc::Sender<Never>, DrainMode);

	impl ReleaseShutdown {
		pub fn mode(&self) -> DrainMode {
			self.1
		}
	}

	impl Signal {
		pub fn count(&self) -> usize {
			self.signal_tx.receiver_count()
		}

		/// Signals all watchers to begin draining and waits for every handle to be dropped.
		pub async fn start_drain_and_wait(mut self, mode: DrainMode) {
			let _ = self.signal_tx.send(Some(mode));
			match self.drained_rx.recv().await {
				None => {},
				Some(never) => match never {},
			}
		}
	}

	impl Watch {
		/// Resolves once a drain has been signaled, returning a handle that keeps the drain
		/// from completing until dropped.
		pub async fn wait_for_drain(mut self) -> ReleaseShutdown {
			let mode = self
				.signal_rx
				.wait_for(Option::is_some)
				.await
				.map(|mode| mode.expect("checked is_some"))
				.unwrap_or(DrainMode::Immediate);
			ReleaseShutdown(self.drained_tx, mode)
		}
	}

	impl std::fmt::Debug for Signal {
		fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
			f.debug_struct("Signal").finish_non_exhaustive()
		}
	}

	impl std::fmt::Debug for Watch {
		fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
			f.debug_struct("Watch").finish_non_exhaustive()
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	#[tokio::test]
	async fn drain_waits_for_all_watchers() {
		let (trigger, watcher) = new();
		let completed = Arc::new(AtomicUsize::new(0));

		for i in 1..=3 {
			let watcher = watcher.clone();
			let completed = completed.clone();
			tokio::spawn(async move {
				let blocker = watcher.wait_for_drain().await;
				tokio::time::sleep(Duration::from_millis(i * 5)).await;
				completed.fetch_add(1, Ordering::SeqCst);
				drop(blocker);
			});
		}
		drop(watcher);

		trigger.start_drain_and_wait(DrainMode::Graceful).await;
		assert_eq!(completed.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn drain_with_no_watchers_completes_immediately() {
		let (trigger, watcher) = new();
		drop(watcher);
		tokio::time::timeout(
			Duration::from_millis(100),
			trigger.start_drain_and_wait(DrainMode::Graceful),
		)
		.await
		.expect("drain should complete without watchers");
	}
}
