//! C11 — Thought Bus.
//!
//! An append-only event stream with a monotonic cursor for incremental polling. Single-writer
//! internally (all producers post through `&self`, serialized by a `parking_lot::Mutex` guarding
//! the ring buffer), many-reader via `since=cursor` queries. Bounded retention: oldest events
//! are dropped once the ring fills, matching the drop-oldest-on-overflow discipline used
//! elsewhere in this system (the health scanner's own report ring).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::types::{ThoughtEvent, ThoughtKind};

const DEFAULT_CAPACITY: usize = 4096;

struct Inner {
	events: VecDeque<ThoughtEvent>,
	capacity: usize,
}

/// The thought bus. Cheaply cloneable; every clone shares the same underlying ring and cursor.
#[derive(Clone)]
pub struct ThoughtBus {
	inner: std::sync::Arc<Mutex<Inner>>,
	next_id: std::sync::Arc<AtomicU64>,
	notify: std::sync::Arc<Notify>,
}

impl ThoughtBus {
	pub fn new() -> Self {
		Self::with_capacity(DEFAULT_CAPACITY)
	}

	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			inner: std::sync::Arc::new(Mutex::new(Inner { events: VecDeque::with_capacity(capacity), capacity })),
			next_id: std::sync::Arc::new(AtomicU64::new(1)),
			notify: std::sync::Arc::new(Notify::new()),
		}
	}

	/// Appends a new thought, assigning it the next monotonic id. Returns the assigned id.
	pub fn publish(&self, kind: ThoughtKind, route: Option<String>, text: impl Into<String>, data: Option<serde_json::Value>) -> u64 {
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		let event = ThoughtEvent { id, at_ms: epoch_millis(), kind, route, text: text.into(), data };
		{
			let mut inner = self.inner.lock();
			if inner.events.len() >= inner.capacity {
				inner.events.pop_front();
			}
			inner.events.push_back(event);
		}
		self.notify.notify_waiters();
		id
	}

	/// All events with `id > since`, in publish order.
	pub fn since(&self, since: u64) -> Vec<ThoughtEvent> {
		let inner = self.inner.lock();
		inner.events.iter().filter(|e| e.id > since).cloned().collect()
	}

	pub fn latest_cursor(&self) -> u64 {
		let inner = self.inner.lock();
		inner.events.back().map(|e| e.id).unwrap_or(0)
	}

	/// Long-poll: waits until an event past `since` exists, or `timeout` elapses, then returns
	/// whatever is available (possibly empty, on timeout). Backs `GET /ai/thoughts?since=`'s
	/// 25 s server-side idle timeout.
	///
	/// Registers as a waiter via `enable()` before re-checking `since`, so a `publish` landing
	/// between the check and the await is still observed — `notify_waiters` only wakes waiters
	/// already registered at the time it's called.
	pub async fn poll_since(&self, since: u64, timeout: std::time::Duration) -> Vec<ThoughtEvent> {
		let deadline = tokio::time::Instant::now() + timeout;
		loop {
			let notified = self.notify.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();

			let pending = self.since(since);
			if !pending.is_empty() {
				return pending;
			}

			if tokio::time::timeout_at(deadline, notified).await.is_err() {
				return Vec::new();
			}
		}
	}
}

impl Default for ThoughtBus {
	fn default() -> Self {
		Self::new()
	}
}

fn epoch_millis() -> i64 {
	chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ids_are_monotonic_and_since_filters_correctly() {
		let bus = ThoughtBus::new();
		let a = bus.publish(ThoughtKind::Info, None, "starting", None);
		let b = bus.publish(ThoughtKind::Step, None, "step one", None);
		assert!(b > a);
		assert_eq!(bus.since(a).len(), 1);
		assert_eq!(bus.since(0).len(), 2);
	}

	#[test]
	fn overflow_drops_oldest() {
		let bus = ThoughtBus::with_capacity(2);
		bus.publish(ThoughtKind::Info, None, "one", None);
		bus.publish(ThoughtKind::Info, None, "two", None);
		bus.publish(ThoughtKind::Info, None, "three", None);
		let events = bus.since(0);
		assert_eq!(events.len(), 2);
		assert_eq!(events[0].text, "two");
	}

	#[tokio::test]
	async fn poll_since_returns_immediately_when_events_pending() {
		let bus = ThoughtBus::new();
		bus.publish(ThoughtKind::Info, None, "hello", None);
		let got = bus.poll_since(0, std::time::Duration::from_secs(5)).await;
		assert_eq!(got.len(), 1);
	}

	#[tokio::test]
	async fn poll_since_times_out_with_no_events() {
		let bus = ThoughtBus::new();
		let got = bus.poll_since(0, std::time::Duration::from_millis(20)).await;
		assert!(got.is_empty());
	}

	#[tokio::test]
	async fn poll_since_wakes_on_publish() {
		let bus = ThoughtBus::new();
		let bus2 = bus.clone();
		let waiter = tokio::spawn(async move { bus2.poll_since(0, std::time::Duration::from_secs(5)).await });
		tokio::time::sleep(std::time::Duration::from_millis(20)).await;
		bus.publish(ThoughtKind::Result, None, "done", None);
		let got = waiter.await.unwrap();
		assert_eq!(got.len(), 1);
	}
}
