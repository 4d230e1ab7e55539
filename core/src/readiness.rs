use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::telemetry;

/// Tracks whether the process is ready: a set of named tasks must all complete before readiness
/// is reported.
#[derive(Clone, Debug, Default)]
pub struct Ready(Arc<Mutex<HashSet<String>>>);

impl Ready {
	pub fn new() -> Ready {
		Ready::default()
	}

	/// Registers a dependency that must be marked ready before the process is ready.
	pub fn register_task(&self, name: &str) -> BlockReady {
		self.0.lock().unwrap().insert(name.to_string());
		BlockReady { parent: self.clone(), name: name.to_string() }
	}

	pub fn pending(&self) -> HashSet<String> {
		self.0.lock().unwrap().clone()
	}

	pub fn is_ready(&self) -> bool {
		self.0.lock().unwrap().is_empty()
	}
}

/// Blocks readiness of its parent `Ready` until dropped.
pub struct BlockReady {
	parent: Ready,
	name: String,
}

impl BlockReady {
	pub fn subtask(&self, name: &str) -> BlockReady {
		self.parent.register_task(name)
	}
}

impl Drop for BlockReady {
	fn drop(&mut self) {
		let mut pending = self.parent.0.lock().unwrap();
		pending.remove(&self.name);
		let left = pending.len();
		let dur = telemetry::APPLICATION_START_TIME.elapsed();
		if left == 0 {
			info!("task '{}' complete ({dur:?}), marking control plane ready", self.name);
		} else {
			info!("task '{}' complete ({dur:?}), still awaiting {left} tasks", self.name);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ready_only_after_all_tasks_drop() {
		let ready = Ready::new();
		let a = ready.register_task("a");
		let b = ready.register_task("b");
		assert!(!ready.is_ready());
		drop(a);
		assert!(!ready.is_ready());
		drop(b);
		assert!(ready.is_ready());
	}
}
