//! C5 — Route Registry.
//!
//! In-memory canonical view of the currently `live` [`ComposedArtifact`]. Readers get a
//! consistent snapshot per call via `arc_swap::ArcSwap`, the same single-writer/many-reader
//! discipline the teacher uses for its xDS snapshot state.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::types::{ComposedArtifact, Route, Upstream};

/// The live route registry. Cheaply cloneable; every clone shares the same underlying state.
#[derive(Clone)]
pub struct RouteRegistry {
	current: Arc<ArcSwap<ComposedArtifact>>,
}

impl RouteRegistry {
	pub fn new(initial: ComposedArtifact) -> Self {
		Self { current: Arc::new(ArcSwap::from_pointee(initial)) }
	}

	/// Installs `artifact` as the new live generation. Called only on an accepted reload.
	pub fn publish(&self, artifact: ComposedArtifact) {
		self.current.store(Arc::new(artifact));
	}

	/// A snapshot of the currently live artifact. Cheap: an `Arc` clone of the swapped pointer.
	pub fn snapshot(&self) -> Arc<ComposedArtifact> {
		self.current.load_full()
	}

	pub fn routes(&self) -> Vec<Route> {
		self.snapshot().routes.clone()
	}

	pub fn route(&self, path: &str) -> Option<Route> {
		self.snapshot().routes.iter().find(|r| r.path == path).cloned()
	}

	pub fn generation(&self) -> u64 {
		self.snapshot().generation
	}

	/// Groups currently-live routes by the upstream symbol or literal `host:port` they target,
	/// for the dashboard's topology view.
	pub fn group_by_upstream(&self) -> BTreeMap<String, Vec<Route>> {
		let snapshot = self.snapshot();
		let mut grouped: BTreeMap<String, Vec<Route>> = BTreeMap::new();
		for route in &snapshot.routes {
			grouped.entry(route.upstream_target.to_string()).or_default().push(route.clone());
		}
		grouped
	}

	pub fn upstreams(&self) -> Vec<Upstream> {
		self.snapshot().upstreams.clone()
	}
}

#[cfg(test)]
mod tests {
	use chrono::Utc;

	use super::*;
	use crate::types::{MatchKind, RouteFlags, UpstreamTarget};

	fn artifact(generation: u64, routes: Vec<Route>) -> ComposedArtifact {
		ComposedArtifact { generation, content_hash: "h".to_string(), routes, upstreams: Vec::new(), conflicts: Vec::new(), warnings: Vec::new(), produced_at: Utc::now() }
	}

	fn route(path: &str) -> Route {
		Route {
			path: path.to_string(),
			match_kind: MatchKind::Prefix,
			upstream_target: UpstreamTarget::Symbol { name: "svc".to_string() },
			flags: RouteFlags::default(),
			source_file: "a.conf".to_string(),
			line_span: (1, 3),
			opaque_directives: Vec::new(),
		}
	}

	#[test]
	fn publish_replaces_snapshot_wholesale() {
		let reg = RouteRegistry::new(artifact(1, vec![route("/a/")]));
		assert_eq!(reg.generation(), 1);
		reg.publish(artifact(2, vec![route("/b/")]));
		assert_eq!(reg.generation(), 2);
		assert!(reg.route("/a/").is_none());
		assert!(reg.route("/b/").is_some());
	}

	#[test]
	fn readers_see_a_consistent_snapshot_across_calls() {
		let reg = RouteRegistry::new(artifact(1, vec![route("/a/"), route("/b/")]));
		let snap = reg.snapshot();
		reg.publish(artifact(2, vec![route("/c/")]));
		assert_eq!(snap.generation, 1, "previously taken snapshot must not observe the new publish");
	}

	#[test]
	fn group_by_upstream_buckets_routes() {
		let reg = RouteRegistry::new(artifact(1, vec![route("/a/"), route("/b/")]));
		let grouped = reg.group_by_upstream();
		assert_eq!(grouped.get("$svc").map(Vec::len), Some(2));
	}
}
