//! C2 — Composer.
//!
//! Merges the current snippet set and override set into a single [`ComposedArtifact`],
//! applying stored resolutions deterministically and rejecting routes that claim reserved
//! paths. Best-effort: composition never fails outright, it collects conflicts and warnings.

use std::collections::BTreeMap;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::types::{
	Candidate, ComposedArtifact, Conflict, MatchKind, Resolution, ResolutionStrategy, Route, RouteKey, Snippet,
	Upstream, UpstreamTarget, is_reserved_path, upstream_symbol,
};

/// Composes `overrides` (highest precedence) and `snippets` (app-declared, in load order)
/// against the currently stored `resolutions`, producing the next [`ComposedArtifact`].
///
/// `snippets` and `overrides` must already be ordered lexicographically by file name — the
/// composer preserves whatever order it is given rather than re-sorting, so determinism is the
/// caller's responsibility (see [`crate::store`]).
pub fn compose(generation: u64, snippets: &[Snippet], overrides: &[Snippet], resolutions: &[Resolution]) -> ComposedArtifact {
	let mut warnings = Vec::new();
	let mut by_key: BTreeMap<RouteKey, Vec<Candidate>> = BTreeMap::new();

	for snip in overrides.iter().chain(snippets.iter()) {
		for route in &snip.routes {
			if is_reserved_path(&route.path) {
				warnings.push(format!(
					"{}: route {} claims a reserved path and was dropped",
					snip.file_path.display(),
					route.path
				));
				continue;
			}
			by_key.entry(route.key()).or_default().push(Candidate { source_file: snip.file_path.display().to_string(), route: route.clone() });
		}
		for err in &snip.parse_errors {
			warnings.push(format!("{}:{}: {}", snip.file_path.display(), err.line, err.message));
		}
	}

	let resolution_by_key: BTreeMap<RouteKey, &Resolution> =
		resolutions.iter().filter(|r| !r.stale).map(|r| ((r.path.clone(), r.match_kind), r)).collect();

	let mut conflicts = Vec::new();
	let mut resolved_routes: Vec<Route> = Vec::new();

	for (key, candidates) in &by_key {
		if candidates.len() > 1 {
			conflicts.push(Conflict { path: key.0.clone(), match_kind: key.1, candidates: candidates.clone(), detected_at: Utc::now() });
		}
		let winner = match resolution_by_key.get(key) {
			Some(res) => candidates.iter().find(|c| c.source_file == res.winner_file),
			None => None,
		};
		let chosen = winner.or_else(|| candidates.first());
		if let Some(chosen) = chosen {
			resolved_routes.push(chosen.route.clone());
		}
	}

	// Stable emission order: longest path first, then lexicographic, then match kind — this
	// preserves the longest-match intuition for prefix routes without encoding it in the
	// dataplane's own matching logic.
	resolved_routes.sort_by(|a, b| {
		b.path.len().cmp(&a.path.len()).then_with(|| a.path.cmp(&b.path)).then_with(|| a.match_kind.cmp(&b.match_kind))
	});

	let upstreams = synthesize_upstreams(&resolved_routes);
	let content_hash = hash_routes(&resolved_routes, &upstreams);

	ComposedArtifact { generation, content_hash, routes: resolved_routes, upstreams, conflicts, warnings, produced_at: Utc::now() }
}

fn synthesize_upstreams(routes: &[Route]) -> Vec<Upstream> {
	let mut seen = BTreeMap::new();
	for route in routes {
		if let UpstreamTarget::Literal { host, port } = &route.upstream_target {
			let symbol = upstream_symbol(host, *port);
			seen.entry(symbol.clone()).or_insert_with(|| Upstream { symbol, host: host.clone(), port: *port, resolver_hint: None });
		}
	}
	seen.into_values().collect()
}

fn hash_routes(routes: &[Route], upstreams: &[Upstream]) -> String {
	let mut hasher = Sha256::new();
	for route in routes {
		hasher.update(route.path.as_bytes());
		hasher.update([route.match_kind as u8]);
		hasher.update(route.upstream_target.to_string().as_bytes());
	}
	for upstream in upstreams {
		hasher.update(upstream.symbol.as_bytes());
		hasher.update(upstream.host.as_bytes());
		hasher.update(upstream.port.to_be_bytes());
	}
	hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::snippet::parse_snippet;

	fn snip(name: &str, body: &str) -> Snippet {
		parse_snippet(name, &format!("{name}.conf"), body)
	}

	#[test]
	fn override_wins_over_app_snippet() {
		let app = snip("app", "location /api/ { proxy_pass svcA:8000; }");
		let over = snip("ops", "location /api/ { proxy_pass svcB:9000; }");
		let artifact = compose(1, std::slice::from_ref(&app), std::slice::from_ref(&over), &[]);
		assert_eq!(artifact.conflicts.len(), 1);
		let route = artifact.route("/api/").unwrap();
		assert_eq!(route.upstream_target, UpstreamTarget::Literal { host: "svcB".to_string(), port: 9000 });
	}

	#[test]
	fn first_wins_when_no_resolution_exists() {
		let a = snip("a", "location /dup/ { proxy_pass svcA:1; }");
		let b = snip("b", "location /dup/ { proxy_pass svcB:2; }");
		let artifact = compose(1, &[a, b], &[], &[]);
		assert_eq!(artifact.route("/dup/").unwrap().upstream_target, UpstreamTarget::Literal { host: "svcA".to_string(), port: 1 });
	}

	#[test]
	fn manual_resolution_overrides_load_order() {
		let a = snip("a", "location /dup/ { proxy_pass svcA:1; }");
		let b = snip("b", "location /dup/ { proxy_pass svcB:2; }");
		let res = Resolution {
			path: "/dup/".to_string(),
			match_kind: MatchKind::Prefix,
			winner_file: "b.conf".to_string(),
			strategy: ResolutionStrategy::Manual,
			resolved_at: Utc::now(),
			stale: false,
		};
		let artifact = compose(1, &[a, b], &[], &[res]);
		assert_eq!(artifact.route("/dup/").unwrap().upstream_target, UpstreamTarget::Literal { host: "svcB".to_string(), port: 2 });
	}

	#[test]
	fn reserved_path_routes_are_dropped_with_a_warning() {
		let a = snip("a", "location /config/evil { proxy_pass svcA:1; }");
		let artifact = compose(1, &[a], &[], &[]);
		assert!(artifact.route("/config/evil").is_none());
		assert_eq!(artifact.warnings.len(), 1);
	}

	#[test]
	fn content_hash_is_stable_for_identical_input() {
		let a = snip("a", "location /api/ { proxy_pass svcA:8000; }");
		let h1 = compose(1, std::slice::from_ref(&a), &[], &[]).content_hash;
		let h2 = compose(2, std::slice::from_ref(&a), &[], &[]).content_hash;
		assert_eq!(h1, h2, "content hash must not depend on generation number");
	}
}
