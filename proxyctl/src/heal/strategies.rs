//! The seven named healing strategies. Each is an idempotent, reversible mutation — applying it
//! twice is a no-op, and its effect is fully captured in the route it returns, so rolling back
//! is just reinstating the pre-mutation route.

use crate::types::{HttpsRedirectPolicy, Route, UpstreamTarget, upstream_symbol};

/// A named strategy bound to one of [`crate::heal::patterns::PATTERNS`] by array position —
/// the healing engine walks both lists in lockstep, in the declared priority order from
/// SPEC_FULL.md §4.8's table.
pub struct Strategy {
	pub name: &'static str,
	pub apply: fn(&Route) -> Route,
}

pub const STRATEGIES: &[Strategy] = &[
	Strategy { name: "ensure-prefix-preserved", apply: ensure_prefix_preserved },
	Strategy { name: "force-relative-redirects", apply: force_relative_redirects },
	Strategy { name: "preserve-proto-https", apply: preserve_proto_https },
	Strategy { name: "ws-headers", apply: ws_headers },
	Strategy { name: "forwarded-prefix", apply: forwarded_prefix },
	Strategy { name: "upstream-resilience", apply: upstream_resilience },
	// rename-on-conflict is handled specially by the healing engine: it rewrites a losing
	// snippet's path rather than mutating a single route in place, so it has no entry here.
];

/// Disables prefix-stripping, which is the usual cause of a static asset resolving to the
/// app's HTML shell instead of the asset itself.
fn ensure_prefix_preserved(route: &Route) -> Route {
	let mut mutated = route.clone();
	mutated.flags.strip_prefix = false;
	mutated
}

/// Forces redirects to be emitted relative to the request, avoiding absolute `http://` targets
/// leaking out from behind an HTTPS-terminating tunnel.
fn force_relative_redirects(route: &Route) -> Route {
	let mut mutated = route.clone();
	mutated.flags.https_redirect_policy = HttpsRedirectPolicy::Relative;
	mutated
}

const PRESERVE_PROTO_DIRECTIVE: &str = "proxy_set_header X-Forwarded-Proto https;";

/// Pins `X-Forwarded-Proto` to `https` so the origin doesn't observe `http` behind a TLS-
/// terminating tunnel.
fn preserve_proto_https(route: &Route) -> Route {
	let mut mutated = route.clone();
	if !mutated.opaque_directives.iter().any(|d| d == PRESERVE_PROTO_DIRECTIVE) {
		mutated.opaque_directives.push(PRESERVE_PROTO_DIRECTIVE.to_string());
	}
	mutated
}

const WS_UPGRADE_DIRECTIVES: &[&str] = &["proxy_set_header Upgrade $http_upgrade;", "proxy_set_header Connection \"upgrade\";"];

/// Injects the upgrade/connection headers a websocket route needs but was missing.
fn ws_headers(route: &Route) -> Route {
	let mut mutated = route.clone();
	mutated.flags.websocket = true;
	for directive in WS_UPGRADE_DIRECTIVES {
		if !mutated.opaque_directives.iter().any(|d| d == directive) {
			mutated.opaque_directives.push(directive.to_string());
		}
	}
	mutated
}

/// Sets the `forwarded_prefix` flag so the framework sees its own basepath in forwarded
/// headers.
fn forwarded_prefix(route: &Route) -> Route {
	let mut mutated = route.clone();
	mutated.flags.forwarded_prefix = true;
	mutated
}

/// Converts a literal `host:port` target into the declared-variable form the composer already
/// synthesizes for every literal upstream, with a resolver hint marking it for deferred
/// resolution so transient DNS failures don't fail the next reload.
fn upstream_resilience(route: &Route) -> Route {
	let mut mutated = route.clone();
	if let UpstreamTarget::Literal { host, port } = &route.upstream_target {
		mutated.upstream_target = UpstreamTarget::Symbol { name: upstream_symbol(host, *port) };
	}
	mutated
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{MatchKind, RouteFlags};

	fn sample_route() -> Route {
		Route {
			path: "/api/".to_string(),
			match_kind: MatchKind::Prefix,
			upstream_target: UpstreamTarget::Literal { host: "svcA".to_string(), port: 8000 },
			flags: RouteFlags::default(),
			source_file: "a.conf".to_string(),
			line_span: (1, 3),
			opaque_directives: Vec::new(),
		}
	}

	#[test]
	fn strategies_are_idempotent() {
		for strategy in STRATEGIES {
			let once = (strategy.apply)(&sample_route());
			let twice = (strategy.apply)(&once);
			assert_eq!(once, twice, "{} must be idempotent", strategy.name);
		}
	}

	#[test]
	fn upstream_resilience_preserves_the_composer_symbol_naming() {
		let mutated = upstream_resilience(&sample_route());
		assert_eq!(mutated.upstream_target, UpstreamTarget::Symbol { name: upstream_symbol("svcA", 8000) });
	}

	#[test]
	fn ws_headers_sets_flag_and_injects_both_directives() {
		let mutated = ws_headers(&sample_route());
		assert!(mutated.flags.websocket);
		assert_eq!(mutated.opaque_directives.len(), 2);
	}
}
