//! Declarative matchers feeding the C8 pattern→strategy registry. A pattern inspects a
//! [`Diagnosis`] — the evidence gathered for one route about to be healed — and decides whether
//! its paired strategy is applicable.

use crate::auditor::AuditFindings;
use crate::types::{HealthReport, Route};

/// Evidence gathered for one route before a healing attempt selects strategies. Not persisted;
/// assembled fresh for each attempt from the latest health report and (if one was requested) the
/// auditor's findings.
#[derive(Debug, Clone, Default)]
pub struct Diagnosis {
	pub route: Option<Route>,
	pub local_report: Option<HealthReport>,
	pub external_report: Option<HealthReport>,
	pub auditor_findings: Option<AuditFindings>,
}

/// A named pattern: human-readable `name` plus a predicate over a [`Diagnosis`].
pub struct Pattern {
	pub name: &'static str,
	pub matches: fn(&Diagnosis) -> bool,
}

pub const PATTERNS: &[Pattern] = &[
	Pattern { name: "asset-returns-html", matches: asset_returns_html },
	Pattern { name: "absolute-http-redirect-behind-https", matches: absolute_http_redirect_behind_https },
	Pattern { name: "forwarded-proto-mismatch", matches: forwarded_proto_mismatch },
	Pattern { name: "websocket-upgrade-required", matches: websocket_upgrade_required },
	Pattern { name: "framework-basepath-mismatch", matches: framework_basepath_mismatch },
	Pattern { name: "upstream-name-resolution-failure", matches: upstream_name_resolution_failure },
	Pattern { name: "persistent-conflict", matches: persistent_conflict },
];

fn asset_returns_html(d: &Diagnosis) -> bool {
	let Some(route) = &d.route else { return false };
	let looks_like_asset = route.path.ends_with(".js") || route.path.ends_with(".css") || route.path.ends_with(".json");
	let html_signature = d.local_report.as_ref().and_then(|r| r.body_signature.as_deref()).map(|s| s.contains("text/html")).unwrap_or(false);
	looks_like_asset && html_signature
}

fn absolute_http_redirect_behind_https(d: &Diagnosis) -> bool {
	let Some(report) = &d.external_report else { return false };
	(300..400).contains(&report.status_code) && d.auditor_findings.as_ref().map(|f| f.http_issues.iter().any(|i| i.contains("absolute-http-redirect"))).unwrap_or(false)
}

fn forwarded_proto_mismatch(d: &Diagnosis) -> bool {
	d.auditor_findings.as_ref().map(|f| f.http_issues.iter().any(|i| i.contains("x-forwarded-proto"))).unwrap_or(false)
}

fn websocket_upgrade_required(d: &Diagnosis) -> bool {
	d.route.as_ref().map(|r| r.flags.websocket).unwrap_or(false)
		&& d.local_report.as_ref().map(|r| r.status_code == 426).unwrap_or(false)
}

fn framework_basepath_mismatch(d: &Diagnosis) -> bool {
	!d.route.as_ref().map(|r| r.flags.forwarded_prefix).unwrap_or(true)
		&& d.auditor_findings.as_ref().map(|f| f.console_errors.iter().any(|e| e.contains("basepath"))).unwrap_or(false)
}

fn upstream_name_resolution_failure(d: &Diagnosis) -> bool {
	d.local_report.as_ref().map(|r| r.status_code == 502).unwrap_or(false) || d.external_report.as_ref().map(|r| r.status_code == 502).unwrap_or(false)
}

fn persistent_conflict(d: &Diagnosis) -> bool {
	d.auditor_findings.as_ref().map(|f| f.summary.contains("conflict")).unwrap_or(false)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{HttpsRedirectPolicy, MatchKind, Origin, RouteFlags, Severity, UpstreamTarget};

	fn route(path: &str, ws: bool) -> Route {
		Route {
			path: path.to_string(),
			match_kind: MatchKind::Prefix,
			upstream_target: UpstreamTarget::Symbol { name: "svc".to_string() },
			flags: RouteFlags { websocket: ws, strip_prefix: false, forwarded_prefix: false, https_redirect_policy: HttpsRedirectPolicy::Preserve },
			source_file: "a.conf".to_string(),
			line_span: (1, 1),
			opaque_directives: Vec::new(),
		}
	}

	#[test]
	fn asset_html_pattern_requires_both_extension_and_signature() {
		let mut d = Diagnosis { route: Some(route("/app.js", false)), ..Default::default() };
		assert!(!asset_returns_html(&d));
		d.local_report = Some(HealthReport {
			route_path: "/app.js".to_string(),
			origin: Origin::Local,
			status_code: 200,
			latency_ms: 1,
			severity: Severity::Ok,
			body_signature: Some("text/html".to_string()),
			probed_at: chrono::Utc::now(),
		});
		assert!(asset_returns_html(&d));
	}

	#[test]
	fn websocket_pattern_requires_flag_and_426() {
		let mut d = Diagnosis { route: Some(route("/ws/", true)), ..Default::default() };
		assert!(!websocket_upgrade_required(&d));
		d.local_report = Some(HealthReport { route_path: "/ws/".to_string(), origin: Origin::Local, status_code: 426, latency_ms: 1, severity: Severity::Warn, body_signature: None, probed_at: chrono::Utc::now() });
		assert!(websocket_upgrade_required(&d));
	}
}
