//! Core domain types shared by every component: the shapes that flow from snippet files through
//! composition, the dataplane, health probes, and the self-healing engine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a route's path is matched against an incoming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
	Exact,
	Prefix,
	Regex,
}

impl std::fmt::Display for MatchKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			MatchKind::Exact => write!(f, "exact"),
			MatchKind::Prefix => write!(f, "prefix"),
			MatchKind::Regex => write!(f, "regex"),
		}
	}
}

/// A route key is the uniqueness unit in a composed artifact.
pub type RouteKey = (String, MatchKind);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum HttpsRedirectPolicy {
	#[default]
	Preserve,
	ForceHttps,
	Relative,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RouteFlags {
	#[serde(default)]
	pub strip_prefix: bool,
	#[serde(default)]
	pub websocket: bool,
	#[serde(default)]
	pub forwarded_prefix: bool,
	#[serde(default)]
	pub https_redirect_policy: HttpsRedirectPolicy,
}

/// Either a literal `host:port`, or a symbol referring to a declared upstream variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpstreamTarget {
	Literal { host: String, port: u16 },
	Symbol { name: String },
}

impl std::fmt::Display for UpstreamTarget {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			UpstreamTarget::Literal { host, port } => write!(f, "{host}:{port}"),
			UpstreamTarget::Symbol { name } => write!(f, "${name}"),
		}
	}
}

/// A single `location`-style routing block, as parsed from one snippet file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
	pub path: String,
	pub match_kind: MatchKind,
	pub upstream_target: UpstreamTarget,
	pub flags: RouteFlags,
	pub source_file: String,
	pub line_span: (usize, usize),
	/// Directives in the block this parser doesn't recognize, preserved verbatim so the
	/// snippet round-trips.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub opaque_directives: Vec<String>,
}

impl Route {
	pub fn key(&self) -> RouteKey {
		(self.path.clone(), self.match_kind)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseError {
	pub line: usize,
	pub message: String,
}

/// A single app's route declaration file, or an operator override file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
	pub app_name: String,
	pub file_path: PathBuf,
	pub routes: Vec<Route>,
	pub parse_errors: Vec<ParseError>,
	pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
	pub source_file: String,
	pub route: Route,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
	pub path: String,
	pub match_kind: MatchKind,
	pub candidates: Vec<Candidate>,
	pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
	FirstWins,
	Manual,
	Renamed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
	pub path: String,
	pub match_kind: MatchKind,
	pub winner_file: String,
	pub strategy: ResolutionStrategy,
	pub resolved_at: DateTime<Utc>,
	/// Set once the winner file no longer exists in the current snippet set; retained for
	/// audit until explicitly cleared.
	#[serde(default)]
	pub stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
	pub symbol: String,
	pub host: String,
	pub port: u16,
	pub resolver_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedArtifact {
	pub generation: u64,
	pub content_hash: String,
	pub routes: Vec<Route>,
	pub upstreams: Vec<Upstream>,
	pub conflicts: Vec<Conflict>,
	pub warnings: Vec<String>,
	pub produced_at: DateTime<Utc>,
}

impl ComposedArtifact {
	pub fn route(&self, path: &str) -> Option<&Route> {
		self.routes.iter().find(|r| r.path == path)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
	Ok,
	Warn,
	Err,
}

impl Severity {
	/// Classifies an HTTP status code (or `0` for an unreachable origin) per the normative
	/// table: 2xx/308 are ok, 0/4xx/other-3xx are warn, 5xx is err.
	pub fn classify(status_code: u16) -> Severity {
		match status_code {
			0 => Severity::Warn,
			308 => Severity::Ok,
			200..=299 => Severity::Ok,
			300..=399 => Severity::Warn,
			400..=499 => Severity::Warn,
			500..=599 => Severity::Err,
			_ => Severity::Warn,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
	Local,
	External,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
	pub route_path: String,
	pub origin: Origin,
	pub status_code: u16,
	pub latency_ms: u64,
	pub severity: Severity,
	pub body_signature: Option<String>,
	pub probed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifiedStatus {
	Pass,
	Fail,
	Inconclusive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingAttempt {
	pub id: String,
	pub route_path: String,
	pub pattern: String,
	pub strategy: String,
	pub before_hash: String,
	pub after_hash: Option<String>,
	pub verified: Option<VerifiedStatus>,
	pub started_at: DateTime<Utc>,
	pub finished_at: Option<DateTime<Utc>>,
	pub steps: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtKind {
	Info,
	Step,
	Diagnose,
	Mutate,
	Verify,
	Result,
	Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtEvent {
	pub id: u64,
	pub at_ms: i64,
	pub kind: ThoughtKind,
	pub route: Option<String>,
	pub text: String,
	pub data: Option<serde_json::Value>,
}

/// Deterministic declared-variable name for a literal `host:port` target, shared by the
/// composer (which synthesizes the `Upstream` entries) and the dataplane renderer (which must
/// reference the same symbol).
pub fn upstream_symbol(host: &str, port: u16) -> String {
	format!("__literal_{host}_{port}")
}

/// Paths a snippet must never claim: the dataplane's own landing content plus every Control API
/// surface.
pub const RESERVED_EXACT: &[&str] = &["/", "/status", "/health", "/reports"];
pub const RESERVED_PREFIXES: &[&str] =
	&["/apps", "/config", "/resolve-conflict", "/rename-route", "/ai", "/auth", "/routes.json", "/status.json", "/health.json"];

pub fn is_reserved_path(path: &str) -> bool {
	if RESERVED_EXACT.contains(&path) {
		return true;
	}
	RESERVED_PREFIXES.iter().any(|prefix| path == *prefix || path.starts_with(&format!("{prefix}/")))
}

/// A snippet/override file name must be a single path segment: no separators, no `.`/`..`,
/// nothing that could escape the directory it's about to be joined onto.
pub fn is_safe_file_name(name: &str) -> bool {
	!name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\\')
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn severity_classification_matches_table() {
		assert_eq!(Severity::classify(0), Severity::Warn);
		assert_eq!(Severity::classify(200), Severity::Ok);
		assert_eq!(Severity::classify(204), Severity::Ok);
		assert_eq!(Severity::classify(308), Severity::Ok);
		assert_eq!(Severity::classify(301), Severity::Warn);
		assert_eq!(Severity::classify(404), Severity::Warn);
		assert_eq!(Severity::classify(502), Severity::Err);
	}

	#[test]
	fn reserved_paths_cover_exact_and_control_api() {
		assert!(is_reserved_path("/"));
		assert!(is_reserved_path("/health"));
		assert!(is_reserved_path("/ai/thoughts"));
		assert!(is_reserved_path("/config/foo.conf"));
		assert!(!is_reserved_path("/api/"));
		assert!(!is_reserved_path("/configurator"));
	}

	#[test]
	fn safe_file_name_rejects_traversal_and_separators() {
		assert!(is_safe_file_name("widgets.conf"));
		assert!(!is_safe_file_name(".."));
		assert!(!is_safe_file_name("."));
		assert!(!is_safe_file_name(""));
		assert!(!is_safe_file_name("../etc/cron.d/evil"));
		assert!(!is_safe_file_name("nested/escape.conf"));
		assert!(!is_safe_file_name("nested\\escape.conf"));
	}
}
