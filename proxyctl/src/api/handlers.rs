//! Handlers for every Control API endpoint in SPEC_FULL.md §4.10's stable contract summary.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::error::ApiError;
use super::session::{session_cookie, SESSION_COOKIE};
use super::AppState;
use crate::heal::patterns::Diagnosis;
use crate::types::{MatchKind, ResolutionStrategy};

/// Assembles the evidence a healing attempt needs for `route_path`: its live `Route`, the latest
/// local/external health reports on file, and a fresh auditor run against the best-known URL
/// (external if a tunnel is configured, local otherwise). A failed auditor run just leaves
/// `auditor_findings` unset — the patterns that don't need it can still match.
async fn gather_diagnosis(state: &AppState, route_path: &str) -> Diagnosis {
	let route = state.pipeline.registry().route(route_path);
	let (local_report, external_report) = match state.reports.lock().await.get(route_path) {
		Some(pair) => (pair.local.clone(), pair.external.clone()),
		None => (None, None),
	};
	let audit_url = state
		.tunnel
		.resolve()
		.await
		.map(|base| format!("{}{}", base.trim_end_matches('/'), route_path))
		.unwrap_or_else(|| format!("http://127.0.0.1{route_path}"));
	let auditor_findings = state
		.auditor
		.audit(crate::auditor::AuditRequest { url: audit_url, timeout_ms: crate::auditor::DEFAULT_TIMEOUT.as_millis() as u64, wait_ms: 500 })
		.await
		.ok();
	Diagnosis { route, local_report, external_report, auditor_findings }
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
	Json(json!({ "ready": state.readiness.is_ready(), "version": state.build_info.version }))
}

pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
	let reports = state.reports.lock().await;
	Json(serde_json::to_value(reports.all()).unwrap_or(json!({})))
}

pub async fn routes(State(state): State<AppState>) -> Json<serde_json::Value> {
	let snapshot = state.pipeline.registry().snapshot();
	Json(json!({
		"generation": snapshot.generation,
		"routes": snapshot.routes,
		"conflicts": snapshot.conflicts,
		"warnings": snapshot.warnings,
	}))
}

#[derive(Deserialize)]
pub struct InstallAppRequest {
	pub name: String,
	pub content: String,
}

pub async fn apps_install(State(state): State<AppState>, Json(req): Json<InstallAppRequest>) -> Result<Json<serde_json::Value>, ApiError> {
	if !crate::types::is_safe_file_name(&req.name) {
		return Err(ApiError::Forbidden(format!("invalid app name: {}", req.name)));
	}
	let file_name = format!("{}.conf", req.name);
	let artifact = state.pipeline.install_snippet(&file_name, &req.content).await?;
	Ok(Json(json!({ "generation": artifact.generation, "warnings": artifact.warnings })))
}

#[derive(Deserialize)]
pub struct CreateRouteRequest {
	pub name: String,
	pub base_path: String,
	pub upstream: String,
	#[serde(default)]
	pub install: bool,
}

pub async fn apps_create_route(State(state): State<AppState>, Json(req): Json<CreateRouteRequest>) -> Result<Json<serde_json::Value>, ApiError> {
	if crate::types::is_reserved_path(&req.base_path) {
		return Err(ApiError::ReservedPath(req.base_path));
	}
	let content = format!("location {} {{\n\tproxy_pass {};\n}}\n", req.base_path, req.upstream);
	if req.install {
		if !crate::types::is_safe_file_name(&req.name) {
			return Err(ApiError::Forbidden(format!("invalid app name: {}", req.name)));
		}
		let file_name = format!("{}.conf", req.name);
		let artifact = state.pipeline.install_snippet(&file_name, &content).await?;
		Ok(Json(json!({ "content": content, "generation": artifact.generation, "warnings": artifact.warnings })))
	} else {
		Ok(Json(json!({ "content": content })))
	}
}

pub async fn config_read(State(state): State<AppState>, Path(file): Path<String>) -> Result<String, ApiError> {
	if !crate::types::is_safe_file_name(&file) {
		return Err(ApiError::Forbidden(format!("invalid file name: {file}")));
	}
	let path = state.snippets_dir.join(&file);
	fs_err::read_to_string(&path).map_err(|_| ApiError::NotFound(file))
}

pub async fn config_write(State(state): State<AppState>, Path(file): Path<String>, body: String) -> Result<Json<serde_json::Value>, ApiError> {
	if !crate::types::is_safe_file_name(&file) {
		return Err(ApiError::Forbidden(format!("invalid file name: {file}")));
	}
	let artifact = state.pipeline.install_snippet(&file, &body).await?;
	Ok(Json(json!({ "generation": artifact.generation, "warnings": artifact.warnings })))
}

#[derive(Deserialize)]
pub struct ResolveConflictRequest {
	pub path: String,
	pub match_kind: MatchKind,
	pub winner_file: String,
}

pub async fn resolve_conflict(State(state): State<AppState>, Json(req): Json<ResolveConflictRequest>) -> Result<Json<serde_json::Value>, ApiError> {
	let snapshot = state.pipeline.registry().snapshot();
	let conflict = snapshot
		.conflicts
		.iter()
		.find(|c| c.path == req.path && c.match_kind == req.match_kind)
		.ok_or_else(|| ApiError::NoSuchConflict(req.path.clone()))?;
	if !conflict.candidates.iter().any(|c| c.source_file == req.winner_file) {
		return Err(ApiError::CandidateMissing(req.winner_file));
	}
	state.pipeline.set_resolution(&req.path, req.match_kind, &req.winner_file, ResolutionStrategy::Manual).await.map_err(|e| ApiError::ValidationFailed(e.to_string()))?;
	let artifact = state.pipeline.recompose_and_commit().await?;
	Ok(Json(json!({ "generation": artifact.generation })))
}

#[derive(Deserialize)]
pub struct RenameRouteRequest {
	pub old_path: String,
	pub new_path: String,
	pub file: String,
}

pub async fn rename_route(State(state): State<AppState>, Json(req): Json<RenameRouteRequest>) -> Result<Json<serde_json::Value>, ApiError> {
	if crate::types::is_reserved_path(&req.new_path) {
		return Err(ApiError::ReservedPath(req.new_path));
	}
	if !crate::types::is_safe_file_name(&req.file) {
		return Err(ApiError::Forbidden(format!("invalid file name: {}", req.file)));
	}
	let snapshot = state.pipeline.registry().snapshot();
	if snapshot.routes.iter().any(|r| r.path == req.new_path) {
		return Err(ApiError::Collision(req.new_path));
	}
	let path = state.snippets_dir.join(&req.file);
	let contents = fs_err::read_to_string(&path).map_err(|_| ApiError::NotFound(req.file.clone()))?;
	let rewritten = contents.replacen(&req.old_path, &req.new_path, 1);
	let artifact = state.pipeline.install_snippet(&req.file, &rewritten).await?;
	Ok(Json(json!({ "generation": artifact.generation })))
}

#[derive(Deserialize)]
pub struct AuditRequestBody {
	pub url: String,
	#[serde(default = "default_timeout_ms")]
	pub timeout_ms: u64,
	#[serde(default = "default_wait_ms")]
	pub wait_ms: u64,
}

fn default_timeout_ms() -> u64 {
	crate::auditor::DEFAULT_TIMEOUT.as_millis() as u64
}
fn default_wait_ms() -> u64 {
	500
}

pub async fn ai_audit(State(state): State<AppState>, Json(req): Json<AuditRequestBody>) -> Result<Json<serde_json::Value>, ApiError> {
	let findings = state
		.auditor
		.audit(crate::auditor::AuditRequest { url: req.url, timeout_ms: req.timeout_ms, wait_ms: req.wait_ms })
		.await
		.map_err(|e| ApiError::ValidationFailed(e.to_string()))?;
	Ok(Json(serde_json::to_value(findings).unwrap_or(json!({}))))
}

#[derive(Deserialize)]
pub struct AuditAndHealRequest {
	pub route: String,
}

#[derive(Serialize)]
pub struct AsyncHealStarted {
	pub attempt_id: String,
}

pub async fn ai_audit_and_heal(State(state): State<AppState>, Json(req): Json<AuditAndHealRequest>) -> Json<AsyncHealStarted> {
	let attempt_id = uuid::Uuid::new_v4().to_string();
	let route = req.route;
	tokio::spawn(async move {
		let diagnosis = gather_diagnosis(&state, &route).await;
		let _ = state.healer.attempt(&route, diagnosis).await;
	});
	Json(AsyncHealStarted { attempt_id })
}

#[derive(Deserialize)]
pub struct AdvancedHealRequest {
	pub route: String,
}

pub async fn ai_advanced_heal(State(state): State<AppState>, Json(req): Json<AdvancedHealRequest>) -> Result<Json<serde_json::Value>, ApiError> {
	let diagnosis = gather_diagnosis(&state, &req.route).await;
	let attempt = state.healer.attempt(&req.route, diagnosis).await?;
	Ok(Json(serde_json::to_value(attempt).unwrap_or(json!({}))))
}

#[derive(Deserialize)]
pub struct ThoughtsQuery {
	#[serde(default)]
	pub since: u64,
}

pub async fn ai_thoughts(State(state): State<AppState>, Query(query): Query<ThoughtsQuery>) -> Json<serde_json::Value> {
	let events = state.thoughts.poll_since(query.since, std::time::Duration::from_secs(25)).await;
	Json(json!({ "events": events, "cursor": state.thoughts.latest_cursor() }))
}

#[derive(Deserialize)]
pub struct LoginRequest {
	pub password: String,
}

pub async fn auth_login(State(state): State<AppState>, jar: CookieJar, Json(req): Json<LoginRequest>) -> Result<impl IntoResponse, ApiError> {
	let session = state.sessions.login(&req.password)?;
	let jar = jar.add(session_cookie(&session));
	Ok((jar, Json(json!({ "expires_at": session.expires_at }))))
}

pub async fn auth_logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
	if let Some(cookie) = jar.get(SESSION_COOKIE) {
		state.sessions.logout(cookie.value());
	}
	let jar = jar.remove(SESSION_COOKIE);
	(jar, Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::time::Duration;

	use chrono::Utc;

	use super::*;
	use crate::auditor::NullAuditor;
	use crate::dataplane::NullDataplane;
	use crate::heal::HealingEngine;
	use crate::pipeline::Pipeline;
	use crate::store::registry::RouteRegistry;
	use crate::store::reports::ReportStore;
	use crate::store::resolutions::ResolutionStore;
	use crate::thoughts::ThoughtBus;
	use crate::tunnel::TunnelResolver;
	use crate::types::{ComposedArtifact, HealthReport, MatchKind, Origin, Route, RouteFlags, Severity, UpstreamTarget};
	use async_trait::async_trait;
	use devproxy_core::readiness::Ready;
	use devproxy_core::version::BuildInfo;

	fn route(path: &str) -> Route {
		Route {
			path: path.to_string(),
			match_kind: MatchKind::Prefix,
			upstream_target: UpstreamTarget::Literal { host: "svcA".to_string(), port: 8000 },
			flags: RouteFlags::default(),
			source_file: "a.conf".to_string(),
			line_span: (1, 3),
			opaque_directives: Vec::new(),
		}
	}

	struct NeverReload;
	#[async_trait]
	impl crate::heal::RecomposeAndReload for NeverReload {
		async fn run(&self) -> Result<String, String> {
			Err("not exercised".to_string())
		}
	}

	struct NeverProbe;
	#[async_trait]
	impl crate::heal::VerificationProbe for NeverProbe {
		async fn probe(&self, _route_path: &str) -> Severity {
			Severity::Ok
		}
	}

	async fn test_state(dir: &std::path::Path) -> AppState {
		let snippets_dir = dir.join("snippets");
		let overrides_dir = dir.join("overrides");
		let build_dir = dir.join("build");
		std::fs::create_dir_all(&snippets_dir).unwrap();

		let artifact = ComposedArtifact { generation: 1, content_hash: "h0".to_string(), routes: vec![route("/api/")], upstreams: Vec::new(), conflicts: Vec::new(), warnings: Vec::new(), produced_at: Utc::now() };
		let registry = RouteRegistry::new(artifact.clone());
		let resolutions = ResolutionStore::load(dir.join("state/resolutions.json")).unwrap();
		let pipeline = Arc::new(Pipeline::new(snippets_dir.clone(), overrides_dir.clone(), &build_dir, Box::new(NullDataplane), resolutions, registry.clone()));

		let thoughts = ThoughtBus::new();
		let healer = Arc::new(HealingEngine::new(overrides_dir, registry, thoughts.clone(), Box::new(NeverReload), Box::new(NeverProbe), Duration::from_secs(300), 3));
		let reports = Arc::new(tokio::sync::Mutex::new(ReportStore::load(dir.join("reports-latest.json")).unwrap()));

		AppState {
			readiness: Ready::new(),
			build_info: Arc::new(BuildInfo::new()),
			reports,
			pipeline,
			snippets_dir,
			auditor: Arc::new(NullAuditor),
			healer,
			tunnel: Arc::new(TunnelResolver::new(None)),
			thoughts,
			sessions: Arc::new(crate::api::session::SessionStore::new("secret".to_string(), Duration::from_secs(3600))),
		}
	}

	#[tokio::test]
	async fn gather_diagnosis_fills_route_and_reports_from_live_state() {
		let dir = tempfile::tempdir().unwrap();
		let state = test_state(dir.path()).await;

		state
			.reports
			.lock()
			.await
			.record(HealthReport { route_path: "/api/".to_string(), origin: Origin::Local, status_code: 502, latency_ms: 4, severity: Severity::Err, body_signature: None, probed_at: Utc::now() })
			.unwrap();

		let diagnosis = gather_diagnosis(&state, "/api/").await;
		assert_eq!(diagnosis.route.as_ref().map(|r| r.path.clone()), Some("/api/".to_string()));
		assert_eq!(diagnosis.local_report.as_ref().map(|r| r.status_code), Some(502));
		assert!(diagnosis.auditor_findings.is_some(), "null auditor still returns findings, never leaves this unset");
	}

	#[tokio::test]
	async fn gather_diagnosis_on_unknown_route_has_no_route_or_reports() {
		let dir = tempfile::tempdir().unwrap();
		let state = test_state(dir.path()).await;

		let diagnosis = gather_diagnosis(&state, "/missing/").await;
		assert!(diagnosis.route.is_none());
		assert!(diagnosis.local_report.is_none());
		assert!(diagnosis.external_report.is_none());
	}
}
