//! C10 — Control API. A small `axum` service exposing the stable contract in SPEC_FULL.md §4.10:
//! dashboard read endpoints are public, everything that mutates state or triggers a side effect
//! requires a session minted by `/auth/login`.
//!
//! Grounded on the teacher's general router-assembly shape (one `Router<S>` built from route
//! tables, state threaded via `with_state`) — the transport itself is a deliberate deviation from
//! the teacher's hand-rolled raw-hyper server, documented in SPEC_FULL.md §4.10 and DESIGN.md.

pub mod error;
pub mod handlers;
pub mod session;

use std::path::PathBuf;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auditor::AuditorBackend;
use crate::heal::HealingEngine;
use crate::pipeline::Pipeline;
use crate::store::reports::ReportStore;
use crate::thoughts::ThoughtBus;
use crate::tunnel::TunnelResolver;
use devproxy_core::readiness::Ready;
use devproxy_core::version::BuildInfo;
use session::SessionStore;

#[derive(Clone)]
pub struct AppState {
	pub readiness: Ready,
	pub build_info: Arc<BuildInfo>,
	pub reports: Arc<tokio::sync::Mutex<ReportStore>>,
	pub pipeline: Arc<Pipeline>,
	pub snippets_dir: PathBuf,
	pub auditor: Arc<dyn AuditorBackend>,
	pub healer: Arc<HealingEngine>,
	pub tunnel: Arc<TunnelResolver>,
	pub thoughts: ThoughtBus,
	pub sessions: Arc<SessionStore>,
}

/// Builds the full Control API router over `state`. Read endpoints used by the dashboard (health,
/// status, routes, config read, thoughts) stay public; every endpoint that writes a snippet,
/// resolves a conflict, renames a route, or kicks off an audit/heal requires a live session.
pub fn build_router(state: AppState) -> Router {
	let sessions = state.sessions.clone();

	let public = Router::new()
		.route("/health.json", get(handlers::health))
		.route("/status.json", get(handlers::status))
		.route("/routes.json", get(handlers::routes))
		.route("/config/:file", get(handlers::config_read))
		.route("/ai/thoughts", get(handlers::ai_thoughts))
		.route("/auth/login", post(handlers::auth_login))
		.route("/auth/logout", post(handlers::auth_logout));

	let protected = Router::new()
		.route("/apps/install", post(handlers::apps_install))
		.route("/apps/create-route", post(handlers::apps_create_route))
		.route("/config/:file", post(handlers::config_write))
		.route("/resolve-conflict", post(handlers::resolve_conflict))
		.route("/rename-route", post(handlers::rename_route))
		.route("/ai/audit", post(handlers::ai_audit))
		.route("/ai/audit-and-heal", post(handlers::ai_audit_and_heal))
		.route("/ai/advanced-heal", post(handlers::ai_advanced_heal))
		.layer(middleware::from_fn_with_state(sessions, session::require_session));

	public.merge(protected).layer(TraceLayer::new_for_http()).with_state(state)
}
