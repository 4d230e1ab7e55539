//! Top-level wiring: constructs every component from [`crate::config::AppConfig`] and binds the
//! Control API listener. Modeled on the teacher's `agentgateway::app::run`/`Bound` split — `run`
//! does all the assembly and returns a handle whose `wait_termination` blocks until an OS signal
//! or explicit shutdown request, then drains in-flight work before returning.

use std::sync::Arc;

use async_trait::async_trait;
use devproxy_core::prelude::*;
use devproxy_core::version::BuildInfo;
use devproxy_core::{drain, readiness, signal};
use tracing::info;

use crate::api::{self, AppState};
use crate::api::session::SessionStore;
use crate::auditor::{AuditorBackend, NullAuditor, ProcessAuditor};
use crate::compose::compose;
use crate::config::AppConfig;
use crate::dataplane::{DataplaneBackend, NullDataplane, ShellDataplane};
use crate::health::HealthScanner;
use crate::heal::{HealingEngine, VerificationProbe};
use crate::types::Severity;
use crate::pipeline::{Pipeline, PipelineRecompose};
use crate::store::registry::RouteRegistry;
use crate::store::reports::ReportStore;
use crate::store::resolutions::ResolutionStore;
use crate::store::snippets;
use crate::thoughts::ThoughtBus;

/// Adapts [`HealthScanner`] to the healing engine's [`crate::heal::VerificationProbe`] trait.
struct ScannerProbe(HealthScanner);

#[async_trait]
impl VerificationProbe for ScannerProbe {
	async fn probe(&self, route_path: &str) -> Severity {
		self.0.probe_route(route_path).await
	}
}

pub async fn run(config: AppConfig) -> anyhow::Result<Bound> {
	let shutdown = signal::Shutdown::new();
	let (drain_signal, drain_watch) = drain::new();
	let ready = readiness::Ready::new();
	let startup_task = ready.register_task("startup");

	fs_err::create_dir_all(&config.snippets_dir)?;
	fs_err::create_dir_all(&config.overrides_dir)?;
	fs_err::create_dir_all(&config.state_dir)?;
	let build_dir = config.state_dir.join("build");

	let snippets = snippets::load_dir(&config.snippets_dir)?;
	let overrides = snippets::load_dir(&config.overrides_dir)?;
	let resolutions = ResolutionStore::load(config.state_dir.join("resolutions.json"))?;
	let initial = compose(0, &snippets, &overrides, &resolutions.get_all());
	let registry = RouteRegistry::new(initial.clone());

	let dataplane_backend: Box<dyn DataplaneBackend> = match (&config.dataplane_validate_command, &config.dataplane_reload_command) {
		(Some(validate), Some(reload)) => Box::new(ShellDataplane { validate_command: validate.clone(), reload_command: reload.clone() }),
		_ => {
			info!("no dataplane commands configured, running with the null dataplane backend");
			Box::new(NullDataplane)
		},
	};

	let pipeline = Arc::new(Pipeline::new(config.snippets_dir.clone(), config.overrides_dir.clone(), &build_dir, dataplane_backend, resolutions, registry.clone()));
	// The initial in-memory artifact above was never pushed through the dataplane; do that now
	// so the control plane's first served generation actually matches what's on disk.
	pipeline.recompose_and_commit().await.context("initial composition failed")?;

	let thoughts = ThoughtBus::new();

	let scanner = HealthScanner::new(config.scan_concurrency, config.probe_period)?;
	let auditor: Arc<dyn AuditorBackend> = match &config.auditor_command {
		Some(command) => Arc::new(ProcessAuditor { command: command.clone() }),
		None => Arc::new(NullAuditor),
	};

	let healer = Arc::new(HealingEngine::new(
		config.overrides_dir.clone(),
		registry.clone(),
		thoughts.clone(),
		Box::new(PipelineRecompose(pipeline.clone())),
		Box::new(ScannerProbe(scanner.clone())),
		config.heal_cooldown,
		config.heal_max_strategies,
	));

	let tunnel = Arc::new(crate::tunnel::TunnelResolver::new(config.tunnel_admin_url.clone()));
	let reports = Arc::new(tokio::sync::Mutex::new(ReportStore::load(config.state_dir.join("reports-latest.json"))?));
	let sessions = Arc::new(SessionStore::new(config.session_secret.clone(), config.session_ttl));

	let supervisor = crate::supervisor::Supervisor::new(
		pipeline.clone(),
		scanner,
		tunnel.clone(),
		healer.clone(),
		auditor.clone(),
		reports.clone(),
		config.probe_period,
		vec![config.snippets_dir.clone(), config.overrides_dir.clone()],
	);
	let supervisor_drain = drain_watch.clone();
	tokio::spawn(supervisor.run(supervisor_drain));

	let state = AppState {
		readiness: ready.clone(),
		build_info: Arc::new(BuildInfo::new()),
		reports,
		pipeline,
		snippets_dir: config.snippets_dir.clone(),
		auditor,
		healer,
		tunnel,
		thoughts,
		sessions,
	};
	let router = api::build_router(state);

	let listener = tokio::net::TcpListener::bind(config.listen_addr).await.context("binding control API listener")?;
	let local_addr = listener.local_addr().context("reading bound address")?;
	info!("control API listening on {local_addr}");

	let server_drain = drain_watch.clone();
	tokio::spawn(async move {
		// Holds the drain blocker alive until `serve` itself returns, not just until the signal
		// fires — otherwise the outer drain would stop waiting before in-flight requests finish.
		let (blocker_tx, blocker_rx) = tokio::sync::oneshot::channel();
		let signal = async move {
			let blocker = server_drain.wait_for_drain().await;
			let _ = blocker_tx.send(blocker);
		};
		let serve = axum::serve(listener, router).with_graceful_shutdown(signal);
		if let Err(e) = serve.await {
			tracing::error!("control API server exited with an error: {e}");
		}
		drop(blocker_rx.await);
	});

	drop(startup_task);
	Ok(Bound { shutdown, drain_signal })
}

pub struct Bound {
	pub shutdown: signal::Shutdown,
	drain_signal: drain::DrainTrigger,
}

impl Bound {
	pub async fn wait_termination(self) -> anyhow::Result<()> {
		self.shutdown.wait().await;
		self.drain_signal.start_drain_and_wait(drain::DrainMode::Graceful).await;
		Ok(())
	}
}
