//! C12 — Supervisor. Owns the background loops that keep the live route set current without an
//! operator in the loop: a debounced filesystem watcher over the snippet/override directories
//! (built on `notify-debouncer-full`, which coalesces bursts of filesystem events on its own
//! background thread and hands back one drained batch at a time — the shape is the same
//! recv-loop-then-reload structure as `motya`'s `file_watcher.rs`, minus the hand-rolled
//! debounce), a periodic health-scan tick with per-route backoff, and the escalation from three
//! consecutive probe failures into a real auditor run and healing attempt. Shuts down
//! cooperatively via [`devproxy_core::drain`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify_debouncer_full::notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tracing::{debug, error, info, warn};

use devproxy_core::drain::DrainWatcher;

use crate::auditor::{AuditRequest, AuditorBackend, DEFAULT_TIMEOUT};
use crate::health::{HealthScanner, StreakTracker};
use crate::heal::patterns::Diagnosis;
use crate::heal::HealingEngine;
use crate::pipeline::Pipeline;
use crate::store::reports::ReportStore;
use crate::tunnel::TunnelResolver;
use crate::types::{HealthReport, Origin, Severity};

const WATCH_DEBOUNCE: Duration = Duration::from_millis(250);
const HEAL_DRAIN_DEADLINE: Duration = Duration::from_secs(5);
const ESCALATION_WAIT_MS: u64 = 500;

pub struct Supervisor {
	pipeline: Arc<Pipeline>,
	scanner: HealthScanner,
	tunnel: Arc<TunnelResolver>,
	healer: Arc<HealingEngine>,
	auditor: Arc<dyn AuditorBackend>,
	reports: Arc<tokio::sync::Mutex<ReportStore>>,
	scan_period: Duration,
	watch_dirs: Vec<PathBuf>,
}

impl Supervisor {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		pipeline: Arc<Pipeline>,
		scanner: HealthScanner,
		tunnel: Arc<TunnelResolver>,
		healer: Arc<HealingEngine>,
		auditor: Arc<dyn AuditorBackend>,
		reports: Arc<tokio::sync::Mutex<ReportStore>>,
		scan_period: Duration,
		watch_dirs: Vec<PathBuf>,
	) -> Self {
		Self { pipeline, scanner, tunnel, healer, auditor, reports, scan_period, watch_dirs }
	}

	/// Runs every background loop until `drain` signals a shutdown, then returns once in-flight
	/// work (an active heal, in particular) has had up to 5 seconds to finish.
	pub async fn run(self, drain: DrainWatcher) {
		let watch_dirs = self.watch_dirs.clone();
		let pipeline_for_watch = self.pipeline.clone();
		let watch_drain = drain.clone();
		let watch_task = tokio::spawn(async move {
			run_watch_loop(pipeline_for_watch, watch_dirs, watch_drain).await;
		});

		let scan_drain = drain.clone();
		let scan_task = tokio::spawn(async move {
			self.run_scan_loop(scan_drain).await;
		});

		let blocker = drain.wait_for_drain().await;
		info!("supervisor draining, allowing up to {:?} for in-flight work", HEAL_DRAIN_DEADLINE);
		let _ = tokio::time::timeout(HEAL_DRAIN_DEADLINE, async {
			let _ = watch_task.await;
			let _ = scan_task.await;
		})
		.await;
		drop(blocker);
	}

	async fn run_scan_loop(&self, drain: DrainWatcher) {
		let mut streaks = StreakTracker::default();
		let mut last_probed: HashMap<String, Instant> = HashMap::new();
		let mut ticker = tokio::time::interval(self.scan_period);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = ticker.tick() => {},
				_ = drain.clone().wait_for_drain() => {
					debug!("scan loop observed drain, stopping");
					return;
				}
			}

			let registry = self.pipeline.registry();
			let now = Instant::now();
			let due_routes: Vec<_> = registry
				.routes()
				.into_iter()
				.filter(|route| {
					let period = self.scanner.period_for(streaks.streak_for(&route.path));
					last_probed.get(&route.path).map_or(true, |probed_at| now.duration_since(*probed_at) >= period)
				})
				.collect();
			for route in &due_routes {
				last_probed.insert(route.path.clone(), now);
			}

			let external_base = self.tunnel.resolve().await;
			let reports = self
				.scanner
				.scan_routes(due_routes, |route| external_base.as_ref().map(|base| format!("{}{}", base.trim_end_matches('/'), route.path)))
				.await;

			let mut by_route: HashMap<String, (Option<HealthReport>, Option<HealthReport>)> = HashMap::new();
			{
				let mut store = self.reports.lock().await;
				for report in reports {
					let slot = by_route.entry(report.route_path.clone()).or_default();
					match report.origin {
						Origin::Local => slot.0 = Some(report.clone()),
						Origin::External => slot.1 = Some(report.clone()),
					}
					if let Err(e) = store.record(report) {
						warn!("failed to persist health report: {e}");
					}
				}
			}

			// One streak update per route per tick, not per report: a route probed on both
			// origins would otherwise advance its streak twice a tick and hit the 3-strikes
			// escalation in 1.5 scans instead of three consecutive ones.
			let mut escalations = Vec::new();
			for (route_path, (local_report, external_report)) in &by_route {
				let severity = worst_severity(local_report.as_ref(), external_report.as_ref());
				if streaks.record_tick(route_path, severity) {
					escalations.push(route_path.clone());
				}
			}

			for route_path in escalations {
				let healer = self.healer.clone();
				let auditor = self.auditor.clone();
				let tunnel = self.tunnel.clone();
				let route = registry.route(&route_path);
				let (local_report, external_report) = by_route.get(&route_path).cloned().unwrap_or_default();
				tokio::spawn(async move {
					let audit_url = tunnel
						.resolve()
						.await
						.map(|base| format!("{}{}", base.trim_end_matches('/'), route_path))
						.unwrap_or_else(|| format!("http://127.0.0.1{route_path}"));
					let auditor_findings = auditor
						.audit(AuditRequest { url: audit_url, timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64, wait_ms: ESCALATION_WAIT_MS })
						.await
						.ok();
					let diagnosis = Diagnosis { route, local_report, external_report, auditor_findings };
					match healer.attempt(&route_path, diagnosis).await {
						Ok(attempt) => info!(route = %route_path, verified = ?attempt.verified, "auto-heal attempt finished"),
						Err(e) => debug!(route = %route_path, "auto-heal not started: {e}"),
					}
				});
			}
		}
	}
}

/// The worse of a route's local and external severities for one tick, `Ok` if neither was
/// probed. `Err` dominates `Warn` dominates `Ok`, matching the normative classification order.
fn worst_severity(local: Option<&HealthReport>, external: Option<&HealthReport>) -> Severity {
	[local, external].into_iter().flatten().map(|r| r.severity).max_by_key(severity_rank).unwrap_or(Severity::Ok)
}

fn severity_rank(severity: &Severity) -> u8 {
	match severity {
		Severity::Ok => 0,
		Severity::Warn => 1,
		Severity::Err => 2,
	}
}

async fn run_watch_loop(pipeline: Arc<Pipeline>, dirs: Vec<PathBuf>, drain: DrainWatcher) {
	let (tx, mut rx) = tokio::sync::mpsc::channel(16);

	let mut debouncer = match new_debouncer(WATCH_DEBOUNCE, None, move |result: DebounceEventResult| {
		match result {
			Ok(events) if !events.is_empty() => {
				let _ = tx.blocking_send(());
			},
			Ok(_) => {},
			Err(errors) => {
				for e in errors {
					warn!("filesystem watcher error: {e}");
				}
			},
		}
	}) {
		Ok(d) => d,
		Err(e) => {
			error!("failed to start filesystem watcher: {e}, snippet changes will require a manual reload");
			return;
		},
	};

	for dir in &dirs {
		let _ = std::fs::create_dir_all(dir);
		if let Err(e) = debouncer.watch(dir, RecursiveMode::NonRecursive) {
			warn!("failed to watch {}: {e}", dir.display());
		}
	}

	loop {
		tokio::select! {
			event = rx.recv() => {
				if event.is_none() {
					return;
				}
				match pipeline.recompose_and_commit().await {
					Ok(artifact) => info!(generation = artifact.generation, "recomposed after filesystem change"),
					Err(e) => warn!("recompose after filesystem change failed: {e}"),
				}
			}
			_ = drain.clone().wait_for_drain() => {
				debug!("watch loop observed drain, stopping");
				return;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use chrono::Utc;

	use super::*;
	use crate::dataplane::NullDataplane;
	use crate::store::registry::RouteRegistry;
	use crate::store::resolutions::ResolutionStore;
	use crate::thoughts::ThoughtBus;
	use crate::types::ComposedArtifact;

	fn empty_artifact() -> ComposedArtifact {
		ComposedArtifact { generation: 0, content_hash: "h".to_string(), routes: Vec::new(), upstreams: Vec::new(), conflicts: Vec::new(), warnings: Vec::new(), produced_at: Utc::now() }
	}

	#[tokio::test]
	async fn watch_loop_recomposes_on_file_change_and_stops_on_drain() {
		let dir = tempfile::tempdir().unwrap();
		let snippets_dir = dir.path().join("snippets");
		let overrides_dir = dir.path().join("overrides");
		let build_dir = dir.path().join("build");
		std::fs::create_dir_all(&snippets_dir).unwrap();
		let resolutions = ResolutionStore::load(dir.path().join("state/resolutions.json")).unwrap();
		let pipeline = Arc::new(Pipeline::new(snippets_dir.clone(), overrides_dir.clone(), &build_dir, Box::new(NullDataplane), resolutions, RouteRegistry::new(empty_artifact())));

		let (trigger, watcher) = devproxy_core::drain::new();
		let handle = tokio::spawn(run_watch_loop(pipeline.clone(), vec![snippets_dir.clone(), overrides_dir], watcher));

		tokio::time::sleep(Duration::from_millis(50)).await;
		std::fs::write(snippets_dir.join("a.conf"), "location /api/ { proxy_pass svcA:8000; }").unwrap();
		tokio::time::sleep(Duration::from_millis(600)).await;

		assert_eq!(pipeline.registry().routes().len(), 1);

		trigger.start_drain_and_wait(devproxy_core::drain::DrainMode::Immediate).await;
		let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
		let _ = ThoughtBus::new();
	}
}
