//! C8 — Self-Healing Engine.
//!
//! Orchestrates a single healing attempt for one route: select applicable strategies by
//! pattern match, apply them one at a time in priority order, recompose/reload/re-probe after
//! each, classify the result, and roll back on failure. All transitions emit thoughts to C11.

pub mod patterns;
pub mod strategies;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::store::registry::RouteRegistry;
use crate::thoughts::ThoughtBus;
use crate::types::{HealingAttempt, Route, Severity, ThoughtKind, VerifiedStatus};
use patterns::{Diagnosis, PATTERNS};
use strategies::STRATEGIES;

const VERIFY_PROBE_COUNT: u32 = 3;
const VERIFY_PROBE_SPACING: Duration = Duration::from_secs(2);

/// Re-runs composition and the dataplane commit after a healing mutation, returning the new
/// live generation's hash on success. Injected so the healing engine doesn't need to know how
/// snippets are loaded or which dataplane backend is wired in — that's the commit pipeline's
/// job (see [`crate::pipeline`]).
#[async_trait]
pub trait RecomposeAndReload: Send + Sync {
	async fn run(&self) -> Result<String, String>;
}

/// Probes a route's current severity for the verification window. Backed by [`crate::health::HealthScanner`]
/// in production, by a scripted fake in tests.
#[async_trait]
pub trait VerificationProbe: Send + Sync {
	async fn probe(&self, route_path: &str) -> Severity;
}

#[derive(Debug, thiserror::Error)]
pub enum HealError {
	#[error("a healing attempt is already in progress for {0}")]
	AlreadyInProgress(String),
	#[error("route {0} was healed less than 5 minutes ago")]
	Cooldown(String),
	#[error("route {0} is not currently live")]
	UnknownRoute(String),
}

struct RouteLocks {
	active: std::collections::HashSet<String>,
	last_attempt: HashMap<String, Instant>,
}

pub struct HealingEngine {
	overrides_dir: PathBuf,
	registry: RouteRegistry,
	thoughts: ThoughtBus,
	pipeline: Box<dyn RecomposeAndReload>,
	prober: Box<dyn VerificationProbe>,
	locks: Mutex<RouteLocks>,
	cooldown: Duration,
	max_strategies: usize,
}

impl HealingEngine {
	pub fn new(overrides_dir: PathBuf, registry: RouteRegistry, thoughts: ThoughtBus, pipeline: Box<dyn RecomposeAndReload>, prober: Box<dyn VerificationProbe>, cooldown: Duration, max_strategies: usize) -> Self {
		Self {
			overrides_dir,
			registry,
			thoughts,
			pipeline,
			prober,
			locks: Mutex::new(RouteLocks { active: Default::default(), last_attempt: HashMap::new() }),
			cooldown,
			max_strategies,
		}
	}

	/// Runs one healing episode for `route_path` against `diagnosis`, the evidence collected by
	/// the caller (typically the supervisor, from the latest health report and an optional
	/// auditor run).
	pub async fn attempt(&self, route_path: &str, diagnosis: Diagnosis) -> Result<HealingAttempt, HealError> {
		let route = self.registry.route(route_path).ok_or_else(|| HealError::UnknownRoute(route_path.to_string()))?;
		self.acquire(route_path)?;
		let result = self.run_attempt(route_path, route, diagnosis).await;
		self.release(route_path);
		result
	}

	fn acquire(&self, route_path: &str) -> Result<(), HealError> {
		let mut locks = self.locks.lock();
		if locks.active.contains(route_path) {
			return Err(HealError::AlreadyInProgress(route_path.to_string()));
		}
		if let Some(last) = locks.last_attempt.get(route_path) {
			if last.elapsed() < self.cooldown {
				return Err(HealError::Cooldown(route_path.to_string()));
			}
		}
		locks.active.insert(route_path.to_string());
		Ok(())
	}

	fn release(&self, route_path: &str) {
		let mut locks = self.locks.lock();
		locks.active.remove(route_path);
		locks.last_attempt.insert(route_path.to_string(), Instant::now());
	}

	async fn run_attempt(&self, route_path: &str, route: Route, mut diagnosis: Diagnosis) -> Result<HealingAttempt, HealError> {
		let id = Uuid::new_v4().to_string();
		let before_hash = self.registry.snapshot().content_hash.clone();
		let started_at = chrono::Utc::now();
		diagnosis.route = Some(route.clone());

		self.thoughts.publish(ThoughtKind::Diagnose, Some(route_path.to_string()), format!("starting healing attempt {id}"), None);

		let mut steps = Vec::new();
		let mut verified = None;
		let mut after_hash = None;
		let mut attempted_strategy = None;

		let applicable: Vec<&strategies::Strategy> = PATTERNS
			.iter()
			.zip(STRATEGIES.iter())
			.filter(|(pattern, _)| (pattern.matches)(&diagnosis))
			.map(|(_, strategy)| strategy)
			.take(self.max_strategies)
			.collect();

		for strategy in applicable {
			let step_id = self.thoughts.publish(ThoughtKind::Mutate, Some(route_path.to_string()), format!("applying strategy {}", strategy.name), None);
			steps.push(step_id);
			attempted_strategy = Some(strategy.name);

			let mutated = (strategy.apply)(&route);
			if let Err(e) = self.write_override(&mutated) {
				self.thoughts.publish(ThoughtKind::Error, Some(route_path.to_string()), format!("failed to stage override: {e}"), None);
				continue;
			}

			match self.pipeline.run().await {
				Ok(hash) => after_hash = Some(hash),
				Err(e) => {
					self.thoughts.publish(ThoughtKind::Error, Some(route_path.to_string()), format!("reload failed: {e}"), None);
					self.remove_override(&mutated);
					continue;
				},
			}

			self.thoughts.publish(ThoughtKind::Verify, Some(route_path.to_string()), "verifying".to_string(), None);
			let outcome = self.verify(route_path).await;
			verified = Some(outcome);

			match outcome {
				VerifiedStatus::Pass => break,
				VerifiedStatus::Inconclusive => break,
				VerifiedStatus::Fail => {
					self.remove_override(&mutated);
					let _ = self.pipeline.run().await;
					after_hash = None;
				},
			}
		}

		let finished_at = chrono::Utc::now();
		let result_text = match verified {
			Some(VerifiedStatus::Pass) => format!("healed via {}", attempted_strategy.unwrap_or("unknown")),
			Some(VerifiedStatus::Inconclusive) => "verification inconclusive (external origin unreachable)".to_string(),
			_ => "exhausted applicable strategies without improvement".to_string(),
		};
		self.thoughts.publish(ThoughtKind::Result, Some(route_path.to_string()), result_text, None);

		Ok(HealingAttempt {
			id,
			route_path: route_path.to_string(),
			pattern: PATTERNS.iter().find(|p| (p.matches)(&diagnosis)).map(|p| p.name.to_string()).unwrap_or_default(),
			strategy: attempted_strategy.unwrap_or("none").to_string(),
			before_hash,
			after_hash,
			verified,
			started_at,
			finished_at: Some(finished_at),
			steps,
		})
	}

	async fn verify(&self, route_path: &str) -> VerifiedStatus {
		let mut saw_ok = false;
		let mut saw_unreachable = 0u32;
		for _ in 0..VERIFY_PROBE_COUNT {
			match self.prober.probe(route_path).await {
				Severity::Ok => saw_ok = true,
				Severity::Warn => saw_unreachable += 1,
				Severity::Err => {},
			}
			tokio::time::sleep(VERIFY_PROBE_SPACING).await;
		}
		if saw_ok {
			VerifiedStatus::Pass
		} else if saw_unreachable == VERIFY_PROBE_COUNT {
			VerifiedStatus::Inconclusive
		} else {
			VerifiedStatus::Fail
		}
	}

	fn override_path(&self, route: &Route) -> PathBuf {
		let sanitized: String = route.path.chars().map(|c| if c.is_alphanumeric() { c } else { '_' }).collect();
		self.overrides_dir.join(format!("heal-{sanitized}.conf"))
	}

	fn write_override(&self, route: &Route) -> Result<(), std::io::Error> {
		fs_err::create_dir_all(&self.overrides_dir)?;
		fs_err::write(self.override_path(route), crate::dataplane::render_route_block(route))
	}

	fn remove_override(&self, route: &Route) {
		let _ = fs_err::remove_file(self.override_path(route));
	}
}

#[cfg(test)]
mod tests {
	use chrono::Utc;

	use super::*;
	use crate::types::{ComposedArtifact, MatchKind, RouteFlags, UpstreamTarget};

	struct AlwaysOk;
	#[async_trait]
	impl RecomposeAndReload for AlwaysOk {
		async fn run(&self) -> Result<String, String> {
			Ok("newhash".to_string())
		}
	}

	struct AlwaysHealthy;
	#[async_trait]
	impl VerificationProbe for AlwaysHealthy {
		async fn probe(&self, _route_path: &str) -> Severity {
			Severity::Ok
		}
	}

	fn route(path: &str) -> Route {
		Route {
			path: path.to_string(),
			match_kind: MatchKind::Prefix,
			upstream_target: UpstreamTarget::Literal { host: "svcA".to_string(), port: 8000 },
			flags: RouteFlags { strip_prefix: true, ..Default::default() },
			source_file: "a.conf".to_string(),
			line_span: (1, 3),
			opaque_directives: Vec::new(),
		}
	}

	fn registry_with(route: Route) -> RouteRegistry {
		RouteRegistry::new(ComposedArtifact { generation: 1, content_hash: "h0".to_string(), routes: vec![route], upstreams: Vec::new(), conflicts: Vec::new(), warnings: Vec::new(), produced_at: Utc::now() })
	}

	#[tokio::test]
	async fn unknown_route_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let engine = HealingEngine::new(dir.path().to_path_buf(), registry_with(route("/api/")), ThoughtBus::new(), Box::new(AlwaysOk), Box::new(AlwaysHealthy), Duration::from_secs(300), 3);
		let err = engine.attempt("/missing/", Diagnosis::default()).await.unwrap_err();
		assert!(matches!(err, HealError::UnknownRoute(_)));
	}

	#[tokio::test]
	async fn cooldown_blocks_a_second_attempt_within_five_minutes() {
		let dir = tempfile::tempdir().unwrap();
		let engine = HealingEngine::new(dir.path().to_path_buf(), registry_with(route("/api/")), ThoughtBus::new(), Box::new(AlwaysOk), Box::new(AlwaysHealthy), Duration::from_secs(300), 3);
		let diag = Diagnosis { route: Some(route("/api/")), ..Default::default() };
		engine.attempt("/api/", diag.clone()).await.unwrap();
		let err = engine.attempt("/api/", diag).await.unwrap_err();
		assert!(matches!(err, HealError::Cooldown(_)));
	}
}
