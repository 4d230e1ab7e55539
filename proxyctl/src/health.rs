//! C6 — Health Scanner.
//!
//! A cooperative periodic loop that probes every live route's local origin (and external
//! origin, once resolved by C7) with bounded concurrency, classifying severity and persisting
//! the latest-per-route report. Grounded on the teacher's `reqwest::ClientBuilder` usage in
//! `authn.rs` for the probe client itself; the bounded-concurrency fan-out is plain
//! `tokio::sync::Semaphore`, the idiomatic primitive for capping concurrent async work.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;

use crate::store::registry::RouteRegistry;
use crate::types::{HealthReport, Origin, Route, Severity};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-route consecutive-error counter, used to compute probe backoff and the 3-strikes
/// escalation to the healing engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct RouteStreak {
	pub consecutive_errs: u32,
}

#[derive(Clone)]
pub struct HealthScanner {
	client: reqwest::Client,
	concurrency: usize,
	base_period: Duration,
}

impl HealthScanner {
	pub fn new(concurrency: usize, base_period: Duration) -> Result<Self, reqwest::Error> {
		let client = reqwest::ClientBuilder::new().timeout(REQUEST_TIMEOUT).connect_timeout(CONNECT_TIMEOUT).redirect(reqwest::redirect::Policy::none()).build()?;
		Ok(Self { client, concurrency, base_period })
	}

	/// Which period a route should next be probed at, applying the 2x err backoff.
	pub fn period_for(&self, streak: RouteStreak) -> Duration {
		if streak.consecutive_errs > 0 {
			self.base_period * 2
		} else {
			self.base_period
		}
	}

	/// Probes a single route's local origin once, for the healing engine's post-mutation
	/// verification window (see [`crate::heal::VerificationProbe`]).
	pub async fn probe_route(&self, route_path: &str) -> Severity {
		let url = format!("http://127.0.0.1{route_path}");
		probe_one(&self.client, route_path, Origin::Local, &url).await.severity
	}

	/// Probes every route currently in `registry`, resolving each route's external URL via
	/// `external_of` (typically backed by C7's cache). Returns one [`HealthReport`] per
	/// (route, origin) pair that was actually probed.
	pub async fn scan(&self, registry: &RouteRegistry, external_of: impl Fn(&Route) -> Option<String>) -> Vec<HealthReport> {
		self.scan_routes(registry.routes(), external_of).await
	}

	/// Probes exactly `routes` (a caller-filtered subset, e.g. only those due per
	/// [`Self::period_for`]), resolving each route's external URL via `external_of`. Returns one
	/// [`HealthReport`] per (route, origin) pair that was actually probed.
	pub async fn scan_routes(&self, routes: Vec<Route>, external_of: impl Fn(&Route) -> Option<String>) -> Vec<HealthReport> {
		let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
		let mut tasks = Vec::with_capacity(routes.len() * 2);

		for route in routes {
			let local_url = format!("http://127.0.0.1{}", route.path);
			let external_url = external_of(&route);

			let client = self.client.clone();
			let sem = semaphore.clone();
			let path = route.path.clone();
			tasks.push(tokio::spawn(async move {
				let _permit = sem.acquire_owned().await.expect("semaphore never closed");
				probe_one(&client, &path, Origin::Local, &local_url).await
			}));

			if let Some(url) = external_url {
				let client = self.client.clone();
				let sem = semaphore.clone();
				let path = route.path.clone();
				tasks.push(tokio::spawn(async move {
					let _permit = sem.acquire_owned().await.expect("semaphore never closed");
					probe_one(&client, &path, Origin::External, &url).await
				}));
			}
		}

		let mut reports = Vec::with_capacity(tasks.len());
		for task in tasks {
			if let Ok(report) = task.await {
				reports.push(report);
			}
		}
		reports
	}
}

async fn probe_one(client: &reqwest::Client, route_path: &str, origin: Origin, url: &str) -> HealthReport {
	let started = std::time::Instant::now();
	match client.get(url).send().await {
		Ok(response) => {
			let status = response.status().as_u16();
			let body_signature = response.headers().get(reqwest::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(|s| s.to_string());
			HealthReport {
				route_path: route_path.to_string(),
				origin,
				status_code: status,
				latency_ms: started.elapsed().as_millis() as u64,
				severity: Severity::classify(status),
				body_signature,
				probed_at: Utc::now(),
			}
		},
		Err(_) => HealthReport {
			route_path: route_path.to_string(),
			origin,
			status_code: 0,
			latency_ms: started.elapsed().as_millis() as u64,
			severity: Severity::classify(0),
			body_signature: None,
			probed_at: Utc::now(),
		},
	}
}

/// Tracks consecutive-error streaks per route path, driving both probe backoff and the
/// 3-strikes escalation to the healing engine.
#[derive(Default)]
pub struct StreakTracker {
	streaks: std::collections::HashMap<String, RouteStreak>,
}

impl StreakTracker {
	/// Records `report`, returning `true` if this report is the third consecutive `err` for its
	/// route (the escalation trigger). A route probed on both origins should be recorded once per
	/// scan tick via [`Self::record_tick`], not once per report — calling this directly for each
	/// of a route's local and external reports would advance the streak twice in one tick.
	pub fn record(&mut self, report: &HealthReport) -> bool {
		self.record_tick(&report.route_path, report.severity)
	}

	/// Records one combined severity for `route_path` for the current scan tick, returning `true`
	/// if this is the third consecutive `err` tick (the escalation trigger).
	pub fn record_tick(&mut self, route_path: &str, severity: Severity) -> bool {
		let streak = self.streaks.entry(route_path.to_string()).or_default();
		if severity == Severity::Err {
			streak.consecutive_errs += 1;
		} else {
			streak.consecutive_errs = 0;
		}
		streak.consecutive_errs >= 3
	}

	pub fn streak_for(&self, route_path: &str) -> RouteStreak {
		self.streaks.get(route_path).copied().unwrap_or_default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn report(path: &str, severity: Severity) -> HealthReport {
		HealthReport { route_path: path.to_string(), origin: Origin::Local, status_code: 0, latency_ms: 0, severity, body_signature: None, probed_at: Utc::now() }
	}

	#[test]
	fn escalates_on_third_consecutive_error() {
		let mut tracker = StreakTracker::default();
		assert!(!tracker.record(&report("/api/", Severity::Err)));
		assert!(!tracker.record(&report("/api/", Severity::Err)));
		assert!(tracker.record(&report("/api/", Severity::Err)));
	}

	#[test]
	fn streak_resets_on_recovery() {
		let mut tracker = StreakTracker::default();
		tracker.record(&report("/api/", Severity::Err));
		tracker.record(&report("/api/", Severity::Err));
		tracker.record(&report("/api/", Severity::Ok));
		assert_eq!(tracker.streak_for("/api/").consecutive_errs, 0);
	}

	#[test]
	fn period_doubles_on_err_streak() {
		let scanner = HealthScanner::new(8, Duration::from_secs(30)).unwrap();
		assert_eq!(scanner.period_for(RouteStreak { consecutive_errs: 0 }), Duration::from_secs(30));
		assert_eq!(scanner.period_for(RouteStreak { consecutive_errs: 1 }), Duration::from_secs(60));
	}
}
