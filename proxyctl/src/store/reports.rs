//! Persists the latest-per-route health report as a single JSON artifact (`state/reports-latest.json`)
//! for the dashboard, using the same atomic write-temp-then-rename discipline as the resolution
//! store.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::HealthReport;

#[derive(Debug, thiserror::Error)]
pub enum ReportStoreError {
	#[error("failed to read report store at {path}: {source}")]
	Read { path: PathBuf, #[source] source: std::io::Error },
	#[error("failed to write report store at {path}: {source}")]
	Write { path: PathBuf, #[source] source: std::io::Error },
	#[error("corrupt report store at {path}: {source}")]
	Decode { path: PathBuf, #[source] source: serde_json::Error },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePair {
	pub local: Option<HealthReport>,
	pub external: Option<HealthReport>,
}

/// Latest-per-route health snapshot, keyed by route path.
pub struct ReportStore {
	path: PathBuf,
	latest: BTreeMap<String, RoutePair>,
}

impl ReportStore {
	pub fn load(path: impl Into<PathBuf>) -> Result<Self, ReportStoreError> {
		let path = path.into();
		let latest = match fs_err::read_to_string(&path) {
			Ok(contents) => {
				serde_json::from_str(&contents).map_err(|source| ReportStoreError::Decode { path: path.clone(), source })?
			},
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
			Err(source) => return Err(ReportStoreError::Read { path, source }),
		};
		Ok(Self { path, latest })
	}

	/// Records `report` as the latest reading for its route and origin, persisting immediately.
	pub fn record(&mut self, report: HealthReport) -> Result<(), ReportStoreError> {
		use crate::types::Origin;
		let entry = self.latest.entry(report.route_path.clone()).or_default();
		match report.origin {
			Origin::Local => entry.local = Some(report),
			Origin::External => entry.external = Some(report),
		}
		self.flush()
	}

	pub fn get(&self, route_path: &str) -> Option<&RoutePair> {
		self.latest.get(route_path)
	}

	pub fn all(&self) -> &BTreeMap<String, RoutePair> {
		&self.latest
	}

	fn flush(&self) -> Result<(), ReportStoreError> {
		let json = serde_json::to_string_pretty(&self.latest).expect("report pairs always serialize");
		if let Some(parent) = self.path.parent() {
			fs_err::create_dir_all(parent).map_err(|source| ReportStoreError::Write { path: self.path.clone(), source })?;
		}
		let tmp = self.path.with_extension("json.tmp");
		fs_err::write(&tmp, json.as_bytes()).map_err(|source| ReportStoreError::Write { path: self.path.clone(), source })?;
		fs_err::rename(&tmp, &self.path).map_err(|source| ReportStoreError::Write { path: self.path.clone(), source })?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use chrono::Utc;

	use super::*;
	use crate::types::{Origin, Severity};

	fn report(path: &str, origin: Origin, code: u16) -> HealthReport {
		HealthReport { route_path: path.to_string(), origin, status_code: code, latency_ms: 5, severity: Severity::classify(code), body_signature: None, probed_at: Utc::now() }
	}

	#[test]
	fn records_local_and_external_independently() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("reports-latest.json");
		let mut store = ReportStore::load(&path).unwrap();
		store.record(report("/api/", Origin::Local, 200)).unwrap();
		store.record(report("/api/", Origin::External, 502)).unwrap();

		let pair = store.get("/api/").unwrap();
		assert_eq!(pair.local.as_ref().unwrap().status_code, 200);
		assert_eq!(pair.external.as_ref().unwrap().status_code, 502);
	}

	#[test]
	fn persists_across_reload() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("reports-latest.json");
		let mut store = ReportStore::load(&path).unwrap();
		store.record(report("/api/", Origin::Local, 200)).unwrap();

		let reloaded = ReportStore::load(&path).unwrap();
		assert!(reloaded.get("/api/").is_some());
	}
}
