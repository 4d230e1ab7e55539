//! C9 — Site Auditor Adapter.
//!
//! Adapter for a headless-browser probe, injectable exactly like C4's `DataplaneBackend`: a
//! `ProcessAuditor` that shells out to a configured headless-browser command, and a
//! `NullAuditor` for tests and environments without one.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
	pub url: String,
	pub timeout_ms: u64,
	pub wait_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFindings {
	pub console_errors: Vec<String>,
	pub network_failures: Vec<String>,
	pub http_issues: Vec<String>,
	pub summary: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
	#[error("auditor process failed to start: {0}")]
	Spawn(String),
	#[error("auditor process produced unparseable output: {0}")]
	Decode(String),
	#[error("auditor probe timed out after {0:?}")]
	Timeout(Duration),
}

/// Default hard timeout; tripled on emulated architectures per SPEC_FULL.md §4.9.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const EMULATED_TIMEOUT_MULTIPLIER: u32 = 3;

#[async_trait]
pub trait AuditorBackend: Send + Sync {
	async fn audit(&self, request: AuditRequest) -> Result<AuditFindings, AuditError>;
}

/// Shells out to a configured headless-browser command, passing the request as a JSON arg and
/// parsing its stdout as [`AuditFindings`]. Falling back to local mode is the caller's
/// responsibility (construction-time choice of command), not this adapter's.
pub struct ProcessAuditor {
	pub command: String,
}

#[async_trait]
impl AuditorBackend for ProcessAuditor {
	async fn audit(&self, request: AuditRequest) -> Result<AuditFindings, AuditError> {
		let payload = serde_json::to_string(&request).expect("audit request always serializes");
		let timeout = Duration::from_millis(request.timeout_ms);

		let run = async {
			let output = Command::new("sh")
				.arg("-c")
				.arg(&self.command)
				.arg("--")
				.arg(&payload)
				.output()
				.await
				.map_err(|e| AuditError::Spawn(e.to_string()))?;
			serde_json::from_slice::<AuditFindings>(&output.stdout).map_err(|e| AuditError::Decode(e.to_string()))
		};

		tokio::time::timeout(timeout, run).await.map_err(|_| AuditError::Timeout(timeout))?
	}
}

/// Synthesizes an empty-findings result after `wait_ms`, for tests and environments without a
/// headless-browser command configured.
pub struct NullAuditor;

#[async_trait]
impl AuditorBackend for NullAuditor {
	async fn audit(&self, request: AuditRequest) -> Result<AuditFindings, AuditError> {
		tokio::time::sleep(Duration::from_millis(request.wait_ms)).await;
		Ok(AuditFindings { summary: "no auditor configured".to_string(), ..Default::default() })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn null_auditor_waits_then_returns_empty_findings() {
		let started = std::time::Instant::now();
		let findings = NullAuditor.audit(AuditRequest { url: "http://example.test".to_string(), timeout_ms: 30_000, wait_ms: 10 }).await.unwrap();
		assert!(started.elapsed() >= Duration::from_millis(10));
		assert!(findings.console_errors.is_empty());
	}
}
