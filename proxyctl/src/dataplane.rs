//! C4 — Dataplane Adapter.
//!
//! Transforms a [`ComposedArtifact`] into the dataplane's on-disk format, stages it, asks the
//! injected [`DataplaneBackend`] to validate and reload, and only then promotes the staged
//! generation to `live`. The adapter never shells out directly — validation and reload are an
//! injected trait object, matching the teacher's pattern of injectable `ConfigDumpHandler` /
//! `AdminFallback` collaborators in `management/admin.rs`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::types::{ComposedArtifact, Upstream, UpstreamTarget};

#[derive(Debug, thiserror::Error)]
pub enum DataplaneError {
	#[error("failed to write artifact to {path}: {source}")]
	Write { path: PathBuf, #[source] source: std::io::Error },
	#[error("dataplane rejected generation {generation}: {diagnostic}")]
	ValidationFailed { generation: u64, diagnostic: String },
	#[error("dataplane accepted validation but reload failed for generation {generation}: {diagnostic}")]
	ReloadFailed { generation: u64, diagnostic: String },
}

/// The validate/reload collaborator. Swapping dataplane processes is a construction-time
/// decision: pick the implementation, not a code change to the adapter.
#[async_trait]
pub trait DataplaneBackend: Send + Sync {
	/// Asks the dataplane to validate the artifact staged at `staging_path`. `Ok(())` means the
	/// artifact is syntactically and semantically acceptable; `Err` carries the diagnostic.
	async fn validate(&self, staging_path: &Path) -> Result<(), String>;

	/// Tells the dataplane to reload from `active_path`, which has just been renamed into place.
	async fn reload(&self, active_path: &Path) -> Result<(), String>;
}

/// Drives a real dataplane process via configurable shell commands. `{path}` in either command
/// template is substituted with the artifact path being validated or reloaded.
pub struct ShellDataplane {
	pub validate_command: String,
	pub reload_command: String,
}

#[async_trait]
impl DataplaneBackend for ShellDataplane {
	async fn validate(&self, staging_path: &Path) -> Result<(), String> {
		run_shell(&self.validate_command, staging_path).await
	}

	async fn reload(&self, active_path: &Path) -> Result<(), String> {
		run_shell(&self.reload_command, active_path).await
	}
}

async fn run_shell(template: &str, path: &Path) -> Result<(), String> {
	let command_line = template.replace("{path}", &path.display().to_string());
	let output = Command::new("sh")
		.arg("-c")
		.arg(&command_line)
		.stdin(Stdio::null())
		.output()
		.await
		.map_err(|e| format!("failed to spawn `{command_line}`: {e}"))?;
	if output.status.success() {
		Ok(())
	} else {
		Err(format!("`{command_line}` exited with {}: {}", output.status, String::from_utf8_lossy(&output.stderr)))
	}
}

/// Always accepts and immediately reports ready. Used by tests and by environments without a
/// managed dataplane process.
pub struct NullDataplane;

#[async_trait]
impl DataplaneBackend for NullDataplane {
	async fn validate(&self, _staging_path: &Path) -> Result<(), String> {
		Ok(())
	}

	async fn reload(&self, _active_path: &Path) -> Result<(), String> {
		Ok(())
	}
}

/// Layout under the working directory, matching SPEC_FULL.md §6's persisted state layout.
pub struct DataplanePaths {
	pub active: PathBuf,
	pub staging: PathBuf,
}

impl DataplanePaths {
	pub fn under(build_dir: &Path) -> Self {
		Self { active: build_dir.join("composed.active"), staging: build_dir.join("composed.staging") }
	}

	fn rejected_path(&self, generation: u64) -> PathBuf {
		self.active.with_file_name(format!("composed.rejected-{generation}"))
	}
}

/// Renders, stages, validates, and (on success) promotes `artifact`. On validation or reload
/// failure the prior `active` file is left untouched and the failed artifact is preserved under
/// a `.rejected-<generation>` name alongside the diagnostic.
pub async fn commit(backend: &dyn DataplaneBackend, paths: &DataplanePaths, artifact: &ComposedArtifact) -> Result<(), DataplaneError> {
	let rendered = render(artifact);

	if let Some(parent) = paths.staging.parent() {
		fs_err::create_dir_all(parent).map_err(|source| DataplaneError::Write { path: paths.staging.clone(), source })?;
	}
	fs_err::write(&paths.staging, rendered.as_bytes()).map_err(|source| DataplaneError::Write { path: paths.staging.clone(), source })?;

	if let Err(diagnostic) = backend.validate(&paths.staging).await {
		let rejected = paths.rejected_path(artifact.generation);
		let _ = fs_err::write(&rejected, format!("# rejected: {diagnostic}\n{rendered}").as_bytes());
		return Err(DataplaneError::ValidationFailed { generation: artifact.generation, diagnostic });
	}

	fs_err::rename(&paths.staging, &paths.active).map_err(|source| DataplaneError::Write { path: paths.active.clone(), source })?;

	if let Err(diagnostic) = backend.reload(&paths.active).await {
		return Err(DataplaneError::ReloadFailed { generation: artifact.generation, diagnostic });
	}

	Ok(())
}

/// Renders a composed artifact into the dataplane's on-disk text format: a header comment with
/// generation and hash, one variable-declaration block per distinct upstream, one routing block
/// per resolved route (already sorted by the composer's longest-match rule).
pub fn render(artifact: &ComposedArtifact) -> String {
	let mut out = String::new();
	out.push_str(&format!("# generation={} hash={}\n\n", artifact.generation, artifact.content_hash));

	for upstream in &artifact.upstreams {
		out.push_str(&render_upstream(upstream));
		out.push('\n');
	}

	for route in &artifact.routes {
		out.push_str(&render_route_block(route));
		out.push('\n');
	}

	out
}

/// Renders a single route as one `location`-style block. Shared with the healing engine (C8),
/// which writes a mutated route out as a standalone override snippet.
pub fn render_route_block(route: &crate::types::Route) -> String {
	let mut out = String::new();
	let header = match route.match_kind {
		crate::types::MatchKind::Exact => format!("location = {} {{", route.path),
		crate::types::MatchKind::Prefix => format!("location {} {{", route.path),
		crate::types::MatchKind::Regex => format!("location ~ {} {{", route.path),
	};
	out.push_str(&header);
	out.push('\n');
	out.push_str(&format!("\tproxy_pass {};\n", target_ref(&route.upstream_target)));
	if route.flags.strip_prefix {
		out.push_str("\tstrip_prefix;\n");
	}
	if route.flags.websocket {
		out.push_str("\twebsocket;\n");
	}
	if route.flags.forwarded_prefix {
		out.push_str("\tforwarded_prefix;\n");
	}
	out.push_str(&format!("\thttps_redirect_policy {};\n", https_policy_str(route.flags.https_redirect_policy)));
	for directive in &route.opaque_directives {
		out.push('\t');
		out.push_str(directive);
		out.push('\n');
	}
	out.push_str("}\n");
	out
}

fn target_ref(target: &UpstreamTarget) -> String {
	match target {
		UpstreamTarget::Literal { host, port } => format!("${}", crate::types::upstream_symbol(host, *port)),
		UpstreamTarget::Symbol { name } => format!("${name}"),
	}
}

fn render_upstream(upstream: &Upstream) -> String {
	format!(
		"upstream ${} {{\n\thost {};\n\tport {};\n{}}}\n",
		upstream.symbol,
		upstream.host,
		upstream.port,
		upstream.resolver_hint.as_ref().map(|h| format!("\tresolver_hint {h};\n")).unwrap_or_default()
	)
}

fn https_policy_str(policy: crate::types::HttpsRedirectPolicy) -> &'static str {
	match policy {
		crate::types::HttpsRedirectPolicy::Preserve => "preserve",
		crate::types::HttpsRedirectPolicy::ForceHttps => "force-https",
		crate::types::HttpsRedirectPolicy::Relative => "relative",
	}
}

#[cfg(test)]
mod tests {
	use chrono::Utc;

	use super::*;
	use crate::types::{MatchKind, RouteFlags};

	fn sample_artifact() -> ComposedArtifact {
		ComposedArtifact {
			generation: 7,
			content_hash: "deadbeef".to_string(),
			routes: vec![crate::types::Route {
				path: "/api/".to_string(),
				match_kind: MatchKind::Prefix,
				upstream_target: UpstreamTarget::Literal { host: "svcA".to_string(), port: 8000 },
				flags: RouteFlags { strip_prefix: true, ..Default::default() },
				source_file: "a.conf".to_string(),
				line_span: (1, 4),
				opaque_directives: Vec::new(),
			}],
			upstreams: vec![Upstream { symbol: crate::types::upstream_symbol("svcA", 8000), host: "svcA".to_string(), port: 8000, resolver_hint: None }],
			conflicts: Vec::new(),
			warnings: Vec::new(),
			produced_at: Utc::now(),
		}
	}

	#[tokio::test]
	async fn null_dataplane_accepts_and_commits() {
		let dir = tempfile::tempdir().unwrap();
		let paths = DataplanePaths::under(dir.path());
		let artifact = sample_artifact();
		commit(&NullDataplane, &paths, &artifact).await.unwrap();
		assert!(paths.active.exists());
		assert!(!paths.staging.exists());
	}

	struct AlwaysReject;

	#[async_trait]
	impl DataplaneBackend for AlwaysReject {
		async fn validate(&self, _staging_path: &Path) -> Result<(), String> {
			Err("bad syntax".to_string())
		}
		async fn reload(&self, _active_path: &Path) -> Result<(), String> {
			Ok(())
		}
	}

	#[tokio::test]
	async fn rejected_validation_preserves_prior_active_and_writes_rejected_file() {
		let dir = tempfile::tempdir().unwrap();
		let paths = DataplanePaths::under(dir.path());
		fs_err::write(&paths.active, "# prior\n").unwrap();

		let artifact = sample_artifact();
		let err = commit(&AlwaysReject, &paths, &artifact).await.unwrap_err();
		assert!(matches!(err, DataplaneError::ValidationFailed { generation: 7, .. }));
		assert_eq!(fs_err::read_to_string(&paths.active).unwrap(), "# prior\n");
		assert!(paths.rejected_path(7).exists());
	}

	#[test]
	fn render_includes_flags_and_upstream_block() {
		let rendered = render(&sample_artifact());
		assert!(rendered.contains("generation=7"));
		assert!(rendered.contains("strip_prefix;"));
		assert!(rendered.contains("upstream $"));
	}
}
