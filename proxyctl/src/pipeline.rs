//! The commit pipeline: the single serialized path by which a mutation reaches the live
//! registry. Every mutating Control API endpoint and every healing mutation funnels through
//! here. At most one write→compose→validate→reload may run at a time; concurrent callers queue
//! FIFO behind a `tokio::sync::Mutex`, matching SPEC_FULL.md §5's ordering guarantee.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::compose::compose;
use crate::dataplane::{self, DataplaneBackend, DataplanePaths};
use crate::store::registry::RouteRegistry;
use crate::store::resolutions::ResolutionStore;
use crate::store::snippets;
use crate::types::ComposedArtifact;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
	#[error("failed to write snippet {path}: {source}")]
	SnippetWrite { path: PathBuf, #[source] source: std::io::Error },
	#[error(transparent)]
	Load(#[from] snippets::LoadError),
	#[error(transparent)]
	Dataplane(#[from] dataplane::DataplaneError),
}

pub struct Pipeline {
	snippets_dir: PathBuf,
	overrides_dir: PathBuf,
	dataplane_paths: DataplanePaths,
	backend: Box<dyn DataplaneBackend>,
	resolutions: tokio::sync::Mutex<ResolutionStore>,
	registry: RouteRegistry,
	next_generation: std::sync::atomic::AtomicU64,
	serialize: tokio::sync::Mutex<()>,
}

impl Pipeline {
	pub fn new(snippets_dir: PathBuf, overrides_dir: PathBuf, build_dir: &Path, backend: Box<dyn DataplaneBackend>, resolutions: ResolutionStore, registry: RouteRegistry) -> Self {
		let next_generation = registry.generation() + 1;
		Self {
			snippets_dir,
			overrides_dir,
			dataplane_paths: DataplanePaths::under(build_dir),
			backend,
			resolutions: tokio::sync::Mutex::new(resolutions),
			registry,
			next_generation: std::sync::atomic::AtomicU64::new(next_generation),
			serialize: tokio::sync::Mutex::new(()),
		}
	}

	pub fn registry(&self) -> &RouteRegistry {
		&self.registry
	}

	/// Re-reads both snippet directories from disk, composes against the current resolution
	/// store, commits through the dataplane, and — only on success — publishes the result to
	/// the registry. Returns the composed artifact either way so callers can surface warnings
	/// even when a prior generation remains live.
	pub async fn recompose_and_commit(&self) -> Result<ComposedArtifact, PipelineError> {
		let _serialized = self.serialize.lock().await;
		self.recompose_and_commit_locked().await
	}

	async fn recompose_and_commit_locked(&self) -> Result<ComposedArtifact, PipelineError> {
		let snips = snippets::load_dir(&self.snippets_dir)?;
		let overrides = snippets::load_dir(&self.overrides_dir)?;
		let resolutions = self.resolutions.lock().await.get_all();

		let generation = self.next_generation.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
		let artifact = compose(generation, &snips, &overrides, &resolutions);

		dataplane::commit(self.backend.as_ref(), &self.dataplane_paths, &artifact).await?;

		{
			let mut store = self.resolutions.lock().await;
			let _ = store.prune_stale(&artifact);
		}

		self.registry.publish(artifact.clone());
		Ok(artifact)
	}

	/// Atomically writes `contents` to `file_name` under the snippet directory, then recomposes.
	/// On any pipeline failure the write is rolled back (the previous contents, or absence, is
	/// restored) and the error is returned with the prior live generation untouched.
	pub async fn install_snippet(&self, file_name: &str, contents: &str) -> Result<ComposedArtifact, PipelineError> {
		self.write_then_commit(&self.snippets_dir, file_name, contents).await
	}

	/// As [`Self::install_snippet`], but into the override directory — used both by the
	/// conflict-resolution API and by the healing engine's mutations.
	pub async fn install_override(&self, file_name: &str, contents: &str) -> Result<ComposedArtifact, PipelineError> {
		self.write_then_commit(&self.overrides_dir, file_name, contents).await
	}

	async fn write_then_commit(&self, dir: &Path, file_name: &str, contents: &str) -> Result<ComposedArtifact, PipelineError> {
		let _serialized = self.serialize.lock().await;
		let path = dir.join(file_name);
		let previous = fs_err::read_to_string(&path).ok();

		write_atomic(&path, contents).map_err(|source| PipelineError::SnippetWrite { path: path.clone(), source })?;

		match self.recompose_and_commit_locked().await {
			Ok(artifact) => Ok(artifact),
			Err(e) => {
				match previous {
					Some(prior) => {
						let _ = write_atomic(&path, &prior);
					},
					None => {
						let _ = fs_err::remove_file(&path);
					},
				}
				Err(e)
			},
		}
	}

	pub async fn set_resolution(&self, path: &str, match_kind: crate::types::MatchKind, winner_file: &str, strategy: crate::types::ResolutionStrategy) -> Result<(), crate::store::resolutions::StoreError> {
		self.resolutions.lock().await.set(path, match_kind, winner_file, strategy)
	}

	pub async fn resolutions(&self) -> Vec<crate::types::Resolution> {
		self.resolutions.lock().await.get_all()
	}
}

fn write_atomic(path: &Path, contents: &str) -> Result<(), std::io::Error> {
	if let Some(parent) = path.parent() {
		fs_err::create_dir_all(parent)?;
	}
	let tmp = path.with_extension("tmp");
	fs_err::write(&tmp, contents.as_bytes())?;
	fs_err::rename(&tmp, path)
}

/// Adapts a [`Pipeline`] to the healing engine's [`crate::heal::RecomposeAndReload`] trait so
/// the engine can trigger a reload without knowing the pipeline's concrete type.
pub struct PipelineRecompose(pub Arc<Pipeline>);

#[async_trait]
impl crate::heal::RecomposeAndReload for PipelineRecompose {
	async fn run(&self) -> Result<String, String> {
		self.0.recompose_and_commit().await.map(|a| a.content_hash).map_err(|e| e.to_string())
	}
}

#[cfg(test)]
mod tests {
	use chrono::Utc;

	use super::*;
	use crate::dataplane::NullDataplane;
	use crate::types::ComposedArtifact;

	fn empty_artifact() -> ComposedArtifact {
		ComposedArtifact { generation: 0, content_hash: "h".to_string(), routes: Vec::new(), upstreams: Vec::new(), conflicts: Vec::new(), warnings: Vec::new(), produced_at: Utc::now() }
	}

	fn pipeline_in(dir: &tempfile::TempDir) -> Pipeline {
		let snippets_dir = dir.path().join("snippets");
		let overrides_dir = dir.path().join("overrides");
		let build_dir = dir.path().join("build");
		let resolutions = ResolutionStore::load(dir.path().join("state/resolutions.json")).unwrap();
		Pipeline::new(snippets_dir, overrides_dir, &build_dir, Box::new(NullDataplane), resolutions, RouteRegistry::new(empty_artifact()))
	}

	#[tokio::test]
	async fn install_snippet_commits_and_publishes() {
		let dir = tempfile::tempdir().unwrap();
		let pipeline = pipeline_in(&dir);
		let artifact = pipeline.install_snippet("a.conf", "location /api/ { proxy_pass svcA:8000; }").await.unwrap();
		assert_eq!(artifact.routes.len(), 1);
		assert_eq!(pipeline.registry().routes().len(), 1);
	}

	#[tokio::test]
	async fn rollback_removes_file_when_it_did_not_exist_before() {
		struct AlwaysReject;
		#[async_trait]
		impl DataplaneBackend for AlwaysReject {
			async fn validate(&self, _: &Path) -> Result<(), String> {
				Err("nope".to_string())
			}
			async fn reload(&self, _: &Path) -> Result<(), String> {
				Ok(())
			}
		}

		let dir = tempfile::tempdir().unwrap();
		let snippets_dir = dir.path().join("snippets");
		let overrides_dir = dir.path().join("overrides");
		let build_dir = dir.path().join("build");
		let resolutions = ResolutionStore::load(dir.path().join("state/resolutions.json")).unwrap();
		let pipeline = Pipeline::new(snippets_dir.clone(), overrides_dir, &build_dir, Box::new(AlwaysReject), resolutions, RouteRegistry::new(empty_artifact()));

		let err = pipeline.install_snippet("a.conf", "location /api/ { proxy_pass svcA:8000; }").await;
		assert!(err.is_err());
		assert!(!snippets_dir.join("a.conf").exists());
	}
}
