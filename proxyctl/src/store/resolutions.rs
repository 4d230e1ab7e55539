//! C3 — Resolution Store.
//!
//! A persistent key-value store over `(path, match_kind)`, backed by a single JSON file under
//! the working directory's `state/` subdirectory. Writes are atomic: write to a temp file in
//! the same directory, then rename over the target, so a crash mid-write never corrupts the
//! previous state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{ComposedArtifact, MatchKind, Resolution, ResolutionStrategy};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("failed to read resolution store at {path}: {source}")]
	Read { path: PathBuf, #[source] source: std::io::Error },
	#[error("failed to write resolution store at {path}: {source}")]
	Write { path: PathBuf, #[source] source: std::io::Error },
	#[error("corrupt resolution store at {path}: {source}")]
	Decode { path: PathBuf, #[source] source: serde_json::Error },
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OnDiskEntry {
	winner_file: String,
	strategy: ResolutionStrategy,
	resolved_at: chrono::DateTime<Utc>,
	#[serde(default)]
	stale: bool,
}

/// The resolution store. Holds its entire contents in memory and mirrors every mutation to
/// disk before returning, matching the teacher's atomic-write discipline used elsewhere for
/// config snapshots.
pub struct ResolutionStore {
	path: PathBuf,
	entries: BTreeMap<String, OnDiskEntry>,
}

fn key_string(path: &str, match_kind: MatchKind) -> String {
	format!("{path}|{match_kind}")
}

impl ResolutionStore {
	/// Loads the store from `path`, which need not exist yet — an absent file is an empty store.
	pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();
		let entries = match fs_err::read_to_string(&path) {
			Ok(contents) => {
				serde_json::from_str(&contents).map_err(|source| StoreError::Decode { path: path.clone(), source })?
			},
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
			Err(source) => return Err(StoreError::Read { path, source }),
		};
		Ok(Self { path, entries })
	}

	pub fn get_all(&self) -> Vec<Resolution> {
		self
			.entries
			.iter()
			.filter_map(|(key, entry)| {
				let (path, kind) = key.rsplit_once('|')?;
				let match_kind = match kind {
					"exact" => MatchKind::Exact,
					"prefix" => MatchKind::Prefix,
					"regex" => MatchKind::Regex,
					_ => return None,
				};
				Some(Resolution {
					path: path.to_string(),
					match_kind,
					winner_file: entry.winner_file.clone(),
					strategy: entry.strategy,
					resolved_at: entry.resolved_at,
					stale: entry.stale,
				})
			})
			.collect()
	}

	/// Records `winner_file` as the chosen candidate for `(path, match_kind)`, persisting
	/// immediately.
	pub fn set(&mut self, path: &str, match_kind: MatchKind, winner_file: &str, strategy: ResolutionStrategy) -> Result<(), StoreError> {
		self.entries.insert(
			key_string(path, match_kind),
			OnDiskEntry { winner_file: winner_file.to_string(), strategy, resolved_at: Utc::now(), stale: false },
		);
		self.flush()
	}

	/// Removes any resolution for `(path, match_kind)` outright.
	pub fn clear(&mut self, path: &str, match_kind: MatchKind) -> Result<(), StoreError> {
		self.entries.remove(&key_string(path, match_kind));
		self.flush()
	}

	/// Marks resolutions stale when their winner file no longer appears among `artifact`'s
	/// routes' source files. Does not delete — deletion is explicit via [`Self::clear`].
	pub fn prune_stale(&mut self, artifact: &ComposedArtifact) -> Result<usize, StoreError> {
		let live_files: std::collections::HashSet<&str> = artifact.routes.iter().map(|r| r.source_file.as_str()).collect();
		let mut marked = 0;
		for entry in self.entries.values_mut() {
			if !entry.stale && !live_files.contains(entry.winner_file.as_str()) {
				entry.stale = true;
				marked += 1;
			}
		}
		if marked > 0 {
			self.flush()?;
		}
		Ok(marked)
	}

	fn flush(&self) -> Result<(), StoreError> {
		write_atomic(&self.path, &self.entries)
	}
}

fn write_atomic(path: &Path, entries: &BTreeMap<String, OnDiskEntry>) -> Result<(), StoreError> {
	let json = serde_json::to_string_pretty(entries).expect("resolution entries always serialize");
	if let Some(parent) = path.parent() {
		fs_err::create_dir_all(parent).map_err(|source| StoreError::Write { path: path.to_path_buf(), source })?;
	}
	let tmp = path.with_extension("json.tmp");
	fs_err::write(&tmp, json.as_bytes()).map_err(|source| StoreError::Write { path: path.to_path_buf(), source })?;
	fs_err::rename(&tmp, path).map_err(|source| StoreError::Write { path: path.to_path_buf(), source })?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn roundtrips_through_disk() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("resolutions.json");
		let mut store = ResolutionStore::load(&path).unwrap();
		store.set("/api/", MatchKind::Prefix, "ops.conf", ResolutionStrategy::Manual).unwrap();

		let reloaded = ResolutionStore::load(&path).unwrap();
		let all = reloaded.get_all();
		assert_eq!(all.len(), 1);
		assert_eq!(all[0].winner_file, "ops.conf");
		assert_eq!(all[0].strategy, ResolutionStrategy::Manual);
	}

	#[test]
	fn missing_file_loads_as_empty() {
		let dir = tempfile::tempdir().unwrap();
		let store = ResolutionStore::load(dir.path().join("missing.json")).unwrap();
		assert!(store.get_all().is_empty());
	}

	#[test]
	fn prune_stale_marks_without_deleting() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("resolutions.json");
		let mut store = ResolutionStore::load(&path).unwrap();
		store.set("/api/", MatchKind::Prefix, "gone.conf", ResolutionStrategy::Manual).unwrap();

		let artifact = ComposedArtifact {
			generation: 1,
			content_hash: "h".to_string(),
			routes: Vec::new(),
			upstreams: Vec::new(),
			conflicts: Vec::new(),
			warnings: Vec::new(),
			produced_at: Utc::now(),
		};
		let marked = store.prune_stale(&artifact).unwrap();
		assert_eq!(marked, 1);
		assert!(store.get_all()[0].stale);
	}

	#[test]
	fn clear_removes_entry() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("resolutions.json");
		let mut store = ResolutionStore::load(&path).unwrap();
		store.set("/api/", MatchKind::Prefix, "ops.conf", ResolutionStrategy::Manual).unwrap();
		store.clear("/api/", MatchKind::Prefix).unwrap();
		assert!(store.get_all().is_empty());
	}
}
