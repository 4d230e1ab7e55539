//! Loads a directory of snippet files into parsed [`Snippet`]s, in the lexicographic file-name
//! order the composer (C2) depends on for deterministic first-wins resolution.

use std::path::{Path, PathBuf};

use crate::snippet::parse_snippet;
use crate::types::Snippet;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
	#[error("failed to read snippet directory {path}: {source}")]
	Dir { path: PathBuf, #[source] source: std::io::Error },
	#[error("failed to read snippet file {path}: {source}")]
	File { path: PathBuf, #[source] source: std::io::Error },
}

/// Reads every regular file directly under `dir`, parsing each as a snippet. The app name is
/// taken from the file stem. Returns an empty vector if `dir` does not exist yet — a fresh
/// working directory with no snippets is a valid, if uninteresting, starting state.
pub fn load_dir(dir: &Path) -> Result<Vec<Snippet>, LoadError> {
	let entries = match fs_err::read_dir(dir) {
		Ok(entries) => entries,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
		Err(source) => return Err(LoadError::Dir { path: dir.to_path_buf(), source }),
	};

	let mut paths: Vec<PathBuf> = Vec::new();
	for entry in entries {
		let entry = entry.map_err(|source| LoadError::Dir { path: dir.to_path_buf(), source })?;
		let path = entry.path();
		if path.is_file() {
			paths.push(path);
		}
	}
	paths.sort();

	let mut snippets = Vec::with_capacity(paths.len());
	for path in paths {
		let contents = fs_err::read_to_string(&path).map_err(|source| LoadError::File { path: path.clone(), source })?;
		let app_name = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| path.display().to_string());
		snippets.push(parse_snippet(&app_name, &path.display().to_string(), &contents));
	}
	Ok(snippets)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn loads_files_in_lexicographic_order() {
		let dir = tempfile::tempdir().unwrap();
		fs_err::write(dir.path().join("b.conf"), "location /b/ { proxy_pass svcB:1; }").unwrap();
		fs_err::write(dir.path().join("a.conf"), "location /a/ { proxy_pass svcA:1; }").unwrap();

		let snippets = load_dir(dir.path()).unwrap();
		assert_eq!(snippets.len(), 2);
		assert_eq!(snippets[0].app_name, "a");
		assert_eq!(snippets[1].app_name, "b");
	}

	#[test]
	fn missing_directory_yields_empty_vec() {
		let dir = tempfile::tempdir().unwrap();
		let snippets = load_dir(&dir.path().join("nope")).unwrap();
		assert!(snippets.is_empty());
	}
}
