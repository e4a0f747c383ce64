//! Workspace and session identity utilities.
//!
//! Session names are scoped by workspace: the same name in two workspaces
//! refers to two different daemons.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::error::Result;

pub const DEFAULT_SESSION: &str = "default";

/// Canonical identity for a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceScope {
	root: PathBuf,
	hash: String,
}

impl WorkspaceScope {
	/// Resolves the workspace root from `--workspace`, falling back to the
	/// current directory. Relative paths are taken from the current directory.
	pub fn resolve(workspace: Option<&Path>) -> Result<Self> {
		let cwd = std::env::current_dir()?;
		let root = match workspace {
			Some(path) if path.is_absolute() => path.to_path_buf(),
			Some(path) => cwd.join(path),
			None => cwd,
		};
		Ok(Self::from_root(root))
	}

	pub fn from_root(root: PathBuf) -> Self {
		let root = canonicalize_or_self(root);
		let hash = hash_hex(root.to_string_lossy().as_ref());
		Self { root, hash }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Stable 16-hex-digit hash of the canonical root.
	pub fn hash(&self) -> &str {
		&self.hash
	}

	/// Registry key for sessions of this workspace.
	pub fn key(&self) -> String {
		self.root.to_string_lossy().into_owned()
	}
}

/// Restricts a session name to characters safe in file and pipe names.
pub fn normalize_session(name: &str) -> String {
	let mut out = String::with_capacity(name.len());
	for c in name.chars() {
		if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
			out.push(c);
		} else {
			out.push('-');
		}
	}
	let trimmed = out.trim_matches(|c| c == '-' || c == '.');
	if trimmed.is_empty() {
		DEFAULT_SESSION.to_string()
	} else {
		trimmed.to_string()
	}
}

fn canonicalize_or_self(path: PathBuf) -> PathBuf {
	path.canonicalize().unwrap_or(path)
}

fn hash_hex(input: &str) -> String {
	let mut hasher = DefaultHasher::new();
	input.hash(&mut hasher);
	format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
	use tempfile::tempdir;

	use super::*;

	#[test]
	fn normalize_session_sanitizes_invalid_chars() {
		assert_eq!(normalize_session("prod/team A"), "prod-team-A");
		assert_eq!(normalize_session("v1.2_beta"), "v1.2_beta");
	}

	#[test]
	fn normalize_session_rejects_path_traversal() {
		assert_eq!(normalize_session("../etc"), "etc");
		assert_eq!(normalize_session(".."), DEFAULT_SESSION);
	}

	#[test]
	fn normalize_session_defaults_when_empty() {
		assert_eq!(normalize_session("////"), DEFAULT_SESSION);
		assert_eq!(normalize_session(""), DEFAULT_SESSION);
	}

	#[test]
	fn hash_is_stable_and_scoped_to_root() {
		let a = tempdir().unwrap();
		let b = tempdir().unwrap();
		let first = WorkspaceScope::from_root(a.path().to_path_buf());
		let again = WorkspaceScope::from_root(a.path().to_path_buf());
		let other = WorkspaceScope::from_root(b.path().to_path_buf());

		assert_eq!(first.hash(), again.hash());
		assert_ne!(first.hash(), other.hash());
		assert_eq!(first.hash().len(), 16);
	}

	#[test]
	fn relative_workspace_resolves_against_cwd() {
		let scope = WorkspaceScope::resolve(Some(Path::new("."))).unwrap();
		let cwd = WorkspaceScope::resolve(None).unwrap();
		assert_eq!(scope, cwd);
	}
}
