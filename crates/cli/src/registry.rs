//! Enumeration of persisted session descriptors.
//!
//! The sessions base directory holds one sub-directory per workspace hash,
//! each containing `{name}.session` files. Entries are indexed by the
//! descriptor's `workspaceDir` when present and by the directory's workspace
//! hash otherwise.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::paths::SESSION_SUFFIX;
use crate::session::descriptor::SessionConfig;
use crate::workspace::WorkspaceScope;

/// A loaded descriptor and the file it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEntry {
	pub file: PathBuf,
	pub config: SessionConfig,
}

#[derive(Debug, Default)]
pub struct Registry {
	workspaces: BTreeMap<String, Vec<SessionEntry>>,
}

impl Registry {
	/// Scans `sessions_base`. Unreadable directories and corrupt descriptors
	/// are skipped.
	pub fn load(sessions_base: &Path) -> Self {
		let mut registry = Registry::default();

		let Ok(workspace_dirs) = fs::read_dir(sessions_base) else {
			debug!(target = "pw.registry", base = %sessions_base.display(), "no sessions directory");
			return registry;
		};

		for workspace_dir in workspace_dirs.flatten() {
			let path = workspace_dir.path();
			if !path.is_dir() {
				continue;
			}
			let hash = workspace_dir.file_name().to_string_lossy().into_owned();
			let Ok(files) = fs::read_dir(&path) else {
				continue;
			};

			for file in files.flatten() {
				let file = file.path();
				if file.extension().is_none_or(|ext| ext != SESSION_SUFFIX) {
					continue;
				}
				match SessionConfig::load(&file) {
					Ok(Some(config)) => {
						let key = config.workspace_dir.as_ref().map(|dir| dir.to_string_lossy().into_owned()).unwrap_or_else(|| hash.clone());
						registry.workspaces.entry(key).or_default().push(SessionEntry { file, config });
					}
					Ok(None) => {}
					Err(err) => {
						debug!(target = "pw.registry", file = %file.display(), error = %err, "skipping unreadable descriptor");
					}
				}
			}
		}

		for entries in registry.workspaces.values_mut() {
			entries.sort_by(|a, b| a.config.name.cmp(&b.config.name));
		}
		registry
	}

	/// Sessions belonging to `scope`, by workspace directory or, for
	/// descriptors without one, by workspace hash.
	pub fn entries(&self, scope: &WorkspaceScope) -> Vec<&SessionEntry> {
		let by_dir = self.workspaces.get(&scope.key()).into_iter().flatten();
		let by_hash = self.workspaces.get(scope.hash()).into_iter().flatten();
		by_dir.chain(by_hash).collect()
	}

	pub fn entry(&self, scope: &WorkspaceScope, name: &str) -> Option<&SessionEntry> {
		self.entries(scope).into_iter().find(|entry| entry.config.name == name)
	}

	/// All workspaces and their sessions, ordered by workspace key.
	pub fn workspaces(&self) -> impl Iterator<Item = (&str, &[SessionEntry])> {
		self.workspaces.iter().map(|(key, entries)| (key.as_str(), entries.as_slice()))
	}

	pub fn len(&self) -> usize {
		self.workspaces.values().map(Vec::len).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
