//! Session descriptor persistence.
//!
//! A descriptor records how to reach (and, when needed, respawn) the daemon of
//! one named session. Its existence says nothing about whether that daemon is
//! alive; only a successful connect does.

use std::fs;
use std::path::{Path, PathBuf};

use pw_runtime::Endpoint;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{PwError, Result};
use crate::paths::DaemonPaths;
use crate::workspace::WorkspaceScope;

/// Version written into descriptors and compared before any `run`.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Launch options the session was created with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CliOptions {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub headed: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub extension: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub browser: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub persistent: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub profile: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub config: Option<String>,
}

impl CliOptions {
	/// Applies every option set in `flags` over `self`.
	pub fn overlay(&mut self, flags: &CliOptions) {
		fn set<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
			if value.is_some() {
				slot.clone_from(value);
			}
		}
		set(&mut self.headed, &flags.headed);
		set(&mut self.extension, &flags.extension);
		set(&mut self.browser, &flags.browser);
		set(&mut self.persistent, &flags.persistent);
		set(&mut self.profile, &flags.profile);
		set(&mut self.config, &flags.config);
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
	/// Session name. Older descriptors omit it; it is then taken from the file name.
	#[serde(default)]
	pub name: String,
	/// `pw` version that wrote the descriptor.
	pub version: String,
	/// Endpoint the daemon binds.
	pub socket_path: PathBuf,
	#[serde(default)]
	pub cli: CliOptions,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_data_dir_prefix: Option<PathBuf>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub workspace_dir: Option<PathBuf>,
	/// Configuration reported by the daemon in its readiness report.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resolved_config: Option<Value>,
	/// Unix epoch seconds of the last successful spawn.
	#[serde(default)]
	pub timestamp: u64,
}

impl SessionConfig {
	/// Fresh descriptor for a session that has never been started.
	pub fn new(paths: &DaemonPaths, scope: &WorkspaceScope, name: &str, cli: CliOptions) -> Self {
		Self {
			name: name.to_string(),
			version: CLIENT_VERSION.to_string(),
			socket_path: paths.endpoint(scope.hash(), name).path().to_path_buf(),
			cli,
			user_data_dir_prefix: Some(paths.user_data_dir_prefix(scope.hash(), name)),
			workspace_dir: Some(scope.root().to_path_buf()),
			resolved_config: None,
			timestamp: 0,
		}
	}

	/// Loads a descriptor, returning `None` when the file does not exist.
	pub fn load(path: &Path) -> Result<Option<Self>> {
		let content = match fs::read_to_string(path) {
			Ok(c) => c,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(err) => return Err(PwError::Io(err)),
		};

		let mut config: Self = serde_json::from_str(&content)?;
		if config.name.is_empty() {
			config.name = name_from_path(path).ok_or_else(|| PwError::Context(format!("cannot derive session name from {}", path.display())))?;
			debug!(target = "pw.session", path = %path.display(), name = %config.name, "backfilled session name");
		}
		Ok(Some(config))
	}

	/// Writes the descriptor, creating parent directories.
	pub fn save(&self, path: &Path) -> Result<()> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}
		let content = serde_json::to_string_pretty(self)?;
		fs::write(path, content)?;
		Ok(())
	}

	/// Removes a descriptor file; returns whether one existed.
	pub fn delete(path: &Path) -> Result<bool> {
		match fs::remove_file(path) {
			Ok(()) => Ok(true),
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
			Err(err) => Err(PwError::Io(err)),
		}
	}

	pub fn endpoint(&self) -> Endpoint {
		Endpoint::from_path(&self.socket_path)
	}

	pub fn is_persistent(&self) -> bool {
		self.cli.persistent.unwrap_or(false)
	}

	/// Browser the backend launches for this session.
	pub fn browser(&self) -> &str {
		self.cli.browser.as_deref().unwrap_or("chromium")
	}

	/// Fails unless the descriptor was written by `client_version`.
	pub fn check_version(&self, client_version: &str) -> Result<()> {
		if self.version == client_version {
			return Ok(());
		}
		Err(PwError::VersionMismatch {
			session: self.name.clone(),
			client: client_version.to_string(),
			daemon: self.version.clone(),
		})
	}
}

fn name_from_path(path: &Path) -> Option<String> {
	path.file_stem().map(|stem| stem.to_string_lossy().into_owned())
}

/// Current Unix timestamp in seconds.
pub fn now_ts() -> u64 {
	std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use tempfile::tempdir;

	use super::*;

	fn sample(dir: &Path) -> SessionConfig {
		let paths = DaemonPaths::new(dir.join("sessions"), dir.join("sockets"));
		let scope = WorkspaceScope::from_root(dir.to_path_buf());
		SessionConfig::new(
			&paths,
			&scope,
			"work",
			CliOptions {
				headed: Some(true),
				persistent: Some(true),
				..Default::default()
			},
		)
	}

	#[test]
	fn save_then_load_round_trips() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("nested").join("work.session");
		let mut config = sample(dir.path());
		config.resolved_config = Some(json!({ "browser": { "browserName": "chromium" } }));
		config.timestamp = 42;

		config.save(&path).unwrap();
		let loaded = SessionConfig::load(&path).unwrap().unwrap();
		assert_eq!(loaded, config);
	}

	#[test]
	fn wire_format_is_camel_case() {
		let dir = tempdir().unwrap();
		let value = serde_json::to_value(sample(dir.path())).unwrap();

		assert!(value.get("socketPath").is_some());
		assert!(value.get("userDataDirPrefix").is_some());
		assert!(value.get("workspaceDir").is_some());
		assert_eq!(value["cli"], json!({ "headed": true, "persistent": true }));
		assert!(value.get("resolvedConfig").is_none());
	}

	#[test]
	fn legacy_descriptor_gets_name_from_file() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("legacy.session");
		std::fs::write(&path, r#"{"version":"1.0.0","socketPath":"/tmp/legacy.sock","cli":{}}"#).unwrap();

		let loaded = SessionConfig::load(&path).unwrap().unwrap();
		assert_eq!(loaded.name, "legacy");
		assert_eq!(loaded.socket_path, PathBuf::from("/tmp/legacy.sock"));
		assert!(!loaded.is_persistent());
		assert_eq!(loaded.browser(), "chromium");
	}

	#[test]
	fn missing_descriptor_is_none() {
		let dir = tempdir().unwrap();
		assert!(SessionConfig::load(&dir.path().join("none.session")).unwrap().is_none());
		assert!(!SessionConfig::delete(&dir.path().join("none.session")).unwrap());
	}

	#[test]
	fn corrupt_descriptor_is_an_error() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("bad.session");
		std::fs::write(&path, "{not json").unwrap();
		assert!(SessionConfig::load(&path).is_err());
	}

	#[test]
	fn version_check() {
		let dir = tempdir().unwrap();
		let mut config = sample(dir.path());
		assert!(config.check_version(CLIENT_VERSION).is_ok());

		config.version = "1.0.0".into();
		let err = config.check_version("2.0.0").unwrap_err();
		assert!(matches!(err, PwError::VersionMismatch { .. }));
	}

	#[test]
	fn overlay_only_replaces_set_flags() {
		let mut base = CliOptions {
			headed: Some(true),
			browser: Some("firefox".into()),
			..Default::default()
		};
		base.overlay(&CliOptions {
			browser: Some("webkit".into()),
			persistent: Some(true),
			..Default::default()
		});
		assert_eq!(base.headed, Some(true));
		assert_eq!(base.browser.as_deref(), Some("webkit"));
		assert_eq!(base.persistent, Some(true));
		assert!(base.profile.is_none());
	}
}
