//! On-disk layout of session state.
//!
//! For workspace hash `H` and session `N`:
//!
//! ```text
//! {sessions_base}/H/N.session    descriptor (JSON)
//! {sessions_base}/H/N.log        daemon stderr
//! {sessions_base}/H/ud-N-*       browser profiles
//! {sockets_base}/H/N.sock        endpoint (named pipe on Windows)
//! ```

use std::path::{Path, PathBuf};

use pw_runtime::Endpoint;
use pw_runtime::endpoint::{CACHE_SUBDIR, default_sockets_dir};

/// Environment override for the descriptor base directory.
pub const SESSIONS_DIR_ENV: &str = "PW_DAEMON_SESSIONS_DIR";

/// Descriptor file suffix.
pub const SESSION_SUFFIX: &str = "session";

const LOG_SUFFIX: &str = "log";

/// Base directories for descriptors and endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
	sessions_base: PathBuf,
	sockets_base: PathBuf,
}

impl DaemonPaths {
	pub fn new(sessions_base: impl Into<PathBuf>, sockets_base: impl Into<PathBuf>) -> Self {
		Self {
			sessions_base: sessions_base.into(),
			sockets_base: sockets_base.into(),
		}
	}

	/// Platform cache defaults, honouring `PW_DAEMON_SESSIONS_DIR` and
	/// `PW_DAEMON_SOCKETS_DIR`.
	pub fn from_env() -> Self {
		let sessions_base = match std::env::var_os(SESSIONS_DIR_ENV) {
			Some(dir) => PathBuf::from(dir),
			None => dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join(CACHE_SUBDIR),
		};
		Self::new(sessions_base, default_sockets_dir())
	}

	pub fn sessions_base(&self) -> &Path {
		&self.sessions_base
	}

	pub fn sockets_base(&self) -> &Path {
		&self.sockets_base
	}

	/// Directory holding the descriptors of one workspace.
	pub fn workspace_dir(&self, workspace_hash: &str) -> PathBuf {
		self.sessions_base.join(workspace_hash)
	}

	pub fn descriptor_path(&self, workspace_hash: &str, session: &str) -> PathBuf {
		self.workspace_dir(workspace_hash).join(format!("{session}.{SESSION_SUFFIX}"))
	}

	/// Profile directory prefix; the backend appends `-{browser}`.
	pub fn user_data_dir_prefix(&self, workspace_hash: &str, session: &str) -> PathBuf {
		self.workspace_dir(workspace_hash).join(format!("ud-{session}"))
	}

	pub fn endpoint(&self, workspace_hash: &str, session: &str) -> Endpoint {
		Endpoint::resolve_in(&self.sockets_base, workspace_hash, session)
	}
}

/// Daemon log file kept next to a descriptor.
pub fn log_path_for(descriptor: &Path) -> PathBuf {
	descriptor.with_extension(LOG_SUFFIX)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn session_files_share_the_workspace_dir() {
		let paths = DaemonPaths::new("/cache/sessions", "/cache/sockets");

		assert_eq!(paths.descriptor_path("abc", "default"), Path::new("/cache/sessions/abc/default.session"));
		assert_eq!(
			log_path_for(&paths.descriptor_path("abc", "my.session")),
			Path::new("/cache/sessions/abc/my.session.log")
		);
		assert_eq!(paths.user_data_dir_prefix("abc", "default"), Path::new("/cache/sessions/abc/ud-default"));
	}

	#[cfg(unix)]
	#[test]
	fn endpoint_lives_under_sockets_base() {
		let paths = DaemonPaths::new("/cache/sessions", "/cache/sockets");
		assert_eq!(paths.endpoint("abc", "work").path(), Path::new("/cache/sockets/abc/work.sock"));
	}
}
