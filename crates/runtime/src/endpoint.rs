//! IPC endpoint resolution, bind and connect.
//!
//! An endpoint is derived deterministically from a workspace hash and a
//! session name:
//!
//! - Unix: `{sockets_dir}/{hash}/{session}.sock` (Unix domain socket)
//! - Windows: `\\.\pipe\{hash}-{session}.sock` (named pipe)
//!
//! `sockets_dir` defaults to `{cache_dir}/pw-cli/daemon` and can be overridden
//! with [`SOCKETS_DIR_ENV`]. The per-OS details live in the `unix` and
//! `windows` submodules; this is the only place that chooses between them.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use self::unix as sys;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use self::windows as sys;

/// Environment override for the endpoint base directory.
pub const SOCKETS_DIR_ENV: &str = "PW_DAEMON_SOCKETS_DIR";

/// Application directory under the platform cache directory.
pub const CACHE_SUBDIR: &str = "pw-cli/daemon";

/// Duplex byte stream over an endpoint.
pub trait IpcIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> IpcIo for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Boxed connected stream (socket or pipe).
pub type IpcStream = Box<dyn IpcIo>;

/// Platform IPC address for one session daemon.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
	path: PathBuf,
}

impl Endpoint {
	/// Resolves the endpoint for `session` in the default sockets directory.
	pub fn resolve(workspace_hash: &str, session: &str) -> Self {
		Self::resolve_in(&default_sockets_dir(), workspace_hash, session)
	}

	/// Resolves the endpoint for `session` under an explicit sockets directory.
	///
	/// On Windows the directory is ignored: named pipes live in the kernel
	/// namespace.
	pub fn resolve_in(sockets_dir: &Path, workspace_hash: &str, session: &str) -> Self {
		Self {
			path: sys::endpoint_path(sockets_dir, workspace_hash, session),
		}
	}

	/// Wraps a previously resolved path (e.g. read from a session descriptor).
	pub fn from_path(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Connects to the daemon listening on this endpoint.
	///
	/// `NotFound` / `ConnectionRefused` mean no daemon is serving it; see
	/// [`crate::error::is_not_running`].
	pub async fn connect(&self) -> std::io::Result<IpcStream> {
		sys::connect(&self.path).await
	}

	/// Binds the endpoint, replacing a stale leftover from a dead daemon.
	///
	/// Fails with [`crate::Error::AddressInUse`] when a live daemon owns it.
	/// On Unix the listener holds an exclusive lock on `{path}.lock` until it
	/// is dropped, so concurrent binds cannot displace each other.
	pub async fn bind(&self) -> Result<EndpointListener> {
		let inner = sys::Listener::bind(&self.path).await?;
		Ok(EndpointListener { inner })
	}

	/// Removes a stale endpoint left behind by a dead daemon.
	///
	/// Returns whether anything was removed. The socket of a live daemon is
	/// never touched. Named pipes are kernel-owned and need no cleanup.
	pub fn remove_stale(&self) -> std::io::Result<bool> {
		sys::remove_stale(&self.path)
	}
}

impl fmt::Display for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.path.display())
	}
}

/// Bound endpoint accepting daemon connections.
///
/// Dropping the listener closes the endpoint (and removes the socket file on Unix).
pub struct EndpointListener {
	inner: sys::Listener,
}

impl EndpointListener {
	pub async fn accept(&mut self) -> std::io::Result<IpcStream> {
		self.inner.accept().await
	}
}

/// Default endpoint base directory.
pub fn default_sockets_dir() -> PathBuf {
	if let Some(dir) = std::env::var_os(SOCKETS_DIR_ENV) {
		return PathBuf::from(dir);
	}
	dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join(CACHE_SUBDIR)
}
