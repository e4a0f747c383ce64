//! Unix domain socket endpoints.
//!
//! Every socket has a sibling `{path}.lock` file. A daemon holds an exclusive
//! `flock` on it for as long as it serves, and nobody unlinks a socket file
//! without holding that lock, so a live daemon's socket is never removed.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

use super::IpcStream;
use crate::error::{Error, Result};

pub(super) fn endpoint_path(sockets_dir: &Path, workspace_hash: &str, session: &str) -> PathBuf {
	sockets_dir.join(workspace_hash).join(format!("{session}.sock"))
}

pub(super) async fn connect(path: &Path) -> std::io::Result<IpcStream> {
	let stream = UnixStream::connect(path).await?;
	Ok(Box::new(stream))
}

/// Removes the socket file unless a daemon holds the endpoint lock.
pub(super) fn remove_stale(path: &Path) -> std::io::Result<bool> {
	match EndpointLock::try_acquire(path)? {
		Some(_lock) => remove_socket_file(path),
		None => {
			debug!(target = "pw.ipc", path = %path.display(), "endpoint locked by a live daemon");
			Ok(false)
		}
	}
}

fn remove_socket_file(path: &Path) -> std::io::Result<bool> {
	match std::fs::remove_file(path) {
		Ok(()) => Ok(true),
		Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
		Err(err) => Err(err),
	}
}

fn lock_path(path: &Path) -> PathBuf {
	let mut lock = path.as_os_str().to_owned();
	lock.push(".lock");
	PathBuf::from(lock)
}

/// Exclusive advisory lock on `{path}.lock`, released when dropped or when
/// the owning process dies.
///
/// The lock file itself is never deleted: unlinking it would let two
/// processes lock different inodes under the same name.
struct EndpointLock {
	_file: File,
}

impl EndpointLock {
	/// Returns `None` when another process (or another open in this one)
	/// holds the lock.
	fn try_acquire(path: &Path) -> std::io::Result<Option<Self>> {
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let file = OpenOptions::new().create(true).write(true).truncate(false).open(lock_path(path))?;

		// SAFETY: `file` owns a valid descriptor for the duration of the call.
		let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
		if rc == 0 {
			return Ok(Some(Self { _file: file }));
		}
		let err = std::io::Error::last_os_error();
		if err.kind() == ErrorKind::WouldBlock {
			Ok(None)
		} else {
			Err(err)
		}
	}
}

pub(super) struct Listener {
	inner: UnixListener,
	path: PathBuf,
	_lock: EndpointLock,
}

impl Listener {
	pub(super) async fn bind(path: &Path) -> Result<Self> {
		let Some(lock) = EndpointLock::try_acquire(path)? else {
			return Err(Error::AddressInUse(path.display().to_string()));
		};

		// A crashed daemon leaves its socket file behind; holding the lock
		// proves nobody serves it.
		if remove_socket_file(path)? {
			debug!(target = "pw.ipc", path = %path.display(), "removed stale socket");
		}

		let inner = match UnixListener::bind(path) {
			Ok(listener) => listener,
			Err(err) if err.kind() == ErrorKind::AddrInUse => {
				return Err(Error::AddressInUse(path.display().to_string()));
			}
			Err(err) => return Err(err.into()),
		};

		// Owner only; filesystem permissions are the trust boundary.
		{
			use std::os::unix::fs::PermissionsExt;
			std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
		}

		Ok(Self {
			inner,
			path: path.to_path_buf(),
			_lock: lock,
		})
	}

	pub(super) async fn accept(&mut self) -> std::io::Result<IpcStream> {
		let (stream, _addr) = self.inner.accept().await?;
		Ok(Box::new(stream))
	}
}

impl Drop for Listener {
	fn drop(&mut self) {
		// Runs before `_lock` is released.
		let _ = std::fs::remove_file(&self.path);
	}
}

#[cfg(test)]
mod tests {
	use tempfile::tempdir;

	use super::*;

	#[tokio::test]
	async fn bind_replaces_stale_socket_file() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("ws").join("default.sock");
		std::fs::create_dir_all(path.parent().unwrap()).unwrap();

		// A bound-then-dropped std listener leaves the file with nobody listening.
		drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
		assert!(path.exists());
		let err = UnixStream::connect(&path).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::ConnectionRefused);

		let _listener = Listener::bind(&path).await.unwrap();
		assert!(UnixStream::connect(&path).await.is_ok());
	}

	#[tokio::test]
	async fn bind_refuses_live_socket() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("default.sock");

		let _first = Listener::bind(&path).await.unwrap();
		let err = match Listener::bind(&path).await {
			Ok(_) => panic!("second bind must fail"),
			Err(err) => err,
		};
		assert!(matches!(err, Error::AddressInUse(_)));
		assert!(err.to_string().contains("in use"));
	}

	#[tokio::test]
	async fn dropping_listener_removes_socket_file() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("default.sock");
		let listener = Listener::bind(&path).await.unwrap();
		assert!(path.exists());
		drop(listener);
		assert!(!path.exists());
		assert!(!remove_stale(&path).unwrap());
	}

	#[tokio::test]
	async fn concurrent_binds_over_stale_socket_leave_one_reachable_daemon() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("default.sock");
		drop(std::os::unix::net::UnixListener::bind(&path).unwrap());

		let (first, second) = tokio::join!(Listener::bind(&path), Listener::bind(&path));
		let (winner, loser) = match (first, second) {
			(Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
			(Ok(_), Ok(_)) => panic!("both binds succeeded"),
			(Err(a), Err(b)) => panic!("both binds failed: {a}; {b}"),
		};
		assert!(matches!(loser, Error::AddressInUse(_)));
		assert!(UnixStream::connect(&path).await.is_ok());
		drop(winner);
	}

	#[tokio::test]
	async fn live_socket_is_never_removed_as_stale() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("default.sock");
		let _listener = Listener::bind(&path).await.unwrap();

		assert!(!remove_stale(&path).unwrap());
		assert!(path.exists());
		assert!(UnixStream::connect(&path).await.is_ok());
	}

	#[test]
	fn lock_file_sits_next_to_socket() {
		assert_eq!(lock_path(Path::new("/tmp/ws/default.sock")), Path::new("/tmp/ws/default.sock.lock"));
	}
}
