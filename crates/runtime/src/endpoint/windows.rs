//! Windows named pipe endpoints.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};

use super::IpcStream;
use crate::error::{Error, Result};

const ERROR_ACCESS_DENIED: i32 = 5;
const ERROR_PIPE_BUSY: i32 = 231;
const PIPE_BUSY_RETRY: Duration = Duration::from_millis(50);

pub(super) fn endpoint_path(_sockets_dir: &Path, workspace_hash: &str, session: &str) -> PathBuf {
	PathBuf::from(format!(r"\\.\pipe\{workspace_hash}-{session}.sock"))
}

pub(super) async fn connect(path: &Path) -> std::io::Result<IpcStream> {
	loop {
		match ClientOptions::new().open(path) {
			Ok(client) => return Ok(Box::new(client)),
			Err(err) if err.raw_os_error() == Some(ERROR_PIPE_BUSY) => {}
			Err(err) => return Err(err),
		}
		tokio::time::sleep(PIPE_BUSY_RETRY).await;
	}
}

/// Named pipes disappear with their owning process.
pub(super) fn remove_stale(_path: &Path) -> std::io::Result<bool> {
	Ok(false)
}

pub(super) struct Listener {
	path: PathBuf,
	next: NamedPipeServer,
}

impl Listener {
	pub(super) async fn bind(path: &Path) -> Result<Self> {
		let next = match ServerOptions::new().first_pipe_instance(true).reject_remote_clients(true).create(path) {
			Ok(server) => server,
			Err(err) if err.raw_os_error() == Some(ERROR_ACCESS_DENIED) => {
				return Err(Error::AddressInUse(path.display().to_string()));
			}
			Err(err) => return Err(err.into()),
		};
		Ok(Self {
			path: path.to_path_buf(),
			next,
		})
	}

	pub(super) async fn accept(&mut self) -> std::io::Result<IpcStream> {
		self.next.connect().await?;
		let fresh = ServerOptions::new().reject_remote_clients(true).create(&self.path)?;
		let connected = std::mem::replace(&mut self.next, fresh);
		Ok(Box::new(connected))
	}
}
