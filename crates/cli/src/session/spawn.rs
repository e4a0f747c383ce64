//! Detached daemon spawn and readiness wait.
//!
//! The daemon reports readiness on stdout (see [`pw_protocol::handshake`]), so
//! the client never polls the endpoint while the daemon starts. Its stderr goes
//! to the session log file; on failure the tail of that file is attached to the
//! error.

use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

use pw_protocol::handshake::{Readiness, ReadinessScanner};
use pw_runtime::Endpoint;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Number of daemon log lines attached to startup errors.
pub const STDERR_TAIL_LINES: usize = 20;

const READ_CHUNK_SIZE: usize = 4096;

/// A daemon that reported `### Success`.
#[derive(Debug, Clone, PartialEq)]
pub struct Ready {
	/// Endpoint the daemon says it is listening on. `None` when the report
	/// omitted it.
	pub endpoint: Option<Endpoint>,
	/// Configuration from the `### Config` block.
	pub config: Option<Value>,
}

#[derive(Debug, Error)]
pub enum StartupError {
	/// The daemon printed `### Error`.
	#[error("{0}")]
	Reported(String),

	/// Stdout closed before the sentinel line.
	#[error("daemon exited before reporting readiness{}", format_output(.output))]
	Exited { output: String },

	#[error("failed to spawn daemon: {0}")]
	Spawn(#[source] io::Error),

	#[error("failed to read daemon output: {0}")]
	Io(#[from] io::Error),
}

fn format_output(output: &str) -> String {
	let output = output.trim();
	if output.is_empty() { String::new() } else { format!(": {output}") }
}

/// Reads daemon stdout until the handshake sentinel.
pub async fn await_ready<R>(mut stdout: R) -> Result<Ready, StartupError>
where
	R: AsyncRead + Unpin,
{
	let mut scanner = ReadinessScanner::new();
	let mut chunk = [0u8; READ_CHUNK_SIZE];
	loop {
		let n = stdout.read(&mut chunk).await?;
		if n == 0 {
			return Err(StartupError::Exited { output: scanner.captured() });
		}
		match scanner.push(&chunk[..n]) {
			None => continue,
			Some(Readiness::Ready { endpoint, config }) => {
				let endpoint = (!endpoint.is_empty()).then(|| Endpoint::from_path(endpoint));
				return Ok(Ready { endpoint, config });
			}
			Some(Readiness::Failed { message }) => return Err(StartupError::Reported(message)),
		}
	}
}

/// Spawns `command` detached from this process and waits for its readiness
/// report.
///
/// Stdin is closed and stdout piped; the caller decides where stderr goes.
/// SIGINT/SIGTERM received while waiting are forwarded to the child, and the
/// previous handlers are restored before returning. The child is left running
/// once it reports success.
pub async fn spawn_and_await_ready(mut command: Command) -> Result<Ready, StartupError> {
	command.stdin(Stdio::null()).stdout(Stdio::piped());
	detach(&mut command);

	// Signal dispositions are process-wide: one forwarding window at a time.
	let _window = SIGNAL_WINDOW.lock().await;

	let mut child = tokio::process::Command::from(command).spawn().map_err(StartupError::Spawn)?;
	let pid = child.id();
	debug!(target = "pw.session", pid, "spawned daemon");
	let stdout = child
		.stdout
		.take()
		.ok_or_else(|| StartupError::Spawn(io::Error::other("daemon stdout was not captured")))?;

	let result = await_ready_forwarding_signals(&mut child, stdout).await;

	// Dropping the handle neither kills nor waits for the daemon.
	drop(child);
	result
}

static SIGNAL_WINDOW: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

#[cfg(unix)]
fn detach(command: &mut Command) {
	std::os::unix::process::CommandExt::process_group(command, 0);
}

#[cfg(windows)]
fn detach(command: &mut Command) {
	use std::os::windows::process::CommandExt;

	const DETACHED_PROCESS: u32 = 0x0000_0008;
	const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
	command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(unix)]
async fn await_ready_forwarding_signals(child: &mut tokio::process::Child, stdout: tokio::process::ChildStdout) -> Result<Ready, StartupError> {
	let Some(pid) = child.id() else {
		return await_ready(stdout).await;
	};
	let _forwarder = forward::SignalForwarder::install(pid as libc::pid_t)?;
	await_ready(stdout).await
}

#[cfg(windows)]
async fn await_ready_forwarding_signals(child: &mut tokio::process::Child, stdout: tokio::process::ChildStdout) -> Result<Ready, StartupError> {
	let ready = await_ready(stdout);
	tokio::pin!(ready);
	let mut forwarding = true;
	loop {
		tokio::select! {
			result = &mut ready => return result,
			interrupted = tokio::signal::ctrl_c(), if forwarding => match interrupted {
				Ok(()) => {
					tracing::info!(target = "pw.session", pid = child.id(), "stopping daemon on Ctrl+C");
					let _ = child.start_kill();
				}
				Err(_) => forwarding = false,
			},
		}
	}
}

/// SIGINT/SIGTERM forwarding to the daemon being started.
///
/// The daemon runs in its own process group, so a terminal Ctrl+C only reaches
/// the client. While installed, both signals are relayed to the child with
/// `kill(2)` from the handler; dropping the forwarder restores the previous
/// dispositions.
#[cfg(unix)]
mod forward {
	use std::io;
	use std::sync::atomic::{AtomicI32, Ordering};

	use tracing::debug;

	const FORWARDED: [libc::c_int; 2] = [libc::SIGINT, libc::SIGTERM];

	/// Pid signals are relayed to; 0 outside a forwarding window.
	static CHILD_PID: AtomicI32 = AtomicI32::new(0);

	pub(super) extern "C" fn relay(signal: libc::c_int) {
		let pid = CHILD_PID.load(Ordering::SeqCst);
		if pid > 0 {
			// SAFETY: kill(2) is async-signal-safe.
			unsafe {
				libc::kill(pid, signal);
			}
		}
	}

	pub(super) struct SignalForwarder {
		previous: Vec<(libc::c_int, libc::sigaction)>,
	}

	impl SignalForwarder {
		pub(super) fn install(pid: libc::pid_t) -> io::Result<Self> {
			CHILD_PID.store(pid, Ordering::SeqCst);
			let mut forwarder = Self { previous: Vec::new() };
			for signal in FORWARDED {
				// SAFETY: both structs are fully initialised before use and
				// `relay` only touches an atomic and calls kill(2).
				unsafe {
					let mut action: libc::sigaction = std::mem::zeroed();
					action.sa_sigaction = relay as extern "C" fn(libc::c_int) as libc::sighandler_t;
					action.sa_flags = libc::SA_RESTART;
					libc::sigemptyset(&mut action.sa_mask);

					let mut previous: libc::sigaction = std::mem::zeroed();
					if libc::sigaction(signal, &action, &mut previous) != 0 {
						// Dropping `forwarder` restores what was installed so far.
						return Err(io::Error::last_os_error());
					}
					forwarder.previous.push((signal, previous));
				}
			}
			debug!(target = "pw.session", pid, "forwarding SIGINT/SIGTERM to daemon");
			Ok(forwarder)
		}
	}

	impl Drop for SignalForwarder {
		fn drop(&mut self) {
			for (signal, previous) in self.previous.drain(..).rev() {
				// SAFETY: `previous` was filled in by sigaction(2) for this signal.
				unsafe {
					libc::sigaction(signal, &previous, std::ptr::null_mut());
				}
			}
			CHILD_PID.store(0, Ordering::SeqCst);
		}
	}
}

/// Last `lines` lines of the session log. The client truncates the log on
/// every spawn, so this only covers the current attempt. A missing file yields
/// an empty tail.
pub fn stderr_tail(log: &Path, lines: usize) -> String {
	let Ok(bytes) = std::fs::read(log) else {
		return String::new();
	};
	let text = String::from_utf8_lossy(&bytes);
	let all: Vec<&str> = text.lines().collect();
	all[all.len().saturating_sub(lines)..].join("\n")
}
