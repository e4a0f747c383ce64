//! The per-session daemon process.
//!
//! Lifecycle: load descriptor, build backend, bind endpoint, report readiness
//! on stdout, serve until `stop` or a signal, exit.
//!
//! Stdout carries only the readiness report (see [`pw_protocol::handshake`]);
//! logs go to stderr, which the spawning client points at the session log file.

mod backend;
mod server;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow};
pub use backend::{InMemoryBackend, ToolBackend};
use pw_protocol::handshake;
pub use server::{DaemonServer, StopReason};
use serde_json::Value;
use tracing::{error, info};

use crate::session::descriptor::SessionConfig;

/// Runs the daemon for the descriptor at `session_file` and returns the
/// process exit code: 0 after a graceful stop, 1 when startup fails.
pub async fn run(session_file: &Path) -> i32 {
	let (server, resolved_config) = match start(session_file).await {
		Ok(started) => started,
		Err(err) => {
			let message = format!("{err:#}");
			error!(target = "pw.daemon", error = %message, "daemon startup failed");
			report(&handshake::format_error(&message));
			return 1;
		}
	};

	report(&handshake::format_success(&resolved_config, &server.endpoint().to_string()));

	match server.serve(shutdown_signal()).await {
		Ok(reason) => {
			info!(target = "pw.daemon", ?reason, "daemon stopped");
			0
		}
		Err(err) => {
			error!(target = "pw.daemon", error = %format!("{err:#}"), "daemon failed");
			1
		}
	}
}

async fn start(session_file: &Path) -> anyhow::Result<(DaemonServer, Value)> {
	let config = SessionConfig::load(session_file)
		.with_context(|| format!("Failed to read session file: {}", session_file.display()))?
		.ok_or_else(|| anyhow!("Session file not found: {}", session_file.display()))?;
	info!(target = "pw.daemon", session = %config.name, version = %config.version, "starting daemon");

	let backend = Arc::new(InMemoryBackend::new(&config));
	let resolved_config = backend.resolved_config();
	let server = DaemonServer::bind(config.endpoint(), backend).await?;
	Ok((server, resolved_config))
}

fn report(text: &str) {
	let mut stdout = std::io::stdout().lock();
	let _ = stdout.write_all(text.as_bytes());
	let _ = stdout.flush();
}

#[cfg(unix)]
async fn shutdown_signal() {
	use tokio::signal::unix::{SignalKind, signal};

	let (Ok(mut sigterm), Ok(mut sigint)) = (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) else {
		error!(target = "pw.daemon", "failed to install signal handlers");
		return std::future::pending().await;
	};

	tokio::select! {
		_ = sigterm.recv() => info!(target = "pw.daemon", "received SIGTERM"),
		_ = sigint.recv() => info!(target = "pw.daemon", "received SIGINT"),
	}
}

#[cfg(windows)]
async fn shutdown_signal() {
	if tokio::signal::ctrl_c().await.is_ok() {
		info!(target = "pw.daemon", "received Ctrl+C");
	} else {
		std::future::pending::<()>().await;
	}
}
