use std::path::PathBuf;

use thiserror::Error;

use crate::output::{CommandError, ErrorCode};

pub type Result<T> = std::result::Result<T, PwError>;

#[derive(Debug, Error)]
pub enum PwError {
	/// The descriptor was written by a different `pw` version; message shapes
	/// are not stable across versions, so nothing is sent.
	#[error(
		"Session '{session}' was started by pw {daemon} but this is pw {client}. \
		 Run `pw close -s {session}` and reopen the session."
	)]
	VersionMismatch { session: String, client: String, daemon: String },

	/// The daemon reported `### Error` or exited before its readiness report.
	#[error("{message}{}", format_stderr_tail(.stderr_tail))]
	DaemonStartup {
		session: String,
		message: String,
		stderr_tail: String,
	},

	#[error("timed out connecting to session '{session}' at {endpoint}: {last_error}")]
	ConnectTimeout {
		session: String,
		endpoint: PathBuf,
		last_error: String,
	},

	#[error("session not found: {0}")]
	SessionNotFound(String),

	/// The daemon ran the command and reported an error.
	#[error("{0}")]
	Command(String),

	#[error("invalid input: {0}")]
	InvalidInput(String),

	#[error("{0}")]
	Context(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Runtime(#[from] pw_runtime::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

fn format_stderr_tail(tail: &str) -> String {
	let tail = tail.trim_end();
	if tail.is_empty() {
		String::new()
	} else {
		format!("\n--- daemon stderr ---\n{tail}")
	}
}

impl PwError {
	/// Convert this error to a CommandError for structured output
	pub fn to_command_error(&self) -> CommandError {
		let (code, details) = match self {
			PwError::VersionMismatch { session, client, daemon } => (
				ErrorCode::VersionMismatch,
				Some(serde_json::json!({ "session": session, "clientVersion": client, "sessionVersion": daemon })),
			),
			PwError::DaemonStartup { session, stderr_tail, .. } => (
				ErrorCode::DaemonStartupFailed,
				Some(serde_json::json!({ "session": session, "stderr": stderr_tail })),
			),
			PwError::ConnectTimeout { session, endpoint, .. } => (
				ErrorCode::Timeout,
				Some(serde_json::json!({ "session": session, "endpoint": endpoint })),
			),
			PwError::SessionNotFound(_) => (ErrorCode::SessionError, None),
			PwError::Command(_) => (ErrorCode::CommandFailed, None),
			PwError::InvalidInput(_) => (ErrorCode::InvalidInput, None),
			PwError::Context(_) => (ErrorCode::SessionError, None),
			PwError::Io(_) => (ErrorCode::IoError, None),
			PwError::Json(_) => (ErrorCode::InternalError, None),
			PwError::Runtime(pw_runtime::Error::Remote(_)) => (ErrorCode::CommandFailed, None),
			PwError::Runtime(_) => (ErrorCode::SessionError, None),
			PwError::Anyhow(_) => (ErrorCode::InternalError, None),
		};

		CommandError {
			code,
			message: self.to_string(),
			details,
		}
	}
}
