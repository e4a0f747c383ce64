//! Error types for the daemon runtime.

use std::io::ErrorKind;

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur on the IPC channel.
#[derive(Debug, Error)]
pub enum Error {
	/// I/O error (connect, bind, read, write).
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// Another daemon already owns the endpoint.
	#[error("listen EADDRINUSE: address already in use {0}")]
	AddressInUse(String),

	/// The peer closed the connection while a request was in flight.
	#[error("Connection closed before a response arrived")]
	ConnectionClosed,

	/// Error reported by the daemon for a request (`{"error": "..."}`).
	#[error("{0}")]
	Remote(String),
}

impl Error {
	/// Returns true when a connect attempt shows no daemon is serving the endpoint.
	pub fn is_not_running(&self) -> bool {
		match self {
			Error::Io(err) => is_not_running(err),
			_ => false,
		}
	}

	/// Returns true for the benign "already closed" family of errors.
	pub fn is_closed(&self) -> bool {
		match self {
			Error::ConnectionClosed => true,
			Error::Io(err) => is_closed(err),
			_ => false,
		}
	}
}

/// `ENOENT` / `ECONNREFUSED` on connect: the endpoint has no live daemon.
pub fn is_not_running(err: &std::io::Error) -> bool {
	matches!(err.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused)
}

pub fn is_closed(err: &std::io::Error) -> bool {
	matches!(
		err.kind(),
		ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::NotConnected | ErrorKind::UnexpectedEof
	)
}
