//! Request/response envelopes for the daemon IPC channel.
//!
//! Client to daemon: `{"id": 1, "method": "run", "params": {"args": {...}}}`
//!
//! Daemon to client: `{"id": 1, "result": ...}` or `{"id": 1, "error": "..."}`

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::args::CommandArgs;

/// Errors raised while decoding a [`Request`] into a [`DaemonCall`].
#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error("unknown method: {0}")]
	UnknownMethod(String),

	#[error("invalid params for {method}: {source}")]
	InvalidParams {
		method: &'static str,
		#[source]
		source: serde_json::Error,
	},
}

/// Request frame as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
	/// Per-connection request id, echoed by the response.
	pub id: u64,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Response frame. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
	pub id: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl Response {
	pub fn ok(id: u64, result: Value) -> Self {
		Self {
			id,
			result: Some(result),
			error: None,
		}
	}

	pub fn err(id: u64, message: impl Into<String>) -> Self {
		Self {
			id,
			result: None,
			error: Some(message.into()),
		}
	}

	/// Converts the envelope into the call outcome.
	///
	/// A response without `result` and without `error` is treated as a `null` result.
	pub fn into_result(self) -> Result<Value, String> {
		match self.error {
			Some(message) => Err(message),
			None => Ok(self.result.unwrap_or(Value::Null)),
		}
	}
}

/// Parameters of a `run` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
	pub args: CommandArgs,
}

/// Parameters of a `stop` call (none).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopRequest {}

/// A typed daemon call.
#[derive(Debug, Clone, PartialEq)]
pub enum DaemonCall {
	/// Run one tool call against the session backend.
	Run(RunRequest),
	/// Reply, close the endpoint and exit.
	Stop(StopRequest),
}

impl DaemonCall {
	pub const RUN: &'static str = "run";
	pub const STOP: &'static str = "stop";

	pub fn run(args: CommandArgs) -> Self {
		DaemonCall::Run(RunRequest { args })
	}

	pub fn stop() -> Self {
		DaemonCall::Stop(StopRequest::default())
	}

	pub fn method(&self) -> &'static str {
		match self {
			DaemonCall::Run(_) => Self::RUN,
			DaemonCall::Stop(_) => Self::STOP,
		}
	}

	/// Decodes a wire request by its `method` field.
	pub fn decode(request: &Request) -> Result<Self, ProtocolError> {
		match request.method.as_str() {
			Self::RUN => {
				let params = serde_json::from_value::<RunRequest>(request.params.clone()).map_err(|source| {
					ProtocolError::InvalidParams {
						method: Self::RUN,
						source,
					}
				})?;
				Ok(DaemonCall::Run(params))
			}
			// stop carries no parameters; whatever was sent is ignored
			Self::STOP => Ok(DaemonCall::stop()),
			other => Err(ProtocolError::UnknownMethod(other.to_string())),
		}
	}

	/// Encodes the call as a wire request with the given id.
	pub fn into_request(self, id: u64) -> Request {
		let method = self.method().to_string();
		let params = match self {
			DaemonCall::Run(run) => serde_json::to_value(run),
			DaemonCall::Stop(stop) => serde_json::to_value(stop),
		}
		.unwrap_or_else(|_| Value::Object(Default::default()));
		Request { id, method, params }
	}
}
