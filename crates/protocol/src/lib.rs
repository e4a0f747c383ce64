//! Wire types for the pw session daemon.
//!
//! This crate holds the types exchanged between a short-lived `pw` invocation
//! and the per-session daemon it talks to:
//!
//! - [`Request`] / [`Response`] - newline-delimited JSON envelopes on the IPC channel
//! - [`DaemonCall`] - explicitly decoded `run` / `stop` calls
//! - [`CommandArgs`] - argv-style arguments carried by `run`
//! - [`handshake`] - the plain-text readiness report the daemon prints on stdout

pub mod args;
pub mod handshake;
pub mod message;

pub use args::CommandArgs;
pub use handshake::{Readiness, ReadinessScanner};
pub use message::{DaemonCall, ProtocolError, Request, Response, RunRequest, StopRequest};
