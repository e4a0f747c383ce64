//! `pw` session daemon and client.
//!
//! A `pw` invocation resolves a named session for the current workspace,
//! connects to (or spawns) the daemon that owns it and issues one request.

pub mod cli;
pub mod commands;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod output;
pub mod paths;
pub mod registry;
pub mod session;
pub mod styles;
pub mod workspace;
