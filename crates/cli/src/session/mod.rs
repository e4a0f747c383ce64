//! Session descriptors and the client that drives a session daemon.

pub mod client;
pub mod descriptor;
pub mod spawn;

pub use client::SessionClient;
pub use descriptor::{CLIENT_VERSION, CliOptions, SessionConfig};
