//! pw runtime - IPC plumbing for the session daemon
//!
//! This crate provides the low-level infrastructure shared by the `pw` client
//! and the per-session daemon:
//!
//! - **Endpoint**: platform IPC address (Unix domain socket / Windows named pipe)
//! - **Transport**: newline-delimited JSON framing over a duplex stream
//! - **Connection**: request id allocation and response correlation
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │   pw-cli    │  Session client, daemon process
//! └──────┬──────┘
//!        │
//! ┌──────▼──────┐
//! │  pw-runtime │  This crate
//! │  ┌────────┐ │
//! │  │ Conn   │ │  id -> pending request correlation
//! │  └────────┘ │
//! │  ┌────────┐ │
//! │  │ Trans  │ │  `\n`-delimited JSON frames
//! │  └────────┘ │
//! │  ┌────────┐ │
//! │  │Endpoint│ │  socket / named pipe
//! │  └────────┘ │
//! └─────────────┘
//! ```

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod transport;

pub use connection::Connection;
pub use endpoint::{Endpoint, EndpointListener, IpcStream};
pub use error::{Error, Result};
pub use transport::{FrameDecoder, LineReceiver, LineSender, LineTransport};
