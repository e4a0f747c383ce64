//! Newline-delimited JSON transport
//!
//! Turns a duplex byte stream into discrete JSON messages and back. Each
//! message is serialized with `serde_json`, followed by a single `\n`.
//!
//! The transport knows nothing about request ids or methods; correlation is
//! done by [`crate::connection::Connection`] on the client and by the daemon's
//! connection handler on the server.
//!
//! # Message Flow
//!
//! 1. [`LineReceiver::run`] reads chunks from the stream
//! 2. [`FrameDecoder`] buffers them and splits on `\n`
//! 3. Each complete frame is parsed and pushed to the message channel
//! 4. When the stream closes, `run` returns and the channel closes


use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;

/// Frame delimiter.
pub const DELIMITER: u8 = b'\n';

const READ_CHUNK_SIZE: usize = 32 * 1024;

/// Incremental frame decoder.
///
/// Chunk boundaries may fall anywhere: mid-JSON, inside a UTF-8 sequence or
/// exactly on a delimiter. A single chunk may carry several frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
	buffer: Vec<u8>,
	/// Bytes of `buffer` already known to contain no delimiter.
	scanned: usize,
}

impl FrameDecoder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Feeds a chunk and returns every message completed by it, in order.
	///
	/// Frames that are not valid UTF-8 JSON are logged and dropped.
	pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
		self.buffer.extend_from_slice(chunk);

		let mut messages = Vec::new();
		let mut start = 0;
		let mut search_from = self.scanned;
		while let Some(offset) = self.buffer[search_from..].iter().position(|b| *b == DELIMITER) {
			let end = search_from + offset;
			if let Some(message) = decode_frame(&self.buffer[start..end]) {
				messages.push(message);
			}
			start = end + 1;
			search_from = start;
		}

		self.buffer.drain(..start);
		self.scanned = self.buffer.len();
		messages
	}

	/// Number of bytes held back waiting for a delimiter.
	pub fn pending_len(&self) -> usize {
		self.buffer.len()
	}
}

fn decode_frame(frame: &[u8]) -> Option<Value> {
	let text = match std::str::from_utf8(frame) {
		Ok(text) => text.trim_end_matches('\r'),
		Err(err) => {
			warn!(target = "pw.ipc", error = %err, "dropping frame with invalid UTF-8");
			return None;
		}
	};
	if text.trim().is_empty() {
		return None;
	}
	match serde_json::from_str(text) {
		Ok(value) => Some(value),
		Err(err) => {
			warn!(target = "pw.ipc", error = %err, len = frame.len(), "dropping malformed frame");
			None
		}
	}
}

/// Serializes `message` as one frame.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>> {
	let mut bytes = serde_json::to_vec(message)?;
	bytes.push(DELIMITER);
	Ok(bytes)
}

/// Line transport over a split duplex stream.
pub struct LineTransport<R, W> {
	reader: R,
	writer: W,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<R, W> LineTransport<R, W>
where
	R: AsyncRead + Unpin,
	W: AsyncWrite + Unpin,
{
	/// Creates a transport and the channel on which decoded messages arrive.
	pub fn new(reader: R, writer: W) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		(
			Self {
				reader,
				writer,
				message_tx,
			},
			message_rx,
		)
	}

	/// Splits into independently owned send and receive halves.
	pub fn into_parts(self) -> (LineSender<W>, LineReceiver<R>) {
		(
			LineSender { writer: self.writer },
			LineReceiver {
				reader: self.reader,
				decoder: FrameDecoder::new(),
				message_tx: self.message_tx,
			},
		)
	}
}

/// Sending half of a [`LineTransport`].
pub struct LineSender<W> {
	writer: W,
}

impl<W> LineSender<W>
where
	W: AsyncWrite + Unpin,
{
	pub fn new(writer: W) -> Self {
		Self { writer }
	}

	/// Writes one frame and resolves once it is flushed.
	pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<()> {
		let frame = encode_frame(message)?;
		self.writer.write_all(&frame).await?;
		self.writer.flush().await?;
		Ok(())
	}

	/// Shuts down the write side of the stream.
	pub async fn shutdown(&mut self) -> Result<()> {
		self.writer.shutdown().await?;
		Ok(())
	}
}

/// Receiving half of a [`LineTransport`].
pub struct LineReceiver<R> {
	reader: R,
	decoder: FrameDecoder,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<R> LineReceiver<R>
where
	R: AsyncRead + Unpin,
{
	/// Reads until the stream closes, dispatching messages in receipt order.
	///
	/// Returns `Ok(())` on end of stream or when the message channel is dropped.
	pub async fn run(mut self) -> Result<()> {
		let mut chunk = vec![0u8; READ_CHUNK_SIZE];
		loop {
			let n = self.reader.read(&mut chunk).await?;
			if n == 0 {
				if self.decoder.pending_len() > 0 {
					debug!(
						target = "pw.ipc",
						pending = self.decoder.pending_len(),
						"stream closed with an unterminated frame"
					);
				}
				return Ok(());
			}

			for message in self.decoder.push(&chunk[..n]) {
				if self.message_tx.send(message).is_err() {
					return Ok(());
				}
			}
		}
	}
}
