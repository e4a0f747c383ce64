//! Client-side request/response correlation
//!
//! This module implements the request/response correlation layer on top of the
//! line transport. It handles:
//! - Generating unique, monotonically increasing request ids
//! - Correlating responses with pending requests by id (never by arrival order)
//! - Rejecting every pending request when the connection closes
//!
//! # Message Flow
//!
//! 1. Caller invokes [`Connection::send`] with a [`DaemonCall`]
//! 2. Connection allocates the next id and parks a oneshot sender under it
//! 3. The request frame is written and flushed
//! 4. The dispatch task receives `{id, result|error}` and completes the oneshot
//! 5. On stream close the dispatch task fails all parked requests

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use pw_protocol::{DaemonCall, Response};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::{Mutex as TokioMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::endpoint::{Endpoint, IpcStream};
use crate::error::{Error, Result};
use crate::transport::{LineSender, LineTransport};

/// Pending request callbacks keyed by request id.
type CallbackMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// RAII guard removing the parked callback when a request future is dropped.
struct CancelGuard {
	id: u64,
	callbacks: CallbackMap,
	completed: bool,
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if !self.completed && self.callbacks.lock().remove(&self.id).is_some() {
			debug!(target = "pw.ipc", id = self.id, "removed orphaned callback");
		}
	}
}

/// Future returned by [`Connection::send`] with automatic cancellation cleanup.
struct ResponseFuture {
	rx: oneshot::Receiver<Result<Value>>,
	guard: CancelGuard,
}

impl Future for ResponseFuture {
	type Output = Result<Value>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.completed = true;
				Poll::Ready(result.map_err(|_| Error::ConnectionClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Live duplex connection to a session daemon.
pub struct Connection {
	/// Last allocated request id; ids start at 1.
	last_id: AtomicU64,
	callbacks: CallbackMap,
	closed: Arc<AtomicBool>,
	sender: TokioMutex<LineSender<BoxedWriter>>,
	reader_task: JoinHandle<()>,
	dispatch_task: JoinHandle<()>,
}

impl Connection {
	/// Connects to a daemon endpoint.
	pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
		let stream: IpcStream = endpoint.connect().await?;
		Ok(Self::new(stream))
	}

	/// Wraps an already connected duplex stream. Must be called within a tokio runtime.
	pub fn new<S>(stream: S) -> Self
	where
		S: AsyncRead + AsyncWrite + Send + 'static,
	{
		let (read_half, write_half): (_, WriteHalf<S>) = tokio::io::split(stream);
		let writer: BoxedWriter = Box::new(write_half);
		let (transport, message_rx) = LineTransport::new(read_half, writer);
		let (sender, receiver) = transport.into_parts();

		let callbacks: CallbackMap = Arc::new(Mutex::new(HashMap::new()));
		let closed = Arc::new(AtomicBool::new(false));

		let reader_task = tokio::spawn(async move {
			if let Err(err) = receiver.run().await {
				debug!(target = "pw.ipc", error = %err, "transport read error");
			}
		});
		let dispatch_task = tokio::spawn(dispatch_loop(message_rx, Arc::clone(&callbacks), Arc::clone(&closed)));

		Self {
			last_id: AtomicU64::new(0),
			callbacks,
			closed,
			sender: TokioMutex::new(sender),
			reader_task,
			dispatch_task,
		}
	}

	/// Sends a call and awaits the response carrying the same id.
	///
	/// `{"error": ...}` responses surface as [`Error::Remote`]; a connection
	/// closing mid-request surfaces as [`Error::ConnectionClosed`].
	pub async fn send(&self, call: DaemonCall) -> Result<Value> {
		if self.is_closed() {
			return Err(Error::ConnectionClosed);
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
		let (tx, rx) = oneshot::channel();
		self.callbacks.lock().insert(id, tx);
		let guard = CancelGuard {
			id,
			callbacks: Arc::clone(&self.callbacks),
			completed: false,
		};

		// The dispatch task marks the connection closed before draining callbacks,
		// so a close racing the insert above is observed here.
		if self.is_closed() {
			return Err(Error::ConnectionClosed);
		}

		let method = call.method();
		let request = call.into_request(id);
		debug!(target = "pw.ipc", id, method, "sending request");
		self.sender.lock().await.send(&request).await?;

		ResponseFuture { rx, guard }.await
	}

	/// Returns true once the daemon side of the stream has closed.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	#[cfg(test)]
	pub(crate) fn pending_requests(&self) -> usize {
		self.callbacks.lock().len()
	}

	/// Closes the local side of the connection.
	///
	/// Pending requests are rejected. Errors from shutting down an already
	/// closed stream are returned so callers can decide whether they matter.
	pub async fn close(&self) -> Result<()> {
		let result = self.sender.lock().await.shutdown().await;
		self.reader_task.abort();
		self.closed.store(true, Ordering::SeqCst);
		reject_pending(&self.callbacks);
		result
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		self.reader_task.abort();
		self.dispatch_task.abort();
	}
}

async fn dispatch_loop(mut message_rx: mpsc::UnboundedReceiver<Value>, callbacks: CallbackMap, closed: Arc<AtomicBool>) {
	while let Some(value) = message_rx.recv().await {
		let response = match serde_json::from_value::<Response>(value) {
			Ok(response) => response,
			Err(err) => {
				warn!(target = "pw.ipc", error = %err, "ignoring frame that is not a response");
				continue;
			}
		};

		let Some(callback) = callbacks.lock().remove(&response.id) else {
			debug!(target = "pw.ipc", id = response.id, "response for unknown request id");
			continue;
		};

		let result = response.into_result().map_err(Error::Remote);
		let _ = callback.send(result);
	}

	closed.store(true, Ordering::SeqCst);
	reject_pending(&callbacks);
}

fn reject_pending(callbacks: &CallbackMap) {
	let pending: Vec<_> = callbacks.lock().drain().collect();
	if !pending.is_empty() {
		debug!(target = "pw.ipc", count = pending.len(), "rejecting pending requests on close");
	}
	for (_, callback) in pending {
		let _ = callback.send(Err(Error::ConnectionClosed));
	}
}
