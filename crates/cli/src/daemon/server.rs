//! Daemon accept loop and per-connection request handling.
//!
//! Each connection gets a reader task (framing), a writer task (responses in
//! completion order) and one task per request, so a slow tool call never
//! blocks other requests or connections. Errors are turned into `{id, error}`
//! responses and never end the connection or the daemon.


use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::FutureExt;
use pw_protocol::{DaemonCall, Request, Response, RunRequest};
use pw_runtime::transport::{LineSender, LineTransport};
use pw_runtime::{Endpoint, EndpointListener, IpcStream};
use serde_json::{Value, json};
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::ToolBackend;

const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Why [`DaemonServer::serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
	/// A client sent `stop`.
	StopRequest,
	/// The shutdown future resolved (SIGINT/SIGTERM).
	Signal,
}

/// A daemon bound to its endpoint.
pub struct DaemonServer {
	endpoint: Endpoint,
	listener: EndpointListener,
	backend: Arc<dyn ToolBackend>,
}

impl DaemonServer {
	/// Binds `endpoint`. Fails with [`pw_runtime::Error::AddressInUse`] when
	/// another daemon is serving it.
	pub async fn bind(endpoint: Endpoint, backend: Arc<dyn ToolBackend>) -> pw_runtime::Result<Self> {
		let listener = endpoint.bind().await?;
		info!(target = "pw.daemon", endpoint = %endpoint, "daemon listening");
		Ok(Self { endpoint, listener, backend })
	}

	pub fn endpoint(&self) -> &Endpoint {
		&self.endpoint
	}

	/// Serves connections until a client sends `stop` or `shutdown` resolves.
	///
	/// The endpoint is closed and the backend released before returning. For
	/// `stop` both happen before the reply is sent, so a client that reconnects
	/// right after the reply starts a fresh daemon from saved state.
	pub async fn serve<F>(self, shutdown: F) -> Result<StopReason>
	where
		F: Future<Output = ()>,
	{
		let DaemonServer {
			endpoint,
			mut listener,
			backend,
		} = self;
		let (stop_tx, mut stop_rx) = mpsc::unbounded_channel::<StopSignal>();
		tokio::pin!(shutdown);
		let mut accept_failures = 0u32;
		let mut backoff: Option<Duration> = None;

		let (reason, stop) = loop {
			tokio::select! {
				Some(stop) = stop_rx.recv() => {
					info!(target = "pw.daemon", "shutdown requested via stop");
					break (StopReason::StopRequest, Some(stop));
				}
				_ = &mut shutdown => {
					info!(target = "pw.daemon", "shutdown requested via signal");
					break (StopReason::Signal, None);
				}
				_ = tokio::time::sleep(backoff.unwrap_or_default()), if backoff.is_some() => {
					backoff = None;
				}
				accept = listener.accept(), if backoff.is_none() => match accept {
					Ok(stream) => {
						accept_failures = 0;
						debug!(target = "pw.daemon", "accepted connection");
						tokio::spawn(handle_connection(stream, Arc::clone(&backend), stop_tx.clone()));
					}
					Err(err) => {
						accept_failures = accept_failures.saturating_add(1);
						let delay = accept_backoff(accept_failures);
						warn!(target = "pw.daemon", error = %err, failures = accept_failures, ?delay, "accept failed");
						backoff = Some(delay);
					}
				},
			}
		};

		drop(listener);
		debug!(target = "pw.daemon", endpoint = %endpoint, "endpoint closed");

		if let Err(err) = backend.close().await {
			warn!(target = "pw.daemon", error = %format!("{err:#}"), "error during backend shutdown");
		}

		if let Some(stop) = stop {
			let _ = stop.ready_to_reply.send(());
			let _ = stop.reply_flushed.await;
		}
		Ok(reason)
	}
}

/// Delay before accepting again after `failures` consecutive accept errors
/// (e.g. `EMFILE`): doubles from 10 ms, capped at one second.
fn accept_backoff(failures: u32) -> Duration {
	let exponent = failures.saturating_sub(1).min(16);
	ACCEPT_BACKOFF_START.saturating_mul(1 << exponent).min(ACCEPT_BACKOFF_MAX)
}

/// Handshake between a `stop` request and the accept loop.
struct StopSignal {
	/// Completed once the endpoint is closed and the backend released.
	ready_to_reply: oneshot::Sender<()>,
	/// Completed once the `stop` reply has been flushed.
	reply_flushed: oneshot::Receiver<()>,
}

/// A response queued for the writer task.
struct Outgoing {
	response: Response,
	/// Completed once the response has been written and flushed.
	flushed: Option<oneshot::Sender<()>>,
}

async fn handle_connection(stream: IpcStream, backend: Arc<dyn ToolBackend>, stop_tx: mpsc::UnboundedSender<StopSignal>) {
	let (read_half, write_half) = tokio::io::split(stream);
	let (transport, mut messages) = LineTransport::new(read_half, write_half);
	let (sender, receiver) = transport.into_parts();

	let reader = tokio::spawn(async move {
		if let Err(err) = receiver.run().await {
			debug!(target = "pw.daemon", error = %err, "connection read error");
		}
	});
	let (out_tx, out_rx) = mpsc::unbounded_channel();
	tokio::spawn(write_loop(sender, out_rx));

	while let Some(value) = messages.recv().await {
		let request: Request = match serde_json::from_value(value) {
			Ok(request) => request,
			Err(err) => {
				warn!(target = "pw.daemon", error = %err, "ignoring frame that is not a request");
				continue;
			}
		};
		tokio::spawn(handle_request(request, Arc::clone(&backend), out_tx.clone(), stop_tx.clone()));
	}

	debug!(target = "pw.daemon", "connection closed");
	let _ = reader.await;
}

async fn write_loop<W>(mut sender: LineSender<W>, mut outgoing: mpsc::UnboundedReceiver<Outgoing>)
where
	W: AsyncWrite + Unpin,
{
	while let Some(Outgoing { response, flushed }) = outgoing.recv().await {
		if let Err(err) = sender.send(&response).await {
			debug!(target = "pw.daemon", id = response.id, error = %err, "failed to write response");
		}
		if let Some(flushed) = flushed {
			let _ = flushed.send(());
		}
	}
}

async fn handle_request(request: Request, backend: Arc<dyn ToolBackend>, out: mpsc::UnboundedSender<Outgoing>, stop_tx: mpsc::UnboundedSender<StopSignal>) {
	let id = request.id;
	let call = match DaemonCall::decode(&request) {
		Ok(call) => call,
		Err(err) => {
			warn!(target = "pw.daemon", id, method = %request.method, error = %err, "rejecting request");
			let _ = out.send(Outgoing {
				response: Response::err(id, err.to_string()),
				flushed: None,
			});
			return;
		}
	};

	match call {
		DaemonCall::Run(run) => {
			let response = match run_tool(backend.as_ref(), run).await {
				Ok(result) => Response::ok(id, result),
				Err(message) => Response::err(id, message),
			};
			let _ = out.send(Outgoing { response, flushed: None });
		}
		DaemonCall::Stop(_) => {
			info!(target = "pw.daemon", id, "stop requested");
			let (ready_tx, ready_rx) = oneshot::channel();
			let (flushed_tx, flushed_rx) = oneshot::channel();
			let signal = StopSignal {
				ready_to_reply: ready_tx,
				reply_flushed: flushed_rx,
			};
			// A concurrent stop may already have ended the accept loop.
			if stop_tx.send(signal).is_ok() {
				let _ = ready_rx.await;
			}
			let _ = out.send(Outgoing {
				response: Response::ok(id, json!("ok")),
				flushed: Some(flushed_tx),
			});
		}
	}
}

async fn run_tool(backend: &dyn ToolBackend, request: RunRequest) -> std::result::Result<Value, String> {
	let Some(tool) = request.args.tool_name().map(str::to_string) else {
		return Err("Missing tool name".to_string());
	};
	let args = request.args.without_tool();

	match AssertUnwindSafe(backend.call_tool(&tool, args)).catch_unwind().await {
		Ok(Ok(result)) => Ok(result),
		Ok(Err(err)) => {
			debug!(target = "pw.daemon", tool = %tool, error = %format!("{err:#}"), "tool failed");
			Err(format!("{err:#}"))
		}
		Err(_) => {
			error!(target = "pw.daemon", tool = %tool, "tool panicked");
			Err(format!("Tool '{tool}' panicked"))
		}
	}
}
