//! Client side of one named session.
//!
//! [`SessionClient`] resolves the session's descriptor, connects to its
//! daemon and, when no daemon answers, spawns one and waits for its readiness
//! report. Staleness is only ever decided by a failed connect; the descriptor
//! on disk says nothing about liveness.


use std::ffi::OsString;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use pw_protocol::{CommandArgs, DaemonCall};
use pw_runtime::{Connection, Endpoint};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::descriptor::{CLIENT_VERSION, CliOptions, SessionConfig, now_ts};
use super::spawn::{STDERR_TAIL_LINES, StartupError, spawn_and_await_ready, stderr_tail};
use crate::error::{PwError, Result};
use crate::paths::{DaemonPaths, log_path_for};
use crate::registry::{Registry, SessionEntry};
use crate::workspace::{WorkspaceScope, normalize_session};

/// Connect attempts after a daemon reported readiness.
const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

pub struct SessionClient {
	config: SessionConfig,
	descriptor_path: PathBuf,
	client_version: String,
	daemon_program: Option<(PathBuf, Vec<OsString>)>,
	connection: Option<Connection>,
}

impl SessionClient {
	/// Resolves session `name` in `scope`: the persisted descriptor when one
	/// exists, otherwise a fresh one built from `cli`.
	///
	/// Options set in `cli` override the persisted ones; they only take effect
	/// when the daemon is (re)spawned.
	pub fn resolve(paths: &DaemonPaths, scope: &WorkspaceScope, name: &str, cli: CliOptions) -> Self {
		let name = normalize_session(name);
		let registry = Registry::load(paths.sessions_base());
		match registry.entry(scope, &name) {
			Some(entry) => {
				debug!(target = "pw.session", session = %name, file = %entry.file.display(), "using persisted descriptor");
				let mut client = Self::from_entry(entry);
				client.config.cli.overlay(&cli);
				client
			}
			None => {
				debug!(target = "pw.session", session = %name, "no descriptor, using fresh config");
				let config = SessionConfig::new(paths, scope, &name, cli);
				Self::new(config, paths.descriptor_path(scope.hash(), &name))
			}
		}
	}

	pub fn from_entry(entry: &SessionEntry) -> Self {
		Self::new(entry.config.clone(), entry.file.clone())
	}

	fn new(config: SessionConfig, descriptor_path: PathBuf) -> Self {
		Self {
			config,
			descriptor_path,
			client_version: CLIENT_VERSION.to_string(),
			daemon_program: None,
			connection: None,
		}
	}

	/// Overrides the version compared against the descriptor.
	#[cfg(test)]
	pub(crate) fn with_client_version(mut self, version: impl Into<String>) -> Self {
		self.client_version = version.into();
		self
	}

	/// Runs `program [args..] daemon --session-file <path>` instead of the
	/// current executable when spawning.
	#[cfg(test)]
	pub(crate) fn with_daemon_program<I, S>(mut self, program: impl Into<PathBuf>, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<OsString>,
	{
		self.daemon_program = Some((program.into(), args.into_iter().map(Into::into).collect()));
		self
	}

	pub fn name(&self) -> &str {
		&self.config.name
	}

	pub fn config(&self) -> &SessionConfig {
		&self.config
	}

	pub fn descriptor_path(&self) -> &Path {
		&self.descriptor_path
	}

	pub fn log_path(&self) -> PathBuf {
		log_path_for(&self.descriptor_path)
	}

	pub fn endpoint(&self) -> Endpoint {
		self.config.endpoint()
	}

	/// Runs a tool in the session daemon, starting the daemon when needed.
	///
	/// Fails with [`PwError::VersionMismatch`] before touching the endpoint when
	/// the descriptor was written by another `pw` version. A connection that
	/// closes before the response arrives is treated as a dead daemon: the
	/// request is sent once more over a fresh connection, respawning if needed.
	pub async fn run(&mut self, args: CommandArgs) -> Result<Value> {
		self.config.check_version(&self.client_version)?;

		match self.send_run(args.clone()).await {
			Err(PwError::Runtime(err)) if err.is_closed() => {
				warn!(target = "pw.session", session = %self.config.name, error = %err, "connection closed mid-request, reconnecting");
				self.connection = None;
				self.send_run(args).await
			}
			result => result,
		}
	}

	async fn send_run(&mut self, args: CommandArgs) -> Result<Value> {
		if self.connection.as_ref().is_none_or(Connection::is_closed) {
			self.connection = Some(self.connect_or_spawn().await?);
		}
		let Some(connection) = self.connection.as_ref() else {
			return Err(PwError::Context(format!("session '{}' has no connection", self.config.name)));
		};

		connection.send(DaemonCall::run(args)).await.map_err(|err| match err {
			pw_runtime::Error::Remote(message) => PwError::Command(message),
			other => other.into(),
		})
	}

	/// Stops the session daemon. Returns whether one was running.
	///
	/// Calling this with no daemon running is not an error. The descriptor is
	/// deleted unless the session is persistent.
	pub async fn stop(&mut self) -> Result<bool> {
		let connection = match self.connection.take() {
			Some(connection) if !connection.is_closed() => Some(connection),
			_ => self.connect_existing().await?,
		};

		let was_running = connection.is_some();
		if let Some(connection) = connection {
			match connection.send(DaemonCall::stop()).await {
				Ok(_) => info!(target = "pw.session", session = %self.config.name, "daemon stopped"),
				Err(err) if err.is_closed() => {
					debug!(target = "pw.session", session = %self.config.name, "connection closed while stopping");
				}
				Err(err) => return Err(err.into()),
			}
			match connection.close().await {
				Err(err) if !err.is_closed() => return Err(err.into()),
				_ => {}
			}
		}

		if !self.config.is_persistent() && SessionConfig::delete(&self.descriptor_path)? {
			debug!(target = "pw.session", file = %self.descriptor_path.display(), "descriptor deleted");
		}
		Ok(was_running)
	}

	/// Returns true when a daemon accepts connections on the session endpoint.
	pub async fn is_alive(&self) -> bool {
		is_alive(&self.config.endpoint()).await
	}

	/// Connects to a running daemon. A stale endpoint left by a dead daemon
	/// is removed and `None` returned.
	async fn connect_existing(&self) -> Result<Option<Connection>> {
		let endpoint = self.config.endpoint();
		match Connection::connect(&endpoint).await {
			Ok(connection) => {
				debug!(target = "pw.session", endpoint = %endpoint, "connected to running daemon");
				Ok(Some(connection))
			}
			Err(err) if err.is_not_running() => {
				debug!(target = "pw.session", endpoint = %endpoint, error = %err, "daemon not running");
				if endpoint.remove_stale()? {
					debug!(target = "pw.session", endpoint = %endpoint, "removed stale endpoint");
				}
				Ok(None)
			}
			Err(err) => Err(err.into()),
		}
	}

	async fn connect_or_spawn(&mut self) -> Result<Connection> {
		match self.connect_existing().await? {
			Some(connection) => Ok(connection),
			None => self.spawn().await,
		}
	}

	async fn spawn(&mut self) -> Result<Connection> {
		self.config.save(&self.descriptor_path)?;

		let log_path = self.log_path();
		// One log per spawn attempt.
		let log = OpenOptions::new().create(true).write(true).truncate(true).open(&log_path)?;

		let mut command = self.daemon_command()?;
		command.arg("daemon").arg("--session-file").arg(&self.descriptor_path).stderr(Stdio::from(log));

		info!(target = "pw.session", session = %self.config.name, log = %log_path.display(), "starting daemon");
		let ready = spawn_and_await_ready(command).await.map_err(|err| {
			let stderr_tail = match &err {
				StartupError::Spawn(_) => String::new(),
				_ => stderr_tail(&log_path, STDERR_TAIL_LINES),
			};
			PwError::DaemonStartup {
				session: self.config.name.clone(),
				message: err.to_string(),
				stderr_tail,
			}
		})?;

		let endpoint = ready.endpoint.unwrap_or_else(|| self.config.endpoint());
		let connection = connect_with_retry(&self.config.name, &endpoint).await?;

		self.config.resolved_config = ready.config;
		self.config.timestamp = now_ts();
		self.config.save(&self.descriptor_path)?;
		Ok(connection)
	}

	fn daemon_command(&self) -> Result<Command> {
		match &self.daemon_program {
			Some((program, args)) => {
				let mut command = Command::new(program);
				command.args(args);
				Ok(command)
			}
			None => Ok(Command::new(std::env::current_exe()?)),
		}
	}
}

/// Returns true when a daemon accepts connections on `endpoint`.
pub async fn is_alive(endpoint: &Endpoint) -> bool {
	endpoint.connect().await.is_ok()
}

/// Connects to a freshly started daemon, retrying briefly.
pub async fn connect_with_retry(session: &str, endpoint: &Endpoint) -> Result<Connection> {
	let mut last_error = String::new();
	for attempt in 1..=CONNECT_ATTEMPTS {
		match Connection::connect(endpoint).await {
			Ok(connection) => return Ok(connection),
			Err(err) => {
				debug!(target = "pw.session", attempt, endpoint = %endpoint, error = %err, "connect failed");
				last_error = err.to_string();
			}
		}
		if attempt < CONNECT_ATTEMPTS {
			tokio::time::sleep(CONNECT_RETRY_DELAY).await;
		}
	}
	Err(PwError::ConnectTimeout {
		session: session.to_string(),
		endpoint: endpoint.path().to_path_buf(),
		last_error,
	})
}
