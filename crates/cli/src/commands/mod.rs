//! Top-level command dispatch.
//!
//! Every command resolves the same [`CommandContext`] (paths, workspace,
//! session name) and prints one result envelope.

mod run;
mod session;

use crate::cli::{Cli, Commands};
use crate::error::{PwError, Result};
use crate::output::OutputFormat;
use crate::paths::DaemonPaths;
use crate::session::{CliOptions, SessionClient};
use crate::workspace::{WorkspaceScope, normalize_session};

/// State shared by every command of one invocation.
#[derive(Debug, Clone)]
pub struct CommandContext {
	pub paths: DaemonPaths,
	pub scope: WorkspaceScope,
	/// Normalized session name.
	pub session: String,
	/// Launch flags given on the command line.
	pub launch: CliOptions,
	pub format: OutputFormat,
}

impl CommandContext {
	pub fn from_cli(cli: &Cli) -> Result<Self> {
		Ok(Self {
			paths: DaemonPaths::from_env(),
			scope: WorkspaceScope::resolve(cli.workspace.as_deref())?,
			session: normalize_session(&cli.session),
			launch: cli.launch.to_cli_options(),
			format: cli.format,
		})
	}

	/// Client for commands that may start the daemon; launch flags apply.
	pub fn launch_client(&self) -> SessionClient {
		SessionClient::resolve(&self.paths, &self.scope, &self.session, self.launch.clone())
	}

	/// Client for lifecycle commands, which never start a daemon.
	pub fn session_client(&self) -> SessionClient {
		SessionClient::resolve(&self.paths, &self.scope, &self.session, CliOptions::default())
	}
}

pub async fn dispatch(cli: Cli) -> Result<()> {
	let ctx = CommandContext::from_cli(&cli)?;

	match cli.command {
		Commands::Open { url } => run::open(&ctx, url).await,
		Commands::Run(argv) => run::forward(&ctx, argv).await,
		Commands::Close => session::close(&ctx).await,
		Commands::List { all } => session::list(&ctx, all).await,
		Commands::CloseAll => session::close_all(&ctx).await,
		Commands::DeleteData => session::delete_data(&ctx).await,
		Commands::Daemon { .. } => Err(PwError::InvalidInput("`pw daemon` is started by pw itself".into())),
	}
}
