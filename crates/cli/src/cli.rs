use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;
use crate::session::descriptor::CliOptions;
use crate::styles::cli_styles;
use crate::workspace::DEFAULT_SESSION;


#[derive(Parser, Debug)]
#[command(name = "pw")]
#[command(about = "Keep a browser session warm across pw invocations")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format: toon (default), json, ndjson, or text
	#[arg(short = 'f', long, global = true, value_enum, default_value = "toon")]
	pub format: OutputFormat,

	/// Session name; each session has its own daemon and browser state
	#[arg(short, long, global = true, env = "PW_SESSION", default_value = DEFAULT_SESSION)]
	pub session: String,

	/// Workspace directory that scopes session names (defaults to the current directory)
	#[arg(long, global = true, value_name = "DIR")]
	pub workspace: Option<PathBuf>,

	#[command(flatten)]
	pub launch: LaunchArgs,

	#[command(subcommand)]
	pub command: Commands,
}

/// Options recorded in the session descriptor when a session is first started.
///
/// They are ignored when the session's daemon is already running.
#[derive(Args, Debug, Clone, Default)]
pub struct LaunchArgs {
	/// Show the browser window
	#[arg(long, global = true)]
	pub headed: bool,

	/// Connect through the browser extension instead of launching a browser
	#[arg(long, global = true)]
	pub extension: bool,

	/// Browser to launch (chromium, chrome, msedge, firefox, webkit)
	#[arg(long, global = true, value_name = "NAME")]
	pub browser: Option<String>,

	/// Keep the session descriptor and profile when the session closes
	#[arg(long, global = true)]
	pub persistent: bool,

	/// Browser profile directory
	#[arg(long, global = true, value_name = "DIR")]
	pub profile: Option<PathBuf>,

	/// Backend configuration file, passed through to the daemon
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,
}

impl LaunchArgs {
	/// Converts flags into descriptor options, leaving unset flags out.
	pub fn to_cli_options(&self) -> CliOptions {
		CliOptions {
			headed: self.headed.then_some(true),
			extension: self.extension.then_some(true),
			browser: self.browser.clone(),
			persistent: self.persistent.then_some(true),
			profile: self.profile.as_ref().map(|p| p.display().to_string()),
			config: self.config.as_ref().map(|p| p.display().to_string()),
		}
	}
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Start the session daemon, optionally navigating to a URL
	Open {
		/// URL to open in the current tab
		url: Option<String>,
	},

	/// Stop the session daemon
	Close,

	/// List sessions and whether their daemons are running
	List {
		/// Include sessions of every workspace
		#[arg(long)]
		all: bool,
	},

	/// Stop every session of the current workspace
	CloseAll,

	/// Stop the session and delete its descriptor and browser profile
	DeleteData,

	/// Run the session daemon (spawned by the client)
	#[command(hide = true)]
	Daemon {
		/// Session descriptor to serve
		#[arg(long, value_name = "FILE")]
		session_file: PathBuf,
	},

	/// Any other command is forwarded to the session daemon
	#[command(external_subcommand)]
	Run(Vec<String>),
}

impl Commands {
	/// Command name used in the output envelope.
	pub fn name(&self) -> String {
		match self {
			Commands::Open { .. } => "open".to_string(),
			Commands::Close => "close".to_string(),
			Commands::List { .. } => "list".to_string(),
			Commands::CloseAll => "close-all".to_string(),
			Commands::DeleteData => "delete-data".to_string(),
			Commands::Daemon { .. } => "daemon".to_string(),
			Commands::Run(argv) => argv.first().cloned().unwrap_or_else(|| "run".to_string()),
		}
	}
}
