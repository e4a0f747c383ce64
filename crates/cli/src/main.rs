use clap::Parser;
use pw_cli::cli::{Cli, Commands};
use pw_cli::error::PwError;
use pw_cli::output::{self, OutputFormat, ResultBuilder};
use pw_cli::{commands, daemon, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	// The daemon reports startup on stdout and logs to the session log file.
	if let Commands::Daemon { session_file } = &cli.command {
		logging::init_daemon_logging(cli.verbose);
		let code = daemon::run(session_file).await;
		std::process::exit(code);
	}

	logging::init_logging(cli.verbose);

	let format = cli.format;
	let command = cli.command.name();

	if let Err(err) = commands::dispatch(cli).await {
		handle_error(command, err, format);
		std::process::exit(1);
	}
}

fn handle_error(command: String, err: PwError, format: OutputFormat) {
	let cmd_error = err.to_command_error();

	// Always print to stderr for humans
	output::print_error_stderr(&cmd_error);

	// Also emit the envelope on stdout with ok=false for agents
	if format != OutputFormat::Text {
		let result: output::CommandResult<()> = ResultBuilder::new(command).command_error(cmd_error).build();
		output::print_result(&result, format);
	}
}
