//! Commands forwarded to the session daemon.

use pw_protocol::CommandArgs;
use tracing::debug;

use super::CommandContext;
use crate::error::{PwError, Result};
use crate::output::{ResultBuilder, print_result};

/// `pw <tool> [args..]`
pub async fn forward(ctx: &CommandContext, argv: Vec<String>) -> Result<()> {
	let Some(tool) = argv.first().cloned() else {
		return Err(PwError::InvalidInput("missing command".into()));
	};
	execute(ctx, &tool, CommandArgs::parse(&argv)).await
}

/// `pw open [url]`
pub async fn open(ctx: &CommandContext, url: Option<String>) -> Result<()> {
	let argv: Vec<String> = std::iter::once("open".to_string()).chain(url).collect();
	execute(ctx, "open", CommandArgs::parse(&argv)).await
}

async fn execute(ctx: &CommandContext, command: &str, args: CommandArgs) -> Result<()> {
	let mut client = ctx.launch_client();
	debug!(target = "pw.session", session = %client.name(), command, "forwarding command");
	let value = client.run(args).await?;

	let result = ResultBuilder::new(command).session(client.name()).data(value).build();
	print_result(&result, ctx.format);
	Ok(())
}
