//! Session lifecycle commands: `close`, `list`, `close-all`, `delete-data`.

use std::fs;
use std::path::{Path, PathBuf};

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::CommandContext;
use crate::error::{PwError, Result};
use crate::output::{CloseData, DeleteDataData, ResultBuilder, SessionListData, SessionSummary, print_result};
use crate::paths::log_path_for;
use crate::registry::{Registry, SessionEntry};
use crate::session::client::is_alive;
use crate::session::{CLIENT_VERSION, SessionClient, SessionConfig};

/// `pw close`
pub async fn close(ctx: &CommandContext) -> Result<()> {
	let mut client = ctx.session_client();
	let data = stop_session(&mut client).await?;

	let result = ResultBuilder::new("close").session(client.name()).data(data).build();
	print_result(&result, ctx.format);
	Ok(())
}

async fn stop_session(client: &mut SessionClient) -> Result<CloseData> {
	let was_running = client.stop().await?;
	Ok(CloseData {
		session: client.name().to_string(),
		was_running,
		descriptor_removed: !client.descriptor_path().exists(),
	})
}

/// `pw list [--all]`
///
/// Liveness is decided by connecting. Dead sessions that are not persistent
/// have their descriptor, log and stale endpoint removed.
pub async fn list(ctx: &CommandContext, all: bool) -> Result<()> {
	let registry = Registry::load(ctx.paths.sessions_base());
	let entries: Vec<(String, &SessionEntry)> = if all {
		registry
			.workspaces()
			.flat_map(|(workspace, entries)| entries.iter().map(move |entry| (workspace.to_string(), entry)))
			.collect()
	} else {
		let workspace = ctx.scope.key();
		registry.entries(&ctx.scope).into_iter().map(|entry| (workspace.clone(), entry)).collect()
	};

	let liveness = join_all(entries.iter().map(|(_, entry)| async move { is_alive(&entry.config.endpoint()).await })).await;

	let mut data = SessionListData {
		sessions: Vec::new(),
		collected: Vec::new(),
	};
	for ((workspace, entry), alive) in entries.into_iter().zip(liveness) {
		if !alive && !entry.config.is_persistent() {
			match collect_dead(entry) {
				Ok(()) => {
					data.collected.push(entry.file.clone());
					continue;
				}
				Err(err) => warn!(target = "pw.registry", file = %entry.file.display(), error = %err, "failed to remove dead session"),
			}
		}

		data.sessions.push(SessionSummary {
			name: entry.config.name.clone(),
			workspace,
			version: entry.config.version.clone(),
			endpoint: entry.config.socket_path.clone(),
			alive,
			persistent: entry.config.is_persistent(),
			compatible: entry.config.version == CLIENT_VERSION,
		});
	}

	let result = ResultBuilder::new("list").data(data).build();
	print_result(&result, ctx.format);
	Ok(())
}

fn collect_dead(entry: &SessionEntry) -> Result<()> {
	let endpoint = entry.config.endpoint();
	if endpoint.remove_stale()? {
		debug!(target = "pw.registry", endpoint = %endpoint, "removed stale endpoint");
	}
	remove_file_if_exists(&log_path_for(&entry.file))?;
	SessionConfig::delete(&entry.file)?;
	info!(target = "pw.registry", session = %entry.config.name, file = %entry.file.display(), "collected dead session");
	Ok(())
}

/// `pw close-all`
pub async fn close_all(ctx: &CommandContext) -> Result<()> {
	let registry = Registry::load(ctx.paths.sessions_base());
	let mut clients: Vec<SessionClient> = registry.entries(&ctx.scope).into_iter().map(SessionClient::from_entry).collect();

	let outcomes = join_all(clients.iter_mut().map(|client| async move {
		let outcome = stop_session(client).await;
		(client.name().to_string(), outcome)
	}))
	.await;

	let mut closed = Vec::new();
	let mut failures = Vec::new();
	for (name, outcome) in outcomes {
		match outcome {
			Ok(data) => closed.push(data),
			Err(err) => {
				warn!(target = "pw.session", session = %name, error = %err, "failed to close session");
				failures.push(format!("{name}: {err}"));
			}
		}
	}
	if !failures.is_empty() {
		return Err(PwError::Context(format!("failed to close {} session(s): {}", failures.len(), failures.join("; "))));
	}

	let result = ResultBuilder::new("close-all").data(closed).build();
	print_result(&result, ctx.format);
	Ok(())
}

/// `pw delete-data`
///
/// Stops the session, then removes its descriptor, log and browser profiles,
/// including those of persistent sessions. A `--profile` directory chosen by
/// the user is never removed.
pub async fn delete_data(ctx: &CommandContext) -> Result<()> {
	let mut client = ctx.session_client();
	let had_descriptor = client.descriptor_path().exists();
	let was_running = client.stop().await?;
	if !had_descriptor && !was_running {
		return Err(PwError::SessionNotFound(client.name().to_string()));
	}

	let mut removed = Vec::new();
	for dir in profile_dirs(client.config()) {
		fs::remove_dir_all(&dir)?;
		info!(target = "pw.session", dir = %dir.display(), "removed browser profile");
		removed.push(dir);
	}
	for file in [client.descriptor_path().to_path_buf(), client.log_path()] {
		if remove_file_if_exists(&file)? {
			removed.push(file);
		}
	}

	let data = DeleteDataData {
		session: client.name().to_string(),
		was_running,
		removed,
	};
	let result = ResultBuilder::new("delete-data").session(client.name()).data(data).build();
	print_result(&result, ctx.format);
	Ok(())
}

/// Browser profile directories the daemon created for this session.
fn profile_dirs(config: &SessionConfig) -> Vec<PathBuf> {
	let user_profile = config.cli.profile.as_deref().map(Path::new);
	let reported = config
		.resolved_config
		.as_ref()
		.and_then(|resolved| resolved["browser"]["userDataDir"].as_str())
		.map(PathBuf::from);
	let derived = config.user_data_dir_prefix.as_ref().map(|prefix| {
		let mut dir = prefix.clone().into_os_string();
		dir.push(format!("-{}", config.browser()));
		PathBuf::from(dir)
	});

	let mut dirs: Vec<PathBuf> = reported.into_iter().chain(derived).filter(|dir| Some(dir.as_path()) != user_profile && dir.is_dir()).collect();
	dirs.dedup();
	dirs
}

fn remove_file_if_exists(path: &Path) -> Result<bool> {
	match fs::remove_file(path) {
		Ok(()) => Ok(true),
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
		Err(err) => Err(err.into()),
	}
}
