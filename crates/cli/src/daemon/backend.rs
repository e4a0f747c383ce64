//! Tool backend owned by the daemon.
//!
//! The daemon hands every `run` call to a [`ToolBackend`]. The built-in
//! [`InMemoryBackend`] keeps tabs and cookies for the lifetime of the daemon,
//! which is exactly the state a warm session exists to preserve.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use pw_protocol::CommandArgs;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::session::descriptor::SessionConfig;

const BLANK_URL: &str = "about:blank";
const COOKIE_FILE: &str = "cookies.json";

/// Executes tool calls for one session.
///
/// Implementations serialize browser-driving calls themselves; the daemon
/// invokes `call_tool` concurrently for concurrent requests.
#[async_trait]
pub trait ToolBackend: Send + Sync {
	/// Runs tool `name`. `args` excludes the tool name itself.
	async fn call_tool(&self, name: &str, args: CommandArgs) -> Result<Value>;

	/// Configuration the backend resolved at startup, reported in the
	/// daemon's readiness handshake.
	fn resolved_config(&self) -> Value;

	/// Releases browser resources during graceful shutdown.
	async fn close(&self) -> Result<()>;
}

#[derive(Debug, Clone, Serialize)]
struct Tab {
	id: u64,
	url: String,
	title: String,
}

impl Tab {
	fn navigate(&mut self, url: &str) {
		self.url = url.to_string();
		self.title = title_for(url);
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Cookie {
	name: String,
	value: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	domain: Option<String>,
	path: String,
}

#[derive(Debug, Default)]
struct BrowserState {
	launched: bool,
	tabs: Vec<Tab>,
	current: usize,
	next_tab_id: u64,
	cookies: Vec<Cookie>,
}

impl BrowserState {
	fn open_tab(&mut self, url: &str) -> usize {
		self.next_tab_id += 1;
		self.tabs.push(Tab {
			id: self.next_tab_id,
			url: url.to_string(),
			title: title_for(url),
		});
		self.tabs.len() - 1
	}

	fn current_tab(&mut self) -> &mut Tab {
		if self.tabs.is_empty() {
			self.current = self.open_tab(BLANK_URL);
		}
		&mut self.tabs[self.current]
	}

	fn tab_list(&self) -> Value {
		let tabs: Vec<Value> = self
			.tabs
			.iter()
			.enumerate()
			.map(|(index, tab)| {
				json!({
					"index": index,
					"id": tab.id,
					"url": tab.url,
					"title": tab.title,
					"current": index == self.current,
				})
			})
			.collect();
		Value::Array(tabs)
	}

	fn tab_index(&self, raw: Option<&str>) -> Result<usize> {
		let raw = raw.ok_or_else(|| anyhow!("Missing required argument: index"))?;
		let index: usize = raw.parse().map_err(|_| anyhow!("Invalid tab index: {raw}"))?;
		if index >= self.tabs.len() {
			bail!("Tab {index} not found ({} open)", self.tabs.len());
		}
		Ok(index)
	}
}

/// Backend holding browser state in daemon memory.
pub struct InMemoryBackend {
	browser_name: String,
	headless: bool,
	extension: bool,
	persistent: bool,
	user_data_dir: Option<PathBuf>,
	/// The profile was derived from the session; `--profile` dirs belong to the user.
	owns_user_data_dir: bool,
	config_file: Option<String>,
	state: Mutex<BrowserState>,
}

impl InMemoryBackend {
	pub fn new(config: &SessionConfig) -> Self {
		let browser_name = config.browser().to_string();
		let user_data_dir = match &config.cli.profile {
			Some(profile) => Some(PathBuf::from(profile)),
			None => config.user_data_dir_prefix.as_ref().map(|prefix| {
				let mut dir = prefix.clone().into_os_string();
				dir.push(format!("-{browser_name}"));
				PathBuf::from(dir)
			}),
		};

		Self {
			headless: !config.cli.headed.unwrap_or(false),
			extension: config.cli.extension.unwrap_or(false),
			persistent: config.is_persistent(),
			config_file: config.cli.config.clone(),
			owns_user_data_dir: config.cli.profile.is_none(),
			user_data_dir,
			browser_name,
			state: Mutex::new(BrowserState::default()),
		}
	}

	fn launch(&self, state: &mut BrowserState) -> Result<()> {
		if state.launched {
			return Ok(());
		}
		if let Some(dir) = &self.user_data_dir {
			std::fs::create_dir_all(dir).with_context(|| format!("Failed to create user data dir: {}", dir.display()))?;
			if self.persistent {
				state.cookies = load_cookies(dir)?;
			}
		}
		state.current = state.open_tab(BLANK_URL);
		state.launched = true;
		info!(target = "pw.daemon", browser = %self.browser_name, headless = self.headless, "browser launched");
		Ok(())
	}
}

#[async_trait]
impl ToolBackend for InMemoryBackend {
	async fn call_tool(&self, name: &str, args: CommandArgs) -> Result<Value> {
		let mut state = self.state.lock().await;
		self.launch(&mut state)?;
		debug!(target = "pw.daemon", tool = name, "calling tool");

		match name {
			"open" => {
				let tab = state.current_tab();
				if let Some(url) = args.arg(0) {
					tab.navigate(url);
				}
				Ok(json!(tab))
			}
			"goto" => {
				let url = args.arg(0).ok_or_else(|| anyhow!("Missing required argument: url"))?;
				let tab = state.current_tab();
				tab.navigate(url);
				Ok(json!(tab))
			}
			"tab-list" => Ok(state.tab_list()),
			"tab-new" => {
				let index = state.open_tab(args.arg(0).unwrap_or(BLANK_URL));
				state.current = index;
				Ok(state.tab_list())
			}
			"tab-select" => {
				state.current = state.tab_index(args.arg(0))?;
				Ok(state.tab_list())
			}
			"tab-close" => {
				let index = match args.arg(0) {
					Some(raw) => state.tab_index(Some(raw))?,
					None => state.current,
				};
				if index < state.tabs.len() {
					state.tabs.remove(index);
				}
				if state.current >= index && state.current > 0 {
					state.current -= 1;
				}
				state.current_tab();
				Ok(state.tab_list())
			}
			"cookie-list" => {
				let domain = args.str_option("domain");
				let cookies: Vec<&Cookie> = state.cookies.iter().filter(|c| domain.is_none() || c.domain.as_deref() == domain).collect();
				Ok(json!(cookies))
			}
			"cookie-set" => {
				let name = args.arg(0).ok_or_else(|| anyhow!("Missing required argument: name"))?;
				let value = args.arg(1).ok_or_else(|| anyhow!("Missing required argument: value"))?;
				let cookie = Cookie {
					name: name.to_string(),
					value: value.to_string(),
					domain: args.str_option("domain").map(str::to_string),
					path: args.str_option("path").unwrap_or("/").to_string(),
				};
				state.cookies.retain(|c| !(c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path));
				state.cookies.push(cookie.clone());
				Ok(json!(cookie))
			}
			"cookie-delete" => {
				let name = args.arg(0).ok_or_else(|| anyhow!("Missing required argument: name"))?;
				let domain = args.str_option("domain");
				let before = state.cookies.len();
				state.cookies.retain(|c| !(c.name == name && (domain.is_none() || c.domain.as_deref() == domain)));
				Ok(json!({ "deleted": before - state.cookies.len() }))
			}
			"cookie-clear" => {
				let deleted = state.cookies.len();
				state.cookies.clear();
				Ok(json!({ "deleted": deleted }))
			}
			"snapshot" => {
				let tab = state.current_tab().clone();
				Ok(json!({
					"url": tab.url,
					"title": tab.title,
					"tabs": state.tab_list(),
					"cookieCount": state.cookies.len(),
				}))
			}
			other => bail!("Unknown tool: {other}"),
		}
	}

	fn resolved_config(&self) -> Value {
		json!({
			"browser": {
				"browserName": self.browser_name,
				"userDataDir": self.user_data_dir,
				"launchOptions": { "headless": self.headless },
			},
			"extension": self.extension,
			"persistent": self.persistent,
			"configFile": self.config_file,
		})
	}

	async fn close(&self) -> Result<()> {
		let mut state = self.state.lock().await;
		if !state.launched {
			return Ok(());
		}
		if let Some(dir) = &self.user_data_dir {
			if self.persistent {
				save_cookies(dir, &state.cookies)?;
			} else if self.owns_user_data_dir {
				match std::fs::remove_dir_all(dir) {
					Ok(()) => {}
					Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
					Err(err) => return Err(err).with_context(|| format!("Failed to remove user data dir: {}", dir.display())),
				}
			}
		}
		*state = BrowserState::default();
		info!(target = "pw.daemon", browser = %self.browser_name, "browser closed");
		Ok(())
	}
}

fn load_cookies(dir: &Path) -> Result<Vec<Cookie>> {
	let path = dir.join(COOKIE_FILE);
	match std::fs::read_to_string(&path) {
		Ok(content) => serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display())),
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
		Err(err) => Err(err).with_context(|| format!("Failed to read {}", path.display())),
	}
}

fn save_cookies(dir: &Path, cookies: &[Cookie]) -> Result<()> {
	let path = dir.join(COOKIE_FILE);
	let content = serde_json::to_string_pretty(cookies)?;
	std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Host part of `url`, used as a stand-in page title.
fn title_for(url: &str) -> String {
	if url == BLANK_URL {
		return String::new();
	}
	let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
	rest.split(['/', '?', '#']).next().unwrap_or(rest).to_string()
}
