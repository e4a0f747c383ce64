//! End-to-end session lifecycle through the real `pw` binary.
//!
//! Descriptor and socket directories are redirected into a temp dir with the
//! `PW_DAEMON_*` environment hooks, so every test owns its sessions.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use pw_cli::paths::{DaemonPaths, SESSIONS_DIR_ENV};
use pw_cli::session::{CliOptions, SessionConfig};
use pw_cli::workspace::WorkspaceScope;
use pw_runtime::endpoint::SOCKETS_DIR_ENV;
use serde_json::Value;
use tempfile::TempDir;

struct TestEnv {
	dir: TempDir,
	workspace: PathBuf,
}

impl TestEnv {
	fn new() -> Self {
		let dir = tempfile::tempdir().unwrap();
		let workspace = dir.path().join("project");
		std::fs::create_dir_all(&workspace).unwrap();
		Self { dir, workspace }
	}

	fn paths(&self) -> DaemonPaths {
		DaemonPaths::new(self.dir.path().join("sessions"), self.dir.path().join("sockets"))
	}

	fn scope(&self) -> WorkspaceScope {
		WorkspaceScope::from_root(self.workspace.clone())
	}

	fn descriptor(&self, session: &str) -> PathBuf {
		self.paths().descriptor_path(self.scope().hash(), session)
	}

	fn socket(&self, session: &str) -> PathBuf {
		self.paths().endpoint(self.scope().hash(), session).path().to_path_buf()
	}

	fn command(&self) -> Command {
		let paths = self.paths();
		let mut command = Command::new(env!("CARGO_BIN_EXE_pw"));
		command
			.env(SESSIONS_DIR_ENV, paths.sessions_base())
			.env(SOCKETS_DIR_ENV, paths.sockets_base())
			.env_remove("PW_SESSION")
			.env_remove("RUST_LOG");
		command
	}

	fn pw(&self, args: &[&str]) -> Output {
		self.command()
			.arg("--workspace")
			.arg(&self.workspace)
			.args(["-f", "json"])
			.args(args)
			.output()
			.unwrap()
	}

	/// Runs `pw` and parses the JSON envelope, asserting the exit status.
	fn envelope(&self, args: &[&str], expect_ok: bool) -> Value {
		let output = self.pw(args);
		let stdout = String::from_utf8_lossy(&output.stdout);
		let stderr = String::from_utf8_lossy(&output.stderr);
		assert_eq!(output.status.success(), expect_ok, "pw {args:?}\nstdout: {stdout}\nstderr: {stderr}");
		let envelope: Value = serde_json::from_str(&stdout).unwrap_or_else(|err| panic!("pw {args:?} printed invalid JSON ({err}): {stdout}"));
		assert_eq!(envelope["ok"], expect_ok);
		envelope
	}

	fn ok(&self, args: &[&str]) -> Value {
		self.envelope(args, true)
	}

	fn fails(&self, args: &[&str]) -> Value {
		self.envelope(args, false)
	}

	fn write_descriptor(&self, session: &str, cli: CliOptions, version: &str) -> SessionConfig {
		let mut config = SessionConfig::new(&self.paths(), &self.scope(), session, cli);
		config.version = version.to_string();
		config.save(&self.descriptor(session)).unwrap();
		config
	}
}

impl Drop for TestEnv {
	fn drop(&mut self) {
		let _ = self.pw(&["close-all"]);
	}
}

fn load(path: &Path) -> SessionConfig {
	SessionConfig::load(path).unwrap().expect("descriptor exists")
}

#[test]
fn open_spawns_daemon_and_keeps_state_between_invocations() {
	let env = TestEnv::new();

	let opened = env.ok(&["open"]);
	assert_eq!(opened["command"], "open");
	assert_eq!(opened["session"], "default");
	assert_eq!(opened["data"]["url"], "about:blank");

	let descriptor = load(&env.descriptor("default"));
	let resolved = descriptor.resolved_config.expect("resolvedConfig recorded after spawn");
	assert_eq!(resolved["browser"]["browserName"], "chromium");
	assert!(descriptor.timestamp > 0);
	assert!(env.socket("default").exists());

	env.ok(&["goto", "https://example.com/docs"]);
	let tabs = env.ok(&["tab-list"]);
	assert_eq!(tabs["data"][0]["url"], "https://example.com/docs");

	let listed = env.ok(&["list"]);
	assert_eq!(listed["data"]["sessions"][0]["name"], "default");
	assert_eq!(listed["data"]["sessions"][0]["alive"], true);
	assert_eq!(listed["data"]["sessions"][0]["compatible"], true);

	let closed = env.ok(&["close"]);
	assert_eq!(closed["data"]["wasRunning"], true);
	assert_eq!(closed["data"]["descriptorRemoved"], true);
	assert!(!env.descriptor("default").exists());
	assert!(!env.socket("default").exists());
}

#[test]
fn stale_socket_is_replaced_by_fresh_daemon() {
	let env = TestEnv::new();
	env.write_descriptor("default", CliOptions::default(), env!("CARGO_PKG_VERSION"));

	let socket = env.socket("default");
	std::fs::create_dir_all(socket.parent().unwrap()).unwrap();
	drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());
	assert!(socket.exists());

	let page = env.ok(&["goto", "https://example.com"]);
	assert_eq!(page["data"]["url"], "https://example.com");
	assert!(load(&env.descriptor("default")).resolved_config.is_some());

	env.ok(&["close"]);
}

#[test]
fn second_daemon_reports_address_in_use() {
	let env = TestEnv::new();
	env.ok(&["open"]);

	let output = env.command().arg("daemon").arg("--session-file").arg(env.descriptor("default")).output().unwrap();
	let stdout = String::from_utf8_lossy(&output.stdout);
	assert!(!output.status.success());
	assert!(stdout.starts_with("### Error\n"), "stdout: {stdout}");
	assert!(stdout.contains("in use"), "stdout: {stdout}");
	assert!(stdout.trim_end().ends_with("<EOF>"), "stdout: {stdout}");

	// The first daemon is unaffected.
	env.ok(&["tab-list"]);
	env.ok(&["close"]);
}

#[test]
fn version_mismatch_is_reported_before_connecting() {
	let env = TestEnv::new();
	env.write_descriptor("default", CliOptions::default(), "0.0.1");

	let failed = env.fails(&["open"]);
	assert_eq!(failed["error"]["code"], "VERSION_MISMATCH");
	assert!(failed["error"]["message"].as_str().unwrap().contains("pw close -s default"));
	assert!(!env.socket("default").exists());
	assert!(!pw_cli::paths::log_path_for(&env.descriptor("default")).exists());

	// `close` still works and clears the outdated descriptor.
	let closed = env.ok(&["close"]);
	assert_eq!(closed["data"]["wasRunning"], false);
	assert!(!env.descriptor("default").exists());
}

#[test]
fn close_is_idempotent() {
	let env = TestEnv::new();
	for _ in 0..2 {
		let closed = env.ok(&["close"]);
		assert_eq!(closed["data"]["wasRunning"], false);
	}
}

#[test]
fn tool_errors_keep_the_daemon_running() {
	let env = TestEnv::new();

	let failed = env.fails(&["frobnicate", "--fast"]);
	assert_eq!(failed["error"]["code"], "COMMAND_FAILED");
	assert_eq!(failed["error"]["message"], "Unknown tool: frobnicate");

	let tabs = env.ok(&["tab-list"]);
	assert_eq!(tabs["data"].as_array().unwrap().len(), 1);
	env.ok(&["close"]);
}

#[test]
fn sessions_are_isolated_by_name() {
	let env = TestEnv::new();
	env.ok(&["-s", "one", "goto", "https://one.test"]);
	env.ok(&["-s", "two", "goto", "https://two.test"]);

	assert_eq!(env.ok(&["-s", "one", "tab-list"])["data"][0]["url"], "https://one.test");
	assert_eq!(env.ok(&["-s", "two", "tab-list"])["data"][0]["url"], "https://two.test");

	let closed = env.ok(&["close-all"]);
	assert_eq!(closed["data"].as_array().unwrap().len(), 2);
	assert!(!env.socket("one").exists());
	assert!(!env.socket("two").exists());
}

#[test]
fn list_collects_dead_sessions_but_keeps_persistent_ones() {
	let env = TestEnv::new();
	let version = env!("CARGO_PKG_VERSION");
	env.write_descriptor("gone", CliOptions::default(), version);
	env.write_descriptor(
		"kept",
		CliOptions {
			persistent: Some(true),
			..Default::default()
		},
		version,
	);

	let listed = env.ok(&["list"]);
	let sessions = listed["data"]["sessions"].as_array().unwrap();
	assert_eq!(sessions.len(), 1);
	assert_eq!(sessions[0]["name"], "kept");
	assert_eq!(sessions[0]["alive"], false);
	assert_eq!(sessions[0]["persistent"], true);

	let collected: Vec<PathBuf> = serde_json::from_value(listed["data"]["collected"].clone()).unwrap();
	assert_eq!(collected, vec![env.descriptor("gone")]);
	assert!(!env.descriptor("gone").exists());
	assert!(env.descriptor("kept").exists());
}

#[test]
fn persistent_session_keeps_profile_until_delete_data() {
	let env = TestEnv::new();
	env.ok(&["--persistent", "open"]);
	env.ok(&["cookie-set", "sid", "abc"]);

	let closed = env.ok(&["close"]);
	assert_eq!(closed["data"]["descriptorRemoved"], false);

	let cookies = env.ok(&["cookie-list"]);
	assert_eq!(cookies["data"][0]["value"], "abc");

	let deleted = env.ok(&["delete-data"]);
	assert_eq!(deleted["data"]["wasRunning"], true);
	let removed: Vec<PathBuf> = serde_json::from_value(deleted["data"]["removed"].clone()).unwrap();
	assert!(removed.iter().any(|path| path.ends_with("ud-default-chromium")), "removed: {removed:?}");
	assert!(removed.contains(&env.descriptor("default")));
	assert!(!env.descriptor("default").exists());
}

#[test]
fn delete_data_of_unknown_session_fails() {
	let env = TestEnv::new();
	let failed = env.fails(&["-s", "nobody", "delete-data"]);
	assert_eq!(failed["error"]["code"], "SESSION_ERROR");
	assert!(failed["error"]["message"].as_str().unwrap().contains("session not found: nobody"));
}

#[test]
fn daemon_hanging_up_mid_request_is_replaced() {
	use std::io::BufRead;

	let env = TestEnv::new();
	let socket = env.socket("default");
	std::fs::create_dir_all(socket.parent().unwrap()).unwrap();
	let listener = std::os::unix::net::UnixListener::bind(&socket).unwrap();

	// Accepts one client, stops listening, reads its request and hangs up.
	let dying = std::thread::spawn(move || {
		let (stream, _) = listener.accept().unwrap();
		drop(listener);
		let mut request = String::new();
		std::io::BufReader::new(&stream).read_line(&mut request).unwrap();
		request
	});

	let page = env.ok(&["goto", "https://example.com"]);
	assert_eq!(page["data"]["url"], "https://example.com");

	let request: Value = serde_json::from_str(&dying.join().unwrap()).unwrap();
	assert_eq!(request["params"]["args"]["_"][0], "goto");
	assert!(load(&env.descriptor("default")).resolved_config.is_some());

	let tabs = env.ok(&["tab-list"]);
	assert_eq!(tabs["data"][0]["url"], "https://example.com");
}
