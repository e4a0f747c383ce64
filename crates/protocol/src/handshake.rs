//! Daemon stdout readiness handshake.
//!
//! A freshly spawned daemon reports its startup outcome on stdout as plain
//! text, terminated by the [`SENTINEL`] line:
//!
//! ```text
//! ### Config
//! ```json
//! {...}
//! ```
//! ### Success
//! Daemon listening on /path/to/default.sock
//! <EOF>
//! ```
//!
//! or, when startup fails:
//!
//! ```text
//! ### Error
//! address already in use
//! <EOF>
//! ```
//!
//! The spawning client feeds stdout chunks into a [`ReadinessScanner`] until it
//! yields a [`Readiness`] outcome.

use serde_json::Value;

/// Line terminating the handshake.
pub const SENTINEL: &str = "<EOF>";
pub const CONFIG_MARKER: &str = "### Config";
pub const SUCCESS_MARKER: &str = "### Success";
pub const ERROR_MARKER: &str = "### Error";
const LISTENING_PREFIX: &str = "Daemon listening on ";

/// Outcome reported by the daemon before the sentinel.
#[derive(Debug, Clone, PartialEq)]
pub enum Readiness {
	/// The daemon bound its endpoint and is serving.
	Ready {
		endpoint: String,
		/// Configuration resolved by the daemon's backend, when reported.
		config: Option<Value>,
	},
	/// The daemon failed to start.
	Failed { message: String },
}

/// Formats the success report, including the trailing sentinel line.
pub fn format_success(config: &Value, endpoint: &str) -> String {
	let config = serde_json::to_string_pretty(config).unwrap_or_else(|_| "{}".to_string());
	format!("{CONFIG_MARKER}\n```json\n{config}\n```\n{SUCCESS_MARKER}\n{LISTENING_PREFIX}{endpoint}\n{SENTINEL}\n")
}

/// Formats the failure report, including the trailing sentinel line.
pub fn format_error(message: &str) -> String {
	format!("{ERROR_MARKER}\n{}\n{SENTINEL}\n", message.trim_end())
}

/// Incremental scanner over daemon stdout.
///
/// Bytes are buffered until a complete [`SENTINEL`] line arrives; chunk
/// boundaries may fall anywhere, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct ReadinessScanner {
	buffer: Vec<u8>,
}

impl ReadinessScanner {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends a chunk, returning the outcome once the sentinel line is seen.
	pub fn push(&mut self, chunk: &[u8]) -> Option<Readiness> {
		self.buffer.extend_from_slice(chunk);
		let text = String::from_utf8_lossy(&self.buffer);
		let mut report = Vec::new();
		for line in text.split('\n') {
			let line = line.trim_end_matches('\r');
			if line == SENTINEL {
				return Some(parse_report(&report));
			}
			report.push(line);
		}
		None
	}

	/// Everything received so far, for diagnostics when the daemon dies early.
	pub fn captured(&self) -> String {
		String::from_utf8_lossy(&self.buffer).into_owned()
	}
}

fn parse_report(lines: &[&str]) -> Readiness {
	if let Some(pos) = lines.iter().position(|line| *line == ERROR_MARKER) {
		let message = lines[pos + 1..].join("\n").trim().to_string();
		let message = if message.is_empty() {
			"daemon reported an error without a message".to_string()
		} else {
			message
		};
		return Readiness::Failed { message };
	}

	let Some(pos) = lines.iter().position(|line| *line == SUCCESS_MARKER) else {
		return Readiness::Failed {
			message: "daemon finished its startup report without a status".to_string(),
		};
	};

	let endpoint = lines[pos + 1..]
		.iter()
		.find_map(|line| line.strip_prefix(LISTENING_PREFIX))
		.unwrap_or_default()
		.to_string();

	Readiness::Ready {
		endpoint,
		config: parse_config_block(&lines[..pos]),
	}
}

fn parse_config_block(lines: &[&str]) -> Option<Value> {
	let start = lines.iter().position(|line| *line == CONFIG_MARKER)?;
	let body: Vec<&str> = lines[start + 1..]
		.iter()
		.copied()
		.skip_while(|line| line.starts_with("```"))
		.take_while(|line| !line.starts_with("```"))
		.collect();
	serde_json::from_str(&body.join("\n")).ok()
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn success_report_parses_back() {
		let config = json!({"browser": {"browserName": "chromium"}});
		let report = format_success(&config, "/tmp/ws/default.sock");

		let mut scanner = ReadinessScanner::new();
		let outcome = scanner.push(report.as_bytes()).expect("sentinel present");
		assert_eq!(
			outcome,
			Readiness::Ready {
				endpoint: "/tmp/ws/default.sock".to_string(),
				config: Some(config),
			}
		);
	}

	#[test]
	fn waits_for_sentinel_across_chunks() {
		let report = format_error("listen EADDRINUSE: address already in use");
		let mut scanner = ReadinessScanner::new();
		let bytes = report.as_bytes();
		let split = bytes.len() - 3;
		assert_eq!(scanner.push(&bytes[..split]), None);
		assert_eq!(
			scanner.push(&bytes[split..]),
			Some(Readiness::Failed {
				message: "listen EADDRINUSE: address already in use".to_string()
			})
		);
	}

	#[test]
	fn partial_sentinel_is_not_a_match() {
		let mut scanner = ReadinessScanner::new();
		assert_eq!(scanner.push(b"### Success\nDaemon listening on /x\n<EO"), None);
		assert!(matches!(scanner.push(b"F>\n"), Some(Readiness::Ready { .. })));
	}

	#[test]
	fn sentinel_without_status_is_a_failure() {
		let mut scanner = ReadinessScanner::new();
		let outcome = scanner.push(b"noise\n<EOF>\n").unwrap();
		assert!(matches!(outcome, Readiness::Failed { .. }));
	}
}
