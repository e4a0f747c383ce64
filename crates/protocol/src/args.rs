//! Argv-style command arguments carried by `run` requests.
//!
//! The shape mirrors what minimist-style parsers produce: positional values
//! under `_`, options as sibling keys.
//!
//! ```json
//! {"_": ["goto", "https://example.com"], "timeout": "5000", "force": true}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandArgs {
	/// Positional values, tool name first.
	#[serde(rename = "_", default)]
	pub positional: Vec<String>,
	/// Named options (`--key value`, `--flag`, `--no-flag`).
	#[serde(flatten)]
	pub options: Map<String, Value>,
}

impl CommandArgs {
	/// Parses raw argv tokens.
	///
	/// - `--key=value` and `--key value` set string options
	/// - `--flag` with no following value sets `true`, `--no-flag` sets `false`
	/// - `-abc` sets `a`, `b` and `c` to `true`
	/// - `--` ends option parsing; everything after it is positional
	/// - repeated keys collect into an array
	///
	/// Negative numbers (`-1`) are positional.
	pub fn parse<I, S>(argv: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let mut args = CommandArgs::default();
		let mut tokens = argv.into_iter().map(|s| s.as_ref().to_string()).peekable();

		while let Some(token) = tokens.next() {
			if token == "--" {
				args.positional.extend(tokens);
				break;
			}

			if let Some(long) = token.strip_prefix("--") {
				if let Some((key, value)) = long.split_once('=') {
					args.insert(key, Value::String(value.to_string()));
				} else if let Some(key) = long.strip_prefix("no-") {
					args.insert(key, Value::Bool(false));
				} else {
					let value = match tokens.next_if(|next| !is_option(next)) {
						Some(value) => Value::String(value),
						None => Value::Bool(true),
					};
					args.insert(long, value);
				}
				continue;
			}

			if is_option(&token) {
				for flag in token.chars().skip(1) {
					args.insert(&flag.to_string(), Value::Bool(true));
				}
				continue;
			}

			args.positional.push(token);
		}

		args
	}

	fn insert(&mut self, key: &str, value: Value) {
		match self.options.get_mut(key) {
			Some(Value::Array(values)) => values.push(value),
			Some(existing) => {
				let first = existing.take();
				*existing = Value::Array(vec![first, value]);
			}
			None => {
				self.options.insert(key.to_string(), value);
			}
		}
	}

	/// First positional value: the tool to run.
	pub fn tool_name(&self) -> Option<&str> {
		self.positional.first().map(String::as_str)
	}

	/// Arguments for the tool itself (positional values after the tool name).
	pub fn without_tool(&self) -> CommandArgs {
		CommandArgs {
			positional: self.positional.iter().skip(1).cloned().collect(),
			options: self.options.clone(),
		}
	}

	pub fn arg(&self, index: usize) -> Option<&str> {
		self.positional.get(index).map(String::as_str)
	}

	pub fn str_option(&self, key: &str) -> Option<&str> {
		self.options.get(key).and_then(Value::as_str)
	}

	/// `true` for `--key`, `--key=true` or `--key true`.
	pub fn flag(&self, key: &str) -> bool {
		match self.options.get(key) {
			Some(Value::Bool(b)) => *b,
			Some(Value::String(s)) => s == "true",
			_ => false,
		}
	}
}

fn is_option(token: &str) -> bool {
	token.len() > 1 && token.starts_with('-') && !token[1..].starts_with(|c: char| c.is_ascii_digit())
}
