//! Structured output envelope for all CLI commands.
//!
//! ## Output Contract
//!
//! Every command produces a result envelope on stdout:
//!
//! ```json
//! {
//!   "schemaVersion": 1,
//!   "ok": true,
//!   "command": "fetch",
//!   "data": { ... },
//!   "timings": { "durationMs": 12 }
//! }
//! ```
//!
//! On failure:
//!
//! ```json
//! {
//!   "ok": false,
//!   "command": "push",
//!   "error": { "code": "WRITE_DROPPED", "message": "..." }
//! }
//! ```
//!
//! Text output prints the data for humans and is not meant to be parsed.

#[cfg(test)]
mod tests;

use std::io::{self, Write};
use std::time::{Duration, Instant};

use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bumped on breaking changes to the envelope.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
	/// JSON envelope (default)
	#[default]
	Json,
	/// Human-readable text
	Text,
}

impl std::fmt::Display for OutputFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			OutputFormat::Json => write!(f, "json"),
			OutputFormat::Text => write!(f, "text"),
		}
	}
}

/// The result envelope returned by all commands.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T: Serialize> {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub schema_version: Option<u32>,

	pub ok: bool,

	/// Command name (e.g. "fetch", "state.get")
	pub command: String,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub timings: Option<Timings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
	pub code: ErrorCode,

	pub message: String,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<Value>,
}

/// Standardized error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	/// Network unreachable, non-2xx status or a server-side rejection
	TransportFailed,
	/// Response body malformed or missing its status field
	ProtocolError,
	/// Request abandoned by the coordinator
	Timeout,
	/// Buffered write dropped after exhausting its retries
	WriteDropped,
	/// State store unreachable or unreadable
	StoreError,
	/// Configuration file or value rejected
	ConfigError,
	IoError,
	InvalidInput,
	InternalError,
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ErrorCode::TransportFailed => write!(f, "TRANSPORT_FAILED"),
			ErrorCode::ProtocolError => write!(f, "PROTOCOL_ERROR"),
			ErrorCode::Timeout => write!(f, "TIMEOUT"),
			ErrorCode::WriteDropped => write!(f, "WRITE_DROPPED"),
			ErrorCode::StoreError => write!(f, "STORE_ERROR"),
			ErrorCode::ConfigError => write!(f, "CONFIG_ERROR"),
			ErrorCode::IoError => write!(f, "IO_ERROR"),
			ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
			ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
		}
	}
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
	pub duration_ms: u64,
}

impl From<Duration> for Timings {
	fn from(duration: Duration) -> Self {
		Timings {
			duration_ms: duration.as_millis() as u64,
		}
	}
}

/// Builder for constructing command results
pub struct ResultBuilder<T: Serialize> {
	command: String,
	data: Option<T>,
	error: Option<CommandError>,
	start_time: Instant,
}

impl<T: Serialize> ResultBuilder<T> {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			data: None,
			error: None,
			start_time: Instant::now(),
		}
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	/// Marks the result as failed. Data set alongside is still emitted.
	pub fn error(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
		self.error = Some(CommandError {
			code,
			message: message.into(),
			details: None,
		});
		self
	}

	pub fn error_details(mut self, details: Value) -> Self {
		if let Some(error) = self.error.as_mut() {
			error.details = Some(details);
		}
		self
	}

	pub fn build(self) -> CommandResult<T> {
		CommandResult {
			schema_version: Some(SCHEMA_VERSION),
			ok: self.error.is_none(),
			command: self.command,
			data: self.data,
			error: self.error,
			timings: Some(self.start_time.elapsed().into()),
		}
	}
}

/// Prints a result envelope to stdout in the requested format.
pub fn print_result<T: Serialize>(result: &CommandResult<T>, format: OutputFormat) {
	let mut stdout = io::stdout().lock();
	let rendered = match format {
		OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_else(|e| fallback_envelope(&result.command, &e)),
		OutputFormat::Text => match (&result.data, &result.error) {
			(_, Some(error)) => format!("{}: {}", error.code, error.message),
			(Some(data), None) => serde_json::to_value(data)
				.map(|value| render_text(&value))
				.unwrap_or_else(|e| e.to_string()),
			(None, None) => String::from("ok"),
		},
	};
	let _ = writeln!(stdout, "{rendered}");
}

/// Prints one streamed event (e.g. from `state watch`) as a single line.
pub fn print_event(event: &Value, format: OutputFormat) {
	let mut stdout = io::stdout().lock();
	let line = match format {
		OutputFormat::Json => event.to_string(),
		OutputFormat::Text => render_text(event).replace('\n', "  "),
	};
	let _ = writeln!(stdout, "{line}");
	let _ = stdout.flush();
}

/// Prints a human-readable error line to stderr.
pub fn print_error_stderr(error: &CommandError) {
	eprintln!("{} {}", format!("error[{}]:", error.code).red().bold(), error.message);
}

/// Renders a JSON value as indented `key: value` lines.
pub fn render_text(value: &Value) -> String {
	let mut out = String::new();
	write_text(value, 0, &mut out);
	out.trim_end().to_string()
}

fn write_text(value: &Value, depth: usize, out: &mut String) {
	let indent = "  ".repeat(depth);
	match value {
		Value::Object(map) => {
			for (key, item) in map {
				match item {
					Value::Object(inner) if !inner.is_empty() => {
						out.push_str(&format!("{indent}{key}:\n"));
						write_text(item, depth + 1, out);
					}
					Value::Array(items) if items.iter().any(|i| i.is_object()) => {
						out.push_str(&format!("{indent}{key}:\n"));
						write_text(item, depth + 1, out);
					}
					_ => out.push_str(&format!("{indent}{key}: {}\n", scalar(item))),
				}
			}
		}
		Value::Array(items) => {
			for item in items {
				if item.is_object() {
					out.push_str(&format!("{indent}-\n"));
					write_text(item, depth + 1, out);
				} else {
					out.push_str(&format!("{indent}- {}\n", scalar(item)));
				}
			}
		}
		other => out.push_str(&format!("{indent}{}\n", scalar(other))),
	}
}

fn scalar(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		Value::Null => "-".to_string(),
		other => other.to_string(),
	}
}

fn fallback_envelope(command: &str, err: &serde_json::Error) -> String {
	serde_json::json!({
		"ok": false,
		"command": command,
		"error": { "code": ErrorCode::InternalError, "message": format!("failed to serialize result: {err}") },
	})
	.to_string()
}
