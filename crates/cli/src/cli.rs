use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;
use crate::styles::cli_styles;

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Deduplicated requests, batched writes and shared state from the command line")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format: json (default) or text
	#[arg(short = 'f', long, global = true, value_enum, default_value = "json")]
	pub format: OutputFormat,

	/// Read configuration from this file instead of the global and project files
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Base URL that relative request URLs are resolved against
	#[arg(long, global = true, value_name = "URL")]
	pub base_url: Option<String>,

	/// Bearer token attached to every request
	#[arg(long, global = true, value_name = "TOKEN")]
	pub token: Option<String>,

	/// Abandon requests that have not settled after this many milliseconds
	#[arg(long, global = true, value_name = "MS")]
	pub timeout_ms: Option<u64>,

	/// Shared state file used by `state` commands
	#[arg(long, global = true, value_name = "FILE")]
	pub state_path: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Send a request through the coordinator, optionally many times at once
	Fetch {
		#[command(flatten)]
		request: RequestArgs,

		/// Issue this many identical requests concurrently
		#[arg(long, default_value_t = 1, value_name = "N")]
		repeat: usize,
	},

	/// Print the deduplication fingerprint of a request
	Fingerprint {
		#[command(flatten)]
		request: RequestArgs,
	},

	/// Buffer writes, coalesce them per key and drain the queue
	Push {
		/// Endpoint receiving `{ key, payload }` bodies (defaults to the base URL)
		url: Option<String>,

		/// Write to buffer; repeat a key to coalesce
		#[arg(short, long = "entry", value_name = "KEY=JSON", required = true)]
		entries: Vec<String>,

		/// Entries sent per flush
		#[arg(long, value_name = "N")]
		batch_size: Option<usize>,

		/// Failed attempts before an entry is dropped
		#[arg(long, value_name = "N")]
		max_retries: Option<u32>,
	},

	/// Read, write or watch the shared state file
	State {
		#[command(subcommand)]
		action: StateAction,
	},
}

impl Commands {
	pub fn name(&self) -> &'static str {
		match self {
			Commands::Fetch { .. } => "fetch",
			Commands::Fingerprint { .. } => "fingerprint",
			Commands::Push { .. } => "push",
			Commands::State { action } => match action {
				StateAction::Set { .. } => "state.set",
				StateAction::Get { .. } => "state.get",
				StateAction::Watch { .. } => "state.watch",
			},
		}
	}
}

/// Request description shared by `fetch` and `fingerprint`.
#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
	/// Absolute URL, or a path resolved against --base-url
	pub url: String,

	/// HTTP method
	#[arg(short = 'X', long, default_value = "GET")]
	pub method: String,

	/// Request body; JSON is sent as JSON, anything else as text
	#[arg(short = 'd', long = "data", value_name = "BODY")]
	pub data: Option<String>,

	/// Extra header
	#[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
	pub headers: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum StateAction {
	/// Write a value, stamped with the current time
	Set {
		key: String,
		/// JSON value; anything else is stored as a string
		value: String,
	},

	/// Print the stored record for a key
	Get { key: String },

	/// Print every value applied for a key until interrupted
	Watch {
		key: String,

		/// Exit after this many changes
		#[arg(long, value_name = "N")]
		count: Option<usize>,

		/// How often the state file is re-read
		#[arg(long, default_value_t = 500, value_name = "MS")]
		poll_ms: u64,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_fetch() {
		let cli = Cli::try_parse_from([
			"tether",
			"fetch",
			"https://api.example/x",
			"-X",
			"post",
			"-d",
			r#"{"a":1}"#,
			"-H",
			"X-Trace: 1",
			"--repeat",
			"3",
		])
		.unwrap();

		let Commands::Fetch { request, repeat } = cli.command else {
			panic!("expected fetch");
		};
		assert_eq!(request.method, "post");
		assert_eq!(request.data.as_deref(), Some(r#"{"a":1}"#));
		assert_eq!(request.headers, vec!["X-Trace: 1".to_string()]);
		assert_eq!(repeat, 3);
	}

	#[test]
	fn test_push_requires_entries() {
		assert!(Cli::try_parse_from(["tether", "push", "https://api.example/s"]).is_err());

		let cli = Cli::try_parse_from(["tether", "push", "--entry", "a=1", "-e", "a=2", "--batch-size", "2"]).unwrap();
		let Commands::Push { url, entries, batch_size, .. } = cli.command else {
			panic!("expected push");
		};
		assert!(url.is_none());
		assert_eq!(entries.len(), 2);
		assert_eq!(batch_size, Some(2));
	}

	#[test]
	fn test_global_flags_after_subcommand() {
		let cli = Cli::try_parse_from(["tether", "state", "get", "pos", "-f", "text", "-vv"]).unwrap();
		assert_eq!(cli.format, OutputFormat::Text);
		assert_eq!(cli.verbose, 2);
		assert_eq!(cli.command.name(), "state.get");
	}
}
