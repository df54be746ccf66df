mod fetch;
mod fingerprint;
mod push;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tether_protocol::{Body, RequestOptions};
use tether_runtime::{Coordinator, CoordinatorConfig, HttpTransport, QueueConfig};

use crate::cli::{Cli, Commands, RequestArgs};
use crate::config::LoadedConfig;
use crate::error::{CliError, Result};
use crate::indicator::LogIndicator;
use crate::output::OutputFormat;

/// Settings shared by every command: config files overlaid with flags.
#[derive(Debug, Clone)]
pub struct CommandContext {
	pub format: OutputFormat,
	pub base_url: Option<String>,
	pub token: Option<String>,
	pub coordinator: CoordinatorConfig,
	pub queue: QueueConfig,
	pub state_path: PathBuf,
}

impl CommandContext {
	pub fn new(cli: &Cli, loaded: &LoadedConfig) -> Self {
		let config = &loaded.config;
		let mut coordinator = config.coordinator.clone().unwrap_or_default();
		if let Some(timeout_ms) = cli.timeout_ms {
			coordinator.timeout_ms = timeout_ms;
		}

		Self {
			format: cli.format,
			base_url: cli.base_url.clone().or_else(|| config.base_url.clone()),
			token: cli.token.clone().or_else(|| config.auth_token.clone()),
			coordinator,
			queue: config.queue.clone().unwrap_or_default(),
			state_path: cli.state_path.clone().unwrap_or_else(|| loaded.state_path()),
		}
	}

	/// Coordinator over a real HTTP transport, logging busy edges.
	pub fn coordinator(&self) -> Result<Arc<Coordinator>> {
		let transport = HttpTransport::new()?;
		let coordinator = Coordinator::builder(Arc::new(transport))
			.config(self.coordinator.clone())
			.indicator(Arc::new(LogIndicator))
			.error_handler(|err| tracing::warn!(error = %err, "malformed response"))
			.build()?;
		Ok(Arc::new(coordinator))
	}

	/// Resolves `raw` against the base URL when it is not already absolute.
	pub fn resolve_url(&self, raw: &str) -> Result<String> {
		match url::Url::parse(raw) {
			Ok(url) => Ok(url.to_string()),
			Err(url::ParseError::RelativeUrlWithoutBase) => {
				let Some(base) = &self.base_url else {
					return Err(CliError::InvalidInput(format!(
						"'{raw}' is relative and no base URL is configured"
					)));
				};
				let base = url::Url::parse(base).map_err(|source| CliError::Url {
					url: base.clone(),
					source,
				})?;
				let joined = base.join(raw).map_err(|source| CliError::Url {
					url: raw.to_string(),
					source,
				})?;
				Ok(joined.to_string())
			}
			Err(source) => Err(CliError::Url {
				url: raw.to_string(),
				source,
			}),
		}
	}
}

pub async fn dispatch(cli: Cli) -> Result<()> {
	let cwd = std::env::current_dir()?;
	let loaded = LoadedConfig::load(&cwd, cli.config.as_deref())?;
	let ctx = CommandContext::new(&cli, &loaded);

	match cli.command {
		Commands::Fetch { request, repeat } => fetch::execute(&ctx, &request, repeat).await,
		Commands::Fingerprint { request } => fingerprint::execute(&ctx, &request),
		Commands::Push {
			url,
			entries,
			batch_size,
			max_retries,
		} => {
			let mut queue = ctx.queue.clone();
			if let Some(batch_size) = batch_size {
				queue.batch_size = batch_size;
			}
			if let Some(max_retries) = max_retries {
				queue.max_retries = max_retries;
			}
			push::execute(&ctx, url.as_deref(), &entries, queue).await
		}
		Commands::State { action } => state::execute(&ctx, action).await,
	}
}

/// Builds request options from `-X`, `-d` and `-H`.
pub(crate) fn request_options(args: &RequestArgs) -> Result<RequestOptions> {
	let mut options = RequestOptions::get().method(args.method.as_str());
	if let Some(data) = &args.data {
		options = options.body(parse_body(data));
	}
	for header in &args.headers {
		let Some((name, value)) = header.split_once(':') else {
			return Err(CliError::InvalidInput(format!(
				"header '{header}' must look like 'Name: value'"
			)));
		};
		let name = name.trim();
		if name.is_empty() {
			return Err(CliError::InvalidInput(format!("header '{header}' has no name")));
		}
		options = options.header(name, value.trim());
	}
	Ok(options)
}

/// JSON text becomes a JSON body, anything else stays text.
pub(crate) fn parse_body(raw: &str) -> Body {
	match serde_json::from_str::<Value>(raw) {
		Ok(value) => Body::Json(value),
		Err(_) => Body::Text(raw.to_string()),
	}
}

/// Parses a command line value as JSON, treating anything else as a string.
pub(crate) fn parse_value(raw: &str) -> Value {
	serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use tether_protocol::Method;

	use super::*;

	fn ctx(base_url: Option<&str>) -> CommandContext {
		CommandContext {
			format: OutputFormat::Json,
			base_url: base_url.map(str::to_string),
			token: None,
			coordinator: CoordinatorConfig::default(),
			queue: QueueConfig::default(),
			state_path: PathBuf::from("state.json"),
		}
	}

	fn args(method: &str, data: Option<&str>, headers: &[&str]) -> RequestArgs {
		RequestArgs {
			url: "https://api.example/x".into(),
			method: method.into(),
			data: data.map(str::to_string),
			headers: headers.iter().map(|h| h.to_string()).collect(),
		}
	}

	#[test]
	fn test_resolve_url() {
		let ctx = ctx(Some("https://api.example/v1/"));
		assert_eq!(ctx.resolve_url("faqs?cname=faqs").unwrap(), "https://api.example/v1/faqs?cname=faqs");
		assert_eq!(ctx.resolve_url("https://other.example/a").unwrap(), "https://other.example/a");
	}

	#[test]
	fn test_relative_url_without_base_rejected() {
		assert!(matches!(ctx(None).resolve_url("faqs"), Err(CliError::InvalidInput(_))));
		assert!(matches!(ctx(None).resolve_url("http://[::1"), Err(CliError::Url { .. })));
	}

	#[test]
	fn test_request_options() {
		let options = request_options(&args("post", Some(r#"{"a":1}"#), &["X-Trace: abc:def"])).unwrap();
		assert_eq!(options.method, Some(Method::Post));
		assert_eq!(options.body, Some(Body::Json(json!({"a": 1}))));
		assert_eq!(options.header_value("x-trace"), Some("abc:def"));

		let options = request_options(&args("GET", Some("plain words"), &[])).unwrap();
		assert_eq!(options.body, Some(Body::Text("plain words".into())));
	}

	#[test]
	fn test_malformed_header_rejected() {
		assert!(matches!(
			request_options(&args("GET", None, &["no-colon"])),
			Err(CliError::InvalidInput(_))
		));
		assert!(matches!(
			request_options(&args("GET", None, &[": value"])),
			Err(CliError::InvalidInput(_))
		));
	}

	#[test]
	fn test_parse_value() {
		assert_eq!(parse_value(r#"{"x":10}"#), json!({"x": 10}));
		assert_eq!(parse_value("42"), json!(42));
		assert_eq!(parse_value("hello"), json!("hello"));
	}
}
