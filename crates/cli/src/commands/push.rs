//! `tether push`: buffered writes, drained before exit.

use std::sync::Arc;

use tether_runtime::{BatchQueue, JsonPostTarget, QueueConfig};

use super::{CommandContext, parse_value};
use crate::error::{CliError, Result};
use crate::output::{self, ErrorCode, OutputFormat, ResultBuilder};

pub async fn execute(ctx: &CommandContext, url: Option<&str>, entries: &[String], config: QueueConfig) -> Result<()> {
	let url = match url.or(ctx.base_url.as_deref()) {
		Some(raw) => ctx.resolve_url(raw)?,
		None => return Err(CliError::InvalidInput("push needs a URL or a configured base URL".into())),
	};
	let entries = entries.iter().map(|raw| parse_entry(raw)).collect::<Result<Vec<_>>>()?;

	let mut target = JsonPostTarget::new(url).header("Content-Type", "application/json");
	if let Some(token) = &ctx.token {
		target = target.header("Authorization", format!("Bearer {token}"));
	}

	let coordinator = ctx.coordinator()?;
	let queue = BatchQueue::builder(coordinator.clone(), Arc::new(target))
		.config(config)
		.error_handler(|err| tracing::error!(error = %err, "write lost"))
		.persist_handler(|write| tracing::info!(key = %write.key, retry_count = write.retry_count, "write persisted"))
		.build()?;

	for (key, payload) in entries {
		queue.enqueue(key, payload);
	}
	let report = queue.flush_now().await;
	queue.destroy();
	coordinator.destroy();

	if report.dropped.is_empty() {
		output::print_result(&ResultBuilder::new("push").data(&report).build(), ctx.format);
		return Ok(());
	}

	let message = format!("{} write(s) dropped after exhausting retries", report.dropped.len());
	let result = ResultBuilder::new("push")
		.data(&report)
		.error(ErrorCode::WriteDropped, &message)
		.error_details(serde_json::json!({ "keys": &report.dropped }))
		.build();
	output::print_result(&result, ctx.format);
	// Text output already carries the error line.
	if let (OutputFormat::Json, Some(error)) = (ctx.format, &result.error) {
		output::print_error_stderr(error);
	}
	Err(CliError::OutputAlreadyPrinted)
}

/// Splits `KEY=JSON`. Non-JSON values are sent as strings.
fn parse_entry(raw: &str) -> Result<(String, serde_json::Value)> {
	match raw.split_once('=') {
		Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), parse_value(value))),
		_ => Err(CliError::InvalidInput(format!("entry '{raw}' must look like KEY=JSON"))),
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_parse_entry() {
		assert_eq!(parse_entry(r#"s1={"title":"a"}"#).unwrap(), ("s1".to_string(), json!({"title": "a"})));
		assert_eq!(parse_entry("s2=draft").unwrap(), ("s2".to_string(), json!("draft")));
		assert_eq!(parse_entry("s3=a=b").unwrap(), ("s3".to_string(), json!("a=b")));
		assert!(parse_entry("=1").is_err());
		assert!(parse_entry("novalue").is_err());
	}
}
