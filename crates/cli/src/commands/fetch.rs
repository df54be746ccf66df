//! `tether fetch`: concurrent identical requests collapse into one call.

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tether_runtime::{ApiClient, CoordinatorStats, StaticToken};

use super::{CommandContext, request_options};
use crate::cli::RequestArgs;
use crate::error::{CliError, Result};
use crate::output::{self, ResultBuilder};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchData {
	url: String,
	callers: usize,
	/// Whether every caller observed the same value.
	identical: bool,
	response: Value,
	stats: CoordinatorStats,
}

pub async fn execute(ctx: &CommandContext, args: &RequestArgs, repeat: usize) -> Result<()> {
	if repeat == 0 {
		return Err(CliError::InvalidInput("--repeat must be at least 1".into()));
	}
	let url = ctx.resolve_url(&args.url)?;
	let options = request_options(args)?;

	let coordinator = ctx.coordinator()?;
	let mut client = ApiClient::new(coordinator.clone(), url.clone());
	if let Some(token) = &ctx.token {
		client = client.with_token_provider(std::sync::Arc::new(StaticToken::new(token.clone())));
	}

	tracing::info!(%url, repeat, "fetching");
	let outcomes = join_all((0..repeat).map(|_| client.request(&url, options.clone()))).await;
	let stats = coordinator.stats();
	coordinator.destroy();

	let mut values = Vec::with_capacity(outcomes.len());
	for outcome in outcomes {
		values.push(outcome?);
	}
	let identical = values.windows(2).all(|pair| pair[0] == pair[1]);
	let response = values.into_iter().next().unwrap_or(Value::Null);

	let result = ResultBuilder::new("fetch")
		.data(FetchData {
			url,
			callers: repeat,
			identical,
			response,
			stats,
		})
		.build();
	output::print_result(&result, ctx.format);
	Ok(())
}
