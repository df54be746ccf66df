//! `tether state`: the file-backed shared store seen from one context.
//!
//! Every invocation is its own context. `watch` re-reads the file on a timer
//! so writes from other processes reach its subscription.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tether_protocol::{ContextId, StateRecord};
use tether_runtime::{SharedStore, StateSync};
use tokio::sync::mpsc;

use super::{CommandContext, parse_value};
use crate::cli::StateAction;
use crate::error::{CliError, Result};
use crate::output::{self, ResultBuilder};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StateData {
	key: String,
	found: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	record: Option<StateRecord>,
	context: String,
}

pub async fn execute(ctx: &CommandContext, action: StateAction) -> Result<()> {
	let store = SharedStore::open(&ctx.state_path)?;
	let sync = StateSync::new(Arc::new(store.clone()));
	tracing::debug!(path = %ctx.state_path.display(), context = %sync.context(), "state store opened");

	let outcome = match action {
		StateAction::Set { key, value } => {
			let record = sync.write(key.clone(), parse_value(&value)).await?;
			print_record(ctx, "state.set", &sync, key, Some(record));
			Ok(())
		}
		StateAction::Get { key } => {
			let record = sync.read(&key).await?;
			print_record(ctx, "state.get", &sync, key, record);
			Ok(())
		}
		StateAction::Watch { key, count, poll_ms } => watch(ctx, &store, &sync, &key, count, poll_ms).await,
	};
	sync.destroy();
	outcome
}

fn print_record(ctx: &CommandContext, command: &str, sync: &StateSync, key: String, record: Option<StateRecord>) {
	let result = ResultBuilder::new(command)
		.data(StateData {
			key,
			found: record.is_some(),
			record,
			context: sync.context().to_string(),
		})
		.build();
	output::print_result(&result, ctx.format);
}

async fn watch(
	ctx: &CommandContext,
	store: &SharedStore,
	sync: &StateSync,
	key: &str,
	count: Option<usize>,
	poll_ms: u64,
) -> Result<()> {
	if poll_ms == 0 {
		return Err(CliError::InvalidInput("--poll-ms must be greater than zero".into()));
	}

	let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
	sync.subscribe(key, move |value| {
		let _ = tx.send(value.clone());
	})?;

	if let Some(current) = sync.read(key).await? {
		output::print_event(&json!({ "key": key, "value": current.value, "updatedAt": current.updated_at, "initial": true }), ctx.format);
	}

	let disk = ContextId::new("disk");
	let mut ticker = tokio::time::interval(Duration::from_millis(poll_ms));
	let mut seen = 0usize;
	tracing::info!(key, poll_ms, "watching");

	loop {
		tokio::select! {
			_ = ticker.tick() => {
				let changed = store.reload(&disk)?;
				if changed > 0 {
					tracing::debug!(changed, "state file changed");
				}
			}
			Some(value) = rx.recv() => {
				output::print_event(&json!({ "key": key, "value": value, "lastApplied": sync.last_applied(key) }), ctx.format);
				seen += 1;
				if count.is_some_and(|limit| seen >= limit) {
					break;
				}
			}
			_ = tokio::signal::ctrl_c() => break,
		}
	}
	Ok(())
}
