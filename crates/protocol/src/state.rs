//! Records exchanged through a shared state store.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity of one consumer context (a tab, a popup, a background worker).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

impl ContextId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	/// Generates an id unique within this process.
	pub fn generate() -> Self {
		let n = NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed);
		Self(format!("ctx-{}-{n}", std::process::id()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ContextId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// One keyed value plus the wall-clock time (Unix millis) it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
	pub key: String,
	pub value: Value,
	pub updated_at: i64,
}

impl StateRecord {
	pub fn new(key: impl Into<String>, value: Value, updated_at: i64) -> Self {
		Self {
			key: key.into(),
			value,
			updated_at,
		}
	}

	/// Last-write-wins test: `self` replaces a record stamped `applied_at`.
	/// Equal timestamps apply.
	pub fn supersedes(&self, applied_at: Option<i64>) -> bool {
		applied_at.is_none_or(|at| self.updated_at >= at)
	}
}

/// Change notification emitted by a store after a write is durable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreChange {
	pub key: String,
	pub old_value: Option<StateRecord>,
	pub new_value: Option<StateRecord>,
	pub origin: ContextId,
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn test_supersedes_uses_timestamp() {
		let record = StateRecord::new("pos", json!({"x": 1}), 100);
		assert!(record.supersedes(None));
		assert!(record.supersedes(Some(50)));
		assert!(record.supersedes(Some(100)));
		assert!(!record.supersedes(Some(101)));
	}

	#[test]
	fn test_record_serializes_camel_case() {
		let record = StateRecord::new("pos", json!(1), 42);
		let json = serde_json::to_value(&record).unwrap();
		assert_eq!(json["updatedAt"], 42);
	}

	#[test]
	fn test_generated_context_ids_are_unique() {
		assert_ne!(ContextId::generate(), ContextId::generate());
	}
}
