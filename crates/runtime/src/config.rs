//! Tunables for the coordinator and the batch queue.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Request coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoordinatorConfig {
	/// Age after which a pending entry is abandoned.
	pub timeout_ms: u64,
	/// Period of the stale-entry sweep.
	pub cleanup_interval_ms: u64,
	/// Boolean field a response object must carry to count as successful.
	pub status_field: String,
	/// Field holding the server's explanation when `status_field` is false.
	pub message_field: String,
}

impl Default for CoordinatorConfig {
	fn default() -> Self {
		Self {
			timeout_ms: DEFAULT_TIMEOUT_MS,
			cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
			status_field: "success".to_string(),
			message_field: "message".to_string(),
		}
	}
}

impl CoordinatorConfig {
	pub fn timeout(&self) -> Duration {
		Duration::from_millis(self.timeout_ms)
	}

	pub fn cleanup_interval(&self) -> Duration {
		Duration::from_millis(self.cleanup_interval_ms)
	}

	pub fn validate(&self) -> Result<()> {
		if self.timeout_ms == 0 {
			return Err(Error::InvalidConfig("timeoutMs must be greater than zero".into()));
		}
		if self.cleanup_interval_ms == 0 {
			return Err(Error::InvalidConfig("cleanupIntervalMs must be greater than zero".into()));
		}
		if self.status_field.is_empty() {
			return Err(Error::InvalidConfig("statusField must not be empty".into()));
		}
		Ok(())
	}
}

/// Batched persistence queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
	pub flush_interval_ms: u64,
	/// Entries taken per flush.
	pub batch_size: usize,
	/// Failed attempts after which an entry is dropped.
	pub max_retries: u32,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
			batch_size: DEFAULT_BATCH_SIZE,
			max_retries: DEFAULT_MAX_RETRIES,
		}
	}
}

impl QueueConfig {
	pub fn flush_interval(&self) -> Duration {
		Duration::from_millis(self.flush_interval_ms)
	}

	pub fn validate(&self) -> Result<()> {
		if self.flush_interval_ms == 0 {
			return Err(Error::InvalidConfig("flushIntervalMs must be greater than zero".into()));
		}
		if self.batch_size == 0 {
			return Err(Error::InvalidConfig("batchSize must be greater than zero".into()));
		}
		if self.max_retries == 0 {
			return Err(Error::InvalidConfig("maxRetries must be greater than zero".into()));
		}
		Ok(())
	}
}
