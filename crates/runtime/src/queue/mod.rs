//! Batched persistence queue.
//!
//! Buffers writes keyed by entity, coalesces repeated writes to the same key
//! (the latest payload wins) and flushes them in bounded batches through the
//! [`Coordinator`]. Failed writes are retried on later flushes until the retry
//! budget is spent, then dropped and reported once through the error channel.
//!
//! Entries flush oldest first by their original enqueue time. A retried entry
//! keeps that time, so a persistently failing key ages out by exhausting its
//! budget instead of blocking the queue; the calls of one batch are issued
//! concurrently.

mod target;


use std::collections::HashMap;
use std::sync::{Arc, Weak};

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::QueueConfig;
use crate::coordinator::Coordinator;
use crate::error::{Error, ErrorHandler, Result};

pub use target::{JsonPostTarget, WriteTarget};

/// Callback invoked for every write the server accepted.
pub type PersistHandler = Arc<dyn Fn(&PersistedWrite) + Send + Sync>;

/// One buffered write.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
	pub key: String,
	pub payload: Value,
	/// Time of the first enqueue; kept across coalescing and retries.
	pub queued_at: Instant,
	/// Failed attempts so far.
	pub retry_count: u32,
	/// Tie-breaker for entries queued at the same instant.
	seq: u64,
}

/// A write the server accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedWrite {
	pub key: String,
	pub payload: Value,
	/// Failed attempts before this one succeeded.
	pub retry_count: u32,
	pub response: Value,
}

/// Outcome of one or more flushes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
	pub persisted: Vec<PersistedWrite>,
	/// Keys put back for another attempt.
	pub retried: Vec<String>,
	/// Keys whose retry budget ran out.
	pub dropped: Vec<String>,
	/// Keys whose failed write was replaced by a newer payload meanwhile.
	pub superseded: Vec<String>,
}

impl FlushReport {
	/// True when the flush attempted nothing.
	pub fn is_empty(&self) -> bool {
		self.persisted.is_empty() && self.retried.is_empty() && self.dropped.is_empty() && self.superseded.is_empty()
	}

	fn merge(&mut self, other: FlushReport) {
		self.persisted.extend(other.persisted);
		self.retried.extend(other.retried);
		self.dropped.extend(other.dropped);
		self.superseded.extend(other.superseded);
	}
}

/// Builder for [`BatchQueue`].
pub struct BatchQueueBuilder {
	coordinator: Arc<Coordinator>,
	target: Arc<dyn WriteTarget>,
	config: QueueConfig,
	on_error: Option<ErrorHandler>,
	on_persist: Option<PersistHandler>,
}

impl BatchQueueBuilder {
	pub fn config(mut self, config: QueueConfig) -> Self {
		self.config = config;
		self
	}

	/// Registers the channel that receives [`Error::QueueExhausted`], once per
	/// dropped entry.
	pub fn error_handler(mut self, handler: impl Fn(&Error) + Send + Sync + 'static) -> Self {
		self.on_error = Some(Arc::new(handler));
		self
	}

	pub fn persist_handler(mut self, handler: impl Fn(&PersistedWrite) + Send + Sync + 'static) -> Self {
		self.on_persist = Some(Arc::new(handler));
		self
	}

	pub fn build(self) -> Result<BatchQueue> {
		self.config.validate()?;
		Ok(BatchQueue {
			shared: Arc::new(QueueShared {
				coordinator: self.coordinator,
				target: self.target,
				config: self.config,
				state: Mutex::new(QueueState::default()),
				flush_lock: tokio::sync::Mutex::new(()),
				on_error: self.on_error,
				on_persist: self.on_persist,
			}),
		})
	}
}

#[derive(Default)]
struct QueueState {
	/// At most one entry per key.
	entries: HashMap<String, QueueEntry>,
	timer: Option<JoinHandle<()>>,
	next_seq: u64,
}

struct QueueShared {
	coordinator: Arc<Coordinator>,
	target: Arc<dyn WriteTarget>,
	config: QueueConfig,
	state: Mutex<QueueState>,
	/// Serializes flushes so an entry is never in two batches at once.
	flush_lock: tokio::sync::Mutex<()>,
	on_error: Option<ErrorHandler>,
	on_persist: Option<PersistHandler>,
}

/// Coalescing write buffer in front of a [`Coordinator`].
pub struct BatchQueue {
	shared: Arc<QueueShared>,
}

impl BatchQueue {
	pub fn builder(coordinator: Arc<Coordinator>, target: Arc<dyn WriteTarget>) -> BatchQueueBuilder {
		BatchQueueBuilder {
			coordinator,
			target,
			config: QueueConfig::default(),
			on_error: None,
			on_persist: None,
		}
	}

	pub fn new(coordinator: Arc<Coordinator>, target: Arc<dyn WriteTarget>, config: QueueConfig) -> Result<Self> {
		Self::builder(coordinator, target).config(config).build()
	}

	/// Buffers `payload` for `key`, replacing any payload still waiting for
	/// the same key, and arms the flush timer if it is idle.
	///
	/// The timer needs a Tokio runtime; without one the entry waits for
	/// [`flush_now`](Self::flush_now).
	pub fn enqueue(&self, key: impl Into<String>, payload: Value) {
		let key = key.into();
		let mut state = self.shared.state.lock();

		if let Some(entry) = state.entries.get_mut(&key) {
			entry.payload = payload;
			tracing::debug!(%key, retry_count = entry.retry_count, "coalesced buffered write");
		} else {
			let seq = state.next_seq;
			state.next_seq += 1;
			state.entries.insert(
				key.clone(),
				QueueEntry {
					key: key.clone(),
					payload,
					queued_at: Instant::now(),
					retry_count: 0,
					seq,
				},
			);
			tracing::debug!(%key, queued = state.entries.len(), "buffered write");
		}

		if state.timer.is_none() {
			state.timer = arm_timer(Arc::downgrade(&self.shared), self.shared.config.flush_interval());
		}
	}

	/// Drains the queue: cancels the pending timer and flushes batch after
	/// batch until nothing is left. Waits for in-flight calls rather than
	/// cancelling them.
	pub async fn flush_now(&self) -> FlushReport {
		if let Some(timer) = self.shared.state.lock().timer.take() {
			timer.abort();
		}

		let mut report = FlushReport::default();
		loop {
			let step = self.shared.flush_once().await;
			if step.is_empty() {
				break;
			}
			report.merge(step);
		}

		tracing::info!(
			persisted = report.persisted.len(),
			dropped = report.dropped.len(),
			"queue drained"
		);
		report
	}

	pub fn len(&self) -> usize {
		self.shared.state.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Snapshot of the buffered entry for `key`.
	pub fn entry(&self, key: &str) -> Option<QueueEntry> {
		self.shared.state.lock().entries.get(key).cloned()
	}

	/// Whether a flush timer is armed.
	pub fn is_scheduled(&self) -> bool {
		self.shared.state.lock().timer.is_some()
	}

	/// Cancels the flush timer. Buffered entries stay in memory.
	pub fn destroy(&self) {
		if let Some(timer) = self.shared.state.lock().timer.take() {
			timer.abort();
		}
	}
}

impl Drop for BatchQueue {
	fn drop(&mut self) {
		self.destroy();
		let remaining = self.len();
		if remaining > 0 {
			tracing::warn!(remaining, "batch queue dropped with unflushed writes");
		}
	}
}

impl QueueShared {
	/// Takes up to `batch_size` oldest entries, writes them concurrently and
	/// requeues or drops the failures.
	async fn flush_once(&self) -> FlushReport {
		let _flushing = self.flush_lock.lock().await;

		let batch = self.take_batch();
		if batch.is_empty() {
			return FlushReport::default();
		}
		tracing::debug!(size = batch.len(), "flushing batch");

		let requests: Vec<(String, tether_protocol::RequestOptions)> = batch
			.iter()
			.map(|entry| self.target.request(&entry.key, &entry.payload))
			.collect();
		let outcomes = join_all(
			requests
				.into_iter()
				.map(|(url, options)| async move { self.coordinator.execute(&url, options).await }),
		)
		.await;

		let mut report = FlushReport::default();
		for (entry, outcome) in batch.into_iter().zip(outcomes) {
			match outcome {
				Ok(response) => {
					tracing::debug!(key = %entry.key, retry_count = entry.retry_count, "write persisted");
					let persisted = PersistedWrite {
						key: entry.key,
						payload: entry.payload,
						retry_count: entry.retry_count,
						response,
					};
					if let Some(handler) = &self.on_persist {
						handler(&persisted);
					}
					report.persisted.push(persisted);
				}
				Err(err) => self.handle_failure(entry, err, &mut report),
			}
		}
		report
	}

	fn take_batch(&self) -> Vec<QueueEntry> {
		let mut state = self.state.lock();
		let mut order: Vec<(Instant, u64, String)> = state
			.entries
			.values()
			.map(|entry| (entry.queued_at, entry.seq, entry.key.clone()))
			.collect();
		order.sort();

		order
			.into_iter()
			.take(self.config.batch_size)
			.filter_map(|(_, _, key)| state.entries.remove(&key))
			.collect()
	}

	fn handle_failure(&self, mut entry: QueueEntry, err: Error, report: &mut FlushReport) {
		let attempts = entry.retry_count + 1;
		let mut state = self.state.lock();

		if state.entries.contains_key(&entry.key) {
			tracing::debug!(key = %entry.key, error = %err, "failed write superseded by newer payload");
			report.superseded.push(entry.key);
			return;
		}

		let retryable = err.is_retryable();
		if !retryable || attempts >= self.config.max_retries {
			drop(state);
			if retryable {
				tracing::error!(key = %entry.key, attempts, error = %err, "dropping write after exhausting retries");
			} else {
				tracing::error!(key = %entry.key, attempts, error = %err, "dropping write after non-retryable failure");
			}
			let exhausted = Error::QueueExhausted {
				key: entry.key.clone(),
				attempts,
				last_error: Box::new(err),
			};
			if let Some(handler) = &self.on_error {
				handler(&exhausted);
			}
			report.dropped.push(entry.key);
			return;
		}

		tracing::warn!(key = %entry.key, attempts, error = %err, "write failed, will retry");
		entry.retry_count = attempts;
		report.retried.push(entry.key.clone());
		state.entries.insert(entry.key.clone(), entry);
	}
}

/// Spawns the flush timer. After its flush the timer re-arms itself if
/// entries remain, otherwise the queue goes idle.
fn arm_timer(shared: Weak<QueueShared>, interval: std::time::Duration) -> Option<JoinHandle<()>> {
	let Ok(handle) = tokio::runtime::Handle::try_current() else {
		tracing::warn!("no async runtime; buffered writes wait for an explicit flush");
		return None;
	};

	Some(handle.spawn(async move {
		tokio::time::sleep(interval).await;
		let Some(queue) = shared.upgrade() else {
			return;
		};
		// Detach before flushing so flush_now cannot abort a batch mid-flight.
		drop(queue.state.lock().timer.take());

		queue.flush_once().await;

		let mut state = queue.state.lock();
		if !state.entries.is_empty() && state.timer.is_none() {
			state.timer = arm_timer(Arc::downgrade(&queue), interval);
		}
	}))
}
