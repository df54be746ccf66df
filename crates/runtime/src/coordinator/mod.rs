//! Request coordination layer.
//!
//! The [`Coordinator`] keeps one pending entry per request fingerprint. Every
//! caller presenting a fingerprint that is already in flight is attached to the
//! existing entry and receives the same settlement, so at most one network
//! call per fingerprint is outstanding at any time.
//!
//! # Request Flow
//!
//! 1. Caller invokes [`Coordinator::execute`] with a URL and [`RequestOptions`]
//! 2. The fingerprint of `(method, url, body)` is computed
//! 3. A live entry for the fingerprint gets a new waiter; otherwise a new entry
//!    is created, the busy count is acquired and the network call is spawned
//! 4. The response is checked against the status discriminator
//! 5. The entry is removed and the outcome is sent to every waiter
//!
//! Entries that never settle are abandoned after their timeout by a per-entry
//! expiry timer, with a periodic sweep as backstop. A settlement that arrives
//! after abandonment is discarded.

mod pending;
mod stats;


use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde_json::Value;
use tether_protocol::{Fingerprint, HttpResponse, RequestOptions, fingerprint};
use tokio::sync::oneshot;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::busy::{BusyIndicator, BusyTracker, NoopIndicator};
use crate::config::CoordinatorConfig;
use crate::error::{Error, ErrorHandler, Result};
use crate::transport::Transport;

use pending::PendingEntry;
pub use stats::CoordinatorStats;
use stats::StatsCounters;

/// Longest response body excerpt quoted in a transport error.
const BODY_EXCERPT_LEN: usize = 200;

/// Builder for [`Coordinator`].
pub struct CoordinatorBuilder {
	transport: Arc<dyn Transport>,
	config: CoordinatorConfig,
	indicator: Arc<dyn BusyIndicator>,
	on_error: Option<ErrorHandler>,
}

impl CoordinatorBuilder {
	pub fn config(mut self, config: CoordinatorConfig) -> Self {
		self.config = config;
		self
	}

	pub fn indicator(mut self, indicator: Arc<dyn BusyIndicator>) -> Self {
		self.indicator = indicator;
		self
	}

	/// Registers the error channel. Protocol errors are reported once per
	/// operation, regardless of how many callers were waiting on it.
	pub fn error_handler(mut self, handler: impl Fn(&Error) + Send + Sync + 'static) -> Self {
		self.on_error = Some(Arc::new(handler));
		self
	}

	pub fn build(self) -> Result<Coordinator> {
		self.config.validate()?;
		Ok(Coordinator {
			shared: Arc::new(Shared {
				config: self.config,
				transport: self.transport,
				pending: DashMap::new(),
				stats: StatsCounters::default(),
				busy: BusyTracker::new(self.indicator),
				on_error: self.on_error,
				next_id: AtomicU64::new(0),
				destroyed: AtomicBool::new(false),
			}),
			sweeper: Mutex::new(None),
		})
	}
}

/// State shared between the coordinator handle and its background tasks.
pub(crate) struct Shared {
	config: CoordinatorConfig,
	transport: Arc<dyn Transport>,
	/// At most one entry per fingerprint.
	pending: DashMap<Fingerprint, PendingEntry>,
	stats: StatsCounters,
	busy: BusyTracker,
	on_error: Option<ErrorHandler>,
	next_id: AtomicU64,
	destroyed: AtomicBool,
}

/// Deduplicating request coordinator.
///
/// Owns its pending table, statistics and timers; several isolated instances
/// can coexist. Background tasks are started lazily on the first call and are
/// torn down by [`destroy`](Self::destroy) or on drop.
pub struct Coordinator {
	shared: Arc<Shared>,
	sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
	pub fn builder(transport: Arc<dyn Transport>) -> CoordinatorBuilder {
		CoordinatorBuilder {
			transport,
			config: CoordinatorConfig::default(),
			indicator: Arc::new(NoopIndicator),
			on_error: None,
		}
	}

	pub fn new(transport: Arc<dyn Transport>, config: CoordinatorConfig) -> Result<Self> {
		Self::builder(transport).config(config).build()
	}

	pub fn config(&self) -> &CoordinatorConfig {
		&self.shared.config
	}

	/// Performs a request, sharing the outcome with every concurrent caller
	/// that presents the same fingerprint.
	///
	/// Failures are never retried here. Must run inside a Tokio runtime, which
	/// hosts the request and its timers; elsewhere it fails with
	/// [`Error::InvalidConfig`].
	pub async fn execute(&self, url: &str, options: RequestOptions) -> Result<Value> {
		if self.shared.destroyed.load(Ordering::Acquire) {
			return Err(Error::Destroyed);
		}
		let runtime = Handle::try_current()
			.map_err(|_| Error::InvalidConfig("executing requests requires a Tokio runtime".into()))?;
		self.ensure_sweeper(&runtime);

		let fingerprint = fingerprint(options.method.as_ref(), url, options.body.as_ref());
		let (tx, rx) = oneshot::channel();

		let leader = match self.shared.pending.entry(fingerprint.clone()) {
			Entry::Occupied(mut occupied) => {
				let entry = occupied.get_mut();
				entry.waiters.push(tx);
				self.shared.stats.record_duplicate();
				tracing::debug!(
					fingerprint = %fingerprint,
					waiters = entry.waiters.len(),
					"joined in-flight request"
				);
				None
			}
			Entry::Vacant(vacant) => {
				let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
				let timeout = options
					.timeout_ms
					.map(|ms| Duration::from_millis(ms.max(1)))
					.unwrap_or_else(|| self.shared.config.timeout());
				let expiry = pending::spawn_expiry(&runtime, Arc::downgrade(&self.shared), fingerprint.clone(), id, timeout);
				// Acquire before the entry is visible to expiry and destroy().
				self.shared.busy.acquire();
				vacant.insert(PendingEntry::new(id, fingerprint.clone(), timeout, tx, expiry));
				self.shared.stats.record_request();
				Some(id)
			}
		};

		if let Some(id) = leader {
			tracing::debug!(fingerprint = %fingerprint, id, %url, "starting request");

			let shared = Arc::clone(&self.shared);
			let url = url.to_string();
			runtime.spawn(async move {
				let outcome = match shared.transport.send(&url, &options).await {
					Ok(response) => shared.interpret(response),
					Err(err) => Err(err),
				};
				shared.settle(&fingerprint, id, outcome);
			});
		}

		rx.await.map_err(|_| Error::ChannelClosed)?
	}

	/// Snapshot of the aggregate counters.
	pub fn stats(&self) -> CoordinatorStats {
		self.shared.stats.snapshot(self.shared.pending.len())
	}

	pub fn reset_stats(&self) {
		self.shared.stats.reset();
	}

	/// Number of live pending entries.
	pub fn pending_count(&self) -> usize {
		self.shared.pending.len()
	}

	/// Current busy reference count.
	pub fn busy_count(&self) -> usize {
		self.shared.busy.count()
	}

	pub fn is_destroyed(&self) -> bool {
		self.shared.destroyed.load(Ordering::Acquire)
	}

	/// Cancels the sweep timer and every entry's expiry timer, then clears the
	/// table. Callers still waiting receive [`Error::Destroyed`]. Idempotent.
	pub fn destroy(&self) {
		if self.shared.destroyed.swap(true, Ordering::AcqRel) {
			return;
		}
		if let Some(sweeper) = self.sweeper.lock().take() {
			sweeper.abort();
		}

		let keys: Vec<Fingerprint> = self.shared.pending.iter().map(|entry| entry.key().clone()).collect();
		let mut cleared = 0usize;
		for key in keys {
			if let Some((_, entry)) = self.shared.pending.remove(&key) {
				self.shared.busy.release();
				entry.finish(Err(Error::Destroyed));
				cleared += 1;
			}
		}

		tracing::info!(cleared, "coordinator destroyed");
	}

	fn ensure_sweeper(&self, runtime: &Handle) {
		let mut sweeper = self.sweeper.lock();
		if sweeper.is_none() {
			let period = self.shared.config.cleanup_interval();
			*sweeper = Some(runtime.spawn(pending::sweep_loop(Arc::downgrade(&self.shared), period)));
		}
	}

	#[cfg(test)]
	pub(crate) fn sweep_at(&self, now: Instant) -> usize {
		self.shared.sweep(now)
	}
}

impl Drop for Coordinator {
	fn drop(&mut self) {
		self.destroy();
	}
}

impl std::fmt::Debug for Coordinator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Coordinator")
			.field("config", &self.shared.config)
			.field("pending", &self.shared.pending.len())
			.field("busy", &self.shared.busy.count())
			.finish()
	}
}

impl Shared {
	/// Applies the response contract: success only on a 2xx status with a JSON
	/// object whose status discriminator is `true`.
	fn interpret(&self, response: HttpResponse) -> Result<Value> {
		if !response.is_success() {
			return Err(Error::Transport {
				status: Some(response.status),
				message: excerpt(&response.body),
			});
		}

		let value: Value = serde_json::from_str(&response.body)
			.map_err(|e| Error::Protocol(format!("response body is not valid JSON: {e}")))?;
		let object = value
			.as_object()
			.ok_or_else(|| Error::Protocol("response body is not an object".to_string()))?;

		let field = &self.config.status_field;
		match object.get(field) {
			Some(Value::Bool(true)) => Ok(value),
			Some(Value::Bool(false)) => {
				let message = object
					.get(&self.config.message_field)
					.and_then(Value::as_str)
					.unwrap_or("request rejected by server")
					.to_string();
				Err(Error::Transport {
					status: Some(response.status),
					message,
				})
			}
			Some(other) => Err(Error::Protocol(format!("'{field}' must be a boolean, got {other}"))),
			None => Err(Error::Protocol(format!("response is missing '{field}'"))),
		}
	}

	/// Delivers the outcome of entry `id`. No-op if the entry was already
	/// abandoned or replaced.
	fn settle(&self, fingerprint: &Fingerprint, id: u64, outcome: Result<Value>) {
		let Some((_, entry)) = self.pending.remove_if(fingerprint, |_, entry| entry.id == id) else {
			tracing::debug!(fingerprint = %fingerprint, id, "discarding settlement of abandoned request");
			return;
		};
		self.busy.release();

		if let Err(err) = &outcome {
			self.stats.record_failure();
			tracing::debug!(fingerprint = %fingerprint, id, error = %err, "request failed");
			if err.is_protocol() {
				self.report(err);
			}
		}

		entry.finish(outcome);
	}

	/// Abandons entry `id`, failing its waiters with [`Error::Timeout`].
	fn evict(&self, fingerprint: &Fingerprint, id: u64) -> bool {
		let Some((_, entry)) = self.pending.remove_if(fingerprint, |_, entry| entry.id == id) else {
			return false;
		};
		self.busy.release();
		self.stats.record_eviction();

		let timeout_ms = entry.timeout.as_millis() as u64;
		tracing::warn!(
			fingerprint = %fingerprint,
			id,
			timeout_ms,
			waiters = entry.waiters.len(),
			"abandoning request that did not settle in time"
		);
		entry.finish(Err(Error::Timeout {
			fingerprint: fingerprint.to_string(),
			timeout_ms,
		}));
		true
	}

	/// Evicts every entry older than its timeout as of `now`.
	fn sweep(&self, now: Instant) -> usize {
		let stale: Vec<(Fingerprint, u64)> = self
			.pending
			.iter()
			.filter(|entry| entry.is_expired(now))
			.map(|entry| (entry.key().clone(), entry.id))
			.collect();

		stale.iter().filter(|(fingerprint, id)| self.evict(fingerprint, *id)).count()
	}

	fn report(&self, err: &Error) {
		if let Some(handler) = &self.on_error {
			handler(err);
		}
	}
}

fn excerpt(body: &str) -> String {
	let trimmed = body.trim();
	if trimmed.is_empty() {
		return "empty response body".to_string();
	}
	match trimmed.char_indices().nth(BODY_EXCERPT_LEN) {
		Some((cut, _)) => format!("{}...", &trimmed[..cut]),
		None => trimmed.to_string(),
	}
}
