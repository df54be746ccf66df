//! Cross-context state synchronization.
//!
//! Each context owns a [`StateSync`] bound to the same [`StateStore`]. Writes
//! are stamped with the context's [`Clock`] and persisted to the shared store;
//! every context subscribed to a key is told about the change and applies it
//! under last-write-wins on `updated_at`.
//!
//! Per key, a consumer is either idle or applying. A change that arrives while
//! the key is applying, or while a [`MutationGuard`] for it is held, is
//! deferred; only the newest deferred record is kept and it is reconsidered
//! once the key settles.
//!
//! When the shared store reports [`StoreError::Unavailable`] the context
//! switches to its [`LocalStore`] for good. It stays internally consistent but
//! stops seeing other contexts until it is rebuilt.

mod clock;
mod store;


use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tether_protocol::{ContextId, StateRecord, StoreChange};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

use crate::error::{Error, Result, StoreError};

pub use clock::{Clock, SystemClock};
pub use store::{LocalStore, SharedStore, StateStore};

/// Callback invoked with each applied value.
pub type StateHandler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
	#[default]
	Idle,
	Applying,
}

#[derive(Default)]
struct KeyState {
	/// Newest `updated_at` this context applied or wrote.
	last_applied: Option<i64>,
	phase: Phase,
	/// Live [`MutationGuard`]s.
	mutating: usize,
	deferred: Option<StateRecord>,
	handlers: Vec<(u64, StateHandler)>,
}

impl KeyState {
	fn is_busy(&self) -> bool {
		self.mutating > 0 || self.phase == Phase::Applying
	}

	fn defer(&mut self, record: StateRecord) {
		if record.supersedes(self.deferred.as_ref().map(|deferred| deferred.updated_at)) {
			self.deferred = Some(record);
		}
	}
}

/// Handle returned by [`StateSync::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
	id: u64,
	key: String,
}

impl Subscription {
	pub fn key(&self) -> &str {
		&self.key
	}
}

/// Builder for [`StateSync`].
pub struct StateSyncBuilder {
	shared: Arc<dyn StateStore>,
	context: Option<ContextId>,
	local: Option<LocalStore>,
	clock: Arc<dyn Clock>,
}

impl StateSyncBuilder {
	pub fn context(mut self, context: ContextId) -> Self {
		self.context = Some(context);
		self
	}

	pub fn local(mut self, local: LocalStore) -> Self {
		self.local = Some(local);
		self
	}

	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	pub fn build(self) -> StateSync {
		let context = self.context.unwrap_or_else(ContextId::generate);
		tracing::debug!(context = %context, "state sync created");
		StateSync {
			inner: Arc::new(SyncInner {
				context,
				shared: self.shared,
				local: self.local.unwrap_or_default(),
				clock: self.clock,
				keys: Mutex::new(HashMap::new()),
				degraded: AtomicBool::new(false),
				destroyed: AtomicBool::new(false),
				next_subscription: AtomicU64::new(0),
			}),
			listener: Mutex::new(None),
		}
	}
}

struct SyncInner {
	context: ContextId,
	shared: Arc<dyn StateStore>,
	local: LocalStore,
	clock: Arc<dyn Clock>,
	keys: Mutex<HashMap<String, KeyState>>,
	degraded: AtomicBool,
	destroyed: AtomicBool,
	next_subscription: AtomicU64,
}

/// One context's view of the shared state.
pub struct StateSync {
	inner: Arc<SyncInner>,
	listener: Mutex<Option<JoinHandle<()>>>,
}

impl StateSync {
	pub fn builder(shared: Arc<dyn StateStore>) -> StateSyncBuilder {
		StateSyncBuilder {
			shared,
			context: None,
			local: None,
			clock: Arc::new(SystemClock),
		}
	}

	pub fn new(shared: Arc<dyn StateStore>) -> Self {
		Self::builder(shared).build()
	}

	pub fn context(&self) -> &ContextId {
		&self.inner.context
	}

	/// True once the shared store has been found unreachable.
	pub fn is_degraded(&self) -> bool {
		self.inner.degraded.load(Ordering::Acquire)
	}

	/// Stamps `value` with the current time and persists it.
	///
	/// The stamp becomes this context's last applied timestamp for `key`, so
	/// older records arriving afterwards are ignored.
	pub async fn write(&self, key: impl Into<String>, value: Value) -> Result<StateRecord> {
		self.ensure_alive()?;
		let record = StateRecord::new(key, value, self.inner.clock.now_ms());
		{
			let mut keys = self.inner.keys.lock();
			let state = keys.entry(record.key.clone()).or_default();
			if record.supersedes(state.last_applied) {
				state.last_applied = Some(record.updated_at);
			}
		}

		if !self.is_degraded() {
			match self.inner.shared.set(record.clone(), &self.inner.context).await {
				Ok(()) => return Ok(record),
				Err(StoreError::Unavailable(reason)) => {
					self.inner.degrade(&reason);
				}
				Err(err) => return Err(err.into()),
			}
		}

		self.inner.local.set(record.clone(), &self.inner.context).await?;
		Ok(record)
	}

	/// Reads the record for `key`, preferring the shared store.
	///
	/// The local store is consulted only when the shared store has nothing or
	/// is unreachable.
	pub async fn read(&self, key: &str) -> Result<Option<StateRecord>> {
		self.ensure_alive()?;
		if !self.is_degraded() {
			match self.inner.shared.get(key).await {
				Ok(Some(record)) => return Ok(Some(record)),
				Ok(None) => {}
				Err(StoreError::Unavailable(reason)) => {
					tracing::warn!(context = %self.inner.context, key, %reason, "shared store unreachable, reading local");
				}
				Err(err) => return Err(err.into()),
			}
		}
		Ok(self.inner.local.get(key).await?)
	}

	/// Registers `handler` for changes to `key` from any context, this one
	/// included.
	///
	/// Starts the change listener on first use; requires a Tokio runtime.
	pub fn subscribe(&self, key: impl Into<String>, handler: impl Fn(&Value) + Send + Sync + 'static) -> Result<Subscription> {
		self.ensure_alive()?;
		self.ensure_listener()?;

		let key = key.into();
		let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
		self.inner
			.keys
			.lock()
			.entry(key.clone())
			.or_default()
			.handlers
			.push((id, Arc::new(handler)));
		tracing::debug!(context = %self.inner.context, key = %key, id, "subscribed");
		Ok(Subscription { id, key })
	}

	/// Returns false if the subscription was already gone.
	pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
		let mut keys = self.inner.keys.lock();
		let Some(state) = keys.get_mut(&subscription.key) else {
			return false;
		};
		let before = state.handlers.len();
		state.handlers.retain(|(id, _)| *id != subscription.id);
		state.handlers.len() != before
	}

	/// Marks `key` as being mutated locally. Incoming changes are held back
	/// until every guard for the key is dropped.
	pub fn begin_mutation(&self, key: impl Into<String>) -> MutationGuard {
		let key = key.into();
		self.inner.keys.lock().entry(key.clone()).or_default().mutating += 1;
		MutationGuard {
			inner: Arc::clone(&self.inner),
			key,
		}
	}

	pub fn last_applied(&self, key: &str) -> Option<i64> {
		self.inner.keys.lock().get(key).and_then(|state| state.last_applied)
	}

	/// Stops the listener and drops every handler. Idempotent.
	pub fn destroy(&self) {
		if self.inner.destroyed.swap(true, Ordering::AcqRel) {
			return;
		}
		if let Some(listener) = self.listener.lock().take() {
			listener.abort();
		}
		self.inner.keys.lock().clear();
		tracing::info!(context = %self.inner.context, "state sync destroyed");
	}

	pub fn is_destroyed(&self) -> bool {
		self.inner.destroyed.load(Ordering::Acquire)
	}

	fn ensure_alive(&self) -> Result<()> {
		if self.is_destroyed() { Err(Error::Destroyed) } else { Ok(()) }
	}

	fn ensure_listener(&self) -> Result<()> {
		let mut listener = self.listener.lock();
		if listener.is_some() {
			return Ok(());
		}
		let handle = tokio::runtime::Handle::try_current()
			.map_err(|_| Error::InvalidConfig("subscribing requires a Tokio runtime".into()))?;
		// Receivers are created before returning so no change is missed.
		let shared_rx = self.inner.shared.subscribe();
		let local_rx = self.inner.local.subscribe();
		*listener = Some(handle.spawn(listen(Arc::downgrade(&self.inner), shared_rx, local_rx)));
		Ok(())
	}
}

impl Drop for StateSync {
	fn drop(&mut self) {
		if let Some(listener) = self.listener.get_mut().take() {
			listener.abort();
		}
	}
}

impl std::fmt::Debug for StateSync {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StateSync")
			.field("context", &self.inner.context)
			.field("degraded", &self.is_degraded())
			.field("destroyed", &self.is_destroyed())
			.finish()
	}
}

impl SyncInner {
	fn degrade(&self, reason: &str) {
		if !self.degraded.swap(true, Ordering::AcqRel) {
			tracing::warn!(context = %self.context, %reason, "shared store unreachable, falling back to local store");
		}
	}

	fn on_change(&self, change: StoreChange) {
		let Some(record) = change.new_value else {
			return;
		};
		tracing::trace!(context = %self.context, key = %record.key, origin = %change.origin, "change received");
		self.receive(record);
	}

	/// Runs the per-key state machine for `record` and anything it leaves
	/// deferred.
	fn receive(&self, record: StateRecord) {
		let mut next = Some(record);
		while let Some(record) = next.take() {
			let handlers: Vec<StateHandler> = {
				let mut keys = self.keys.lock();
				let Some(state) = keys.get_mut(&record.key) else {
					return;
				};
				if state.is_busy() {
					tracing::debug!(context = %self.context, key = %record.key, updated_at = record.updated_at, "deferring change");
					state.defer(record);
					return;
				}
				if !record.supersedes(state.last_applied) {
					tracing::debug!(
						context = %self.context,
						key = %record.key,
						updated_at = record.updated_at,
						last_applied = ?state.last_applied,
						"ignoring stale change"
					);
					return;
				}
				state.phase = Phase::Applying;
				state.last_applied = Some(record.updated_at);
				state.handlers.iter().map(|(_, handler)| Arc::clone(handler)).collect()
			};

			for handler in handlers {
				handler(&record.value);
			}

			let mut keys = self.keys.lock();
			if let Some(state) = keys.get_mut(&record.key) {
				state.phase = Phase::Idle;
				if state.mutating == 0 {
					next = state.deferred.take();
				}
			}
		}
	}

	/// Re-reads every subscribed key after notifications were lost.
	async fn resync(&self) {
		let keys: Vec<String> = self
			.keys
			.lock()
			.iter()
			.filter(|(_, state)| !state.handlers.is_empty())
			.map(|(key, _)| key.clone())
			.collect();

		let store: &dyn StateStore = if self.degraded.load(Ordering::Acquire) {
			&self.local
		} else {
			self.shared.as_ref()
		};
		for key in keys {
			match store.get(&key).await {
				Ok(Some(record)) => self.receive(record),
				Ok(None) => {}
				Err(err) => tracing::warn!(context = %self.context, key = %key, error = %err, "resync read failed"),
			}
		}
	}
}

/// Holds back incoming changes for one key while alive.
pub struct MutationGuard {
	inner: Arc<SyncInner>,
	key: String,
}

impl MutationGuard {
	pub fn key(&self) -> &str {
		&self.key
	}
}

impl Drop for MutationGuard {
	fn drop(&mut self) {
		let deferred = {
			let mut keys = self.inner.keys.lock();
			let Some(state) = keys.get_mut(&self.key) else {
				return;
			};
			state.mutating = state.mutating.saturating_sub(1);
			if state.is_busy() {
				None
			} else {
				state.deferred.take()
			}
		};
		if let Some(record) = deferred {
			self.inner.receive(record);
		}
	}
}

#[derive(Debug, Clone, Copy)]
enum Source {
	Shared,
	Local,
}

async fn listen(
	inner: Weak<SyncInner>,
	mut shared: broadcast::Receiver<StoreChange>,
	mut local: broadcast::Receiver<StoreChange>,
) {
	let mut shared_open = true;
	let mut local_open = true;

	while shared_open || local_open {
		let (source, received) = tokio::select! {
			received = shared.recv(), if shared_open => (Source::Shared, received),
			received = local.recv(), if local_open => (Source::Local, received),
		};
		let Some(inner) = inner.upgrade() else {
			break;
		};
		match received {
			Ok(change) => inner.on_change(change),
			Err(RecvError::Lagged(skipped)) => {
				tracing::warn!(context = %inner.context, ?source, skipped, "change notifications lagged, resyncing");
				inner.resync().await;
			}
			Err(RecvError::Closed) => match source {
				Source::Shared => shared_open = false,
				Source::Local => local_open = false,
			},
		}
	}
}
