//! Durable state stores.
//!
//! [`SharedStore`] is visible to every context holding a clone of it and can
//! be backed by a JSON file so separate processes see the same records.
//! [`LocalStore`] has the same shape but belongs to a single context; it is
//! the fallback when the shared store becomes unreachable.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_protocol::{ContextId, StateRecord, StoreChange};
use tokio::sync::broadcast;

use crate::error::{StoreError, StoreResult};

/// Capacity of each store's change channel.
const CHANGE_CAPACITY: usize = 256;

/// Origin reported for records picked up from the backing file during a write.
const DISK_ORIGIN: &str = "disk";

/// Three-operation durable store.
///
/// `set` keeps whichever record has the higher `updated_at`; a write older
/// than the held record is dropped without a notification. Change
/// notifications are broadcast only after the write is durable.
#[async_trait]
pub trait StateStore: Send + Sync {
	async fn get(&self, key: &str) -> StoreResult<Option<StateRecord>>;

	async fn set(&self, record: StateRecord, origin: &ContextId) -> StoreResult<()>;

	fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// In-memory record table plus change channel.
struct Records {
	records: Mutex<HashMap<String, StateRecord>>,
	changes: broadcast::Sender<StoreChange>,
}

impl Records {
	fn new(initial: HashMap<String, StateRecord>) -> Self {
		let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
		Self {
			records: Mutex::new(initial),
			changes,
		}
	}

	fn get(&self, key: &str) -> Option<StateRecord> {
		self.records.lock().get(key).cloned()
	}

	fn insert(&self, record: StateRecord) -> Option<StateRecord> {
		self.records.lock().insert(record.key.clone(), record)
	}

	/// Inserts `record` unless the held record for its key is newer.
	fn merge(&self, record: StateRecord) -> Merge {
		let mut records = self.records.lock();
		match records.get(&record.key) {
			Some(held) if held.updated_at > record.updated_at => Merge::Stale,
			_ => Merge::Stored(records.insert(record.key.clone(), record)),
		}
	}

	fn remove(&self, key: &str) {
		self.records.lock().remove(key);
	}

	fn snapshot(&self) -> HashMap<String, StateRecord> {
		self.records.lock().clone()
	}

	fn announce(&self, change: StoreChange) {
		// No receivers is fine.
		let _ = self.changes.send(change);
	}
}

enum Merge {
	/// Stored, replacing the previous record if any.
	Stored(Option<StateRecord>),
	/// A newer record is already held.
	Stale,
}

/// Store shared by all contexts.
#[derive(Clone)]
pub struct SharedStore {
	inner: Arc<SharedInner>,
}

struct SharedInner {
	records: Records,
	path: Option<PathBuf>,
	available: AtomicBool,
	/// Serializes file writes.
	persist: tokio::sync::Mutex<()>,
}

impl SharedStore {
	/// In-memory store.
	pub fn new() -> Self {
		Self::with_records(HashMap::new(), None)
	}

	/// File-backed store. A missing file starts empty; an unreadable one is an error.
	pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
		let path = path.into();
		let records = load_records(&path)?;
		tracing::debug!(path = %path.display(), records = records.len(), "opened shared store");
		Ok(Self::with_records(records, Some(path)))
	}

	fn with_records(records: HashMap<String, StateRecord>, path: Option<PathBuf>) -> Self {
		Self {
			inner: Arc::new(SharedInner {
				records: Records::new(records),
				path,
				available: AtomicBool::new(true),
				persist: tokio::sync::Mutex::new(()),
			}),
		}
	}

	pub fn path(&self) -> Option<&Path> {
		self.inner.path.as_deref()
	}

	/// Marks the store unreachable, as when the owning extension context is
	/// invalidated. Every later call fails with [`StoreError::Unavailable`].
	pub fn invalidate(&self) {
		if self.inner.available.swap(false, Ordering::AcqRel) {
			tracing::warn!("shared store invalidated");
		}
	}

	pub fn is_available(&self) -> bool {
		self.inner.available.load(Ordering::Acquire)
	}

	/// Re-reads the backing file and announces every record that changed on
	/// disk, attributed to `origin`. Returns the number of changes.
	pub fn reload(&self, origin: &ContextId) -> StoreResult<usize> {
		self.ensure_available()?;
		let Some(path) = &self.inner.path else {
			return Ok(0);
		};

		Ok(self.absorb(load_records(path)?, origin))
	}

	/// Takes every record from `on_disk` that is newer than the one in memory
	/// and announces it. Returns the number taken.
	fn absorb(&self, on_disk: HashMap<String, StateRecord>, origin: &ContextId) -> usize {
		let mut changed = 0;
		for record in on_disk.into_values() {
			if self.inner.records.get(&record.key).as_ref() == Some(&record) {
				continue;
			}
			let Merge::Stored(old_value) = self.inner.records.merge(record.clone()) else {
				continue;
			};
			self.inner.records.announce(StoreChange {
				key: record.key.clone(),
				old_value,
				new_value: Some(record),
				origin: origin.clone(),
			});
			changed += 1;
		}
		changed
	}

	fn ensure_available(&self) -> StoreResult<()> {
		if self.is_available() {
			Ok(())
		} else {
			Err(StoreError::Unavailable("shared store context invalidated".into()))
		}
	}
}

impl Default for SharedStore {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for SharedStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SharedStore")
			.field("path", &self.inner.path)
			.field("available", &self.is_available())
			.finish()
	}
}

#[async_trait]
impl StateStore for SharedStore {
	async fn get(&self, key: &str) -> StoreResult<Option<StateRecord>> {
		self.ensure_available()?;
		Ok(self.inner.records.get(key))
	}

	async fn set(&self, record: StateRecord, origin: &ContextId) -> StoreResult<()> {
		self.ensure_available()?;

		let _persisting = self.inner.persist.lock().await;
		if let Some(path) = &self.inner.path {
			// Pick up what other processes wrote since this handle last looked.
			let on_disk = read_records(path).await?;
			let absorbed = self.absorb(on_disk, &ContextId::new(DISK_ORIGIN));
			if absorbed > 0 {
				tracing::debug!(path = %path.display(), absorbed, "merged records written elsewhere");
			}
		}

		let old_value = match self.inner.records.merge(record.clone()) {
			Merge::Stored(old_value) => old_value,
			Merge::Stale => {
				tracing::debug!(key = %record.key, updated_at = record.updated_at, "ignoring write older than stored record");
				return Ok(());
			}
		};
		if let Some(path) = &self.inner.path {
			if let Err(err) = save_records(path, &self.inner.records.snapshot()).await {
				// Roll back so memory never claims a write the file lacks.
				match &old_value {
					Some(previous) => {
						self.inner.records.insert(previous.clone());
					}
					None => {
						self.inner.records.remove(&record.key);
					}
				}
				return Err(err);
			}
		}

		self.inner.records.announce(StoreChange {
			key: record.key.clone(),
			old_value,
			new_value: Some(record),
			origin: origin.clone(),
		});
		Ok(())
	}

	fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
		self.inner.records.changes.subscribe()
	}
}

/// Per-context fallback store.
#[derive(Clone)]
pub struct LocalStore {
	records: Arc<Records>,
}

impl LocalStore {
	pub fn new() -> Self {
		Self {
			records: Arc::new(Records::new(HashMap::new())),
		}
	}
}

impl Default for LocalStore {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StateStore for LocalStore {
	async fn get(&self, key: &str) -> StoreResult<Option<StateRecord>> {
		Ok(self.records.get(key))
	}

	async fn set(&self, record: StateRecord, origin: &ContextId) -> StoreResult<()> {
		let Merge::Stored(old_value) = self.records.merge(record.clone()) else {
			return Ok(());
		};
		self.records.announce(StoreChange {
			key: record.key.clone(),
			old_value,
			new_value: Some(record),
			origin: origin.clone(),
		});
		Ok(())
	}

	fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
		self.records.changes.subscribe()
	}
}

fn load_records(path: &Path) -> StoreResult<HashMap<String, StateRecord>> {
	parse_records(std::fs::read_to_string(path))
}

async fn read_records(path: &Path) -> StoreResult<HashMap<String, StateRecord>> {
	parse_records(tokio::fs::read_to_string(path).await)
}

fn parse_records(read: std::io::Result<String>) -> StoreResult<HashMap<String, StateRecord>> {
	match read {
		Ok(content) if content.trim().is_empty() => Ok(HashMap::new()),
		Ok(content) => Ok(serde_json::from_str(&content)?),
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
		Err(err) => Err(err.into()),
	}
}

/// Writes to a per-process sibling temp file and renames it into place.
async fn save_records(path: &Path, records: &HashMap<String, StateRecord>) -> StoreResult<()> {
	if let Some(parent) = path.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}
	let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
	tokio::fs::write(&tmp, serde_json::to_string_pretty(records)?).await?;
	tokio::fs::rename(&tmp, path).await?;
	Ok(())
}
