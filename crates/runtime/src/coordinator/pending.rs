//! Pending entries and the timers that bound their lifetime.

use std::sync::Weak;
use std::time::Duration;

use serde_json::Value;
use tether_protocol::Fingerprint;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::Shared;
use crate::error::Result;

/// Bookkeeping for one in-flight operation.
pub(super) struct PendingEntry {
	/// Distinguishes successive entries for the same fingerprint.
	pub(super) id: u64,
	pub(super) fingerprint: Fingerprint,
	pub(super) created_at: Instant,
	pub(super) timeout: Duration,
	pub(super) waiters: Vec<oneshot::Sender<Result<Value>>>,
	expiry: Option<JoinHandle<()>>,
}

impl PendingEntry {
	pub(super) fn new(
		id: u64,
		fingerprint: Fingerprint,
		timeout: Duration,
		first_waiter: oneshot::Sender<Result<Value>>,
		expiry: JoinHandle<()>,
	) -> Self {
		Self {
			id,
			fingerprint,
			created_at: Instant::now(),
			timeout,
			waiters: vec![first_waiter],
			expiry: Some(expiry),
		}
	}

	pub(super) fn is_expired(&self, now: Instant) -> bool {
		now.saturating_duration_since(self.created_at) >= self.timeout
	}

	/// Cancels the expiry timer and hands `outcome` to every waiter.
	///
	/// Waiters that stopped listening are skipped.
	pub(super) fn finish(mut self, outcome: Result<Value>) {
		if let Some(expiry) = self.expiry.take() {
			expiry.abort();
		}
		for waiter in self.waiters {
			let _ = waiter.send(outcome.clone());
		}
	}
}

impl std::fmt::Debug for PendingEntry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PendingEntry")
			.field("id", &self.id)
			.field("fingerprint", &self.fingerprint)
			.field("created_at", &self.created_at)
			.field("waiters", &self.waiters.len())
			.finish()
	}
}

/// Spawns the timer that abandons entry `id` once `timeout` has elapsed.
pub(super) fn spawn_expiry(
	runtime: &Handle,
	shared: Weak<Shared>,
	fingerprint: Fingerprint,
	id: u64,
	timeout: Duration,
) -> JoinHandle<()> {
	runtime.spawn(async move {
		tokio::time::sleep(timeout).await;
		if let Some(shared) = shared.upgrade() {
			shared.evict(&fingerprint, id);
		}
	})
}

/// Periodic backstop that evicts entries older than their timeout.
///
/// Exits once the coordinator is gone.
pub(super) async fn sweep_loop(shared: Weak<Shared>, period: Duration) {
	let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		ticker.tick().await;
		let Some(shared) = shared.upgrade() else {
			break;
		};
		let evicted = shared.sweep(Instant::now());
		if evicted > 0 {
			tracing::debug!(evicted, "sweep evicted stale requests");
		}
	}
}
