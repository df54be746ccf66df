use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Aggregate coordinator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStats {
	/// Network calls actually started.
	pub total_requests: u64,
	/// Calls served by joining an in-flight request.
	pub duplicate_requests: u64,
	pub failed_requests: u64,
	/// Entries abandoned by the timeout.
	pub evicted_requests: u64,
	/// Live entries at snapshot time.
	pub pending_requests: usize,
}

#[derive(Debug, Default)]
pub(super) struct StatsCounters {
	total: AtomicU64,
	duplicate: AtomicU64,
	failed: AtomicU64,
	evicted: AtomicU64,
}

impl StatsCounters {
	pub(super) fn record_request(&self) {
		self.total.fetch_add(1, Ordering::Relaxed);
	}

	pub(super) fn record_duplicate(&self) {
		self.duplicate.fetch_add(1, Ordering::Relaxed);
	}

	pub(super) fn record_failure(&self) {
		self.failed.fetch_add(1, Ordering::Relaxed);
	}

	pub(super) fn record_eviction(&self) {
		self.evicted.fetch_add(1, Ordering::Relaxed);
	}

	pub(super) fn reset(&self) {
		for counter in [&self.total, &self.duplicate, &self.failed, &self.evicted] {
			counter.store(0, Ordering::Relaxed);
		}
	}

	pub(super) fn snapshot(&self, pending: usize) -> CoordinatorStats {
		CoordinatorStats {
			total_requests: self.total.load(Ordering::Relaxed),
			duplicate_requests: self.duplicate.load(Ordering::Relaxed),
			failed_requests: self.failed.load(Ordering::Relaxed),
			evicted_requests: self.evicted.load(Ordering::Relaxed),
			pending_requests: pending,
		}
	}
}
