//! Reference-counted busy indicator.
//!
//! [`BusyCounter`] reports the edges of the concurrent-operation count so the
//! indicator side effect is testable on its own. [`BusyTracker`] pairs the
//! counter with a [`BusyIndicator`] that is only touched on `0 -> 1` and
//! `1 -> 0`, so overlapping operations produce one continuous indicator.

use std::sync::Arc;

use parking_lot::Mutex;

/// Edge reported by [`BusyCounter::acquire`] / [`BusyCounter::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
	/// Count went from 0 to 1.
	Activated,
	/// Count went from 1 to 0.
	Deactivated,
	Unchanged,
}

#[derive(Debug, Default)]
pub struct BusyCounter {
	count: Mutex<usize>,
}

impl BusyCounter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn acquire(&self) -> Transition {
		let mut count = self.count.lock();
		*count += 1;
		if *count == 1 { Transition::Activated } else { Transition::Unchanged }
	}

	/// Saturates at zero.
	pub fn release(&self) -> Transition {
		let mut count = self.count.lock();
		match *count {
			0 => {
				tracing::warn!("busy counter released while already idle");
				Transition::Unchanged
			}
			1 => {
				*count = 0;
				Transition::Deactivated
			}
			_ => {
				*count -= 1;
				Transition::Unchanged
			}
		}
	}

	pub fn count(&self) -> usize {
		*self.count.lock()
	}
}

/// UI-facing busy signal.
pub trait BusyIndicator: Send + Sync {
	fn show(&self);
	fn hide(&self);
}

/// Indicator that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIndicator;

impl BusyIndicator for NoopIndicator {
	fn show(&self) {}
	fn hide(&self) {}
}

/// Counter plus indicator. Edges and indicator calls happen under one lock so
/// `show`/`hide` can never be observed out of order.
pub struct BusyTracker {
	counter: BusyCounter,
	indicator: Arc<dyn BusyIndicator>,
	edges: Mutex<()>,
}

impl BusyTracker {
	pub fn new(indicator: Arc<dyn BusyIndicator>) -> Self {
		Self {
			counter: BusyCounter::new(),
			indicator,
			edges: Mutex::new(()),
		}
	}

	pub fn acquire(&self) -> Transition {
		let _edges = self.edges.lock();
		let transition = self.counter.acquire();
		if transition == Transition::Activated {
			self.indicator.show();
		}
		transition
	}

	pub fn release(&self) -> Transition {
		let _edges = self.edges.lock();
		let transition = self.counter.release();
		if transition == Transition::Deactivated {
			self.indicator.hide();
		}
		transition
	}

	pub fn count(&self) -> usize {
		self.counter.count()
	}
}

impl Default for BusyTracker {
	fn default() -> Self {
		Self::new(Arc::new(NoopIndicator))
	}
}

impl std::fmt::Debug for BusyTracker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BusyTracker").field("count", &self.count()).finish()
	}
}
