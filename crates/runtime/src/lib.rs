//! Tether runtime - request coordination, batched persistence, and state sync
//!
//! This crate provides the layer every feature client is built on:
//!
//! - **Coordinator**: At most one in-flight network call per request fingerprint
//! - **Batch queue**: Coalesced, bounded, retried background writes
//! - **State sync**: Last-write-wins propagation of small records across contexts
//! - **Client**: Base URL, auth headers and degrading read helpers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐
//! │  ApiClient   │     │  BatchQueue  │  Coalescing + retry budget
//! └──────┬───────┘     └──────┬───────┘
//!        │ execute            │ execute per entry
//! ┌──────▼────────────────────▼───────┐
//! │            Coordinator            │  Pending table keyed by fingerprint
//! └─────────────────┬─────────────────┘
//!                   │ send
//!            ┌──────▼──────┐
//!            │  Transport  │  reqwest, or a test double
//!            └─────────────┘
//!
//! ┌──────────────┐  set/get/subscribe  ┌──────────────────────────┐
//! │  StateSync   │ ──────────────────► │ SharedStore / LocalStore │
//! └──────────────┘                     └──────────────────────────┘
//! ```
//!
//! Every component owns its tables and timers. Nothing is global, so isolated
//! instances can coexist and each is torn down by `destroy()` or on drop.

pub mod busy;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod queue;
pub mod sync;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export key types at crate root
pub use busy::{BusyCounter, BusyIndicator, BusyTracker, NoopIndicator, Transition};
pub use client::{ApiClient, StaticToken, TokenProvider};
pub use config::{CoordinatorConfig, QueueConfig};
pub use coordinator::{Coordinator, CoordinatorBuilder, CoordinatorStats};
pub use error::{Error, ErrorHandler, Result, StoreError, StoreResult};
pub use queue::{
	BatchQueue, BatchQueueBuilder, FlushReport, JsonPostTarget, PersistHandler, PersistedWrite, QueueEntry, WriteTarget,
};
pub use sync::{
	Clock, LocalStore, MutationGuard, SharedStore, StateHandler, StateStore, StateSync, StateSyncBuilder, Subscription,
	SystemClock,
};
pub use transport::{HttpTransport, Transport, TransportFuture};
