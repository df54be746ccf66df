//! Wire-level types shared by the tether runtime and its callers.
//!
//! # Main Types
//!
//! - [`RequestOptions`] - method, headers, body and per-call timeout for one request
//! - [`HttpResponse`] - status and raw body returned by a transport
//! - [`Fingerprint`] - stable identity of a request description, see [`fingerprint()`]
//! - [`StateRecord`] / [`StoreChange`] - records held in a shared state store

pub mod fingerprint;
pub mod request;
pub mod state;

pub use fingerprint::{Fingerprint, canonical_json, fingerprint, normalize_body};
pub use request::{Body, HttpResponse, Method, RequestOptions};
pub use state::{ContextId, StateRecord, StoreChange};
