//! Error types for the tether runtime.
//!
//! [`Error`] is `Clone`: a single settlement of a coordinated request is
//! delivered to every caller that shares its fingerprint.

use std::sync::Arc;

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for state store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Caller-registered error channel.
///
/// Invoked once per reportable event (a protocol failure, a dropped write),
/// never once per waiter or per retry attempt.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Errors surfaced by the coordinator, the batch queue and the state synchronizer.
#[derive(Debug, Clone, Error)]
pub enum Error {
	/// Network unreachable, non-2xx status, or an explicit failure reported by the server.
	#[error("Transport error{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
	Transport { status: Option<u16>, message: String },

	/// Response body malformed or missing its status discriminator.
	#[error("Protocol error: {0}")]
	Protocol(String),

	/// The coordinator abandoned a pending request.
	#[error("Timeout: request abandoned after {timeout_ms}ms ({fingerprint})")]
	Timeout { fingerprint: String, timeout_ms: u64 },

	/// A buffered write was dropped after running out of retries or failing
	/// in a way no retry can fix.
	#[error("Write for '{key}' dropped after {attempts} attempts: {last_error}")]
	QueueExhausted {
		key: String,
		attempts: u32,
		last_error: Box<Error>,
	},

	/// State store failure.
	#[error("Store error: {0}")]
	Store(#[from] StoreError),

	/// The owning component was torn down before the operation settled.
	#[error("Destroyed before the operation settled")]
	Destroyed,

	/// Result channel closed unexpectedly.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// Configuration rejected by validation.
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),
}

impl Error {
	pub(crate) fn transport(message: impl Into<String>) -> Self {
		Error::Transport {
			status: None,
			message: message.into(),
		}
	}

	/// Returns true if this is a coordinator timeout.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout { .. })
	}

	/// Returns true for network and status failures.
	pub fn is_transport(&self) -> bool {
		matches!(self, Error::Transport { .. })
	}

	/// Returns true for malformed responses.
	pub fn is_protocol(&self) -> bool {
		matches!(self, Error::Protocol(_))
	}

	/// Whether a caller-side retry policy may try again.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Error::Transport { .. } | Error::Protocol(_) | Error::Timeout { .. } | Error::ChannelClosed)
	}

	/// HTTP status attached to a transport failure, if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			Error::Transport { status, .. } => *status,
			_ => None,
		}
	}
}

/// Errors raised by a [`StateStore`](crate::sync::StateStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
	/// The shared store can no longer be reached (owning context invalidated).
	#[error("store unavailable: {0}")]
	Unavailable(String),

	#[error("store I/O error: {0}")]
	Io(String),

	#[error("store serialization error: {0}")]
	Serde(String),
}

impl From<std::io::Error> for StoreError {
	fn from(err: std::io::Error) -> Self {
		StoreError::Io(err.to_string())
	}
}

impl From<serde_json::Error> for StoreError {
	fn from(err: serde_json::Error) -> Self {
		StoreError::Serde(err.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_transport_display_includes_status() {
		let err = Error::Transport {
			status: Some(503),
			message: "unavailable".into(),
		};
		assert_eq!(err.to_string(), "Transport error (HTTP 503): unavailable");
		assert_eq!(Error::transport("refused").to_string(), "Transport error: refused");
	}

	#[test]
	fn test_classification() {
		assert!(Error::Protocol("x".into()).is_protocol());
		assert!(Error::transport("x").is_transport());
		assert!(
			Error::Timeout {
				fingerprint: "fp".into(),
				timeout_ms: 10
			}
			.is_timeout()
		);
		assert!(!Error::Destroyed.is_retryable());
		assert!(!Error::InvalidConfig("x".into()).is_retryable());
		assert!(Error::transport("x").is_retryable());
	}

	#[test]
	fn test_exhausted_wraps_last_error() {
		let err = Error::QueueExhausted {
			key: "s1".into(),
			attempts: 3,
			last_error: Box::new(Error::transport("down")),
		};
		assert_eq!(err.to_string(), "Write for 's1' dropped after 3 attempts: Transport error: down");
	}

	#[test]
	fn test_store_error_conversion() {
		let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
		let err: Error = StoreError::from(io).into();
		assert!(matches!(err, Error::Store(StoreError::Io(_))));
	}
}
