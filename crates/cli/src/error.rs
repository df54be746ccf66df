use thiserror::Error;

use crate::output::{CommandError, ErrorCode};

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	/// Command failed but its output has already been printed.
	/// Used to signal exit code 1 without additional output.
	#[error("")]
	OutputAlreadyPrinted,

	#[error("invalid input: {0}")]
	InvalidInput(String),

	#[error("configuration error: {0}")]
	Config(String),

	#[error("invalid URL '{url}': {source}")]
	Url {
		url: String,
		#[source]
		source: url::ParseError,
	},

	#[error(transparent)]
	Runtime(#[from] tether_runtime::Error),

	#[error(transparent)]
	Store(#[from] tether_runtime::StoreError),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl CliError {
	/// When true, the caller should exit with code 1 without printing anything else.
	pub fn is_output_already_printed(&self) -> bool {
		matches!(self, CliError::OutputAlreadyPrinted)
	}

	/// Converts this error into its structured form.
	pub fn to_command_error(&self) -> CommandError {
		let code = match self {
			CliError::OutputAlreadyPrinted => ErrorCode::InternalError,
			CliError::InvalidInput(_) | CliError::Url { .. } => ErrorCode::InvalidInput,
			CliError::Config(_) => ErrorCode::ConfigError,
			CliError::Runtime(err) => runtime_code(err),
			CliError::Store(_) => ErrorCode::StoreError,
			CliError::Io(_) => ErrorCode::IoError,
			CliError::Json(_) => ErrorCode::InvalidInput,
		};
		let details = match self {
			CliError::Runtime(err) => err.status().map(|status| serde_json::json!({ "status": status })),
			_ => None,
		};
		CommandError {
			code,
			message: self.to_string(),
			details,
		}
	}
}

fn runtime_code(err: &tether_runtime::Error) -> ErrorCode {
	use tether_runtime::Error;

	match err {
		Error::Transport { .. } => ErrorCode::TransportFailed,
		Error::Protocol(_) => ErrorCode::ProtocolError,
		Error::Timeout { .. } => ErrorCode::Timeout,
		Error::QueueExhausted { .. } => ErrorCode::WriteDropped,
		Error::Store(_) => ErrorCode::StoreError,
		Error::InvalidConfig(_) => ErrorCode::ConfigError,
		Error::Destroyed | Error::ChannelClosed => ErrorCode::InternalError,
	}
}

#[cfg(test)]
mod tests {
	use tether_runtime::{Error, StoreError};

	use super::*;

	#[test]
	fn test_runtime_errors_map_to_codes() {
		let err = CliError::from(Error::Transport {
			status: Some(503),
			message: "unavailable".into(),
		});
		let cmd = err.to_command_error();
		assert_eq!(cmd.code, ErrorCode::TransportFailed);
		assert_eq!(cmd.details, Some(serde_json::json!({"status": 503})));

		let err = CliError::from(Error::Timeout {
			fingerprint: "fp".into(),
			timeout_ms: 10,
		});
		assert_eq!(err.to_command_error().code, ErrorCode::Timeout);

		let err = CliError::from(Error::Store(StoreError::Unavailable("gone".into())));
		assert_eq!(err.to_command_error().code, ErrorCode::StoreError);
	}

	#[test]
	fn test_input_errors() {
		let source = url::Url::parse("not a url").unwrap_err();
		let err = CliError::Url {
			url: "not a url".into(),
			source,
		};
		let cmd = err.to_command_error();
		assert_eq!(cmd.code, ErrorCode::InvalidInput);
		assert!(cmd.message.contains("not a url"));
		assert!(cmd.details.is_none());
	}
}
