//! Busy indicator for a terminal: the spinner is a log line.

use tether_runtime::BusyIndicator;

/// Logs the busy edges at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogIndicator;

impl BusyIndicator for LogIndicator {
	fn show(&self) {
		tracing::info!(target: "tether_cli::busy", "requests in flight");
	}

	fn hide(&self) {
		tracing::info!(target: "tether_cli::busy", "idle");
	}
}
