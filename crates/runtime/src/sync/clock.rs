use std::time::{SystemTime, UNIX_EPOCH};

/// Source of `updated_at` stamps, in Unix milliseconds.
pub trait Clock: Send + Sync {
	fn now_ms(&self) -> i64;
}

/// Wall clock. Skew between contexts is not compensated.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now_ms(&self) -> i64 {
		SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|elapsed| elapsed.as_millis() as i64)
			.unwrap_or_default()
	}
}
