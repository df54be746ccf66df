//! Scripted transport and clock for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tether_protocol::{HttpResponse, RequestOptions};

use crate::error::{Error, Result};
use crate::sync::Clock;
use crate::transport::{Transport, TransportFuture};

/// One scripted transport outcome.
#[derive(Debug, Clone)]
pub(crate) enum Scripted {
	Respond(HttpResponse),
	Fail(Error),
	/// Responds after the given delay.
	Delayed(Duration, HttpResponse),
	/// Fails after the given delay.
	FailAfter(Duration, Error),
	/// Never settles.
	Hang,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
	pub url: String,
	pub options: RequestOptions,
}

/// Transport that replays queued outcomes in order, then falls back to a
/// fixed response (or a transport error when none is set).
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
	script: Mutex<VecDeque<Scripted>>,
	fallback: Mutex<Option<HttpResponse>>,
	calls: Mutex<Vec<RecordedCall>>,
}

impl MockTransport {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn push(&self, outcome: Scripted) {
		self.script.lock().push_back(outcome);
	}

	/// Queues a 200 response carrying `{"success": true, "data": data}`.
	pub fn push_ok(&self, data: Value) {
		self.push(Scripted::Respond(ok_response(data)));
	}

	pub fn push_fail(&self, message: &str) {
		self.push(Scripted::Fail(Error::transport(message)));
	}

	pub fn always(&self, response: HttpResponse) {
		*self.fallback.lock() = Some(response);
	}

	pub fn calls(&self) -> Vec<RecordedCall> {
		self.calls.lock().clone()
	}

	pub fn call_count(&self) -> usize {
		self.calls.lock().len()
	}
}

impl Transport for MockTransport {
	fn send<'a>(&'a self, url: &'a str, options: &'a RequestOptions) -> TransportFuture<'a> {
		self.calls.lock().push(RecordedCall {
			url: url.to_string(),
			options: options.clone(),
		});
		let next = self.script.lock().pop_front();
		let fallback = self.fallback.lock().clone();

		Box::pin(async move {
			match next {
				Some(Scripted::Respond(response)) => Ok(response),
				Some(Scripted::Fail(err)) => Err(err),
				Some(Scripted::Delayed(delay, response)) => {
					tokio::time::sleep(delay).await;
					Ok(response)
				}
				Some(Scripted::FailAfter(delay, err)) => {
					tokio::time::sleep(delay).await;
					Err(err)
				}
				Some(Scripted::Hang) => std::future::pending::<Result<HttpResponse>>().await,
				None => fallback.ok_or_else(|| Error::transport("no scripted response")),
			}
		})
	}
}

pub(crate) fn ok_response(data: Value) -> HttpResponse {
	HttpResponse::new(200, json!({ "success": true, "data": data }).to_string())
}

/// Clock whose time only moves when told to.
#[derive(Debug, Default)]
pub(crate) struct ManualClock {
	now: AtomicI64,
}

impl ManualClock {
	pub fn at(now_ms: i64) -> Arc<Self> {
		Arc::new(Self {
			now: AtomicI64::new(now_ms),
		})
	}

	pub fn set(&self, now_ms: i64) {
		self.now.store(now_ms, Ordering::SeqCst);
	}
}

impl Clock for ManualClock {
	fn now_ms(&self) -> i64 {
		self.now.load(Ordering::SeqCst)
	}
}
