//! Network call boundary.
//!
//! A [`Transport`] performs exactly one round-trip and reports the raw status
//! and body. It never interprets the body and never retries; both are the
//! coordinator's (and its callers') business.

#[cfg(test)]
mod tests;

use std::future::Future;
use std::pin::Pin;

use tether_protocol::{Body, HttpResponse, RequestOptions};

use crate::error::{Error, Result};

/// Boxed future returned by [`Transport::send`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send + 'a>>;

/// Performs one network call.
pub trait Transport: Send + Sync {
	fn send<'a>(&'a self, url: &'a str, options: &'a RequestOptions) -> TransportFuture<'a>;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
	client: reqwest::Client,
}

impl HttpTransport {
	pub fn new() -> Result<Self> {
		let client = reqwest::Client::builder()
			.build()
			.map_err(|e| Error::transport(format!("failed to build HTTP client: {e}")))?;
		Ok(Self { client })
	}

	pub fn with_client(client: reqwest::Client) -> Self {
		Self { client }
	}

	async fn round_trip(&self, url: &str, options: &RequestOptions) -> Result<HttpResponse> {
		let method = options.effective_method();
		let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
			.map_err(|e| Error::transport(format!("invalid method '{method}': {e}")))?;

		let mut request = self.client.request(method, url);
		for (name, value) in &options.headers {
			request = request.header(name, value);
		}
		if let Some(body) = &options.body {
			if options.header_value("content-type").is_none() {
				if let Body::Json(_) = body {
					request = request.header("content-type", "application/json");
				}
			}
			request = request.body(body.to_wire());
		}

		tracing::debug!(%url, "sending request");

		let response = request.send().await.map_err(|e| Error::Transport {
			status: e.status().map(|s| s.as_u16()),
			message: e.to_string(),
		})?;
		let status = response.status().as_u16();
		let body = response.text().await.map_err(|e| Error::Transport {
			status: Some(status),
			message: format!("failed to read response body: {e}"),
		})?;

		Ok(HttpResponse { status, body })
	}
}

impl Transport for HttpTransport {
	fn send<'a>(&'a self, url: &'a str, options: &'a RequestOptions) -> TransportFuture<'a> {
		Box::pin(self.round_trip(url, options))
	}
}
