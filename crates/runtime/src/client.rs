//! Base for feature-specific API clients.
//!
//! An [`ApiClient`] resolves paths against a base URL, attaches the JSON
//! content type and an optional bearer token, and sends everything through a
//! shared [`Coordinator`] so identical concurrent calls from different
//! features collapse into one.
//!
//! Read helpers ([`ApiClient::get_or`], [`ApiClient::list`]) degrade to a
//! fallback value with a warning instead of failing.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_protocol::RequestOptions;
use url::form_urlencoded;

use crate::coordinator::Coordinator;
use crate::error::{Error, Result};

/// Supplies the bearer token attached to each request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
	/// `None` sends the request unauthenticated.
	async fn token(&self) -> Result<Option<String>>;
}

/// Fixed token.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
	pub fn new(token: impl Into<String>) -> Self {
		Self(token.into())
	}
}

#[async_trait]
impl TokenProvider for StaticToken {
	async fn token(&self) -> Result<Option<String>> {
		Ok(Some(self.0.clone()))
	}
}

pub struct ApiClient {
	coordinator: Arc<Coordinator>,
	base_url: String,
	tokens: Option<Arc<dyn TokenProvider>>,
}

impl ApiClient {
	pub fn new(coordinator: Arc<Coordinator>, base_url: impl Into<String>) -> Self {
		Self {
			coordinator,
			base_url: base_url.into(),
			tokens: None,
		}
	}

	pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
		self.tokens = Some(provider);
		self
	}

	pub fn base_url(&self) -> &str {
		&self.base_url
	}

	pub fn coordinator(&self) -> &Arc<Coordinator> {
		&self.coordinator
	}

	/// Resolves `path` against the base URL. Absolute URLs pass through.
	pub fn url(&self, path: &str) -> String {
		if path.starts_with("http://") || path.starts_with("https://") {
			return path.to_string();
		}
		let base = self.base_url.trim_end_matches('/');
		let path = path.trim_start_matches('/');
		if path.is_empty() {
			base.to_string()
		} else if path.starts_with('?') {
			format!("{base}{path}")
		} else {
			format!("{base}/{path}")
		}
	}

	/// Sends a request and returns the full response object.
	pub async fn request(&self, path: &str, options: RequestOptions) -> Result<Value> {
		let url = self.url(path);
		let options = self.prepare(options).await?;
		self.coordinator.execute(&url, options).await
	}

	pub async fn get(&self, path: &str) -> Result<Value> {
		self.request(path, RequestOptions::get()).await
	}

	/// GETs `path` and decodes its `data` field, returning `fallback` on any
	/// failure.
	pub async fn get_or<T: DeserializeOwned>(&self, path: &str, fallback: T) -> T {
		let outcome = match self.get(path).await {
			Ok(response) => serde_json::from_value(data(response))
				.map_err(|e| Error::Protocol(format!("unexpected 'data' shape: {e}"))),
			Err(err) => Err(err),
		};
		outcome.unwrap_or_else(|err| {
			tracing::warn!(url = %self.url(path), error = %err, "read failed, using fallback");
			fallback
		})
	}

	pub async fn get_or_default<T: DeserializeOwned + Default>(&self, path: &str) -> T {
		self.get_or(path, T::default()).await
	}

	/// Lists one resource collection via `GET {base}?cname={resource}`, with
	/// `resource` form-encoded. Failures yield an empty list.
	pub async fn list(&self, resource: &str) -> Vec<Value> {
		let separator = if self.base_url.contains('?') { '&' } else { '?' };
		let query = form_urlencoded::Serializer::new(String::new())
			.append_pair("cname", resource)
			.finish();
		let url = format!("{}{separator}{query}", self.base_url);
		self.get_or(&url, Vec::new()).await
	}

	async fn prepare(&self, mut options: RequestOptions) -> Result<RequestOptions> {
		if options.header_value("content-type").is_none() {
			options = options.header("Content-Type", "application/json");
		}
		if options.header_value("authorization").is_none() {
			if let Some(provider) = &self.tokens {
				if let Some(token) = provider.token().await? {
					options = options.header("Authorization", format!("Bearer {token}"));
				}
			}
		}
		Ok(options)
	}
}

impl std::fmt::Debug for ApiClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ApiClient")
			.field("base_url", &self.base_url)
			.field("authenticated", &self.tokens.is_some())
			.finish()
	}
}

/// The `data` field of a response object, or `null`.
fn data(mut response: Value) -> Value {
	response
		.as_object_mut()
		.and_then(|object| object.remove("data"))
		.unwrap_or(Value::Null)
}
