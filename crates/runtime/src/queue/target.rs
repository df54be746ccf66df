//! Mapping from buffered entries to requests.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use tether_protocol::RequestOptions;

/// Builds the request that persists one entry.
pub trait WriteTarget: Send + Sync {
	fn request(&self, key: &str, payload: &Value) -> (String, RequestOptions);
}

impl<F> WriteTarget for F
where
	F: Fn(&str, &Value) -> (String, RequestOptions) + Send + Sync,
{
	fn request(&self, key: &str, payload: &Value) -> (String, RequestOptions) {
		self(key, payload)
	}
}

/// POSTs `{"key": ..., "payload": ...}` to a fixed URL.
#[derive(Debug, Clone)]
pub struct JsonPostTarget {
	url: String,
	headers: BTreeMap<String, String>,
}

impl JsonPostTarget {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			headers: BTreeMap::new(),
		}
	}

	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());
		self
	}
}

impl WriteTarget for JsonPostTarget {
	fn request(&self, key: &str, payload: &Value) -> (String, RequestOptions) {
		let mut options = RequestOptions::post(json!({ "key": key, "payload": payload }))
			.header("Content-Type", "application/json");
		for (name, value) in &self.headers {
			options = options.header(name.clone(), value.clone());
		}
		(self.url.clone(), options)
	}
}

#[cfg(test)]
mod tests {
	use tether_protocol::{Body, Method};

	use super::*;

	#[test]
	fn test_json_post_target_shapes_body() {
		let target = JsonPostTarget::new("https://api.example/sessions").header("Authorization", "Bearer t");
		let (url, options) = target.request("s1", &json!({"title": "a"}));

		assert_eq!(url, "https://api.example/sessions");
		assert_eq!(options.method, Some(Method::Post));
		assert_eq!(options.header_value("authorization"), Some("Bearer t"));
		assert_eq!(
			options.body,
			Some(Body::Json(json!({"key": "s1", "payload": {"title": "a"}})))
		);
	}

	#[test]
	fn test_closure_target() {
		let target = |key: &str, payload: &Value| {
			(format!("https://api.example/items/{key}"), RequestOptions::post(payload.clone()).method("PUT"))
		};
		let (url, options) = WriteTarget::request(&target, "7", &json!(1));
		assert_eq!(url, "https://api.example/items/7");
		assert_eq!(options.method, Some(Method::Put));
	}
}
