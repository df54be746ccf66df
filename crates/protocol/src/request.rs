//! Request descriptions handed to the coordinator and the transport.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// HTTP method. Parsing is case-insensitive and always normalizes to uppercase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Method {
	#[default]
	Get,
	Post,
	Put,
	Patch,
	Delete,
	Head,
	Options,
	/// Any other verb, stored uppercased.
	Other(String),
}

impl Method {
	pub fn as_str(&self) -> &str {
		match self {
			Method::Get => "GET",
			Method::Post => "POST",
			Method::Put => "PUT",
			Method::Patch => "PATCH",
			Method::Delete => "DELETE",
			Method::Head => "HEAD",
			Method::Options => "OPTIONS",
			Method::Other(verb) => verb,
		}
	}
}

impl From<&str> for Method {
	fn from(s: &str) -> Self {
		let upper = s.trim().to_ascii_uppercase();
		match upper.as_str() {
			"" | "GET" => Method::Get,
			"POST" => Method::Post,
			"PUT" => Method::Put,
			"PATCH" => Method::Patch,
			"DELETE" => Method::Delete,
			"HEAD" => Method::Head,
			"OPTIONS" => Method::Options,
			_ => Method::Other(upper),
		}
	}
}

impl std::str::FromStr for Method {
	type Err = std::convert::Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Method::from(s))
	}
}

impl fmt::Display for Method {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl Serialize for Method {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(self.as_str())
	}
}

impl<'de> Deserialize<'de> for Method {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s: String = Deserialize::deserialize(deserializer)?;
		Ok(Method::from(s.as_str()))
	}
}

/// Request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Body {
	/// Raw text. Fingerprinting tries to parse it as JSON first.
	Text(String),
	/// Structured JSON value.
	Json(Value),
	/// Opaque binary content (uploads, form encodings).
	Bytes(Vec<u8>),
}

impl Body {
	/// Bytes as they go on the wire.
	pub fn to_wire(&self) -> Vec<u8> {
		match self {
			Body::Text(text) => text.as_bytes().to_vec(),
			Body::Json(value) => value.to_string().into_bytes(),
			Body::Bytes(bytes) => bytes.clone(),
		}
	}
}

impl From<Value> for Body {
	fn from(value: Value) -> Self {
		Body::Json(value)
	}
}

impl From<String> for Body {
	fn from(text: String) -> Self {
		Body::Text(text)
	}
}

impl From<&str> for Body {
	fn from(text: &str) -> Self {
		Body::Text(text.to_string())
	}
}

/// Options for a single coordinated request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
	/// Defaults to `GET` when absent.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub method: Option<Method>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub headers: BTreeMap<String, String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub body: Option<Body>,
	/// Overrides the coordinator's default pending-entry timeout.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timeout_ms: Option<u64>,
}

impl RequestOptions {
	pub fn get() -> Self {
		Self::default()
	}

	pub fn post(body: impl Into<Body>) -> Self {
		Self {
			method: Some(Method::Post),
			body: Some(body.into()),
			..Default::default()
		}
	}

	pub fn method(mut self, method: impl Into<Method>) -> Self {
		self.method = Some(method.into());
		self
	}

	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());
		self
	}

	pub fn body(mut self, body: impl Into<Body>) -> Self {
		self.body = Some(body.into());
		self
	}

	pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
		self.timeout_ms = Some(timeout_ms);
		self
	}

	/// Effective method, `GET` when unset.
	pub fn effective_method(&self) -> Method {
		self.method.clone().unwrap_or_default()
	}

	/// Case-insensitive header lookup.
	pub fn header_value(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(k, _)| k.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}
}

/// Raw response produced by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
	pub status: u16,
	pub body: String,
}

impl HttpResponse {
	pub fn new(status: u16, body: impl Into<String>) -> Self {
		Self {
			status,
			body: body.into(),
		}
	}

	/// True for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_method_parsing_normalizes_case() {
		assert_eq!(Method::from("post"), Method::Post);
		assert_eq!(Method::from(" Delete "), Method::Delete);
		assert_eq!(Method::from(""), Method::Get);
		assert_eq!(Method::from("purge"), Method::Other("PURGE".into()));
		assert_eq!(Method::from("purge").to_string(), "PURGE");
	}

	#[test]
	fn test_effective_method_defaults_to_get() {
		assert_eq!(RequestOptions::default().effective_method(), Method::Get);
		assert_eq!(RequestOptions::post("x").effective_method(), Method::Post);
	}

	#[test]
	fn test_header_lookup_is_case_insensitive() {
		let options = RequestOptions::get().header("Content-Type", "application/json");
		assert_eq!(options.header_value("content-type"), Some("application/json"));
		assert_eq!(options.header_value("authorization"), None);
	}

	#[test]
	fn test_options_deserialize_camel_case() {
		let json = r#"{"method": "put", "timeoutMs": 500, "body": {"kind": "text", "value": "hi"}}"#;
		let options: RequestOptions = serde_json::from_str(json).unwrap();
		assert_eq!(options.method, Some(Method::Put));
		assert_eq!(options.timeout_ms, Some(500));
		assert_eq!(options.body, Some(Body::Text("hi".into())));
	}

	#[test]
	fn test_response_success_range() {
		assert!(HttpResponse::new(200, "").is_success());
		assert!(HttpResponse::new(204, "").is_success());
		assert!(!HttpResponse::new(301, "").is_success());
		assert!(!HttpResponse::new(500, "").is_success());
	}
}
