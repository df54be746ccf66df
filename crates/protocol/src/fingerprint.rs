//! Deterministic request identity used for in-flight deduplication.
//!
//! A fingerprint is built from the uppercased method, the URL and a
//! canonical rendering of the body. JSON bodies (or text bodies that parse as
//! JSON) have their object keys sorted recursively, so two descriptions that
//! differ only in key insertion order collide. Array order is preserved.
//!
//! Fingerprinting never fails: anything that cannot be canonicalized falls
//! back to a stable textual form.

use std::fmt::{self, Write as _};
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;

use crate::request::{Body, Method};

/// Stable identity of a request description.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(Arc<str>);

impl Fingerprint {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Fingerprint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl AsRef<str> for Fingerprint {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

/// Computes the fingerprint of `(method, url, body)`.
///
/// `method` defaults to `GET`. The three parts are encoded as a JSON array so
/// delimiter characters inside the URL or body cannot make two different
/// descriptions collide.
pub fn fingerprint(method: Option<&Method>, url: &str, body: Option<&Body>) -> Fingerprint {
	let method = method.map(Method::as_str).unwrap_or("GET").to_ascii_uppercase();
	let body = body.map(normalize_body).unwrap_or_default();

	let parts = [method.as_str(), url, body.as_str()];
	let encoded = serde_json::to_string(&parts).unwrap_or_else(|_| format!("{method} {url} {body}"));
	Fingerprint(Arc::from(encoded))
}

/// Canonical text for a request body.
pub fn normalize_body(body: &Body) -> String {
	match body {
		Body::Text(text) => match serde_json::from_str::<Value>(text) {
			Ok(value) => canonical_json(&value),
			Err(_) => text.clone(),
		},
		Body::Json(value) => canonical_json(value),
		Body::Bytes(bytes) => format!("base64:{}", STANDARD.encode(bytes)),
	}
}

/// Renders `value` as compact JSON with every object's keys sorted.
pub fn canonical_json(value: &Value) -> String {
	let mut out = String::new();
	write_canonical(value, &mut out);
	out
}

fn write_canonical(value: &Value, out: &mut String) {
	match value {
		Value::Object(map) => {
			out.push('{');
			for (i, key) in sorted_keys(map.keys()).into_iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				write_key(key, out);
				out.push(':');
				write_canonical(&map[key], out);
			}
			out.push('}');
		}
		Value::Array(items) => {
			out.push('[');
			for (i, item) in items.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				write_canonical(item, out);
			}
			out.push(']');
		}
		scalar => {
			let _ = write!(out, "{scalar}");
		}
	}
}

/// Object keys in lexicographic order. serde_json iterates its map sorted
/// unless `preserve_order` is enabled somewhere in the build, so the order is
/// fixed here rather than trusted.
fn sorted_keys<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<&'a String> {
	let mut keys: Vec<&String> = keys.collect();
	keys.sort();
	keys
}

fn write_key(key: &str, out: &mut String) {
	match serde_json::to_string(key) {
		Ok(escaped) => out.push_str(&escaped),
		Err(_) => {
			let _ = write!(out, "{key:?}");
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	const URL: &str = "https://api.example/x";

	#[test]
	fn test_key_order_does_not_matter() {
		let a = fingerprint(Some(&Method::Post), URL, Some(&json!({"a": 1, "b": 2}).into()));
		let b = fingerprint(Some(&Method::Post), URL, Some(&json!({"b": 2, "a": 1}).into()));
		assert_eq!(a, b);
	}

	#[test]
	fn test_value_change_changes_fingerprint() {
		let a = fingerprint(Some(&Method::Post), URL, Some(&json!({"a": 1, "b": 2}).into()));
		let b = fingerprint(Some(&Method::Post), URL, Some(&json!({"a": 1, "b": 3}).into()));
		assert_ne!(a, b);
	}

	#[test]
	fn test_nested_objects_are_sorted() {
		let a = json!({"outer": {"z": [1, {"y": 1, "x": 2}], "a": null}});
		let b = json!({"outer": {"a": null, "z": [1, {"x": 2, "y": 1}]}});
		assert_eq!(canonical_json(&a), canonical_json(&b));
		assert_eq!(canonical_json(&a), r#"{"outer":{"a":null,"z":[1,{"x":2,"y":1}]}}"#);
	}

	#[test]
	fn test_keys_sorted_from_insertion_order() {
		// `json!` maps already iterate sorted here, so feed keys as an
		// insertion-ordered map would yield them.
		let inserted = ["zeta".to_string(), "alpha".to_string(), "Mid".to_string(), "beta".to_string()];
		let sorted: Vec<&str> = sorted_keys(inserted.iter()).into_iter().map(String::as_str).collect();
		assert_eq!(sorted, ["Mid", "alpha", "beta", "zeta"]);
	}

	#[test]
	fn test_array_order_is_preserved() {
		assert_ne!(canonical_json(&json!([1, 2])), canonical_json(&json!([2, 1])));
	}

	#[test]
	fn test_text_body_parsed_as_json() {
		let text = Body::Text(r#"{"b": 2, "a": 1}"#.to_string());
		let structured = Body::Json(json!({"a": 1, "b": 2}));
		assert_eq!(normalize_body(&text), normalize_body(&structured));
	}

	#[test]
	fn test_unparseable_text_is_opaque() {
		let body = Body::Text("name=alice&age=3".to_string());
		assert_eq!(normalize_body(&body), "name=alice&age=3");
	}

	#[test]
	fn test_bytes_body_is_stable() {
		let a = normalize_body(&Body::Bytes(vec![1, 2, 3]));
		let b = normalize_body(&Body::Bytes(vec![1, 2, 3]));
		let c = normalize_body(&Body::Bytes(vec![1, 2, 4]));
		assert_eq!(a, b);
		assert_ne!(a, c);
	}

	#[test]
	fn test_method_defaults_and_case() {
		let implicit = fingerprint(None, URL, None);
		let explicit = fingerprint(Some(&Method::Get), URL, None);
		let lowercase = fingerprint(Some(&Method::from("get")), URL, None);
		assert_eq!(implicit, explicit);
		assert_eq!(explicit, lowercase);
		assert_ne!(implicit, fingerprint(Some(&Method::Delete), URL, None));
	}

	#[test]
	fn test_single_character_url_difference() {
		let a = fingerprint(None, "https://api.example/x?cname=faqs", None);
		let b = fingerprint(None, "https://api.example/x?cname=faqz", None);
		assert_ne!(a, b);
	}

	#[test]
	fn test_delimiters_cannot_shift_between_parts() {
		let a = fingerprint(None, "https://a/b c", Some(&Body::Text("d".into())));
		let b = fingerprint(None, "https://a/b", Some(&Body::Text("c d".into())));
		assert_ne!(a, b);
	}

	#[test]
	fn test_missing_body_differs_from_empty_object() {
		let none = fingerprint(Some(&Method::Post), URL, None);
		let empty = fingerprint(Some(&Method::Post), URL, Some(&json!({}).into()));
		assert_ne!(none, empty);
	}
}
