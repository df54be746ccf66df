use serde_json::json;

use super::*;

#[test]
fn result_builder_success() {
	let result = ResultBuilder::new("fetch").data(json!({"callers": 2})).build();

	assert!(result.ok);
	assert_eq!(result.command, "fetch");
	assert_eq!(result.schema_version, Some(SCHEMA_VERSION));
	assert!(result.data.is_some());
	assert!(result.error.is_none());
}

#[test]
fn result_builder_error_keeps_data() {
	let result = ResultBuilder::new("push")
		.data(json!({"dropped": ["s1"]}))
		.error(ErrorCode::WriteDropped, "1 write dropped")
		.error_details(json!({"keys": ["s1"]}))
		.build();

	assert!(!result.ok);
	assert!(result.data.is_some());
	let error = result.error.unwrap();
	assert_eq!(error.code, ErrorCode::WriteDropped);
	assert_eq!(error.details, Some(json!({"keys": ["s1"]})));
}

#[test]
fn envelope_is_camel_case() {
	let result: CommandResult<()> = ResultBuilder::new("state.get")
		.error(ErrorCode::StoreError, "unreadable")
		.build();
	let value = serde_json::to_value(&result).unwrap();

	assert_eq!(value["schemaVersion"], 1);
	assert_eq!(value["ok"], false);
	assert_eq!(value["error"]["code"], "STORE_ERROR");
	assert!(value["timings"]["durationMs"].is_u64());
	assert!(value.get("data").is_none());
}

#[test]
fn error_code_display() {
	assert_eq!(ErrorCode::TransportFailed.to_string(), "TRANSPORT_FAILED");
	assert_eq!(ErrorCode::WriteDropped.to_string(), "WRITE_DROPPED");
	assert_eq!(
		serde_json::to_value(ErrorCode::ConfigError).unwrap(),
		json!(ErrorCode::ConfigError.to_string())
	);
}

#[test]
fn render_text_nested() {
	let rendered = render_text(&json!({
		"fingerprint": "[\"GET\",\"https://api.example/x\",\"\"]",
		"stats": {"totalRequests": 1, "duplicateRequests": 1},
		"dropped": ["a", "b"],
		"value": null,
	}));

	assert!(rendered.contains("stats:\n  duplicateRequests: 1\n  totalRequests: 1"));
	assert!(rendered.contains("dropped: [\"a\",\"b\"]"));
	assert!(rendered.contains("value: -"));
}

#[test]
fn render_text_array_of_objects() {
	let rendered = render_text(&json!([{"key": "s1"}, {"key": "s2"}]));
	assert_eq!(rendered, "-\n  key: s1\n-\n  key: s2");
}
