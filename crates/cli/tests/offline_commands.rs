//! Integration tests for commands that never touch the network.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::{Value, json};

fn tether_binary() -> PathBuf {
	let mut path = std::env::current_exe().unwrap();
	path.pop();
	path.pop();
	path.push("tether");
	path
}

/// Runs `tether -f json <args>` with config and data directories inside `home`.
fn run(home: &Path, args: &[&str]) -> (bool, Value, String) {
	let output = Command::new(tether_binary())
		.current_dir(home)
		.env("XDG_CONFIG_HOME", home.join("config"))
		.env("XDG_DATA_HOME", home.join("data"))
		.env_remove("RUST_LOG")
		.args(["-f", "json"])
		.args(args)
		.output()
		.expect("failed to execute tether");

	let stdout = String::from_utf8_lossy(&output.stdout).to_string();
	let stderr = String::from_utf8_lossy(&output.stderr).to_string();
	let parsed = serde_json::from_str::<Value>(&stdout).unwrap_or_else(|_| json!({ "raw": stdout }));
	(output.status.success(), parsed, stderr)
}

fn fingerprint_of(home: &Path, body: &str) -> String {
	let (success, json, stderr) = run(home, &["fingerprint", "https://api.example/x", "-X", "post", "-d", body]);
	assert!(success, "fingerprint failed: {stderr}");
	json["data"]["fingerprint"].as_str().unwrap().to_string()
}

#[test]
fn fingerprint_ignores_key_order() {
	let home = tempfile::tempdir().unwrap();

	let ab = fingerprint_of(home.path(), r#"{"a":1,"b":2}"#);
	let ba = fingerprint_of(home.path(), r#"{"b":2,"a":1}"#);
	let changed = fingerprint_of(home.path(), r#"{"a":1,"b":3}"#);

	assert_eq!(ab, ba);
	assert_ne!(ab, changed);
}

#[test]
fn fingerprint_resolves_against_base_url() {
	let home = tempfile::tempdir().unwrap();
	let (success, json, stderr) = run(
		home.path(),
		&["fingerprint", "faqs?cname=faqs", "--base-url", "https://api.example/x/"],
	);

	assert!(success, "fingerprint failed: {stderr}");
	assert_eq!(json["ok"], true);
	assert_eq!(json["data"]["url"], "https://api.example/x/faqs?cname=faqs");
	assert_eq!(json["data"]["method"], "GET");
}

#[test]
fn state_set_then_get() {
	let home = tempfile::tempdir().unwrap();

	let (success, json, stderr) = run(home.path(), &["state", "set", "pos", r#"{"x":10,"y":20}"#]);
	assert!(success, "state set failed: {stderr}");
	assert_eq!(json["command"], "state.set");
	let written_at = json["data"]["record"]["updatedAt"].as_i64().unwrap();

	let (success, json, stderr) = run(home.path(), &["state", "get", "pos"]);
	assert!(success, "state get failed: {stderr}");
	assert_eq!(json["data"]["found"], true);
	assert_eq!(json["data"]["record"]["value"], json!({"x": 10, "y": 20}));
	assert_eq!(json["data"]["record"]["updatedAt"].as_i64().unwrap(), written_at);

	assert!(home.path().join("data/tether/state.json").exists());
}

#[test]
fn state_get_missing_key() {
	let home = tempfile::tempdir().unwrap();
	let (success, json, stderr) = run(home.path(), &["state", "get", "nothing"]);

	assert!(success, "state get failed: {stderr}");
	assert_eq!(json["data"]["found"], false);
	assert!(json["data"].get("record").is_none());
}

#[test]
fn project_config_sets_state_path() {
	let home = tempfile::tempdir().unwrap();
	std::fs::create_dir_all(home.path().join(".tether")).unwrap();
	std::fs::write(
		home.path().join(".tether/config.json"),
		r#"{"statePath":"project-state.json"}"#,
	)
	.unwrap();

	let (success, _json, stderr) = run(home.path(), &["state", "set", "k", "v"]);
	assert!(success, "state set failed: {stderr}");
	assert!(home.path().join("project-state.json").exists());
}

#[test]
fn missing_explicit_config_is_reported() {
	let home = tempfile::tempdir().unwrap();
	let (success, json, _stderr) = run(home.path(), &["--config", "nope.json", "state", "get", "k"]);

	assert!(!success);
	assert_eq!(json["ok"], false);
	assert_eq!(json["error"]["code"], "CONFIG_ERROR");
}

#[test]
fn malformed_header_is_rejected_before_sending() {
	let home = tempfile::tempdir().unwrap();
	let (success, json, stderr) = run(home.path(), &["fetch", "https://api.example/x", "-H", "broken"]);

	assert!(!success);
	assert_eq!(json["ok"], false);
	assert_eq!(json["command"], "fetch");
	assert_eq!(json["error"]["code"], "INVALID_INPUT");
	assert!(stderr.contains("INVALID_INPUT"));
}

#[test]
fn push_without_url_is_rejected() {
	let home = tempfile::tempdir().unwrap();
	let (success, json, _stderr) = run(home.path(), &["push", "--entry", "s1={}"]);

	assert!(!success);
	assert_eq!(json["error"]["code"], "INVALID_INPUT");
}
