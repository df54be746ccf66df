//! CLI configuration files.
//!
//! The global file lives at `$XDG_CONFIG_HOME/tether/config.json` (falling
//! back to the platform config directory). A project file at
//! `./.tether/config.json` is merged on top, field by field. Missing or
//! unreadable files count as empty; a file named with `--config` must load.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tether_runtime::{CoordinatorConfig, QueueConfig};

use crate::error::{CliError, Result};

const APP_DIR: &str = "tether";
const CONFIG_FILE: &str = "config.json";
const STATE_FILE: &str = "state.json";
const PROJECT_DIR: &str = ".tether";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TetherConfig {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub base_url: Option<String>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub auth_token: Option<String>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub coordinator: Option<CoordinatorConfig>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub queue: Option<QueueConfig>,

	/// Shared state file for `state` commands.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub state_path: Option<PathBuf>,
}

impl TetherConfig {
	/// Overlays every field `other` sets.
	pub fn merge(&mut self, other: &TetherConfig) {
		if other.base_url.is_some() {
			self.base_url = other.base_url.clone();
		}
		if other.auth_token.is_some() {
			self.auth_token = other.auth_token.clone();
		}
		if other.coordinator.is_some() {
			self.coordinator = other.coordinator.clone();
		}
		if other.queue.is_some() {
			self.queue = other.queue.clone();
		}
		if other.state_path.is_some() {
			self.state_path = other.state_path.clone();
		}
	}
}

/// Where configuration and state files are looked up.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
	pub global_config: Option<PathBuf>,
	pub project_config: PathBuf,
	pub default_state: PathBuf,
}

impl ConfigPaths {
	pub fn new(project_root: &Path) -> Self {
		let config_home = std::env::var_os("XDG_CONFIG_HOME")
			.map(PathBuf::from)
			.or_else(dirs::config_dir);
		let data_home = std::env::var_os("XDG_DATA_HOME")
			.map(PathBuf::from)
			.or_else(dirs::data_dir);

		let project_dir = project_root.join(PROJECT_DIR);
		let default_state = data_home
			.map(|home| home.join(APP_DIR).join(STATE_FILE))
			.unwrap_or_else(|| project_dir.join(STATE_FILE));

		Self {
			global_config: config_home.map(|home| home.join(APP_DIR).join(CONFIG_FILE)),
			project_config: project_dir.join(CONFIG_FILE),
			default_state,
		}
	}
}

/// Configuration as loaded from disk.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
	pub config: TetherConfig,
	pub paths: ConfigPaths,
}

impl LoadedConfig {
	/// Loads `explicit` alone when given, otherwise the merged global and
	/// project files relative to `project_root`.
	pub fn load(project_root: &Path, explicit: Option<&Path>) -> Result<Self> {
		let paths = ConfigPaths::new(project_root);

		let config = match explicit {
			Some(path) => {
				let content = fs::read_to_string(path)
					.map_err(|e| CliError::Config(format!("cannot read {}: {e}", path.display())))?;
				serde_json::from_str(&content)
					.map_err(|e| CliError::Config(format!("cannot parse {}: {e}", path.display())))?
			}
			None => {
				let mut config = paths
					.global_config
					.as_deref()
					.and_then(load_json::<TetherConfig>)
					.unwrap_or_default();
				if let Some(project) = load_json::<TetherConfig>(&paths.project_config) {
					config.merge(&project);
				}
				config
			}
		};

		tracing::debug!(?config, "configuration loaded");
		Ok(Self { config, paths })
	}

	pub fn state_path(&self) -> PathBuf {
		self.config
			.state_path
			.clone()
			.unwrap_or_else(|| self.paths.default_state.clone())
	}
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
	let content = fs::read_to_string(path).ok()?;
	match serde_json::from_str(&content) {
		Ok(value) => Some(value),
		Err(err) => {
			tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable config file");
			None
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_merge_prefers_set_fields() {
		let mut global = TetherConfig {
			base_url: Some("https://global.example".into()),
			auth_token: Some("global".into()),
			..Default::default()
		};
		let project = TetherConfig {
			base_url: Some("https://project.example".into()),
			queue: Some(QueueConfig {
				batch_size: 2,
				..Default::default()
			}),
			..Default::default()
		};

		global.merge(&project);

		assert_eq!(global.base_url.as_deref(), Some("https://project.example"));
		assert_eq!(global.auth_token.as_deref(), Some("global"));
		assert_eq!(global.queue.unwrap().batch_size, 2);
	}

	#[test]
	fn test_parse_camel_case_with_partial_sections() {
		let config: TetherConfig = serde_json::from_str(
			r#"{"baseUrl":"https://api.example","coordinator":{"timeoutMs":500},"statePath":"/tmp/s.json"}"#,
		)
		.unwrap();

		assert_eq!(config.base_url.as_deref(), Some("https://api.example"));
		let coordinator = config.coordinator.unwrap();
		assert_eq!(coordinator.timeout_ms, 500);
		assert_eq!(coordinator.cleanup_interval_ms, 60_000);
		assert_eq!(config.state_path, Some(PathBuf::from("/tmp/s.json")));
	}

	#[test]
	fn test_explicit_file_must_load() {
		let dir = tempfile::tempdir().unwrap();
		let missing = dir.path().join("missing.json");
		assert!(matches!(
			LoadedConfig::load(dir.path(), Some(&missing)),
			Err(CliError::Config(_))
		));

		let broken = dir.path().join("broken.json");
		fs::write(&broken, "{").unwrap();
		assert!(matches!(
			LoadedConfig::load(dir.path(), Some(&broken)),
			Err(CliError::Config(_))
		));
	}

	#[test]
	fn test_explicit_file_sets_state_path() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("config.json");
		fs::write(&file, r#"{"statePath":"custom.json"}"#).unwrap();

		let loaded = LoadedConfig::load(dir.path(), Some(&file)).unwrap();
		assert_eq!(loaded.state_path(), PathBuf::from("custom.json"));
	}
}
