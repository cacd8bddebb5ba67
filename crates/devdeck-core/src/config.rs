use crate::types::ServiceConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
	#[serde(default)]
	pub server: ServerConfig,
	#[serde(default = "default_max_log_lines")]
	pub max_log_lines: usize,
	pub default_cwd: Option<PathBuf>,
	#[serde(default)]
	pub services: Vec<ServiceConfig>,
}

impl Default for DashboardConfig {
	fn default() -> Self {
		Self {
			server: ServerConfig::default(),
			max_log_lines: default_max_log_lines(),
			default_cwd: None,
			services: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
	#[serde(default = "default_port")]
	pub port: u16,
	#[serde(default = "default_hostname")]
	pub hostname: String,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			port: default_port(),
			hostname: default_hostname(),
		}
	}
}

fn default_port() -> u16 {
	4000
}
fn default_hostname() -> String {
	"localhost".to_string()
}
fn default_max_log_lines() -> usize {
	200
}

/// Loads the dashboard config, falling back to defaults when the file is
/// missing or malformed. A malformed service entry is not a startup error;
/// it surfaces later through the spawn-failure path.
pub fn load_config(path: &Path) -> DashboardConfig {
	if path.exists() {
		match std::fs::read_to_string(path) {
			Ok(content) => match toml::from_str(&content) {
				Ok(config) => return config,
				Err(e) => eprintln!("warning: failed to parse {}: {}", path.display(), e),
			},
			Err(e) => eprintln!("warning: failed to read {}: {}", path.display(), e),
		}
	}
	DashboardConfig::default()
}
