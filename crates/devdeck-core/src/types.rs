use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// A service as declared by the user. The working directory and environment
/// are resolved against supervisor-wide defaults at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
	pub id: String,
	pub name: String,
	/// Ordered argv: executable followed by its arguments.
	pub command: Vec<String>,
	pub cwd: Option<PathBuf>,
	/// Extra variables merged over the host process environment.
	#[serde(default)]
	pub env: HashMap<String, String>,
	/// Opaque passthrough links shown in the UI next to the service.
	#[serde(default)]
	pub web_links: Vec<WebLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebLink {
	pub label: String,
	pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
	Stopped,
	Starting,
	Running,
	Stopping,
	Error,
	Crashed,
}

impl ServiceState {
	/// A start is only accepted from a resting state.
	pub fn can_start(&self) -> bool {
		matches!(self, ServiceState::Stopped | ServiceState::Error)
	}

	pub fn is_active(&self) -> bool {
		matches!(self, ServiceState::Running | ServiceState::Starting)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			ServiceState::Stopped => "stopped",
			ServiceState::Starting => "starting",
			ServiceState::Running => "running",
			ServiceState::Stopping => "stopping",
			ServiceState::Error => "error",
			ServiceState::Crashed => "crashed",
		}
	}
}

impl fmt::Display for ServiceState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
	Stdout,
	Stderr,
	System,
}

/// One captured log line. `line` has ANSI escape sequences stripped;
/// `timestamp` is milliseconds since the epoch, assigned at capture time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
	pub timestamp: u64,
	pub line: String,
	#[serde(rename = "logType")]
	pub log_type: LogType,
}

/// Point-in-time view of one service, as sent in the initial-state dump.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSnapshot {
	pub id: String,
	pub name: String,
	pub status: ServiceState,
	pub logs: Vec<LogEntry>,
	#[serde(rename = "errorDetails")]
	pub error_details: Option<String>,
	#[serde(rename = "webLinks")]
	pub web_links: Vec<WebLink>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn service_state_serializes_lowercase() {
		assert_eq!(serde_json::to_string(&ServiceState::Stopped).unwrap(), "\"stopped\"");
		assert_eq!(serde_json::to_string(&ServiceState::Crashed).unwrap(), "\"crashed\"");
	}

	#[test]
	fn service_state_can_start() {
		assert!(ServiceState::Stopped.can_start());
		assert!(ServiceState::Error.can_start());
		assert!(!ServiceState::Running.can_start());
		assert!(!ServiceState::Starting.can_start());
		assert!(!ServiceState::Stopping.can_start());
		assert!(!ServiceState::Crashed.can_start());
	}

	#[test]
	fn log_entry_field_names() {
		let entry = LogEntry {
			timestamp: 1700000000000,
			line: "hello".into(),
			log_type: LogType::Stderr,
		};
		let json = serde_json::to_string(&entry).unwrap();
		assert!(json.contains("\"logType\":\"stderr\""));
		assert!(json.contains("\"timestamp\":1700000000000"));
	}

	#[test]
	fn service_config_defaults() {
		let config: ServiceConfig =
			serde_json::from_str(r#"{"id":"db","name":"Postgres","command":["postgres"]}"#)
				.unwrap();
		assert!(config.env.is_empty());
		assert!(config.web_links.is_empty());
		assert!(config.cwd.is_none());
	}
}
