use crate::types::{LogType, ServiceSnapshot, ServiceState};
use serde::{Deserialize, Serialize};

/// Inbound control message from a dashboard client.
///
/// `action` stays a plain string so an unrecognized action can be reported
/// back by name instead of failing deserialization.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientCommand {
	pub action: String,
	#[serde(rename = "serviceID")]
	pub service_id: String,
}

/// Outbound event to dashboard clients. All variants except
/// [`ServerEvent::ErrorFromServer`] are broadcast to every connected client;
/// errors go only to the client that caused them.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
	Log {
		#[serde(rename = "serviceID")]
		service_id: String,
		line: String,
		#[serde(rename = "logType")]
		log_type: LogType,
		timestamp: u64,
	},
	StatusUpdate {
		#[serde(rename = "serviceID")]
		service_id: String,
		status: ServiceState,
		#[serde(rename = "errorDetails")]
		error_details: Option<String>,
	},
	LogsCleared {
		#[serde(rename = "serviceID")]
		service_id: String,
	},
	InitialState {
		services: Vec<ServiceSnapshot>,
	},
	ErrorFromServer {
		message: String,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn client_command_parses_wire_fields() {
		let command: ClientCommand =
			serde_json::from_str(r#"{"action":"start","serviceID":"api"}"#).unwrap();
		assert_eq!(command.action, "start");
		assert_eq!(command.service_id, "api");
	}

	#[test]
	fn log_event_wire_shape() {
		let event = ServerEvent::Log {
			service_id: "api".into(),
			line: "listening".into(),
			log_type: LogType::Stdout,
			timestamp: 1700000000000,
		};
		let json = serde_json::to_string(&event).unwrap();
		assert!(json.contains("\"type\":\"log\""));
		assert!(json.contains("\"serviceID\":\"api\""));
		assert!(json.contains("\"logType\":\"stdout\""));
	}

	#[test]
	fn status_update_wire_shape() {
		let event = ServerEvent::StatusUpdate {
			service_id: "api".into(),
			status: ServiceState::Error,
			error_details: Some("Exited with error code 2".into()),
		};
		let json = serde_json::to_string(&event).unwrap();
		assert!(json.contains("\"type\":\"status_update\""));
		assert!(json.contains("\"status\":\"error\""));
		assert!(json.contains("\"errorDetails\":\"Exited with error code 2\""));
	}

	#[test]
	fn logs_cleared_wire_shape() {
		let event = ServerEvent::LogsCleared { service_id: "api".into() };
		assert_eq!(
			serde_json::to_string(&event).unwrap(),
			r#"{"type":"logs_cleared","serviceID":"api"}"#
		);
	}

	#[test]
	fn error_event_wire_shape() {
		let event = ServerEvent::ErrorFromServer {
			message: "Invalid serviceID: nope".into(),
		};
		let json = serde_json::to_string(&event).unwrap();
		assert!(json.contains("\"type\":\"error_from_server\""));
		assert!(json.contains("Invalid serviceID: nope"));
	}
}
