use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use devdeck_core::protocol::{ClientCommand, ServerEvent};

use crate::supervisor::Supervisor;
use crate::web::AppState;

pub async fn ws_handler(
	State(state): State<AppState>,
	ws: WebSocketUpgrade,
) -> impl IntoResponse {
	ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
	tracing::info!("websocket client connected");
	let (mut sender, mut receiver) = socket.split();

	// Subscribe before the initial dump so no transition is missed between
	// snapshot and stream.
	let mut events = state.events.subscribe();

	let initial = ServerEvent::InitialState {
		services: state.supervisor.snapshots().await,
	};
	if send_event(&mut sender, &initial).await.is_err() {
		return;
	}

	loop {
		tokio::select! {
			msg = receiver.next() => {
				match msg {
					Some(Ok(Message::Text(text))) => {
						handle_message(&state, &mut sender, &text).await;
					}
					Some(Ok(Message::Close(_))) | None => break,
					Some(Ok(_)) => {}
					Some(Err(e)) => {
						tracing::error!("websocket error: {}", e);
						break;
					}
				}
			}
			event = events.recv() => {
				match event {
					Ok(event) => {
						if send_event(&mut sender, &event).await.is_err() {
							break;
						}
					}
					Err(broadcast::error::RecvError::Lagged(n)) => {
						tracing::warn!("websocket client lagged, dropped {} events", n);
					}
					Err(broadcast::error::RecvError::Closed) => break,
				}
			}
		}
	}
	tracing::info!("websocket client disconnected");
}

async fn handle_message(
	state: &AppState,
	sender: &mut SplitSink<WebSocket, Message>,
	text: &str,
) {
	if let Some(message) = dispatch(&state.supervisor, text).await {
		send_error(sender, message).await;
	}
}

/// Decodes one control frame and dispatches it. Lifecycle commands run in
/// their own task so the client loop keeps pumping broadcast events while a
/// stop waits out its grace period; the returned message, if any, is an
/// error reply for the issuing client only.
async fn dispatch(supervisor: &Arc<Supervisor>, text: &str) -> Option<String> {
	let command: ClientCommand = match serde_json::from_str(text) {
		Ok(command) => command,
		Err(e) => {
			tracing::error!("websocket message processing error: {}", e);
			return Some(format!("Error: {}", e));
		}
	};

	tracing::info!("ws rcv: {} {}", command.action, command.service_id);

	if !supervisor.contains(&command.service_id).await {
		tracing::error!("invalid serviceID: {}", command.service_id);
		return Some(format!("Invalid serviceID: {}", command.service_id));
	}

	let sup = Arc::clone(supervisor);
	let id = command.service_id;
	match command.action.as_str() {
		"start" => {
			tokio::spawn(async move { sup.start(&id).await });
		}
		"stop" => {
			tokio::spawn(async move { sup.stop(&id).await });
		}
		"restart" => {
			tokio::spawn(async move { sup.restart(&id).await });
		}
		"clear_logs" => {
			tokio::spawn(async move { sup.clear_logs(&id).await });
		}
		other => {
			tracing::warn!("unknown action: {}", other);
			return Some(format!("Unknown action: {}", other));
		}
	}
	None
}

async fn send_error(sender: &mut SplitSink<WebSocket, Message>, message: String) {
	let _ = send_event(sender, &ServerEvent::ErrorFromServer { message }).await;
}

async fn send_event(
	sender: &mut SplitSink<WebSocket, Message>,
	event: &ServerEvent,
) -> Result<(), axum::Error> {
	let payload = match serde_json::to_string(event) {
		Ok(payload) => payload,
		Err(e) => {
			tracing::error!("failed to serialize event: {}", e);
			return Ok(());
		}
	};
	sender.send(Message::Text(payload.into())).await
}
