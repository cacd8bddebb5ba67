use std::sync::Arc;

use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use rust_embed::RustEmbed;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

use devdeck_core::protocol::ServerEvent;

use crate::supervisor::Supervisor;
use crate::ws;

#[derive(RustEmbed)]
#[folder = "assets/"]
struct UiAssets;

#[derive(Clone)]
pub struct AppState {
	pub supervisor: Arc<Supervisor>,
	pub events: broadcast::Sender<ServerEvent>,
}

pub fn router(
	supervisor: Arc<Supervisor>,
	events: broadcast::Sender<ServerEvent>,
) -> Router {
	let state = AppState { supervisor, events };

	Router::new()
		.route("/ws", get(ws::ws_handler))
		.fallback(static_handler)
		.layer(CorsLayer::permissive())
		.with_state(state)
}

async fn static_handler(uri: Uri) -> impl IntoResponse {
	let path = uri.path().trim_start_matches('/');

	if let Some(content) = UiAssets::get(path) {
		return serve_asset(path, content);
	}

	if !path.contains('.') {
		if let Some(content) = UiAssets::get("index.html") {
			return serve_asset("index.html", content);
		}
	}

	Response::builder()
		.status(StatusCode::NOT_FOUND)
		.body("Not Found".into())
		.unwrap()
}

fn serve_asset(path: &str, content: rust_embed::EmbeddedFile) -> Response {
	let mime = mime_guess::from_path(path).first_or_octet_stream();

	Response::builder()
		.status(StatusCode::OK)
		.header(header::CONTENT_TYPE, mime.as_ref())
		.body(content.data.into())
		.unwrap()
}
