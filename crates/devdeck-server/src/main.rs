use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use devdeck_core::config;
use devdeck_server::{web, Supervisor};

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt().init();

	let config_path = std::env::args()
		.nth(1)
		.map(PathBuf::from)
		.unwrap_or_else(|| PathBuf::from("devdeck.toml"));
	let config = config::load_config(&config_path);

	if config.services.is_empty() {
		tracing::warn!("no services configured in {}", config_path.display());
	}

	let (events, _) = broadcast::channel(256);
	let supervisor = Supervisor::new(
		config.services,
		config.max_log_lines,
		config.default_cwd,
		events.clone(),
	);

	let app = web::router(Arc::clone(&supervisor), events);
	let addr = format!("{}:{}", config.server.hostname, config.server.port);
	let listener = match TcpListener::bind(&addr).await {
		Ok(listener) => listener,
		Err(e) => {
			// The only fatal startup error: everything else degrades into
			// per-service status.
			tracing::error!("failed to bind {}: {}", addr, e);
			std::process::exit(1);
		}
	};

	tracing::info!("devdeck dashboard running on http://{}", addr);

	tokio::select! {
		result = axum::serve(listener, app) => {
			if let Err(e) = result {
				tracing::error!("server error: {}", e);
			}
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("received shutdown signal, stopping services");
			supervisor.stop_all().await;
		}
	}
}
