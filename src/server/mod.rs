//! HTTP-сервер синтеза
//!
//! Эндпоинты: `GET /health`, `GET /ready`, `POST /api/warmup`,
//! `POST /api/synthesize` (multipart). Ошибки возвращаются как
//! `{"error": {"category", "message", "chunk_index"?, "hint"?}}`.

pub mod http;
pub mod state;

pub use http::{create_router, ApiError};
pub use state::AppState;

use log::info;

/// Дождаться Ctrl+C или SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
