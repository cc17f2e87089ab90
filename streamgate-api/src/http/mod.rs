// Module: http
// The viewer-facing access gateway: signed HLS delivery, heartbeats,
// token recovery and the public catalog.

pub mod error;
pub mod extract;
pub mod hls;
pub mod payment;
pub mod stream;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use streamgate_core::{
    catalog::StreamCatalog,
    repository::{PaymentRepository, StreamRepository},
    service::{AccessService, DeviceGate},
    session::SessionStore,
    signer::UrlSigner,
    upstream::UpstreamClient,
    Config,
};

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: StreamCatalog,
    pub streams: StreamRepository,
    pub payments: PaymentRepository,
    pub sessions: SessionStore,
    pub signer: UrlSigner,
    pub upstream: Arc<UpstreamClient>,
    pub access: AccessService,
    pub device_gate: DeviceGate,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Signed HLS delivery (playlists and segments share one route)
        .route("/stream/:stream/hls/*path", get(hls::serve_hls))
        // Viewer session endpoints
        .route("/api/stream/:stream/heartbeat", post(stream::heartbeat))
        .route("/api/stream/:stream/playlist", get(stream::playlist_url))
        // Public catalog
        .route("/api/streams", get(stream::list_streams))
        .route("/api/streams/:slug", get(stream::stream_info))
        // Token issuance and recovery
        .route("/api/payment/confirm", get(payment::confirm))
        .route("/api/payment/recover", post(payment::recover))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
