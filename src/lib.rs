pub mod api;
pub mod app_state;
pub mod cleanup;
pub mod config;
pub mod filter_graph;
pub mod media;
pub mod text;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

//
// Re-export
//
pub use api::{ApiError, UploadResponse, WaitlistResponse, serve_processed, upload, waitlist};
pub use app_state::AppState;
pub use config::{Canvas, Config, TextLayout};
pub use filter_graph::{FilterGraph, FilterStage, build_filter_graph};
pub use media::{CompositionJob, MediaCommand, MediaError, MediaRunner, compose};
pub use text::{EscapeProfile, TextFields, build_text_block, escape, wrap};

/// Room for the text fields and multipart framing on top of two files.
const FORM_OVERHEAD_BYTES: u64 = 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let body_limit = state
        .config
        .max_upload_bytes
        .saturating_mul(2)
        .saturating_add(FORM_OVERHEAD_BYTES);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/upload", post(upload))
        .route("/processed/{filename}", get(serve_processed))
        .route("/waitlist", get(waitlist))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(api::log_request_errors))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(Extension(state))
}

/// Serve on an already bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!("Listening on http://{addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", config.listen_on_port);
    let state = AppState::new(config).await?;
    let listener = TcpListener::bind(&addr).await?;
    serve(listener, state).await
}
