pub mod api;
pub mod state;

pub use state::AppState;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub fn create_app(state: AppState) -> Router {
    let uploads = ServeDir::new(&state.settings.upload_dir);
    let public = ServeDir::new(&state.settings.public_dir);
    let body_limit = state.settings.max_upload_bytes;

    Router::new()
        .route("/_health", get(api::health))
        .route("/api/chat", post(api::chat::send_message))
        .route("/api/upload", post(api::upload::upload_file))
        .nest_service("/uploads", uploads)
        .fallback_service(public)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
