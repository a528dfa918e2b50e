//! Defines routes for the upload API.
//!
//! ## Structure
//! - **Multipart sessions**
//!   - `POST   /uploads` — begin a session
//!   - `PUT    /uploads/{upload_id}/parts/{index}?key=` — upload part `index + 1`
//!   - `POST   /uploads/{upload_id}/complete` — finalize
//!   - `DELETE /uploads/{upload_id}?key=` — abort
//!
//! - **Whole files**
//!   - `POST   /videos` — multipart form upload, chunked server-side
//!
//! - **Objects**
//!   - `GET    /objects/{*key}` — download
//!   - `HEAD   /objects/{*key}` — metadata only

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{get_object, head_object},
        upload_handlers::{abort_upload, complete_upload, create_upload, upload_part},
        video_handlers::upload_video,
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
};

/// Build the router; request bodies are capped at `max_body_bytes`.
pub fn routes(max_body_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/uploads", post(create_upload))
        .route("/uploads/{upload_id}/parts/{index}", put(upload_part))
        .route("/uploads/{upload_id}/complete", post(complete_upload))
        .route("/uploads/{upload_id}", delete(abort_upload))
        .route("/videos", post(upload_video))
        .route("/objects/{*key}", get(get_object).head(head_object))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}
