pub mod health;

use axum::routing::post;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /analyze-video          upload a video; ?stream=1 for NDJSON progress (POST)
/// /analyze-imu            upload two sensor CSV exports (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/analyze-video", post(handlers::video::analyze_video))
        .route("/analyze-imu", post(handlers::imu::analyze_imu))
}
