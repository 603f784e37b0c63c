//! Handler for `/analyze-video`.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Multipart, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use kinetrack_core::analysis::FrameRecord;
use kinetrack_core::streaming::{self, ProgressEvent, TransientFile};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;
use crate::upload;

/// Largest `frame_skip` a client may request.
pub const MAX_FRAME_SKIP: u32 = 4;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeVideoQuery {
    /// `1` switches the response to an NDJSON progress stream.
    pub stream: Option<String>,
}

impl AnalyzeVideoQuery {
    fn streaming(&self) -> bool {
        self.stream.as_deref() == Some("1")
    }
}

#[derive(Debug, Serialize)]
pub struct VideoAnalysisResponse {
    pub frames: Vec<FrameRecord>,
    pub total_frames: usize,
    pub truncated: bool,
}

/// Parse the `frame_skip` form field, clamped to `1..=MAX_FRAME_SKIP`.
/// Anything that is not an integer falls back to 1.
pub fn parse_frame_skip(raw: &str) -> u32 {
    raw.trim()
        .parse::<i64>()
        .map(|n| n.clamp(1, i64::from(MAX_FRAME_SKIP)) as u32)
        .unwrap_or(1)
}

/// POST /api/v1/analyze-video
///
/// Multipart form with a required `video` file and an optional `frame_skip`.
/// Without `?stream=1` the whole result is returned once analysis finished;
/// with it, progress events are streamed as NDJSON and the last line is the
/// result (or the error).
pub async fn analyze_video(
    State(state): State<AppState>,
    Query(query): Query<AnalyzeVideoQuery>,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let mut input: Option<TransientFile> = None;
    let mut frame_skip = 1;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "video" => {
                input = Some(upload::save_video(field, &state.config.upload_dir).await?);
            }
            "frame_skip" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                frame_skip = parse_frame_skip(&text);
            }
            _ => {}
        }
    }

    let input =
        input.ok_or_else(|| AppError::BadRequest("Missing required 'video' field".into()))?;
    let options = state.config.analysis_options(frame_skip);
    let backend = Arc::clone(&state.backend);

    tracing::info!(
        path = %input.path().display(),
        frame_skip,
        stream = query.streaming(),
        "Video analysis requested",
    );

    if query.streaming() {
        let events = streaming::stream(backend, input, options)
            .map(|event: ProgressEvent| event.to_ndjson());
        return Ok((
            [
                (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            Body::from_stream(events),
        )
            .into_response());
    }

    let result = streaming::analyze_file(backend, input, options).await?;
    Ok(Json(DataResponse {
        data: VideoAnalysisResponse {
            total_frames: result.frames.len(),
            frames: result.frames,
            truncated: result.truncated,
        },
    })
    .into_response())
}
