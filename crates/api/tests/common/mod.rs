#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use image::RgbImage;
use tower::ServiceExt;

use kinetrack_api::config::ServerConfig;
use kinetrack_api::router::build_app_router;
use kinetrack_api::state::AppState;
use kinetrack_core::analysis::{Frame, FrameSource, LandmarkProvider};
use kinetrack_core::backend::AnalysisBackend;
use kinetrack_core::error::CoreError;
use kinetrack_core::ffmpeg::FfmpegTools;
use kinetrack_core::joint_angle::Point3;
use kinetrack_core::landmarker::LandmarkerConfig;
use kinetrack_core::pose::PoseDetection;

/// Upload content the fake backend refuses to decode.
pub const CORRUPT_VIDEO: &[u8] = b"corrupt";

/// Build a test `ServerConfig` with safe defaults, spooling uploads into
/// `upload_dir`.
pub fn test_config(upload_dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        upload_dir: upload_dir.to_path_buf(),
        max_upload_bytes: 16 * 1024 * 1024,
        max_processed_frames: 0,
        max_processing_dimension: 0,
        landmarker: LandmarkerConfig {
            model_path: PathBuf::from("/nonexistent/pose_landmarker_lite.task"),
            command: "pose-landmarker".to_string(),
        },
        ffmpeg: FfmpegTools::default(),
    }
}

/// Build the full application router with all middleware layers around
/// `backend`.
///
/// Uses the same router builder as `main.rs` so integration tests exercise
/// the production middleware stack.
pub fn build_test_app(backend: FakeBackend, config: ServerConfig) -> Router {
    let state = AppState {
        config: Arc::new(config.clone()),
        backend: Arc::new(backend),
    };
    build_app_router(state, &config)
}

// ---------------------------------------------------------------------------
// Fake analysis backend
// ---------------------------------------------------------------------------

/// Serves `frames` synthetic frames for any readable upload.
#[derive(Debug, Clone)]
pub struct FakeBackend {
    pub frames: u64,
    pub model_available: bool,
}

impl FakeBackend {
    pub fn with_frames(frames: u64) -> Self {
        Self {
            frames,
            model_available: true,
        }
    }

    pub fn without_model() -> Self {
        Self {
            frames: 10,
            model_available: false,
        }
    }
}

impl AnalysisBackend for FakeBackend {
    fn open_landmarker(&self) -> Result<Box<dyn LandmarkProvider>, CoreError> {
        if !self.model_available {
            return Err(CoreError::ServiceUnavailable(
                "Pose landmarker model not found".into(),
            ));
        }
        Ok(Box::new(FakeLandmarker))
    }

    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, CoreError> {
        let content = std::fs::read(path).map_err(|e| CoreError::Internal(e.to_string()))?;
        if content == CORRUPT_VIDEO {
            return Err(CoreError::InvalidInput(
                "Could not open video. MP4 (H.264) works best.".into(),
            ));
        }
        Ok(Box::new(FakeSource {
            count: self.frames,
            next: 0,
        }))
    }

    fn model_available(&self) -> bool {
        self.model_available
    }
}

struct FakeSource {
    count: u64,
    next: u64,
}

impl FrameSource for FakeSource {
    fn total_frames(&self) -> u64 {
        self.count
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CoreError> {
        if self.next >= self.count {
            return Ok(None);
        }
        let index = self.next;
        self.next += 1;
        Ok(Some(Frame {
            timestamp_ms: (index as f64 * 1000.0 / 30.0).round() as i64,
            image: RgbImage::new(32, 24),
        }))
    }
}

/// Always finds one body: left elbow bent at 90°, right arm straight.
struct FakeLandmarker;

impl LandmarkProvider for FakeLandmarker {
    fn detect(
        &mut self,
        _image: &RgbImage,
        _timestamp_ms: i64,
    ) -> Result<Vec<PoseDetection>, CoreError> {
        let mut world = vec![Point3::default(); 33];
        world[11] = Point3::new(0.0, -0.3, 0.0);
        world[13] = Point3::new(0.0, 0.0, 0.0);
        world[15] = Point3::new(0.3, 0.0, 0.0);
        world[12] = Point3::new(0.4, -0.3, 0.0);
        world[14] = Point3::new(0.4, 0.0, 0.0);
        world[16] = Point3::new(0.4, 0.3, 0.0);
        Ok(vec![PoseDetection {
            image_landmarks: vec![Point3::new(0.5, 0.5, 0.0); 33],
            world_landmarks: world,
        }])
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

const BOUNDARY: &str = "kinetrack-test-boundary";

/// One part of a `multipart/form-data` body.
pub struct Part {
    pub name: &'static str,
    pub file_name: Option<&'static str>,
    pub content_type: Option<&'static str>,
    pub data: Vec<u8>,
}

impl Part {
    pub fn text(name: &'static str, value: &str) -> Self {
        Self {
            name,
            file_name: None,
            content_type: None,
            data: value.as_bytes().to_vec(),
        }
    }

    pub fn file(
        name: &'static str,
        file_name: &'static str,
        content_type: &'static str,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            name,
            file_name: Some(file_name),
            content_type: Some(content_type),
            data: data.into(),
        }
    }
}

pub fn multipart_body(parts: &[Part]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let disposition = match part.file_name {
            Some(file_name) => format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{file_name}\"\r\n",
                part.name
            ),
            None => format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name),
        };
        body.extend_from_slice(disposition.as_bytes());
        if let Some(content_type) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_multipart(app: Router, uri: &str, parts: &[Part]) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Parse an NDJSON body into one value per line.
pub async fn body_ndjson(response: Response<Body>) -> Vec<serde_json::Value> {
    let bytes = body_bytes(response).await;
    String::from_utf8(bytes)
        .unwrap()
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// Number of entries left in the upload directory.
pub fn upload_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|it| it.count()).unwrap_or(0)
}
