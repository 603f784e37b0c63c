use std::path::{Path, PathBuf};

use kinetrack_core::analysis::AnalysisOptions;
use kinetrack_core::ffmpeg::FfmpegTools;
use kinetrack_core::landmarker::{self, LandmarkerConfig};

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `600`). Video analysis runs
    /// inside the request in non-streaming mode.
    pub request_timeout_secs: u64,
    /// Directory uploaded videos are written to while they are analyzed.
    pub upload_dir: PathBuf,
    /// Largest accepted request body in bytes.
    pub max_upload_bytes: usize,
    /// Record cap per video run; `0` disables it.
    pub max_processed_frames: usize,
    /// Longest image side handed to the detector; `0` disables downscaling.
    pub max_processing_dimension: u32,
    pub landmarker: LandmarkerConfig,
    pub ffmpeg: FfmpegTools,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                                  |
    /// |----------------------------|------------------------------------------|
    /// | `HOST`                     | `0.0.0.0`                                |
    /// | `PORT`                     | `8000`                                   |
    /// | `CORS_ORIGINS`             | `http://localhost:5173,http://127.0.0.1:5173,http://localhost:3000` |
    /// | `REQUEST_TIMEOUT_SECS`     | `600`                                    |
    /// | `UPLOAD_DIR`               | `uploads`                                |
    /// | `MAX_UPLOAD_BYTES`         | `536870912`                              |
    /// | `MAX_PROCESSED_FRAMES`     | `0`                                      |
    /// | `MAX_PROCESSING_DIMENSION` | `0`                                      |
    /// | `POSE_LANDMARKER_MODEL`    | `models/pose_landmarker_lite.task`       |
    /// | `POSE_LANDMARKER_CMD`      | `pose-landmarker`                        |
    /// | `FFMPEG_BIN`               | `ffmpeg`                                 |
    /// | `FFPROBE_BIN`              | `ffprobe`                                |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| {
                "http://localhost:5173,http://127.0.0.1:5173,http://localhost:3000".into()
            })
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "600".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let upload_dir =
            PathBuf::from(std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".into()));

        let max_upload_bytes: usize = std::env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| "536870912".into())
            .parse()
            .expect("MAX_UPLOAD_BYTES must be a valid usize");

        let max_processed_frames: usize = std::env::var("MAX_PROCESSED_FRAMES")
            .unwrap_or_else(|_| "0".into())
            .parse()
            .expect("MAX_PROCESSED_FRAMES must be a valid usize");

        let max_processing_dimension: u32 = std::env::var("MAX_PROCESSING_DIMENSION")
            .unwrap_or_else(|_| "0".into())
            .parse()
            .expect("MAX_PROCESSING_DIMENSION must be a valid u32");

        let model_path = std::env::var("POSE_LANDMARKER_MODEL")
            .unwrap_or_else(|_| landmarker::DEFAULT_MODEL_PATH.into());
        let landmarker = LandmarkerConfig {
            model_path: landmarker::resolve_model_path(Path::new(&model_path)),
            command: std::env::var("POSE_LANDMARKER_CMD")
                .unwrap_or_else(|_| landmarker::DEFAULT_COMMAND.into()),
        };

        let ffmpeg = FfmpegTools {
            ffmpeg: std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".into()),
            ffprobe: std::env::var("FFPROBE_BIN").unwrap_or_else(|_| "ffprobe".into()),
        };

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            upload_dir,
            max_upload_bytes,
            max_processed_frames,
            max_processing_dimension,
            landmarker,
            ffmpeg,
        }
    }

    /// Options for one video run with the per-request `frame_skip`.
    pub fn analysis_options(&self, frame_skip: u32) -> AnalysisOptions {
        AnalysisOptions {
            frame_skip,
            max_processing_dimension: self.max_processing_dimension,
            max_processed_frames: self.max_processed_frames,
        }
    }
}
