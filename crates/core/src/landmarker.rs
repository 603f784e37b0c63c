//! Pose landmarker running as a per-run child process.
//!
//! The detector is an external executable that loads a pose model and keeps
//! tracking state between frames, so one process is started per analysis run
//! and fed frames in timestamp order.
//!
//! # Protocol
//!
//! The process is started as `<command> --model <model_path>`. For every
//! frame the caller writes one JSON header line to stdin,
//!
//! ```text
//! {"timestamp_ms":1234,"width":640,"height":360}
//! ```
//!
//! immediately followed by `width * height * 3` bytes of RGB24 pixels. The
//! process answers with exactly one JSON line on stdout:
//!
//! ```text
//! {"poses":[{"world_landmarks":[{"x":..,"y":..,"z":..},..],"image_landmarks":[..]}]}
//! ```
//!
//! or `{"error":"..."}` when detection failed. Closing stdin ends the process.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::analysis::LandmarkProvider;
use crate::error::CoreError;
use crate::pose::PoseDetection;

/// Model file looked up when nothing else is configured.
pub const DEFAULT_MODEL_PATH: &str = "models/pose_landmarker_lite.task";

/// Model file names searched next to the models directory, best first.
pub const FALLBACK_MODEL_NAMES: &[&str] = &["pose_landmarker_full.task", "pose_landmarker_lite.task"];

/// Default detector executable.
pub const DEFAULT_COMMAND: &str = "pose-landmarker";

#[derive(Debug, thiserror::Error)]
pub enum LandmarkerError {
    #[error(
        "Pose landmarker model not found at {0}. Set POSE_LANDMARKER_MODEL or place \
         pose_landmarker_lite.task / pose_landmarker_full.task in models/ or the project root."
    )]
    ModelMissing(PathBuf),

    #[error("Pose landmarker executable '{command}' could not be started: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("Pose landmarker I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pose landmarker sent an invalid response: {0}")]
    Protocol(String),

    #[error("Pose landmarker reported an error: {0}")]
    Detection(String),

    #[error("Timestamp {given} ms is earlier than the previous frame ({previous} ms)")]
    NonMonotonic { previous: i64, given: i64 },
}

impl From<LandmarkerError> for CoreError {
    fn from(err: LandmarkerError) -> Self {
        match err {
            LandmarkerError::ModelMissing(_) | LandmarkerError::Spawn { .. } => {
                CoreError::ServiceUnavailable(err.to_string())
            }
            other => CoreError::Internal(other.to_string()),
        }
    }
}

/// Where to find the detector and its model.
#[derive(Debug, Clone)]
pub struct LandmarkerConfig {
    pub model_path: PathBuf,
    pub command: String,
}

impl Default for LandmarkerConfig {
    fn default() -> Self {
        Self {
            model_path: resolve_model_path(Path::new(DEFAULT_MODEL_PATH)),
            command: DEFAULT_COMMAND.to_string(),
        }
    }
}

impl LandmarkerConfig {
    pub fn model_available(&self) -> bool {
        self.model_path.is_file()
    }
}

/// Use `preferred` if it exists, otherwise the first of
/// [`FALLBACK_MODEL_NAMES`] found in the directory above `preferred`'s
/// parent. Returns `preferred` unchanged when nothing is found so the error
/// names the configured location.
pub fn resolve_model_path(preferred: &Path) -> PathBuf {
    if preferred.is_file() {
        return preferred.to_path_buf();
    }
    let search_dir = preferred
        .parent()
        .and_then(Path::parent)
        .unwrap_or_else(|| Path::new(""));
    FALLBACK_MODEL_NAMES
        .iter()
        .map(|name| search_dir.join(name))
        .find(|candidate| candidate.is_file())
        .unwrap_or_else(|| preferred.to_path_buf())
}

#[derive(Serialize)]
struct FrameHeader {
    timestamp_ms: i64,
    width: u32,
    height: u32,
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    poses: Vec<PoseDetection>,
    error: Option<String>,
}

/// A running detector process bound to one analysis run.
pub struct ProcessLandmarker {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    last_timestamp_ms: Option<i64>,
    line: String,
}

impl ProcessLandmarker {
    /// Check the model asset and start the detector.
    pub fn spawn(config: &LandmarkerConfig) -> Result<Self, LandmarkerError> {
        if !config.model_available() {
            return Err(LandmarkerError::ModelMissing(config.model_path.clone()));
        }

        let mut child = Command::new(&config.command)
            .arg("--model")
            .arg(&config.model_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| LandmarkerError::Spawn {
                command: config.command.clone(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(LandmarkerError::Protocol(
                "detector pipes were not captured".to_string(),
            ));
        };

        tracing::debug!(
            command = %config.command,
            model = %config.model_path.display(),
            "Pose landmarker started",
        );

        Ok(Self {
            child,
            stdin: BufWriter::new(stdin),
            stdout: BufReader::new(stdout),
            last_timestamp_ms: None,
            line: String::new(),
        })
    }

    fn detect_frame(
        &mut self,
        image: &RgbImage,
        timestamp_ms: i64,
    ) -> Result<Vec<PoseDetection>, LandmarkerError> {
        if let Some(previous) = self.last_timestamp_ms {
            if timestamp_ms < previous {
                return Err(LandmarkerError::NonMonotonic {
                    previous,
                    given: timestamp_ms,
                });
            }
        }
        self.last_timestamp_ms = Some(timestamp_ms);

        let header = FrameHeader {
            timestamp_ms,
            width: image.width(),
            height: image.height(),
        };
        let header =
            serde_json::to_string(&header).map_err(|e| LandmarkerError::Protocol(e.to_string()))?;
        self.stdin.write_all(header.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.write_all(image.as_raw())?;
        self.stdin.flush()?;

        self.line.clear();
        if self.stdout.read_line(&mut self.line)? == 0 {
            return Err(LandmarkerError::Protocol(
                "detector closed its output".to_string(),
            ));
        }
        parse_response(&self.line)
    }
}

fn parse_response(line: &str) -> Result<Vec<PoseDetection>, LandmarkerError> {
    let response: DetectResponse =
        serde_json::from_str(line.trim()).map_err(|e| LandmarkerError::Protocol(e.to_string()))?;
    match response.error {
        Some(message) => Err(LandmarkerError::Detection(message)),
        None => Ok(response.poses),
    }
}

impl LandmarkProvider for ProcessLandmarker {
    fn detect(
        &mut self,
        image: &RgbImage,
        timestamp_ms: i64,
    ) -> Result<Vec<PoseDetection>, CoreError> {
        self.detect_frame(image, timestamp_ms).map_err(CoreError::from)
    }
}

impl Drop for ProcessLandmarker {
    fn drop(&mut self) {
        let _ = self.stdin.flush();
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
