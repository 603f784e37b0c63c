//! Per-run construction of the analysis collaborators.

use std::path::Path;

use crate::analysis::{self, AnalysisOptions, AnalysisResult, FrameSource, LandmarkProvider, ProgressSink};
use crate::error::CoreError;
use crate::ffmpeg::{FfmpegFrameSource, FfmpegTools};
use crate::landmarker::{LandmarkerConfig, ProcessLandmarker};

/// Opens a fresh frame source and landmark provider for every run.
///
/// Implementations are shared across requests; the objects they return are
/// not.
pub trait AnalysisBackend: Send + Sync + 'static {
    /// Start a detector for one run.
    fn open_landmarker(&self) -> Result<Box<dyn LandmarkProvider>, CoreError>;

    /// Open `path` for decoding.
    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, CoreError>;

    /// Whether the detection asset is present.
    fn model_available(&self) -> bool;

    /// Analyze the video at `path` from start to finish on the calling thread.
    ///
    /// A missing detection asset is reported before the video is opened.
    fn analyze(
        &self,
        path: &Path,
        options: &AnalysisOptions,
        sink: &mut dyn ProgressSink,
    ) -> Result<AnalysisResult, CoreError> {
        options.validate()?;
        let landmarker = self.open_landmarker()?;
        let source = self.open_source(path)?;
        analysis::run(source, landmarker, options, sink)
    }
}

/// Production backend: ffmpeg decoding plus the pose landmarker process.
#[derive(Debug, Clone, Default)]
pub struct FfmpegBackend {
    pub tools: FfmpegTools,
    pub landmarker: LandmarkerConfig,
}

impl FfmpegBackend {
    pub fn new(tools: FfmpegTools, landmarker: LandmarkerConfig) -> Self {
        Self { tools, landmarker }
    }
}

impl AnalysisBackend for FfmpegBackend {
    fn open_landmarker(&self) -> Result<Box<dyn LandmarkProvider>, CoreError> {
        Ok(Box::new(ProcessLandmarker::spawn(&self.landmarker)?))
    }

    fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, CoreError> {
        Ok(Box::new(FfmpegFrameSource::open(&self.tools, path)?))
    }

    fn model_available(&self) -> bool {
        self.landmarker.model_available()
    }
}
