//! Frame-by-frame video analysis.
//!
//! [`run`] pulls frames from a [`FrameSource`], samples every
//! `frame_skip`-th one, optionally downscales it, hands it to a
//! [`LandmarkProvider`] and turns the first detected body into a
//! [`FrameRecord`]. Progress is reported through a [`ProgressSink`].
//!
//! Execution is strictly sequential: the landmark provider is stateful and
//! must see timestamps in non-decreasing order.

use std::time::Instant;

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::pose::{overlay_landmarks, JointAngles, OverlayLandmark, PoseDetection};
use crate::round_to;

/// Decimal places kept on `time_s`.
pub const TIME_S_PRECISION: u32 = 3;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-run tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Process every Nth source frame. Must be at least 1.
    pub frame_skip: u32,
    /// Longest image side handed to the detector; 0 disables downscaling.
    pub max_processing_dimension: u32,
    /// Stop after this many records; 0 disables the cap.
    pub max_processed_frames: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            frame_skip: 1,
            max_processing_dimension: 0,
            max_processed_frames: 0,
        }
    }
}

impl AnalysisOptions {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.frame_skip == 0 {
            return Err(CoreError::InvalidInput(
                "frame_skip must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn cap_reached(&self, emitted: usize) -> bool {
        self.max_processed_frames > 0 && emitted >= self.max_processed_frames
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// A decoded video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Capture timestamp in milliseconds.
    pub timestamp_ms: i64,
    pub image: RgbImage,
}

/// Ordered supply of decoded frames.
///
/// The source is released when dropped; [`run`] takes ownership so it is
/// dropped on every exit path.
pub trait FrameSource {
    /// Total frames in the source, or 0 when unknown.
    fn total_frames(&self) -> u64;

    /// Next frame in presentation order, `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, CoreError>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn total_frames(&self) -> u64 {
        (**self).total_frames()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CoreError> {
        (**self).next_frame()
    }
}

/// Stateful body-pose detector.
///
/// # Caller obligation
///
/// `timestamp_ms` must be non-decreasing across calls on the same instance.
/// An instance belongs to exactly one run and is never shared.
pub trait LandmarkProvider {
    /// Detect bodies in `image`. An empty vector means no body was found.
    fn detect(&mut self, image: &RgbImage, timestamp_ms: i64)
        -> Result<Vec<PoseDetection>, CoreError>;
}

impl<T: LandmarkProvider + ?Sized> LandmarkProvider for Box<T> {
    fn detect(
        &mut self,
        image: &RgbImage,
        timestamp_ms: i64,
    ) -> Result<Vec<PoseDetection>, CoreError> {
        (**self).detect(image, timestamp_ms)
    }
}

/// Receives progress notifications from [`run`].
pub trait ProgressSink {
    /// Called once, after the first frame was read, when the total is known.
    fn started(&mut self, _total_frames: u64) {}

    /// Called after every consumed source frame when the total is known.
    fn progress(&mut self, _frames_done: u64, _total_frames: u64) {}
}

/// Discards all notifications.
impl ProgressSink for () {}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Angles and overlay landmarks for one sampled frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    /// Dense over sampled frames, starting at 0.
    pub frame_index: u64,
    pub time_ms: i64,
    pub time_s: f64,
    #[serde(flatten)]
    pub angles: JointAngles,
    pub landmarks: Vec<OverlayLandmark>,
}

impl FrameRecord {
    pub fn new(frame_index: u64, time_ms: i64, poses: &[PoseDetection]) -> Self {
        Self {
            frame_index,
            time_ms,
            time_s: round_to(time_ms as f64 / 1000.0, TIME_S_PRECISION),
            angles: JointAngles::from_detections(poses),
            landmarks: overlay_landmarks(poses),
        }
    }
}

/// Ordered records of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub frames: Vec<FrameRecord>,
    /// The frame cap stopped the run before the source was exhausted.
    pub truncated: bool,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Analyze every sampled frame of `source`.
///
/// Fails with `InvalidInput` before the main loop if not even one frame can
/// be read. Detection and decoding errors abort the run.
pub fn run<S, L, P>(
    mut source: S,
    mut provider: L,
    options: &AnalysisOptions,
    sink: &mut P,
) -> Result<AnalysisResult, CoreError>
where
    S: FrameSource,
    L: LandmarkProvider,
    P: ProgressSink + ?Sized,
{
    options.validate()?;
    let started_at = Instant::now();
    let total = source.total_frames();

    let first = source.next_frame()?.ok_or_else(|| {
        CoreError::InvalidInput(
            "Could not read any frames from the video. Try converting to MP4 (H.264).".to_string(),
        )
    })?;

    tracing::info!(
        total_frames = total,
        frame_skip = options.frame_skip,
        max_processing_dimension = options.max_processing_dimension,
        max_processed_frames = options.max_processed_frames,
        "Video analysis started",
    );
    if total > 0 {
        sink.started(total);
    }

    let frame_skip = u64::from(options.frame_skip);
    let mut records: Vec<FrameRecord> = Vec::new();
    let mut truncated = false;
    let mut consumed: u64 = 0;
    let mut next = Some(first);

    while let Some(frame) = next {
        if consumed % frame_skip == 0 {
            if options.cap_reached(records.len()) {
                truncated = true;
                break;
            }
            let image = downscale(frame.image, options.max_processing_dimension);
            let poses = provider.detect(&image, frame.timestamp_ms)?;
            records.push(FrameRecord::new(
                records.len() as u64,
                frame.timestamp_ms,
                &poses,
            ));
        }

        consumed += 1;
        if total > 0 {
            sink.progress(consumed, total);
        }
        next = source.next_frame()?;
    }

    tracing::info!(
        records = records.len(),
        frames_read = consumed,
        truncated,
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "Video analysis finished",
    );

    Ok(AnalysisResult {
        frames: records,
        truncated,
    })
}

/// Shrink `image` so its longest side is at most `max_dimension`, keeping
/// the aspect ratio. `0` or an already-small image returns it unchanged.
pub fn downscale(image: RgbImage, max_dimension: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if max_dimension == 0 || longest <= max_dimension {
        return image;
    }

    let scale = f64::from(max_dimension) / f64::from(longest);
    let new_width = ((f64::from(width) * scale).round() as u32).clamp(1, max_dimension);
    let new_height = ((f64::from(height) * scale).round() as u32).clamp(1, max_dimension);
    imageops::resize(&image, new_width, new_height, FilterType::Triangle)
}
