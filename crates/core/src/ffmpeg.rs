//! FFmpeg/FFprobe video decoding.
//!
//! [`probe_video`] reads container metadata; [`FfmpegFrameSource`] streams
//! decoded RGB24 frames from an `ffmpeg` child process and implements
//! [`FrameSource`].

use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use image::RgbImage;
use serde::Deserialize;

use crate::analysis::{Frame, FrameSource};
use crate::error::CoreError;

/// Frame rate assumed when the container does not report one.
pub const FALLBACK_FPS: f64 = 30.0;

/// Error type for FFmpeg/FFprobe operations.
#[derive(Debug, thiserror::Error)]
pub enum FfmpegError {
    #[error("ffprobe/ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffprobe/ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("failed to parse ffprobe output: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("video file not found: {0}")]
    VideoNotFound(String),

    #[error("no decodable video stream")]
    NoVideoStream,
}

impl From<FfmpegError> for CoreError {
    fn from(err: FfmpegError) -> Self {
        match err {
            FfmpegError::NotFound(e) => {
                CoreError::ServiceUnavailable(format!("Video decoder is not installed: {e}"))
            }
            FfmpegError::IoError(e) => CoreError::Internal(format!("Video decoding failed: {e}")),
            other => {
                tracing::debug!(error = %other, "Video could not be opened");
                CoreError::InvalidInput(
                    "Could not open video. MP4 (H.264) is most reliable. \
                     Try converting .mov to MP4 with QuickTime (File → Export) or HandBrake."
                        .to_string(),
                )
            }
        }
    }
}

/// Locations of the `ffmpeg` and `ffprobe` executables.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    pub ffmpeg: String,
    pub ffprobe: String,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// ffprobe JSON output structures
// ---------------------------------------------------------------------------

/// Top-level ffprobe JSON output (`-print_format json -show_format -show_streams`).
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    pub streams: Vec<FfprobeStream>,
    pub format: FfprobeFormat,
}

/// A single stream from ffprobe output.
#[derive(Debug, Default, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// e.g. "30/1" or "24000/1001"
    pub r_frame_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
    pub duration: Option<String>,
    pub nb_frames: Option<String>,
    pub tags: Option<FfprobeStreamTags>,
    pub side_data_list: Option<Vec<FfprobeSideData>>,
}

/// Tags on an ffprobe stream. Older muxers store display rotation here.
#[derive(Debug, Default, Deserialize)]
pub struct FfprobeStreamTags {
    pub rotate: Option<String>,
}

/// Stream side data; the display matrix entry carries `rotation`.
#[derive(Debug, Default, Deserialize)]
pub struct FfprobeSideData {
    pub rotation: Option<f64>,
}

/// Format-level metadata from ffprobe.
#[derive(Debug, Default, Deserialize)]
pub struct FfprobeFormat {
    pub duration: Option<String>,
}

// ---------------------------------------------------------------------------
// Probing
// ---------------------------------------------------------------------------

/// Run `ffprobe` on a video file and return the parsed JSON output.
pub fn probe_video(tools: &FfmpegTools, path: &Path) -> Result<FfprobeOutput, FfmpegError> {
    if !path.exists() {
        return Err(FfmpegError::VideoNotFound(
            path.to_string_lossy().to_string(),
        ));
    }

    let output = Command::new(&tools.ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .map_err(FfmpegError::NotFound)?;

    if !output.status.success() {
        return Err(FfmpegError::ExecutionFailed {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str::<FfprobeOutput>(&stdout)
        .map_err(|e| FfmpegError::ParseError(format!("{e}: {stdout}")))
}

/// Find the first video stream in the ffprobe output.
fn first_video_stream(probe: &FfprobeOutput) -> Option<&FfprobeStream> {
    probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
}

/// Parse the video duration in seconds from ffprobe output.
pub fn parse_duration(probe: &FfprobeOutput) -> f64 {
    // Try format-level duration first.
    if let Some(secs) = probe.format.duration.as_deref().and_then(|d| d.parse::<f64>().ok()) {
        return secs;
    }
    first_video_stream(probe)
        .and_then(|s| s.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Parse the video framerate from ffprobe output.
///
/// Prefers `avg_frame_rate` (real cadence of variable-rate phone footage)
/// and falls back to `r_frame_rate`. Returns 0 when neither is usable.
pub fn parse_framerate(probe: &FfprobeOutput) -> f64 {
    let Some(stream) = first_video_stream(probe) else {
        return 0.0;
    };
    [stream.avg_frame_rate.as_deref(), stream.r_frame_rate.as_deref()]
        .into_iter()
        .flatten()
        .map(parse_fraction)
        .find(|fps| *fps > 0.0)
        .unwrap_or(0.0)
}

/// Parse a fraction string like `"30/1"` into a float.
fn parse_fraction(s: &str) -> f64 {
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() == 2 {
        let num = parts[0].parse::<f64>().unwrap_or(0.0);
        let den = parts[1].parse::<f64>().unwrap_or(1.0);
        if den > 0.0 {
            return num / den;
        }
    }
    s.parse::<f64>().unwrap_or(0.0)
}

/// Count total frames from ffprobe output, or 0 when unknown.
pub fn parse_total_frames(probe: &FfprobeOutput) -> u64 {
    if let Some(n) = first_video_stream(probe)
        .and_then(|s| s.nb_frames.as_deref())
        .and_then(|nb| nb.parse::<u64>().ok())
    {
        return n;
    }
    // Estimate from duration * framerate.
    let duration = parse_duration(probe);
    let fps = parse_framerate(probe);
    if duration > 0.0 && fps > 0.0 {
        return (duration * fps).round() as u64;
    }
    0
}

/// Display rotation in degrees, normalized to `[0, 360)`.
pub fn parse_rotation(probe: &FfprobeOutput) -> i32 {
    let Some(stream) = first_video_stream(probe) else {
        return 0;
    };
    let from_side_data = stream
        .side_data_list
        .iter()
        .flatten()
        .find_map(|sd| sd.rotation);
    let from_tags = stream
        .tags
        .as_ref()
        .and_then(|t| t.rotate.as_deref())
        .and_then(|r| r.parse::<f64>().ok());

    from_side_data
        .or(from_tags)
        .map(|deg| (deg.round() as i32).rem_euclid(360))
        .unwrap_or(0)
}

/// Size of the frames ffmpeg will emit after applying display rotation.
pub fn parse_display_size(probe: &FfprobeOutput) -> Option<(u32, u32)> {
    let stream = first_video_stream(probe)?;
    let (w, h) = (stream.width?, stream.height?);
    if w == 0 || h == 0 {
        return None;
    }
    match parse_rotation(probe) {
        90 | 270 => Some((h, w)),
        _ => Some((w, h)),
    }
}

// ---------------------------------------------------------------------------
// Frame source
// ---------------------------------------------------------------------------

/// Decodes a video file into RGB frames through an `ffmpeg` child process.
///
/// Timestamps are derived from the frame position and the stream frame rate.
/// Dropping the source kills the child process.
pub struct FfmpegFrameSource {
    child: Child,
    stdout: BufReader<ChildStdout>,
    width: u32,
    height: u32,
    fps: f64,
    total_frames: u64,
    next_index: u64,
}

impl FfmpegFrameSource {
    /// Probe `path` and start decoding it.
    pub fn open(tools: &FfmpegTools, path: &Path) -> Result<Self, FfmpegError> {
        let probe = probe_video(tools, path)?;
        let (width, height) = parse_display_size(&probe).ok_or(FfmpegError::NoVideoStream)?;
        let fps = match parse_framerate(&probe) {
            fps if fps > 0.0 => fps,
            _ => FALLBACK_FPS,
        };
        let total_frames = parse_total_frames(&probe);

        let mut child = Command::new(&tools.ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args([
                "-map",
                "0:v:0",
                "-vsync",
                "passthrough",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(FfmpegError::NotFound)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            FfmpegError::IoError(std::io::Error::other("ffmpeg stdout was not captured"))
        })?;

        tracing::debug!(
            path = %path.display(),
            width,
            height,
            fps,
            total_frames,
            "Opened video for decoding",
        );

        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            width,
            height,
            fps,
            total_frames,
            next_index: 0,
        })
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl FrameSource for FfmpegFrameSource {
    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, CoreError> {
        let mut buf = vec![0u8; self.frame_len()];
        match self.stdout.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(FfmpegError::IoError(e).into()),
        }

        let image = RgbImage::from_raw(self.width, self.height, buf).ok_or_else(|| {
            CoreError::Internal("Decoded frame has an unexpected size".to_string())
        })?;
        let index = self.next_index;
        self.next_index += 1;

        Ok(Some(Frame {
            timestamp_ms: frame_timestamp_ms(index, self.fps),
            image,
        }))
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Presentation time of frame `index` at a constant `fps`.
///
/// Frames are stamped from their decode position and the nominal stream
/// rate, not from container timestamps. For variable-frame-rate footage
/// (common on phones) the result is an estimate that can drift from the
/// actual capture time.
pub fn frame_timestamp_ms(index: u64, fps: f64) -> i64 {
    (index as f64 * 1000.0 / fps).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_stream() -> FfprobeStream {
        FfprobeStream {
            codec_type: Some("video".into()),
            width: Some(1920),
            height: Some(1080),
            r_frame_rate: Some("30/1".into()),
            ..FfprobeStream::default()
        }
    }

    fn probe_with(stream: FfprobeStream, duration: Option<&str>) -> FfprobeOutput {
        FfprobeOutput {
            streams: vec![stream],
            format: FfprobeFormat {
                duration: duration.map(str::to_string),
            },
        }
    }

    #[test]
    fn test_parse_fraction_standard() {
        assert!((parse_fraction("30/1") - 30.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_fraction_ntsc() {
        let fps = parse_fraction("24000/1001");
        assert!((fps - 23.976).abs() < 0.01);
    }

    #[test]
    fn test_parse_fraction_zero_denominator() {
        assert!((parse_fraction("30/0") - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_duration_from_stream() {
        let probe = probe_with(
            FfprobeStream {
                duration: Some("60.0".into()),
                ..video_stream()
            },
            None,
        );
        assert!((parse_duration(&probe) - 60.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_framerate_prefers_average() {
        let probe = probe_with(
            FfprobeStream {
                avg_frame_rate: Some("30000/1001".into()),
                r_frame_rate: Some("60/1".into()),
                ..video_stream()
            },
            None,
        );
        assert!((parse_framerate(&probe) - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_parse_framerate_skips_zero_average() {
        let probe = probe_with(
            FfprobeStream {
                avg_frame_rate: Some("0/0".into()),
                ..video_stream()
            },
            None,
        );
        assert!((parse_framerate(&probe) - 30.0).abs() < 0.001);
    }

    #[test]
    fn test_parse_total_frames_from_nb_frames() {
        let probe = probe_with(
            FfprobeStream {
                nb_frames: Some("300".into()),
                ..video_stream()
            },
            Some("10.0"),
        );
        assert_eq!(parse_total_frames(&probe), 300);
    }

    #[test]
    fn test_parse_total_frames_estimated() {
        let probe = probe_with(video_stream(), Some("10.0"));
        assert_eq!(parse_total_frames(&probe), 300);
    }

    #[test]
    fn test_parse_total_frames_unknown() {
        let probe = probe_with(
            FfprobeStream {
                r_frame_rate: None,
                ..video_stream()
            },
            None,
        );
        assert_eq!(parse_total_frames(&probe), 0);
    }

    #[test]
    fn test_portrait_phone_video_swaps_dimensions() {
        let probe = probe_with(
            FfprobeStream {
                side_data_list: Some(vec![FfprobeSideData {
                    rotation: Some(-90.0),
                }]),
                ..video_stream()
            },
            None,
        );
        assert_eq!(parse_rotation(&probe), 270);
        assert_eq!(parse_display_size(&probe), Some((1080, 1920)));
    }

    #[test]
    fn test_rotate_tag_is_honoured() {
        let probe = probe_with(
            FfprobeStream {
                tags: Some(FfprobeStreamTags {
                    rotate: Some("90".into()),
                }),
                ..video_stream()
            },
            None,
        );
        assert_eq!(parse_display_size(&probe), Some((1080, 1920)));
    }

    #[test]
    fn test_missing_video_stream_has_no_size() {
        let probe = probe_with(
            FfprobeStream {
                codec_type: Some("audio".into()),
                ..FfprobeStream::default()
            },
            None,
        );
        assert_eq!(parse_display_size(&probe), None);
    }

    #[test]
    fn test_frame_timestamps() {
        assert_eq!(frame_timestamp_ms(0, 30.0), 0);
        assert_eq!(frame_timestamp_ms(1, 30.0), 33);
        assert_eq!(frame_timestamp_ms(3, 30.0), 100);
        assert_eq!(frame_timestamp_ms(10, 29.97), 334);
    }

    #[test]
    fn test_frame_timestamps_ignore_rate_changes() {
        // Spacing follows the nominal rate at any position.
        assert_eq!(frame_timestamp_ms(60, 30.0), 2000);
        assert_eq!(frame_timestamp_ms(61, 30.0) - frame_timestamp_ms(60, 30.0), 33);
    }

    #[test]
    fn test_missing_file_is_invalid_input() {
        let err = FfmpegFrameSource::open(&FfmpegTools::default(), Path::new("/nonexistent/clip.mp4"))
            .err()
            .unwrap();
        assert!(matches!(err, FfmpegError::VideoNotFound(_)));
        assert!(matches!(CoreError::from(err), CoreError::InvalidInput(_)));
    }
}
