//! Kinetrack motion-angle analysis engine.
//!
//! Joint angles from video (pose landmarks per frame) and from pairs of
//! inertial sensors (orientation quaternions), plus the worker/stream bridge
//! that reports video analysis progress incrementally.

pub mod analysis;
pub mod backend;
pub mod error;
pub mod ffmpeg;
pub mod imu;
pub mod joint_angle;
pub mod landmarker;
pub mod pose;
pub mod quaternion;
pub mod streaming;

/// Round `value` to `decimals` places.
///
/// Rounds the exact binary value through its decimal rendering, so inputs
/// such as `0.15` (stored just below the midpoint) round down.
pub(crate) fn round_to(value: f64, decimals: u32) -> f64 {
    format!("{value:.prec$}", prec = decimals as usize)
        .parse()
        .unwrap_or(value)
}
