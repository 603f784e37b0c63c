//! Quaternion algebra for relative sensor orientation.

use serde::{Deserialize, Serialize};

use crate::round_to;

/// Offset applied to the raw relative rotation so a straight limb reads
/// close to zero.
pub const DEFAULT_ANGLE_OFFSET_DEG: f64 = -180.0;

/// Decimal places kept on relative angles.
pub const RELATIVE_ANGLE_PRECISION: u32 = 2;

/// Orientation quaternion in `(w, x, y, z)` order, `w` being the scalar part.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion::new(1.0, 0.0, 0.0, 0.0);

    pub const fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// `(w, -x, -y, -z)`; the inverse for unit quaternions.
    pub fn conjugate(&self) -> Quaternion {
        Quaternion::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Hamilton product `self ⊗ other`.
    pub fn multiply(&self, other: &Quaternion) -> Quaternion {
        let (w1, x1, y1, z1) = (self.w, self.x, self.y, self.z);
        let (w2, x2, y2, z2) = (other.w, other.x, other.y, other.z);
        Quaternion {
            w: w1 * w2 - x1 * x2 - y1 * y2 - z1 * z2,
            x: w1 * x2 + x1 * w2 + y1 * z2 - z1 * y2,
            y: w1 * y2 - x1 * z2 + y1 * w2 + z1 * x2,
            z: w1 * z2 + x1 * y2 - y1 * x2 + z1 * w2,
        }
    }

    /// Rotation angle of this quaternion in degrees, `[0, 360]`.
    pub fn rotation_angle_deg(&self) -> f64 {
        (2.0 * self.w.clamp(-1.0, 1.0).acos()).to_degrees()
    }
}

/// Angle of the segment sensor relative to the reference sensor.
///
/// Computes `segment ⊗ conjugate(reference)`, takes its rotation angle,
/// adds `offset_deg` and rounds to two decimals.
pub fn relative_angle(reference: &Quaternion, segment: &Quaternion, offset_deg: f64) -> f64 {
    let relative = segment.multiply(&reference.conjugate());
    round_to(
        relative.rotation_angle_deg() + offset_deg,
        RELATIVE_ANGLE_PRECISION,
    )
}
