//! Included angle at a body joint from three 3-D points.

use serde::{Deserialize, Serialize};

/// A point in 3-D space (world landmarks are in metres, hip-centred).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    fn sub(self, other: Point3) -> Point3 {
        Point3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    fn dot(self, other: Point3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }
}

/// Angle in degrees at `joint` between the segments towards `proximal` and
/// `distal`.
///
/// Returns `None` when either segment has zero length. The cosine is clamped
/// to `[-1, 1]` before `acos` so rounding noise on (anti)parallel segments
/// cannot produce `NaN`.
pub fn angle_at_joint(proximal: Point3, joint: Point3, distal: Point3) -> Option<f64> {
    let v1 = proximal.sub(joint);
    let v2 = distal.sub(joint);

    let magnitude = v1.norm() * v2.norm();
    if magnitude == 0.0 {
        return None;
    }

    let cos = (v1.dot(v2) / magnitude).clamp(-1.0, 1.0);
    Some(cos.acos().to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn straight_limb_is_180_degrees() {
        let angle = angle_at_joint(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.5, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
        )
        .unwrap();
        assert!((angle - 180.0).abs() < EPS);
    }

    #[test]
    fn right_angle_in_3d() {
        let angle = angle_at_joint(
            Point3::new(0.0, 0.3, 0.0),
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, -0.25),
        )
        .unwrap();
        assert!((angle - 90.0).abs() < EPS);
    }

    #[test]
    fn folded_limb_is_zero_degrees() {
        let angle = angle_at_joint(
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 2.0, 2.0),
        )
        .unwrap();
        assert!(angle.abs() < 1e-6);
        assert!(!angle.is_nan());
    }

    #[test]
    fn zero_length_segment_returns_none() {
        let joint = Point3::new(0.2, 0.4, 0.1);
        assert_eq!(angle_at_joint(joint, joint, Point3::new(1.0, 0.0, 0.0)), None);
        assert_eq!(angle_at_joint(Point3::new(1.0, 0.0, 0.0), joint, joint), None);
    }

    #[test]
    fn symmetric_under_swapping_ends() {
        let samples = [
            (
                Point3::new(0.1, 0.7, -0.2),
                Point3::new(0.0, 0.4, 0.0),
                Point3::new(0.3, 0.1, 0.05),
            ),
            (
                Point3::new(-1.0, 2.0, 3.0),
                Point3::new(0.5, -0.5, 0.25),
                Point3::new(4.0, 0.0, -2.0),
            ),
        ];
        for (p, j, d) in samples {
            let forward = angle_at_joint(p, j, d).unwrap();
            let backward = angle_at_joint(d, j, p).unwrap();
            assert!((forward - backward).abs() < EPS);
        }
    }

    #[test]
    fn angle_stays_within_range() {
        let joint = Point3::new(0.0, 0.0, 0.0);
        for i in 0..36 {
            let theta = (i as f64 * 10.0).to_radians();
            let distal = Point3::new(theta.cos(), theta.sin(), 0.1 * i as f64);
            let angle = angle_at_joint(Point3::new(1.0, 0.0, 0.0), joint, distal).unwrap();
            assert!((0.0..=180.0).contains(&angle), "angle {angle} out of range");
        }
    }
}
