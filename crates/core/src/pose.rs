//! Body-pose landmarks and the six tracked joint angles.
//!
//! Landmark indices follow the 33-point BlazePose topology used by the pose
//! landmarker. Only the first detected body in a frame is ever considered.

use serde::{Deserialize, Serialize};

use crate::joint_angle::{angle_at_joint, Point3};
use crate::round_to;

// ---------------------------------------------------------------------------
// Landmark indices
// ---------------------------------------------------------------------------

pub const LEFT_SHOULDER: usize = 11;
pub const RIGHT_SHOULDER: usize = 12;
pub const LEFT_ELBOW: usize = 13;
pub const RIGHT_ELBOW: usize = 14;
pub const LEFT_WRIST: usize = 15;
pub const RIGHT_WRIST: usize = 16;
pub const LEFT_HIP: usize = 23;
pub const RIGHT_HIP: usize = 24;
pub const LEFT_KNEE: usize = 25;
pub const RIGHT_KNEE: usize = 26;
pub const LEFT_ANKLE: usize = 27;
pub const RIGHT_ANKLE: usize = 28;

/// Minimum world-landmark count before elbow angles are attempted.
pub const MIN_LANDMARKS_UPPER_BODY: usize = 17;

/// Minimum world-landmark count before hip and knee angles are attempted.
pub const MIN_LANDMARKS_FULL_BODY: usize = 29;

/// Decimal places kept on overlay landmark coordinates.
pub const LANDMARK_PRECISION: u32 = 5;

/// Decimal places kept on joint angles.
pub const ANGLE_PRECISION: u32 = 2;

// ---------------------------------------------------------------------------
// Detection output
// ---------------------------------------------------------------------------

/// One detected body as returned by a landmark provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseDetection {
    /// 3-D positions in real-world units, used for angle geometry.
    #[serde(default)]
    pub world_landmarks: Vec<Point3>,
    /// Normalized image positions (`x`, `y` in `[0, 1]`), used for overlays.
    #[serde(default)]
    pub image_landmarks: Vec<Point3>,
}

/// Normalized 2-D landmark (with relative depth) for overlay rendering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayLandmark {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<Point3> for OverlayLandmark {
    fn from(p: Point3) -> Self {
        Self {
            x: round_to(p.x, LANDMARK_PRECISION),
            y: round_to(p.y, LANDMARK_PRECISION),
            z: round_to(p.z, LANDMARK_PRECISION),
        }
    }
}

// ---------------------------------------------------------------------------
// Joints
// ---------------------------------------------------------------------------

/// A tracked joint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Joint {
    LeftElbow,
    RightElbow,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
}

impl Joint {
    pub const ALL: [Joint; 6] = [
        Joint::LeftElbow,
        Joint::RightElbow,
        Joint::LeftHip,
        Joint::RightHip,
        Joint::LeftKnee,
        Joint::RightKnee,
    ];

    /// `(proximal, joint, distal)` landmark indices.
    pub fn triple(self) -> (usize, usize, usize) {
        match self {
            Joint::LeftElbow => (LEFT_SHOULDER, LEFT_ELBOW, LEFT_WRIST),
            Joint::RightElbow => (RIGHT_SHOULDER, RIGHT_ELBOW, RIGHT_WRIST),
            Joint::LeftHip => (LEFT_SHOULDER, LEFT_HIP, LEFT_KNEE),
            Joint::RightHip => (RIGHT_SHOULDER, RIGHT_HIP, RIGHT_KNEE),
            Joint::LeftKnee => (LEFT_HIP, LEFT_KNEE, LEFT_ANKLE),
            Joint::RightKnee => (RIGHT_HIP, RIGHT_KNEE, RIGHT_ANKLE),
        }
    }

    /// Landmarks the detector must have returned before this joint is measured.
    pub fn min_landmarks(self) -> usize {
        match self {
            Joint::LeftElbow | Joint::RightElbow => MIN_LANDMARKS_UPPER_BODY,
            _ => MIN_LANDMARKS_FULL_BODY,
        }
    }
}

/// Angles for the six tracked joints, in degrees.
///
/// Serialized flat as `<joint>_deg` so it can be embedded in a frame record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JointAngles {
    #[serde(rename = "left_elbow_deg")]
    pub left_elbow: Option<f64>,
    #[serde(rename = "right_elbow_deg")]
    pub right_elbow: Option<f64>,
    #[serde(rename = "left_hip_deg")]
    pub left_hip: Option<f64>,
    #[serde(rename = "right_hip_deg")]
    pub right_hip: Option<f64>,
    #[serde(rename = "left_knee_deg")]
    pub left_knee: Option<f64>,
    #[serde(rename = "right_knee_deg")]
    pub right_knee: Option<f64>,
}

impl JointAngles {
    pub fn get(&self, joint: Joint) -> Option<f64> {
        match joint {
            Joint::LeftElbow => self.left_elbow,
            Joint::RightElbow => self.right_elbow,
            Joint::LeftHip => self.left_hip,
            Joint::RightHip => self.right_hip,
            Joint::LeftKnee => self.left_knee,
            Joint::RightKnee => self.right_knee,
        }
    }

    fn set(&mut self, joint: Joint, value: Option<f64>) {
        let slot = match joint {
            Joint::LeftElbow => &mut self.left_elbow,
            Joint::RightElbow => &mut self.right_elbow,
            Joint::LeftHip => &mut self.left_hip,
            Joint::RightHip => &mut self.right_hip,
            Joint::LeftKnee => &mut self.left_knee,
            Joint::RightKnee => &mut self.right_knee,
        };
        *slot = value;
    }

    /// `true` when no joint could be measured.
    pub fn is_empty(&self) -> bool {
        Joint::ALL.iter().all(|j| self.get(*j).is_none())
    }

    /// Measure every joint on the first detected body.
    ///
    /// Each joint is computed independently; a degenerate triple only
    /// blanks that joint. Angles are rounded to [`ANGLE_PRECISION`] places.
    pub fn from_detections(poses: &[PoseDetection]) -> Self {
        let mut angles = JointAngles::default();
        let Some(world) = poses.first().map(|p| p.world_landmarks.as_slice()) else {
            return angles;
        };

        for joint in Joint::ALL {
            if world.len() < joint.min_landmarks() {
                continue;
            }
            let (p, j, d) = joint.triple();
            let value = angle_at_joint(world[p], world[j], world[d])
                .map(|deg| round_to(deg, ANGLE_PRECISION));
            angles.set(joint, value);
        }
        angles
    }
}

/// Overlay landmarks of the first detected body, or empty.
pub fn overlay_landmarks(poses: &[PoseDetection]) -> Vec<OverlayLandmark> {
    poses
        .first()
        .map(|p| p.image_landmarks.iter().copied().map(OverlayLandmark::from).collect())
        .unwrap_or_default()
}
