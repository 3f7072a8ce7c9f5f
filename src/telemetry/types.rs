//! Controller telemetry types
//!
//! Wire format of the `controller_state` data channel message:
//!
//! ```json
//! {
//!   "type": "controller_state",
//!   "left":  {"position": [x, y, z], "orientation": [x, y, z, w], "trigger": 0.0, "grip": 0.0},
//!   "right": {"position": [x, y, z], "orientation": [x, y, z, w], "trigger": 0.0, "grip": 0.0},
//!   "head":  {"position": [x, y, z], "orientation": [x, y, z, w]}
//! }
//! ```
//!
//! Every top-level key is optional. Fields missing inside a present hand or head
//! object take their neutral value (origin, identity, released).

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Message type tag carried by controller telemetry
pub const CONTROLLER_STATE_TYPE: &str = "controller_state";

/// Grip value above which a hand counts as "held"
pub const GRIP_ENABLE_THRESHOLD: f64 = 0.5;

fn origin() -> [f64; 3] {
    [0.0, 0.0, 0.0]
}

fn identity() -> [f64; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

/// Hand identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub const BOTH: [Hand; 2] = [Hand::Left, Hand::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Hand::Left => "left",
            Hand::Right => "right",
        }
    }
}

impl std::fmt::Display for Hand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One controller's pose and analog inputs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControllerSample {
    #[serde(default = "origin")]
    pub position: [f64; 3],
    /// Quaternion in `[x, y, z, w]` order (WebXR convention)
    #[serde(default = "identity")]
    pub orientation: [f64; 4],
    #[serde(default)]
    pub trigger: f64,
    #[serde(default)]
    pub grip: f64,
}

impl Default for ControllerSample {
    fn default() -> Self {
        Self {
            position: origin(),
            orientation: identity(),
            trigger: 0.0,
            grip: 0.0,
        }
    }
}

impl ControllerSample {
    pub fn position_vector(&self) -> Vector3<f64> {
        Vector3::from(self.position)
    }

    pub fn rotation(&self) -> UnitQuaternion<f64> {
        quaternion_from_xyzw(self.orientation)
    }

    pub fn is_gripped(&self) -> bool {
        self.grip > GRIP_ENABLE_THRESHOLD
    }
}

/// Headset pose (no analog inputs)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadSample {
    #[serde(default = "origin")]
    pub position: [f64; 3],
    #[serde(default = "identity")]
    pub orientation: [f64; 4],
}

impl Default for HeadSample {
    fn default() -> Self {
        Self {
            position: origin(),
            orientation: identity(),
        }
    }
}

impl HeadSample {
    pub fn position_vector(&self) -> Vector3<f64> {
        Vector3::from(self.position)
    }

    pub fn rotation(&self) -> UnitQuaternion<f64> {
        quaternion_from_xyzw(self.orientation)
    }
}

/// Build a unit quaternion from `[x, y, z, w]`, normalizing the input.
///
/// A degenerate (zero-length or non-finite) quaternion maps to identity.
pub fn quaternion_from_xyzw(q: [f64; 4]) -> UnitQuaternion<f64> {
    let raw = Quaternion::new(q[3], q[0], q[1], q[2]);
    let norm = raw.norm();
    if !norm.is_finite() || norm < 1e-9 {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::from_quaternion(raw)
}

/// Partial telemetry update; every present key replaces the stored entry wholesale
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerStateUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<ControllerSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<ControllerSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<HeadSample>,
}

impl ControllerStateUpdate {
    pub fn hand(&self, hand: Hand) -> Option<&ControllerSample> {
        match hand {
            Hand::Left => self.left.as_ref(),
            Hand::Right => self.right.as_ref(),
        }
    }
}

/// Point-in-time copy of all telemetry received so far
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerState {
    pub left: Option<ControllerSample>,
    pub right: Option<ControllerSample>,
    pub head: Option<HeadSample>,
    /// Number of telemetry messages merged into this state
    pub updates: u64,
}

impl ControllerState {
    /// True until the first telemetry message has been merged
    pub fn is_empty(&self) -> bool {
        self.updates == 0
    }

    pub fn hand(&self, hand: Hand) -> Option<&ControllerSample> {
        match hand {
            Hand::Left => self.left.as_ref(),
            Hand::Right => self.right.as_ref(),
        }
    }

    /// Hand sample, or the neutral sample when the hand has not reported
    pub fn hand_or_default(&self, hand: Hand) -> ControllerSample {
        self.hand(hand).copied().unwrap_or_default()
    }

    pub fn head_or_default(&self) -> HeadSample {
        self.head.unwrap_or_default()
    }

    /// Both grips held past the enable threshold
    pub fn both_gripped(&self) -> bool {
        Hand::BOTH
            .iter()
            .all(|hand| self.hand_or_default(*hand).is_gripped())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_defaults_fill_missing_fields() {
        let sample: ControllerSample = serde_json::from_str(r#"{"grip": 0.7}"#).unwrap();
        assert_eq!(sample.position, [0.0, 0.0, 0.0]);
        assert_eq!(sample.orientation, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(sample.trigger, 0.0);
        assert!(sample.is_gripped());
    }

    #[test]
    fn test_grip_threshold_is_strict() {
        let sample = ControllerSample {
            grip: 0.5,
            ..Default::default()
        };
        assert!(!sample.is_gripped());
    }

    #[test]
    fn test_degenerate_quaternion_is_identity() {
        let q = quaternion_from_xyzw([0.0, 0.0, 0.0, 0.0]);
        assert_eq!(q, UnitQuaternion::identity());
    }

    #[test]
    fn test_quaternion_order_is_xyzw() {
        let half = std::f64::consts::FRAC_1_SQRT_2;
        let q = quaternion_from_xyzw([0.0, half, 0.0, half]);
        let rotated = q * Vector3::new(1.0, 0.0, 0.0);
        // 90 degrees about +Y sends +X to -Z
        assert!((rotated - Vector3::new(0.0, 0.0, -1.0)).norm() < 1e-9);
    }

    #[test]
    fn test_missing_hand_defaults() {
        let state = ControllerState::default();
        let left = state.hand_or_default(Hand::Left);
        assert_eq!(left.position_vector(), Vector3::zeros());
        assert_eq!(left.rotation(), UnitQuaternion::identity());
        assert!(!state.both_gripped());
    }
}
