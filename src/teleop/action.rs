//! Robot action schema and the VR to robot axis remap
//!
//! WebXR uses a right-handed frame with +Y up and -Z forward. The robot frame
//! has +X forward, +Y left and +Z up, hence
//! `robot_x = -vr_z`, `robot_y = vr_x`, `robot_z = vr_y`.

use nalgebra::Vector3;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use super::calibration::{CalibratedFrame, CalibratedHand};
use crate::config::ArmMode;
use crate::telemetry::Hand;

/// Keys emitted per hand, in schema order
pub const HAND_ACTION_KEYS: [&str; 8] = [
    "enabled",
    "target_x",
    "target_y",
    "target_z",
    "target_wx",
    "target_wy",
    "target_wz",
    "gripper_vel",
];

/// One action value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionValue {
    Bool(bool),
    Float(f64),
}

impl ActionValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ActionValue::Bool(v) => Some(*v),
            ActionValue::Float(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ActionValue::Float(v) => Some(*v),
            ActionValue::Bool(_) => None,
        }
    }
}

/// Value type of an action key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Bool,
    Float,
}

/// Flat key/value action handed to the robot consumer each tick
pub type RobotAction = BTreeMap<String, ActionValue>;

/// Map a VR-frame vector into the robot frame
pub fn remap_axes(v: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(-v.z, v.x, v.y)
}

fn key_prefix(mode: ArmMode, hand: Hand) -> &'static str {
    match (mode, hand) {
        (ArmMode::Single, _) => "",
        (ArmMode::Bimanual, Hand::Left) => "left_",
        (ArmMode::Bimanual, Hand::Right) => "right_",
    }
}

fn hands(mode: ArmMode) -> &'static [Hand] {
    match mode {
        ArmMode::Bimanual => &Hand::BOTH,
        ArmMode::Single => &[Hand::Right],
    }
}

/// Static feature schema for `mode`: every key and its value type
pub fn action_features(mode: ArmMode) -> Vec<(String, ActionKind)> {
    hands(mode)
        .iter()
        .flat_map(|hand| {
            let prefix = key_prefix(mode, *hand);
            HAND_ACTION_KEYS.iter().map(move |key| {
                let kind = if *key == "enabled" {
                    ActionKind::Bool
                } else {
                    ActionKind::Float
                };
                (format!("{}{}", prefix, key), kind)
            })
        })
        .collect()
}

/// Output key list for `mode`
pub fn action_keys(mode: ArmMode) -> Vec<String> {
    action_features(mode).into_iter().map(|(key, _)| key).collect()
}

/// Turns calibrated frames into [`RobotAction`]s
#[derive(Debug, Clone)]
pub struct ActionMapper {
    mode: ArmMode,
    prev_enabled: bool,
}

impl ActionMapper {
    pub fn new(mode: ArmMode) -> Self {
        Self {
            mode,
            prev_enabled: false,
        }
    }

    pub fn mode(&self) -> ArmMode {
        self.mode
    }

    pub fn features(&self) -> Vec<(String, ActionKind)> {
        action_features(self.mode)
    }

    /// Map one tick. `None` (not calibrated, no telemetry) yields the zeroed schema.
    pub fn map(&mut self, frame: Option<&CalibratedFrame>) -> RobotAction {
        let enabled = frame.map(|f| f.enabled).unwrap_or(false);
        if enabled != self.prev_enabled {
            info!("Teleoperation {}", if enabled { "enabled" } else { "disabled" });
            self.prev_enabled = enabled;
        }

        let mut action = RobotAction::new();
        for hand in hands(self.mode) {
            let prefix = key_prefix(self.mode, *hand);
            match frame {
                Some(frame) => insert_hand(&mut action, prefix, enabled, frame.hand(*hand)),
                None => insert_zeroed(&mut action, prefix),
            }
        }
        action
    }
}

fn insert_hand(action: &mut RobotAction, prefix: &str, enabled: bool, hand: &CalibratedHand) {
    let (position, rotation) = if enabled {
        (
            remap_axes(&hand.position),
            remap_axes(&hand.rotation_vector()),
        )
    } else {
        (Vector3::zeros(), Vector3::zeros())
    };

    let mut put = |key: &str, value: ActionValue| {
        action.insert(format!("{}{}", prefix, key), value);
    };
    put("enabled", ActionValue::Bool(enabled));
    put("target_x", ActionValue::Float(position.x));
    put("target_y", ActionValue::Float(position.y));
    put("target_z", ActionValue::Float(position.z));
    put("target_wx", ActionValue::Float(rotation.x));
    put("target_wy", ActionValue::Float(rotation.y));
    put("target_wz", ActionValue::Float(rotation.z));
    // Gripper stays live while disabled
    put("gripper_vel", ActionValue::Float(hand.trigger));
}

fn insert_zeroed(action: &mut RobotAction, prefix: &str) {
    for key in HAND_ACTION_KEYS {
        let value = if key == "enabled" {
            ActionValue::Bool(false)
        } else {
            ActionValue::Float(0.0)
        };
        action.insert(format!("{}{}", prefix, key), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::HeadSample;
    use nalgebra::UnitQuaternion;
    use std::f64::consts::FRAC_PI_2;

    fn hand(position: [f64; 3], trigger: f64) -> CalibratedHand {
        CalibratedHand {
            position: Vector3::from(position),
            rotation: UnitQuaternion::identity(),
            trigger,
        }
    }

    fn frame(enabled: bool, left: CalibratedHand, right: CalibratedHand) -> CalibratedFrame {
        CalibratedFrame {
            enabled,
            left,
            right,
            head: HeadSample::default(),
        }
    }

    fn float(action: &RobotAction, key: &str) -> f64 {
        action[key].as_f64().unwrap()
    }

    #[test]
    fn test_remap_fixed_points() {
        assert_eq!(
            remap_axes(&Vector3::new(0.0, 0.0, -1.0)),
            Vector3::new(1.0, 0.0, 0.0)
        );
        assert_eq!(
            remap_axes(&Vector3::new(1.0, 0.0, 0.0)),
            Vector3::new(0.0, 1.0, 0.0)
        );
        assert_eq!(
            remap_axes(&Vector3::new(0.0, 1.0, 0.0)),
            Vector3::new(0.0, 0.0, 1.0)
        );
    }

    #[test]
    fn test_enabled_frame_is_remapped() {
        let mut mapper = ActionMapper::new(ArmMode::Bimanual);
        let mut left = hand([0.0, 0.0, -0.2], 0.3);
        left.rotation = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), FRAC_PI_2);
        let right = hand([0.1, 0.05, 0.0], 0.0);

        let action = mapper.map(Some(&frame(true, left, right)));
        assert_eq!(action["left_enabled"], ActionValue::Bool(true));
        assert!((float(&action, "left_target_x") - 0.2).abs() < 1e-12);
        assert_eq!(float(&action, "left_target_y"), 0.0);
        // Rotation about VR +Y is rotation about robot +Z
        assert!((float(&action, "left_target_wz") - FRAC_PI_2).abs() < 1e-9);
        assert!(float(&action, "left_target_wx").abs() < 1e-9);
        assert_eq!(float(&action, "left_gripper_vel"), 0.3);

        assert!((float(&action, "right_target_y") - 0.1).abs() < 1e-12);
        assert!((float(&action, "right_target_z") - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_disabled_zeroes_pose_but_keeps_gripper() {
        let mut mapper = ActionMapper::new(ArmMode::Bimanual);
        let action = mapper.map(Some(&frame(
            false,
            hand([0.4, 0.5, 0.6], 0.8),
            hand([0.1, 0.2, 0.3], 0.2),
        )));

        for prefix in ["left_", "right_"] {
            assert_eq!(action[&format!("{}enabled", prefix)], ActionValue::Bool(false));
            for key in &HAND_ACTION_KEYS[1..7] {
                assert_eq!(float(&action, &format!("{}{}", prefix, key)), 0.0);
            }
        }
        assert_eq!(float(&action, "left_gripper_vel"), 0.8);
        assert_eq!(float(&action, "right_gripper_vel"), 0.2);
    }

    #[test]
    fn test_single_arm_emits_right_hand_unprefixed() {
        let mut mapper = ActionMapper::new(ArmMode::Single);
        let action = mapper.map(Some(&frame(
            true,
            hand([9.0, 9.0, 9.0], 1.0),
            hand([0.0, 0.0, -0.5], 0.4),
        )));

        assert_eq!(action.len(), HAND_ACTION_KEYS.len());
        assert!((float(&action, "target_x") - 0.5).abs() < 1e-12);
        assert_eq!(float(&action, "gripper_vel"), 0.4);
        assert!(!action.contains_key("left_enabled"));
    }

    #[test]
    fn test_no_pose_yields_zeroed_schema() {
        for mode in [ArmMode::Bimanual, ArmMode::Single] {
            let mut mapper = ActionMapper::new(mode);
            let action = mapper.map(None);
            let keys: Vec<String> = action.keys().cloned().collect();
            let mut expected = action_keys(mode);
            expected.sort();
            assert_eq!(keys, expected);
            for (key, value) in &action {
                if key.ends_with("enabled") {
                    assert_eq!(*value, ActionValue::Bool(false));
                } else {
                    assert_eq!(*value, ActionValue::Float(0.0));
                }
            }
        }
    }

    #[test]
    fn test_feature_schema() {
        let features = action_features(ArmMode::Bimanual);
        assert_eq!(features.len(), 16);
        assert_eq!(features[0], ("left_enabled".to_string(), ActionKind::Bool));
        assert_eq!(features[8], ("right_enabled".to_string(), ActionKind::Bool));
        assert_eq!(features[15], ("right_gripper_vel".to_string(), ActionKind::Float));

        assert_eq!(action_keys(ArmMode::Single)[0], "enabled");
    }

    #[test]
    fn test_action_serializes_flat() {
        let mut mapper = ActionMapper::new(ArmMode::Single);
        let json = serde_json::to_value(mapper.map(None)).unwrap();
        assert_eq!(json["enabled"], false);
        assert_eq!(json["target_x"], 0.0);
    }
}
