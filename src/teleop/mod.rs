//! Calibration, action mapping and the teleoperator facade

pub mod action;
pub mod calibration;
pub mod teleoperator;

pub use action::{
    action_features, action_keys, remap_axes, ActionKind, ActionMapper, ActionValue, RobotAction,
    HAND_ACTION_KEYS,
};
pub use calibration::{
    CalibratedFrame, CalibratedHand, CalibrationStats, Calibrator, HandReference,
    CALIBRATION_POLL_INTERVAL,
};
pub use teleoperator::VrTeleoperator;
