//! Calibration of raw headset poses against a reference pose
//!
//! Entry calibration waits until both grips are held, then captures for each
//! hand the raw position and the inverse of the raw orientation. After that,
//! every tick recomputes the enabled flag (both grips held) and re-captures
//! only the reference position on its rising edge. The reference rotation is
//! never re-captured, so the robot frame stays fixed while the operator can
//! re-zero position by releasing and re-gripping.

use nalgebra::{UnitQuaternion, Vector3};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::telemetry::{ControllerState, Hand, HeadSample, SharedStateBus};

/// Default polling interval of entry calibration
pub const CALIBRATION_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Reference pose of one hand
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandReference {
    pub position: Vector3<f64>,
    pub inverse_rotation: UnitQuaternion<f64>,
}

/// One hand's pose relative to its reference
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibratedHand {
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    /// Raw trigger value, used as the gripper command
    pub trigger: f64,
}

impl CalibratedHand {
    /// Axis-angle rotation vector (axis scaled by angle in radians)
    pub fn rotation_vector(&self) -> Vector3<f64> {
        self.rotation.scaled_axis()
    }
}

/// Output of one calibration tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibratedFrame {
    pub enabled: bool,
    pub left: CalibratedHand,
    pub right: CalibratedHand,
    /// Raw, uncalibrated head pose
    pub head: HeadSample,
}

impl CalibratedFrame {
    pub fn hand(&self, hand: Hand) -> &CalibratedHand {
        match hand {
            Hand::Left => &self.left,
            Hand::Right => &self.right,
        }
    }
}

/// Capture counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalibrationStats {
    /// Rising edges of the enabled flag that re-captured reference positions
    pub position_recaptures: u64,
    /// Times the reference rotation was captured
    pub rotation_captures: u64,
}

#[derive(Debug, Clone, Copy)]
struct References {
    left: HandReference,
    right: HandReference,
}

impl References {
    fn hand_mut(&mut self, hand: Hand) -> &mut HandReference {
        match hand {
            Hand::Left => &mut self.left,
            Hand::Right => &mut self.right,
        }
    }

    fn hand(&self, hand: Hand) -> &HandReference {
        match hand {
            Hand::Left => &self.left,
            Hand::Right => &self.right,
        }
    }
}

/// Calibration state machine
#[derive(Debug, Clone)]
pub struct Calibrator {
    position_scale: f64,
    references: Option<References>,
    enabled: bool,
    stats: CalibrationStats,
}

impl Calibrator {
    pub fn new(position_scale: f64) -> Self {
        Self {
            position_scale,
            references: None,
            enabled: false,
            stats: CalibrationStats::default(),
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.references.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn stats(&self) -> CalibrationStats {
        self.stats
    }

    pub fn reference(&self, hand: Hand) -> Option<HandReference> {
        self.references.map(|refs| *refs.hand(hand))
    }

    /// Forget all references
    pub fn reset(&mut self) {
        self.references = None;
        self.enabled = false;
        self.stats = CalibrationStats::default();
    }

    /// Calibrate from `snapshot` if both grips are held. Returns true on capture.
    ///
    /// On an already calibrated machine this re-captures positions only.
    pub fn try_calibrate(&mut self, snapshot: &ControllerState) -> bool {
        if snapshot.is_empty() || !snapshot.both_gripped() {
            return false;
        }

        match self.references.as_mut() {
            Some(refs) => {
                for hand in Hand::BOTH {
                    refs.hand_mut(hand).position = snapshot.hand_or_default(hand).position_vector();
                }
                self.stats.position_recaptures += 1;
                info!("Reference positions re-captured; rotation kept");
            }
            None => {
                let capture = |hand: Hand| {
                    let sample = snapshot.hand_or_default(hand);
                    HandReference {
                        position: sample.position_vector(),
                        inverse_rotation: sample.rotation().inverse(),
                    }
                };
                self.references = Some(References {
                    left: capture(Hand::Left),
                    right: capture(Hand::Right),
                });
                self.stats.rotation_captures += 1;
                info!("Calibrated against current controller pose");
            }
        }
        self.enabled = false;
        true
    }

    /// Block the calling thread until both grips are held, then calibrate.
    ///
    /// Polls `bus` every `poll`. Never gives up on its own: only `cancel` or
    /// the optional `deadline` end the wait early.
    pub fn calibrate_blocking(
        &mut self,
        bus: &SharedStateBus,
        poll: Duration,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let started = Instant::now();
        info!("Waiting for calibration: hold both grips");
        loop {
            if cancel.is_cancelled() {
                return Err(AppError::CalibrationCancelled(
                    "cancelled while waiting for both grips".to_string(),
                ));
            }
            if self.try_calibrate(&bus.snapshot()) {
                debug!("Calibration wait took {:?}", started.elapsed());
                return Ok(());
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(AppError::CalibrationTimeout(started.elapsed()));
                }
            }
            std::thread::sleep(poll);
        }
    }

    /// Advance one control tick.
    ///
    /// Returns `None` until calibrated, and while no telemetry has ever
    /// arrived.
    pub fn tick(&mut self, snapshot: &ControllerState) -> Option<CalibratedFrame> {
        let refs = self.references.as_mut()?;
        if snapshot.is_empty() {
            return None;
        }

        let enabled = snapshot.both_gripped();
        if enabled && !self.enabled {
            for hand in Hand::BOTH {
                refs.hand_mut(hand).position = snapshot.hand_or_default(hand).position_vector();
            }
            self.stats.position_recaptures += 1;
            debug!("Enabled; reference positions re-captured");
        }
        self.enabled = enabled;

        let refs = *refs;
        let scale = self.position_scale;
        let calibrate = |hand: Hand| {
            let sample = snapshot.hand_or_default(hand);
            let reference = refs.hand(hand);
            CalibratedHand {
                position: reference
                    .inverse_rotation
                    .transform_vector(&(sample.position_vector() - reference.position))
                    * scale,
                rotation: reference.inverse_rotation * sample.rotation(),
                trigger: sample.trigger,
            }
        };

        Some(CalibratedFrame {
            enabled,
            left: calibrate(Hand::Left),
            right: calibrate(Hand::Right),
            head: snapshot.head_or_default(),
        })
    }
}
