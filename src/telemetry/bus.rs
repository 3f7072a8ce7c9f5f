//! Latest-wins store for controller telemetry
//!
//! Written from data channel callbacks on the network runtime, read from the
//! control loop thread. The lock is only held across the copy or the replace.

use parking_lot::Mutex;

use super::types::{ControllerState, ControllerStateUpdate};

/// Shared controller state bus
#[derive(Debug, Default)]
pub struct SharedStateBus {
    state: Mutex<ControllerState>,
}

impl SharedStateBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every key present in `update`; absent keys keep their value
    pub fn merge(&self, update: ControllerStateUpdate) {
        let mut state = self.state.lock();
        if let Some(left) = update.left {
            state.left = Some(left);
        }
        if let Some(right) = update.right {
            state.right = Some(right);
        }
        if let Some(head) = update.head {
            state.head = Some(head);
        }
        state.updates = state.updates.wrapping_add(1);
    }

    /// Consistent copy of the current state
    pub fn snapshot(&self) -> ControllerState {
        self.state.lock().clone()
    }

    /// Drop all telemetry (used when the teleoperator reconnects)
    pub fn clear(&self) {
        *self.state.lock() = ControllerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::types::{ControllerSample, HeadSample};
    use std::sync::Arc;

    fn sample(value: f64) -> ControllerSample {
        ControllerSample {
            position: [value, value, value],
            orientation: [0.0, 0.0, 0.0, 1.0],
            trigger: value,
            grip: value,
        }
    }

    #[test]
    fn test_merge_replaces_by_key() {
        let bus = SharedStateBus::new();
        bus.merge(ControllerStateUpdate {
            left: Some(sample(1.0)),
            right: Some(sample(2.0)),
            head: None,
        });
        bus.merge(ControllerStateUpdate {
            left: Some(sample(3.0)),
            ..Default::default()
        });

        let snapshot = bus.snapshot();
        assert_eq!(snapshot.left, Some(sample(3.0)));
        assert_eq!(snapshot.right, Some(sample(2.0)));
        assert_eq!(snapshot.head, None);
        assert_eq!(snapshot.updates, 2);
    }

    #[test]
    fn test_merge_never_field_merges() {
        let bus = SharedStateBus::new();
        bus.merge(ControllerStateUpdate {
            left: Some(sample(1.0)),
            ..Default::default()
        });
        // A partial hand object arrives with only grip; the stale position must not survive
        let partial: ControllerStateUpdate =
            serde_json::from_str(r#"{"left": {"grip": 0.9}}"#).unwrap();
        bus.merge(partial);

        let left = bus.snapshot().left.unwrap();
        assert_eq!(left.position, [0.0, 0.0, 0.0]);
        assert_eq!(left.trigger, 0.0);
        assert_eq!(left.grip, 0.9);
    }

    #[test]
    fn test_empty_until_first_merge() {
        let bus = SharedStateBus::new();
        assert!(bus.snapshot().is_empty());
        bus.merge(ControllerStateUpdate {
            head: Some(HeadSample::default()),
            ..Default::default()
        });
        assert!(!bus.snapshot().is_empty());
        bus.clear();
        assert!(bus.snapshot().is_empty());
    }

    #[test]
    fn test_concurrent_snapshots_are_never_torn() {
        let bus = Arc::new(SharedStateBus::new());
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let bus = bus.clone();
                std::thread::spawn(move || {
                    for i in 0..2_000 {
                        let v = (w * 10_000 + i) as f64;
                        bus.merge(ControllerStateUpdate {
                            left: Some(sample(v)),
                            right: Some(sample(v)),
                            head: None,
                        });
                    }
                })
            })
            .collect();

        let reader = {
            let bus = bus.clone();
            std::thread::spawn(move || {
                for _ in 0..5_000 {
                    let snapshot = bus.snapshot();
                    if let (Some(left), Some(right)) = (snapshot.left, snapshot.right) {
                        // Both hands always come from the same merge
                        assert_eq!(left, right);
                        assert!(left.position.iter().all(|p| *p == left.trigger));
                    }
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(bus.snapshot().updates, 8_000);
    }
}
