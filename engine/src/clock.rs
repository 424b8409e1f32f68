//! Logical clock for ordering local mutations.
//!
//! Every local mutation ticks the clock, so a record's `updated_at` strictly
//! increases across edits even if the wall clock jumps backwards.

use crate::{DeviceId, Timestamp};
use serde::{Deserialize, Serialize};

/// A per-device logical clock. Persisted with the engine state so ticks
/// survive restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalClock {
    /// Identifier of the device owning this clock
    pub device_id: DeviceId,
    /// Monotonically increasing counter
    pub counter: u64,
}

impl LogicalClock {
    /// Create a new clock for a device, starting at counter 0.
    pub fn new(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            counter: 0,
        }
    }

    /// Create a clock with a specific counter value.
    pub fn with_counter(device_id: impl Into<DeviceId>, counter: u64) -> Self {
        Self {
            device_id: device_id.into(),
            counter,
        }
    }

    /// Increment the clock and return the new counter.
    pub fn tick(&mut self) -> Timestamp {
        self.counter += 1;
        self.counter
    }

    /// Advance this clock to at least `counter`.
    /// Used when a stored record carries a later timestamp than the clock.
    pub fn observe(&mut self, counter: Timestamp) {
        self.counter = self.counter.max(counter);
    }
}
