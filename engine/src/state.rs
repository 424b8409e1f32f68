//! Persisted engine state that is not part of any single record.
//!
//! Holds the device identity, the logical clock, and the server cursor the
//! next pull resumes from.

use crate::{error::Result, DeviceId, Error, LogicalClock};
use serde::{Deserialize, Serialize};

/// Version of the state format for future compatibility.
pub const STATE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub format_version: u32,
    pub device_id: DeviceId,
    pub clock: LogicalClock,
    /// Opaque cursor returned by the last successful pull
    #[serde(default)]
    pub cursor: Option<String>,
}

impl EngineState {
    pub fn new(device_id: impl Into<DeviceId>) -> Self {
        let device_id = device_id.into();
        Self {
            format_version: STATE_FORMAT_VERSION,
            clock: LogicalClock::new(device_id.clone()),
            device_id,
            cursor: None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let state: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;

        if state.format_version > STATE_FORMAT_VERSION {
            return Err(Error::Storage(format!(
                "unsupported state format version: {} (max supported: {})",
                state.format_version, STATE_FORMAT_VERSION
            )));
        }

        Ok(state)
    }
}

/// Counts describing a recipe book, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSummary {
    pub format_version: u32,
    pub device_id: DeviceId,
    pub clock_counter: u64,
    pub record_count: usize,
    pub pending_changes: usize,
    pub conflict_count: usize,
    pub blob_count: usize,
    pub cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state() {
        let state = EngineState::new("phone-1");
        assert_eq!(state.format_version, STATE_FORMAT_VERSION);
        assert_eq!(state.clock.device_id, "phone-1");
        assert_eq!(state.clock.counter, 0);
        assert!(state.cursor.is_none());
    }

    #[test]
    fn json_roundtrip() {
        let mut state = EngineState::new("phone-1");
        state.clock.counter = 42;
        state.cursor = Some("117".into());
        let restored = EngineState::from_json(&state.to_json().unwrap()).unwrap();
        assert_eq!(state, restored);
    }

    #[test]
    fn reject_future_format_version() {
        let json = r#"{
            "formatVersion": 999,
            "deviceId": "phone-1",
            "clock": {"deviceId": "phone-1", "counter": 0}
        }"#;
        assert!(matches!(EngineState::from_json(json), Err(Error::Storage(_))));
    }

    #[test]
    fn reject_garbage() {
        assert!(matches!(
            EngineState::from_json("{not json"),
            Err(Error::Serialization(_))
        ));
    }
}
