//! Session performance counters

use std::time::Duration;

use serde::Serialize;

/// Read-only snapshot of a session's counters
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SessionMetrics {
    /// Checkpoints created in this session
    pub checkpoints_created: u64,

    /// Rollbacks performed (user-initiated and orchestrator step 3)
    pub rollbacks: u64,

    /// Successful fallback recoveries in `safe_execute`
    pub recoveries: u64,

    /// Branches created with `branch()` (`main` is not counted)
    pub branches_created: u64,

    /// Exceptions observed by the orchestrator
    pub errors_caught: u64,

    /// Estimated time saved: elapsed between a pre-attempt checkpoint and
    /// the restore to it, summed across orchestrated recoveries
    #[serde(serialize_with = "serialize_secs")]
    pub time_saved: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_time_saved_as_seconds() {
        let metrics = SessionMetrics {
            checkpoints_created: 3,
            time_saved: Duration::from_millis(1500),
            ..Default::default()
        };
        let value = serde_json::to_value(&metrics).unwrap();
        assert_eq!(value["checkpoints_created"], 3);
        assert_eq!(value["time_saved"], 1.5);
    }
}
