use crate::helpers::now_millis;
use std::time::Duration;

/// Timestamp shared by every server of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CyclePoint {
    /// Unix time in milliseconds
    pub timestamp_ms: i64,
    /// Whether this cycle also adds a point to the long-term history graph
    pub include_history_sample: bool,
}

/// Hands out cycle timestamps and decides which ones land on the history graph.
#[derive(Debug)]
pub struct TimeTracker {
    history_interval_ms: i64,
    history_enabled: bool,
    last_history_point: Option<i64>,
}

impl TimeTracker {
    /// History points are only produced when `history_enabled`, which follows
    /// whether samples are persisted at all.
    pub fn new(history_interval: Duration, history_enabled: bool) -> Self {
        Self {
            history_interval_ms: history_interval.as_millis() as i64,
            history_enabled,
            last_history_point: None,
        }
    }

    pub fn new_cycle_point(&mut self) -> CyclePoint {
        self.point_at(now_millis())
    }

    pub fn point_at(&mut self, timestamp_ms: i64) -> CyclePoint {
        let include_history_sample = self.history_enabled
            && self
                .last_history_point
                .is_none_or(|last| timestamp_ms - last >= self.history_interval_ms);

        if include_history_sample {
            self.last_history_point = Some(timestamp_ms);
        }

        CyclePoint {
            timestamp_ms,
            include_history_sample,
        }
    }
}

pub fn to_seconds(timestamp_ms: i64) -> i64 {
    timestamp_ms / 1000
}
