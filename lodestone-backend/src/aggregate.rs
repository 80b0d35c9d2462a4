//! Per-cycle accumulation of probe results.
//!
//! A [`CycleState`] is owned by exactly one task for its lifetime, so writes
//! are serialized by construction. Every report carries the generation it was
//! dispatched under; reports from any other generation are dropped.

use crate::dispatch::ProbeReport;
use crate::error::CycleError;
use crate::normalize::{accept_favicon, cap_player_count};
use crate::probe::ProbeOutcome;
use crate::roster::{Roster, ServerId};
use crate::time::{CyclePoint, to_seconds};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// What a subscriber learns about one server for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRecord {
    /// Normalised player count, success only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<i32>,
    /// Data URI favicon, only when valid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateRecord {
    /// Normalise a raw outcome. `host` tags any warning about bad values.
    pub fn from_outcome(host: &str, outcome: ProbeOutcome) -> Self {
        match outcome {
            ProbeOutcome::Success(report) => Self {
                online: Some(cap_player_count(host, report.players_online)),
                protocol_version: report.protocol_version,
                favicon: accept_favicon(report.favicon),
                ..Self::default()
            },
            ProbeOutcome::Failure { reason } => Self {
                failed: true,
                error: Some(reason),
                ..Self::default()
            },
        }
    }
}

/// One consolidated update per completed cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBatch {
    #[serde(skip)]
    pub generation: u64,
    /// Unix time in seconds
    pub timestamp: i64,
    #[serde(skip)]
    pub timestamp_ms: i64,
    pub include_history_sample: bool,
    pub updates: BTreeMap<ServerId, UpdateRecord>,
}

impl UpdateBatch {
    pub fn failed_count(&self) -> usize {
        self.updates.values().filter(|record| record.failed).count()
    }
}

/// Result of recording one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Pending { remaining: usize },
    Complete,
    /// Report belonged to another generation and was dropped
    Stale,
}

/// Outcomes collected so far for the running cycle.
#[derive(Debug)]
pub struct CycleState {
    generation: u64,
    point: CyclePoint,
    roster: Arc<Roster>,
    results: HashMap<ServerId, ProbeOutcome>,
}

impl CycleState {
    pub fn new(generation: u64, point: CyclePoint, roster: Arc<Roster>) -> Self {
        let capacity = roster.len();
        Self {
            generation,
            point,
            roster,
            results: HashMap::with_capacity(capacity),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn reported(&self) -> usize {
        self.results.len()
    }

    pub fn is_complete(&self) -> bool {
        self.results.len() == self.roster.len()
    }

    /// Servers that have not reported yet, in roster order.
    pub fn missing(&self) -> Vec<ServerId> {
        self.roster
            .iter()
            .map(|registration| registration.id)
            .filter(|id| !self.results.contains_key(id))
            .collect()
    }

    /// Store a report. Each server may report once per generation.
    pub fn record(&mut self, report: ProbeReport) -> Result<Recorded, CycleError> {
        if report.generation != self.generation {
            debug!(
                active = self.generation,
                stale = report.generation,
                server = %report.server_id,
                "discarding result from another cycle"
            );
            return Ok(Recorded::Stale);
        }

        if self.roster.get(report.server_id).is_none() {
            return Err(CycleError::UnknownServer {
                generation: self.generation,
                server: report.server_id,
            });
        }

        match self.results.entry(report.server_id) {
            Entry::Occupied(_) => {
                return Err(CycleError::DuplicateOutcome {
                    generation: self.generation,
                    server: report.server_id,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(report.outcome);
            }
        }

        if self.is_complete() {
            Ok(Recorded::Complete)
        } else {
            Ok(Recorded::Pending {
                remaining: self.roster.len() - self.results.len(),
            })
        }
    }

    /// Build the batch. Every roster entry gets exactly one record.
    pub fn finish(mut self) -> UpdateBatch {
        let mut updates = BTreeMap::new();
        for registration in self.roster.iter() {
            let outcome = self
                .results
                .remove(&registration.id)
                .unwrap_or_else(|| ProbeOutcome::failure("no result reported"));
            updates.insert(
                registration.id,
                UpdateRecord::from_outcome(&registration.ip, outcome),
            );
        }

        UpdateBatch {
            generation: self.generation,
            timestamp: to_seconds(self.point.timestamp_ms),
            timestamp_ms: self.point.timestamp_ms,
            include_history_sample: self.point.include_history_sample,
            updates,
        }
    }

    /// Force-complete the cycle, failing every server still unreported.
    pub fn expire(mut self, reason: &str) -> UpdateBatch {
        for id in self.missing() {
            self.results.insert(id, ProbeOutcome::failure(reason));
        }
        self.finish()
    }
}
