use crate::roster::ServerId;
use thiserror::Error;

/// Why a single probe produced no status.
///
/// These never leave a cycle as errors; they end up as the failure reason
/// of the server's update record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
  #[error("failed to resolve {host}: {reason}")]
  Resolve { host: String, reason: String },

  #[error("timed out after {0}ms")]
  Timeout(u64),

  #[error("server reported itself offline")]
  Offline,

  #[error("malformed status response: {0}")]
  Malformed(String),

  #[error("status request failed: {0}")]
  Request(String),

  #[error("{0}")]
  Unavailable(String),
}

/// Roster problems found while dispatching a cycle. Always fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
  #[error("server {server} ({ip}) has unsupported type {kind:?}")]
  UnsupportedEdition {
    server: ServerId,
    ip: String,
    kind: String,
  },
}

/// Broken cycle invariants. Always fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CycleError {
  #[error("server {server} reported twice in cycle {generation}")]
  DuplicateOutcome { generation: u64, server: ServerId },

  #[error("server {server} reported in cycle {generation} but is not in the roster")]
  UnknownServer { generation: u64, server: ServerId },

  #[error("cycle {generation} task failed: {reason}")]
  Aborted { generation: u64, reason: String },
}

/// Scheduler settings the run loop cannot work with.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
  #[error("ping interval must be greater than zero")]
  ZeroPingInterval,

  #[error("connect timeout must be greater than zero")]
  ZeroConnectTimeout,

  #[error("cycle deadline ({deadline_ms}ms) is shorter than the connect timeout ({timeout_ms}ms)")]
  DeadlineBelowTimeout { deadline_ms: u64, timeout_ms: u64 },
}

/// Everything that stops the scheduler loop.
#[derive(Debug, Error)]
pub enum SchedulerError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Dispatch(#[from] DispatchError),

  #[error(transparent)]
  Cycle(#[from] CycleError),
}
