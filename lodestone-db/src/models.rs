/// One stored ping result for a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
  /// Unix timestamp in milliseconds, shared by every server of the same cycle
  pub timestamp: i64,
  /// Server address as written in the roster
  pub ip: String,
  /// Normalised player count, `None` for a failed ping
  pub player_count: Option<i64>,
}

/// Highest player count ever observed for a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
  pub ip: String,
  /// Unix timestamp in milliseconds when the record was set
  pub timestamp: i64,
  pub player_count: i64,
}
