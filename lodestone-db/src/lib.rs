mod error;
mod models;

pub use error::{DbError, Result};
pub use models::{PlayerRecord, Sample};

use std::path::Path;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{self, OptionalExtension, params};
use tracing::{debug, info};

/// Database wrapper for ping samples and player count records.
#[derive(Clone)]
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create a database at the given path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path).await.map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Create an in-memory database (useful for testing).
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .await
      .map_err(DbError::Sqlite)?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Initialize the database schema.
  async fn initialize(&self) -> Result<()> {
    self.conn
            .call(|conn| {
                // Enable WAL mode for better concurrent read/write performance
                conn.pragma_update(None, "journal_mode", "WAL")?;

                conn.execute_batch(
                    r#"
                    -- One row per server per cycle, NULL player_count for a failed ping
                    CREATE TABLE IF NOT EXISTS pings (
                        timestamp INTEGER NOT NULL,
                        ip TEXT NOT NULL,
                        player_count INTEGER
                    );

                    -- Peak player count per server
                    CREATE TABLE IF NOT EXISTS players_record (
                        ip TEXT PRIMARY KEY,
                        timestamp INTEGER NOT NULL,
                        player_count INTEGER NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_pings_ip_timestamp ON pings(ip, timestamp);
                    "#,
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await?;

    info!("database initialized");
    Ok(())
  }

  // ========================================================================
  // Samples
  // ========================================================================

  /// Store one ping sample.
  /// A successful sample also raises the server's record when it beats it.
  /// Returns true if a new record was set.
  pub async fn insert_sample(
    &self,
    ip: String,
    timestamp: i64,
    player_count: Option<i64>,
  ) -> Result<bool> {
    if let Some(count) = player_count.filter(|count| *count < 0) {
      return Err(DbError::NegativePlayerCount(count));
    }

    let new_record = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        tx.prepare_cached("INSERT INTO pings (timestamp, ip, player_count) VALUES (?1, ?2, ?3)")?
          .execute(params![timestamp, &ip, player_count])?;

        let raised = match player_count {
          Some(count) => tx
            .prepare_cached(
              r#"
              INSERT INTO players_record (ip, timestamp, player_count) VALUES (?1, ?2, ?3)
              ON CONFLICT(ip) DO UPDATE SET
                  timestamp = excluded.timestamp,
                  player_count = excluded.player_count
              WHERE excluded.player_count > players_record.player_count
              "#,
            )?
            .execute(params![&ip, timestamp, count])?,
          None => 0,
        };

        tx.commit()?;
        Ok::<_, rusqlite::Error>(raised > 0)
      })
      .await?;

    if new_record {
      debug!(timestamp, ?player_count, "new player count record");
    }

    Ok(new_record)
  }

  /// Get every sample for a server at or after `since`, oldest first.
  pub async fn get_samples_since(&self, ip: String, since: i64) -> Result<Vec<Sample>> {
    let samples = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "SELECT timestamp, ip, player_count FROM pings WHERE ip = ?1 AND timestamp >= ?2 ORDER BY timestamp",
          )?
          .query_map(params![&ip, since], |row| {
            Ok(Sample {
              timestamp: row.get(0)?,
              ip: row.get(1)?,
              player_count: row.get(2)?,
            })
          })?
          .collect::<std::result::Result<Vec<Sample>, _>>()
      })
      .await?;

    Ok(samples)
  }

  /// Get the record for a server.
  /// Returns None if the server never had a successful ping.
  pub async fn get_record(&self, ip: String) -> Result<Option<PlayerRecord>> {
    let record = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "SELECT ip, timestamp, player_count FROM players_record WHERE ip = ?1",
          )?
          .query_row(params![&ip], |row| {
            Ok(PlayerRecord {
              ip: row.get(0)?,
              timestamp: row.get(1)?,
              player_count: row.get(2)?,
            })
          })
          .optional()
      })
      .await?;

    Ok(record)
  }

  /// Delete samples older than `cutoff`. Records are kept.
  pub async fn cleanup_samples_before(&self, cutoff: i64) -> Result<u64> {
    let deleted = self
      .conn
      .call(move |conn| {
        let deleted = conn
          .prepare_cached("DELETE FROM pings WHERE timestamp < ?1")?
          .execute(params![cutoff])?;
        Ok::<_, rusqlite::Error>(deleted as u64)
      })
      .await?;

    if deleted > 0 {
      debug!(deleted, cutoff, "cleaned up old samples");
    }

    Ok(deleted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn now() -> i64 {
    1700000000000 // Fixed timestamp for testing
  }

  #[tokio::test]
  async fn test_sample_lifecycle() {
    let db = Database::open_in_memory().await.unwrap();

    db.insert_sample("mc.example.com".to_string(), now(), Some(42))
      .await
      .unwrap();
    db.insert_sample("mc.example.com".to_string(), now() + 3000, None)
      .await
      .unwrap();
    db.insert_sample("other.example.com".to_string(), now(), Some(7))
      .await
      .unwrap();

    let samples = db
      .get_samples_since("mc.example.com".to_string(), now())
      .await
      .unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].player_count, Some(42));
    assert_eq!(samples[1].player_count, None);
    assert_eq!(samples[1].timestamp, now() + 3000);

    // Only the later sample is in range
    let samples = db
      .get_samples_since("mc.example.com".to_string(), now() + 1)
      .await
      .unwrap();
    assert_eq!(samples.len(), 1);
  }

  #[tokio::test]
  async fn test_record_only_rises() {
    let db = Database::open_in_memory().await.unwrap();
    let ip = "mc.example.com".to_string();

    assert!(db.get_record(ip.clone()).await.unwrap().is_none());

    assert!(db.insert_sample(ip.clone(), now(), Some(10)).await.unwrap());
    assert!(!db.insert_sample(ip.clone(), now() + 1, Some(5)).await.unwrap());
    assert!(!db.insert_sample(ip.clone(), now() + 2, None).await.unwrap());
    assert!(db.insert_sample(ip.clone(), now() + 3, Some(11)).await.unwrap());

    let record = db.get_record(ip).await.unwrap().unwrap();
    assert_eq!(record.player_count, 11);
    assert_eq!(record.timestamp, now() + 3);
  }

  #[tokio::test]
  async fn test_failed_ping_sets_no_record() {
    let db = Database::open_in_memory().await.unwrap();

    assert!(!db.insert_sample("down.example.com".to_string(), now(), None).await.unwrap());
    assert!(
      db.get_record("down.example.com".to_string())
        .await
        .unwrap()
        .is_none()
    );
  }

  #[tokio::test]
  async fn test_negative_count_rejected() {
    let db = Database::open_in_memory().await.unwrap();

    let result = db
      .insert_sample("mc.example.com".to_string(), now(), Some(-1))
      .await;
    assert!(matches!(result, Err(DbError::NegativePlayerCount(-1))));
  }

  #[tokio::test]
  async fn test_cleanup_samples_before() {
    let db = Database::open_in_memory().await.unwrap();
    let ip = "mc.example.com".to_string();

    db.insert_sample(ip.clone(), now() - 10_000, Some(1)).await.unwrap();
    db.insert_sample(ip.clone(), now() - 5_000, Some(2)).await.unwrap();
    db.insert_sample(ip.clone(), now(), Some(3)).await.unwrap();

    let deleted = db.cleanup_samples_before(now() - 5_000).await.unwrap();
    assert_eq!(deleted, 1);

    let samples = db.get_samples_since(ip.clone(), 0).await.unwrap();
    assert_eq!(samples.len(), 2);

    // Record survives cleanup
    let record = db.get_record(ip).await.unwrap().unwrap();
    assert_eq!(record.player_count, 3);
  }
}
