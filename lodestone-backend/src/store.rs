use async_trait::async_trait;
use lodestone_db::Database;
use tracing::info;

pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Persistence of one ping sample per server per cycle.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// `player_count` is `None` for a failed ping.
    async fn insert_sample(
        &self,
        ip: &str,
        timestamp: i64,
        player_count: Option<i64>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl SampleStore for Database {
    async fn insert_sample(
        &self,
        ip: &str,
        timestamp: i64,
        player_count: Option<i64>,
    ) -> Result<(), StoreError> {
        let new_record = Database::insert_sample(self, ip.to_string(), timestamp, player_count).await?;
        if new_record {
            info!(server = %ip, ?player_count, "new player count record");
        }
        Ok(())
    }
}
