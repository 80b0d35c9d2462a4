use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;

use crate::SchedulerConfig;

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Status server port
    /// Env: PORT (default: 8080)
    pub port: u16,

    /// Roster file path
    /// Env: SERVERS_PATH (default: "servers.json")
    pub servers_path: String,

    /// Database file path, only opened when LOG_TO_DATABASE is set
    /// Env: DATABASE_PATH (default: "lodestone.db")
    pub database_path: String,

    /// Time between ping cycles
    /// Env: PING_INTERVAL_MS (default: 3000)
    pub ping_interval: Duration,

    /// Budget for resolving and pinging one server
    /// Env: CONNECT_TIMEOUT_MS (default: 2500)
    pub connect_timeout: Duration,

    /// Hard limit for a whole cycle
    /// Env: CYCLE_DEADLINE_MS (default: 5000)
    /// Servers still unanswered after it are reported as failed
    pub cycle_deadline: Duration,

    /// Persist one sample per server per cycle
    /// Env: LOG_TO_DATABASE (default: false)
    pub log_to_database: bool,

    /// Log every failed ping
    /// Env: LOG_FAILED_PINGS (default: true)
    pub log_failed_pings: bool,

    /// Minimum time between history graph points
    /// Env: HISTORY_INTERVAL_SECS (default: 60)
    pub history_interval: Duration,

    /// How long stored samples are kept; older ones are deleted at startup
    /// Env: GRAPH_DURATION_SECS (default: 86400)
    pub graph_duration: Duration,

    /// Base URL of the third-party status API
    /// Env: STATUS_API_URL (default: "https://mcapi.xdefcon.com/server")
    pub status_api_url: String,

    /// Request timeout for the status server in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 30)
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        let defaults = Self::default();
        Self {
            port: env_or_default("PORT", defaults.port),
            servers_path: env_or_default_string("SERVERS_PATH", &defaults.servers_path),
            database_path: env_or_default_string("DATABASE_PATH", &defaults.database_path),
            ping_interval: Duration::from_millis(env_or_default("PING_INTERVAL_MS", 3000)),
            connect_timeout: Duration::from_millis(env_or_default("CONNECT_TIMEOUT_MS", 2500)),
            cycle_deadline: Duration::from_millis(env_or_default("CYCLE_DEADLINE_MS", 5000)),
            log_to_database: env_or_default("LOG_TO_DATABASE", defaults.log_to_database),
            log_failed_pings: env_or_default("LOG_FAILED_PINGS", defaults.log_failed_pings),
            history_interval: Duration::from_secs(env_or_default("HISTORY_INTERVAL_SECS", 60)),
            graph_duration: Duration::from_secs(env_or_default("GRAPH_DURATION_SECS", 86400)),
            status_api_url: env_or_default_string("STATUS_API_URL", &defaults.status_api_url),
            request_timeout: Duration::from_secs(env_or_default("REQUEST_TIMEOUT_SECS", 30)),
        }
    }

    /// The subset of settings the scheduler and dispatcher work from
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            ping_interval: self.ping_interval,
            connect_timeout: self.connect_timeout,
            cycle_deadline: self.cycle_deadline,
            log_to_database: self.log_to_database,
            log_failed_pings: self.log_failed_pings,
        }
    }

    /// Samples taken before this unix time in milliseconds are out of retention
    pub fn retention_cutoff(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.graph_duration.as_millis() as i64)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            servers_path: "servers.json".to_string(),
            database_path: "lodestone.db".to_string(),
            ping_interval: Duration::from_millis(3000),
            connect_timeout: Duration::from_millis(2500),
            cycle_deadline: Duration::from_millis(5000),
            log_to_database: false,
            log_failed_pings: true,
            history_interval: Duration::from_secs(60),
            graph_duration: Duration::from_secs(86400),
            status_api_url: "https://mcapi.xdefcon.com/server".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}
