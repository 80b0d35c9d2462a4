pub mod aggregate;
pub mod broadcast;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod helpers;
pub mod normalize;
pub mod probe;
pub mod resolve;
pub mod roster;
mod routes;
pub mod scheduler;
pub mod store;
pub mod time;
pub mod validation;

use axum::{Router, http::StatusCode, routing::get};
use error::ConfigError;
use scheduler::Scheduler;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

/// Cycle timing and side-effect switches, handed to the scheduler and dispatcher
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between cycle triggers
    pub ping_interval: Duration,
    /// Budget for resolving and probing one server
    pub connect_timeout: Duration,
    /// Hard limit for a whole cycle; unreported servers are failed after it
    pub cycle_deadline: Duration,
    /// Persist one sample per server per cycle
    pub log_to_database: bool,
    /// Log every failed probe
    pub log_failed_pings: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(3000),
            connect_timeout: Duration::from_millis(2500),
            cycle_deadline: Duration::from_millis(5000),
            log_to_database: false,
            log_failed_pings: true,
        }
    }
}

impl SchedulerConfig {
    /// Reject settings that would stall or break the run loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_interval.is_zero() {
            return Err(ConfigError::ZeroPingInterval);
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroConnectTimeout);
        }
        // Every probe that used its full budget would be failed by the deadline
        if self.cycle_deadline < self.connect_timeout {
            return Err(ConfigError::DeadlineBelowTimeout {
                deadline_ms: self.cycle_deadline.as_millis() as u64,
                timeout_ms: self.connect_timeout.as_millis() as u64,
            });
        }
        Ok(())
    }
}

/// Create the status router for a running scheduler
pub fn create_app(scheduler: Arc<Scheduler>, request_timeout: Duration) -> Router {
    let state = Arc::new(AppState { scheduler });

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/status", get(routes::status))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
