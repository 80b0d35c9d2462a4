//! Status probes: one timeout-bounded query against one server.
//!
//! Each game server family gets its own [`StatusProbe`] implementation and
//! [`ProbeSet`] picks one per registration. Wire protocol drivers live outside
//! this crate; the third-party HTTP status API is implemented here.

use crate::error::{DispatchError, ProbeError};
use crate::roster::{Edition, ServerRegistration};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub host: String,
    pub port: u16,
    /// Budget left after address resolution
    pub timeout: Duration,
    /// Protocol version to advertise, 0 when there is none
    pub protocol_version: i32,
}

/// Raw status as reported by a server, before normalisation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub players_online: i64,
    pub protocol_version: Option<i32>,
    pub favicon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success(StatusReport),
    Failure { reason: String },
}

impl ProbeOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        ProbeOutcome::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success(_))
    }
}

impl From<Result<StatusReport, ProbeError>> for ProbeOutcome {
    fn from(result: Result<StatusReport, ProbeError>) -> Self {
        match result {
            Ok(report) => ProbeOutcome::Success(report),
            Err(err) => ProbeOutcome::failure(err.to_string()),
        }
    }
}

/// A status query for one family of servers.
///
/// Implementations must return within `request.timeout`.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn query(&self, request: ProbeRequest) -> Result<StatusReport, ProbeError>;
}

/// Which probe a registration is pinged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeStrategy {
    /// Direct status handshake with a Java server
    JavaStatus,
    /// Third-party HTTP status API for a Java server
    JavaApi,
    /// Connectionless ping of a Bedrock server
    BedrockPing,
}

impl ProbeStrategy {
    pub fn for_server(edition: Edition, api: bool) -> Self {
        match (edition, api) {
            (Edition::Java, false) => ProbeStrategy::JavaStatus,
            (Edition::Java, true) => ProbeStrategy::JavaApi,
            // Bedrock has no API fallback
            (Edition::Bedrock, _) => ProbeStrategy::BedrockPing,
        }
    }
}

impl fmt::Display for ProbeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProbeStrategy::JavaStatus => "java-status",
            ProbeStrategy::JavaApi => "java-api",
            ProbeStrategy::BedrockPing => "bedrock-ping",
        };
        f.write_str(name)
    }
}

/// One probe per strategy.
#[derive(Clone)]
pub struct ProbeSet {
    java_status: Arc<dyn StatusProbe>,
    java_api: Arc<dyn StatusProbe>,
    bedrock_ping: Arc<dyn StatusProbe>,
}

impl ProbeSet {
    pub fn new(
        java_status: Arc<dyn StatusProbe>,
        java_api: Arc<dyn StatusProbe>,
        bedrock_ping: Arc<dyn StatusProbe>,
    ) -> Self {
        Self {
            java_status,
            java_api,
            bedrock_ping,
        }
    }

    pub fn get(&self, strategy: ProbeStrategy) -> Arc<dyn StatusProbe> {
        match strategy {
            ProbeStrategy::JavaStatus => Arc::clone(&self.java_status),
            ProbeStrategy::JavaApi => Arc::clone(&self.java_api),
            ProbeStrategy::BedrockPing => Arc::clone(&self.bedrock_ping),
        }
    }

    /// Pick the probe for a registration. Fails on an unsupported family.
    pub fn select(
        &self,
        registration: &ServerRegistration,
    ) -> Result<(ProbeStrategy, Arc<dyn StatusProbe>), DispatchError> {
        let strategy = ProbeStrategy::for_server(registration.edition()?, registration.api);
        Ok((strategy, self.get(strategy)))
    }
}

/// Stand-in for a wire protocol driver that is not linked into this build.
#[derive(Debug, Clone, Copy)]
pub struct UnavailableProbe {
    strategy: ProbeStrategy,
}

impl UnavailableProbe {
    pub fn new(strategy: ProbeStrategy) -> Self {
        Self { strategy }
    }
}

#[async_trait]
impl StatusProbe for UnavailableProbe {
    async fn query(&self, _request: ProbeRequest) -> Result<StatusReport, ProbeError> {
        Err(ProbeError::Unavailable(format!(
            "no {} driver configured",
            self.strategy
        )))
    }
}

/// Java status lookup through a third-party HTTP API.
///
/// Requests `GET {base_url}/{host}:{port}/full/json`.
#[derive(Debug, Clone)]
pub struct ApiStatusProbe {
    client: reqwest::Client,
    base_url: String,
}

impl ApiStatusProbe {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, host: &str, port: u16) -> String {
        format!("{}/{}:{}/full/json", self.base_url, host, port)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiStatusResponse {
    server_status: Option<String>,
    players: Option<Value>,
    protocol: Option<Value>,
    icon: Option<String>,
}

#[async_trait]
impl StatusProbe for ApiStatusProbe {
    async fn query(&self, request: ProbeRequest) -> Result<StatusReport, ProbeError> {
        let timeout_ms = request.timeout.as_millis() as u64;
        let request_error = |err: reqwest::Error| {
            if err.is_timeout() {
                ProbeError::Timeout(timeout_ms)
            } else {
                ProbeError::Request(err.to_string())
            }
        };

        let response = self
            .client
            .get(self.url_for(&request.host, request.port))
            .timeout(request.timeout)
            .send()
            .await
            .map_err(request_error)?
            .error_for_status()
            .map_err(request_error)?;

        let body: Value = response.json().await.map_err(request_error)?;
        parse_api_status(body)
    }
}

/// Turn an API response body into a status report.
fn parse_api_status(body: Value) -> Result<StatusReport, ProbeError> {
    let response: ApiStatusResponse =
        serde_json::from_value(body).map_err(|err| ProbeError::Malformed(err.to_string()))?;

    if response.server_status.as_deref() == Some("offline") {
        return Err(ProbeError::Offline);
    }

    let players_online = response
        .players
        .as_ref()
        .and_then(parse_int)
        .ok_or_else(|| ProbeError::Malformed("missing or invalid player count".to_string()))?;

    // Reported as "v47" or 47
    let protocol_version = response.protocol.as_ref().and_then(|protocol| match protocol {
        Value::String(text) => text.trim_start_matches('v').trim().parse().ok(),
        other => parse_int(other).and_then(|value| i32::try_from(value).ok()),
    });

    Ok(StatusReport {
        players_online,
        protocol_version,
        favicon: response.icon,
    })
}

fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::ServerId;
    use serde_json::json;

    #[test]
    fn test_strategy_selection() {
        assert_eq!(
            ProbeStrategy::for_server(Edition::Java, false),
            ProbeStrategy::JavaStatus
        );
        assert_eq!(
            ProbeStrategy::for_server(Edition::Java, true),
            ProbeStrategy::JavaApi
        );
        assert_eq!(
            ProbeStrategy::for_server(Edition::Bedrock, true),
            ProbeStrategy::BedrockPing
        );
    }

    #[test]
    fn test_select_rejects_unsupported_type() {
        let unavailable = Arc::new(UnavailableProbe::new(ProbeStrategy::JavaStatus));
        let probes = ProbeSet::new(unavailable.clone(), unavailable.clone(), unavailable);
        let server = ServerRegistration::new(ServerId(4), "Odd", "odd.example.net", "XBOX");

        assert!(matches!(
            probes.select(&server),
            Err(DispatchError::UnsupportedEdition { server: ServerId(4), .. })
        ));
    }

    #[tokio::test]
    async fn test_unavailable_probe_fails() {
        let probe = UnavailableProbe::new(ProbeStrategy::BedrockPing);
        let result = probe
            .query(ProbeRequest {
                host: "127.0.0.1".to_string(),
                port: 19132,
                timeout: Duration::from_millis(100),
                protocol_version: 0,
            })
            .await;
        assert_eq!(
            result,
            Err(ProbeError::Unavailable(
                "no bedrock-ping driver configured".to_string()
            ))
        );
    }

    #[test]
    fn test_api_url() {
        let probe = ApiStatusProbe::new("https://status.example.com/server/");
        assert_eq!(
            probe.url_for("1.2.3.4", 25565),
            "https://status.example.com/server/1.2.3.4:25565/full/json"
        );
    }

    #[test]
    fn test_parse_online_response() {
        let report = parse_api_status(json!({
            "serverStatus": "online",
            "players": 1234,
            "protocol": "v47",
            "icon": "data:image/png;base64,AAAA"
        }))
        .unwrap();
        assert_eq!(
            report,
            StatusReport {
                players_online: 1234,
                protocol_version: Some(47),
                favicon: Some("data:image/png;base64,AAAA".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_numeric_strings_and_missing_protocol() {
        let report = parse_api_status(json!({
            "serverStatus": "online",
            "players": "-3"
        }))
        .unwrap();
        // Normalisation happens later, raw values pass through
        assert_eq!(report.players_online, -3);
        assert_eq!(report.protocol_version, None);
        assert_eq!(report.favicon, None);
    }

    #[test]
    fn test_parse_offline_response() {
        assert_eq!(
            parse_api_status(json!({ "serverStatus": "offline" })),
            Err(ProbeError::Offline)
        );
    }

    #[test]
    fn test_parse_missing_players() {
        assert!(matches!(
            parse_api_status(json!({ "serverStatus": "online", "players": "lots" })),
            Err(ProbeError::Malformed(_))
        ));
        assert!(matches!(
            parse_api_status(json!([1, 2, 3])),
            Err(ProbeError::Malformed(_))
        ));
    }

    #[test]
    fn test_outcome_from_result() {
        let outcome = ProbeOutcome::from(Err::<StatusReport, _>(ProbeError::Timeout(2500)));
        assert_eq!(outcome, ProbeOutcome::failure("timed out after 2500ms"));
        assert!(!outcome.is_success());
        assert!(ProbeOutcome::from(Ok::<_, ProbeError>(StatusReport::default())).is_success());
    }
}
