use crate::error::ProbeError;
use crate::roster::{Edition, ServerRegistration};
use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::time::{Instant, timeout};

/// Where to send a probe, and how much of its budget is left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub host: String,
    pub port: u16,
    pub remaining: Duration,
}

/// Resolves a registration's effective address before it is probed.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(
        &self,
        registration: &ServerRegistration,
        budget: Duration,
    ) -> Result<ResolvedAddress, ProbeError>;
}

/// Resolver backed by the system's A/AAAA lookup.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(
        &self,
        registration: &ServerRegistration,
        budget: Duration,
    ) -> Result<ResolvedAddress, ProbeError> {
        let port = registration.port_or_default(registration.edition().unwrap_or(Edition::Java));

        if registration.ip.parse::<IpAddr>().is_ok() {
            return Ok(ResolvedAddress {
                host: registration.ip.clone(),
                port,
                remaining: budget,
            });
        }

        let started = Instant::now();
        let mut addresses = timeout(budget, lookup_host((registration.ip.as_str(), port)))
            .await
            .map_err(|_| ProbeError::Timeout(budget.as_millis() as u64))?
            .map_err(|err| ProbeError::Resolve {
                host: registration.ip.clone(),
                reason: err.to_string(),
            })?;

        let address = addresses.next().ok_or_else(|| ProbeError::Resolve {
            host: registration.ip.clone(),
            reason: "no addresses returned".to_string(),
        })?;

        Ok(ResolvedAddress {
            host: address.ip().to_string(),
            port: address.port(),
            remaining: budget.saturating_sub(started.elapsed()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::ServerId;

    #[tokio::test]
    async fn test_literal_ip_keeps_full_budget() {
        let server = ServerRegistration::new(ServerId(0), "Local", "127.0.0.1", "PC");
        let resolved = SystemResolver
            .resolve(&server, Duration::from_millis(2500))
            .await
            .unwrap();
        assert_eq!(
            resolved,
            ResolvedAddress {
                host: "127.0.0.1".to_string(),
                port: 25565,
                remaining: Duration::from_millis(2500),
            }
        );
    }

    #[tokio::test]
    async fn test_bedrock_default_port() {
        let server = ServerRegistration::new(ServerId(0), "Local", "::1", "PE");
        let resolved = SystemResolver
            .resolve(&server, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(resolved.port, 19132);
    }

    #[tokio::test]
    async fn test_localhost_lookup_within_budget() {
        let server = ServerRegistration::new(ServerId(0), "Local", "localhost", "PC").with_port(25570);
        let budget = Duration::from_secs(5);
        let resolved = SystemResolver.resolve(&server, budget).await.unwrap();
        assert_eq!(resolved.port, 25570);
        assert!(resolved.remaining <= budget);
        assert!(resolved.host.parse::<IpAddr>().is_ok());
    }
}
