//! Fan-out of one probe per registered server.

use crate::SchedulerConfig;
use crate::error::{DispatchError, ProbeError};
use crate::probe::{ProbeOutcome, ProbeRequest, ProbeSet, StatusProbe};
use crate::resolve::Resolver;
use crate::roster::{Roster, ServerId, ServerRegistration};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::timeout;
use tracing::{debug, error};

/// A probe result tagged with the cycle generation it was issued under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub generation: u64,
    pub server_id: ServerId,
    pub outcome: ProbeOutcome,
}

#[derive(Clone)]
pub struct Dispatcher {
    probes: ProbeSet,
    resolver: Arc<dyn Resolver>,
    connect_timeout: Duration,
    log_failed_pings: bool,
}

impl Dispatcher {
    pub fn new(probes: ProbeSet, resolver: Arc<dyn Resolver>, config: &SchedulerConfig) -> Self {
        Self {
            probes,
            resolver,
            connect_timeout: config.connect_timeout,
            log_failed_pings: config.log_failed_pings,
        }
    }

    /// Launch one probe task per server. Every task sends exactly one report.
    ///
    /// Strategies are picked for the whole roster before anything is spawned,
    /// so an unsupported family aborts the cycle with no probe in flight.
    pub fn dispatch(
        &self,
        roster: &Roster,
        generation: u64,
        reports: &UnboundedSender<ProbeReport>,
    ) -> Result<usize, DispatchError> {
        let plan = roster
            .iter()
            .map(|registration| {
                let (strategy, probe) = self.probes.select(registration)?;
                Ok((Arc::clone(registration), strategy, probe))
            })
            .collect::<Result<Vec<_>, DispatchError>>()?;

        let count = plan.len();
        for (registration, strategy, probe) in plan {
            let protocol_version = registration
                .next_protocol_version()
                .map(|version| version.protocol_id)
                .unwrap_or(0);
            let resolver = Arc::clone(&self.resolver);
            let reports = reports.clone();
            let budget = self.connect_timeout;
            let log_failed_pings = self.log_failed_pings;

            tokio::spawn(async move {
                let outcome = probe_server(
                    resolver.as_ref(),
                    probe.as_ref(),
                    &registration,
                    budget,
                    protocol_version,
                )
                .await;

                if let ProbeOutcome::Failure { reason } = &outcome {
                    if log_failed_pings {
                        error!(server = %registration.ip, %strategy, %reason, "failed to ping server");
                    }
                }

                let report = ProbeReport {
                    generation,
                    server_id: registration.id,
                    outcome,
                };
                if reports.send(report).is_err() {
                    debug!(generation, server = %registration.ip, "report channel closed, dropping result");
                }
            });
        }

        debug!(generation, servers = count, "dispatched probes");
        Ok(count)
    }
}

/// Resolve then query one server. Never fails; errors become a failed outcome.
async fn probe_server(
    resolver: &dyn Resolver,
    probe: &dyn StatusProbe,
    registration: &ServerRegistration,
    budget: Duration,
    protocol_version: i32,
) -> ProbeOutcome {
    let timed_out = |limit: Duration| ProbeError::Timeout(limit.as_millis() as u64);

    let address = match timeout(budget, resolver.resolve(registration, budget)).await {
        Ok(Ok(address)) => address,
        Ok(Err(err)) => return ProbeOutcome::failure(err.to_string()),
        Err(_) => return ProbeOutcome::failure(timed_out(budget).to_string()),
    };

    let remaining = address.remaining.min(budget);
    let request = ProbeRequest {
        host: address.host,
        port: address.port,
        timeout: remaining,
        protocol_version,
    };

    match timeout(remaining, probe.query(request)).await {
        Ok(result) => result.into(),
        Err(_) => ProbeOutcome::failure(timed_out(remaining).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::StatusReport;
    use crate::resolve::ResolvedAddress;
    use crate::roster::ProtocolVersion;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Resolves every server to itself instantly.
    struct PassthroughResolver;

    #[async_trait]
    impl Resolver for PassthroughResolver {
        async fn resolve(
            &self,
            registration: &ServerRegistration,
            budget: Duration,
        ) -> Result<ResolvedAddress, ProbeError> {
            if registration.ip.starts_with("unresolvable") {
                return Err(ProbeError::Resolve {
                    host: registration.ip.clone(),
                    reason: "NXDOMAIN".to_string(),
                });
            }
            Ok(ResolvedAddress {
                host: registration.ip.clone(),
                port: registration.port.unwrap_or(25565),
                remaining: budget,
            })
        }
    }

    /// Reports the host length as player count and remembers requests.
    #[derive(Default)]
    struct EchoProbe {
        requests: Mutex<Vec<ProbeRequest>>,
    }

    #[async_trait]
    impl StatusProbe for EchoProbe {
        async fn query(&self, request: ProbeRequest) -> Result<StatusReport, ProbeError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(StatusReport {
                players_online: request.host.len() as i64,
                protocol_version: Some(request.protocol_version),
                favicon: None,
            })
        }
    }

    /// Never answers.
    struct HangingProbe;

    #[async_trait]
    impl StatusProbe for HangingProbe {
        async fn query(&self, _request: ProbeRequest) -> Result<StatusReport, ProbeError> {
            std::future::pending().await
        }
    }

    fn dispatcher(java: Arc<dyn StatusProbe>, bedrock: Arc<dyn StatusProbe>) -> Dispatcher {
        let config = SchedulerConfig {
            connect_timeout: Duration::from_millis(200),
            ..SchedulerConfig::default()
        };
        Dispatcher::new(
            ProbeSet::new(java.clone(), java, bedrock),
            Arc::new(PassthroughResolver),
            &config,
        )
    }

    async fn collect(
        rx: &mut mpsc::UnboundedReceiver<ProbeReport>,
        count: usize,
    ) -> Vec<ProbeReport> {
        let mut reports = Vec::with_capacity(count);
        for _ in 0..count {
            reports.push(rx.recv().await.unwrap());
        }
        reports.sort_by_key(|report| report.server_id);
        reports
    }

    #[tokio::test]
    async fn test_one_report_per_server() {
        let echo = Arc::new(EchoProbe::default());
        let dispatcher = dispatcher(echo.clone(), echo.clone());
        let roster = Roster::new(vec![
            ServerRegistration::new(ServerId(0), "A", "a.example.net", "PC"),
            ServerRegistration::new(ServerId(1), "B", "bb.example.net", "PE"),
            ServerRegistration::new(ServerId(2), "C", "unresolvable.example.net", "PC"),
        ])
        .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let dispatched = dispatcher.dispatch(&roster, 7, &tx).unwrap();
        assert_eq!(dispatched, 3);

        let reports = collect(&mut rx, 3).await;
        assert!(reports.iter().all(|report| report.generation == 7));
        assert_eq!(
            reports[0].outcome,
            ProbeOutcome::Success(StatusReport {
                players_online: 13,
                protocol_version: Some(0),
                favicon: None,
            })
        );
        assert!(reports[1].outcome.is_success());
        assert_eq!(
            reports[2].outcome,
            ProbeOutcome::failure("failed to resolve unresolvable.example.net: NXDOMAIN")
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_hanging_probe_times_out() {
        let dispatcher = dispatcher(Arc::new(HangingProbe), Arc::new(HangingProbe));
        let roster =
            Roster::new(vec![ServerRegistration::new(ServerId(0), "A", "a.example.net", "PC")])
                .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        dispatcher.dispatch(&roster, 1, &tx).unwrap();
        let report = rx.recv().await.unwrap();
        assert_eq!(report.outcome, ProbeOutcome::failure("timed out after 200ms"));
    }

    #[tokio::test]
    async fn test_protocol_version_advances_each_cycle() {
        let echo = Arc::new(EchoProbe::default());
        let dispatcher = dispatcher(echo.clone(), echo.clone());
        let versions = vec![
            ProtocolVersion {
                protocol_id: 47,
                name: "1.8".to_string(),
            },
            ProtocolVersion {
                protocol_id: 767,
                name: "1.21.1".to_string(),
            },
        ];
        let roster = Roster::new(vec![
            ServerRegistration::new(ServerId(0), "A", "a.example.net", "PC")
                .with_protocol_versions(versions),
        ])
        .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for generation in 1..=3 {
            dispatcher.dispatch(&roster, generation, &tx).unwrap();
            rx.recv().await.unwrap();
        }

        let advertised: Vec<i32> = echo
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.protocol_version)
            .collect();
        assert_eq!(advertised, vec![47, 767, 47]);
    }

    #[tokio::test]
    async fn test_unsupported_type_spawns_nothing() {
        let echo = Arc::new(EchoProbe::default());
        let dispatcher = dispatcher(echo.clone(), echo.clone());
        let roster = Roster::new(vec![
            ServerRegistration::new(ServerId(0), "A", "a.example.net", "PC"),
            ServerRegistration::new(ServerId(1), "Odd", "odd.example.net", "XBOX"),
        ])
        .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = dispatcher.dispatch(&roster, 1, &tx);
        assert!(matches!(
            result,
            Err(DispatchError::UnsupportedEdition { server: ServerId(1), .. })
        ));

        drop(tx);
        assert!(rx.recv().await.is_none());
        assert!(echo.requests.lock().unwrap().is_empty());
    }
}
