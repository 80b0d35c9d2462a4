use anyhow::Context;
use lodestone_backend::broadcast::ChannelBroadcaster;
use lodestone_backend::config::Config;
use lodestone_backend::create_app;
use lodestone_backend::dispatch::Dispatcher;
use lodestone_backend::helpers::now_millis;
use lodestone_backend::probe::{ApiStatusProbe, ProbeSet, ProbeStrategy, UnavailableProbe};
use lodestone_backend::resolve::SystemResolver;
use lodestone_backend::roster::Roster;
use lodestone_backend::scheduler::Scheduler;
use lodestone_backend::store::SampleStore;
use lodestone_backend::time::TimeTracker;
use lodestone_db::Database;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = tracing::Level::DEBUG;
    #[cfg(not(debug_assertions))]
    let log_level = tracing::Level::INFO;

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting Lodestone ping server...");

    let config = Config::from_env();
    tracing::info!(
        "Configuration: port={}, servers={}, interval={}ms, timeout={}ms, deadline={}ms, log_to_database={}",
        config.port,
        config.servers_path,
        config.ping_interval.as_millis(),
        config.connect_timeout.as_millis(),
        config.cycle_deadline.as_millis(),
        config.log_to_database
    );

    let roster = Roster::load(&config.servers_path)
        .with_context(|| format!("failed to load roster from {}", config.servers_path))?;
    tracing::info!("Loaded {} servers", roster.len());

    let store: Option<Arc<dyn SampleStore>> = if config.log_to_database {
        let db = Database::open(&config.database_path)
            .await
            .with_context(|| format!("failed to open database {}", config.database_path))?;
        tracing::info!("Logging samples to {}", config.database_path);

        let cutoff = config.retention_cutoff(now_millis());
        let deleted = db
            .cleanup_samples_before(cutoff)
            .await
            .context("failed to clean up old samples")?;
        tracing::info!("Removed {} samples older than {}s", deleted, config.graph_duration.as_secs());

        Some(Arc::new(db))
    } else {
        None
    };

    // Only the HTTP status API ships with this build
    let probes = ProbeSet::new(
        Arc::new(UnavailableProbe::new(ProbeStrategy::JavaStatus)),
        Arc::new(ApiStatusProbe::new(config.status_api_url.clone())),
        Arc::new(UnavailableProbe::new(ProbeStrategy::BedrockPing)),
    );
    let unavailable = roster.iter().filter(|server| !server.api).count();
    if unavailable > 0 {
        tracing::warn!(
            "{} servers are not marked \"api\" and have no protocol driver; they will report as failed",
            unavailable
        );
    }

    let scheduler_config = config.scheduler_config();
    scheduler_config
        .validate()
        .context("invalid scheduler configuration")?;
    let dispatcher = Dispatcher::new(probes, Arc::new(SystemResolver), &scheduler_config);
    let time = TimeTracker::new(config.history_interval, config.log_to_database);
    let broadcaster = Arc::new(ChannelBroadcaster::new(64));
    let scheduler = Arc::new(Scheduler::new(
        scheduler_config,
        Arc::new(roster),
        dispatcher,
        time,
        broadcaster,
        store,
    ));

    let app = create_app(Arc::clone(&scheduler), config.request_timeout);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Status server listening on {}", addr);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
            }
            shutdown.cancel();
        });
    }

    let result = tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(shutdown.clone().cancelled_owned()) => {
            result.context("status server error")
        }
        result = Arc::clone(&scheduler).run(shutdown.clone()) => {
            result.context("scheduler stopped")
        }
    };

    shutdown.cancel();
    scheduler.shutdown().await;
    tracing::info!("Shut down");
    result
}
