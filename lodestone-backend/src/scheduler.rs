//! Cycle controller.
//!
//! At most one cycle runs at a time. The active generation is kept in an
//! atomic slot (0 means idle); a trigger that finds the slot taken is dropped,
//! never queued.

use crate::SchedulerConfig;
use crate::aggregate::{CycleState, Recorded, UpdateBatch};
use crate::broadcast::{Broadcaster, Message};
use crate::dispatch::{Dispatcher, ProbeReport};
use crate::error::{CycleError, DispatchError, SchedulerError};
use crate::roster::Roster;
use crate::store::SampleStore;
use crate::time::TimeTracker;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

const IDLE: u64 = 0;
/// Slot value while a trigger is drawing its generation
const CLAIMED: u64 = u64::MAX;

/// Reason attached to servers failed by the cycle deadline.
pub const DEADLINE_REASON: &str = "cycle deadline exceeded";

/// Result of asking for a new cycle.
#[derive(Debug)]
pub enum Trigger {
    Started(CycleHandle),
    /// Another cycle is still running; this trigger was dropped
    Rejected { active_generation: u64 },
}

/// Completion of one accepted cycle.
#[derive(Debug)]
pub struct CycleHandle {
    generation: u64,
    task: JoinHandle<Result<Arc<UpdateBatch>, CycleError>>,
}

impl CycleHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Future for CycleHandle {
    type Output = Result<Arc<UpdateBatch>, CycleError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let generation = self.generation;
        Pin::new(&mut self.task).poll(cx).map(|joined| {
            joined.unwrap_or_else(|err| {
                Err(CycleError::Aborted {
                    generation,
                    reason: err.to_string(),
                })
            })
        })
    }
}

/// Counters exposed on the status endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleStats {
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub cycles_expired: u64,
    pub triggers_rejected: u64,
    pub stale_reports: u64,
}

#[derive(Debug, Default)]
struct Counters {
    cycles_started: AtomicU64,
    cycles_completed: AtomicU64,
    cycles_expired: AtomicU64,
    triggers_rejected: AtomicU64,
    stale_reports: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CycleStats {
        CycleStats {
            cycles_started: self.cycles_started.load(Ordering::Relaxed),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            cycles_expired: self.cycles_expired.load(Ordering::Relaxed),
            triggers_rejected: self.triggers_rejected.load(Ordering::Relaxed),
            stale_reports: self.stale_reports.load(Ordering::Relaxed),
        }
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    roster: Arc<Roster>,
    dispatcher: Dispatcher,
    time: Mutex<TimeTracker>,
    broadcaster: Arc<dyn Broadcaster>,
    store: Option<Arc<dyn SampleStore>>,
    /// Last generation handed out
    generation: AtomicU64,
    /// Generation of the running cycle, or IDLE
    active: AtomicU64,
    reports_tx: mpsc::UnboundedSender<ProbeReport>,
    reports_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ProbeReport>>,
    tasks: TaskTracker,
    latest: RwLock<Option<Arc<UpdateBatch>>>,
    counters: Counters,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        roster: Arc<Roster>,
        dispatcher: Dispatcher,
        time: TimeTracker,
        broadcaster: Arc<dyn Broadcaster>,
        store: Option<Arc<dyn SampleStore>>,
    ) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        Self {
            config,
            roster,
            dispatcher,
            time: Mutex::new(time),
            broadcaster,
            store,
            generation: AtomicU64::new(0),
            active: AtomicU64::new(IDLE),
            reports_tx,
            reports_rx: tokio::sync::Mutex::new(reports_rx),
            tasks: TaskTracker::new(),
            latest: RwLock::new(None),
            counters: Counters::default(),
        }
    }

    /// Last generation handed out, 0 before the first cycle.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire) != IDLE
    }

    pub fn latest_batch(&self) -> Option<Arc<UpdateBatch>> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stats(&self) -> CycleStats {
        self.counters.snapshot()
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    /// Start a cycle unless one is already running.
    ///
    /// Only an unsupported server family is an error; it means the roster is
    /// broken and no later cycle could succeed either.
    pub fn trigger_cycle(self: &Arc<Self>) -> Result<Trigger, DispatchError> {
        // Claim the slot before taking a generation so two triggers can never
        // draw the same one.
        if let Err(observed) =
            self.active
                .compare_exchange(IDLE, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
        {
            let active_generation = if observed == CLAIMED {
                self.generation()
            } else {
                observed
            };
            Counters::bump(&self.counters.triggers_rejected);
            warn!(
                active_generation,
                "started re-pinging servers before the last cycle finished, consider raising PING_INTERVAL_MS"
            );
            return Ok(Trigger::Rejected { active_generation });
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.active.store(generation, Ordering::Release);

        let point = self
            .time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .new_cycle_point();
        let state = CycleState::new(generation, point, Arc::clone(&self.roster));

        if let Err(err) = self
            .dispatcher
            .dispatch(&self.roster, generation, &self.reports_tx)
        {
            self.active.store(IDLE, Ordering::Release);
            error!(generation, %err, "refusing to dispatch cycle");
            return Err(err);
        }

        Counters::bump(&self.counters.cycles_started);
        debug!(generation, servers = self.roster.len(), "cycle started");

        // Tracked so shutdown also waits for the cycle and the writes it spawns
        let scheduler = Arc::clone(self);
        let task = self
            .tasks
            .spawn(async move { scheduler.drive_cycle(state).await });
        Ok(Trigger::Started(CycleHandle { generation, task }))
    }

    async fn drive_cycle(self: Arc<Self>, state: CycleState) -> Result<Arc<UpdateBatch>, CycleError> {
        let generation = state.generation();
        match self.collect(state).await {
            Ok(batch) => {
                let batch = Arc::new(batch);
                self.complete(&batch);
                Ok(batch)
            }
            Err(err) => {
                error!(generation, %err, "cycle aborted");
                self.active.store(IDLE, Ordering::Release);
                Err(err)
            }
        }
    }

    /// Drain reports until every server answered or the deadline passed.
    async fn collect(&self, mut state: CycleState) -> Result<UpdateBatch, CycleError> {
        let mut reports = self.reports_rx.lock().await;
        let deadline = sleep(self.config.cycle_deadline);
        tokio::pin!(deadline);

        while !state.is_complete() {
            tokio::select! {
                report = reports.recv() => {
                    // The sender lives as long as the scheduler
                    let Some(report) = report else { break };
                    if state.record(report)? == Recorded::Stale {
                        Counters::bump(&self.counters.stale_reports);
                    }
                }
                _ = &mut deadline => {
                    Counters::bump(&self.counters.cycles_expired);
                    warn!(
                        generation = state.generation(),
                        missing = state.missing().len(),
                        "cycle deadline reached, failing servers that did not answer"
                    );
                    return Ok(state.expire(DEADLINE_REASON));
                }
            }
        }

        Ok(state.finish())
    }

    /// Hand the batch to subscribers and storage, then go idle.
    fn complete(&self, batch: &Arc<UpdateBatch>) {
        if self.config.log_to_database {
            if let Some(store) = &self.store {
                for (id, record) in &batch.updates {
                    let Some(registration) = self.roster.get(*id) else {
                        continue;
                    };
                    let store = Arc::clone(store);
                    let ip = registration.ip.clone();
                    let timestamp = batch.timestamp_ms;
                    let player_count = record.online;
                    self.tasks.spawn(async move {
                        if let Err(err) = store.insert_sample(&ip, timestamp, player_count).await {
                            error!(server = %ip, %err, "failed to store ping sample");
                        }
                    });
                }
            }
        }

        self.broadcaster.publish(Message::UpdateServers(batch));
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(batch));
        Counters::bump(&self.counters.cycles_completed);

        debug!(
            generation = batch.generation,
            servers = batch.updates.len(),
            failed = batch.failed_count(),
            "cycle complete"
        );
        self.active.store(IDLE, Ordering::Release);
    }

    /// Trigger a cycle now and then on every interval tick until cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), SchedulerError> {
        self.config.validate()?;
        let mut ticker = interval(self.config.ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<CycleHandle> = None;

        info!(
            servers = self.roster.len(),
            interval_ms = self.config.ping_interval.as_millis() as u64,
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("scheduler stopping");
                    if let Some(handle) = in_flight.take() {
                        let generation = handle.generation();
                        if let Err(err) = handle.await {
                            error!(generation, %err, "cycle failed during shutdown");
                        }
                    }
                    return Ok(());
                }
                result = wait_for(&mut in_flight) => {
                    in_flight = None;
                    result?;
                }
                _ = ticker.tick() => {
                    if let Trigger::Started(handle) = self.trigger_cycle()? {
                        // A new cycle only starts once the previous one went idle,
                        // so its task is finished or about to be.
                        if let Some(previous) = in_flight.replace(handle) {
                            previous.await?;
                        }
                    }
                }
            }
        }
    }

    /// Wait for the running cycle, if any, and every storage write it started.
    pub async fn shutdown(&self) {
        self.tasks.close();
        if !self.tasks.is_empty() {
            info!(pending = self.tasks.len(), "waiting for the last cycle and sample writes to finish");
        }
        self.tasks.wait().await;
    }
}

async fn wait_for(in_flight: &mut Option<CycleHandle>) -> Result<Arc<UpdateBatch>, CycleError> {
    match in_flight {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
