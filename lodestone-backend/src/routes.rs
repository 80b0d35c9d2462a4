use crate::AppState;
use crate::aggregate::UpdateBatch;
use crate::scheduler::CycleStats;

use axum::{Json, extract::State};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusResponse {
    generation: u64,
    running: bool,
    servers: usize,
    stats: CycleStats,
    latest: Option<UpdateBatch>,
}

pub(crate) async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let scheduler = &state.scheduler;

    Json(StatusResponse {
        generation: scheduler.generation(),
        running: scheduler.is_running(),
        servers: scheduler.roster().len(),
        stats: scheduler.stats(),
        latest: scheduler.latest_batch().map(|batch| (*batch).clone()),
    })
}
