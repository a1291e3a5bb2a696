// src/handlers/maintenance.rs

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::{error::AppError, services::sweeper, state::AppState};

#[derive(Debug, Default, Deserialize)]
pub struct SweepQuery {
    #[serde(default)]
    pub dry_run: bool,
}

/// Runs the reconciliation sweep on demand.
///
/// With `?dry_run=true` the report lists intended transitions and nothing is written.
pub async fn run_sweep(
    State(state): State<AppState>,
    Query(query): Query<SweepQuery>,
) -> Result<impl IntoResponse, AppError> {
    let report = sweeper::run_sweep(
        state.store.as_ref(),
        &state.sweep_policy,
        state.clock.now(),
        query.dry_run,
    )
    .await?;
    tracing::info!(
        dry_run = report.dry_run,
        timed_out = report.timed_out,
        abandoned = report.abandoned,
        failed = report.failed,
        "Manual sweep finished"
    );
    Ok(Json(report))
}
