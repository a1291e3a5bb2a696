// src/handlers/attempt.rs

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::attempt::{
        BeginAttemptRequest, ResultQuery, StartAttemptRequest, SubmitAttemptRequest, SubmitResponse,
    },
    services::attempt::{self, results_available_at},
    state::AppState,
};

/// Starts an attempt now and returns the questions in the shuffled order captured for it.
pub async fn start_attempt(
    State(state): State<AppState>,
    Json(payload): Json<StartAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let started = attempt::start(state.store.as_ref(), &payload, true, state.clock.now()).await?;
    Ok((StatusCode::CREATED, Json(started)))
}

/// Creates the attempt row without starting the clock.
pub async fn prepare_attempt(
    State(state): State<AppState>,
    Json(payload): Json<StartAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let prepared = attempt::start(state.store.as_ref(), &payload, false, state.clock.now()).await?;
    Ok((StatusCode::CREATED, Json(prepared)))
}

pub async fn begin_attempt(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<BeginAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let begun = attempt::begin(state.store.as_ref(), id, payload.student_id, state.clock.now())
        .await?
        .into_applied()?;
    Ok(Json(begun))
}

/// Submits answers. A submit that loses to a timeout answers 409 `already_finalized`.
pub async fn submit_attempt(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<SubmitAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    let completed = attempt::submit(
        state.store.as_ref(),
        id,
        payload.student_id,
        payload.answers,
        state.clock.now(),
    )
    .await?
    .into_applied()?;

    let quiz = state
        .store
        .get_quiz(completed.quiz_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Quiz {} not found", completed.quiz_id)))?;

    Ok(Json(SubmitResponse {
        attempt_id: completed.id,
        status: completed.status,
        results_available_at: results_available_at(&completed, quiz.duration),
    }))
}

/// Attempt status, or the scored result once the disclosure gate has passed.
pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ResultQuery>,
) -> Result<impl IntoResponse, AppError> {
    let view = attempt::result(state.store.as_ref(), id, query.student_id, state.clock.now()).await?;
    Ok(Json(view))
}
