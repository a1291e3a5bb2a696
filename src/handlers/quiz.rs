// src/handlers/quiz.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::{
        question::CreateQuestionRequest,
        quiz::{CreateQuizRequest, PublishQuizRequest, ScheduleQuizRequest},
    },
    services::quiz,
    state::AppState,
};

/// Creates a quiz under the legacy or deferred scheduling regime.
///
/// * Legacy: `startTime` (local wall clock) and `timezone` are required and must be
///   at least 5 minutes ahead.
/// * Deferred: created without a start time.
pub async fn create_quiz(
    State(state): State<AppState>,
    Json(payload): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    let created = quiz::create(state.store.as_ref(), &state.converter, payload, state.clock.now()).await?;
    Ok((StatusCode::CREATED, Json(quiz::render(&state.converter, created))))
}

/// Fetches a quiz with its effective window.
pub async fn get_quiz(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let found = quiz::get(state.store.as_ref(), id).await?;
    Ok(Json(quiz::render(&state.converter, found)))
}

/// Supplies the start time of a deferred quiz.
pub async fn schedule_quiz(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ScheduleQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    let scheduled = quiz::schedule(
        state.store.as_ref(),
        &state.converter,
        id,
        &payload,
        state.clock.now(),
    )
    .await?;
    Ok(Json(quiz::render(&state.converter, scheduled)))
}

/// Publishes a quiz. The body is optional.
pub async fn publish_quiz(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    payload: Option<Json<PublishQuizRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let req = payload.map(|Json(p)| p).unwrap_or_default();
    let published = quiz::publish(state.store.as_ref(), &state.converter, id, req, state.clock.now()).await?;
    Ok(Json(quiz::render(&state.converter, published)))
}

pub async fn archive_quiz(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let archived = quiz::archive(state.store.as_ref(), id, state.clock.now()).await?;
    Ok(Json(quiz::render(&state.converter, archived)))
}

pub async fn add_question(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let question = quiz::add_question(state.store.as_ref(), id, payload).await?;
    Ok((StatusCode::CREATED, Json(question)))
}
