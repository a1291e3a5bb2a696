// src/handlers/enrollment.rs

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    error::AppError,
    models::enrollment::{EnrollRequest, HistoryQuery, ReassignRequest},
    services::enrollment,
    state::AppState,
};

pub async fn enroll(
    State(state): State<AppState>,
    Json(payload): Json<EnrollRequest>,
) -> Result<impl IntoResponse, AppError> {
    let created = enrollment::enroll(
        state.store.as_ref(),
        payload.quiz_id,
        payload.student_id,
        state.clock.now(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Reassigns the quiz under a new enrollment exempt from the 24-hour expiry.
pub async fn reassign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ReassignRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let created = enrollment::reassign(state.store.as_ref(), id, &payload.reason, state.clock.now()).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let cancelled = enrollment::cancel(state.store.as_ref(), id, state.clock.now()).await?;
    Ok(Json(cancelled))
}

/// One enrollment with its label and computed state.
pub async fn get_enrollment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let view = enrollment::describe(state.store.as_ref(), id, state.clock.now()).await?;
    Ok(Json(view))
}

/// Enrollment history for one student and quiz, newest first.
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let views = enrollment::history(
        state.store.as_ref(),
        query.quiz_id,
        query.student_id,
        state.clock.now(),
    )
    .await?;
    Ok(Json(views))
}

/// "Is quiz X available to student Y right now".
pub async fn availability(
    State(state): State<AppState>,
    Path((student_id, quiz_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    let res = enrollment::availability(state.store.as_ref(), quiz_id, student_id, state.clock.now()).await?;
    Ok(Json(res))
}

/// Learner dashboard listing.
pub async fn assignments(
    State(state): State<AppState>,
    Path(student_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let views = enrollment::assignments(state.store.as_ref(), student_id, state.clock.now()).await?;
    Ok(Json(views))
}
