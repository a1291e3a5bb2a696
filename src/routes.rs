// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{attempt, enrollment, maintenance, quiz},
    state::AppState,
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (quizzes, enrollments, students, attempts, maintenance).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (store, clock, converter).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    let quiz_routes = Router::new()
        .route("/", post(quiz::create_quiz))
        .route("/{id}", get(quiz::get_quiz))
        .route("/{id}/schedule", put(quiz::schedule_quiz))
        .route("/{id}/publish", post(quiz::publish_quiz))
        .route("/{id}/archive", post(quiz::archive_quiz))
        .route("/{id}/questions", post(quiz::add_question));

    let enrollment_routes = Router::new()
        .route("/", post(enrollment::enroll))
        .route("/history", get(enrollment::history))
        .route("/{id}", get(enrollment::get_enrollment))
        .route("/{id}/reassign", post(enrollment::reassign))
        .route("/{id}/cancel", post(enrollment::cancel));

    let student_routes = Router::new()
        .route(
            "/{student_id}/quizzes/{quiz_id}/availability",
            get(enrollment::availability),
        )
        .route("/{student_id}/assignments", get(enrollment::assignments));

    let attempt_routes = Router::new()
        .route("/", post(attempt::start_attempt))
        .route("/prepare", post(attempt::prepare_attempt))
        .route("/{id}/begin", post(attempt::begin_attempt))
        .route("/{id}/submit", post(attempt::submit_attempt))
        .route("/{id}/result", get(attempt::get_result));

    let maintenance_routes = Router::new().route("/sweep", post(maintenance::run_sweep));

    Router::new()
        .nest("/api/quizzes", quiz_routes)
        .nest("/api/enrollments", enrollment_routes)
        .nest("/api/students", student_routes)
        .nest("/api/attempts", attempt_routes)
        .nest("/api/maintenance", maintenance_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
