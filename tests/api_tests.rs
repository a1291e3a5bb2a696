// tests/api_tests.rs

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use quizwindow::{
    config::Config,
    routes,
    state::AppState,
    store::MemoryStore,
    utils::clock::FixedClock,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

fn test_config() -> Config {
    Config {
        database_url: None,
        rust_log: "error".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        default_timezone: "UTC".to_string(),
        sweep_interval_secs: 0,
        sweep_absolute_ceiling_minutes: 240,
        answer_retention_days: 7,
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 3, 8, 0, 0).unwrap()
}

fn test_state(clock: Arc<FixedClock>) -> AppState {
    AppState::new(Arc::new(MemoryStore::new()), clock, test_config())
}

/// Helper function to spawn the app on a random port for testing.
/// Returns the base URL and the clock driving it.
async fn spawn_app() -> (String, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(t0()));
    let app = routes::create_router(test_state(clock.clone()));

    // Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (address, clock)
}

async fn post_json(client: &reqwest::Client, url: String, body: Value) -> (u16, Value) {
    let response = client
        .post(url)
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request");
    let status = response.status().as_u16();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

async fn get_json(client: &reqwest::Client, url: String) -> (u16, Value) {
    let response = client.get(url).send().await.expect("Failed to execute request");
    let status = response.status().as_u16();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

/// Creates a published legacy quiz starting at `start` (UTC wall clock) with two questions.
/// Returns the quiz id and the question ids.
async fn published_legacy_quiz(
    client: &reqwest::Client,
    address: &str,
    start: &str,
    duration: i32,
) -> (i64, Vec<i64>) {
    let (status, quiz) = post_json(
        client,
        format!("{}/api/quizzes", address),
        json!({
            "educatorId": 1,
            "title": "Cell Biology",
            "schedulingStatus": "legacy",
            "startTime": start,
            "timezone": "UTC",
            "duration": duration
        }),
    )
    .await;
    assert_eq!(status, 201, "{quiz}");
    let quiz_id = quiz["id"].as_i64().unwrap();

    let mut question_ids = Vec::new();
    for (content, answer) in [("Powerhouse of the cell?", "Mitochondria"), ("Site of photosynthesis?", "Chloroplast")] {
        let (status, q) = post_json(
            client,
            format!("{}/api/quizzes/{}/questions", address, quiz_id),
            json!({
                "content": content,
                "options": ["Mitochondria", "Chloroplast", "Ribosome"],
                "answer": answer
            }),
        )
        .await;
        assert_eq!(status, 201, "{q}");
        question_ids.push(q["id"].as_i64().unwrap());
    }

    let (status, published) = post_json(
        client,
        format!("{}/api/quizzes/{}/publish", address, quiz_id),
        json!({}),
    )
    .await;
    assert_eq!(status, 200, "{published}");
    assert_eq!(published["status"], "published");

    (quiz_id, question_ids)
}

async fn enroll(client: &reqwest::Client, address: &str, quiz_id: i64, student_id: i64) -> i64 {
    let (status, body) = post_json(
        client,
        format!("{}/api/enrollments", address),
        json!({ "quizId": quiz_id, "studentId": student_id }),
    )
    .await;
    assert_eq!(status, 201, "{body}");
    body["id"].as_i64().unwrap()
}

#[tokio::test]
async fn health_check_404() {
    let (address, _clock) = spawn_app().await;
    let client = reqwest::Client::new();

    let response = client
        .get(&format!("{}/random_path_that_does_not_exist", address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn legacy_quiz_rejects_start_inside_lead_time() {
    let (address, _clock) = spawn_app().await;
    let client = reqwest::Client::new();

    // 3 minutes ahead of the clock
    let (status, body) = post_json(
        &client,
        format!("{}/api/quizzes", address),
        json!({
            "educatorId": 1,
            "title": "Too soon",
            "schedulingStatus": "legacy",
            "startTime": "2025-09-03T08:03",
            "timezone": "UTC",
            "duration": 30
        }),
    )
    .await;
    assert_eq!(status, 400, "{body}");

    // Legacy without a start time is also refused
    let (status, _) = post_json(
        &client,
        format!("{}/api/quizzes", address),
        json!({
            "educatorId": 1,
            "title": "Missing",
            "schedulingStatus": "legacy",
            "duration": 30
        }),
    )
    .await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn deferred_quiz_flow() {
    let (address, clock) = spawn_app().await;
    let client = reqwest::Client::new();

    let (status, quiz) = post_json(
        &client,
        format!("{}/api/quizzes", address),
        json!({
            "educatorId": 1,
            "title": "Genetics",
            "schedulingStatus": "deferred",
            "duration": 45
        }),
    )
    .await;
    assert_eq!(status, 201, "{quiz}");
    assert!(quiz["startTime"].is_null());
    let quiz_id = quiz["id"].as_i64().unwrap();

    let (status, _) = post_json(
        &client,
        format!("{}/api/quizzes/{}/questions", address, quiz_id),
        json!({ "content": "Base pairs with adenine?", "options": ["Thymine", "Guanine"], "answer": "Thymine" }),
    )
    .await;
    assert_eq!(status, 201);

    // Publishing an unscheduled deferred quiz is refused
    let (status, _) = post_json(
        &client,
        format!("{}/api/quizzes/{}/publish", address, quiz_id),
        json!({}),
    )
    .await;
    assert_eq!(status, 400);

    let response = client
        .put(format!("{}/api/quizzes/{}/schedule", address, quiz_id))
        .json(&json!({ "startTime": "2025-09-03T14:00", "timezone": "Europe/Berlin" }))
        .send()
        .await
        .expect("Failed to execute request");
    let status = response.status().as_u16();
    let scheduled: Value = response.json().await.unwrap();
    assert_eq!(status, 200, "{scheduled}");
    assert_eq!(scheduled["startTime"], "2025-09-03T12:00:00Z");
    assert_eq!(scheduled["localStartTime"], "2025-09-03T14:00");
    assert_eq!(scheduled["windowClosesAt"], "2025-09-03T12:45:00Z");

    let (status, _) = post_json(
        &client,
        format!("{}/api/quizzes/{}/publish", address, quiz_id),
        json!({}),
    )
    .await;
    assert_eq!(status, 200);

    enroll(&client, &address, quiz_id, 42).await;

    let availability_url = format!("{}/api/students/42/quizzes/{}/availability", address, quiz_id);
    let (_, before) = get_json(&client, availability_url.clone()).await;
    assert_eq!(before["isAvailable"], false);
    assert_eq!(before["reason"], "not_yet_open");

    clock.set(Utc.with_ymd_and_hms(2025, 9, 3, 12, 10, 0).unwrap());
    let (_, during) = get_json(&client, availability_url.clone()).await;
    assert_eq!(during["isAvailable"], true, "{during}");

    // Window closed for an original enrollment
    clock.set(Utc.with_ymd_and_hms(2025, 9, 3, 12, 45, 0).unwrap());
    let (_, after) = get_json(&client, availability_url).await;
    assert_eq!(after["isAvailable"], false);
    assert_eq!(after["reason"], "expired");
}

#[tokio::test]
async fn attempt_submit_and_result_disclosure() {
    let (address, clock) = spawn_app().await;
    let client = reqwest::Client::new();
    let (quiz_id, question_ids) = published_legacy_quiz(&client, &address, "2025-09-03T09:00", 30).await;
    enroll(&client, &address, quiz_id, 7).await;

    clock.set(Utc.with_ymd_and_hms(2025, 9, 3, 9, 5, 0).unwrap());
    let (status, started) = post_json(
        &client,
        format!("{}/api/attempts", address),
        json!({ "quizId": quiz_id, "studentId": 7 }),
    )
    .await;
    assert_eq!(status, 201, "{started}");
    assert_eq!(started["questions"].as_array().unwrap().len(), 2);
    let order: Vec<i64> = started["attempt"]["questionOrder"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_i64().unwrap())
        .collect();
    let mut sorted = order.clone();
    sorted.sort();
    let mut expected = question_ids.clone();
    expected.sort();
    assert_eq!(sorted, expected);
    // Answer key never leaves the server while the attempt runs
    assert!(started["questions"][0].get("answer").is_none());
    let attempt_id = started["attempt"]["id"].as_i64().unwrap();

    // Only one attempt per enrollment
    let (status, dup) = post_json(
        &client,
        format!("{}/api/attempts", address),
        json!({ "quizId": quiz_id, "studentId": 7 }),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(dup["reason"], "already_attempted");

    clock.set(Utc.with_ymd_and_hms(2025, 9, 3, 9, 10, 0).unwrap());
    let (status, submitted) = post_json(
        &client,
        format!("{}/api/attempts/{}/submit", address, attempt_id),
        json!({
            "studentId": 7,
            "answers": [
                { "questionId": question_ids[0], "answer": "Mitochondria" },
                { "questionId": question_ids[1], "answer": "Ribosome" }
            ]
        }),
    )
    .await;
    assert_eq!(status, 200, "{submitted}");
    assert_eq!(submitted["status"], "completed");
    assert_eq!(submitted["resultsAvailableAt"], "2025-09-03T09:35:00Z");

    let result_url = format!("{}/api/attempts/{}/result?student_id=7", address, attempt_id);
    let (status, early) = get_json(&client, result_url.clone()).await;
    assert_eq!(status, 200);
    assert_eq!(early["state"], "too_early");
    assert!(early.get("score").is_none());

    clock.set(Utc.with_ymd_and_hms(2025, 9, 3, 9, 35, 0).unwrap());
    let (_, ready) = get_json(&client, result_url).await;
    assert_eq!(ready["state"], "ready", "{ready}");
    assert_eq!(ready["score"].as_f64(), Some(50.0));
    assert_eq!(ready["totalCorrect"], 1);
    assert_eq!(ready["totalQuestions"], 2);

    // Someone else's attempt stays hidden
    let (status, _) = get_json(
        &client,
        format!("{}/api/attempts/{}/result?student_id=8", address, attempt_id),
    )
    .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn reassignment_reopens_expired_enrollment() {
    let (address, clock) = spawn_app().await;
    let client = reqwest::Client::new();
    let (quiz_id, _) = published_legacy_quiz(&client, &address, "2025-09-03T09:00", 30).await;
    let original_id = enroll(&client, &address, quiz_id, 11).await;

    let availability_url = format!("{}/api/students/11/quizzes/{}/availability", address, quiz_id);

    // 25 hours after the start the original enrollment has expired
    clock.set(Utc.with_ymd_and_hms(2025, 9, 4, 10, 0, 0).unwrap());
    let (_, expired) = get_json(&client, availability_url.clone()).await;
    assert_eq!(expired["isAvailable"], false);
    assert_eq!(expired["reason"], "expired");

    clock.advance(Duration::days(9));
    let (status, reassigned) = post_json(
        &client,
        format!("{}/api/enrollments/{}/reassign", address, original_id),
        json!({ "reason": "Medical leave" }),
    )
    .await;
    assert_eq!(status, 201, "{reassigned}");
    assert_eq!(reassigned["isReassignment"], true);
    assert_eq!(reassigned["parentEnrollmentId"], original_id);

    let (_, available) = get_json(&client, availability_url).await;
    assert_eq!(available["isAvailable"], true, "{available}");
    assert_eq!(available["enrollmentId"], reassigned["id"]);

    let (status, history) = get_json(
        &client,
        format!("{}/api/enrollments/history?quiz_id={}&student_id=11", address, quiz_id),
    )
    .await;
    assert_eq!(status, 200);
    let history = history.as_array().unwrap().clone();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["enrollmentType"], "Reassignment #1");
    assert_eq!(history[1]["enrollmentType"], "Original");
    assert_eq!(history[1]["status"], "cancelled");

    // Reassigning again while the reassignment is open is a conflict
    let (status, _) = post_json(
        &client,
        format!("{}/api/enrollments/{}/reassign", address, original_id),
        json!({ "reason": "Again" }),
    )
    .await;
    assert_eq!(status, 409);
}

#[tokio::test]
async fn sweep_times_out_stale_attempt_and_blocks_late_submit() {
    let (address, clock) = spawn_app().await;
    let client = reqwest::Client::new();
    let (quiz_id, question_ids) = published_legacy_quiz(&client, &address, "2025-09-03T09:00", 30).await;
    enroll(&client, &address, quiz_id, 3).await;

    clock.set(Utc.with_ymd_and_hms(2025, 9, 3, 9, 5, 0).unwrap());
    let (_, started) = post_json(
        &client,
        format!("{}/api/attempts", address),
        json!({ "quizId": quiz_id, "studentId": 3 }),
    )
    .await;
    let attempt_id = started["attempt"]["id"].as_i64().unwrap();

    // Exactly twice the duration is still valid
    clock.set(Utc.with_ymd_and_hms(2025, 9, 3, 10, 5, 0).unwrap());
    let (_, report) = post_json(&client, format!("{}/api/maintenance/sweep?dry_run=true", address), json!({})).await;
    assert_eq!(report["timedOut"], 0);
    assert_eq!(report["stillValid"], 1);

    clock.advance(Duration::minutes(1));
    let (status, dry) = post_json(&client, format!("{}/api/maintenance/sweep?dry_run=true", address), json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(dry["dryRun"], true);
    assert_eq!(dry["timedOut"], 1);
    assert_eq!(dry["transitions"][0]["attemptId"], attempt_id);

    // Dry run wrote nothing
    let (_, still_running) = get_json(
        &client,
        format!("{}/api/attempts/{}/result?student_id=3", address, attempt_id),
    )
    .await;
    assert_eq!(still_running["state"], "in_progress");

    let (_, applied) = post_json(&client, format!("{}/api/maintenance/sweep", address), json!({})).await;
    assert_eq!(applied["timedOut"], 1);

    let (status, late) = post_json(
        &client,
        format!("{}/api/attempts/{}/submit", address, attempt_id),
        json!({
            "studentId": 3,
            "answers": [{ "questionId": question_ids[0], "answer": "Mitochondria" }]
        }),
    )
    .await;
    assert_eq!(status, 409, "{late}");
    assert_eq!(late["error"], "already_finalized");
    assert_eq!(late["status"], "timeout");

    // Second run finds nothing left to do
    let (_, again) = post_json(&client, format!("{}/api/maintenance/sweep", address), json!({})).await;
    assert_eq!(again["timedOut"], 0);
    assert_eq!(again["stillValid"], 0);
}

#[tokio::test]
async fn router_rejects_unknown_scheduling_status() {
    let app = routes::create_router(test_state(Arc::new(FixedClock::new(t0()))));

    let request = Request::builder()
        .method("POST")
        .uri("/api/quizzes")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "educatorId": 1,
                "title": "Bad",
                "schedulingStatus": "resolved",
                "duration": 30
            })
            .to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
