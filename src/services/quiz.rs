// src/services/quiz.rs

//! Educator-side quiz transitions: create, schedule, publish, archive.

use chrono::{DateTime, Utc};
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        question::{CreateQuestionRequest, PublicQuestion},
        quiz::{CreateQuizRequest, PublishQuizRequest, Quiz, QuizResponse, QuizStatus, ScheduleQuizRequest},
    },
    services::scheduling::{
        effective_window, ensure_publishable, ensure_schedulable, prepare_new_quiz, resolve_start_time,
    },
    store::QuizStore,
    utils::timezone::{TimeZoneConverter, format_wall_clock},
};

async fn load_quiz(store: &dyn QuizStore, quiz_id: i64) -> Result<Quiz, AppError> {
    store
        .get_quiz(quiz_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Quiz {} not found", quiz_id)))
}

/// Quiz plus its window and local start time.
pub fn render(converter: &TimeZoneConverter, quiz: Quiz) -> QuizResponse {
    let window = effective_window(&quiz);
    let local_start_time = quiz.start_time.map(|start| {
        let zone = quiz.timezone.as_deref().unwrap_or_else(|| converter.default_zone().name());
        format_wall_clock(converter.to_local_wall_clock(start, zone))
    });
    QuizResponse {
        local_start_time,
        window_opens_at: window.map(|w| w.opens_at),
        window_closes_at: window.map(|w| w.closes_at),
        quiz,
    }
}

pub async fn create(
    store: &dyn QuizStore,
    converter: &TimeZoneConverter,
    req: CreateQuizRequest,
    now: DateTime<Utc>,
) -> Result<Quiz, AppError> {
    let new_quiz = prepare_new_quiz(converter, req, now)?;
    let quiz = store.insert_quiz(new_quiz).await?;
    tracing::info!(
        quiz_id = quiz.id,
        scheduling = %quiz.scheduling_status,
        "Quiz created"
    );
    Ok(quiz)
}

pub async fn get(store: &dyn QuizStore, quiz_id: i64) -> Result<Quiz, AppError> {
    load_quiz(store, quiz_id).await
}

/// The deferred scheduling step.
pub async fn schedule(
    store: &dyn QuizStore,
    converter: &TimeZoneConverter,
    quiz_id: i64,
    req: &ScheduleQuizRequest,
    now: DateTime<Utc>,
) -> Result<Quiz, AppError> {
    req.validate()?;
    let quiz = load_quiz(store, quiz_id).await?;
    ensure_schedulable(&quiz)?;

    let (start_time, zone) = resolve_start_time(converter, &req.start_time, &req.timezone, now)?;
    if !store.schedule_quiz(quiz.id, start_time, &zone, now).await? {
        return Err(AppError::Conflict(format!(
            "quiz {} changed while it was being scheduled",
            quiz.id
        )));
    }
    tracing::info!(quiz_id = quiz.id, start_time = %start_time, timezone = %zone, "Quiz scheduled");
    load_quiz(store, quiz.id).await
}

/// Publishes a quiz, finalizing the deferred schedule first when one is supplied.
pub async fn publish(
    store: &dyn QuizStore,
    converter: &TimeZoneConverter,
    quiz_id: i64,
    req: PublishQuizRequest,
    now: DateTime<Utc>,
) -> Result<Quiz, AppError> {
    let mut quiz = load_quiz(store, quiz_id).await?;

    match (req.start_time, req.timezone) {
        (Some(start_time), Some(timezone)) => {
            let schedule_req = ScheduleQuizRequest { start_time, timezone };
            quiz = schedule(store, converter, quiz_id, &schedule_req, now).await?;
        }
        (None, None) => {}
        _ => {
            return Err(AppError::BadRequest(
                "startTime and timezone must be supplied together".to_string(),
            ));
        }
    }

    ensure_publishable(&quiz)?;
    if !store
        .transition_quiz(quiz.id, QuizStatus::Draft, QuizStatus::Published, now)
        .await?
    {
        return Err(AppError::Conflict(format!("quiz {} is no longer a draft", quiz.id)));
    }
    tracing::info!(quiz_id = quiz.id, "Quiz published");
    load_quiz(store, quiz.id).await
}

pub async fn archive(store: &dyn QuizStore, quiz_id: i64, now: DateTime<Utc>) -> Result<Quiz, AppError> {
    let quiz = load_quiz(store, quiz_id).await?;
    if !quiz.status.can_transition_to(QuizStatus::Archived) {
        return Err(AppError::BadRequest(format!("cannot archive a {} quiz", quiz.status)));
    }
    if !store
        .transition_quiz(quiz.id, quiz.status, QuizStatus::Archived, now)
        .await?
    {
        return Err(AppError::Conflict(format!("quiz {} changed while archiving", quiz.id)));
    }
    tracing::info!(quiz_id = quiz.id, "Quiz archived");
    load_quiz(store, quiz.id).await
}

/// Questions can only be added while the quiz is a draft.
pub async fn add_question(
    store: &dyn QuizStore,
    quiz_id: i64,
    req: CreateQuestionRequest,
) -> Result<PublicQuestion, AppError> {
    req.validate()?;
    let quiz = load_quiz(store, quiz_id).await?;
    if quiz.status != QuizStatus::Draft {
        return Err(AppError::BadRequest(format!(
            "cannot add questions to a {} quiz",
            quiz.status
        )));
    }
    let question = store.insert_question(quiz.id, req).await?;
    Ok(PublicQuestion::from(&question))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::quiz::SchedulingStatus, store::MemoryStore};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 3, 8, 0, 0).unwrap()
    }

    fn converter() -> TimeZoneConverter {
        TimeZoneConverter::new(chrono_tz::Tz::UTC)
    }

    fn deferred_request() -> CreateQuizRequest {
        CreateQuizRequest {
            educator_id: 1,
            title: "Genetics".to_string(),
            scheduling_status: SchedulingStatus::Deferred,
            start_time: None,
            timezone: None,
            duration: 45,
        }
    }

    #[tokio::test]
    async fn test_deferred_stays_unscheduled_until_schedule_step() {
        let store = MemoryStore::new();
        let quiz = create(&store, &converter(), deferred_request(), now()).await.unwrap();
        assert!(quiz.start_time.is_none());

        let fetched = get(&store, quiz.id).await.unwrap();
        assert!(fetched.start_time.is_none());

        let publish_res = publish(&store, &converter(), quiz.id, PublishQuizRequest::default(), now()).await;
        assert!(matches!(publish_res, Err(AppError::BadRequest(_))));
        assert!(get(&store, quiz.id).await.unwrap().start_time.is_none());

        let req = ScheduleQuizRequest {
            start_time: "2025-09-03T14:00".to_string(),
            timezone: "Europe/Berlin".to_string(),
        };
        let scheduled = schedule(&store, &converter(), quiz.id, &req, now()).await.unwrap();
        assert_eq!(scheduled.start_time, Some(Utc.with_ymd_and_hms(2025, 9, 3, 12, 0, 0).unwrap()));
        assert_eq!(scheduled.scheduling_status, SchedulingStatus::Deferred);

        let published = publish(&store, &converter(), quiz.id, PublishQuizRequest::default(), now()).await.unwrap();
        assert_eq!(published.status, QuizStatus::Published);
    }

    #[tokio::test]
    async fn test_publish_can_finalize_schedule() {
        let store = MemoryStore::new();
        let quiz = create(&store, &converter(), deferred_request(), now()).await.unwrap();

        let too_soon = PublishQuizRequest {
            start_time: Some("2025-09-03T08:03".to_string()),
            timezone: Some("UTC".to_string()),
        };
        assert!(matches!(
            publish(&store, &converter(), quiz.id, too_soon, now()).await,
            Err(AppError::BadRequest(_))
        ));

        let ok = PublishQuizRequest {
            start_time: Some("2025-09-03T09:00".to_string()),
            timezone: Some("UTC".to_string()),
        };
        let published = publish(&store, &converter(), quiz.id, ok, now()).await.unwrap();
        assert_eq!(published.status, QuizStatus::Published);
        assert_eq!(published.start_time, Some(now() + Duration::hours(1)));
    }

    #[tokio::test]
    async fn test_archive_and_render() {
        let store = MemoryStore::new();
        let mut req = deferred_request();
        req.scheduling_status = SchedulingStatus::Legacy;
        req.start_time = Some("2025-09-03T12:00".to_string());
        req.timezone = Some("America/New_York".to_string());
        let quiz = create(&store, &converter(), req, now()).await.unwrap();

        let view = render(&converter(), quiz.clone());
        assert_eq!(view.local_start_time.as_deref(), Some("2025-09-03T12:00"));
        assert_eq!(view.window_closes_at, quiz.start_time.map(|s| s + Duration::minutes(45)));

        let archived = archive(&store, quiz.id, now()).await.unwrap();
        assert_eq!(archived.status, QuizStatus::Archived);
        assert!(matches!(archive(&store, quiz.id, now()).await, Err(AppError::BadRequest(_))));
    }
}
