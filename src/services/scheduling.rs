// src/services/scheduling.rs

//! Effective availability window of a quiz under the legacy and deferred regimes.

use chrono::{DateTime, Duration, Utc};
use validator::Validate;

use crate::{
    config::MIN_SCHEDULE_LEAD_MINUTES,
    error::AppError,
    models::quiz::{CreateQuizRequest, NewQuiz, Quiz, QuizStatus, SchedulingStatus},
    utils::timezone::{TimeZoneConverter, parse_wall_clock},
};

/// Closed view of a quiz's schedule, checked against the row invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizScheduling {
    /// Start time fixed at creation.
    Legacy {
        start_time: DateTime<Utc>,
        timezone: String,
    },
    /// Deferred and still waiting for its start time.
    Unscheduled,
    /// Deferred, start time supplied by the scheduling step.
    Scheduled {
        start_time: DateTime<Utc>,
        timezone: String,
    },
}

impl QuizScheduling {
    pub fn of(quiz: &Quiz) -> Result<Self, AppError> {
        let zone = || quiz.timezone.clone().unwrap_or_default();
        match (quiz.scheduling_status, quiz.start_time) {
            (SchedulingStatus::Legacy, Some(start_time)) => Ok(QuizScheduling::Legacy {
                start_time,
                timezone: zone(),
            }),
            (SchedulingStatus::Legacy, None) => Err(AppError::IntegrityViolation(format!(
                "legacy quiz {} has no start time",
                quiz.id
            ))),
            (SchedulingStatus::Deferred, None) => Ok(QuizScheduling::Unscheduled),
            (SchedulingStatus::Deferred, Some(start_time)) => Ok(QuizScheduling::Scheduled {
                start_time,
                timezone: zone(),
            }),
        }
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        match self {
            QuizScheduling::Legacy { start_time, .. } | QuizScheduling::Scheduled { start_time, .. } => {
                Some(*start_time)
            }
            QuizScheduling::Unscheduled => None,
        }
    }
}

/// `[opens_at, closes_at)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveWindow {
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
}

impl EffectiveWindow {
    pub fn new(start_time: DateTime<Utc>, duration_minutes: i32) -> Self {
        Self {
            opens_at: start_time,
            closes_at: start_time + Duration::minutes(i64::from(duration_minutes)),
        }
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.opens_at <= now && now < self.closes_at
    }
}

/// The window a quiz runs in, or `None` if it has no start time yet.
pub fn effective_window(quiz: &Quiz) -> Option<EffectiveWindow> {
    quiz.start_time.map(|start| EffectiveWindow::new(start, quiz.duration))
}

/// Why an attempt may not start against this quiz's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowBlock {
    NotScheduled,
    NotYetOpen,
    Closed,
}

/// Window policy for starting an attempt.
///
/// Legacy quizzes do not gate starts on the window. Deferred quizzes must be open;
/// reassignments may start after the window closed but never before it opened.
pub fn start_gate(quiz: &Quiz, is_reassignment: bool, now: DateTime<Utc>) -> Result<(), WindowBlock> {
    let scheduling = QuizScheduling::of(quiz).map_err(|_| WindowBlock::NotScheduled)?;
    match scheduling {
        QuizScheduling::Unscheduled => Err(WindowBlock::NotScheduled),
        QuizScheduling::Legacy { .. } => Ok(()),
        QuizScheduling::Scheduled { start_time, .. } => {
            let window = EffectiveWindow::new(start_time, quiz.duration);
            if now < window.opens_at {
                Err(WindowBlock::NotYetOpen)
            } else if now >= window.closes_at && !is_reassignment {
                Err(WindowBlock::Closed)
            } else {
                Ok(())
            }
        }
    }
}

/// Rejects start times closer than `MIN_SCHEDULE_LEAD_MINUTES` to `now`.
pub fn validate_start_time(start_time: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), AppError> {
    let earliest = now + Duration::minutes(MIN_SCHEDULE_LEAD_MINUTES);
    if start_time < earliest {
        return Err(AppError::BadRequest(format!(
            "startTime must be at least {} minutes in the future (earliest {})",
            MIN_SCHEDULE_LEAD_MINUTES,
            earliest.to_rfc3339()
        )));
    }
    Ok(())
}

/// Converts a submitted wall-clock time and zone, then applies the lead-time rule.
///
/// Returns the instant and the zone name actually used.
pub fn resolve_start_time(
    converter: &TimeZoneConverter,
    local_start: &str,
    zone_id: &str,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, String), AppError> {
    let local = parse_wall_clock(local_start)?;
    let instant = converter.to_canonical_instant(local, zone_id);
    validate_start_time(instant, now)?;
    Ok((instant, converter.effective_zone_name(zone_id).to_string()))
}

/// Validates a create request under its scheduling regime.
pub fn prepare_new_quiz(
    converter: &TimeZoneConverter,
    req: CreateQuizRequest,
    now: DateTime<Utc>,
) -> Result<NewQuiz, AppError> {
    req.validate()?;

    let (start_time, timezone) = match req.scheduling_status {
        SchedulingStatus::Legacy => {
            let (local, zone) = match (req.start_time.as_deref(), req.timezone.as_deref()) {
                (Some(local), Some(zone)) => (local, zone),
                _ => {
                    return Err(AppError::BadRequest(
                        "legacy quizzes require startTime and timezone".to_string(),
                    ));
                }
            };
            let (instant, zone) = resolve_start_time(converter, local, zone, now)?;
            (Some(instant), Some(zone))
        }
        SchedulingStatus::Deferred => {
            if req.start_time.is_some() {
                return Err(AppError::BadRequest(
                    "deferred quizzes are scheduled before publishing, not at creation".to_string(),
                ));
            }
            (None, None)
        }
    };

    Ok(NewQuiz {
        educator_id: req.educator_id,
        title: req.title,
        scheduling_status: req.scheduling_status,
        start_time,
        timezone,
        duration: req.duration,
        created_at: now,
    })
}

/// Checks that the deferred scheduling step may run on this quiz.
pub fn ensure_schedulable(quiz: &Quiz) -> Result<(), AppError> {
    if quiz.scheduling_status != SchedulingStatus::Deferred {
        return Err(AppError::BadRequest(
            "legacy quizzes are scheduled at creation".to_string(),
        ));
    }
    if quiz.status != QuizStatus::Draft {
        return Err(AppError::BadRequest(format!(
            "cannot schedule a {} quiz",
            quiz.status
        )));
    }
    Ok(())
}

/// Checks the quiz may move to `published`.
pub fn ensure_publishable(quiz: &Quiz) -> Result<(), AppError> {
    if !quiz.status.can_transition_to(QuizStatus::Published) {
        return Err(AppError::BadRequest(format!(
            "cannot publish a {} quiz",
            quiz.status
        )));
    }
    match QuizScheduling::of(quiz)? {
        QuizScheduling::Unscheduled => Err(AppError::BadRequest(
            "deferred quiz must be scheduled before publishing".to_string(),
        )),
        QuizScheduling::Legacy { .. } | QuizScheduling::Scheduled { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 3, 8, 0, 0).unwrap()
    }

    fn converter() -> TimeZoneConverter {
        TimeZoneConverter::new(chrono_tz::Tz::UTC)
    }

    fn request(status: SchedulingStatus, start: Option<&str>) -> CreateQuizRequest {
        CreateQuizRequest {
            educator_id: 7,
            title: "Cell biology".to_string(),
            scheduling_status: status,
            start_time: start.map(str::to_string),
            timezone: start.map(|_| "UTC".to_string()),
            duration: 30,
        }
    }

    fn quiz(status: SchedulingStatus, start: Option<DateTime<Utc>>) -> Quiz {
        Quiz {
            id: 1,
            educator_id: 7,
            title: "Cell biology".to_string(),
            scheduling_status: status,
            start_time: start,
            timezone: start.map(|_| "UTC".to_string()),
            duration: 30,
            status: QuizStatus::Draft,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[test]
    fn test_legacy_three_minutes_ahead_rejected() {
        let res = prepare_new_quiz(&converter(), request(SchedulingStatus::Legacy, Some("2025-09-03T08:03")), now());
        assert!(matches!(res, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_legacy_five_minutes_ahead_accepted() {
        let new = prepare_new_quiz(&converter(), request(SchedulingStatus::Legacy, Some("2025-09-03T08:05")), now())
            .unwrap();
        assert_eq!(new.start_time, Some(now() + Duration::minutes(5)));
        assert_eq!(new.timezone.as_deref(), Some("UTC"));
    }

    #[test]
    fn test_legacy_requires_start_and_zone() {
        let res = prepare_new_quiz(&converter(), request(SchedulingStatus::Legacy, None), now());
        assert!(matches!(res, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_legacy_start_is_read_in_quiz_zone() {
        let mut req = request(SchedulingStatus::Legacy, Some("2025-09-03T14:00"));
        req.timezone = Some("Asia/Kolkata".to_string());
        let new = prepare_new_quiz(&converter(), req, now()).unwrap();
        assert_eq!(new.start_time, Some(Utc.with_ymd_and_hms(2025, 9, 3, 8, 30, 0).unwrap()));
        assert_eq!(new.timezone.as_deref(), Some("Asia/Kolkata"));
    }

    #[test]
    fn test_deferred_created_without_start_time() {
        let new = prepare_new_quiz(&converter(), request(SchedulingStatus::Deferred, None), now()).unwrap();
        assert!(new.start_time.is_none());
        assert!(new.timezone.is_none());
    }

    #[test]
    fn test_deferred_rejects_start_time_at_creation() {
        let res = prepare_new_quiz(&converter(), request(SchedulingStatus::Deferred, Some("2025-09-04T08:00")), now());
        assert!(matches!(res, Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_zero_duration_rejected() {
        let mut req = request(SchedulingStatus::Deferred, None);
        req.duration = 0;
        assert!(matches!(prepare_new_quiz(&converter(), req, now()), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_window_is_half_open() {
        let window = EffectiveWindow::new(now(), 30);
        assert!(window.contains(now()));
        assert!(window.contains(now() + Duration::minutes(29)));
        assert!(!window.contains(now() + Duration::minutes(30)));
        assert!(!window.contains(now() - Duration::seconds(1)));
    }

    #[test]
    fn test_unscheduled_quiz_has_no_window() {
        let q = quiz(SchedulingStatus::Deferred, None);
        assert!(effective_window(&q).is_none());
        assert_eq!(start_gate(&q, false, now()), Err(WindowBlock::NotScheduled));
    }

    #[test]
    fn test_legacy_without_start_is_integrity_violation() {
        let q = quiz(SchedulingStatus::Legacy, None);
        assert!(matches!(QuizScheduling::of(&q), Err(AppError::IntegrityViolation(_))));
    }

    #[test]
    fn test_start_gate_for_deferred_quiz() {
        let q = quiz(SchedulingStatus::Deferred, Some(now()));
        assert_eq!(start_gate(&q, false, now() - Duration::minutes(1)), Err(WindowBlock::NotYetOpen));
        assert_eq!(start_gate(&q, false, now() + Duration::minutes(10)), Ok(()));
        assert_eq!(start_gate(&q, false, now() + Duration::minutes(30)), Err(WindowBlock::Closed));
        assert_eq!(start_gate(&q, true, now() + Duration::hours(48)), Ok(()));
        assert_eq!(start_gate(&q, true, now() - Duration::minutes(1)), Err(WindowBlock::NotYetOpen));
    }

    #[test]
    fn test_start_gate_ignores_window_for_legacy() {
        let q = quiz(SchedulingStatus::Legacy, Some(now()));
        assert_eq!(start_gate(&q, false, now() - Duration::hours(1)), Ok(()));
        assert_eq!(start_gate(&q, false, now() + Duration::hours(3)), Ok(()));
    }

    #[test]
    fn test_publish_requires_schedule() {
        let unscheduled = quiz(SchedulingStatus::Deferred, None);
        assert!(matches!(ensure_publishable(&unscheduled), Err(AppError::BadRequest(_))));

        let scheduled = quiz(SchedulingStatus::Deferred, Some(now() + Duration::hours(1)));
        assert!(ensure_publishable(&scheduled).is_ok());

        let mut archived = scheduled.clone();
        archived.status = QuizStatus::Archived;
        assert!(matches!(ensure_publishable(&archived), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_schedule_step_only_for_deferred_drafts() {
        let legacy = quiz(SchedulingStatus::Legacy, Some(now()));
        assert!(ensure_schedulable(&legacy).is_err());

        let mut published = quiz(SchedulingStatus::Deferred, Some(now()));
        published.status = QuizStatus::Published;
        assert!(ensure_schedulable(&published).is_err());

        assert!(ensure_schedulable(&quiz(SchedulingStatus::Deferred, None)).is_ok());
    }
}
