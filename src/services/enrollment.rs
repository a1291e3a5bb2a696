// src/services/enrollment.rs

//! Enrollment visibility, expiry and reassignment chains.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::{
    config::ENROLLMENT_VISIBILITY_HOURS,
    error::AppError,
    models::{
        enrollment::{
            AvailabilityResponse, Enrollment, EnrollmentLabel, EnrollmentState, EnrollmentStatus,
            EnrollmentView, NewEnrollment, UnavailableReason,
        },
        quiz::{Quiz, QuizStatus},
    },
    services::scheduling::{WindowBlock, start_gate},
    store::QuizStore,
};

/// `now > start_time + 24h`, for original enrollments only.
pub fn is_expired(enrollment: &Enrollment, quiz: &Quiz, now: DateTime<Utc>) -> bool {
    if enrollment.is_reassignment {
        return false;
    }
    match quiz.start_time {
        Some(start) => now > start + Duration::hours(ENROLLMENT_VISIBILITY_HOURS),
        None => false,
    }
}

/// Availability of one enrollment at `now`.
///
/// Reasons are checked in a fixed order: cancelled, not published, already
/// attempted, expired, then the start window.
pub fn evaluate(enrollment: &Enrollment, quiz: &Quiz, has_attempt: bool, now: DateTime<Utc>) -> EnrollmentState {
    let is_expired = is_expired(enrollment, quiz, now);

    let reason = if enrollment.status == EnrollmentStatus::Cancelled {
        Some(UnavailableReason::Cancelled)
    } else if quiz.status != QuizStatus::Published {
        Some(UnavailableReason::NotPublished)
    } else if has_attempt || enrollment.status == EnrollmentStatus::Completed {
        Some(UnavailableReason::AlreadyAttempted)
    } else if is_expired {
        Some(UnavailableReason::Expired)
    } else {
        match start_gate(quiz, enrollment.is_reassignment, now) {
            Ok(()) => None,
            Err(WindowBlock::NotScheduled) | Err(WindowBlock::NotYetOpen) => {
                Some(UnavailableReason::NotYetOpen)
            }
            Err(WindowBlock::Closed) => Some(UnavailableReason::Expired),
        }
    };

    EnrollmentState {
        has_attempt,
        is_expired,
        is_available: reason.is_none(),
        reason,
    }
}

/// All enrollments of one student for one quiz, linked by parent id.
#[derive(Debug, Clone)]
pub struct EnrollmentChain {
    by_id: HashMap<i64, Enrollment>,
    /// Ids by ascending `(enrolled_at, id)`.
    ascending: Vec<i64>,
}

impl EnrollmentChain {
    /// Indexes the enrollments and checks every parent link resolves inside the chain
    /// without cycles.
    pub fn new(enrollments: Vec<Enrollment>) -> Result<Self, AppError> {
        let mut sorted = enrollments;
        sorted.sort_by_key(|e| (e.enrolled_at, e.id));
        let ascending = sorted.iter().map(|e| e.id).collect();
        let by_id: HashMap<i64, Enrollment> = sorted.into_iter().map(|e| (e.id, e)).collect();

        let chain = Self { by_id, ascending };
        for id in &chain.ascending {
            chain.lineage(*id)?;
        }
        Ok(chain)
    }

    pub fn get(&self, id: i64) -> Option<&Enrollment> {
        self.by_id.get(&id)
    }

    /// The enrollment this one supersedes.
    pub fn parent(&self, id: i64) -> Result<Option<&Enrollment>, AppError> {
        let enrollment = self.get(id).ok_or_else(|| {
            AppError::NotFound(format!("Enrollment {} not found", id))
        })?;
        match enrollment.parent_enrollment_id {
            None => Ok(None),
            Some(parent_id) => self.get(parent_id).map(Some).ok_or_else(|| {
                AppError::IntegrityViolation(format!(
                    "enrollment {} references missing parent enrollment {}",
                    id, parent_id
                ))
            }),
        }
    }

    /// This enrollment followed by its ancestors.
    pub fn lineage(&self, id: i64) -> Result<Vec<&Enrollment>, AppError> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut cursor = self.get(id);
        while let Some(enrollment) = cursor {
            if !seen.insert(enrollment.id) {
                return Err(AppError::IntegrityViolation(format!(
                    "enrollment {} has a cyclic parent chain",
                    id
                )));
            }
            out.push(enrollment);
            cursor = self.parent(enrollment.id)?;
        }
        Ok(out)
    }

    /// `Original`, or `Reassignment #N` numbered by ascending `enrolled_at`.
    pub fn label(&self, id: i64) -> Result<EnrollmentLabel, AppError> {
        let enrollment = self.get(id).ok_or_else(|| {
            AppError::NotFound(format!("Enrollment {} not found", id))
        })?;
        if !enrollment.is_reassignment {
            return Ok(EnrollmentLabel::Original);
        }
        let prior = self
            .ascending
            .iter()
            .take_while(|other| **other != id)
            .filter(|other| self.by_id[*other].is_reassignment)
            .count();
        Ok(EnrollmentLabel::Reassignment(prior as u32 + 1))
    }

    /// Newest first, for display.
    pub fn display_order(&self) -> Vec<&Enrollment> {
        self.ascending.iter().rev().map(|id| &self.by_id[id]).collect()
    }

    /// The enrollment a learner acts under: newest non-cancelled, else newest.
    pub fn current(&self) -> Option<&Enrollment> {
        let newest_first = self.display_order();
        newest_first
            .iter()
            .find(|e| e.status != EnrollmentStatus::Cancelled)
            .or_else(|| newest_first.first())
            .copied()
    }
}

/// Builds the row for a reassignment superseding `parent`.
pub fn plan_reassignment(parent: &Enrollment, reason: &str, now: DateTime<Utc>) -> NewEnrollment {
    NewEnrollment {
        quiz_id: parent.quiz_id,
        student_id: parent.student_id,
        enrolled_at: now,
        is_reassignment: true,
        parent_enrollment_id: Some(parent.id),
        reassignment_reason: Some(reason.trim().to_string()),
    }
}

async fn load_quiz(store: &dyn QuizStore, quiz_id: i64) -> Result<Quiz, AppError> {
    store
        .get_quiz(quiz_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Quiz {} not found", quiz_id)))
}

/// State of one enrollment, with its own fresh "has attempt" answer.
pub async fn enrollment_state(
    store: &dyn QuizStore,
    enrollment: &Enrollment,
    quiz: &Quiz,
    now: DateTime<Utc>,
) -> Result<EnrollmentState, AppError> {
    let has_attempt = store.has_attempt(enrollment).await?;
    Ok(evaluate(enrollment, quiz, has_attempt, now))
}

/// Enrolls a student. Refuses a second active original enrollment.
pub async fn enroll(
    store: &dyn QuizStore,
    quiz_id: i64,
    student_id: i64,
    now: DateTime<Utc>,
) -> Result<Enrollment, AppError> {
    let quiz = load_quiz(store, quiz_id).await?;
    if quiz.status == QuizStatus::Archived {
        return Err(AppError::BadRequest("cannot enroll into an archived quiz".to_string()));
    }

    let existing = store.list_enrollments(quiz_id, student_id).await?;
    if existing.iter().any(|e| e.status == EnrollmentStatus::Enrolled) {
        return Err(AppError::Conflict(format!(
            "student {} is already enrolled in quiz {}",
            student_id, quiz_id
        )));
    }

    let enrollment = store
        .insert_enrollment(NewEnrollment {
            quiz_id,
            student_id,
            enrolled_at: now,
            is_reassignment: false,
            parent_enrollment_id: None,
            reassignment_reason: None,
        })
        .await?;
    tracing::info!(enrollment_id = enrollment.id, quiz_id, student_id, "Student enrolled");
    Ok(enrollment)
}

/// Creates a reassignment under `parent_id`, cancelling the parent if it is still open.
pub async fn reassign(
    store: &dyn QuizStore,
    parent_id: i64,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Enrollment, AppError> {
    let parent = store
        .get_enrollment(parent_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Enrollment {} not found", parent_id)))?;

    // Only one enrollment per chain may be open at a time.
    let chain = EnrollmentChain::new(store.list_enrollments(parent.quiz_id, parent.student_id).await?)?;
    if let Some(open) = chain
        .display_order()
        .into_iter()
        .find(|e| e.id != parent.id && e.status == EnrollmentStatus::Enrolled)
    {
        return Err(AppError::Conflict(format!(
            "enrollment {} is still open for this student and quiz",
            open.id
        )));
    }

    let enrollment = store
        .supersede_enrollment(parent.id, plan_reassignment(&parent, reason, now))
        .await?;
    tracing::info!(
        enrollment_id = enrollment.id,
        parent_enrollment_id = parent.id,
        "Quiz reassigned"
    );
    Ok(enrollment)
}

pub async fn cancel(store: &dyn QuizStore, enrollment_id: i64, now: DateTime<Utc>) -> Result<Enrollment, AppError> {
    let enrollment = store
        .get_enrollment(enrollment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Enrollment {} not found", enrollment_id)))?;

    let changed = store
        .transition_enrollment(enrollment.id, EnrollmentStatus::Enrolled, EnrollmentStatus::Cancelled, now)
        .await?;
    if !changed {
        return Err(AppError::Conflict(format!(
            "enrollment {} is {}, only enrolled rows can be cancelled",
            enrollment.id, enrollment.status
        )));
    }

    store
        .get_enrollment(enrollment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Enrollment {} not found", enrollment_id)))
}

/// Labelled view of a single enrollment.
pub async fn describe(store: &dyn QuizStore, enrollment_id: i64, now: DateTime<Utc>) -> Result<EnrollmentView, AppError> {
    let enrollment = store
        .get_enrollment(enrollment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Enrollment {} not found", enrollment_id)))?;
    let quiz = load_quiz(store, enrollment.quiz_id).await?;
    let chain = EnrollmentChain::new(store.list_enrollments(enrollment.quiz_id, enrollment.student_id).await?)?;

    let state = enrollment_state(store, &enrollment, &quiz, now).await?;
    Ok(EnrollmentView {
        enrollment_type: chain.label(enrollment.id)?,
        enrollment,
        state,
    })
}

/// Enrollment history of one student for one quiz, newest first.
pub async fn history(
    store: &dyn QuizStore,
    quiz_id: i64,
    student_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<EnrollmentView>, AppError> {
    let quiz = load_quiz(store, quiz_id).await?;
    let chain = EnrollmentChain::new(store.list_enrollments(quiz_id, student_id).await?)?;

    let mut out = Vec::new();
    for enrollment in chain.display_order() {
        let state = enrollment_state(store, enrollment, &quiz, now).await?;
        out.push(EnrollmentView {
            enrollment_type: chain.label(enrollment.id)?,
            enrollment: enrollment.clone(),
            state,
        });
    }
    Ok(out)
}

/// "Is quiz X available to student Y right now", evaluated on the current enrollment.
pub async fn availability(
    store: &dyn QuizStore,
    quiz_id: i64,
    student_id: i64,
    now: DateTime<Utc>,
) -> Result<AvailabilityResponse, AppError> {
    let quiz = load_quiz(store, quiz_id).await?;
    let chain = EnrollmentChain::new(store.list_enrollments(quiz_id, student_id).await?)?;
    let current = chain.current().ok_or_else(|| {
        AppError::NotFound(format!(
            "student {} is not enrolled in quiz {}",
            student_id, quiz_id
        ))
    })?;

    let state = enrollment_state(store, current, &quiz, now).await?;
    Ok(AvailabilityResponse {
        quiz_id,
        student_id,
        enrollment_id: Some(current.id),
        is_available: state.is_available,
        reason: state.reason,
    })
}

/// Dashboard listing: the current enrollment of every quiz a student is enrolled in.
pub async fn assignments(
    store: &dyn QuizStore,
    student_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<EnrollmentView>, AppError> {
    let mut by_quiz: HashMap<i64, Vec<Enrollment>> = HashMap::new();
    for enrollment in store.list_student_enrollments(student_id).await? {
        by_quiz.entry(enrollment.quiz_id).or_default().push(enrollment);
    }

    let mut out = Vec::new();
    for (quiz_id, enrollments) in by_quiz {
        let quiz = load_quiz(store, quiz_id).await?;
        let chain = EnrollmentChain::new(enrollments)?;
        if let Some(current) = chain.current() {
            let state = enrollment_state(store, current, &quiz, now).await?;
            out.push(EnrollmentView {
                enrollment_type: chain.label(current.id)?,
                enrollment: current.clone(),
                state,
            });
        }
    }
    out.sort_by(|a, b| b.enrollment.enrolled_at.cmp(&a.enrollment.enrolled_at));
    Ok(out)
}
