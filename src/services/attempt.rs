// src/services/attempt.rs

//! Attempt state machine: in_progress -> completed | abandoned | timeout.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rand::{Rng, seq::SliceRandom};

use crate::{
    error::AppError,
    models::{
        attempt::{
            AttemptResultView, AttemptStatus, CompletedAttempt, NewAttempt, QuizAttempt, ResultItem,
            StartAttemptRequest, StartedAttempt, SubmittedAnswer,
        },
        enrollment::{EnrollmentStatus, UnavailableReason},
        question::{PublicQuestion, Question},
        quiz::Quiz,
    },
    services::{
        enrollment::{EnrollmentChain, enrollment_state, evaluate},
        scheduling::{WindowBlock, start_gate},
    },
    store::QuizStore,
};

/// Result of asking for a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Applied(QuizAttempt),
    /// The attempt was already terminal; nothing was written.
    AlreadyTerminal(AttemptStatus),
}

impl Transition {
    /// Maps the no-op case to `AlreadyFinalized` for callers that report it as a conflict.
    pub fn into_applied(self) -> Result<QuizAttempt, AppError> {
        match self {
            Transition::Applied(attempt) => Ok(attempt),
            Transition::AlreadyTerminal(status) => Err(AppError::AlreadyFinalized(status)),
        }
    }
}

pub fn shuffle_question_order<R: Rng + ?Sized>(question_ids: &[i64], rng: &mut R) -> Vec<i64> {
    let mut order = question_ids.to_vec();
    order.shuffle(rng);
    order
}

/// Validates a submission against the attempt's questions and scores it.
///
/// Only the first answer to each question counts. Returns `(total_correct, score_percentage)`.
pub fn score_answers(
    question_order: &[i64],
    answers: &[SubmittedAnswer],
    answer_key: &HashMap<i64, String>,
) -> Result<(i32, f64), AppError> {
    if let Some(stray) = answers.iter().find(|a| !question_order.contains(&a.question_id)) {
        return Err(AppError::BadRequest(format!(
            "question {} is not part of this attempt",
            stray.question_id
        )));
    }

    let total_questions = question_order.len();
    if total_questions == 0 {
        return Ok((0, 0.0));
    }

    let mut first_answers: HashMap<i64, &str> = HashMap::new();
    for a in answers {
        first_answers.entry(a.question_id).or_insert(a.answer.as_str());
    }

    let correct_count = question_order
        .iter()
        .filter(|q_id| match (first_answers.get(q_id), answer_key.get(q_id)) {
            (Some(given), Some(correct)) => *given == correct.as_str(),
            _ => false,
        })
        .count();

    let score = (correct_count as f64 / total_questions as f64) * 100.0;
    Ok((correct_count as i32, score))
}

/// Results unlock once the full quiz duration has passed since the attempt began.
pub fn results_available_at(attempt: &QuizAttempt, duration_minutes: i32) -> DateTime<Utc> {
    attempt.reference_time() + Duration::minutes(i64::from(duration_minutes))
}

/// Applies the disclosure gate and rebuilds the result in the captured question order.
pub fn disclose(attempt: &QuizAttempt, quiz: &Quiz, questions: &[Question], now: DateTime<Utc>) -> AttemptResultView {
    if !attempt.status.is_terminal() {
        return AttemptResultView::InProgress {
            attempt_id: attempt.id,
            start_time: attempt.start_time,
        };
    }

    let available_at = results_available_at(attempt, quiz.duration);
    if now < available_at {
        return AttemptResultView::TooEarly {
            attempt_id: attempt.id,
            status: attempt.status,
            available_at,
        };
    }

    let by_id: HashMap<i64, &Question> = questions.iter().map(|q| (q.id, q)).collect();
    let items = attempt
        .question_order
        .iter()
        .filter_map(|q_id| by_id.get(q_id))
        .map(|q| {
            let submitted = attempt
                .answers
                .iter()
                .find(|a| a.question_id == q.id)
                .map(|a| a.answer.clone());
            ResultItem {
                question_id: q.id,
                content: q.content.clone(),
                is_correct: submitted.as_deref() == Some(q.answer.as_str()),
                submitted,
                correct_answer: q.answer.clone(),
            }
        })
        .collect();

    AttemptResultView::Ready {
        attempt_id: attempt.id,
        status: attempt.status,
        score: attempt.score,
        total_correct: attempt.total_correct,
        total_questions: attempt.question_order.len(),
        items,
    }
}

fn present(questions: &[Question], order: &[i64]) -> Vec<PublicQuestion> {
    let by_id: HashMap<i64, &Question> = questions.iter().map(|q| (q.id, q)).collect();
    order
        .iter()
        .filter_map(|id| by_id.get(id).map(|q| PublicQuestion::from(*q)))
        .collect()
}

async fn load_quiz(store: &dyn QuizStore, quiz_id: i64) -> Result<Quiz, AppError> {
    store
        .get_quiz(quiz_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Quiz {} not found", quiz_id)))
}

/// Loads an attempt owned by `student_id`. Someone else's attempt reads as missing.
async fn load_owned_attempt(store: &dyn QuizStore, attempt_id: i64, student_id: i64) -> Result<QuizAttempt, AppError> {
    store
        .get_attempt(attempt_id)
        .await?
        .filter(|a| a.student_id == student_id)
        .ok_or_else(|| AppError::NotFound(format!("Attempt {} not found", attempt_id)))
}

fn window_reason(block: WindowBlock) -> UnavailableReason {
    match block {
        WindowBlock::NotScheduled | WindowBlock::NotYetOpen => UnavailableReason::NotYetOpen,
        WindowBlock::Closed => UnavailableReason::Expired,
    }
}

/// Creates the attempt row after checking eligibility.
///
/// With `begin = true` the attempt starts now; otherwise it is prepared with no
/// start time and must be begun separately.
pub async fn start(
    store: &dyn QuizStore,
    req: &StartAttemptRequest,
    begin: bool,
    now: DateTime<Utc>,
) -> Result<StartedAttempt, AppError> {
    let quiz = load_quiz(store, req.quiz_id).await?;

    let enrollment = match req.enrollment_id {
        Some(id) => store
            .get_enrollment(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Enrollment {} not found", id)))?,
        None => EnrollmentChain::new(store.list_enrollments(req.quiz_id, req.student_id).await?)?
            .current()
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "student {} is not enrolled in quiz {}",
                    req.student_id, req.quiz_id
                ))
            })?,
    };
    if enrollment.student_id != req.student_id || enrollment.quiz_id != req.quiz_id {
        return Err(AppError::BadRequest(format!(
            "enrollment {} does not belong to student {} for quiz {}",
            enrollment.id, req.student_id, req.quiz_id
        )));
    }

    let state = enrollment_state(store, &enrollment, &quiz, now).await?;
    if let Some(reason) = state.reason {
        return Err(AppError::NotAvailable(reason));
    }

    let questions = store.list_questions(quiz.id).await?;
    if questions.is_empty() {
        return Err(AppError::BadRequest(format!("quiz {} has no questions", quiz.id)));
    }
    let question_ids: Vec<i64> = questions.iter().map(|q| q.id).collect();
    let question_order = shuffle_question_order(&question_ids, &mut rand::thread_rng());

    let attempt = store
        .insert_attempt(NewAttempt {
            quiz_id: quiz.id,
            student_id: req.student_id,
            enrollment_id: Some(enrollment.id),
            start_time: begin.then_some(now),
            question_order,
            created_at: now,
        })
        .await?;

    if begin {
        store.mark_enrollment_started(enrollment.id, now).await?;
    }

    tracing::info!(
        attempt_id = attempt.id,
        quiz_id = quiz.id,
        student_id = req.student_id,
        begun = begin,
        "Attempt created"
    );

    Ok(StartedAttempt {
        questions: present(&questions, &attempt.question_order),
        attempt,
    })
}

/// Sets the start time of a prepared attempt.
///
/// The enrollment is re-checked here, since it may have been cancelled, expired
/// or superseded since the attempt was prepared.
pub async fn begin(
    store: &dyn QuizStore,
    attempt_id: i64,
    student_id: i64,
    now: DateTime<Utc>,
) -> Result<Transition, AppError> {
    let attempt = load_owned_attempt(store, attempt_id, student_id).await?;
    if attempt.status.is_terminal() {
        return Ok(Transition::AlreadyTerminal(attempt.status));
    }
    if attempt.start_time.is_some() {
        return Ok(Transition::Applied(attempt));
    }

    let quiz = load_quiz(store, attempt.quiz_id).await?;
    let enrollment = match attempt.enrollment_id {
        Some(id) => store.get_enrollment(id).await?,
        None => None,
    };
    match &enrollment {
        // The attempt being begun is the enrollment's own, so it does not count against it.
        Some(enrollment) => match evaluate(enrollment, &quiz, false, now).reason {
            None | Some(UnavailableReason::AlreadyAttempted) => {}
            Some(reason) => return Err(AppError::NotAvailable(reason)),
        },
        None => start_gate(&quiz, false, now).map_err(|block| AppError::NotAvailable(window_reason(block)))?,
    }

    let changed = store.begin_attempt(attempt.id, now).await?;
    let current = store
        .get_attempt(attempt.id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Attempt {} not found", attempt.id)))?;
    if !changed && current.status.is_terminal() {
        return Ok(Transition::AlreadyTerminal(current.status));
    }

    if let Some(enrollment) = enrollment {
        store.mark_enrollment_started(enrollment.id, now).await?;
    }
    Ok(Transition::Applied(current))
}

/// Learner-initiated completion, guarded by `status = 'in_progress'`.
pub async fn submit(
    store: &dyn QuizStore,
    attempt_id: i64,
    student_id: i64,
    answers: Vec<SubmittedAnswer>,
    now: DateTime<Utc>,
) -> Result<Transition, AppError> {
    let attempt = load_owned_attempt(store, attempt_id, student_id).await?;
    if attempt.status.is_terminal() {
        return Ok(Transition::AlreadyTerminal(attempt.status));
    }
    if attempt.start_time.is_none() {
        return Err(AppError::BadRequest(format!(
            "attempt {} has not begun",
            attempt.id
        )));
    }

    let answer_key: HashMap<i64, String> = store
        .list_questions(attempt.quiz_id)
        .await?
        .into_iter()
        .map(|q| (q.id, q.answer))
        .collect();
    let (total_correct, score) = score_answers(&attempt.question_order, &answers, &answer_key)?;

    let completed = CompletedAttempt {
        answers,
        score,
        total_correct,
        end_time: now,
    };
    if !store.complete_attempt(attempt.id, &completed).await? {
        // Lost the race, most likely to the sweeper.
        let status = store
            .get_attempt(attempt.id)
            .await?
            .map(|a| a.status)
            .ok_or_else(|| AppError::NotFound(format!("Attempt {} not found", attempt.id)))?;
        tracing::warn!(attempt_id = attempt.id, status = %status, "Submit observed an already finalized attempt");
        return Ok(Transition::AlreadyTerminal(status));
    }

    if let Some(enrollment_id) = attempt.enrollment_id {
        store
            .transition_enrollment(enrollment_id, EnrollmentStatus::Enrolled, EnrollmentStatus::Completed, now)
            .await?;
    }

    let attempt = store
        .get_attempt(attempt.id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Attempt {} not found", attempt.id)))?;
    tracing::info!(attempt_id = attempt.id, score, total_correct, "Attempt submitted");
    Ok(Transition::Applied(attempt))
}

/// Status and, once the disclosure gate has passed, the scored result.
pub async fn result(
    store: &dyn QuizStore,
    attempt_id: i64,
    student_id: i64,
    now: DateTime<Utc>,
) -> Result<AttemptResultView, AppError> {
    let attempt = load_owned_attempt(store, attempt_id, student_id).await?;
    let quiz = load_quiz(store, attempt.quiz_id).await?;
    let questions = store.list_questions(quiz.id).await?;
    Ok(disclose(&attempt, &quiz, &questions, now))
}
