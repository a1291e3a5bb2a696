// src/store/memory.rs

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;

use crate::{
    error::AppError,
    models::{
        attempt::{AttemptStatus, CompletedAttempt, NewAttempt, OpenAttempt, QuizAttempt},
        enrollment::{Enrollment, EnrollmentStatus, NewEnrollment, UnavailableReason},
        question::{CreateQuestionRequest, Question},
        quiz::{NewQuiz, Quiz, QuizStatus, SchedulingStatus},
    },
    store::QuizStore,
};

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    quizzes: BTreeMap<i64, Quiz>,
    questions: BTreeMap<i64, Question>,
    enrollments: BTreeMap<i64, Enrollment>,
    attempts: BTreeMap<i64, QuizAttempt>,
    /// Attempt ids whose writes fail, for exercising failure paths.
    failing: HashSet<i64>,
    /// Statuses another writer lands just before the next write to the attempt.
    preempted: HashMap<i64, AttemptStatus>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_enrollment(&mut self, enrollment: NewEnrollment) -> Result<Enrollment, AppError> {
        if let Some(parent_id) = enrollment.parent_enrollment_id {
            if !self.enrollments.contains_key(&parent_id) {
                return Err(AppError::IntegrityViolation(format!(
                    "parent enrollment {} does not exist",
                    parent_id
                )));
            }
        }
        if self.enrollments.values().any(|e| {
            e.quiz_id == enrollment.quiz_id
                && e.student_id == enrollment.student_id
                && e.status == EnrollmentStatus::Enrolled
        }) {
            return Err(AppError::Conflict(format!(
                "student {} already has an open enrollment in quiz {}",
                enrollment.student_id, enrollment.quiz_id
            )));
        }
        let id = self.next_id();
        let enrollment = Enrollment {
            id,
            quiz_id: enrollment.quiz_id,
            student_id: enrollment.student_id,
            enrolled_at: enrollment.enrolled_at,
            status: EnrollmentStatus::Enrolled,
            is_reassignment: enrollment.is_reassignment,
            parent_enrollment_id: enrollment.parent_enrollment_id,
            reassignment_reason: enrollment.reassignment_reason,
            started_at: None,
            completed_at: None,
        };
        self.enrollments.insert(id, enrollment.clone());
        Ok(enrollment)
    }

    fn apply_preemption(&mut self, attempt_id: i64) {
        if let Some(status) = self.preempted.remove(&attempt_id) {
            if let Some(a) = self.attempts.get_mut(&attempt_id) {
                a.status = status;
            }
        }
    }

    fn check_writable(&self, attempt_id: i64) -> Result<(), AppError> {
        if self.failing.contains(&attempt_id) {
            return Err(AppError::InternalServerError(format!(
                "write to attempt {} failed",
                attempt_id
            )));
        }
        Ok(())
    }
}

/// Process-local store with the same conditional-write semantics as `PgStore`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write to this attempt fail.
    pub fn fail_writes_for(&self, attempt_id: i64) {
        self.lock().failing.insert(attempt_id);
    }

    /// Makes the next write to this attempt find it already moved to `status`,
    /// as if a concurrent writer got there between the caller's read and write.
    pub fn preempt_next_write(&self, attempt_id: i64, status: AttemptStatus) {
        self.lock().preempted.insert(attempt_id, status);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl QuizStore for MemoryStore {
    async fn insert_quiz(&self, quiz: NewQuiz) -> Result<Quiz, AppError> {
        let mut inner = self.lock();
        let id = inner.next_id();
        let quiz = Quiz {
            id,
            educator_id: quiz.educator_id,
            title: quiz.title,
            scheduling_status: quiz.scheduling_status,
            start_time: quiz.start_time,
            timezone: quiz.timezone,
            duration: quiz.duration,
            status: QuizStatus::Draft,
            created_at: quiz.created_at,
            updated_at: quiz.created_at,
        };
        inner.quizzes.insert(id, quiz.clone());
        Ok(quiz)
    }

    async fn get_quiz(&self, id: i64) -> Result<Option<Quiz>, AppError> {
        Ok(self.lock().quizzes.get(&id).cloned())
    }

    async fn schedule_quiz(
        &self,
        id: i64,
        start_time: DateTime<Utc>,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut inner = self.lock();
        match inner.quizzes.get_mut(&id) {
            Some(quiz)
                if quiz.scheduling_status == SchedulingStatus::Deferred
                    && quiz.status == QuizStatus::Draft =>
            {
                quiz.start_time = Some(start_time);
                quiz.timezone = Some(timezone.to_string());
                quiz.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition_quiz(
        &self,
        id: i64,
        from: QuizStatus,
        to: QuizStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut inner = self.lock();
        match inner.quizzes.get_mut(&id) {
            Some(quiz) if quiz.status == from => {
                quiz.status = to;
                quiz.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_question(&self, quiz_id: i64, req: CreateQuestionRequest) -> Result<Question, AppError> {
        let mut inner = self.lock();
        if !inner.quizzes.contains_key(&quiz_id) {
            return Err(AppError::NotFound(format!("Quiz {} not found", quiz_id)));
        }
        let position = inner.questions.values().filter(|q| q.quiz_id == quiz_id).count() as i32 + 1;
        let id = inner.next_id();
        let question = Question {
            id,
            quiz_id,
            position,
            content: req.content,
            options: Json(req.options),
            answer: req.answer,
        };
        inner.questions.insert(id, question.clone());
        Ok(question)
    }

    async fn list_questions(&self, quiz_id: i64) -> Result<Vec<Question>, AppError> {
        let mut questions: Vec<Question> = self
            .lock()
            .questions
            .values()
            .filter(|q| q.quiz_id == quiz_id)
            .cloned()
            .collect();
        questions.sort_by_key(|q| (q.position, q.id));
        Ok(questions)
    }

    async fn insert_enrollment(&self, enrollment: NewEnrollment) -> Result<Enrollment, AppError> {
        self.lock().insert_enrollment(enrollment)
    }

    async fn supersede_enrollment(&self, parent_id: i64, replacement: NewEnrollment) -> Result<Enrollment, AppError> {
        let mut inner = self.lock();
        let reopen = match inner.enrollments.get_mut(&parent_id) {
            Some(parent) if parent.status == EnrollmentStatus::Enrolled => {
                parent.status = EnrollmentStatus::Cancelled;
                true
            }
            _ => false,
        };
        let inserted = inner.insert_enrollment(replacement);
        if inserted.is_err() && reopen {
            if let Some(parent) = inner.enrollments.get_mut(&parent_id) {
                parent.status = EnrollmentStatus::Enrolled;
            }
        }
        inserted
    }

    async fn get_enrollment(&self, id: i64) -> Result<Option<Enrollment>, AppError> {
        Ok(self.lock().enrollments.get(&id).cloned())
    }

    async fn list_enrollments(&self, quiz_id: i64, student_id: i64) -> Result<Vec<Enrollment>, AppError> {
        let mut out: Vec<Enrollment> = self
            .lock()
            .enrollments
            .values()
            .filter(|e| e.quiz_id == quiz_id && e.student_id == student_id)
            .cloned()
            .collect();
        out.sort_by_key(|e| (e.enrolled_at, e.id));
        Ok(out)
    }

    async fn list_student_enrollments(&self, student_id: i64) -> Result<Vec<Enrollment>, AppError> {
        let mut out: Vec<Enrollment> = self
            .lock()
            .enrollments
            .values()
            .filter(|e| e.student_id == student_id)
            .cloned()
            .collect();
        out.sort_by_key(|e| (e.enrolled_at, e.id));
        Ok(out)
    }

    async fn transition_enrollment(
        &self,
        id: i64,
        from: EnrollmentStatus,
        to: EnrollmentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut inner = self.lock();
        match inner.enrollments.get_mut(&id) {
            Some(enrollment) if enrollment.status == from => {
                enrollment.status = to;
                if to == EnrollmentStatus::Completed {
                    enrollment.completed_at = Some(now);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_enrollment_started(&self, id: i64, now: DateTime<Utc>) -> Result<bool, AppError> {
        let mut inner = self.lock();
        match inner.enrollments.get_mut(&id) {
            Some(enrollment) if enrollment.started_at.is_none() => {
                enrollment.started_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_attempt(&self, attempt: NewAttempt) -> Result<QuizAttempt, AppError> {
        let mut inner = self.lock();
        if let Some(enrollment_id) = attempt.enrollment_id {
            if inner.attempts.values().any(|a| a.enrollment_id == Some(enrollment_id)) {
                return Err(AppError::NotAvailable(UnavailableReason::AlreadyAttempted));
            }
        }
        let id = inner.next_id();
        let attempt = QuizAttempt {
            id,
            quiz_id: attempt.quiz_id,
            student_id: attempt.student_id,
            enrollment_id: attempt.enrollment_id,
            status: AttemptStatus::InProgress,
            start_time: attempt.start_time,
            end_time: None,
            score: None,
            total_correct: None,
            answers: Vec::new(),
            question_order: attempt.question_order,
            created_at: attempt.created_at,
            updated_at: attempt.created_at,
        };
        inner.attempts.insert(id, attempt.clone());
        Ok(attempt)
    }

    async fn get_attempt(&self, id: i64) -> Result<Option<QuizAttempt>, AppError> {
        Ok(self.lock().attempts.get(&id).cloned())
    }

    async fn has_attempt(&self, enrollment: &Enrollment) -> Result<bool, AppError> {
        Ok(self.lock().attempts.values().any(|a| match a.enrollment_id {
            Some(id) => id == enrollment.id,
            None => {
                !enrollment.is_reassignment
                    && a.student_id == enrollment.student_id
                    && a.quiz_id == enrollment.quiz_id
            }
        }))
    }

    async fn begin_attempt(&self, id: i64, now: DateTime<Utc>) -> Result<bool, AppError> {
        let mut inner = self.lock();
        inner.check_writable(id)?;
        inner.apply_preemption(id);
        match inner.attempts.get_mut(&id) {
            Some(a) if a.status == AttemptStatus::InProgress && a.start_time.is_none() => {
                a.start_time = Some(now);
                a.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_attempt(&self, id: i64, result: &CompletedAttempt) -> Result<bool, AppError> {
        let mut inner = self.lock();
        inner.check_writable(id)?;
        inner.apply_preemption(id);
        match inner.attempts.get_mut(&id) {
            Some(a) if a.status == AttemptStatus::InProgress => {
                a.status = AttemptStatus::Completed;
                a.answers = result.answers.clone();
                a.score = Some(result.score);
                a.total_correct = Some(result.total_correct);
                a.end_time = Some(result.end_time);
                a.updated_at = result.end_time;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_open_attempts(&self) -> Result<Vec<OpenAttempt>, AppError> {
        let inner = self.lock();
        Ok(inner
            .attempts
            .values()
            .filter(|a| a.status == AttemptStatus::InProgress)
            .filter_map(|a| {
                inner.quizzes.get(&a.quiz_id).map(|q| OpenAttempt {
                    id: a.id,
                    quiz_id: a.quiz_id,
                    start_time: a.start_time,
                    created_at: a.created_at,
                    duration: q.duration,
                })
            })
            .collect())
    }

    async fn force_attempt_status(
        &self,
        id: i64,
        to: AttemptStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut inner = self.lock();
        inner.check_writable(id)?;
        inner.apply_preemption(id);
        match inner.attempts.get_mut(&id) {
            Some(a) if a.status == AttemptStatus::InProgress => {
                a.status = to;
                a.end_time = Some(now);
                a.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_purgeable_answers(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        Ok(self
            .lock()
            .attempts
            .values()
            .filter(|a| a.status.is_terminal() && a.updated_at < cutoff && !a.answers.is_empty())
            .count() as u64)
    }

    async fn purge_answers(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let mut inner = self.lock();
        let mut purged = 0;
        for a in inner.attempts.values_mut() {
            if a.status.is_terminal() && a.updated_at < cutoff && !a.answers.is_empty() {
                a.answers.clear();
                purged += 1;
            }
        }
        Ok(purged)
    }
}
