// src/store/mod.rs

//! Persistence seam. Every status transition is a single conditional write that
//! reports whether it touched a row; callers never read-modify-write a status.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::AppError,
    models::{
        attempt::{AttemptStatus, CompletedAttempt, NewAttempt, OpenAttempt, QuizAttempt},
        enrollment::{Enrollment, EnrollmentStatus, NewEnrollment},
        question::{CreateQuestionRequest, Question},
        quiz::{NewQuiz, Quiz, QuizStatus},
    },
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait QuizStore: Send + Sync {
    // Quizzes

    async fn insert_quiz(&self, quiz: NewQuiz) -> Result<Quiz, AppError>;

    async fn get_quiz(&self, id: i64) -> Result<Option<Quiz>, AppError>;

    /// Sets the start time of a deferred draft. False if the quiz is not a deferred draft.
    async fn schedule_quiz(
        &self,
        id: i64,
        start_time: DateTime<Utc>,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// `UPDATE ... WHERE status = from`. False if the quiz was not in `from`.
    async fn transition_quiz(
        &self,
        id: i64,
        from: QuizStatus,
        to: QuizStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    // Questions

    async fn insert_question(&self, quiz_id: i64, req: CreateQuestionRequest) -> Result<Question, AppError>;

    /// Questions of a quiz in canonical order.
    async fn list_questions(&self, quiz_id: i64) -> Result<Vec<Question>, AppError>;

    // Enrollments

    /// Fails with `IntegrityViolation` if `parent_enrollment_id` does not resolve, and
    /// with `Conflict` if the student already has an enrolled row for the quiz.
    async fn insert_enrollment(&self, enrollment: NewEnrollment) -> Result<Enrollment, AppError>;

    /// Cancels `parent_id` if it is still enrolled and inserts `replacement`, as one
    /// unit. On failure neither write is kept.
    async fn supersede_enrollment(&self, parent_id: i64, replacement: NewEnrollment) -> Result<Enrollment, AppError>;

    async fn get_enrollment(&self, id: i64) -> Result<Option<Enrollment>, AppError>;

    /// All enrollments of one student for one quiz, oldest first.
    async fn list_enrollments(&self, quiz_id: i64, student_id: i64) -> Result<Vec<Enrollment>, AppError>;

    /// All enrollments of one student, oldest first.
    async fn list_student_enrollments(&self, student_id: i64) -> Result<Vec<Enrollment>, AppError>;

    async fn transition_enrollment(
        &self,
        id: i64,
        from: EnrollmentStatus,
        to: EnrollmentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Sets `started_at` once.
    async fn mark_enrollment_started(&self, id: i64, now: DateTime<Utc>) -> Result<bool, AppError>;

    // Attempts

    /// Fails with `NotAvailable(AlreadyAttempted)` if the enrollment already has an attempt.
    async fn insert_attempt(&self, attempt: NewAttempt) -> Result<QuizAttempt, AppError>;

    async fn get_attempt(&self, id: i64) -> Result<Option<QuizAttempt>, AppError>;

    /// Whether an attempt runs under this enrollment. Original enrollments also
    /// count attempts recorded without an enrollment for the same student and quiz.
    async fn has_attempt(&self, enrollment: &Enrollment) -> Result<bool, AppError>;

    /// `WHERE status = 'in_progress' AND start_time IS NULL`.
    async fn begin_attempt(&self, id: i64, now: DateTime<Utc>) -> Result<bool, AppError>;

    /// `WHERE status = 'in_progress'`.
    async fn complete_attempt(&self, id: i64, result: &CompletedAttempt) -> Result<bool, AppError>;

    async fn list_open_attempts(&self) -> Result<Vec<OpenAttempt>, AppError>;

    /// Forces an open attempt into a terminal status. `WHERE status = 'in_progress'`.
    async fn force_attempt_status(
        &self,
        id: i64,
        to: AttemptStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Terminal attempts last updated before `cutoff` that still carry answers.
    async fn count_purgeable_answers(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;

    /// Empties `answers` of those attempts, keeping the rows.
    async fn purge_answers(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError>;
}
