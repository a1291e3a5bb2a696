// src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, types::Json};

use crate::{
    error::AppError,
    models::{
        attempt::{AttemptRow, AttemptStatus, CompletedAttempt, NewAttempt, OpenAttempt, QuizAttempt},
        enrollment::{Enrollment, EnrollmentRow, EnrollmentStatus, NewEnrollment, UnavailableReason},
        question::{CreateQuestionRequest, Question},
        quiz::{NewQuiz, Quiz, QuizRow, QuizStatus},
    },
    store::QuizStore,
};

const QUIZ_COLUMNS: &str = "\
    id, educator_id, title, scheduling_status, start_time, timezone, duration, status, \
    created_at, updated_at";

const ENROLLMENT_COLUMNS: &str = "\
    id, quiz_id, student_id, enrolled_at, status, is_reassignment, parent_enrollment_id, \
    reassignment_reason, started_at, completed_at";

const ATTEMPT_COLUMNS: &str = "\
    id, quiz_id, student_id, enrollment_id, status, start_time, end_time, score, total_correct, \
    answers, question_order, created_at, updated_at";

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| {
        tracing::error!("{}: {:?}", context, e);
        AppError::InternalServerError(e.to_string())
    }
}

fn violation_code(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|d| d.code())
        .map(|c| c.into_owned())
}

async fn insert_enrollment_with<'e, E>(executor: E, enrollment: &NewEnrollment) -> Result<Enrollment, AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, EnrollmentRow>(&format!(
        r#"
        INSERT INTO enrollments
        (quiz_id, student_id, enrolled_at, status, is_reassignment, parent_enrollment_id, reassignment_reason)
        VALUES ($1, $2, $3, 'enrolled', $4, $5, $6)
        RETURNING {}
        "#,
        ENROLLMENT_COLUMNS
    ))
    .bind(enrollment.quiz_id)
    .bind(enrollment.student_id)
    .bind(enrollment.enrolled_at)
    .bind(enrollment.is_reassignment)
    .bind(enrollment.parent_enrollment_id)
    .bind(&enrollment.reassignment_reason)
    .fetch_one(executor)
    .await
    .map_err(|e| match violation_code(&e).as_deref() {
        // uq_enrollments_open: one enrolled row per student and quiz
        Some(UNIQUE_VIOLATION) => AppError::Conflict(format!(
            "student {} already has an open enrollment in quiz {}",
            enrollment.student_id, enrollment.quiz_id
        )),
        Some(FOREIGN_KEY_VIOLATION) => AppError::IntegrityViolation(format!(
            "enrollment references a missing quiz or parent enrollment ({:?})",
            enrollment.parent_enrollment_id
        )),
        _ => {
            tracing::error!("Failed to insert enrollment: {:?}", e);
            AppError::InternalServerError(e.to_string())
        }
    })?;

    row.try_into()
}

/// Postgres-backed store. Status transitions are single `UPDATE ... WHERE status = ...`
/// statements whose affected-row count decides the outcome.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuizStore for PgStore {
    async fn insert_quiz(&self, quiz: NewQuiz) -> Result<Quiz, AppError> {
        let row = sqlx::query_as::<_, QuizRow>(&format!(
            r#"
            INSERT INTO quizzes
            (educator_id, title, scheduling_status, start_time, timezone, duration, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'draft', $7, $7)
            RETURNING {}
            "#,
            QUIZ_COLUMNS
        ))
        .bind(quiz.educator_id)
        .bind(&quiz.title)
        .bind(quiz.scheduling_status.as_str())
        .bind(quiz.start_time)
        .bind(&quiz.timezone)
        .bind(quiz.duration)
        .bind(quiz.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to insert quiz"))?;

        row.try_into()
    }

    async fn get_quiz(&self, id: i64) -> Result<Option<Quiz>, AppError> {
        sqlx::query_as::<_, QuizRow>(&format!("SELECT {} FROM quizzes WHERE id = $1", QUIZ_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to fetch quiz"))?
            .map(Quiz::try_from)
            .transpose()
    }

    async fn schedule_quiz(
        &self,
        id: i64,
        start_time: DateTime<Utc>,
        timezone: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE quizzes
            SET start_time = $2, timezone = $3, updated_at = $4
            WHERE id = $1 AND scheduling_status = 'deferred' AND status = 'draft'
            "#,
        )
        .bind(id)
        .bind(start_time)
        .bind(timezone)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to schedule quiz"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn transition_quiz(
        &self,
        id: i64,
        from: QuizStatus,
        to: QuizStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE quizzes SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to update quiz status"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_question(&self, quiz_id: i64, req: CreateQuestionRequest) -> Result<Question, AppError> {
        sqlx::query_as::<_, Question>(
            r#"
            INSERT INTO questions (quiz_id, position, content, options, answer)
            VALUES (
                $1,
                (SELECT COALESCE(MAX(position), 0) + 1 FROM questions WHERE quiz_id = $1),
                $2, $3, $4
            )
            RETURNING id, quiz_id, position, content, options, answer
            "#,
        )
        .bind(quiz_id)
        .bind(&req.content)
        .bind(Json(&req.options))
        .bind(&req.answer)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if violation_code(&e).as_deref() == Some(FOREIGN_KEY_VIOLATION) {
                AppError::NotFound(format!("Quiz {} not found", quiz_id))
            } else {
                tracing::error!("Failed to insert question: {:?}", e);
                AppError::InternalServerError(e.to_string())
            }
        })
    }

    async fn list_questions(&self, quiz_id: i64) -> Result<Vec<Question>, AppError> {
        sqlx::query_as::<_, Question>(
            r#"
            SELECT id, quiz_id, position, content, options, answer
            FROM questions
            WHERE quiz_id = $1
            ORDER BY position, id
            "#,
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to fetch questions"))
    }

    async fn insert_enrollment(&self, enrollment: NewEnrollment) -> Result<Enrollment, AppError> {
        insert_enrollment_with(&self.pool, &enrollment).await
    }

    async fn supersede_enrollment(&self, parent_id: i64, replacement: NewEnrollment) -> Result<Enrollment, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_error("Failed to open transaction"))?;

        sqlx::query("UPDATE enrollments SET status = 'cancelled' WHERE id = $1 AND status = 'enrolled'")
            .bind(parent_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error("Failed to cancel superseded enrollment"))?;

        // Rolls back the cancel on drop if the insert fails.
        let enrollment = insert_enrollment_with(&mut *tx, &replacement).await?;

        tx.commit().await.map_err(db_error("Failed to commit reassignment"))?;
        Ok(enrollment)
    }

    async fn get_enrollment(&self, id: i64) -> Result<Option<Enrollment>, AppError> {
        sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {} FROM enrollments WHERE id = $1",
            ENROLLMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to fetch enrollment"))?
        .map(Enrollment::try_from)
        .transpose()
    }

    async fn list_enrollments(&self, quiz_id: i64, student_id: i64) -> Result<Vec<Enrollment>, AppError> {
        sqlx::query_as::<_, EnrollmentRow>(&format!(
            r#"
            SELECT {}
            FROM enrollments
            WHERE quiz_id = $1 AND student_id = $2
            ORDER BY enrolled_at, id
            "#,
            ENROLLMENT_COLUMNS
        ))
        .bind(quiz_id)
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list enrollments"))?
        .into_iter()
        .map(Enrollment::try_from)
        .collect()
    }

    async fn list_student_enrollments(&self, student_id: i64) -> Result<Vec<Enrollment>, AppError> {
        sqlx::query_as::<_, EnrollmentRow>(&format!(
            "SELECT {} FROM enrollments WHERE student_id = $1 ORDER BY enrolled_at, id",
            ENROLLMENT_COLUMNS
        ))
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list student enrollments"))?
        .into_iter()
        .map(Enrollment::try_from)
        .collect()
    }

    async fn transition_enrollment(
        &self,
        id: i64,
        from: EnrollmentStatus,
        to: EnrollmentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE enrollments
            SET status = $3,
                completed_at = CASE WHEN $3 = 'completed' THEN $4 ELSE completed_at END
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to update enrollment status"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_enrollment_started(&self, id: i64, now: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE enrollments SET started_at = $2 WHERE id = $1 AND started_at IS NULL")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to mark enrollment started"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_attempt(&self, attempt: NewAttempt) -> Result<QuizAttempt, AppError> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            r#"
            INSERT INTO quiz_attempts
            (quiz_id, student_id, enrollment_id, status, start_time, answers, question_order, created_at, updated_at)
            VALUES ($1, $2, $3, 'in_progress', $4, '[]'::jsonb, $5, $6, $6)
            RETURNING {}
            "#,
            ATTEMPT_COLUMNS
        ))
        .bind(attempt.quiz_id)
        .bind(attempt.student_id)
        .bind(attempt.enrollment_id)
        .bind(attempt.start_time)
        .bind(Json(&attempt.question_order))
        .bind(attempt.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if violation_code(&e).as_deref() == Some(UNIQUE_VIOLATION) {
                AppError::NotAvailable(UnavailableReason::AlreadyAttempted)
            } else {
                tracing::error!("Failed to insert attempt: {:?}", e);
                AppError::InternalServerError(e.to_string())
            }
        })?;

        row.try_into()
    }

    async fn get_attempt(&self, id: i64) -> Result<Option<QuizAttempt>, AppError> {
        sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {} FROM quiz_attempts WHERE id = $1",
            ATTEMPT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to fetch attempt"))?
        .map(QuizAttempt::try_from)
        .transpose()
    }

    async fn has_attempt(&self, enrollment: &Enrollment) -> Result<bool, AppError> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM quiz_attempts
                WHERE enrollment_id = $1
                   OR ($2 AND enrollment_id IS NULL AND student_id = $3 AND quiz_id = $4)
            )
            "#,
        )
        .bind(enrollment.id)
        .bind(!enrollment.is_reassignment)
        .bind(enrollment.student_id)
        .bind(enrollment.quiz_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to check attempts"))
    }

    async fn begin_attempt(&self, id: i64, now: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE quiz_attempts
            SET start_time = $2, updated_at = $2
            WHERE id = $1 AND status = 'in_progress' AND start_time IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to begin attempt"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete_attempt(&self, id: i64, result: &CompletedAttempt) -> Result<bool, AppError> {
        let outcome = sqlx::query(
            r#"
            UPDATE quiz_attempts
            SET status = 'completed',
                answers = $2,
                score = $3,
                total_correct = $4,
                end_time = $5,
                updated_at = $5
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(id)
        .bind(Json(&result.answers))
        .bind(result.score)
        .bind(result.total_correct)
        .bind(result.end_time)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to complete attempt"))?;

        Ok(outcome.rows_affected() == 1)
    }

    async fn list_open_attempts(&self) -> Result<Vec<OpenAttempt>, AppError> {
        sqlx::query_as::<_, OpenAttempt>(
            r#"
            SELECT a.id, a.quiz_id, a.start_time, a.created_at, q.duration
            FROM quiz_attempts a
            JOIN quizzes q ON q.id = a.quiz_id
            WHERE a.status = 'in_progress'
            ORDER BY a.id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to list open attempts"))
    }

    async fn force_attempt_status(
        &self,
        id: i64,
        to: AttemptStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE quiz_attempts
            SET status = $2, end_time = $3, updated_at = $3
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to force attempt status"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_purgeable_answers(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM quiz_attempts
            WHERE status <> 'in_progress' AND updated_at < $1 AND answers <> '[]'::jsonb
            "#,
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to count purgeable answers"))?;

        Ok(count.max(0) as u64)
    }

    async fn purge_answers(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE quiz_attempts
            SET answers = '[]'::jsonb
            WHERE status <> 'in_progress' AND updated_at < $1 AND answers <> '[]'::jsonb
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to purge old answers"))?;

        Ok(result.rows_affected())
    }
}
