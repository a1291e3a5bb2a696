// src/models/attempt.rs

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};

use crate::{error::AppError, models::question::PublicQuestion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    Abandoned,
    Timeout,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Abandoned => "abandoned",
            AttemptStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            AttemptStatus::InProgress => false,
            AttemptStatus::Completed | AttemptStatus::Abandoned | AttemptStatus::Timeout => true,
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(AttemptStatus::InProgress),
            "completed" => Ok(AttemptStatus::Completed),
            "abandoned" => Ok(AttemptStatus::Abandoned),
            "timeout" => Ok(AttemptStatus::Timeout),
            other => Err(AppError::IntegrityViolation(format!(
                "unknown attempt status '{}'",
                other
            ))),
        }
    }
}

/// One learner response. Attempts keep these in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedAnswer {
    pub question_id: i64,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub id: i64,
    pub quiz_id: i64,
    pub student_id: i64,
    pub enrollment_id: Option<i64>,
    pub status: AttemptStatus,

    /// When the learner actually began. `None` for a prepared attempt.
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub score: Option<f64>,
    pub total_correct: Option<i32>,

    /// Never null; empty means "no answers yet" or "purged by retention".
    pub answers: Vec<SubmittedAnswer>,

    /// Shuffled question ids as presented to the learner.
    pub question_order: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuizAttempt {
    /// The instant elapsed time is measured from.
    pub fn reference_time(&self) -> DateTime<Utc> {
        self.start_time.unwrap_or(self.created_at)
    }
}

/// Represents the 'quiz_attempts' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct AttemptRow {
    pub id: i64,
    pub quiz_id: i64,
    pub student_id: i64,
    pub enrollment_id: Option<i64>,
    pub status: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub score: Option<f64>,
    pub total_correct: Option<i32>,
    pub answers: Json<Vec<SubmittedAnswer>>,
    pub question_order: Json<Vec<i64>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AttemptRow> for QuizAttempt {
    type Error = AppError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        Ok(QuizAttempt {
            id: row.id,
            quiz_id: row.quiz_id,
            student_id: row.student_id,
            enrollment_id: row.enrollment_id,
            status: row.status.parse()?,
            start_time: row.start_time,
            end_time: row.end_time,
            score: row.score,
            total_correct: row.total_correct,
            answers: row.answers.0,
            question_order: row.question_order.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub quiz_id: i64,
    pub student_id: i64,
    pub enrollment_id: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub question_order: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

/// Values written by a successful submit.
#[derive(Debug, Clone)]
pub struct CompletedAttempt {
    pub answers: Vec<SubmittedAnswer>,
    pub score: f64,
    pub total_correct: i32,
    pub end_time: DateTime<Utc>,
}

/// An `in_progress` attempt joined with its quiz duration, as seen by the sweeper.
#[derive(Debug, Clone, FromRow)]
pub struct OpenAttempt {
    pub id: i64,
    pub quiz_id: i64,
    pub start_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub duration: i32,
}

/// DTO for starting (or preparing) an attempt.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAttemptRequest {
    pub quiz_id: i64,
    pub student_id: i64,
    pub enrollment_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginAttemptRequest {
    pub student_id: i64,
}

/// DTO for submitting an attempt.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAttemptRequest {
    pub student_id: i64,
    pub answers: Vec<SubmittedAnswer>,
}

#[derive(Debug, Deserialize)]
pub struct ResultQuery {
    pub student_id: i64,
}

/// What the learner sees after starting: the attempt and its questions in presentation order.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedAttempt {
    pub attempt: QuizAttempt,
    pub questions: Vec<PublicQuestion>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub attempt_id: i64,
    pub status: AttemptStatus,
    pub results_available_at: DateTime<Utc>,
}

/// One question of a disclosed result, in the attempt's captured order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultItem {
    pub question_id: i64,
    pub content: String,
    pub submitted: Option<String>,
    pub correct_answer: String,
    pub is_correct: bool,
}

/// Outcome of reading an attempt's result.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AttemptResultView {
    /// Attempt still running.
    InProgress {
        #[serde(rename = "attemptId")]
        attempt_id: i64,
        #[serde(rename = "startTime")]
        start_time: Option<DateTime<Utc>>,
    },
    /// Terminal, but the disclosure gate has not passed yet.
    TooEarly {
        #[serde(rename = "attemptId")]
        attempt_id: i64,
        status: AttemptStatus,
        #[serde(rename = "availableAt")]
        available_at: DateTime<Utc>,
    },
    Ready {
        #[serde(rename = "attemptId")]
        attempt_id: i64,
        status: AttemptStatus,
        score: Option<f64>,
        #[serde(rename = "totalCorrect")]
        total_correct: Option<i32>,
        #[serde(rename = "totalQuestions")]
        total_questions: usize,
        items: Vec<ResultItem>,
    },
}
