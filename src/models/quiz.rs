// src/models/quiz.rs

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::error::AppError;

/// How a quiz's start time is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingStatus {
    /// Start time fixed when the quiz is created.
    Legacy,
    /// Start time supplied later, before publishing.
    Deferred,
}

impl SchedulingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulingStatus::Legacy => "legacy",
            SchedulingStatus::Deferred => "deferred",
        }
    }
}

impl fmt::Display for SchedulingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchedulingStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(SchedulingStatus::Legacy),
            "deferred" => Ok(SchedulingStatus::Deferred),
            other => Err(AppError::IntegrityViolation(format!(
                "unknown scheduling status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizStatus {
    Draft,
    Published,
    Archived,
}

impl QuizStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuizStatus::Draft => "draft",
            QuizStatus::Published => "published",
            QuizStatus::Archived => "archived",
        }
    }

    /// Allowed educator-driven transitions.
    pub fn can_transition_to(&self, next: QuizStatus) -> bool {
        matches!(
            (self, next),
            (QuizStatus::Draft, QuizStatus::Published)
                | (QuizStatus::Draft, QuizStatus::Archived)
                | (QuizStatus::Published, QuizStatus::Archived)
        )
    }
}

impl fmt::Display for QuizStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuizStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(QuizStatus::Draft),
            "published" => Ok(QuizStatus::Published),
            "archived" => Ok(QuizStatus::Archived),
            other => Err(AppError::IntegrityViolation(format!(
                "unknown quiz status '{}'",
                other
            ))),
        }
    }
}

/// A quiz as the rest of the crate sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: i64,
    pub educator_id: i64,
    pub title: String,
    pub scheduling_status: SchedulingStatus,

    /// Canonical UTC instant. `None` only for a deferred quiz that is not yet scheduled.
    pub start_time: Option<DateTime<Utc>>,

    /// IANA zone used to interpret and display `start_time`.
    pub timezone: Option<String>,

    /// Minutes.
    pub duration: i32,
    pub status: QuizStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Represents the 'quizzes' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct QuizRow {
    pub id: i64,
    pub educator_id: i64,
    pub title: String,
    pub scheduling_status: String,
    pub start_time: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    pub duration: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<QuizRow> for Quiz {
    type Error = AppError;

    fn try_from(row: QuizRow) -> Result<Self, Self::Error> {
        Ok(Quiz {
            id: row.id,
            educator_id: row.educator_id,
            title: row.title,
            scheduling_status: row.scheduling_status.parse()?,
            start_time: row.start_time,
            timezone: row.timezone,
            duration: row.duration,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A validated quiz ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewQuiz {
    pub educator_id: i64,
    pub title: String,
    pub scheduling_status: SchedulingStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub timezone: Option<String>,
    pub duration: i32,
    pub created_at: DateTime<Utc>,
}

/// DTO for creating a quiz.
///
/// `start_time` is a zone-less wall-clock string (e.g. "2025-09-03T08:46") read in `timezone`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuizRequest {
    pub educator_id: i64,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    pub scheduling_status: SchedulingStatus,
    pub start_time: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub timezone: Option<String>,
    #[validate(range(min = 1, max = 1440, message = "duration must be between 1 and 1440 minutes"))]
    pub duration: i32,
}

/// DTO for the deferred scheduling step.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleQuizRequest {
    #[validate(length(min = 1))]
    pub start_time: String,
    #[validate(length(min = 1, max = 64))]
    pub timezone: String,
}

/// DTO for publishing. A deferred quiz may be scheduled in the same call.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishQuizRequest {
    pub start_time: Option<String>,
    pub timezone: Option<String>,
}

/// Quiz plus its effective window and the start time rendered in the quiz's own zone.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizResponse {
    #[serde(flatten)]
    pub quiz: Quiz,
    pub local_start_time: Option<String>,
    pub window_opens_at: Option<DateTime<Utc>>,
    pub window_closes_at: Option<DateTime<Utc>>,
}
