// src/models/enrollment.rs

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use sqlx::FromRow;
use validator::Validate;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Enrolled,
    Completed,
    Cancelled,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Enrolled => "enrolled",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "enrolled" => Ok(EnrollmentStatus::Enrolled),
            "completed" => Ok(EnrollmentStatus::Completed),
            "cancelled" => Ok(EnrollmentStatus::Cancelled),
            other => Err(AppError::IntegrityViolation(format!(
                "unknown enrollment status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: i64,
    pub quiz_id: i64,
    pub student_id: i64,
    pub enrolled_at: DateTime<Utc>,
    pub status: EnrollmentStatus,
    pub is_reassignment: bool,

    /// The enrollment this one supersedes.
    pub parent_enrollment_id: Option<i64>,
    pub reassignment_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Represents the 'enrollments' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct EnrollmentRow {
    pub id: i64,
    pub quiz_id: i64,
    pub student_id: i64,
    pub enrolled_at: DateTime<Utc>,
    pub status: String,
    pub is_reassignment: bool,
    pub parent_enrollment_id: Option<i64>,
    pub reassignment_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<EnrollmentRow> for Enrollment {
    type Error = AppError;

    fn try_from(row: EnrollmentRow) -> Result<Self, Self::Error> {
        Ok(Enrollment {
            id: row.id,
            quiz_id: row.quiz_id,
            student_id: row.student_id,
            enrolled_at: row.enrolled_at,
            status: row.status.parse()?,
            is_reassignment: row.is_reassignment,
            parent_enrollment_id: row.parent_enrollment_id,
            reassignment_reason: row.reassignment_reason,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewEnrollment {
    pub quiz_id: i64,
    pub student_id: i64,
    pub enrolled_at: DateTime<Utc>,
    pub is_reassignment: bool,
    pub parent_enrollment_id: Option<i64>,
    pub reassignment_reason: Option<String>,
}

/// Why a quiz cannot be taken right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    NotPublished,
    Expired,
    AlreadyAttempted,
    NotYetOpen,
    Cancelled,
}

impl UnavailableReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnavailableReason::NotPublished => "not_published",
            UnavailableReason::Expired => "expired",
            UnavailableReason::AlreadyAttempted => "already_attempted",
            UnavailableReason::NotYetOpen => "not_yet_open",
            UnavailableReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display label: `Original` or `Reassignment #N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentLabel {
    Original,
    Reassignment(u32),
}

impl fmt::Display for EnrollmentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnrollmentLabel::Original => f.write_str("Original"),
            EnrollmentLabel::Reassignment(n) => write!(f, "Reassignment #{}", n),
        }
    }
}

impl Serialize for EnrollmentLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Computed availability of one enrollment at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentState {
    pub has_attempt: bool,
    pub is_expired: bool,
    pub is_available: bool,
    pub reason: Option<UnavailableReason>,
}

/// Row of a learner dashboard or an enrollment history.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentView {
    #[serde(flatten)]
    pub enrollment: Enrollment,
    pub enrollment_type: EnrollmentLabel,
    #[serde(flatten)]
    pub state: EnrollmentState,
}

/// Response of the "is quiz X available to student Y" query.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    pub quiz_id: i64,
    pub student_id: i64,
    pub enrollment_id: Option<i64>,
    pub is_available: bool,
    pub reason: Option<UnavailableReason>,
}

/// DTO for enrolling a student.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    pub quiz_id: i64,
    pub student_id: i64,
}

/// DTO for reassigning a quiz under an existing enrollment.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReassignRequest {
    #[validate(length(min = 1, max = 500, message = "A reassignment reason is required."))]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub quiz_id: i64,
    pub student_id: i64,
}
