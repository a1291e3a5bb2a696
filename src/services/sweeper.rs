// src/services/sweeper.rs

//! Periodic reconciliation of stuck attempts and retention of answer payloads.
//!
//! Every write is conditioned on `status = 'in_progress'`, so sweeps may overlap
//! with learner requests, with each other, and across hosts.

use std::{sync::Arc, time::Duration as StdDuration};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::{
    config::Config,
    error::AppError,
    models::attempt::{AttemptStatus, OpenAttempt},
    store::QuizStore,
    utils::clock::Clock,
};

/// Elapsed time beyond `duration * TIMEOUT_FACTOR` times an attempt out.
pub const TIMEOUT_FACTOR: f64 = 2.0;

/// Elapsed time beyond `duration * ABANDON_FACTOR` abandons an attempt that never began.
pub const ABANDON_FACTOR: f64 = 1.5;

/// Largest accepted ceiling: one week.
pub const MAX_CEILING_MINUTES: i64 = 7 * 24 * 60;

/// Largest accepted answer retention: ten years.
pub const MAX_RETENTION_DAYS: i64 = 3650;

/// Status forced by the absolute ceiling.
pub const CEILING_STATUS: AttemptStatus = AttemptStatus::Abandoned;

/// Which rule decides when both the duration-relative rules and the ceiling fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CeilingPrecedence {
    /// Relative rules are checked first; the ceiling only catches what they leave open.
    RelativeFirst,
    /// The ceiling is checked first.
    CeilingFirst,
}

pub const DEFAULT_CEILING_PRECEDENCE: CeilingPrecedence = CeilingPrecedence::RelativeFirst;

/// Rule that forced a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepRule {
    RelativeTimeout,
    NeverStarted,
    AbsoluteCeiling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepVerdict {
    StillValid,
    Force { to: AttemptStatus, rule: SweepRule },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepPolicy {
    pub timeout_factor: f64,
    pub abandon_factor: f64,
    pub absolute_ceiling_minutes: i64,
    pub retention_days: i64,
    pub precedence: CeilingPrecedence,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            timeout_factor: TIMEOUT_FACTOR,
            abandon_factor: ABANDON_FACTOR,
            absolute_ceiling_minutes: 240,
            retention_days: 7,
            precedence: DEFAULT_CEILING_PRECEDENCE,
        }
    }
}

impl SweepPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            absolute_ceiling_minutes: config
                .sweep_absolute_ceiling_minutes
                .clamp(1, MAX_CEILING_MINUTES),
            retention_days: config.answer_retention_days.clamp(1, MAX_RETENTION_DAYS),
            ..Self::default()
        }
    }

    /// Minutes after which this attempt is forced terminal by the first rule to fire.
    pub fn effective_timeout_minutes(&self, attempt: &OpenAttempt) -> f64 {
        let factor = if attempt.start_time.is_some() {
            self.timeout_factor
        } else {
            self.abandon_factor.min(self.timeout_factor)
        };
        (f64::from(attempt.duration) * factor).min(self.absolute_ceiling_minutes as f64)
    }

    pub fn classify(&self, attempt: &OpenAttempt, now: DateTime<Utc>) -> SweepVerdict {
        let since = attempt.start_time.unwrap_or(attempt.created_at);
        let elapsed_secs = (now - since).num_seconds() as f64;
        let duration_secs = f64::from(attempt.duration) * 60.0;

        let relative = if elapsed_secs > duration_secs * self.timeout_factor {
            Some(SweepVerdict::Force {
                to: AttemptStatus::Timeout,
                rule: SweepRule::RelativeTimeout,
            })
        } else if attempt.start_time.is_none() && elapsed_secs > duration_secs * self.abandon_factor {
            Some(SweepVerdict::Force {
                to: AttemptStatus::Abandoned,
                rule: SweepRule::NeverStarted,
            })
        } else {
            None
        };

        let ceiling = (elapsed_secs > self.absolute_ceiling_minutes as f64 * 60.0).then_some(SweepVerdict::Force {
            to: CEILING_STATUS,
            rule: SweepRule::AbsoluteCeiling,
        });

        let verdict = match self.precedence {
            CeilingPrecedence::RelativeFirst => relative.or(ceiling),
            CeilingPrecedence::CeilingFirst => ceiling.or(relative),
        };
        verdict.unwrap_or(SweepVerdict::StillValid)
    }

    /// Start of the retention window. Saturates instead of overflowing.
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        Duration::try_days(self.retention_days.max(0))
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTransition {
    pub attempt_id: i64,
    pub quiz_id: i64,
    pub to: AttemptStatus,
    pub rule: SweepRule,
    pub elapsed_minutes: i64,
    pub timeout_after_minutes: f64,
}

/// Counts returned by a sweep. In dry-run mode they describe what would happen.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub dry_run: bool,
    pub timed_out: u64,
    pub abandoned: u64,
    pub still_valid: u64,
    /// Rows that were already terminal by the time the write ran.
    pub skipped: u64,
    pub failed: u64,
    pub old_data_cleaned: u64,
    pub transitions: Vec<PlannedTransition>,
}

impl SweepReport {
    fn count(&mut self, to: AttemptStatus) {
        match to {
            AttemptStatus::Timeout => self.timed_out += 1,
            AttemptStatus::Abandoned => self.abandoned += 1,
            AttemptStatus::InProgress | AttemptStatus::Completed => {}
        }
    }
}

/// One reconciliation pass. Row failures are counted, never propagated.
pub async fn run_sweep(
    store: &dyn QuizStore,
    policy: &SweepPolicy,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<SweepReport, AppError> {
    let mut report = SweepReport {
        dry_run,
        ..SweepReport::default()
    };

    for attempt in store.list_open_attempts().await? {
        let (to, rule) = match policy.classify(&attempt, now) {
            SweepVerdict::StillValid => {
                report.still_valid += 1;
                continue;
            }
            SweepVerdict::Force { to, rule } => (to, rule),
        };

        let elapsed_minutes = (now - attempt.start_time.unwrap_or(attempt.created_at)).num_minutes();
        report.transitions.push(PlannedTransition {
            attempt_id: attempt.id,
            quiz_id: attempt.quiz_id,
            to,
            rule,
            elapsed_minutes,
            timeout_after_minutes: policy.effective_timeout_minutes(&attempt),
        });

        if dry_run {
            report.count(to);
            continue;
        }

        match store.force_attempt_status(attempt.id, to, now).await {
            Ok(true) => {
                tracing::info!(
                    attempt_id = attempt.id,
                    from = %AttemptStatus::InProgress,
                    to = %to,
                    rule = ?rule,
                    elapsed_minutes,
                    timeout_after_minutes = policy.effective_timeout_minutes(&attempt),
                    "Attempt reconciled"
                );
                report.count(to);
            }
            Ok(false) => {
                tracing::debug!(attempt_id = attempt.id, "Attempt already finalized, skipping");
                report.skipped += 1;
            }
            Err(e) => {
                tracing::warn!(attempt_id = attempt.id, "Failed to reconcile attempt: {}", e);
                report.failed += 1;
            }
        }
    }

    let cutoff = policy.retention_cutoff(now);
    let cleaned = if dry_run {
        store.count_purgeable_answers(cutoff).await
    } else {
        store.purge_answers(cutoff).await
    };
    match cleaned {
        Ok(n) => report.old_data_cleaned = n,
        Err(e) => {
            tracing::warn!("Failed to purge old answers: {}", e);
            report.failed += 1;
        }
    }

    Ok(report)
}

/// Runs `run_sweep` every `interval` until the runtime shuts down.
pub fn spawn_periodic(
    store: Arc<dyn QuizStore>,
    clock: Arc<dyn Clock>,
    policy: SweepPolicy,
    interval: StdDuration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match run_sweep(store.as_ref(), &policy, clock.now(), false).await {
                Ok(report) => tracing::info!(
                    timed_out = report.timed_out,
                    abandoned = report.abandoned,
                    still_valid = report.still_valid,
                    skipped = report.skipped,
                    failed = report.failed,
                    old_data_cleaned = report.old_data_cleaned,
                    "Reconciliation sweep finished"
                ),
                Err(e) => tracing::error!("Reconciliation sweep failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{
            attempt::{CompletedAttempt, NewAttempt, SubmittedAnswer},
            quiz::{NewQuiz, SchedulingStatus},
        },
        store::MemoryStore,
    };
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 3, 12, 0, 0).unwrap()
    }

    fn open(duration: i32, start_ago: Option<i64>, created_ago: i64) -> OpenAttempt {
        OpenAttempt {
            id: 1,
            quiz_id: 1,
            start_time: start_ago.map(|m| now() - Duration::minutes(m)),
            created_at: now() - Duration::minutes(created_ago),
            duration,
        }
    }

    #[test]
    fn test_classify_timeout_after_twice_duration() {
        let verdict = SweepPolicy::default().classify(&open(30, Some(61), 61), now());
        assert_eq!(
            verdict,
            SweepVerdict::Force {
                to: AttemptStatus::Timeout,
                rule: SweepRule::RelativeTimeout
            }
        );
    }

    #[test]
    fn test_classify_exactly_twice_duration_still_valid() {
        let verdict = SweepPolicy::default().classify(&open(30, Some(60), 60), now());
        assert_eq!(verdict, SweepVerdict::StillValid);
    }

    #[test]
    fn test_classify_never_started_abandoned() {
        let verdict = SweepPolicy::default().classify(&open(30, None, 50), now());
        assert_eq!(
            verdict,
            SweepVerdict::Force {
                to: AttemptStatus::Abandoned,
                rule: SweepRule::NeverStarted
            }
        );
    }

    #[test]
    fn test_classify_started_attempt_not_abandoned_at_one_and_a_half() {
        let verdict = SweepPolicy::default().classify(&open(30, Some(50), 55), now());
        assert_eq!(verdict, SweepVerdict::StillValid);
    }

    #[test]
    fn test_classify_recent_attempt_still_valid() {
        let verdict = SweepPolicy::default().classify(&open(30, Some(20), 20), now());
        assert_eq!(verdict, SweepVerdict::StillValid);
    }

    #[test]
    fn test_ceiling_catches_long_durations() {
        // 180 minute quiz: relative timeout at 360, ceiling at 240.
        let verdict = SweepPolicy::default().classify(&open(180, Some(250), 250), now());
        assert_eq!(
            verdict,
            SweepVerdict::Force {
                to: CEILING_STATUS,
                rule: SweepRule::AbsoluteCeiling
            }
        );
        let policy = SweepPolicy::default();
        assert_eq!(policy.effective_timeout_minutes(&open(180, Some(250), 250)), 240.0);
        assert_eq!(policy.effective_timeout_minutes(&open(30, Some(20), 20)), 60.0);
        assert_eq!(policy.effective_timeout_minutes(&open(30, None, 20)), 45.0);
    }

    #[test]
    fn test_precedence_decides_overlap() {
        // Both rules fire: 150 minute quiz started 301 minutes ago.
        let attempt = open(150, Some(301), 301);
        assert_eq!(DEFAULT_CEILING_PRECEDENCE, CeilingPrecedence::RelativeFirst);

        let relative_first = SweepPolicy::default().classify(&attempt, now());
        assert_eq!(
            relative_first,
            SweepVerdict::Force {
                to: AttemptStatus::Timeout,
                rule: SweepRule::RelativeTimeout
            }
        );

        let ceiling_first = SweepPolicy {
            precedence: CeilingPrecedence::CeilingFirst,
            ..SweepPolicy::default()
        }
        .classify(&attempt, now());
        assert_eq!(
            ceiling_first,
            SweepVerdict::Force {
                to: AttemptStatus::Abandoned,
                rule: SweepRule::AbsoluteCeiling
            }
        );
    }

    async fn seeded_store() -> (MemoryStore, i64) {
        let store = MemoryStore::new();
        let quiz = store
            .insert_quiz(NewQuiz {
                educator_id: 1,
                title: "Sweep".to_string(),
                scheduling_status: SchedulingStatus::Legacy,
                start_time: Some(now() - Duration::hours(2)),
                timezone: Some("UTC".to_string()),
                duration: 30,
                created_at: now() - Duration::days(1),
            })
            .await
            .unwrap();
        (store, quiz.id)
    }

    async fn attempt(store: &MemoryStore, quiz_id: i64, start_ago: Option<i64>, created_ago: i64) -> i64 {
        store
            .insert_attempt(NewAttempt {
                quiz_id,
                student_id: 42,
                enrollment_id: None,
                start_time: start_ago.map(|m| now() - Duration::minutes(m)),
                question_order: vec![],
                created_at: now() - Duration::minutes(created_ago),
            })
            .await
            .unwrap()
            .id
    }

    async fn status_of(store: &MemoryStore, id: i64) -> AttemptStatus {
        store.get_attempt(id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_sweep_applies_transitions() {
        let (store, quiz_id) = seeded_store().await;
        let timed_out = attempt(&store, quiz_id, Some(61), 61).await;
        let abandoned = attempt(&store, quiz_id, None, 50).await;
        let valid = attempt(&store, quiz_id, Some(20), 20).await;

        let report = run_sweep(&store, &SweepPolicy::default(), now(), false).await.unwrap();
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.still_valid, 1);
        assert_eq!(report.failed, 0);

        assert_eq!(status_of(&store, timed_out).await, AttemptStatus::Timeout);
        assert_eq!(status_of(&store, abandoned).await, AttemptStatus::Abandoned);
        assert_eq!(status_of(&store, valid).await, AttemptStatus::InProgress);

        let forced = store.get_attempt(timed_out).await.unwrap().unwrap();
        assert_eq!(forced.end_time, Some(now()));

        let planned: Vec<(i64, f64)> = report
            .transitions
            .iter()
            .map(|t| (t.attempt_id, t.timeout_after_minutes))
            .collect();
        assert_eq!(planned, vec![(timed_out, 60.0), (abandoned, 45.0)]);
    }

    #[tokio::test]
    async fn test_sweep_skips_attempt_finalized_mid_pass() {
        let (store, quiz_id) = seeded_store().await;
        let id = attempt(&store, quiz_id, Some(61), 61).await;
        // The learner's submit lands between the sweep's read and its write
        store.preempt_next_write(id, AttemptStatus::Completed);

        let report = run_sweep(&store, &SweepPolicy::default(), now(), false).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.timed_out, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(report.transitions.len(), 1);
        assert_eq!(status_of(&store, id).await, AttemptStatus::Completed);
    }

    #[test]
    fn test_out_of_range_settings_are_clamped() {
        let config = Config {
            database_url: None,
            rust_log: "info".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            default_timezone: "UTC".to_string(),
            sweep_interval_secs: 0,
            sweep_absolute_ceiling_minutes: i64::MAX,
            answer_retention_days: i64::MIN,
        };
        let policy = SweepPolicy::from_config(&config);
        assert_eq!(policy.absolute_ceiling_minutes, MAX_CEILING_MINUTES);
        assert_eq!(policy.retention_days, 1);
        assert_eq!(policy.retention_cutoff(now()), now() - Duration::days(1));

        // Hand-built policies saturate rather than panic
        let extreme = SweepPolicy {
            absolute_ceiling_minutes: i64::MAX,
            retention_days: i64::MAX,
            ..SweepPolicy::default()
        };
        assert_eq!(extreme.retention_cutoff(now()), DateTime::<Utc>::MIN_UTC);
        assert_eq!(extreme.classify(&open(30, Some(20), 20), now()), SweepVerdict::StillValid);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let (store, quiz_id) = seeded_store().await;
        let id = attempt(&store, quiz_id, Some(61), 61).await;

        let report = run_sweep(&store, &SweepPolicy::default(), now(), true).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.timed_out, 1);
        assert_eq!(report.transitions.len(), 1);
        assert_eq!(report.transitions[0].attempt_id, id);
        assert_eq!(status_of(&store, id).await, AttemptStatus::InProgress);
    }

    #[tokio::test]
    async fn test_second_sweep_is_a_no_op() {
        let (store, quiz_id) = seeded_store().await;
        attempt(&store, quiz_id, Some(61), 61).await;

        run_sweep(&store, &SweepPolicy::default(), now(), false).await.unwrap();
        let again = run_sweep(&store, &SweepPolicy::default(), now(), false).await.unwrap();
        assert_eq!(again.timed_out, 0);
        assert_eq!(again.abandoned, 0);
        assert_eq!(again.still_valid, 0);
        assert!(again.transitions.is_empty());
    }

    #[tokio::test]
    async fn test_row_failure_does_not_abort_batch() {
        let (store, quiz_id) = seeded_store().await;
        let broken = attempt(&store, quiz_id, Some(61), 61).await;
        let healthy = attempt(&store, quiz_id, Some(70), 70).await;
        store.fail_writes_for(broken);

        let report = run_sweep(&store, &SweepPolicy::default(), now(), false).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.timed_out, 1);
        assert_eq!(status_of(&store, broken).await, AttemptStatus::InProgress);
        assert_eq!(status_of(&store, healthy).await, AttemptStatus::Timeout);
    }

    #[tokio::test]
    async fn test_retention_blanks_old_answers_only() {
        let (store, quiz_id) = seeded_store().await;
        let old = attempt(&store, quiz_id, Some(60 * 24 * 9), 60 * 24 * 9).await;
        let recent = attempt(&store, quiz_id, Some(60 * 24 * 2), 60 * 24 * 2).await;

        for (id, days_ago) in [(old, 8), (recent, 2)] {
            let done = CompletedAttempt {
                answers: vec![SubmittedAnswer {
                    question_id: 1,
                    answer: "A".to_string(),
                }],
                score: 100.0,
                total_correct: 1,
                end_time: now() - Duration::days(days_ago),
            };
            assert!(store.complete_attempt(id, &done).await.unwrap());
        }

        let dry = run_sweep(&store, &SweepPolicy::default(), now(), true).await.unwrap();
        assert_eq!(dry.old_data_cleaned, 1);

        let report = run_sweep(&store, &SweepPolicy::default(), now(), false).await.unwrap();
        assert_eq!(report.old_data_cleaned, 1);

        let old_row = store.get_attempt(old).await.unwrap().unwrap();
        assert!(old_row.answers.is_empty());
        assert_eq!(old_row.status, AttemptStatus::Completed);
        assert_eq!(old_row.score, Some(100.0));
        assert_eq!(store.get_attempt(recent).await.unwrap().unwrap().answers.len(), 1);

        let again = run_sweep(&store, &SweepPolicy::default(), now(), false).await.unwrap();
        assert_eq!(again.old_data_cleaned, 0);
    }
}
