use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::assessment::{TestDefinition, TestFamily};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    Expired,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    Manual,
    Expired,
}

impl CompletionReason {
    pub fn final_status(&self) -> AttemptStatus {
        match self {
            CompletionReason::Manual => AttemptStatus::Completed,
            CompletionReason::Expired => AttemptStatus::Expired,
        }
    }
}

/// One student's try at one test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attempt {
    pub id: String,
    pub test_id: String,
    pub student_id: String,
    pub family: TestFamily,
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: AttemptStatus,
    pub score: i32,
    pub max_score: i32,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub questions_answered: u32,
}

impl Attempt {
    pub fn open(
        test: &TestDefinition,
        student_id: &str,
        attempt_number: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            test_id: test.id.clone(),
            student_id: student_id.to_string(),
            family: test.family,
            attempt_number,
            started_at,
            deadline: test.deadline_for(started_at),
            completed_at: None,
            status: AttemptStatus::InProgress,
            score: 0,
            max_score: test.max_score(),
            percentage: 0.0,
            questions_answered: 0,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == AttemptStatus::InProgress
    }

    /// Deadline reached: `now == deadline` already counts as lapsed.
    pub fn is_lapsed_at(&self, now: DateTime<Utc>) -> bool {
        self.is_in_progress() && now >= self.deadline
    }

    /// Sets the terminal status. `completed_at` and `percentage` are only
    /// written here, so they stay absent while the attempt is in progress.
    pub fn finalize(&mut self, reason: CompletionReason, at: DateTime<Utc>) {
        self.status = reason.final_status();
        self.completed_at = Some(at);
        self.percentage = percentage(self.score, self.max_score);
    }
}

/// `score / max_score * 100`, zero for an empty test.
pub fn percentage(score: i32, max_score: i32) -> f64 {
    if max_score == 0 {
        return 0.0;
    }
    f64::from(score) / f64::from(max_score) * 100.0
}

/// How many attempts a student already has on a test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptCounts {
    pub total: u32,
    pub expired: u32,
}

impl AttemptCounts {
    /// Attempts charged against `max_attempts`: expired ones are not.
    pub fn charged(&self) -> u32 {
        self.total.saturating_sub(self.expired)
    }

    pub fn next_attempt_number(&self) -> u32 {
        self.total + 1
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct StartAttemptRequest {
    #[validate(length(min = 1, max = 128))]
    pub student_id: String,
    #[validate(length(min = 1, max = 128))]
    pub test_id: String,
}

#[derive(Debug, Serialize)]
pub struct TestProgressResponse {
    pub test_id: String,
    pub title: String,
    pub family: TestFamily,
    pub max_score: i32,
    pub attempts: Vec<Attempt>,
}
