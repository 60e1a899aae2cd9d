use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attempt::Attempt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventKind {
    Started,
    AnswerSubmitted,
    Completed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressSnapshot {
    pub score: i32,
    pub max_score: i32,
    pub questions_answered: u32,
}

/// Ephemeral notification for dashboard observers. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressEvent {
    /// Assigned by the publisher at dispatch; 0 until then.
    #[serde(default)]
    pub sequence: u64,
    pub attempt_id: String,
    pub student_id: String,
    pub test_id: String,
    pub kind: ProgressEventKind,
    pub timestamp: DateTime<Utc>,
    pub snapshot: ProgressSnapshot,
}

impl ProgressEvent {
    pub fn for_attempt(kind: ProgressEventKind, attempt: &Attempt, timestamp: DateTime<Utc>) -> Self {
        Self {
            sequence: 0,
            attempt_id: attempt.id.clone(),
            student_id: attempt.student_id.clone(),
            test_id: attempt.test_id.clone(),
            kind,
            timestamp,
            snapshot: ProgressSnapshot {
                score: attempt.score,
                max_score: attempt.max_score,
                questions_answered: attempt.questions_answered,
            },
        }
    }

    pub fn to_sse_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self.kind {
            ProgressEventKind::Started => "attempt-started",
            ProgressEventKind::AnswerSubmitted => "answer-submitted",
            ProgressEventKind::Completed => "attempt-completed",
            ProgressEventKind::Expired => "attempt-expired",
        }
    }
}
