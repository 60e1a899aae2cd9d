use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Answer as submitted by the student. The shape depends on the test family;
/// a shape the engine does not know deserializes into `Unrecognized`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawAnswer {
    Choice {
        #[serde(default)]
        option_ids: Vec<String>,
    },
    Letter {
        #[serde(default)]
        letter: String,
    },
    Positions {
        #[serde(default)]
        positions: Vec<u32>,
    },
    Stress {
        position: u32,
    },
    #[serde(other)]
    Unrecognized,
}

/// Latest answer for one question of one attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionAnswerRecord {
    pub question_id: String,
    pub answer: RawAnswer,
    pub is_correct: bool,
    pub points_awarded: i32,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    #[validate(length(min = 1, max = 128))]
    pub question_id: String,
    pub answer: RawAnswer,
}

#[derive(Debug, Serialize)]
pub struct SubmitAnswerResponse {
    #[serde(flatten)]
    pub record: QuestionAnswerRecord,
    pub total_score: i32,
    pub max_score: i32,
    pub questions_answered: u32,
}
