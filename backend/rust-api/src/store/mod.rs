//! Persistence contract of the attempt engine.
//!
//! The engine only talks to [`AttemptStore`]; MongoDB and the in-memory map are
//! two interchangeable backends selected by configuration.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::models::{Attempt, AttemptCounts, QuestionAnswerRecord, TestDefinition};

pub mod memory;
pub mod mongo;

pub use memory::InMemoryAttemptStore;
pub use mongo::MongoAttemptStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another in-progress attempt already exists for the pair.
    #[error("in-progress attempt already exists for student {student_id} on test {test_id}")]
    Conflict { student_id: String, test_id: String },

    #[error("store operation {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn load_test_definition(
        &self,
        test_id: &str,
    ) -> Result<Option<TestDefinition>, StoreError>;

    async fn load_active_attempt(
        &self,
        student_id: &str,
        test_id: &str,
    ) -> Result<Option<Attempt>, StoreError>;

    async fn count_prior_attempts(
        &self,
        student_id: &str,
        test_id: &str,
    ) -> Result<AttemptCounts, StoreError>;

    /// Inserts a new in-progress attempt. Must fail with
    /// [`StoreError::Conflict`] when the pair already has one, atomically
    /// with respect to concurrent calls.
    async fn create_attempt(&self, attempt: &Attempt) -> Result<(), StoreError>;

    async fn load_attempt(&self, attempt_id: &str) -> Result<Option<Attempt>, StoreError>;

    async fn save_attempt(&self, attempt: &Attempt) -> Result<(), StoreError>;

    async fn load_answer(
        &self,
        attempt_id: &str,
        question_id: &str,
    ) -> Result<Option<QuestionAnswerRecord>, StoreError>;

    /// Upsert keyed by (attempt, question).
    async fn save_answer(
        &self,
        attempt_id: &str,
        record: &QuestionAnswerRecord,
    ) -> Result<(), StoreError>;

    /// Commits an answer together with the attempt's new running score.
    /// Either both writes land or neither does.
    async fn save_progress(
        &self,
        attempt: &Attempt,
        record: &QuestionAnswerRecord,
    ) -> Result<(), StoreError>;

    async fn list_answers(&self, attempt_id: &str)
        -> Result<Vec<QuestionAnswerRecord>, StoreError>;

    async fn list_attempts_for_test(&self, test_id: &str) -> Result<Vec<Attempt>, StoreError>;

    async fn list_in_progress(&self) -> Result<Vec<Attempt>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
