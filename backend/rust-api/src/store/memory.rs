use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use super::{AttemptStore, StoreError};
use crate::models::{Attempt, AttemptCounts, AttemptStatus, QuestionAnswerRecord, TestDefinition};

#[derive(Default)]
struct Inner {
    tests: HashMap<String, TestDefinition>,
    attempts: HashMap<String, Attempt>,
    // attempt_id -> question_id -> record
    answers: HashMap<String, BTreeMap<String, QuestionAnswerRecord>>,
}

/// Process-local store. Used for tests, demos and single-node deployments
/// without MongoDB. Every operation runs under one lock, so check-and-insert
/// and multi-record writes are trivially atomic.
#[derive(Default)]
pub struct InMemoryAttemptStore {
    inner: RwLock<Inner>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tests(tests: impl IntoIterator<Item = TestDefinition>) -> Self {
        let mut inner = Inner::default();
        for test in tests {
            inner.tests.insert(test.id.clone(), test);
        }
        Self {
            inner: RwLock::new(inner),
            ..Self::default()
        }
    }

    /// Reads a JSON array of test definitions.
    pub fn from_seed_file(path: &str) -> anyhow::Result<Self> {
        use anyhow::Context;

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read test seed file {}", path))?;
        let tests: Vec<TestDefinition> =
            serde_json::from_str(&raw).context("Failed to parse test seed file")?;
        tracing::info!("Seeded {} test definitions from {}", tests.len(), path);
        Ok(Self::with_tests(tests))
    }

    pub async fn insert_test(&self, test: TestDefinition) {
        self.inner.write().await.tests.insert(test.id.clone(), test);
    }

    /// Makes every following call fail with a backend error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay applied before each operation touches the data.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn gate(&self) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

fn active_for<'a>(inner: &'a Inner, student_id: &str, test_id: &str) -> Option<&'a Attempt> {
    inner.attempts.values().find(|a| {
        a.student_id == student_id && a.test_id == test_id && a.status == AttemptStatus::InProgress
    })
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn load_test_definition(
        &self,
        test_id: &str,
    ) -> Result<Option<TestDefinition>, StoreError> {
        self.gate().await?;
        Ok(self.inner.read().await.tests.get(test_id).cloned())
    }

    async fn load_active_attempt(
        &self,
        student_id: &str,
        test_id: &str,
    ) -> Result<Option<Attempt>, StoreError> {
        self.gate().await?;
        let inner = self.inner.read().await;
        Ok(active_for(&inner, student_id, test_id).cloned())
    }

    async fn count_prior_attempts(
        &self,
        student_id: &str,
        test_id: &str,
    ) -> Result<AttemptCounts, StoreError> {
        self.gate().await?;
        let inner = self.inner.read().await;
        let counts = inner
            .attempts
            .values()
            .filter(|a| a.student_id == student_id && a.test_id == test_id)
            .fold(AttemptCounts::default(), |mut acc, a| {
                acc.total += 1;
                if a.status == AttemptStatus::Expired {
                    acc.expired += 1;
                }
                acc
            });
        Ok(counts)
    }

    async fn create_attempt(&self, attempt: &Attempt) -> Result<(), StoreError> {
        self.gate().await?;
        let mut inner = self.inner.write().await;
        if active_for(&inner, &attempt.student_id, &attempt.test_id).is_some() {
            return Err(StoreError::Conflict {
                student_id: attempt.student_id.clone(),
                test_id: attempt.test_id.clone(),
            });
        }
        inner.attempts.insert(attempt.id.clone(), attempt.clone());
        Ok(())
    }

    async fn load_attempt(&self, attempt_id: &str) -> Result<Option<Attempt>, StoreError> {
        self.gate().await?;
        Ok(self.inner.read().await.attempts.get(attempt_id).cloned())
    }

    async fn save_attempt(&self, attempt: &Attempt) -> Result<(), StoreError> {
        self.gate().await?;
        self.inner
            .write()
            .await
            .attempts
            .insert(attempt.id.clone(), attempt.clone());
        Ok(())
    }

    async fn load_answer(
        &self,
        attempt_id: &str,
        question_id: &str,
    ) -> Result<Option<QuestionAnswerRecord>, StoreError> {
        self.gate().await?;
        let inner = self.inner.read().await;
        Ok(inner
            .answers
            .get(attempt_id)
            .and_then(|by_question| by_question.get(question_id))
            .cloned())
    }

    async fn save_answer(
        &self,
        attempt_id: &str,
        record: &QuestionAnswerRecord,
    ) -> Result<(), StoreError> {
        self.gate().await?;
        self.inner
            .write()
            .await
            .answers
            .entry(attempt_id.to_string())
            .or_default()
            .insert(record.question_id.clone(), record.clone());
        Ok(())
    }

    async fn save_progress(
        &self,
        attempt: &Attempt,
        record: &QuestionAnswerRecord,
    ) -> Result<(), StoreError> {
        self.gate().await?;
        let mut inner = self.inner.write().await;
        inner
            .answers
            .entry(attempt.id.clone())
            .or_default()
            .insert(record.question_id.clone(), record.clone());
        inner.attempts.insert(attempt.id.clone(), attempt.clone());
        Ok(())
    }

    async fn list_answers(
        &self,
        attempt_id: &str,
    ) -> Result<Vec<QuestionAnswerRecord>, StoreError> {
        self.gate().await?;
        let inner = self.inner.read().await;
        Ok(inner
            .answers
            .get(attempt_id)
            .map(|by_question| by_question.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_attempts_for_test(&self, test_id: &str) -> Result<Vec<Attempt>, StoreError> {
        self.gate().await?;
        let inner = self.inner.read().await;
        let mut attempts: Vec<Attempt> = inner
            .attempts
            .values()
            .filter(|a| a.test_id == test_id)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        Ok(attempts)
    }

    async fn list_in_progress(&self) -> Result<Vec<Attempt>, StoreError> {
        self.gate().await?;
        let inner = self.inner.read().await;
        Ok(inner
            .attempts
            .values()
            .filter(|a| a.status == AttemptStatus::InProgress)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.gate().await
    }
}
