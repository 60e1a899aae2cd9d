use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::locks::{start_key, AttemptLocks};
use super::progress::ProgressPublisher;
use super::scoring::policy_for;
use super::time_guard::TimeGuard;
use crate::error::AttemptError;
use crate::metrics::{
    track_store_operation, ANSWERS_SUBMITTED_TOTAL, ATTEMPTS_ACTIVE, ATTEMPTS_TOTAL,
    ATTEMPT_REJECTIONS_TOTAL,
};
use crate::models::{
    Attempt, AttemptStatus, CompletionReason, ProgressEvent, ProgressEventKind,
    QuestionAnswerRecord, RawAnswer, SubmitAnswerResponse, TestDefinition,
};
use crate::store::{AttemptStore, StoreError};
use crate::utils::Clock;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub rearmed: usize,
    pub expired: usize,
}

/// Attempt lifecycle: start, answer, complete, and the lazy expiry shared by
/// every accessor.
///
/// Mutations of one attempt run inside the per-attempt section of
/// [`AttemptLocks`]; the first thing done inside the section is to reload the
/// attempt, so whoever enters second sees the winner's result. Events are
/// enqueued before the section is left, which keeps their order per attempt,
/// while delivery happens on the publisher's own task.
#[derive(Clone)]
pub struct AttemptService {
    store: Arc<dyn AttemptStore>,
    clock: Arc<dyn Clock>,
    locks: Arc<AttemptLocks>,
    time_guard: Arc<TimeGuard>,
    publisher: Arc<ProgressPublisher>,
    store_timeout: Duration,
}

impl AttemptService {
    pub fn new(
        store: Arc<dyn AttemptStore>,
        clock: Arc<dyn Clock>,
        publisher: Arc<ProgressPublisher>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            time_guard: Arc::new(TimeGuard::new(clock.clone())),
            store,
            clock,
            locks: Arc::new(AttemptLocks::new()),
            publisher,
            store_timeout,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn publisher(&self) -> &Arc<ProgressPublisher> {
        &self.publisher
    }

    pub fn time_guard(&self) -> &TimeGuard {
        &self.time_guard
    }

    /// Number of live entries in the lock registry.
    pub fn lock_entries(&self) -> usize {
        self.locks.len()
    }

    pub async fn start_attempt(
        &self,
        student_id: &str,
        test_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Attempt, AttemptError> {
        tracing::info!("Starting attempt: student={}, test={}", student_id, test_id);

        let result = self.start_attempt_inner(student_id, test_id, now).await;
        if let Err(e) = &result {
            record_rejection(e);
        }
        result
    }

    async fn start_attempt_inner(
        &self,
        student_id: &str,
        test_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Attempt, AttemptError> {
        let test = self.test_definition(test_id).await?;
        if !test.is_available_at(now) {
            return Err(AttemptError::TestNotAvailable {
                test_id: test_id.to_string(),
                at: now,
            });
        }

        let pair_guard = self.locks.acquire(&start_key(student_id, test_id)).await;

        let mut active = self
            .with_store(
                "load_active_attempt",
                self.store.load_active_attempt(student_id, test_id),
            )
            .await?;

        // Lapsed while nobody was looking: it must not block a fresh start.
        if let Some(existing) = active.take() {
            if existing.is_lapsed_at(now) {
                self.expire_lapsed(&existing.id, now).await?;
            } else {
                active = Some(existing);
            }
        }

        let counts = self
            .with_store(
                "count_prior_attempts",
                self.store.count_prior_attempts(student_id, test_id),
            )
            .await?;

        if counts.charged() >= test.max_attempts {
            return Err(AttemptError::AttemptLimitExceeded {
                student_id: student_id.to_string(),
                test_id: test_id.to_string(),
                max_attempts: test.max_attempts,
            });
        }

        if let Some(existing) = active {
            return Err(AttemptError::AttemptAlreadyInProgress {
                student_id: student_id.to_string(),
                test_id: test_id.to_string(),
                attempt_id: Some(existing.id),
            });
        }

        let attempt = Attempt::open(&test, student_id, counts.next_attempt_number(), now);

        match self
            .with_store("create_attempt", self.store.create_attempt(&attempt))
            .await
        {
            Ok(()) => {}
            Err(AttemptError::StoreUnavailable(StoreError::Conflict { .. })) => {
                return Err(AttemptError::AttemptAlreadyInProgress {
                    student_id: student_id.to_string(),
                    test_id: test_id.to_string(),
                    attempt_id: None,
                });
            }
            Err(e) => return Err(e),
        }

        self.publisher.publish(ProgressEvent::for_attempt(
            ProgressEventKind::Started,
            &attempt,
            now,
        ));
        self.arm_deadline(&attempt);
        drop(pair_guard);

        ATTEMPTS_TOTAL.with_label_values(&["started"]).inc();
        ATTEMPTS_ACTIVE.inc();
        tracing::info!(
            "Attempt started: id={}, student={}, test={}, number={}, deadline={}",
            attempt.id,
            student_id,
            test_id,
            attempt.attempt_number,
            attempt.deadline
        );

        Ok(attempt)
    }

    pub async fn submit_answer(
        &self,
        attempt_id: &str,
        question_id: &str,
        answer: RawAnswer,
        now: DateTime<Utc>,
    ) -> Result<SubmitAnswerResponse, AttemptError> {
        tracing::info!(
            "Processing answer submission: attempt={}, question={}",
            attempt_id,
            question_id
        );

        let result = self
            .submit_answer_inner(attempt_id, question_id, answer, now)
            .await;
        if let Err(e) = &result {
            record_rejection(e);
        }
        result
    }

    async fn submit_answer_inner(
        &self,
        attempt_id: &str,
        question_id: &str,
        answer: RawAnswer,
        now: DateTime<Utc>,
    ) -> Result<SubmitAnswerResponse, AttemptError> {
        let _guard = self.locks.acquire(attempt_id).await;

        let attempt = self.load_attempt(attempt_id).await?;
        // Already expired by the deadline timer or an earlier lazy check
        if attempt.status == AttemptStatus::Expired {
            return Err(AttemptError::AttemptExpired {
                attempt_id: attempt.id,
                deadline: attempt.deadline,
            });
        }
        if !attempt.is_in_progress() {
            return Err(AttemptError::AttemptNotInProgress {
                attempt_id: attempt.id,
                status: attempt.status,
            });
        }

        if attempt.is_lapsed_at(now) {
            let deadline = attempt.deadline;
            self.finalize_locked(attempt, CompletionReason::Expired, deadline)
                .await?;
            return Err(AttemptError::AttemptExpired {
                attempt_id: attempt_id.to_string(),
                deadline,
            });
        }

        let test = self.test_definition(&attempt.test_id).await?;
        let question = test
            .question(question_id)
            .ok_or_else(|| AttemptError::UnknownQuestion {
                attempt_id: attempt.id.clone(),
                test_id: test.id.clone(),
                question_id: question_id.to_string(),
            })?;

        let evaluation = policy_for(test.family).evaluate(question, &answer);
        tracing::debug!(
            "Scored answer: attempt={}, question={}, family={}, correct={}, points={}",
            attempt_id,
            question_id,
            test.family.as_str(),
            evaluation.is_correct,
            evaluation.points
        );

        let previous = self
            .with_store(
                "load_answer",
                self.store.load_answer(attempt_id, question_id),
            )
            .await?;

        let mut updated = attempt;
        match &previous {
            Some(prior) => {
                updated.score = updated
                    .score
                    .saturating_add(evaluation.points - prior.points_awarded)
            }
            None => {
                updated.score = updated.score.saturating_add(evaluation.points);
                updated.questions_answered += 1;
            }
        }

        let record = QuestionAnswerRecord {
            question_id: question_id.to_string(),
            answer,
            is_correct: evaluation.is_correct,
            points_awarded: evaluation.points,
            answered_at: now,
        };

        self.with_store("save_progress", self.store.save_progress(&updated, &record))
            .await?;

        ANSWERS_SUBMITTED_TOTAL
            .with_label_values(&[
                test.family.as_str(),
                if evaluation.is_correct { "true" } else { "false" },
            ])
            .inc();

        self.publisher.publish(ProgressEvent::for_attempt(
            ProgressEventKind::AnswerSubmitted,
            &updated,
            now,
        ));

        tracing::info!(
            "Answer processed: attempt={}, question={}, correct={}, score={}/{}",
            attempt_id,
            question_id,
            record.is_correct,
            updated.score,
            updated.max_score
        );

        Ok(SubmitAnswerResponse {
            record,
            total_score: updated.score,
            max_score: updated.max_score,
            questions_answered: updated.questions_answered,
        })
    }

    /// Finalizes the attempt. Completing an already finalized attempt returns
    /// its stored state and emits nothing.
    pub async fn complete_attempt(
        &self,
        attempt_id: &str,
        now: DateTime<Utc>,
        reason: CompletionReason,
    ) -> Result<Attempt, AttemptError> {
        let _guard = self.locks.acquire(attempt_id).await;
        let result = match self.load_attempt(attempt_id).await {
            Ok(attempt) => self.finalize_locked(attempt, reason, now).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            record_rejection(e);
        }
        result
    }

    /// Current state of an attempt, expiring it first if its deadline passed.
    pub async fn get_attempt_status(
        &self,
        attempt_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Attempt, AttemptError> {
        let attempt = self.load_attempt(attempt_id).await?;
        if attempt.is_lapsed_at(now) {
            return self.expire_lapsed(attempt_id, now).await;
        }
        Ok(attempt)
    }

    pub async fn list_answers(
        &self,
        attempt_id: &str,
    ) -> Result<Vec<QuestionAnswerRecord>, AttemptError> {
        self.load_attempt(attempt_id).await?;
        self.with_store("list_answers", self.store.list_answers(attempt_id))
            .await
    }

    /// Dashboard snapshot of every attempt on a test.
    pub async fn list_test_attempts(
        &self,
        test_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(TestDefinition, Vec<Attempt>), AttemptError> {
        let test = self.test_definition(test_id).await?;
        let attempts = self
            .with_store(
                "list_attempts_for_test",
                self.store.list_attempts_for_test(test_id),
            )
            .await?;

        let mut snapshot = Vec::with_capacity(attempts.len());
        for attempt in attempts {
            if attempt.is_lapsed_at(now) {
                snapshot.push(self.expire_lapsed(&attempt.id, now).await?);
            } else {
                snapshot.push(attempt);
            }
        }

        Ok((test, snapshot))
    }

    /// Re-arms deadline timers after a restart and expires what lapsed meanwhile.
    pub async fn recover_deadlines(&self, now: DateTime<Utc>) -> Result<RecoveryReport, AttemptError> {
        let in_progress = self
            .with_store("list_in_progress", self.store.list_in_progress())
            .await?;

        let mut report = RecoveryReport::default();
        for attempt in in_progress {
            ATTEMPTS_ACTIVE.inc();
            if attempt.is_lapsed_at(now) {
                self.expire_lapsed(&attempt.id, now).await?;
                report.expired += 1;
            } else {
                self.arm_deadline(&attempt);
                report.rearmed += 1;
            }
        }

        tracing::info!(
            "Deadline recovery finished: rearmed={}, expired={}",
            report.rearmed,
            report.expired
        );
        Ok(report)
    }

    pub async fn test_definition(&self, test_id: &str) -> Result<TestDefinition, AttemptError> {
        self.with_store(
            "load_test_definition",
            self.store.load_test_definition(test_id),
        )
        .await?
        .ok_or_else(|| AttemptError::TestNotFound {
            test_id: test_id.to_string(),
        })
    }

    async fn load_attempt(&self, attempt_id: &str) -> Result<Attempt, AttemptError> {
        self.with_store("load_attempt", self.store.load_attempt(attempt_id))
            .await?
            .ok_or_else(|| AttemptError::AttemptNotFound {
                attempt_id: attempt_id.to_string(),
            })
    }

    /// Expires a lapsed attempt at its deadline, under its section.
    async fn expire_lapsed(
        &self,
        attempt_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Attempt, AttemptError> {
        let _guard = self.locks.acquire(attempt_id).await;
        let attempt = self.load_attempt(attempt_id).await?;
        if !attempt.is_lapsed_at(now) {
            return Ok(attempt);
        }
        let deadline = attempt.deadline;
        self.finalize_locked(attempt, CompletionReason::Expired, deadline)
            .await
    }

    /// Caller must hold the attempt's section.
    async fn finalize_locked(
        &self,
        mut attempt: Attempt,
        reason: CompletionReason,
        at: DateTime<Utc>,
    ) -> Result<Attempt, AttemptError> {
        if !attempt.is_in_progress() {
            tracing::debug!(
                "Attempt {} already {}, completion is a no-op",
                attempt.id,
                attempt.status
            );
            return Ok(attempt);
        }

        // A manual submit that arrives after the deadline is an expiry.
        let (reason, at) = match reason {
            CompletionReason::Manual if at >= attempt.deadline => {
                (CompletionReason::Expired, attempt.deadline)
            }
            _ => (reason, at),
        };

        attempt.finalize(reason, at);
        self.with_store("save_attempt", self.store.save_attempt(&attempt))
            .await?;
        self.time_guard.cancel(&attempt.id);

        let kind = match reason {
            CompletionReason::Manual => ProgressEventKind::Completed,
            CompletionReason::Expired => ProgressEventKind::Expired,
        };
        self.publisher
            .publish(ProgressEvent::for_attempt(kind, &attempt, at));

        ATTEMPTS_TOTAL
            .with_label_values(&[attempt.status.as_str()])
            .inc();
        ATTEMPTS_ACTIVE.dec();
        tracing::info!(
            "Attempt finalized: id={}, status={}, score={}/{}, percentage={:.1}",
            attempt.id,
            attempt.status,
            attempt.score,
            attempt.max_score,
            attempt.percentage
        );

        Ok(attempt)
    }

    fn arm_deadline(&self, attempt: &Attempt) {
        let service = self.clone();
        let attempt_id = attempt.id.clone();
        let deadline = attempt.deadline;

        self.time_guard.arm(&attempt.id, deadline, move || async move {
            if let Err(e) = service
                .complete_attempt(&attempt_id, deadline, CompletionReason::Expired)
                .await
            {
                tracing::error!(
                    "Failed to expire attempt {} at deadline: {}",
                    attempt_id,
                    e
                );
            }
        });
    }

    /// Bounds a store call by the configured timeout. A timed-out call is
    /// dropped before it completes, so it commits nothing.
    async fn with_store<T, F>(&self, operation: &'static str, call: F) -> Result<T, AttemptError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let timeout = self.store_timeout;
        track_store_operation(operation, async move {
            match tokio::time::timeout(timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout {
                    operation,
                    after: timeout,
                }),
            }
        })
        .await
        .map_err(AttemptError::from)
    }
}

fn record_rejection(err: &AttemptError) {
    ATTEMPT_REJECTIONS_TOTAL
        .with_label_values(&[err.kind()])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnswerKey, Question, TestFamily};
    use crate::store::InMemoryAttemptStore;
    use crate::utils::ManualClock;
    use chrono::TimeZone;

    fn orthoeopy_test(max_attempts: u32) -> TestDefinition {
        TestDefinition {
            id: "orth-1".to_string(),
            title: "Ударения".to_string(),
            family: TestFamily::Orthoeopy,
            questions: vec![
                Question {
                    id: "q1".to_string(),
                    prompt: "звонит".to_string(),
                    points: 2,
                    key: AnswerKey::Orthoeopy { stress_position: 2 },
                },
                Question {
                    id: "q2".to_string(),
                    prompt: "торты".to_string(),
                    points: 1,
                    key: AnswerKey::Orthoeopy { stress_position: 1 },
                },
            ],
            time_limit_minutes: 30,
            max_attempts,
            start_date: None,
            end_date: None,
        }
    }

    fn service(max_attempts: u32) -> (AttemptService, DateTime<Utc>) {
        let (service, _, now) = service_with_store(max_attempts);
        (service, now)
    }

    fn service_with_store(
        max_attempts: u32,
    ) -> (AttemptService, Arc<InMemoryAttemptStore>, DateTime<Utc>) {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
        let store = Arc::new(InMemoryAttemptStore::with_tests([orthoeopy_test(max_attempts)]));
        let clock = Arc::new(ManualClock::new(now));
        let service = AttemptService::new(
            store.clone(),
            clock,
            ProgressPublisher::start(16),
            Duration::from_millis(200),
        );
        (service, store, now)
    }

    #[tokio::test]
    async fn resubmission_replaces_points() {
        let (service, now) = service(1);
        let attempt = service.start_attempt("s1", "orth-1", now).await.unwrap();

        let first = service
            .submit_answer(&attempt.id, "q1", RawAnswer::Stress { position: 2 }, now)
            .await
            .unwrap();
        assert_eq!(first.total_score, 2);

        let second = service
            .submit_answer(&attempt.id, "q1", RawAnswer::Stress { position: 3 }, now)
            .await
            .unwrap();
        assert_eq!(second.total_score, 0);
        assert_eq!(second.questions_answered, 1);
        assert!(!second.record.is_correct);
    }

    #[tokio::test]
    async fn completion_is_idempotent() {
        let (service, now) = service(1);
        let attempt = service.start_attempt("s1", "orth-1", now).await.unwrap();
        service
            .submit_answer(&attempt.id, "q2", RawAnswer::Stress { position: 1 }, now)
            .await
            .unwrap();

        let done_at = now + chrono::Duration::minutes(5);
        let first = service
            .complete_attempt(&attempt.id, done_at, CompletionReason::Manual)
            .await
            .unwrap();
        let again = service
            .complete_attempt(&attempt.id, done_at + chrono::Duration::minutes(1), CompletionReason::Manual)
            .await
            .unwrap();

        assert_eq!(first.status, AttemptStatus::Completed);
        assert_eq!(first.completed_at, Some(done_at));
        assert_eq!(again.completed_at, first.completed_at);
        assert!((first.percentage - 100.0 / 3.0).abs() < 1e-9);
        assert!(!service.time_guard().is_armed(&attempt.id));
    }

    #[tokio::test]
    async fn manual_completion_after_deadline_is_expiry() {
        let (service, now) = service(1);
        let attempt = service.start_attempt("s1", "orth-1", now).await.unwrap();

        let late = now + chrono::Duration::minutes(45);
        let done = service
            .complete_attempt(&attempt.id, late, CompletionReason::Manual)
            .await
            .unwrap();

        assert_eq!(done.status, AttemptStatus::Expired);
        assert_eq!(done.completed_at, Some(attempt.deadline));
    }

    #[tokio::test]
    async fn second_start_reports_active_attempt() {
        let (service, now) = service(3);
        let attempt = service.start_attempt("s1", "orth-1", now).await.unwrap();

        let err = service.start_attempt("s1", "orth-1", now).await.unwrap_err();
        match err {
            AttemptError::AttemptAlreadyInProgress { attempt_id, .. } => {
                assert_eq!(attempt_id.as_deref(), Some(attempt.id.as_str()))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn lapsed_attempt_does_not_block_restart() {
        let (service, now) = service(3);
        let first = service.start_attempt("s1", "orth-1", now).await.unwrap();

        let later = now + chrono::Duration::minutes(40);
        let second = service.start_attempt("s1", "orth-1", later).await.unwrap();
        assert_eq!(second.attempt_number, 2);

        let first = service.get_attempt_status(&first.id, later).await.unwrap();
        assert_eq!(first.status, AttemptStatus::Expired);
        assert_eq!(first.completed_at, Some(first.deadline));
    }

    #[tokio::test]
    async fn lock_registry_is_emptied_on_every_path() {
        let (service, now) = service(1);

        for i in 0..100 {
            let err = service
                .submit_answer(&format!("missing-{}", i), "q1", RawAnswer::Stress { position: 1 }, now)
                .await
                .unwrap_err();
            assert!(matches!(err, AttemptError::AttemptNotFound { .. }));
        }
        assert!(service
            .complete_attempt("missing", now, CompletionReason::Manual)
            .await
            .is_err());

        let attempt = service.start_attempt("s1", "orth-1", now).await.unwrap();
        // Refused: already in progress
        assert!(service.start_attempt("s1", "orth-1", now).await.is_err());

        // Submit past the deadline expires the attempt lazily
        let late = now + chrono::Duration::minutes(31);
        let err = service
            .submit_answer(&attempt.id, "q1", RawAnswer::Stress { position: 2 }, late)
            .await
            .unwrap_err();
        assert!(matches!(err, AttemptError::AttemptExpired { .. }));

        let second = service.start_attempt("s1", "orth-1", late).await.unwrap();
        service
            .complete_attempt(&second.id, late, CompletionReason::Manual)
            .await
            .unwrap();
        // Refused: ceiling reached
        for _ in 0..10 {
            let err = service.start_attempt("s1", "orth-1", late).await.unwrap_err();
            assert!(matches!(err, AttemptError::AttemptLimitExceeded { .. }));
        }

        assert_eq!(service.lock_entries(), 0);
    }

    #[tokio::test]
    async fn recovery_rearms_and_expires() {
        let (service, store, now) = service_with_store(3);
        let test = orthoeopy_test(3);

        // Written straight to the store, as if left over from a previous process
        let fresh = Attempt::open(&test, "s1", 1, now - chrono::Duration::minutes(10));
        let stale = Attempt::open(&test, "s2", 1, now - chrono::Duration::minutes(50));
        store.create_attempt(&fresh).await.unwrap();
        store.create_attempt(&stale).await.unwrap();

        let report = service.recover_deadlines(now).await.unwrap();
        assert_eq!(report, RecoveryReport { rearmed: 1, expired: 1 });
        assert!(service.time_guard().is_armed(&fresh.id));

        let stale = service.get_attempt_status(&stale.id, now).await.unwrap();
        assert_eq!(stale.status, AttemptStatus::Expired);
    }
}
