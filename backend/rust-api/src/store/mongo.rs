use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{FindOptions, IndexOptions, ReplaceOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};

use super::{AttemptStore, StoreError};
use crate::models::{Attempt, AttemptCounts, AttemptStatus, QuestionAnswerRecord, TestDefinition};
use crate::utils::retry::{retry_async_when, RetryConfig};

const TESTS_COLLECTION: &str = "tests";
const ATTEMPTS_COLLECTION: &str = "attempts";
const ANSWERS_COLLECTION: &str = "attempt_answers";

const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, Serialize, Deserialize)]
struct AnswerDocument {
    attempt_id: String,
    #[serde(flatten)]
    record: QuestionAnswerRecord,
}

/// Хранилище попыток в MongoDB.
///
/// Единственность активной попытки держится на частичном уникальном индексе
/// `(student_id, test_id)` с условием `status = "in_progress"`: две параллельные
/// вставки для одной пары не пройдут обе даже с разных экземпляров движка.
/// Чтения повторяются при временных ошибках драйвера, записи нет.
pub struct MongoAttemptStore {
    client: Client,
    mongo: Database,
    retry: RetryConfig,
}

impl MongoAttemptStore {
    pub fn new(client: Client, database: &str) -> Self {
        Self {
            mongo: client.database(database),
            client,
            retry: RetryConfig::default(),
        }
    }

    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await?;
        Ok(Self::new(client, database))
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn tests(&self) -> Collection<TestDefinition> {
        self.mongo.collection(TESTS_COLLECTION)
    }

    fn attempts(&self) -> Collection<Attempt> {
        self.mongo.collection(ATTEMPTS_COLLECTION)
    }

    fn answers(&self) -> Collection<AnswerDocument> {
        self.mongo.collection(ANSWERS_COLLECTION)
    }

    /// Создаёт индексы, на которых держатся инварианты хранилища.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let one_active = IndexModel::builder()
            .keys(doc! { "student_id": 1, "test_id": 1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .partial_filter_expression(doc! { "status": AttemptStatus::InProgress.as_str() })
                    .name("one_active_attempt_per_student".to_string())
                    .build(),
            )
            .build();
        self.attempts().create_index(one_active).await?;

        let attempt_id = IndexModel::builder()
            .keys(doc! { "id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.attempts().create_index(attempt_id).await?;

        let by_test = IndexModel::builder()
            .keys(doc! { "test_id": 1, "started_at": 1 })
            .build();
        self.attempts().create_index(by_test).await?;

        let answer_key = IndexModel::builder()
            .keys(doc! { "attempt_id": 1, "question_id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.answers().create_index(answer_key).await?;

        let test_id = IndexModel::builder()
            .keys(doc! { "id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.tests().create_index(test_id).await?;

        tracing::info!("MongoDB indexes ensured for attempt store");
        Ok(())
    }

    async fn find_attempts(
        &self,
        filter: mongodb::bson::Document,
    ) -> Result<Vec<Attempt>, StoreError> {
        let attempts = retry_async_when(self.retry.clone(), is_transient, || async {
            self.attempts()
                .find(filter.clone())
                .with_options(FindOptions::builder().sort(doc! { "started_at": 1 }).build())
                .await?
                .try_collect::<Vec<Attempt>>()
                .await
        })
        .await?;
        Ok(attempts)
    }

    async fn write_progress(
        &self,
        session: &mut mongodb::ClientSession,
        attempt: &Attempt,
        record: &QuestionAnswerRecord,
    ) -> Result<(), MongoError> {
        let answer = AnswerDocument {
            attempt_id: attempt.id.clone(),
            record: record.clone(),
        };
        self.answers()
            .replace_one(
                doc! { "attempt_id": &attempt.id, "question_id": &record.question_id },
                &answer,
            )
            .with_options(ReplaceOptions::builder().upsert(true).build())
            .session(&mut *session)
            .await?;
        self.attempts()
            .replace_one(doc! { "id": &attempt.id }, attempt)
            .session(&mut *session)
            .await?;
        Ok(())
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE
    )
}

fn is_transient(err: &MongoError) -> bool {
    if err.contains_label("TransientTransactionError") {
        return true;
    }
    matches!(
        err.kind.as_ref(),
        ErrorKind::Io(_) | ErrorKind::ServerSelection { .. } | ErrorKind::ConnectionPoolCleared { .. }
    )
}

#[async_trait]
impl AttemptStore for MongoAttemptStore {
    async fn load_test_definition(
        &self,
        test_id: &str,
    ) -> Result<Option<TestDefinition>, StoreError> {
        let test = retry_async_when(self.retry.clone(), is_transient, || async {
            self.tests().find_one(doc! { "id": test_id }).await
        })
        .await?;
        Ok(test)
    }

    async fn load_active_attempt(
        &self,
        student_id: &str,
        test_id: &str,
    ) -> Result<Option<Attempt>, StoreError> {
        let filter = doc! {
            "student_id": student_id,
            "test_id": test_id,
            "status": AttemptStatus::InProgress.as_str(),
        };
        let attempt = retry_async_when(self.retry.clone(), is_transient, || async {
            self.attempts().find_one(filter.clone()).await
        })
        .await?;
        Ok(attempt)
    }

    async fn count_prior_attempts(
        &self,
        student_id: &str,
        test_id: &str,
    ) -> Result<AttemptCounts, StoreError> {
        let total = retry_async_when(self.retry.clone(), is_transient, || async {
            self.attempts()
                .count_documents(doc! { "student_id": student_id, "test_id": test_id })
                .await
        })
        .await?;
        let expired = retry_async_when(self.retry.clone(), is_transient, || async {
            self.attempts()
                .count_documents(doc! {
                    "student_id": student_id,
                    "test_id": test_id,
                    "status": AttemptStatus::Expired.as_str(),
                })
                .await
        })
        .await?;

        Ok(AttemptCounts {
            total: total as u32,
            expired: expired as u32,
        })
    }

    async fn create_attempt(&self, attempt: &Attempt) -> Result<(), StoreError> {
        match self.attempts().insert_one(attempt).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::Conflict {
                student_id: attempt.student_id.clone(),
                test_id: attempt.test_id.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_attempt(&self, attempt_id: &str) -> Result<Option<Attempt>, StoreError> {
        let attempt = retry_async_when(self.retry.clone(), is_transient, || async {
            self.attempts().find_one(doc! { "id": attempt_id }).await
        })
        .await?;
        Ok(attempt)
    }

    async fn save_attempt(&self, attempt: &Attempt) -> Result<(), StoreError> {
        self.attempts()
            .replace_one(doc! { "id": &attempt.id }, attempt)
            .await?;
        Ok(())
    }

    async fn load_answer(
        &self,
        attempt_id: &str,
        question_id: &str,
    ) -> Result<Option<QuestionAnswerRecord>, StoreError> {
        let answer = retry_async_when(self.retry.clone(), is_transient, || async {
            self.answers()
                .find_one(doc! { "attempt_id": attempt_id, "question_id": question_id })
                .await
        })
        .await?;
        Ok(answer.map(|doc| doc.record))
    }

    async fn save_answer(
        &self,
        attempt_id: &str,
        record: &QuestionAnswerRecord,
    ) -> Result<(), StoreError> {
        let answer = AnswerDocument {
            attempt_id: attempt_id.to_string(),
            record: record.clone(),
        };
        self.answers()
            .replace_one(
                doc! { "attempt_id": attempt_id, "question_id": &record.question_id },
                &answer,
            )
            .with_options(ReplaceOptions::builder().upsert(true).build())
            .await?;
        Ok(())
    }

    async fn save_progress(
        &self,
        attempt: &Attempt,
        record: &QuestionAnswerRecord,
    ) -> Result<(), StoreError> {
        let mut session = self.client.start_session().await?;
        session.start_transaction().await?;

        match self.write_progress(&mut session, attempt, record).await {
            Ok(()) => {
                session.commit_transaction().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    tracing::warn!("Failed to abort answer transaction: {}", abort_err);
                }
                Err(e.into())
            }
        }
    }

    async fn list_answers(
        &self,
        attempt_id: &str,
    ) -> Result<Vec<QuestionAnswerRecord>, StoreError> {
        let docs = retry_async_when(self.retry.clone(), is_transient, || async {
            self.answers()
                .find(doc! { "attempt_id": attempt_id })
                .with_options(FindOptions::builder().sort(doc! { "question_id": 1 }).build())
                .await?
                .try_collect::<Vec<AnswerDocument>>()
                .await
        })
        .await?;
        Ok(docs.into_iter().map(|doc| doc.record).collect())
    }

    async fn list_attempts_for_test(&self, test_id: &str) -> Result<Vec<Attempt>, StoreError> {
        self.find_attempts(doc! { "test_id": test_id }).await
    }

    async fn list_in_progress(&self) -> Result<Vec<Attempt>, StoreError> {
        self.find_attempts(doc! { "status": AttemptStatus::InProgress.as_str() })
            .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.mongo.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }
}
