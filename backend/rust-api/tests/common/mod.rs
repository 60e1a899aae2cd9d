#![allow(dead_code)]

use assessment_api::{
    config::Config,
    create_router,
    models::{AnswerKey, ChoiceOption, Question, TestDefinition, TestFamily},
    services::{AppState, AttemptService},
    store::InMemoryAttemptStore,
    utils::ManualClock,
};
use axum::Router;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

pub const REGULAR_TEST: &str = "regular-1";
pub const SPELLING_TEST: &str = "spelling-1";
pub const PUNCTUATION_TEST: &str = "punctuation-1";
pub const ORTHOEOPY_TEST: &str = "orthoeopy-1";
pub const WINDOWED_TEST: &str = "windowed-1";
pub const EMPTY_TEST: &str = "empty-1";

pub struct TestApp {
    pub state: Arc<AppState>,
    pub store: Arc<InMemoryAttemptStore>,
    pub clock: Arc<ManualClock>,
}

impl TestApp {
    pub fn service(&self) -> &AttemptService {
        &self.state.attempts
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.service().now()
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
}

pub fn create_test_app() -> TestApp {
    create_test_app_with(Config {
        store_timeout_ms: 200,
        events_channel_capacity: 64,
        ..Config::default()
    })
}

pub fn create_test_app_with(config: Config) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let store = Arc::new(InMemoryAttemptStore::with_tests(fixtures()));
    let clock = Arc::new(ManualClock::new(t0()));
    let state = Arc::new(AppState::with_store(config, store.clone(), clock.clone()));

    TestApp {
        state,
        store,
        clock,
    }
}

pub fn fixtures() -> Vec<TestDefinition> {
    vec![
        regular_test(),
        spelling_test(),
        punctuation_test(),
        orthoeopy_test(),
        windowed_test(),
        empty_test(),
    ]
}

fn option(id: &str, text: &str, is_correct: bool) -> ChoiceOption {
    ChoiceOption {
        id: id.to_string(),
        text: text.to_string(),
        is_correct,
    }
}

fn definition(id: &str, family: TestFamily, questions: Vec<Question>) -> TestDefinition {
    TestDefinition {
        id: id.to_string(),
        title: format!("{} test", family.as_str()),
        family,
        questions,
        time_limit_minutes: 30,
        max_attempts: 2,
        start_date: None,
        end_date: None,
    }
}

pub fn regular_test() -> TestDefinition {
    definition(
        REGULAR_TEST,
        TestFamily::Regular,
        vec![
            Question {
                id: "q1".to_string(),
                prompt: "Выберите существительные".to_string(),
                points: 2,
                key: AnswerKey::Choice {
                    options: vec![
                        option("A", "дом", true),
                        option("B", "бежать", false),
                        option("C", "река", true),
                    ],
                },
            },
            Question {
                id: "q2".to_string(),
                prompt: "«Жи» и «ши» пишутся с буквой «и»".to_string(),
                points: 1,
                key: AnswerKey::Choice {
                    options: vec![option("T", "Верно", true), option("F", "Неверно", false)],
                },
            },
        ],
    )
}

pub fn spelling_test() -> TestDefinition {
    definition(
        SPELLING_TEST,
        TestFamily::Spelling,
        vec![
            Question {
                id: "q1".to_string(),
                prompt: "сл_ва".to_string(),
                points: 1,
                key: AnswerKey::Spelling {
                    letter: "Е".to_string(),
                },
            },
            Question {
                id: "q2".to_string(),
                prompt: "к_рова".to_string(),
                points: 1,
                key: AnswerKey::Spelling {
                    letter: "о".to_string(),
                },
            },
        ],
    )
}

pub fn punctuation_test() -> TestDefinition {
    definition(
        PUNCTUATION_TEST,
        TestFamily::Punctuation,
        vec![Question {
            id: "q1".to_string(),
            prompt: "Мы вышли из дома когда стемнело и пошли к реке".to_string(),
            points: 3,
            key: AnswerKey::Punctuation {
                positions: vec![2, 4],
            },
        }],
    )
}

pub fn orthoeopy_test() -> TestDefinition {
    definition(
        ORTHOEOPY_TEST,
        TestFamily::Orthoeopy,
        vec![Question {
            id: "q1".to_string(),
            prompt: "звонит".to_string(),
            points: 1,
            key: AnswerKey::Orthoeopy { stress_position: 2 },
        }],
    )
}

/// Open from T0 + 1h to T0 + 2h.
pub fn windowed_test() -> TestDefinition {
    TestDefinition {
        start_date: Some(t0() + Duration::hours(1)),
        end_date: Some(t0() + Duration::hours(2)),
        ..definition(WINDOWED_TEST, TestFamily::Orthoeopy, orthoeopy_test().questions)
    }
}

pub fn empty_test() -> TestDefinition {
    definition(EMPTY_TEST, TestFamily::Regular, Vec::new())
}
