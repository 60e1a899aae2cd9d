//! Проверка ответов, по одной политике на семейство тестов.
//!
//! Любая политика работает по принципу всё или ничего: полный балл вопроса за
//! точное совпадение, иначе ноль. Ответ чужой формы или пустой ответ просто
//! неверен.

use std::collections::BTreeSet;

use crate::models::{AnswerKey, Question, RawAnswer, TestFamily};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub is_correct: bool,
    pub points: i32,
}

impl Evaluation {
    fn of(question: &Question, matched: bool) -> Self {
        Self {
            is_correct: matched,
            points: if matched { question.points } else { 0 },
        }
    }
}

pub trait ScoringPolicy: Send + Sync {
    fn family(&self) -> TestFamily;

    fn evaluate(&self, question: &Question, answer: &RawAnswer) -> Evaluation;
}

pub fn policy_for(family: TestFamily) -> &'static dyn ScoringPolicy {
    match family {
        TestFamily::Regular => &ChoicePolicy,
        TestFamily::Spelling => &SpellingPolicy,
        TestFamily::Punctuation => &PunctuationPolicy,
        TestFamily::Orthoeopy => &OrthoeopyPolicy,
    }
}

/// Выбор вариантов и верно/неверно.
pub struct ChoicePolicy;

impl ScoringPolicy for ChoicePolicy {
    fn family(&self) -> TestFamily {
        TestFamily::Regular
    }

    fn evaluate(&self, question: &Question, answer: &RawAnswer) -> Evaluation {
        let (AnswerKey::Choice { options }, RawAnswer::Choice { option_ids }) =
            (&question.key, answer)
        else {
            return Evaluation::of(question, false);
        };

        let submitted: BTreeSet<&str> = option_ids
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .collect();
        if submitted.is_empty() {
            return Evaluation::of(question, false);
        }

        let expected: BTreeSet<&str> = options
            .iter()
            .filter(|option| option.is_correct)
            .map(|option| option.id.as_str())
            .collect();

        Evaluation::of(question, submitted == expected)
    }
}

/// Пропущенная буква: сравнение без учёта регистра.
pub struct SpellingPolicy;

impl ScoringPolicy for SpellingPolicy {
    fn family(&self) -> TestFamily {
        TestFamily::Spelling
    }

    fn evaluate(&self, question: &Question, answer: &RawAnswer) -> Evaluation {
        let (AnswerKey::Spelling { letter: expected }, RawAnswer::Letter { letter }) =
            (&question.key, answer)
        else {
            return Evaluation::of(question, false);
        };

        let submitted = letter.trim().to_lowercase();
        if submitted.is_empty() {
            return Evaluation::of(question, false);
        }

        Evaluation::of(question, submitted == expected.trim().to_lowercase())
    }
}

pub struct PunctuationPolicy;

impl ScoringPolicy for PunctuationPolicy {
    fn family(&self) -> TestFamily {
        TestFamily::Punctuation
    }

    fn evaluate(&self, question: &Question, answer: &RawAnswer) -> Evaluation {
        let (AnswerKey::Punctuation { positions: expected }, RawAnswer::Positions { positions }) =
            (&question.key, answer)
        else {
            return Evaluation::of(question, false);
        };

        if positions.is_empty() {
            return Evaluation::of(question, false);
        }

        let submitted: BTreeSet<u32> = positions.iter().copied().collect();
        let expected: BTreeSet<u32> = expected.iter().copied().collect();
        Evaluation::of(question, submitted == expected)
    }
}

/// Позиция ударения в слове.
pub struct OrthoeopyPolicy;

impl ScoringPolicy for OrthoeopyPolicy {
    fn family(&self) -> TestFamily {
        TestFamily::Orthoeopy
    }

    fn evaluate(&self, question: &Question, answer: &RawAnswer) -> Evaluation {
        match (&question.key, answer) {
            (AnswerKey::Orthoeopy { stress_position }, RawAnswer::Stress { position }) => {
                Evaluation::of(question, position == stress_position)
            }
            _ => Evaluation::of(question, false),
        }
    }
}
