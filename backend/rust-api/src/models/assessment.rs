use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

/// Семейство теста: определяет правило сопоставления ответа.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TestFamily {
    Regular,
    Spelling,
    Punctuation,
    Orthoeopy,
}

impl TestFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestFamily::Regular => "regular",
            TestFamily::Spelling => "spelling",
            TestFamily::Punctuation => "punctuation",
            TestFamily::Orthoeopy => "orthoeopy",
        }
    }
}

impl FromStr for TestFamily {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "regular" => Ok(TestFamily::Regular),
            "spelling" => Ok(TestFamily::Spelling),
            "punctuation" => Ok(TestFamily::Punctuation),
            "orthoeopy" => Ok(TestFamily::Orthoeopy),
            _ => Err(format!("Invalid test family: {}", value)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChoiceOption {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

/// Правильный ответ на вопрос, своя форма для каждого семейства.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerKey {
    /// Выбор вариантов / верно-неверно: нужно отметить все варианты с `is_correct`.
    Choice { options: Vec<ChoiceOption> },
    /// Пропущенная буква в слове (`к_рова` -> `о`).
    Spelling { letter: String },
    /// Позиции символов, где должен стоять знак препинания.
    Punctuation { positions: Vec<u32> },
    /// Номер ударного слога.
    Orthoeopy { stress_position: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    pub id: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(deserialize_with = "non_negative_points")]
    pub points: i32,
    pub key: AnswerKey,
}

// Баллы каталога не бывают отрицательными: итог теста только растёт
fn non_negative_points<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let points = i32::deserialize(deserializer)?;
    if points < 0 {
        return Err(serde::de::Error::custom(format!(
            "question points must be non-negative, got {}",
            points
        )));
    }
    Ok(points)
}

/// Тест из внешнего каталога. Движок его только читает.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestDefinition {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub family: TestFamily,
    pub questions: Vec<Question>,
    pub time_limit_minutes: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

impl TestDefinition {
    pub fn max_score(&self) -> i32 {
        self.questions
            .iter()
            .fold(0i32, |total, q| total.saturating_add(q.points))
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    /// Обе границы окна включительные, отсутствующая граница открыта.
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        let after_start = self.start_date.is_none_or(|start| now >= start);
        let before_end = self.end_date.is_none_or(|end| now <= end);
        after_start && before_end
    }

    pub fn deadline_for(&self, started_at: DateTime<Utc>) -> DateTime<Utc> {
        started_at + Duration::minutes(i64::from(self.time_limit_minutes))
    }
}
