use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use validator::Validate;

/// An answer as given by a student, or as the expected answer of a question:
/// either the index of an option or free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Index(u32),
    Text(String),
}

impl fmt::Display for AnswerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerValue::Index(index) => write!(f, "{}", index),
            AnswerValue::Text(text) => write!(f, "{}", text),
        }
    }
}

fn normalize_text(value: &str) -> String {
    value.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(alias = "prompt")]
    pub question: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    pub answer: AnswerValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Question {
    /// Index answers must match exactly; free-text answers ignore case and
    /// surrounding whitespace. Mixed kinds never match.
    pub fn is_correct(&self, given: &AnswerValue) -> bool {
        match (&self.answer, given) {
            (AnswerValue::Index(expected), AnswerValue::Index(actual)) => expected == actual,
            (AnswerValue::Text(expected), AnswerValue::Text(actual)) => {
                normalize_text(expected) == normalize_text(actual)
            }
            _ => false,
        }
    }

    /// Human-readable rendering of an answer, resolving option indexes to
    /// their text when the option exists.
    pub fn describe(&self, value: &AnswerValue) -> String {
        match value {
            AnswerValue::Index(index) => match self.options.get(*index as usize) {
                Some(option) => format!("{} ({})", option, index),
                None => index.to_string(),
            },
            AnswerValue::Text(text) => text.clone(),
        }
    }
}

/// A generated quiz. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: String,
    pub title: String,
    pub grade_level: String,
    pub subject: String,
    pub difficulty: String,
    pub total_questions: u32,
    pub max_score: u32,
    pub questions: Vec<Question>,
    pub created_at: DateTime<Utc>,
}

impl Quiz {
    pub fn question_count(&self) -> usize {
        self.questions.len()
    }
}

/// Raw provider output before it becomes a [`Quiz`].
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedQuiz {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSummary {
    pub id: String,
    pub title: String,
    pub subject: String,
    pub difficulty: String,
    pub grade_level: String,
}

impl From<&Quiz> for QuizSummary {
    fn from(quiz: &Quiz) -> Self {
        Self {
            id: quiz.id.clone(),
            title: quiz.title.clone(),
            subject: quiz.subject.clone(),
            difficulty: quiz.difficulty.clone(),
            grade_level: quiz.grade_level.clone(),
        }
    }
}

/// Accepts `5` as well as `"5"` for grade levels.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateQuizRequest {
    #[serde(deserialize_with = "string_or_number")]
    #[validate(length(min = 1, max = 32, message = "grade_level is required"))]
    pub grade_level: String,
    #[validate(length(min = 1, max = 100, message = "subject is required"))]
    pub subject: String,
    #[serde(default)]
    #[validate(length(max = 32))]
    pub difficulty: Option<String>,
    #[serde(default)]
    #[validate(range(min = 1, message = "total_questions must be at least 1"))]
    pub total_questions: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CreateQuizResponse {
    pub message: String,
    pub quiz: Quiz,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct HintRequest {
    #[validate(length(min = 1, max = 2000, message = "question is required"))]
    pub question: String,
    #[serde(alias = "quizId")]
    #[validate(length(min = 1, message = "quiz_id is required"))]
    pub quiz_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hint {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HintResponse {
    pub hint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintRecord {
    pub id: String,
    pub quiz_id: String,
    /// First characters of the question the hint was generated for.
    pub question_id: String,
    pub hint_text: String,
    pub created_at: DateTime<Utc>,
}
