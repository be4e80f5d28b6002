use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::quiz::AnswerValue;

/// One scored attempt at a quiz. Never mutated after creation; a retry is a
/// new record pointing back at the attempt it repeats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub identity: String,
    pub quiz_id: String,
    pub answers: Vec<AnswerValue>,
    pub score: u32,
    pub total: u32,
    pub submitted_at: DateTime<Utc>,
    pub is_retry: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_submission_id: Option<String>,
}

/// Per-question outcome returned with a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question: String,
    pub user_answer: AnswerValue,
    pub correct_answer: AnswerValue,
    pub is_correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitQuizRequest {
    #[serde(alias = "quizId")]
    #[validate(length(min = 1, message = "quiz_id is required"))]
    pub quiz_id: String,
    pub answers: Vec<AnswerValue>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitQuizResponse {
    pub score: u32,
    pub total: u32,
    pub percentage: u32,
    pub results: Vec<QuestionResult>,
    pub submission: Submission,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RetryResponse {
    pub submission: Submission,
    pub original: Submission,
}

/// Query string of `GET /quiz/results`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultsQuery {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub grade: Option<String>,
    pub subject: Option<String>,
    pub min_score: Option<u32>,
    pub max_score: Option<u32>,
}

/// Store-level part of the results filter; quiz metadata is matched after the join.
#[derive(Debug, Clone, Default)]
pub struct SubmissionFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub min_score: Option<u32>,
    pub max_score: Option<u32>,
}

impl SubmissionFilter {
    pub fn matches(&self, submission: &Submission) -> bool {
        self.from.map_or(true, |from| submission.submitted_at >= from)
            && self.to.map_or(true, |to| submission.submitted_at <= to)
            && self.min_score.map_or(true, |min| submission.score >= min)
            && self.max_score.map_or(true, |max| submission.score <= max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizMetadata {
    pub title: String,
    pub grade_level: String,
    pub subject: String,
    pub difficulty: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionSummary {
    #[serde(flatten)]
    pub submission: Submission,
    /// Missing when the quiz was removed after the attempt.
    pub quiz: Option<QuizMetadata>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsResponse {
    pub results: Vec<SubmissionSummary>,
}

pub fn percentage(score: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    ((score as f64 / total as f64) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn submission(score: u32, submitted_at: DateTime<Utc>) -> Submission {
        Submission {
            id: "s".into(),
            identity: "user:1".into(),
            quiz_id: "q".into(),
            answers: vec![],
            score,
            total: 5,
            submitted_at,
            is_retry: false,
            original_submission_id: None,
        }
    }

    #[test]
    fn filter_bounds_are_inclusive() {
        let now = Utc::now();
        let filter = SubmissionFilter {
            from: Some(now - Duration::hours(1)),
            to: Some(now),
            min_score: Some(2),
            max_score: Some(4),
        };

        assert!(filter.matches(&submission(2, now)));
        assert!(filter.matches(&submission(4, now - Duration::hours(1))));
        assert!(!filter.matches(&submission(5, now)));
        assert!(!filter.matches(&submission(3, now - Duration::hours(2))));
    }

    #[test]
    fn percentage_rounds_and_handles_empty_quiz() {
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(3, 3), 100);
        assert_eq!(percentage(0, 0), 0);
    }
}
