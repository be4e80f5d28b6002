use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::AppState;
use crate::error::ApiError;
use crate::metrics::record_submission;
use crate::models::quiz::{AnswerValue, Quiz};
use crate::models::submission::{
    QuestionResult, QuizMetadata, ResultsQuery, Submission, SubmissionFilter, SubmissionSummary,
};
use crate::models::Identity;
use crate::storage::{RecordStore, StoreError};
use crate::utils::time::Clock;

const COOLDOWN_MESSAGE: &str =
    "You have already submitted this quiz recently. Please wait before submitting again.";

#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub submission: Submission,
    pub quiz: Quiz,
    pub results: Vec<QuestionResult>,
}

/// Scores `answers` against `quiz`. Callers guarantee equal lengths.
pub fn grade_answers(quiz: &Quiz, answers: &[AnswerValue]) -> (u32, Vec<QuestionResult>) {
    let results: Vec<QuestionResult> = quiz
        .questions
        .iter()
        .zip(answers)
        .map(|(question, given)| QuestionResult {
            question: question.question.clone(),
            user_answer: given.clone(),
            correct_answer: question.answer.clone(),
            is_correct: question.is_correct(given),
            explanation: question.explanation.clone(),
        })
        .collect();
    let score = results.iter().filter(|r| r.is_correct).count() as u32;
    (score, results)
}

/// Scores submissions, enforces the resubmission cooldown and records retry
/// lineage. Submissions are append-only.
pub struct SubmissionLedger {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    cooldown: Duration,
}

impl SubmissionLedger {
    pub fn new(state: &AppState) -> Self {
        Self::with_parts(
            state.store.clone(),
            state.clock.clone(),
            state.config.quiz.submission_cooldown(),
        )
    }

    pub fn with_parts(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>, cooldown: Duration) -> Self {
        Self {
            store,
            clock,
            cooldown,
        }
    }

    pub async fn submit(
        &self,
        identity: &Identity,
        quiz_id: &str,
        answers: Vec<AnswerValue>,
    ) -> Result<SubmissionOutcome, ApiError> {
        let quiz = self
            .store
            .find_quiz(quiz_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Quiz not found"))?;

        if answers.len() != quiz.question_count() {
            record_submission("invalid");
            return Err(ApiError::validation(format!(
                "Expected {} answers, got {}",
                quiz.question_count(),
                answers.len()
            )));
        }

        let (score, results) = grade_answers(&quiz, &answers);
        let submission = Submission {
            id: uuid::Uuid::new_v4().to_string(),
            identity: identity.key().to_string(),
            quiz_id: quiz.id.clone(),
            answers,
            score,
            total: quiz.question_count() as u32,
            submitted_at: self.clock.now(),
            is_retry: false,
            original_submission_id: None,
        };

        match self
            .store
            .insert_submission(&submission, Some(self.cooldown))
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                record_submission("cooldown");
                tracing::info!(identity = %identity, quiz_id = %quiz.id, "Submission rejected by cooldown");
                return Err(ApiError::rate_conflict(COOLDOWN_MESSAGE, Some(self.cooldown)));
            }
            Err(e) => return Err(e.into()),
        }

        record_submission("accepted");
        tracing::info!(
            identity = %identity,
            quiz_id = %quiz.id,
            submission_id = %submission.id,
            score,
            total = submission.total,
            "Submission recorded"
        );

        Ok(SubmissionOutcome {
            submission,
            quiz,
            results,
        })
    }

    /// Records a retry of `submission_id`, returning the new submission and
    /// the original. Retries never count toward the cooldown.
    pub async fn retry(
        &self,
        identity: &Identity,
        submission_id: &str,
    ) -> Result<(Submission, Submission), ApiError> {
        let original = self
            .store
            .find_submission(identity.key(), submission_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Submission not found"))?;

        match self.store.find_quiz(&original.quiz_id).await {
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!(
                quiz_id = %original.quiz_id,
                submission_id = %original.id,
                "Quiz for retried submission no longer exists"
            ),
            Err(e) => tracing::warn!(
                quiz_id = %original.quiz_id,
                error = %e,
                "Could not load quiz for retried submission"
            ),
        }

        let retry = Submission {
            id: uuid::Uuid::new_v4().to_string(),
            identity: original.identity.clone(),
            quiz_id: original.quiz_id.clone(),
            answers: original.answers.clone(),
            score: original.score,
            total: original.total,
            submitted_at: self.clock.now(),
            is_retry: true,
            original_submission_id: Some(original.id.clone()),
        };
        self.store.insert_submission(&retry, None).await?;

        record_submission("retry");
        tracing::info!(
            identity = %identity,
            submission_id = %retry.id,
            original_submission_id = %original.id,
            "Retry recorded"
        );
        Ok((retry, original))
    }

    /// Submissions of `identity` joined with quiz metadata, newest first.
    pub async fn results(
        &self,
        identity: &Identity,
        query: ResultsQuery,
    ) -> Result<Vec<SubmissionSummary>, ApiError> {
        if let (Some(min), Some(max)) = (query.min_score, query.max_score) {
            if min > max {
                return Err(ApiError::validation("min_score must not exceed max_score"));
            }
        }
        if let (Some(start), Some(end)) = (query.start_date, query.end_date) {
            if start > end {
                return Err(ApiError::validation("start_date must not be after end_date"));
            }
        }

        let filter = SubmissionFilter {
            from: query.start_date,
            to: query.end_date,
            min_score: query.min_score,
            max_score: query.max_score,
        };
        let submissions = self.store.find_submissions(identity.key(), &filter).await?;

        let mut quiz_ids: Vec<String> = submissions.iter().map(|s| s.quiz_id.clone()).collect();
        quiz_ids.sort();
        quiz_ids.dedup();
        let quizzes: HashMap<String, Quiz> = self
            .store
            .find_quizzes(&quiz_ids)
            .await?
            .into_iter()
            .map(|quiz| (quiz.id.clone(), quiz))
            .collect();

        let wanted = |expected: &Option<String>, actual: Option<&str>| match expected {
            None => true,
            Some(expected) => actual.is_some_and(|actual| actual.eq_ignore_ascii_case(expected.trim())),
        };

        let results = submissions
            .into_iter()
            .filter_map(|submission| {
                let quiz = quizzes.get(&submission.quiz_id);
                if !wanted(&query.grade, quiz.map(|q| q.grade_level.as_str()))
                    || !wanted(&query.subject, quiz.map(|q| q.subject.as_str()))
                {
                    return None;
                }
                Some(SubmissionSummary {
                    quiz: quiz.map(|q| QuizMetadata {
                        title: q.title.clone(),
                        grade_level: q.grade_level.clone(),
                        subject: q.subject.clone(),
                        difficulty: q.difficulty.clone(),
                    }),
                    submission,
                })
            })
            .collect();

        Ok(results)
    }
}
