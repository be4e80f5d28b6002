use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

use super::email_service::{Mailer, OutgoingEmail};
use super::generation_client::{generate_bounded, retry_policy, TextGenerator};
use super::prompts::{suggestions_prompt, SUGGESTIONS_FALLBACK};
use super::AppState;
use crate::config::{EmailSettings, GenerationSettings};
use crate::metrics::record_notification;
use crate::models::submission::percentage;
use crate::models::{Identity, NotificationRecord, QuestionResult, Quiz, Submission};
use crate::storage::RecordStore;
use crate::utils::retry::{retry_async_with_config, RetryConfig};
use crate::utils::time::Clock;

lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").unwrap();
}

const ALL_CORRECT_MESSAGE: &str =
    "Great job! You answered all questions correctly. Keep up the good work!";

pub fn is_valid_email(address: &str) -> bool {
    EMAIL_REGEX.is_match(address)
}

/// Sends the result email for a stored submission. Every failure is caught
/// and ends up in the NotificationRecord; nothing is returned to the caller.
pub struct NotificationDispatcher {
    store: Arc<dyn RecordStore>,
    generator: Arc<dyn TextGenerator>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
    email: EmailSettings,
    generation: GenerationSettings,
}

impl NotificationDispatcher {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            generator: state.generator.clone(),
            mailer: state.mailer.clone(),
            clock: state.clock.clone(),
            email: state.config.email.clone(),
            generation: state.config.generation.clone(),
        }
    }

    pub async fn notify(
        &self,
        submission: &Submission,
        quiz: &Quiz,
        results: &[QuestionResult],
    ) -> NotificationRecord {
        let (recipient, outcome) = match self.resolve_recipient(submission).await {
            Ok(recipient) => {
                let outcome = self.deliver(&recipient, submission, quiz, results).await;
                (Some(recipient), outcome)
            }
            Err(e) => (None, Err(e)),
        };

        let record = NotificationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            submission_id: submission.id.clone(),
            identity: submission.identity.clone(),
            recipient,
            delivered: outcome.is_ok(),
            error: outcome.err(),
            attempted_at: self.clock.now(),
        };

        match &record.error {
            None => {
                record_notification("delivered");
                tracing::info!(submission_id = %record.submission_id, "Result email sent");
            }
            Some(error) => {
                record_notification("failed");
                tracing::error!(submission_id = %record.submission_id, error = %error, "Result email failed");
            }
        }

        let store = self.store.clone();
        let stored = retry_async_with_config(RetryConfig::default(), || {
            let store = store.clone();
            let record = record.clone();
            async move { store.insert_notification(&record).await }
        })
        .await;
        if let Err(e) = stored {
            tracing::error!(submission_id = %record.submission_id, error = %e, "Failed to store notification record");
        }

        record
    }

    async fn resolve_recipient(&self, submission: &Submission) -> Result<String, String> {
        let identity = Identity::from_key(submission.identity.clone());
        let user_id = identity
            .user_id()
            .ok_or_else(|| "anonymous submission has no contact address".to_string())?;

        let address = self
            .store
            .find_contact_email(user_id)
            .await
            .map_err(|e| format!("contact lookup failed: {}", e))?
            .ok_or_else(|| format!("no email address for user {}", user_id))?;

        if !is_valid_email(&address) {
            return Err(format!("invalid email address: {}", address));
        }
        Ok(address)
    }

    async fn deliver(
        &self,
        recipient: &str,
        submission: &Submission,
        quiz: &Quiz,
        results: &[QuestionResult],
    ) -> Result<(), String> {
        let suggestions = self.suggestions(submission, quiz, results).await;
        let email = OutgoingEmail {
            to_email: recipient.to_string(),
            to_name: recipient.split('@').next().unwrap_or(recipient).to_string(),
            subject: format!("Your Quiz Results: {}", quiz.title),
            body: render_body(submission, quiz, results, &suggestions, &self.email.app_url),
        };

        match tokio::time::timeout(self.email.timeout(), self.mailer.send(&email)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(_) => Err(format!(
                "email delivery timed out after {:?}",
                self.email.timeout()
            )),
        }
    }

    /// Uncached; falls back to static text when generation fails.
    async fn suggestions(&self, submission: &Submission, quiz: &Quiz, results: &[QuestionResult]) -> String {
        let weak_areas: Vec<String> = results
            .iter()
            .filter(|r| !r.is_correct)
            .map(|r| r.question.clone())
            .collect();
        if weak_areas.is_empty() {
            return ALL_CORRECT_MESSAGE.to_string();
        }

        let prompt = suggestions_prompt(&quiz.title, submission.score, submission.total, &weak_areas);
        generate_bounded(
            self.generator.as_ref(),
            &prompt,
            self.generation.timeout(),
            retry_policy(&self.generation),
        )
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(
                submission_id = %submission.id,
                error = %e,
                "Suggestion generation failed, using fallback text"
            );
            SUGGESTIONS_FALLBACK.to_string()
        })
    }
}

fn render_body(
    submission: &Submission,
    quiz: &Quiz,
    results: &[QuestionResult],
    suggestions: &str,
    app_url: &str,
) -> String {
    let mut body = format!(
        "Quiz: {}\nScore: {}/{} ({}%)\n\n",
        quiz.title,
        submission.score,
        submission.total,
        percentage(submission.score, submission.total)
    );

    let incorrect: Vec<String> = quiz
        .questions
        .iter()
        .zip(results)
        .filter(|(_, r)| !r.is_correct)
        .map(|(question, r)| {
            let mut item = format!(
                "- {}\n  Your answer: {}\n  Correct answer: {}",
                r.question,
                question.describe(&r.user_answer),
                question.describe(&r.correct_answer)
            );
            if let Some(explanation) = &r.explanation {
                item.push_str(&format!("\n  Explanation: {}", explanation));
            }
            item
        })
        .collect();
    if !incorrect.is_empty() {
        body.push_str("Areas to Improve:\n");
        body.push_str(&incorrect.join("\n\n"));
        body.push_str("\n\n");
    }

    body.push_str(&format!("Suggestions for Improvement:\n{}\n\n", suggestions));
    body.push_str(&format!("Review your results at {}\n\n", app_url));
    body.push_str("Thank you for using AI Quizzer!");
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::quiz::{AnswerValue, Question};
    use chrono::Utc;

    #[test]
    fn email_validation() {
        assert!(is_valid_email("student@example.com"));
        assert!(is_valid_email("first.last+quiz@school.org"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a@b"));
    }

    #[test]
    fn body_lists_only_incorrect_items() {
        let quiz = Quiz {
            id: "q".into(),
            title: "Capitals".into(),
            grade_level: "5".into(),
            subject: "geography".into(),
            difficulty: "easy".into(),
            total_questions: 2,
            max_score: 2,
            questions: vec![
                Question {
                    question: "Capital of France?".into(),
                    options: vec!["Paris".into(), "Lyon".into()],
                    answer: AnswerValue::Index(0),
                    explanation: Some("Paris is the capital".into()),
                },
                Question {
                    question: "Capital of Italy?".into(),
                    options: vec!["Rome".into(), "Milan".into()],
                    answer: AnswerValue::Index(0),
                    explanation: None,
                },
            ],
            created_at: Utc::now(),
        };
        let answers = vec![AnswerValue::Index(1), AnswerValue::Index(0)];
        let (score, results) = crate::services::submission_ledger::grade_answers(&quiz, &answers);
        let submission = Submission {
            id: "s".into(),
            identity: "user:1".into(),
            quiz_id: "q".into(),
            answers,
            score,
            total: 2,
            submitted_at: Utc::now(),
            is_retry: false,
            original_submission_id: None,
        };

        let body = render_body(&submission, &quiz, &results, "Study more", "http://app");
        assert!(body.contains("Score: 1/2 (50%)"));
        assert!(body.contains("Your answer: Lyon (1)"));
        assert!(body.contains("Correct answer: Paris (0)"));
        assert!(body.contains("Explanation: Paris is the capital"));
        assert!(!body.contains("Capital of Italy?"));
        assert!(body.contains("http://app"));
    }
}
