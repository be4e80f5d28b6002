use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, DateTime as BsonDateTime, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::{Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{RecordStore, StoreError, StoreResult};
use crate::metrics::track_db_operation;
use crate::models::{
    AnswerValue, HintRecord, NotificationRecord, Question, Quiz, QuizSummary, Submission,
    SubmissionFilter,
};
use crate::utils::time::{bson_to_chrono, chrono_to_bson};

const QUIZZES: &str = "quizzes";
const HINTS: &str = "hints";
const SUBMISSIONS: &str = "submissions";
const COOLDOWNS: &str = "submission_cooldowns";
const NOTIFICATIONS: &str = "notifications";
const USERS: &str = "users";

const DUPLICATE_KEY: i32 = 11000;

/// User ids arrive as the token subject. Accounts created by the sign-up flow
/// are keyed by ObjectId, imported ones by the plain string.
fn contact_filter(user_id: &str) -> Document {
    match ObjectId::parse_str(user_id) {
        Ok(oid) => doc! { "_id": { "$in": [oid, user_id] } },
        Err(_) => doc! { "_id": user_id },
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct QuizDocument {
    #[serde(rename = "_id")]
    id: String,
    title: String,
    grade_level: String,
    subject: String,
    difficulty: String,
    total_questions: u32,
    max_score: u32,
    questions: Vec<Question>,
    created_at: BsonDateTime,
}

impl From<&Quiz> for QuizDocument {
    fn from(quiz: &Quiz) -> Self {
        Self {
            id: quiz.id.clone(),
            title: quiz.title.clone(),
            grade_level: quiz.grade_level.clone(),
            subject: quiz.subject.clone(),
            difficulty: quiz.difficulty.clone(),
            total_questions: quiz.total_questions,
            max_score: quiz.max_score,
            questions: quiz.questions.clone(),
            created_at: chrono_to_bson(quiz.created_at),
        }
    }
}

impl From<QuizDocument> for Quiz {
    fn from(doc: QuizDocument) -> Self {
        Self {
            id: doc.id,
            title: doc.title,
            grade_level: doc.grade_level,
            subject: doc.subject,
            difficulty: doc.difficulty,
            total_questions: doc.total_questions,
            max_score: doc.max_score,
            questions: doc.questions,
            created_at: bson_to_chrono(doc.created_at),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HintDocument {
    #[serde(rename = "_id")]
    id: String,
    quiz_id: String,
    question_id: String,
    hint_text: String,
    created_at: BsonDateTime,
}

#[derive(Debug, Serialize, Deserialize)]
struct SubmissionDocument {
    #[serde(rename = "_id")]
    id: String,
    identity: String,
    quiz_id: String,
    answers: Vec<AnswerValue>,
    score: u32,
    total: u32,
    submitted_at: BsonDateTime,
    is_retry: bool,
    #[serde(default)]
    original_submission_id: Option<String>,
}

impl From<&Submission> for SubmissionDocument {
    fn from(s: &Submission) -> Self {
        Self {
            id: s.id.clone(),
            identity: s.identity.clone(),
            quiz_id: s.quiz_id.clone(),
            answers: s.answers.clone(),
            score: s.score,
            total: s.total,
            submitted_at: chrono_to_bson(s.submitted_at),
            is_retry: s.is_retry,
            original_submission_id: s.original_submission_id.clone(),
        }
    }
}

impl From<SubmissionDocument> for Submission {
    fn from(doc: SubmissionDocument) -> Self {
        Self {
            id: doc.id,
            identity: doc.identity,
            quiz_id: doc.quiz_id,
            answers: doc.answers,
            score: doc.score,
            total: doc.total,
            submitted_at: bson_to_chrono(doc.submitted_at),
            is_retry: doc.is_retry,
            original_submission_id: doc.original_submission_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct NotificationDocument {
    #[serde(rename = "_id")]
    id: String,
    submission_id: String,
    identity: String,
    recipient: Option<String>,
    delivered: bool,
    error: Option<String>,
    attempted_at: BsonDateTime,
}

fn unavailable(err: mongodb::error::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY,
        ErrorKind::Command(command) => command.code == DUPLICATE_KEY,
        _ => false,
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// MongoDB-backed record store.
///
/// Submission cooldowns are enforced through `submission_cooldowns`, keyed by
/// `{identity, quiz_id}`. A submit claims the key with an upsert that only
/// matches an expired lock; while the lock is live the upsert collides on
/// `_id` and the write is refused. This keeps concurrent submits from
/// several replicas down to one winner.
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn ensure_indexes(&self) -> StoreResult<()> {
        self.submissions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "identity": 1, "submitted_at": -1 })
                    .build(),
            )
            .await
            .map_err(unavailable)?;
        self.db
            .collection::<HintDocument>(HINTS)
            .create_index(IndexModel::builder().keys(doc! { "quiz_id": 1 }).build())
            .await
            .map_err(unavailable)?;
        self.db
            .collection::<NotificationDocument>(NOTIFICATIONS)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "submission_id": 1 })
                    .build(),
            )
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    fn quizzes(&self) -> Collection<QuizDocument> {
        self.db.collection(QUIZZES)
    }

    fn submissions(&self) -> Collection<SubmissionDocument> {
        self.db.collection(SUBMISSIONS)
    }

    async fn claim_cooldown(&self, submission: &Submission, cooldown: Duration) -> StoreResult<()> {
        let now = chrono_to_bson(submission.submitted_at);
        let locked_until = BsonDateTime::from_millis(now.timestamp_millis() + duration_ms(cooldown));
        let key = doc! { "identity": &submission.identity, "quiz_id": &submission.quiz_id };

        let result = self
            .db
            .collection::<Document>(COOLDOWNS)
            .update_one(
                doc! { "_id": key, "locked_until": { "$lte": now } },
                doc! { "$set": {
                    "locked_until": locked_until,
                    "submission_id": &submission.id,
                } },
            )
            .upsert(true)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Err(StoreError::Conflict(
                "Submission cooldown in effect for this quiz".into(),
            )),
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn release_cooldown(&self, submission: &Submission) {
        let key = doc! { "identity": &submission.identity, "quiz_id": &submission.quiz_id };
        if let Err(e) = self
            .db
            .collection::<Document>(COOLDOWNS)
            .delete_one(doc! { "_id": key, "submission_id": &submission.id })
            .await
        {
            tracing::warn!(error = %e, submission_id = %submission.id, "Failed to release cooldown claim");
        }
    }
}

#[async_trait]
impl RecordStore for MongoStore {
    async fn insert_quiz(&self, quiz: &Quiz) -> StoreResult<()> {
        self.quizzes()
            .insert_one(QuizDocument::from(quiz))
            .await
            .map(|_| ())
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    StoreError::Conflict(format!("quiz {} already exists", quiz.id))
                } else {
                    unavailable(e)
                }
            })
    }

    async fn find_quiz(&self, id: &str) -> StoreResult<Option<Quiz>> {
        let found = self
            .quizzes()
            .find_one(doc! { "_id": id })
            .await
            .map_err(unavailable)?;
        Ok(found.map(Quiz::from))
    }

    async fn find_quizzes(&self, ids: &[String]) -> StoreResult<Vec<Quiz>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let cursor = self
            .quizzes()
            .find(doc! { "_id": { "$in": ids } })
            .await
            .map_err(unavailable)?;
        let docs: Vec<QuizDocument> = cursor.try_collect().await.map_err(unavailable)?;
        Ok(docs.into_iter().map(Quiz::from).collect())
    }

    async fn list_quizzes(&self) -> StoreResult<Vec<QuizSummary>> {
        let cursor = self
            .quizzes()
            .find(doc! {})
            .sort(doc! { "created_at": -1 })
            .await
            .map_err(unavailable)?;
        let docs: Vec<QuizDocument> = cursor.try_collect().await.map_err(unavailable)?;
        Ok(docs
            .into_iter()
            .map(|doc| QuizSummary::from(&Quiz::from(doc)))
            .collect())
    }

    async fn insert_hint(&self, hint: &HintRecord) -> StoreResult<()> {
        let document = HintDocument {
            id: hint.id.clone(),
            quiz_id: hint.quiz_id.clone(),
            question_id: hint.question_id.clone(),
            hint_text: hint.hint_text.clone(),
            created_at: chrono_to_bson(hint.created_at),
        };
        self.db
            .collection::<HintDocument>(HINTS)
            .insert_one(document)
            .await
            .map(|_| ())
            .map_err(unavailable)
    }

    async fn insert_submission(
        &self,
        submission: &Submission,
        cooldown: Option<Duration>,
    ) -> StoreResult<()> {
        if let Some(cooldown) = cooldown {
            self.claim_cooldown(submission, cooldown).await?;
        }

        let document = SubmissionDocument::from(submission);
        let inserted = track_db_operation("insert", SUBMISSIONS, async {
            self.submissions().insert_one(document).await
        })
        .await;
        if let Err(e) = inserted {
            if cooldown.is_some() {
                self.release_cooldown(submission).await;
            }
            return Err(unavailable(e));
        }
        Ok(())
    }

    async fn find_submission(&self, identity: &str, id: &str) -> StoreResult<Option<Submission>> {
        let found = self
            .submissions()
            .find_one(doc! { "_id": id, "identity": identity })
            .await
            .map_err(unavailable)?;
        Ok(found.map(Submission::from))
    }

    async fn find_submissions(
        &self,
        identity: &str,
        filter: &SubmissionFilter,
    ) -> StoreResult<Vec<Submission>> {
        let mut query = doc! { "identity": identity };

        let mut submitted_at = Document::new();
        if let Some(from) = filter.from {
            submitted_at.insert("$gte", chrono_to_bson(from));
        }
        if let Some(to) = filter.to {
            submitted_at.insert("$lte", chrono_to_bson(to));
        }
        if !submitted_at.is_empty() {
            query.insert("submitted_at", submitted_at);
        }

        let mut score = Document::new();
        if let Some(min) = filter.min_score {
            score.insert("$gte", i64::from(min));
        }
        if let Some(max) = filter.max_score {
            score.insert("$lte", i64::from(max));
        }
        if !score.is_empty() {
            query.insert("score", score);
        }

        let docs: Vec<SubmissionDocument> = track_db_operation("find", SUBMISSIONS, async {
            let cursor = self
                .submissions()
                .find(query)
                .sort(doc! { "submitted_at": -1 })
                .await?;
            cursor.try_collect::<Vec<SubmissionDocument>>().await
        })
        .await
        .map_err(unavailable)?;
        Ok(docs.into_iter().map(Submission::from).collect())
    }

    async fn insert_notification(&self, record: &NotificationRecord) -> StoreResult<()> {
        let document = NotificationDocument {
            id: record.id.clone(),
            submission_id: record.submission_id.clone(),
            identity: record.identity.clone(),
            recipient: record.recipient.clone(),
            delivered: record.delivered,
            error: record.error.clone(),
            attempted_at: chrono_to_bson(record.attempted_at),
        };
        self.db
            .collection::<NotificationDocument>(NOTIFICATIONS)
            .insert_one(document)
            .await
            .map(|_| ())
            .map_err(unavailable)
    }

    async fn find_contact_email(&self, user_id: &str) -> StoreResult<Option<String>> {
        let user = self
            .db
            .collection::<Document>(USERS)
            .find_one(contact_filter(user_id))
            .await
            .map_err(unavailable)?;
        Ok(user.and_then(|u| u.get_str("email").ok().map(str::to_string)))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::Bson;

    #[test]
    fn contact_filter_matches_object_id_and_string_keys() {
        let hex = "64f1a2b3c4d5e6f708192a3b";
        let filter = contact_filter(hex);
        let candidates = filter
            .get_document("_id")
            .unwrap()
            .get_array("$in")
            .unwrap();
        assert_eq!(
            candidates,
            &vec![
                Bson::ObjectId(ObjectId::parse_str(hex).unwrap()),
                Bson::String(hex.to_string()),
            ]
        );
    }

    #[test]
    fn contact_filter_keeps_non_hex_ids_as_strings() {
        let filter = contact_filter("student-1");
        assert_eq!(filter.get_str("_id").unwrap(), "student-1");
    }
}
