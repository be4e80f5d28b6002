//! Adapters for the two shared stores: a TTL-capable key-value cache (Redis in
//! production) and the durable record store (MongoDB in production). Both
//! have in-memory implementations used by tests and local runs.

use async_trait::async_trait;
use std::time::Duration;

use crate::models::{
    HintRecord, NotificationRecord, Quiz, QuizSummary, Submission, SubmissionFilter,
};

pub mod memory;
pub mod mongo;
pub mod redis_cache;

pub use memory::{MemoryCache, MemoryStore};
pub use mongo::MongoStore;
pub use redis_cache::RedisCache;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("{0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed record: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Parameters of one sliding-window admission check. All instants are
/// milliseconds since the Unix epoch taken from the caller's clock.
#[derive(Debug, Clone)]
pub struct WindowCheck<'a> {
    pub counter_key: &'a str,
    pub block_key: &'a str,
    pub member: &'a str,
    pub now_ms: i64,
    pub window_ms: i64,
    pub limit: u32,
    pub block_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    /// Recorded; `count` includes the new entry.
    Admitted { count: u32 },
    /// The window was full; a block has just been placed.
    Rejected,
    /// A previous rejection is still in force.
    Blocked { remaining_ms: i64 },
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Atomically trims the window, compares it with the limit and either
    /// records the new entry or places a block.
    async fn check_window(&self, check: &WindowCheck<'_>) -> StoreResult<WindowOutcome>;

    async fn ping(&self) -> StoreResult<()>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_quiz(&self, quiz: &Quiz) -> StoreResult<()>;

    async fn find_quiz(&self, id: &str) -> StoreResult<Option<Quiz>>;

    async fn find_quizzes(&self, ids: &[String]) -> StoreResult<Vec<Quiz>>;

    async fn list_quizzes(&self) -> StoreResult<Vec<QuizSummary>>;

    async fn insert_hint(&self, hint: &HintRecord) -> StoreResult<()>;

    /// Persists a submission. With `cooldown` set, the write is rejected with
    /// [`StoreError::Conflict`] when a non-retry submission for the same
    /// identity and quiz exists within `cooldown` of `submission.submitted_at`.
    /// The check and the insert are one atomic step.
    async fn insert_submission(
        &self,
        submission: &Submission,
        cooldown: Option<Duration>,
    ) -> StoreResult<()>;

    /// Looks a submission up by id, scoped to its owner.
    async fn find_submission(&self, identity: &str, id: &str) -> StoreResult<Option<Submission>>;

    /// Submissions of `identity` matching `filter`, newest first.
    async fn find_submissions(
        &self,
        identity: &str,
        filter: &SubmissionFilter,
    ) -> StoreResult<Vec<Submission>>;

    async fn insert_notification(&self, record: &NotificationRecord) -> StoreResult<()>;

    async fn find_contact_email(&self, user_id: &str) -> StoreResult<Option<String>>;

    async fn ping(&self) -> StoreResult<()>;
}
