use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{
    CacheStore, RecordStore, StoreError, StoreResult, WindowCheck, WindowOutcome,
};
use crate::models::{
    HintRecord, NotificationRecord, Quiz, QuizSummary, Submission, SubmissionFilter,
};
use crate::utils::time::Clock;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, (String, DateTime<Utc>)>,
    windows: HashMap<String, VecDeque<i64>>,
    blocks: HashMap<String, i64>,
}

/// Process-local cache with the same semantics as the Redis adapter.
/// Expiry follows the injected clock so tests can move time forward.
pub struct MemoryCache {
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
    unavailable: AtomicBool,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(CacheState::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory cache disabled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut state = lock(&self.state);
        match state.entries.get(key) {
            Some((value, expires_at)) if *expires_at > now => Ok(Some(value.clone())),
            Some(_) => {
                state.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.ensure_available()?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let expires_at = self.clock.now() + ttl;
        lock(&self.state)
            .entries
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn check_window(&self, check: &WindowCheck<'_>) -> StoreResult<WindowOutcome> {
        self.ensure_available()?;
        let mut state = lock(&self.state);

        if let Some(&blocked_until) = state.blocks.get(check.block_key) {
            if blocked_until > check.now_ms {
                return Ok(WindowOutcome::Blocked {
                    remaining_ms: blocked_until - check.now_ms,
                });
            }
            state.blocks.remove(check.block_key);
        }

        let window = state
            .windows
            .entry(check.counter_key.to_string())
            .or_default();
        let cutoff = check.now_ms - check.window_ms;
        while window.front().is_some_and(|&at| at < cutoff) {
            window.pop_front();
        }

        if window.len() as u32 >= check.limit {
            state
                .blocks
                .insert(check.block_key.to_string(), check.now_ms + check.block_ms);
            return Ok(WindowOutcome::Rejected);
        }

        window.push_back(check.now_ms);
        Ok(WindowOutcome::Admitted {
            count: window.len() as u32,
        })
    }

    async fn ping(&self) -> StoreResult<()> {
        self.ensure_available()
    }
}

#[derive(Default)]
struct Tables {
    quizzes: Vec<Quiz>,
    hints: Vec<HintRecord>,
    submissions: Vec<Submission>,
    notifications: Vec<NotificationRecord>,
    contacts: HashMap<String, String>,
}

/// Record store kept in process memory. One lock guards all tables, which
/// makes the cooldown check and the submission insert a single step.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the email address results are mailed to for `user_id`.
    pub fn insert_contact(&self, user_id: &str, email: &str) {
        lock(&self.tables)
            .contacts
            .insert(user_id.to_string(), email.to_string());
    }

    pub fn notifications(&self) -> Vec<NotificationRecord> {
        lock(&self.tables).notifications.clone()
    }

    pub fn hints(&self) -> Vec<HintRecord> {
        lock(&self.tables).hints.clone()
    }

    pub fn submission_count(&self) -> usize {
        lock(&self.tables).submissions.len()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn tables(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store disabled".into()));
        }
        Ok(lock(&self.tables))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_quiz(&self, quiz: &Quiz) -> StoreResult<()> {
        let mut tables = self.tables()?;
        if tables.quizzes.iter().any(|q| q.id == quiz.id) {
            return Err(StoreError::Conflict(format!("quiz {} already exists", quiz.id)));
        }
        tables.quizzes.push(quiz.clone());
        Ok(())
    }

    async fn find_quiz(&self, id: &str) -> StoreResult<Option<Quiz>> {
        Ok(self.tables()?.quizzes.iter().find(|q| q.id == id).cloned())
    }

    async fn find_quizzes(&self, ids: &[String]) -> StoreResult<Vec<Quiz>> {
        Ok(self
            .tables()?
            .quizzes
            .iter()
            .filter(|q| ids.contains(&q.id))
            .cloned()
            .collect())
    }

    async fn list_quizzes(&self) -> StoreResult<Vec<QuizSummary>> {
        let tables = self.tables()?;
        let mut quizzes: Vec<&Quiz> = tables.quizzes.iter().collect();
        quizzes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(quizzes.into_iter().map(QuizSummary::from).collect())
    }

    async fn insert_hint(&self, hint: &HintRecord) -> StoreResult<()> {
        self.tables()?.hints.push(hint.clone());
        Ok(())
    }

    async fn insert_submission(
        &self,
        submission: &Submission,
        cooldown: Option<Duration>,
    ) -> StoreResult<()> {
        let mut tables = self.tables()?;

        if let Some(cooldown) = cooldown {
            let cooldown = chrono::Duration::from_std(cooldown)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let since = submission.submitted_at - cooldown;
            let recent = tables.submissions.iter().any(|existing| {
                !existing.is_retry
                    && existing.identity == submission.identity
                    && existing.quiz_id == submission.quiz_id
                    && existing.submitted_at > since
            });
            if recent {
                return Err(StoreError::Conflict(
                    "Submission cooldown in effect for this quiz".into(),
                ));
            }
        }

        tables.submissions.push(submission.clone());
        Ok(())
    }

    async fn find_submission(&self, identity: &str, id: &str) -> StoreResult<Option<Submission>> {
        Ok(self
            .tables()?
            .submissions
            .iter()
            .find(|s| s.id == id && s.identity == identity)
            .cloned())
    }

    async fn find_submissions(
        &self,
        identity: &str,
        filter: &SubmissionFilter,
    ) -> StoreResult<Vec<Submission>> {
        let tables = self.tables()?;
        let mut found: Vec<Submission> = tables
            .submissions
            .iter()
            .filter(|s| s.identity == identity && filter.matches(s))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(found)
    }

    async fn insert_notification(&self, record: &NotificationRecord) -> StoreResult<()> {
        self.tables()?.notifications.push(record.clone());
        Ok(())
    }

    async fn find_contact_email(&self, user_id: &str) -> StoreResult<Option<String>> {
        Ok(self.tables()?.contacts.get(user_id).cloned())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.tables().map(|_| ())
    }
}
