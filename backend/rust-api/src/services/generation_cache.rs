use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::generation_client::GenerationError;
use crate::metrics::{record_cache_hit, record_cache_miss};
use crate::models::quiz::{Hint, Quiz};
use crate::storage::{CacheStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationDomain {
    Quiz,
    Hint,
}

impl GenerationDomain {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationDomain::Quiz => "quiz",
            GenerationDomain::Hint => "hint",
        }
    }
}

/// What is being generated and the ordered parameters that identify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub domain: GenerationDomain,
    pub params: Vec<String>,
}

impl GenerationRequest {
    pub fn quiz(grade_level: &str, subject: &str, difficulty: &str) -> Self {
        Self {
            domain: GenerationDomain::Quiz,
            params: vec![
                grade_level.to_string(),
                subject.to_string(),
                difficulty.to_string(),
            ],
        }
    }

    /// Hints are keyed by the quiz and the first `prefix_len` characters of
    /// the question.
    pub fn hint(quiz_id: &str, question: &str, prefix_len: usize) -> Self {
        Self {
            domain: GenerationDomain::Hint,
            params: vec![quiz_id.to_string(), char_prefix(question, prefix_len)],
        }
    }

    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.domain.as_str(), self.params.join(":"))
    }
}

pub fn char_prefix(text: &str, len: usize) -> String {
    text.chars().take(len).collect()
}

/// A generated value the cache layer can store and check before storing.
pub trait Generated: Serialize + DeserializeOwned + Send + Sync {
    fn validate(&self) -> Result<(), String>;
}

impl Generated for Quiz {
    fn validate(&self) -> Result<(), String> {
        if self.questions.is_empty() {
            return Err("quiz has no questions".to_string());
        }
        if self.title.trim().is_empty() {
            return Err("quiz has no title".to_string());
        }
        Ok(())
    }
}

impl Generated for Hint {
    fn validate(&self) -> Result<(), String> {
        if self.text.trim().is_empty() {
            return Err("hint is empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

#[derive(Debug, Clone)]
pub struct Cached<T> {
    pub value: T,
    pub status: CacheStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheAsideError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Cache-aside in front of the generation provider.
///
/// Cache reads and writes are advisory: a failed read is treated as a miss
/// and a failed write is logged and dropped. Durable persistence happens
/// before the cache write, so a cached value always has a stored record.
pub struct GenerationCache {
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    single_flight: bool,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl GenerationCache {
    pub fn new(cache: Arc<dyn CacheStore>, ttl: Duration, single_flight: bool) -> Self {
        Self {
            cache,
            ttl,
            single_flight,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_generate<T, G, GFut, P, PFut>(
        &self,
        request: &GenerationRequest,
        generate: G,
        persist: P,
    ) -> Result<Cached<T>, CacheAsideError>
    where
        T: Generated,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, GenerationError>>,
        P: FnOnce(T) -> PFut,
        PFut: Future<Output = Result<T, StoreError>>,
    {
        let key = request.cache_key();
        let domain = request.domain.as_str();

        if let Some(value) = self.lookup::<T>(&key, domain).await {
            return Ok(Cached {
                value,
                status: CacheStatus::Hit,
            });
        }

        if !self.single_flight {
            return self.fill(&key, domain, generate, persist).await;
        }

        let flight = self.flight_lock(&key);
        let guard = flight.clone().lock_owned().await;
        let result = match self.lookup::<T>(&key, domain).await {
            Some(value) => Ok(Cached {
                value,
                status: CacheStatus::Hit,
            }),
            None => self.fill(&key, domain, generate, persist).await,
        };
        drop(guard);
        self.release_flight(&key, &flight);
        result
    }

    async fn lookup<T: Generated>(&self, key: &str, domain: &str) -> Option<T> {
        let raw = match self.cache.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str::<T>(&raw) {
            Ok(value) => {
                tracing::info!("Cache HIT for {}", key);
                record_cache_hit(domain);
                Some(value)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding unreadable cache entry");
                None
            }
        }
    }

    async fn fill<T, G, GFut, P, PFut>(
        &self,
        key: &str,
        domain: &str,
        generate: G,
        persist: P,
    ) -> Result<Cached<T>, CacheAsideError>
    where
        T: Generated,
        G: FnOnce() -> GFut,
        GFut: Future<Output = Result<T, GenerationError>>,
        P: FnOnce(T) -> PFut,
        PFut: Future<Output = Result<T, StoreError>>,
    {
        tracing::info!("Cache MISS for {}", key);
        record_cache_miss(domain);

        let value = generate().await?;
        value.validate().map_err(GenerationError::InvalidOutput)?;
        let value = persist(value).await?;

        match serde_json::to_string(&value) {
            Ok(raw) => {
                if let Err(e) = self.cache.set_ex(key, &raw, self.ttl).await {
                    tracing::warn!(key = %key, error = %e, "Cache write failed");
                }
            }
            Err(e) => tracing::warn!(key = %key, error = %e, "Failed to serialize cache entry"),
        }

        Ok(Cached {
            value,
            status: CacheStatus::Miss,
        })
    }

    fn flight_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.entry(key.to_string()).or_default().clone()
    }

    fn release_flight(&self, key: &str, flight: &Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        // Map entry plus our handle: nobody else is waiting.
        if Arc::strong_count(flight) <= 2 {
            in_flight.remove(key);
        }
    }
}
