use mongodb::Client as MongoClient;
use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::config::Config;
use crate::storage::{CacheStore, MongoStore, RecordStore, RedisCache};
use crate::utils::time::{Clock, SystemClock};

use admission_controller::AdmissionController;
use email_service::{DisabledMailer, Mailer, SmtpMailer};
use generation_cache::GenerationCache;
use generation_client::{GroqClient, TextGenerator};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn RecordStore>,
    pub cache: Arc<dyn CacheStore>,
    pub generator: Arc<dyn TextGenerator>,
    pub mailer: Arc<dyn Mailer>,
    pub clock: Arc<dyn Clock>,
    pub generation_cache: Arc<GenerationCache>,
    pub admission: Arc<AdmissionController>,
}

impl AppState {
    /// Production wiring: MongoDB record store, Redis cache, Groq generator
    /// and SMTP mailer.
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = MongoStore::new(mongo_client.database(&config.mongo_database));
        if let Err(e) = mongo.ensure_indexes().await {
            tracing::warn!("Failed to create MongoDB indexes: {}", e);
        }

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let generator = Arc::new(GroqClient::new(&config.generation)?);
        let mailer = build_mailer(&config)?;

        Ok(Self::from_parts(
            config,
            Arc::new(mongo),
            Arc::new(RedisCache::new(redis)),
            generator,
            mailer,
            Arc::new(SystemClock),
        ))
    }

    pub fn from_parts(
        config: Config,
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn CacheStore>,
        generator: Arc<dyn TextGenerator>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let generation_cache = Arc::new(GenerationCache::new(
            cache.clone(),
            config.quiz.cache_ttl(),
            config.quiz.single_flight,
        ));
        let admission = Arc::new(AdmissionController::new(
            cache.clone(),
            clock.clone(),
            config.admission.clone(),
        ));

        Self {
            config,
            store,
            cache,
            generator,
            mailer,
            clock,
            generation_cache,
            admission,
        }
    }
}

pub fn build_mailer(config: &Config) -> anyhow::Result<Arc<dyn Mailer>> {
    if !config.email.enabled {
        tracing::warn!("Email sending disabled, result emails will be recorded as failed");
        return Ok(Arc::new(DisabledMailer));
    }
    Ok(Arc::new(SmtpMailer::new(&config.email)?))
}

pub mod admission_controller;
pub mod email_service;
pub mod generation_cache;
pub mod generation_client;
pub mod notification_service;
pub mod prompts;
pub mod quiz_service;
pub mod submission_ledger;
