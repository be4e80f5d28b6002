#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use quizzer_api::config::Config;
use quizzer_api::middlewares::auth::{JwtClaims, JwtService};
use quizzer_api::models::NotificationRecord;
use quizzer_api::services::email_service::{Mailer, OutgoingEmail};
use quizzer_api::services::generation_client::{GenerationError, Prompt, PromptKind, TextGenerator};
use quizzer_api::storage::{MemoryCache, MemoryStore};
use quizzer_api::utils::time::ManualClock;
use quizzer_api::{create_router, AppState};

pub const TEST_JWT_SECRET: &str = "integration-test-secret";

/// Three questions: answers 1, 3 and 0.
pub const SCENARIO_QUIZ_JSON: &str = r#"{
  "title": "Grade 5 Math Warmup",
  "questions": [
    {"question": "1 + 1?", "options": ["1", "2", "3", "4"], "answer": 1, "explanation": "One plus one is two"},
    {"question": "2 + 2?", "options": ["1", "2", "3", "4"], "answer": 3, "explanation": "Two plus two is four"},
    {"question": "3 - 2?", "options": ["1", "2", "3", "4"], "answer": 0, "explanation": "Three minus two is one"}
  ]
}"#;

pub const STUB_HINT: &str = "Think about what happens when you combine equal groups.";
pub const STUB_SUGGESTIONS: &str = "- Practice addition facts\n- Review number bonds";

/// Scripted text generator. Counts calls per prompt kind and can be told to fail.
pub struct StubGenerator {
    pub quiz_json: Mutex<String>,
    quiz_calls: AtomicUsize,
    hint_calls: AtomicUsize,
    suggestion_calls: AtomicUsize,
    fail_all: AtomicBool,
    fail_suggestions: AtomicBool,
}

impl StubGenerator {
    pub fn new() -> Self {
        Self {
            quiz_json: Mutex::new(SCENARIO_QUIZ_JSON.to_string()),
            quiz_calls: AtomicUsize::new(0),
            hint_calls: AtomicUsize::new(0),
            suggestion_calls: AtomicUsize::new(0),
            fail_all: AtomicBool::new(false),
            fail_suggestions: AtomicBool::new(false),
        }
    }

    pub fn set_quiz_json(&self, json: &str) {
        *self.quiz_json.lock().unwrap() = json.to_string();
    }

    pub fn fail(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn fail_suggestions(&self, fail: bool) {
        self.fail_suggestions.store(fail, Ordering::SeqCst);
    }

    pub fn quiz_calls(&self) -> usize {
        self.quiz_calls.load(Ordering::SeqCst)
    }

    pub fn hint_calls(&self) -> usize {
        self.hint_calls.load(Ordering::SeqCst)
    }

    pub fn suggestion_calls(&self) -> usize {
        self.suggestion_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for StubGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let counter = match prompt.kind {
            PromptKind::Quiz => &self.quiz_calls,
            PromptKind::Hint => &self.hint_calls,
            PromptKind::Suggestions => &self.suggestion_calls,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        if self.fail_all.load(Ordering::SeqCst)
            || (prompt.kind == PromptKind::Suggestions && self.fail_suggestions.load(Ordering::SeqCst))
        {
            return Err(GenerationError::Provider("stub provider down".to_string()));
        }

        Ok(match prompt.kind {
            PromptKind::Quiz => self.quiz_json.lock().unwrap().clone(),
            PromptKind::Hint => STUB_HINT.to_string(),
            PromptKind::Suggestions => STUB_SUGGESTIONS.to_string(),
        })
    }
}

#[derive(Default)]
pub struct StubMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
    fail: AtomicBool,
}

impl StubMailer {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Mailer for StubMailer {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("smtp connection refused");
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.jwt_secret = TEST_JWT_SECRET.to_string();
    config.generation.retry_attempts = 0;
    config.generation.timeout_seconds = 2;
    config.email.timeout_seconds = 2;
    config
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub generator: Arc<StubGenerator>,
    pub mailer: Arc<StubMailer>,
    pub clock: Arc<ManualClock>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();

        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new(clock.clone()));
        let generator = Arc::new(StubGenerator::new());
        let mailer = Arc::new(StubMailer::default());

        let state = Arc::new(AppState::from_parts(
            config,
            store.clone(),
            cache.clone(),
            generator.clone(),
            mailer.clone(),
            clock.clone(),
        ));

        Self {
            router: create_router(state.clone()),
            state,
            store,
            cache,
            generator,
            mailer,
            clock,
        }
    }

    pub fn token_for(&self, user_id: &str) -> String {
        JwtService::new(TEST_JWT_SECRET)
            .generate_token(&JwtClaims::for_user(user_id, chrono::Duration::hours(1)))
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, user: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(user) = user {
            builder = builder.header("authorization", format!("Bearer {}", self.token_for(user)));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post(&self, uri: &str, user: Option<&str>, body: Value) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header("authorization", format!("Bearer {}", self.token_for(user)));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn create_scenario_quiz(&self, user: &str) -> Value {
        let response = self
            .post(
                "/api/v1/quiz/create",
                Some(user),
                json!({"grade_level": 5, "subject": "math", "difficulty": "easy", "total_questions": 3}),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body["quiz"].clone()
    }

    /// Waits for the background result email of `submission_id` to be recorded.
    pub async fn wait_for_notification(&self, submission_id: &str) -> NotificationRecord {
        for _ in 0..200 {
            if let Some(record) = self
                .store
                .notifications()
                .into_iter()
                .find(|r| r.submission_id == submission_id)
            {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no notification recorded for submission {}", submission_id);
    }
}
