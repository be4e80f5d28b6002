use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEV_JWT_SECRET: &str = "dev-secret-only-for-local-testing";

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Test,
    Prod,
}

impl Environment {
    /// Error responses include internal detail everywhere except production.
    pub fn exposes_error_details(self) -> bool {
        self != Environment::Prod
    }
}

impl FromStr for Environment {
    type Err = config::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" | "local" => Ok(Environment::Dev),
            "test" => Ok(Environment::Test),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(config::ConfigError::Message(format!(
                "Unknown APP_ENV value: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Mongo,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = config::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StorageBackend::Mongo),
            "memory" | "in-memory" => Ok(StorageBackend::Memory),
            other => Err(config::ConfigError::Message(format!(
                "Unknown storage backend: {other}"
            ))),
        }
    }
}

/// What the admission controller does when its counting store is unreachable.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionFailureMode {
    Open,
    Closed,
}

impl FromStr for AdmissionFailureMode {
    type Err = config::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "fail-open" => Ok(AdmissionFailureMode::Open),
            "closed" | "fail-closed" => Ok(AdmissionFailureMode::Closed),
            other => Err(config::ConfigError::Message(format!(
                "Unknown admission failure mode: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionSettings {
    pub enabled: bool,
    pub window_seconds: u64,
    pub max_requests: u32,
    pub block_seconds: u64,
    pub failure_mode: AdmissionFailureMode,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: 60,
            max_requests: 100,
            block_seconds: 300,
            failure_mode: AdmissionFailureMode::Open,
        }
    }
}

impl AdmissionSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn block(&self) -> Duration {
        Duration::from_secs(self.block_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuizSettings {
    pub cache_ttl_seconds: u64,
    pub submission_cooldown_seconds: u64,
    pub hint_prefix_len: usize,
    pub default_question_count: u32,
    pub max_question_count: u32,
    /// Collapse concurrent identical cache misses into one provider call.
    pub single_flight: bool,
}

impl Default for QuizSettings {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 3600,
            submission_cooldown_seconds: 300,
            hint_prefix_len: 20,
            default_question_count: 5,
            max_question_count: 20,
            single_flight: false,
        }
    }
}

impl QuizSettings {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn submission_cooldown(&self) -> Duration {
        Duration::from_secs(self.submission_cooldown_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub retry_attempts: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key: String::new(),
            model: "llama3-70b-8192".to_string(),
            timeout_seconds: 30,
            retry_attempts: 2,
        }
    }
}

impl GenerationSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Implicit TLS (port 465 style).
    pub use_tls: bool,
    /// Upgrade a plain connection with STARTTLS when `use_tls` is off.
    pub starttls: bool,
    pub from_email: String,
    pub from_name: String,
    pub app_url: String,
    pub timeout_seconds: u64,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "smtp.sendgrid.net".to_string(),
            port: 587,
            username: "apikey".to_string(),
            password: String::new(),
            use_tls: false,
            starttls: true,
            from_email: "no-reply@quizzer.local".to_string(),
            from_name: "AI Quizzer".to_string(),
            app_url: "http://localhost:5000".to_string(),
            timeout_seconds: 10,
        }
    }
}

impl EmailSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub environment: Environment,
    pub bind_addr: String,
    pub storage_backend: StorageBackend,
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    pub generation: GenerationSettings,
    pub email: EmailSettings,
    pub quiz: QuizSettings,
    pub admission: AdmissionSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Dev,
            bind_addr: "0.0.0.0:5000".to_string(),
            storage_backend: StorageBackend::Mongo,
            mongo_uri: "mongodb://localhost:27017".to_string(),
            redis_uri: "redis://127.0.0.1:6379/0".to_string(),
            mongo_database: "quizzer".to_string(),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            generation: GenerationSettings::default(),
            email: EmailSettings::default(),
            quiz: QuizSettings::default(),
            admission: AdmissionSettings::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Local .env first, then the repository root one
        if dotenvy::dotenv().is_err() {
            dotenvy::from_path("../../.env").ok();
        }

        let env_name = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());
        let environment = Environment::from_str(&env_name)?;

        // config/<env>.toml + APP__SECTION__KEY overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env_name)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Self::from_settings(&settings, environment)
    }

    fn from_settings(
        settings: &config::Config,
        environment: Environment,
    ) -> Result<Self, config::ConfigError> {
        let defaults = Config::default();
        let lookup = Lookup { settings };

        let jwt_secret = match lookup.string("auth.jwt_secret", "JWT_SECRET") {
            Some(secret) => secret,
            None if environment == Environment::Prod => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            None => {
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                defaults.jwt_secret.clone()
            }
        };
        if environment == Environment::Prod && jwt_secret == DEV_JWT_SECRET {
            return Err(config::ConfigError::Message(
                "The development JWT secret cannot be used in production".to_string(),
            ));
        }

        let redis_uri = lookup.string("redis.uri", "REDIS_URI").unwrap_or_else(|| {
            let host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
            let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
            match env::var("REDIS_PASSWORD") {
                Ok(password) => format!("redis://:{}@{}:{}/0", password, host, port),
                Err(_) => format!("redis://{}:{}/0", host, port),
            }
        });

        let generation = GenerationSettings {
            base_url: lookup
                .string("generation.base_url", "GENERATION_BASE_URL")
                .unwrap_or(defaults.generation.base_url),
            api_key: lookup
                .string("generation.api_key", "GROQ_API_KEY")
                .unwrap_or(defaults.generation.api_key),
            model: lookup
                .string("generation.model", "GENERATION_MODEL")
                .unwrap_or(defaults.generation.model),
            timeout_seconds: lookup
                .parse("generation.timeout_seconds", "GENERATION_TIMEOUT_SECONDS")?
                .unwrap_or(defaults.generation.timeout_seconds),
            retry_attempts: lookup
                .parse("generation.retry_attempts", "GENERATION_RETRY_ATTEMPTS")?
                .unwrap_or(defaults.generation.retry_attempts),
        };

        let email_disabled = env::var("EMAIL_SEND_DISABLED")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let email = EmailSettings {
            enabled: !email_disabled
                && lookup
                    .parse("email.enabled", "EMAIL_ENABLED")?
                    .unwrap_or(defaults.email.enabled),
            host: lookup
                .string("email.host", "SMTP_HOST")
                .unwrap_or(defaults.email.host),
            port: lookup
                .parse("email.port", "SMTP_PORT")?
                .unwrap_or(defaults.email.port),
            username: lookup
                .string("email.username", "SMTP_USERNAME")
                .unwrap_or(defaults.email.username),
            password: lookup
                .string("email.password", "SMTP_PASSWORD")
                .unwrap_or(defaults.email.password),
            use_tls: lookup
                .parse("email.use_tls", "SMTP_SECURE")?
                .unwrap_or(defaults.email.use_tls),
            starttls: lookup
                .parse("email.starttls", "SMTP_STARTTLS")?
                .unwrap_or(defaults.email.starttls),
            from_email: lookup
                .string("email.from_email", "EMAIL_FROM")
                .unwrap_or(defaults.email.from_email),
            from_name: lookup
                .string("email.from_name", "EMAIL_FROM_NAME")
                .unwrap_or(defaults.email.from_name),
            app_url: lookup
                .string("email.app_url", "APP_URL")
                .unwrap_or(defaults.email.app_url),
            timeout_seconds: lookup
                .parse("email.timeout_seconds", "EMAIL_TIMEOUT_SECONDS")?
                .unwrap_or(defaults.email.timeout_seconds),
        };

        let quiz = QuizSettings {
            cache_ttl_seconds: lookup
                .parse("quiz.cache_ttl_seconds", "QUIZ_CACHE_TTL_SECONDS")?
                .unwrap_or(defaults.quiz.cache_ttl_seconds),
            submission_cooldown_seconds: lookup
                .parse(
                    "quiz.submission_cooldown_seconds",
                    "QUIZ_SUBMISSION_COOLDOWN_SECONDS",
                )?
                .unwrap_or(defaults.quiz.submission_cooldown_seconds),
            hint_prefix_len: lookup
                .parse("quiz.hint_prefix_len", "QUIZ_HINT_PREFIX_LEN")?
                .unwrap_or(defaults.quiz.hint_prefix_len),
            default_question_count: lookup
                .parse("quiz.default_question_count", "QUIZ_DEFAULT_QUESTIONS")?
                .unwrap_or(defaults.quiz.default_question_count),
            max_question_count: lookup
                .parse("quiz.max_question_count", "QUIZ_MAX_QUESTIONS")?
                .unwrap_or(defaults.quiz.max_question_count),
            single_flight: lookup
                .parse("quiz.single_flight", "QUIZ_SINGLE_FLIGHT")?
                .unwrap_or(defaults.quiz.single_flight),
        };

        let rate_limit_disabled = env::var("RATE_LIMIT_DISABLED").unwrap_or_default() == "1";
        let admission = AdmissionSettings {
            enabled: !rate_limit_disabled
                && lookup
                    .parse("admission.enabled", "ADMISSION_ENABLED")?
                    .unwrap_or(defaults.admission.enabled),
            window_seconds: lookup
                .parse("admission.window_seconds", "RATE_LIMIT_WINDOW_SECONDS")?
                .unwrap_or(defaults.admission.window_seconds),
            max_requests: lookup
                .parse("admission.max_requests", "RATE_LIMIT_PER_IDENTITY")?
                .unwrap_or(defaults.admission.max_requests),
            block_seconds: lookup
                .parse("admission.block_seconds", "RATE_LIMIT_BLOCK_SECONDS")?
                .unwrap_or(defaults.admission.block_seconds),
            failure_mode: lookup
                .parse("admission.failure_mode", "RATE_LIMIT_FAILURE_MODE")?
                .unwrap_or(defaults.admission.failure_mode),
        };

        Ok(Config {
            environment,
            bind_addr: lookup
                .string("server.bind_addr", "BIND_ADDR")
                .unwrap_or(defaults.bind_addr),
            storage_backend: lookup
                .parse("storage.backend", "STORAGE_BACKEND")?
                .unwrap_or(defaults.storage_backend),
            mongo_uri: lookup
                .string("database.mongo_uri", "MONGO_URI")
                .unwrap_or(defaults.mongo_uri),
            redis_uri,
            mongo_database: lookup
                .string("database.mongo_database", "MONGO_DATABASE")
                .unwrap_or(defaults.mongo_database),
            jwt_secret,
            generation,
            email,
            quiz,
            admission,
        })
    }
}

/// Reads a value from the layered settings first, then from a plain env var.
struct Lookup<'a> {
    settings: &'a config::Config,
}

impl Lookup<'_> {
    fn string(&self, key: &str, env_key: &str) -> Option<String> {
        self.settings
            .get_string(key)
            .ok()
            .or_else(|| env::var(env_key).ok())
            .filter(|value| !value.trim().is_empty())
    }

    fn parse<T>(&self, key: &str, env_key: &str) -> Result<Option<T>, config::ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key, env_key) {
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
                config::ConfigError::Message(format!("Invalid value for {key}: {e}"))
            }),
            None => Ok(None),
        }
    }
}
