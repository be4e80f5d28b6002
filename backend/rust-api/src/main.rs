use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quizzer_api::config::{Config, StorageBackend};
use quizzer_api::services::{build_mailer, generation_client::GroqClient, AppState};
use quizzer_api::storage::{MemoryCache, MemoryStore};
use quizzer_api::utils::time::SystemClock;
use quizzer_api::{create_router, error};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let telemetry = init_telemetry()?;

    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let (plain_layer, json_layer) = if json_logs {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quizzer_api=debug,tower_http=debug".into()),
        )
        .with(plain_layer)
        .with(json_layer)
        .with(
            telemetry
                .as_ref()
                .map(|(tracer, _)| tracing_opentelemetry::layer().with_tracer(tracer.clone())),
        )
        .init();

    tracing::info!("Starting Quizzer API");

    let config = Config::load()?;
    error::set_expose_details(config.environment.exposes_error_details());
    tracing::info!(
        environment = ?config.environment,
        storage = ?config.storage_backend,
        "Configuration loaded"
    );

    let bind_addr = config.bind_addr.clone();
    let app_state = match config.storage_backend {
        StorageBackend::Mongo => {
            let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri).await?;
            tracing::info!("MongoDB connected");
            let redis_client = redis::Client::open(config.redis_uri.clone())?;
            AppState::new(config, mongo_client, redis_client).await?
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage, data is lost on restart");
            let clock = Arc::new(SystemClock);
            let generator = Arc::new(GroqClient::new(&config.generation)?);
            let mailer = build_mailer(&config)?;
            AppState::from_parts(
                config,
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryCache::new(clock.clone())),
                generator,
                mailer,
                clock,
            )
        }
    };

    let app = create_router(Arc::new(app_state));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if let Some((_, provider)) = telemetry {
        tracing::info!("Shutting down OpenTelemetry");
        if let Err(e) = provider.shutdown() {
            eprintln!("OpenTelemetry shutdown failed: {e}");
        }
    }
    Ok(())
}

/// OTLP export is enabled only when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_telemetry() -> anyhow::Result<
    Option<(
        opentelemetry_sdk::trace::Tracer,
        opentelemetry_sdk::trace::SdkTracerProvider,
    )>,
> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use opentelemetry_sdk::Resource;

    let Ok(otlp_endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        return Ok(None);
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(otlp_endpoint)
        .build()?;

    let resource = Resource::builder_empty()
        .with_service_name("quizzer-api")
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    let tracer = provider.tracer("quizzer-api");
    opentelemetry::global::set_tracer_provider(provider.clone());

    Ok(Some((tracer, provider)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining connections");
}
