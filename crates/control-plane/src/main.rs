// Dormdesk API server
// Decision: Without DATABASE_URL the server runs in dev mode on the in-memory store
// Decision: Cross-instance fan-out only exists with Postgres (LISTEN/NOTIFY)

use std::sync::Arc;

use anyhow::{Context, Result};
use dormdesk_control_plane::api;
use dormdesk_control_plane::automation::{
    AutomationClient, HttpIntentClassifier, UnconfiguredAutomation,
};
use dormdesk_control_plane::config::{AppConfig, ClassifierMode};
use dormdesk_control_plane::notify::{spawn_listener, PgNotifier};
use dormdesk_control_plane::storage::StorageBackend;
use dormdesk_control_plane::{app::drain_on, build_app, AppParts};
use dormdesk_core::telemetry::{init_telemetry, TelemetryConfig};
use dormdesk_core::{
    ActionAgent, AutomationBackend, EventBus, EventNotifier, IntentClassifier, KeywordClassifier,
    NoopNotifier,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    // Configure via environment variables:
    // - RUST_LOG / LOG_LEVEL: Log filter (default: "dormdesk_control_plane=debug,tower_http=debug")
    // - NO_COLOR: Disable ANSI output
    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.service_name == "dormdesk" {
        telemetry_config.service_name = "dormdesk-control-plane".to_string();
    }
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter =
            Some("dormdesk_control_plane=debug,dormdesk_core=debug,tower_http=debug".to_string());
    }

    // Keep the guard alive for the lifetime of the application
    let _telemetry_guard = init_telemetry(telemetry_config);

    tracing::info!("dormdesk-control-plane starting...");

    let config = AppConfig::from_env();

    // Initialize storage
    let storage = match &config.database_url {
        Some(url) => {
            let backend = StorageBackend::postgres(url)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Connected to database");
            backend
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory storage (dev mode)");
            StorageBackend::in_memory()
        }
    };
    let dev_mode = storage.is_dev_mode();
    let pool = storage.pool().cloned();

    let notifier: Arc<dyn EventNotifier> = match &pool {
        Some(pool) => Arc::new(PgNotifier::new(pool.clone())),
        None => Arc::new(NoopNotifier),
    };

    let bus = Arc::new(EventBus::new(
        Arc::new(storage),
        notifier,
        config.bus.clone(),
    ));
    tracing::info!(instance_id = %bus.instance_id(), "Event bus ready");

    let shutdown = CancellationToken::new();

    let listener_task = pool.map(|pool| spawn_listener(pool, bus.clone(), shutdown.clone()));

    // Automation backend (optional - actions fail cleanly if not configured)
    let automation_client = match &config.automation {
        Some(automation) => {
            let client = AutomationClient::new(automation)
                .context("Failed to create automation client")?;
            tracing::info!(base_url = %automation.base_url, "Automation backend configured");
            Some(Arc::new(client))
        }
        None => {
            tracing::warn!("AUTOMATION_BASE_URL not set, actions are unavailable");
            None
        }
    };

    let backend: Arc<dyn AutomationBackend> = match &automation_client {
        Some(client) => client.clone(),
        None => Arc::new(UnconfiguredAutomation),
    };

    let classifier: Arc<dyn IntentClassifier> = match (&config.classifier, &automation_client) {
        (ClassifierMode::Remote, Some(client)) => {
            tracing::info!("Using remote intent classifier");
            Arc::new(HttpIntentClassifier::new(client.clone()))
        }
        (ClassifierMode::Remote, None) => {
            tracing::warn!("Remote classifier requested without automation backend, using keywords");
            Arc::new(KeywordClassifier::new())
        }
        (ClassifierMode::Keyword, _) => Arc::new(KeywordClassifier::new()),
    };

    let agent = Arc::new(ActionAgent::new(backend, classifier, config.agent.poll));

    let app = build_app(AppParts {
        events: api::events::AppState::new(bus.clone(), config.publish_secret.clone()),
        agent: api::agent::AppState::new(
            agent,
            bus.clone(),
            config.agent.clone(),
            shutdown.clone(),
        ),
        dev_mode,
        api_prefix: config.api_prefix.clone(),
        cors_origins: config.cors_origins.clone(),
    });

    if !config.api_prefix.is_empty() {
        tracing::info!(prefix = %config.api_prefix, "API prefix configured");
    }

    // Start HTTP server
    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("HTTP server listening on {}", config.http_addr);

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown signal received");
        signal.cancel();
    });

    // Drain closes open SSE streams before waiting on connections
    axum::serve(listener, app)
        .with_graceful_shutdown(drain_on(shutdown.clone(), bus))
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Some(task) = listener_task {
        let _ = task.await;
    }

    tracing::info!("dormdesk-control-plane stopped");
    Ok(())
}
