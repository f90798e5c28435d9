// Logging setup
//
// Console logging through tracing-subscriber with an env-driven filter.
// Binaries call `init_telemetry` once at startup and hold the guard for the
// lifetime of the process.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_SERVICE_NAME: &str = "dormdesk";
const DEFAULT_FILTER: &str = "info";

// ============================================================================
// Telemetry Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Deployment environment (e.g., "development", "production")
    pub environment: Option<String>,
    /// Whether to enable console logging
    pub enable_console: bool,
    /// Whether console output uses ANSI colors
    pub ansi: bool,
    /// Log filter (e.g., "info", "debug", "dormdesk_core=debug")
    pub log_filter: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            environment: None,
            enable_console: true,
            ansi: true,
            log_filter: None,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `SERVICE_NAME`: Service name (default: "dormdesk")
    /// - `APP_ENV`: Deployment environment
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    /// - `NO_COLOR`: Disable ANSI colors when set
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("SERVICE_NAME")
                .unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string()),
            environment: std::env::var("APP_ENV").ok(),
            enable_console: true,
            ansi: std::env::var_os("NO_COLOR").is_none(),
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
        }
    }

    /// Resolve the filter, falling back to `info` when unset or invalid
    pub fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Guard returned by `init_telemetry`; logs shutdown when dropped
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Telemetry shut down");
    }
}

/// Initialize the global subscriber
///
/// Keep the returned guard alive for the lifetime of your application.
/// A second call keeps the first subscriber and only logs a warning.
///
/// ```ignore
/// use dormdesk_core::telemetry::{init_telemetry, TelemetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let _guard = init_telemetry(TelemetryConfig::from_env());
/// }
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let console_layer = if config.enable_console {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_ansi(config.ansi)
                .with_filter(config.filter()),
        )
    } else {
        None
    };

    if let Err(e) = tracing_subscriber::registry().with(console_layer).try_init() {
        tracing::warn!(error = %e, "Global subscriber already set");
    }

    tracing::info!(
        service = %config.service_name,
        environment = config.environment.as_deref().unwrap_or("development"),
        "Telemetry initialized"
    );

    TelemetryGuard {
        service_name: config.service_name,
    }
}
