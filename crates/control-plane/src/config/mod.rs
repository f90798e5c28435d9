// Configuration loaded from environment variables
// Decision: Every setting has a working default so `cargo run` works with an empty environment
// Decision: Unparseable numbers fall back to the default with a warning instead of aborting startup
//
// Values are read through a lookup function so tests can supply a map
// instead of mutating the process environment.

use std::collections::HashMap;
use std::time::Duration;

use dormdesk_core::agent::{DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use dormdesk_core::bus::{DEFAULT_CLIENT_BUFFER, DEFAULT_PING_INTERVAL, DEFAULT_REPLAY_LIMIT};
use dormdesk_core::{BusConfig, PollPolicy};

pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:9000";
pub const DEFAULT_AUTOMATION_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_FOLLOW_UP_ATTEMPTS: u32 = 40;

/// Which intent classifier answers free-text messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassifierMode {
    /// Local keyword matching
    #[default]
    Keyword,
    /// Delegate to the automation backend's `/classify`
    Remote,
}

impl std::str::FromStr for ClassifierMode {
    type Err = std::convert::Infallible;

    /// Unknown names select the keyword classifier
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "remote" | "http" => ClassifierMode::Remote,
            _ => ClassifierMode::Keyword,
        })
    }
}

/// Automation backend connection
#[derive(Debug, Clone, PartialEq)]
pub struct AutomationConfig {
    pub base_url: String,
    /// HMAC key for request signatures
    pub secret: String,
    pub timeout: Duration,
}

/// Agent loop settings
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub poll: PollPolicy,
    /// Keep polling in the background after the request-time budget runs out
    pub follow_up: bool,
    /// Polling policy for the background follow-up
    pub follow_up_poll: PollPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            poll: PollPolicy::default(),
            follow_up: false,
            follow_up_poll: PollPolicy::default().with_max_attempts(DEFAULT_FOLLOW_UP_ATTEMPTS),
        }
    }
}

/// Complete control-plane configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres connection string; `None` runs with in-memory storage
    pub database_url: Option<String>,
    pub http_addr: String,
    /// Prefix for API routes, e.g. "/api" gives "/api/v1/sse"
    pub api_prefix: String,
    pub cors_origins: Vec<String>,
    /// Shared secret for the remote publish endpoint; `None` disables it
    pub publish_secret: Option<String>,
    pub automation: Option<AutomationConfig>,
    pub classifier: ClassifierMode,
    pub bus: BusConfig,
    pub agent: AgentConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
            api_prefix: String::new(),
            cors_origins: Vec::new(),
            publish_secret: None,
            automation: None,
            classifier: ClassifierMode::default(),
            bus: BusConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `DATABASE_URL`: Postgres URL (unset: in-memory dev mode)
    /// - `HTTP_ADDR`: Listen address (default: "0.0.0.0:9000")
    /// - `API_PREFIX`: Route prefix (default: none)
    /// - `CORS_ALLOWED_ORIGINS`: Comma-separated origins
    /// - `PUBLISH_SECRET`: Shared secret for `POST /v1/events`
    /// - `AUTOMATION_BASE_URL`, `AUTOMATION_SECRET`, `AUTOMATION_TIMEOUT_SECS`
    /// - `INTENT_CLASSIFIER`: "keyword" (default) or "remote"
    /// - `SSE_PING_INTERVAL_SECS`, `SSE_REPLAY_LIMIT`, `SSE_BUFFER`
    /// - `AGENT_POLL_ATTEMPTS`, `AGENT_POLL_INTERVAL_MS`
    /// - `AGENT_FOLLOW_UP`, `AGENT_FOLLOW_UP_ATTEMPTS`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Self {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let automation = get("AUTOMATION_BASE_URL").map(|base_url| AutomationConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: get("AUTOMATION_SECRET").unwrap_or_default(),
            timeout: Duration::from_secs(
                parse_or(&get, "AUTOMATION_TIMEOUT_SECS", DEFAULT_AUTOMATION_TIMEOUT.as_secs()).max(1),
            ),
        });

        let poll_interval = Duration::from_millis(parse_or(
            &get,
            "AGENT_POLL_INTERVAL_MS",
            DEFAULT_POLL_INTERVAL.as_millis() as u64,
        ));
        let poll = PollPolicy::new()
            .with_max_attempts(parse_or(&get, "AGENT_POLL_ATTEMPTS", DEFAULT_POLL_ATTEMPTS))
            .with_interval(poll_interval);

        Self {
            database_url: get("DATABASE_URL"),
            http_addr: get("HTTP_ADDR").unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string()),
            api_prefix: get("API_PREFIX").unwrap_or_default(),
            cors_origins: get("CORS_ALLOWED_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            publish_secret: get("PUBLISH_SECRET"),
            automation,
            classifier: get("INTENT_CLASSIFIER")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            bus: BusConfig {
                replay_limit: parse_or(&get, "SSE_REPLAY_LIMIT", DEFAULT_REPLAY_LIMIT),
                ping_interval: Duration::from_secs(
                    parse_or(&get, "SSE_PING_INTERVAL_SECS", DEFAULT_PING_INTERVAL.as_secs()).max(1),
                ),
                client_buffer: parse_or(&get, "SSE_BUFFER", DEFAULT_CLIENT_BUFFER).max(1),
            },
            agent: AgentConfig {
                poll,
                follow_up: get("AGENT_FOLLOW_UP")
                    .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
                    .unwrap_or(false),
                follow_up_poll: poll.with_max_attempts(parse_or(
                    &get,
                    "AGENT_FOLLOW_UP_ATTEMPTS",
                    DEFAULT_FOLLOW_UP_ATTEMPTS,
                )),
            },
        }
    }

    /// Whether the process runs without a database
    pub fn is_dev_mode(&self) -> bool {
        self.database_url.is_none()
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            default
        }),
        None => default,
    }
}
