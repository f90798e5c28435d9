// Automation backend HTTP client
// Decision: Every request is signed with HMAC-SHA256 over "{timestamp}.{body}" (or the path for GETs)
// Decision: Non-2xx responses become typed core errors; the agent decides what to do with them
//
// Endpoints (relative to AUTOMATION_BASE_URL):
// - POST /actions                 dispatch an action, returns {kind, id}
// - GET  /actions/{kind}/{id}     status lookup, returns {done, intent?, result?}
// - POST /classify                free-text intent, returns {intent}

use std::sync::Arc;

use async_trait::async_trait;
use dormdesk_core::{
    ActionRequest, ActionRun, AutomationBackend, DashboardError, IntentClassifier, RunStatus,
};
use hmac::{Hmac, Mac};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::AutomationConfig;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "x-dorm-timestamp";
pub const SIGNATURE_HEADER: &str = "x-dorm-signature";

/// Hex HMAC-SHA256 of `"{timestamp}.{material}"`
pub fn sign(secret: &str, timestamp: i64, material: &str) -> String {
    // HMAC accepts keys of any length, including empty
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(material.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    intent: String,
}

/// Signed client for the automation backend
#[derive(Clone)]
pub struct AutomationClient {
    http: Client,
    base_url: Url,
    secret: String,
}

impl AutomationClient {
    pub fn new(config: &AutomationConfig) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        let base_url = Url::parse(&config.base_url)?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("AUTOMATION_BASE_URL cannot be a base URL: {}", config.base_url);
        }
        Ok(Self {
            http,
            base_url,
            secret: config.secret.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn post_json<B, R>(&self, segments: &[&str], body: &B) -> Result<R, String>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = self.url(segments);
        let body = serde_json::to_string(body).map_err(|e| e.to_string())?;
        let timestamp = chrono::Utc::now().timestamp();

        let response = self
            .http
            .post(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(TIMESTAMP_HEADER, timestamp.to_string())
            .header(SIGNATURE_HEADER, sign(&self.secret, timestamp, &body))
            .body(body)
            .send()
            .await
            .map_err(|e| format!("POST {} failed: {}", url.path(), e))?;

        read_json(response).await
    }

    async fn get_json<R>(&self, segments: &[&str]) -> Result<R, String>
    where
        R: for<'de> Deserialize<'de>,
    {
        let url = self.url(segments);
        let timestamp = chrono::Utc::now().timestamp();

        let response = self
            .http
            .get(url.clone())
            .header(TIMESTAMP_HEADER, timestamp.to_string())
            .header(SIGNATURE_HEADER, sign(&self.secret, timestamp, url.path()))
            .send()
            .await
            .map_err(|e| format!("GET {} failed: {}", url.path(), e))?;

        read_json(response).await
    }
}

async fn read_json<R>(response: reqwest::Response) -> Result<R, String>
where
    R: for<'de> Deserialize<'de>,
{
    let status = response.status();
    let path = response.url().path().to_string();
    let body = response
        .text()
        .await
        .map_err(|e| format!("Failed to read response from {}: {}", path, e))?;

    if !status.is_success() {
        return Err(format!("{} returned {}: {}", path, status, body));
    }

    serde_json::from_str(&body).map_err(|e| format!("Invalid response from {}: {}", path, e))
}

#[async_trait]
impl AutomationBackend for AutomationClient {
    async fn dispatch(&self, request: &ActionRequest) -> dormdesk_core::Result<ActionRun> {
        let run: ActionRun = self
            .post_json(&["actions"], request)
            .await
            .map_err(DashboardError::dispatch)?;
        tracing::debug!(action = %request.name, run = %run, "Automation backend accepted action");
        Ok(run)
    }

    async fn status(&self, run: &ActionRun) -> dormdesk_core::Result<RunStatus> {
        self.get_json(&["actions", run.kind.as_str(), &run.id])
            .await
            .map_err(DashboardError::status_lookup)
    }
}

/// Free-text classification through the automation backend
#[derive(Clone)]
pub struct HttpIntentClassifier {
    client: Arc<AutomationClient>,
}

impl HttpIntentClassifier {
    pub fn new(client: Arc<AutomationClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IntentClassifier for HttpIntentClassifier {
    async fn classify(&self, text: &str) -> dormdesk_core::Result<String> {
        let response: ClassifyResponse = self
            .client
            .post_json(&["classify"], &ClassifyRequest { text })
            .await
            .map_err(DashboardError::classify)?;
        Ok(response.intent)
    }
}

/// Stand-in backend when AUTOMATION_BASE_URL is not configured
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredAutomation;

#[async_trait]
impl AutomationBackend for UnconfiguredAutomation {
    async fn dispatch(&self, request: &ActionRequest) -> dormdesk_core::Result<ActionRun> {
        Err(DashboardError::dispatch(format!(
            "automation backend is not configured (action {})",
            request.name
        )))
    }

    async fn status(&self, run: &ActionRun) -> dormdesk_core::Result<RunStatus> {
        Err(DashboardError::status_lookup(format!(
            "automation backend is not configured (run {})",
            run
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client(base_url: &str) -> AutomationClient {
        AutomationClient::new(&AutomationConfig {
            base_url: base_url.to_string(),
            secret: "k".to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    #[test]
    fn test_signature_shape() {
        let a = sign("secret", 1_700_000_000, r#"{"name":"payment.cash"}"#);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, sign("secret", 1_700_000_000, r#"{"name":"payment.cash"}"#));
        assert_ne!(a, sign("secret", 1_700_000_001, r#"{"name":"payment.cash"}"#));
        assert_ne!(a, sign("other", 1_700_000_000, r#"{"name":"payment.cash"}"#));
    }

    #[test]
    fn test_url_building_keeps_base_path() {
        let c = client("https://automation.test/hooks");
        assert_eq!(
            c.url(&["actions", "booking", "run 1"]).as_str(),
            "https://automation.test/hooks/actions/booking/run%201"
        );

        let c = client("https://automation.test/");
        assert_eq!(c.url(&["classify"]).as_str(), "https://automation.test/classify");
    }

    #[test]
    fn test_rejects_non_base_url() {
        let result = AutomationClient::new(&AutomationConfig {
            base_url: "mailto:ops@dorm.test".to_string(),
            secret: String::new(),
            timeout: Duration::from_secs(1),
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_backend_fails_dispatch() {
        let request = ActionRequest {
            name: "payment.cash".to_string(),
            args: serde_json::Value::Null,
            tenant_id: "t1".to_string(),
            session_id: "s1".to_string(),
        };
        let err = UnconfiguredAutomation.dispatch(&request).await.unwrap_err();
        assert!(matches!(err, DashboardError::Dispatch(_)));
    }
}
