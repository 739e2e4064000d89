use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Network seam for the telemetry API.
///
/// The engine never talks to `reqwest` directly; everything goes through
/// this trait so tests can substitute an in-memory transport and so the
/// beacon capability stays an explicit, checkable strategy.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value>;

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value>;

    /// Fire-and-forget delivery that survives page teardown, where the
    /// platform offers one. Returns `false` when no such channel exists;
    /// callers then fall back to an ordinary best-effort write. Events
    /// queued at true process termination without a successful beacon
    /// delivery are lost - that is the documented loss boundary.
    fn send_beacon(&self, path: &str, body: Vec<u8>) -> bool;
}

/// Default transport over `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url} failed to send"))?
            .error_for_status()
            .with_context(|| format!("POST {url} returned an error status"))?;

        let text = response
            .text()
            .await
            .with_context(|| format!("POST {url} body read failed"))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).with_context(|| format!("POST {url} returned invalid JSON"))
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {url} failed to send"))?
            .error_for_status()
            .with_context(|| format!("GET {url} returned an error status"))?;

        response
            .json()
            .await
            .with_context(|| format!("GET {url} returned invalid JSON"))
    }

    // No teardown-surviving channel exists for a plain HTTP client; the
    // session manager falls back to a swallowed keepalive-style write.
    fn send_beacon(&self, _path: &str, _body: Vec<u8>) -> bool {
        false
    }
}
