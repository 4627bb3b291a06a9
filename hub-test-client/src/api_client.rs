use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::{json, Value};

pub struct ApiClient {
    client: Client,
    base_url: String,
    publish_token: Option<String>,
}

impl ApiClient {
    pub fn new(client: Client, base_url: String, publish_token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            publish_token,
        }
    }

    pub async fn health(&self) -> Result<Value> {
        let url = format!("{}/health", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to call health check")?;

        if !response.status().is_success() {
            anyhow::bail!("Health check failed: {}", response.status());
        }

        response.json().await.context("Failed to parse response")
    }

    /// Publishes an invalidation of `query_keys` to `scope` and returns how many clients accepted it.
    pub async fn publish(&self, scope: Value, query_keys: &[&str]) -> Result<u64> {
        let url = format!("{}/internal/publish", self.base_url);

        let mut request = self.client.post(&url).json(&json!({
            "scope": scope,
            "invalidation": { "queryKeys": query_keys },
        }));
        if let Some(token) = &self.publish_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context("Failed to publish")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            anyhow::bail!("Failed to publish: {} - Response: {}", status, body);
        }

        let api_response: Value = response.json().await.context("Failed to parse response")?;
        api_response["delivered"]
            .as_u64()
            .context("No delivered count in response")
    }
}
