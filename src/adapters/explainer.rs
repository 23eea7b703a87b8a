//! Natural-language explanation capability
//!
//! Request `{"prompt": ...}`, response `{"explanation": ...}`. Optional and
//! timeout-bounded; callers treat every failure as "stay raw".

use crate::config::EnrichmentConfig;
use crate::error::{CoSenseError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Explainer: Send + Sync {
    /// Explain an alert given its structured prompt
    async fn explain(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ExplainRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExplainResponse {
    explanation: String,
}

/// HTTP explanation client
#[derive(Clone)]
pub struct HttpExplainer {
    client: Client,
    url: String,
}

impl HttpExplainer {
    pub fn new(config: &EnrichmentConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl Explainer for HttpExplainer {
    async fn explain(&self, prompt: &str) -> Result<String> {
        let resp = self
            .client
            .post(&self.url)
            .json(&ExplainRequest { prompt })
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CoSenseError::Enrichment(format!("HTTP {}: {}", status, body)));
        }

        let body: ExplainResponse = resp.json().await?;
        let explanation = body.explanation.trim().to_string();
        if explanation.is_empty() {
            return Err(CoSenseError::Enrichment("empty explanation".to_string()));
        }
        debug!(chars = explanation.len(), "explanation received");
        Ok(explanation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let json = serde_json::to_value(ExplainRequest { prompt: "why" }).unwrap();
        assert_eq!(json, serde_json::json!({"prompt": "why"}));
    }

    #[test]
    fn test_response_parse() {
        let body: ExplainResponse =
            serde_json::from_str(r#"{"explanation": "Robot 3 keeps meeting a picker."}"#).unwrap();
        assert!(body.explanation.starts_with("Robot 3"));
    }
}
