//! Chat-completion client for concept extraction.
//!
//! One OpenAI-compatible endpoint (OpenRouter by default). The API key is
//! preflight-validated with a 1-token request before an ingestion batch
//! starts; HTTP 401/403 is fatal and must abort before any store write.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};

pub const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

pub struct ChatClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl ChatClient {
    pub fn new(endpoint: &str, api_key: &str, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Upstream {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    /// Build from the environment. A missing key aborts ingestion before
    /// any store write.
    pub fn from_env(model: &str) -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| Error::MissingParameter { name: API_KEY_ENV })?;
        Self::new(DEFAULT_ENDPOINT, &api_key, model)
    }

    /// 1-token request expecting HTTP 200. 401/403 surfaces as a fatal auth
    /// error; callers exit with code 1 without touching the store.
    pub async fn preflight(&self) -> Result<()> {
        self.complete_raw("ping", 1).await.map(|_| ())
    }

    pub async fn complete(&self, prompt: &str) -> Result<String> {
        self.complete_raw(prompt, 2048).await
    }

    async fn complete_raw(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "max_tokens": max_tokens,
            "temperature": 0.0,
            "stream": false,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout { deadline: Duration::from_secs(120) }
                } else {
                    Error::Upstream {
                        endpoint: self.endpoint.clone(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::Auth { status: status.as_u16() });
        }
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(Error::RateLimit { retry_after });
        }

        let body = response.text().await.map_err(|e| Error::Upstream {
            endpoint: self.endpoint.clone(),
            message: format!("failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(Error::Upstream {
                endpoint: self.endpoint.clone(),
                message: format!("HTTP {}: {}", status, truncate(&body, 300)),
            });
        }

        // Some gateways return an HTML error page with HTTP 200.
        let trimmed = body.trim_start();
        if trimmed.starts_with('<') {
            return Err(Error::Upstream {
                endpoint: self.endpoint.clone(),
                message: format!("endpoint returned HTML instead of JSON: {}", truncate(trimmed, 200)),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| Error::Upstream {
            endpoint: self.endpoint.clone(),
            message: format!("malformed chat response: {} — body: {}", e, truncate(&body, 300)),
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Upstream {
                endpoint: self.endpoint.clone(),
                message: "chat endpoint returned empty choices".to_string(),
            })
    }
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_without_key_is_missing_parameter() {
        std::env::remove_var(API_KEY_ENV);
        let err = ChatClient::from_env("test-model").unwrap_err();
        assert_eq!(err.code(), "MISSING_PARAMETER");
    }
}
