//! HTTP embedding client for OpenAI-compatible `/embeddings` endpoints.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{validate_embedding, EmbeddingModel};
use crate::error::{Error, Result};

pub struct RemoteEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model_id: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    pub fn new(endpoint: &str, api_key: &str, model_id: &str, dimension: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Upstream {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            model_id: model_id.to_string(),
            dimension,
        })
    }

    async fn request(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = json!({
            "model": self.model_id,
            "input": inputs,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout { deadline: Duration::from_secs(60) }
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
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                endpoint: self.endpoint.clone(),
                message: format!("HTTP {}: {}", status, message),
            });
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| Error::Upstream {
            endpoint: self.endpoint.clone(),
            message: format!("malformed embedding response: {}", e),
        })?;

        if parsed.data.len() != inputs.len() {
            return Err(Error::InvalidEmbeddings {
                reason: format!(
                    "endpoint returned {} vectors for {} inputs",
                    parsed.data.len(),
                    inputs.len()
                ),
            });
        }

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|row| row.embedding).collect();
        for vector in &vectors {
            validate_embedding(vector, self.dimension)?;
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingModel for RemoteEmbedder {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        Ok(vectors.remove(0))
    }

    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_query(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
