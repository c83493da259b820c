//! Text-to-vector embedding via an OpenAI-compatible `/embeddings` endpoint.
//!
//! One call in flight per request, no retry or backoff: a provider failure
//! fails the enclosing request (the bulk import loop catches it per chunk).
//! The request timeout is explicit configuration, not whatever the
//! transport happens to default to.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::config::EmbeddingConfig;

pub struct EmbeddingClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build embedding HTTP client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }

    /// The vector width this client is configured for.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Fingerprint stored in `schema_meta` to catch model/width changes
    /// against an existing database.
    pub fn fingerprint(&self) -> String {
        format!("{}@{}", self.model, self.dimensions)
    }

    /// Embed a single text string into an L2-normalized vector.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.api_base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "input": text,
                "model": self.model,
            }))
            .send()
            .await
            .context("embedding request failed")?
            .error_for_status()
            .context("embedding provider returned an error status")?;

        let body: EmbeddingResponse = response
            .json()
            .await
            .context("failed to parse embedding response")?;
        let Some(first) = body.data.into_iter().next() else {
            bail!("embedding response contained no vectors");
        };

        let mut embedding = first.embedding;
        if embedding.len() != self.dimensions {
            bail!(
                "embedding width mismatch: provider returned {}, configured {}",
                embedding.len(),
                self.dimensions
            );
        }

        normalize(&mut embedding);
        Ok(embedding)
    }
}

/// L2-normalize in place. The similarity math (L2 distance ↔ cosine)
/// depends on unit vectors, so this runs on every vector regardless of
/// what the provider claims.
fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
