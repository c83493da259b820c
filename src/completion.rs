//! Answer generation via an OpenAI-compatible `/chat/completions` endpoint.
//!
//! Used only by the retrieval-augmented `/chat` route. Same provider rules
//! as embeddings: one call in flight, explicit timeout, no retry.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::config::CompletionConfig;

const SYSTEM_PROMPT: &str = "You answer questions based on the provided memory context. \
     Be concise and accurate. Cite memory types when relevant.";

pub struct CompletionClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
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

impl CompletionClient {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build completion HTTP client")?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    /// Generate an answer to `question` grounded in `context` (the
    /// concatenated memory lines assembled by the caller).
    pub async fn answer(&self, context: &str, question: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let user_prompt = format!("Context from memory:\n{context}\n\nQuestion: {question}");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": user_prompt},
                ],
                "max_tokens": self.max_tokens,
            }))
            .send()
            .await
            .context("completion request failed")?
            .error_for_status()
            .context("completion provider returned an error status")?;

        let body: ChatResponse = response
            .json()
            .await
            .context("failed to parse completion response")?;
        let Some(choice) = body.choices.into_iter().next() else {
            bail!("completion response contained no choices");
        };
        Ok(choice.message.content)
    }
}
