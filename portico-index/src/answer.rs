//! Optional answer decoration for search responses.
//!
//! Search is complete without this: the generator only adds a free-text
//! `answer` next to the retrieved sources, and any failure here is logged
//! and swallowed so the source list is never blocked by it.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_MODEL: &str = "deepseek/deepseek-prover-v2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// External text-generation collaborator.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn answer(&self, query: &str) -> Result<String>;
}

/// OpenRouter-compatible chat-completion client.
pub struct OpenRouterGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenRouterGenerator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Build a generator from `OPENROUTER_API_KEY` / `OPENROUTER_MODEL`.
    /// Returns `None` when no key is configured, which turns decoration off.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY").ok()?;
        if api_key.is_empty() {
            return None;
        }
        let model =
            std::env::var("OPENROUTER_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Self::new(api_key, model).ok()
    }
}

#[async_trait]
impl AnswerGenerator for OpenRouterGenerator {
    async fn answer(&self, query: &str) -> Result<String> {
        let response = self
            .client
            .post(OPENROUTER_URL)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [{"role": "user", "content": query}],
            }))
            .send()
            .await?;

        anyhow::ensure!(
            response.status().is_success(),
            "answer backend returned {}",
            response.status()
        );

        let body: serde_json::Value = response.json().await?;
        Ok(body["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_without_key_is_none() {
        // The variable is unset in the test environment
        if std::env::var("OPENROUTER_API_KEY").is_err() {
            assert!(OpenRouterGenerator::from_env().is_none());
        }
    }

    #[test]
    fn test_generator_construction() {
        let generator = OpenRouterGenerator::new("test-key", DEFAULT_MODEL).unwrap();
        assert_eq!(generator.model, DEFAULT_MODEL);
    }
}
