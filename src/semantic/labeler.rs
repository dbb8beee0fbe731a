//! Label generation via an external text-generation service.
//!
//! The suggestion orchestrator only needs "prompt in, text out"; the
//! `Labeler` trait keeps it that narrow so tests can substitute a mock.
//! `HttpLabeler` talks to an OpenAI-compatible chat-completions endpoint.
//! Responses are expected to *often* be JSON of shape
//! `{"title": ..., "description": ...}`; tolerating malformed responses
//! is the caller's job (see `suggest`), not the transport's.

use serde::{Deserialize, Serialize};

use crate::config::LabelerConfig;

/// Errors from the label-generation collaborator. These are not locally
/// recoverable; the orchestrator decides what a failure means per cluster.
#[derive(Debug, thiserror::Error)]
pub enum LabelError {
    #[error("API key not set (expected in ${0})")]
    MissingApiKey(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("empty response from label service")]
    EmptyResponse,
}

/// A text-generation collaborator that labels a cluster of content.
pub trait Labeler {
    fn label(
        &self,
        prompt: &str,
    ) -> impl std::future::Future<Output = Result<String, LabelError>> + Send;
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageContent,
}

#[derive(Deserialize)]
struct ChatMessageContent {
    content: String,
}

/// Labeler backed by an OpenAI-compatible chat-completions endpoint.
pub struct HttpLabeler {
    client: reqwest::Client,
    config: LabelerConfig,
}

impl HttpLabeler {
    pub fn new(config: LabelerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    fn api_key(&self) -> Result<String, LabelError> {
        std::env::var(&self.config.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| LabelError::MissingApiKey(self.config.api_key_env.clone()))
    }
}

impl Labeler for HttpLabeler {
    async fn label(&self, prompt: &str) -> Result<String, LabelError> {
        let api_key = self.api_key()?;

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: self.config.max_tokens,
        };

        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        log::debug!("labeler request to {url} ({} chars)", prompt.len());

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LabelError::Api { status, body });
        }

        let api_response: ChatResponse = response.json().await?;

        api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(LabelError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(env: &str) -> LabelerConfig {
        LabelerConfig {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: env.to_string(),
            max_tokens: 300,
            timeout_secs: 30,
        }
    }

    #[test]
    fn test_missing_api_key() {
        let labeler = HttpLabeler::new(test_config("SN_TEST_NO_SUCH_KEY"));
        let result = labeler.api_key();
        assert!(matches!(result, Err(LabelError::MissingApiKey(_))));
    }

    #[test]
    fn test_empty_api_key_counts_as_missing() {
        std::env::set_var("SN_TEST_EMPTY_KEY", "");
        let labeler = HttpLabeler::new(test_config("SN_TEST_EMPTY_KEY"));
        assert!(matches!(labeler.api_key(), Err(LabelError::MissingApiKey(_))));
        std::env::remove_var("SN_TEST_EMPTY_KEY");
    }
}
