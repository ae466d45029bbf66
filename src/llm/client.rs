use crate::error::{DealRecordError, Result};
use crate::llm::types::*;
use log::debug;
use reqwest::Client;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "openai/gpt-oss-120b";
const DEFAULT_MAX_TOKENS: u32 = 16_000;

/// Connection settings for any OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: OPENAI_BASE_URL.to_string(),
            temperature: 0.0,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// Reads `LLM_API_KEY` (falling back to `OPENAI_API_KEY`), `LLM_MODEL` and
    /// `LLM_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("LLM_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| {
                DealRecordError::InvalidConfig(
                    "LLM_API_KEY or OPENAI_API_KEY must be set".to_string(),
                )
            })?;

        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var("LLM_MODEL") {
            config.model = model;
        }
        if let Ok(base_url) = std::env::var("LLM_BASE_URL") {
            config.base_url = base_url;
        }
        Ok(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// One system + user exchange. Returns the raw text of the first choice.
    pub async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let payload = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage::system(system_prompt),
                ChatMessage::user(user_prompt),
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: Some(ResponseFormat::json_object()),
        };

        debug!(
            "Requesting completion from {} ({} prompt chars)",
            self.config.model,
            system_prompt.len() + user_prompt.len()
        );

        let res = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await?;
        let status = res.status();

        if !status.is_success() {
            let err_text = res.text().await?;
            return Err(DealRecordError::ExtractionFailure {
                section: "llm".to_string(),
                reason: format!("API error (status {}): {}", status, err_text),
            });
        }

        let body: ChatCompletionResponse = res.json().await?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| DealRecordError::ExtractionFailure {
                section: "llm".to_string(),
                reason: "no choices returned".to_string(),
            })?;

        if choice.finish_reason.as_deref() == Some("length") {
            debug!("Completion was cut off at {} tokens", self.config.max_tokens);
        }

        choice
            .message
            .content
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| DealRecordError::ExtractionFailure {
                section: "llm".to_string(),
                reason: "model returned empty content".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = LlmConfig::new("key");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.max_tokens, 16_000);
        assert_eq!(
            config.completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let config = LlmConfig::new("key").with_base_url("https://integrate.api.nvidia.com/v1/");
        assert_eq!(
            config.completions_url(),
            "https://integrate.api.nvidia.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_request_serialization() {
        let request = ChatCompletionRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage::user("hi")],
            temperature: 0.0,
            max_tokens: 10,
            response_format: Some(ResponseFormat::json_object()),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["messages"][0]["role"], "user");
    }
}
