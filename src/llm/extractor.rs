use crate::error::{DealRecordError, Result};
use crate::extraction::FieldExtractor;
use crate::fragment::SectionKind;
use crate::llm::client::LlmClient;
use crate::llm::{prompts, utils::parse_json_output};
use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;

/// FieldExtractor backed by a chat completion model. One request per section.
pub struct LlmFieldExtractor {
    client: LlmClient,
}

impl LlmFieldExtractor {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FieldExtractor for LlmFieldExtractor {
    async fn extract(&self, text: &str, section: SectionKind) -> Result<Value> {
        let schema = section.target_schema()?;
        let user_prompt = prompts::build_user_prompt(section, text, &schema);

        info!("Extracting {} section with {}", section, self.client.model());
        let raw = self
            .client
            .chat(prompts::system_prompt(section), &user_prompt)
            .await
            .map_err(|e| match e {
                DealRecordError::ExtractionFailure { reason, .. } => {
                    DealRecordError::ExtractionFailure {
                        section: section.to_string(),
                        reason,
                    }
                }
                other => DealRecordError::ExtractionFailure {
                    section: section.to_string(),
                    reason: other.to_string(),
                },
            })?;

        debug!("{} section returned {} characters", section, raw.len());
        parse_json_output(&raw, section)
    }
}
