use crate::error::{DealRecordError, Result};
use crate::utils::default_placeholders;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(default)]
pub struct PipelineConfig {
    #[schemars(description = "Number of estimate periods appended to the free cash flow forecast")]
    pub forecast_horizon: u32,

    #[schemars(description = "Per-section deadline for a FieldExtractor call, in seconds")]
    pub extraction_timeout_secs: u64,

    #[schemars(description = "Document text is cut to this many characters before dispatch")]
    pub max_text_chars: usize,

    #[schemars(
        description = "An unlabeled value is promoted to millions only when it lies within this factor of an explicitly-millions sibling"
    )]
    pub plausibility_ratio: Decimal,

    #[schemars(description = "Lower-case strings that stand for a missing number")]
    pub placeholder_tokens: Vec<String>,

    #[schemars(description = "Fill missing periods from disclosed accounting identities")]
    pub enable_derivations: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            forecast_horizon: 5,
            extraction_timeout_secs: 120,
            max_text_chars: 100_000,
            plausibility_ratio: Decimal::ONE_HUNDRED,
            placeholder_tokens: default_placeholders(),
            enable_derivations: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut config: PipelineConfig = serde_json::from_str(json)?;
        config.placeholder_tokens = config
            .placeholder_tokens
            .iter()
            .map(|token| token.trim().to_lowercase())
            .collect();
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.forecast_horizon == 0 {
            return Err(DealRecordError::InvalidConfig(
                "forecast_horizon must be at least 1".to_string(),
            ));
        }
        if self.plausibility_ratio <= Decimal::ONE {
            return Err(DealRecordError::InvalidConfig(format!(
                "plausibility_ratio must be greater than 1, got {}",
                self.plausibility_ratio
            )));
        }
        if self.extraction_timeout_secs == 0 {
            return Err(DealRecordError::InvalidConfig(
                "extraction_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
