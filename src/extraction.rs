//! Collaborator interfaces and the concurrent dispatch of extraction passes.
//!
//! Each section is extracted under its own deadline. A failure or timeout in one
//! section degrades only that section; the join waits for every pass.

use crate::config::PipelineConfig;
use crate::error::{DealRecordError, Result};
use crate::fragment::{Fragment, SectionKind};
use crate::schema::DealRecord;
use crate::store::{validate_deal_id, RecordStore};
use crate::utils::truncate_chars;
use crate::validator::FragmentValidator;
use crate::DealRecordProcessor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Produces a schema-shaped fragment for one section of a document. Output is untrusted.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract(&self, text: &str, section: SectionKind) -> Result<Value>;
}

/// Turns raw file bytes into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, bytes: &[u8], file_name: &str) -> Result<String>;
}

/// Reads already-textual documents (`.txt`, `.md`, OCR dumps) as UTF-8.
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract_text(&self, bytes: &[u8], file_name: &str) -> Result<String> {
        let text = String::from_utf8_lossy(bytes).into_owned();
        if text.trim().is_empty() {
            return Err(DealRecordError::ExtractionFailure {
                section: "text".to_string(),
                reason: format!("{} contains no text", file_name),
            });
        }
        Ok(text)
    }
}

/// What one extraction pass produced.
#[derive(Debug)]
pub struct SectionOutcome {
    pub section: SectionKind,
    pub result: Result<Fragment>,
}

/// Runs every section's extraction concurrently and validates what comes back.
pub async fn dispatch_extractions(
    extractor: &dyn FieldExtractor,
    text: &str,
    sections: &[SectionKind],
    config: &PipelineConfig,
) -> Vec<SectionOutcome> {
    let text = truncate_chars(text, config.max_text_chars);
    let validator = FragmentValidator::new(config);
    let validator = &validator;
    let deadline = Duration::from_secs(config.extraction_timeout_secs);

    debug!(
        "Dispatching {} sections over {} characters of text",
        sections.len(),
        text.chars().count()
    );

    let passes = sections.iter().map(|&section| async move {
        let result = match tokio::time::timeout(deadline, extractor.extract(text, section)).await {
            Ok(Ok(raw)) => validator.validate(&raw, section),
            Ok(Err(e)) if !e.is_terminal() => Err(e),
            Ok(Err(other)) => Err(DealRecordError::ExtractionFailure {
                section: section.to_string(),
                reason: other.to_string(),
            }),
            Err(_) => Err(DealRecordError::ExtractionFailure {
                section: section.to_string(),
                reason: format!("timed out after {}s", deadline.as_secs()),
            }),
        };

        match &result {
            Ok(fragment) if !fragment.issues.is_empty() => warn!(
                "{} fragment accepted with {} issues",
                section,
                fragment.issues.len()
            ),
            Ok(_) => debug!("{} fragment accepted", section),
            Err(e) => warn!("{} section degraded: {}", section, e),
        }

        SectionOutcome { section, result }
    });

    join_all(passes).await
}

/// Full run for one deal: extraction, reconciliation and persistence.
pub struct DealPipeline {
    extractor: Arc<dyn FieldExtractor>,
    store: Arc<dyn RecordStore>,
    config: PipelineConfig,
    sections: Vec<SectionKind>,
}

impl DealPipeline {
    pub fn new(
        extractor: Arc<dyn FieldExtractor>,
        store: Arc<dyn RecordStore>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            extractor,
            store,
            config,
            sections: SectionKind::all().to_vec(),
        })
    }

    /// Restricts which passes run. The general pass is always included.
    pub fn with_sections(mut self, sections: &[SectionKind]) -> Self {
        let mut selected = vec![SectionKind::General];
        for section in sections {
            if !selected.contains(section) {
                selected.push(*section);
            }
        }
        self.sections = selected;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Extracts, reconciles and persists. `deal_value` is the user-entered figure and
    /// overrides anything the extractor found.
    pub async fn run(
        &self,
        deal_id: &str,
        text: &str,
        deal_value: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<DealRecord> {
        validate_deal_id(deal_id)?;
        info!(
            "Running {} extraction passes for deal {}",
            self.sections.len(),
            deal_id
        );

        let outcomes =
            dispatch_extractions(self.extractor.as_ref(), text, &self.sections, &self.config)
                .await;

        let total = outcomes.len();
        let fragments: Vec<Fragment> = outcomes
            .into_iter()
            .filter_map(|outcome| outcome.result.ok())
            .collect();
        info!("{} of {} sections produced fragments", fragments.len(), total);

        let mut record = DealRecordProcessor::reconcile(fragments, &self.config)?;
        if let Some(value) = deal_value.map(str::trim).filter(|v| !v.is_empty()) {
            record.header.deal_value = Some(value.to_string());
        }

        crate::assembler::RecordAssembler::publish(
            self.store.as_ref(),
            deal_id,
            record,
            created_at,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct CannedExtractor;

    #[async_trait]
    impl FieldExtractor for CannedExtractor {
        async fn extract(&self, text: &str, section: SectionKind) -> Result<Value> {
            match section {
                SectionKind::General => Ok(json!({"company_name": text, "currency": "USD"})),
                SectionKind::Capex => Ok(json!({"capex": {"2023": "5"}})),
                SectionKind::WorkingCapital => Ok(json!("not an object")),
                SectionKind::FreeCashFlow => Err(DealRecordError::ExtractionFailure {
                    section: section.to_string(),
                    reason: "model refused".to_string(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_dispatch_degrades_failed_sections_only() {
        let outcomes = dispatch_extractions(
            &CannedExtractor,
            "Acme",
            &SectionKind::all(),
            &PipelineConfig::default(),
        )
        .await;

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes[0].result.is_ok());
        assert!(outcomes[1].result.is_ok());
        assert!(matches!(
            outcomes[2].result,
            Err(DealRecordError::MalformedFragment { .. })
        ));
        assert!(matches!(
            outcomes[3].result,
            Err(DealRecordError::ExtractionFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_text_is_truncated_before_dispatch() {
        let config = PipelineConfig {
            max_text_chars: 4,
            ..PipelineConfig::default()
        };
        let outcomes =
            dispatch_extractions(&CannedExtractor, "Acme Holdings", &[SectionKind::General], &config)
                .await;
        let fragment = outcomes[0].result.as_ref().unwrap();
        assert_eq!(fragment.header.company_name.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_general_section_always_runs() {
        let pipeline = DealPipeline::new(
            Arc::new(CannedExtractor),
            Arc::new(crate::store::MemoryStore::new()),
            PipelineConfig::default(),
        )
        .unwrap()
        .with_sections(&[SectionKind::Capex, SectionKind::Capex]);

        assert_eq!(pipeline.sections, vec![SectionKind::General, SectionKind::Capex]);
        assert_eq!(pipeline.config().forecast_horizon, 5);
    }

    #[tokio::test]
    async fn test_plain_text_extractor() {
        let text = PlainTextExtractor
            .extract_text(b"Revenue FY23 $10M", "deal.txt")
            .await
            .unwrap();
        assert!(text.contains("FY23"));
        assert!(PlainTextExtractor.extract_text(b"   ", "blank.txt").await.is_err());
    }
}
