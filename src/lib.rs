//! # Deal Record Builder
//!
//! A library for reconciling partial, possibly inconsistent extractions of a financial
//! document into one consistent deal record.
//!
//! ## Core Concepts
//!
//! - **Fragments**: untrusted JSON produced by a general extraction pass and by dedicated
//!   passes for CAPEX, change in working capital and free cash flow
//! - **Precedence**: a dedicated pass always wins for the metric it owns
//! - **Normalization**: canonical periods (`FY23` → 2023), values in millions, one
//!   currency glyph, CAPEX as a magnitude
//! - **Derivations**: missing periods filled from accounting identities once units agree
//! - **Forecast**: a deterministic free cash flow projection with disclosed growth
//! - **Assembly**: every output section present; incomplete records are never persisted
//!
//! ## Example
//!
//! ```rust,ignore
//! use deal_record_builder::*;
//! use serde_json::json;
//!
//! let general = json!({
//!     "company_name": "Acme Ltd",
//!     "currency": "USD",
//!     "revenue": {"history": [{"period": "FY22", "value": "90"}, {"period": "FY23", "value": "$100M"}]},
//!     "tale_of_the_tape": {"capex": {"year_wise": {"2023": "50"}}}
//! });
//! let capex = json!({"tale_of_the_tape": {"capex": {"year_wise": {"2023": "55"}}}});
//!
//! let record = process_fragments(
//!     &[(SectionKind::General, general), (SectionKind::Capex, capex)],
//!     &PipelineConfig::default(),
//! )
//! .unwrap();
//!
//! assert_eq!(record.tale_of_the_tape.capex.items[0].source, SourceTag::DedicatedCapex);
//! ```

pub mod assembler;
pub mod config;
pub mod currency;
pub mod error;
pub mod extraction;
pub mod forecast;
pub mod fragment;
pub mod merger;
pub mod normalizer;
pub mod period;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod utils;
pub mod validator;

#[cfg(feature = "llm")]
pub mod llm;

pub use assembler::RecordAssembler;
pub use config::PipelineConfig;
pub use error::{DealRecordError, Result};
pub use extraction::{
    dispatch_extractions, DealPipeline, FieldExtractor, PlainTextExtractor, SectionOutcome,
    TextExtractor,
};
pub use forecast::ForecastEngine;
pub use fragment::{Fragment, FragmentIssue, SectionKind};
pub use merger::SectionMerger;
pub use normalizer::Normalizer;
pub use period::PeriodKey;
pub use resolver::IdentityResolver;
pub use schema::*;
pub use store::{JsonFileStore, MemoryStore, RecordStore, StoredRecord};
pub use validator::{validate_fragment, FragmentValidator};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::Value;

pub struct DealRecordProcessor;

impl DealRecordProcessor {
    /// Validates raw fragments, dropping the malformed ones. A malformed fragment only
    /// costs its own section.
    pub fn validate_fragments(raw: &[(SectionKind, Value)], config: &PipelineConfig) -> Vec<Fragment> {
        let validator = FragmentValidator::new(config);
        raw.iter()
            .filter_map(|(kind, value)| match validator.validate(value, *kind) {
                Ok(fragment) => {
                    for issue in &fragment.issues {
                        debug!("{} fragment: {} ({})", kind, issue.details, issue.path);
                    }
                    Some(fragment)
                }
                Err(e) => {
                    warn!("Dropping {} fragment: {}", kind, e);
                    None
                }
            })
            .collect()
    }

    /// Merge, normalize, derive missing periods and forecast. The result is a draft that has not been checked
    /// for completeness.
    pub fn reconcile(fragments: Vec<Fragment>, config: &PipelineConfig) -> Result<DealRecord> {
        config.validate()?;

        info!("Reconciling {} fragments", fragments.len());
        let merged = SectionMerger::merge(fragments);
        let normalized = Normalizer::new(config).normalize(merged);
        let resolved = IdentityResolver::new(config).resolve(normalized);
        let forecasted = ForecastEngine::new(config).apply(resolved);

        debug!(
            "Draft has {} revenue items, {} profit metrics, {} FCF items",
            forecasted.revenue.len(),
            forecasted.profit_metrics.len(),
            forecasted.free_cash_flow.historical.len()
        );
        Ok(forecasted)
    }

    pub fn process(raw: &[(SectionKind, Value)], config: &PipelineConfig) -> Result<DealRecord> {
        let fragments = Self::validate_fragments(raw, config);
        let draft = Self::reconcile(fragments, config)?;
        RecordAssembler::finalize(draft)
    }

    pub fn process_and_publish(
        raw: &[(SectionKind, Value)],
        config: &PipelineConfig,
        store: &dyn RecordStore,
        deal_id: &str,
        created_at: DateTime<Utc>,
    ) -> Result<DealRecord> {
        store::validate_deal_id(deal_id)?;
        let fragments = Self::validate_fragments(raw, config);
        let draft = Self::reconcile(fragments, config)?;
        RecordAssembler::publish(store, deal_id, draft, created_at)
    }
}

pub fn process_fragments(raw: &[(SectionKind, Value)], config: &PipelineConfig) -> Result<DealRecord> {
    DealRecordProcessor::process(raw, config)
}
