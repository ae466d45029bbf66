//! Runs the full extraction pipeline against a plain-text deal document.
//!
//! Usage: cargo run --example extract_deal --features llm -- <deal_id> <document.txt> [deal_value]
//!
//! Needs `LLM_API_KEY` (or `OPENAI_API_KEY`); `LLM_MODEL` and `LLM_BASE_URL` are optional.

use chrono::Utc;
use deal_record_builder::llm::{LlmClient, LlmConfig, LlmFieldExtractor};
use deal_record_builder::{
    DealPipeline, JsonFileStore, PipelineConfig, PlainTextExtractor, TextExtractor,
};
use dotenv::dotenv;
use std::error::Error;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    let mut args = std::env::args().skip(1);
    let (Some(deal_id), Some(path)) = (args.next(), args.next()) else {
        return Err("usage: extract_deal <deal_id> <document.txt> [deal_value]".into());
    };
    let deal_value = args.next();

    let config = match std::env::var("DEAL_PIPELINE_CONFIG") {
        Ok(config_path) => PipelineConfig::from_path(&config_path)?,
        Err(_) => PipelineConfig::default(),
    };

    let bytes = std::fs::read(&path)?;
    let text = PlainTextExtractor.extract_text(&bytes, &path).await?;
    println!("📄 Read {} characters from {}", text.len(), path);

    let llm_config = LlmConfig::from_env()?;
    println!("🤖 Using {} at {}", llm_config.model, llm_config.base_url);
    let extractor = Arc::new(LlmFieldExtractor::new(LlmClient::new(llm_config)));
    let store = Arc::new(JsonFileStore::new("deal_records")?);

    let pipeline = DealPipeline::new(extractor, store, config)?;
    let record = pipeline
        .run(&deal_id, &text, deal_value.as_deref(), Utc::now())
        .await?;

    println!(
        "✅ Saved {} with {} flagged items",
        record.header.company_name.as_deref().unwrap_or(&deal_id),
        record.summary.flagged_items
    );
    if !record.summary.sections_not_available.is_empty() {
        println!("⚠️  Not available: {}", record.summary.sections_not_available.join(", "));
    }
    Ok(())
}
