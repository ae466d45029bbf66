//! Reconciles fragment files produced elsewhere into one deal record.
//!
//! Usage: cargo run --example reconcile_fragments -- general.json [capex.json] [working_capital.json] [free_cash_flow.json]
//!
//! Each file's section is taken from its name; anything unrecognised is treated as the
//! general pass.

use deal_record_builder::{process_fragments, PipelineConfig, SectionKind};
use std::error::Error;
use std::path::Path;

fn section_for(path: &Path) -> SectionKind {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_lowercase();
    SectionKind::dedicated()
        .into_iter()
        .find(|kind| stem.contains(kind.as_str()))
        .unwrap_or(SectionKind::General)
}

fn main() -> Result<(), Box<dyn Error>> {
    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        return Err("pass at least one fragment JSON file".into());
    }

    let mut raw = Vec::new();
    for path in &paths {
        let path = Path::new(path);
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let section = section_for(path);
        println!("📄 {} -> {} pass", path.display(), section);
        raw.push((section, value));
    }

    let record = process_fragments(&raw, &PipelineConfig::default())?;

    println!(
        "✅ {} ({}): {} revenue periods, forecast {}",
        record.header.company_name.as_deref().unwrap_or("-"),
        record.header.currency.as_deref().unwrap_or("-"),
        record.summary.revenue_periods,
        if record.summary.fcf_forecast_available {
            "available"
        } else {
            "not available"
        }
    );
    for item in &record.free_cash_flow.forecast.series.items {
        println!("   {:>6}  {}", item.period.label(), item.display_value());
    }

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
