use crate::error::{DealRecordError, Result};
use crate::schema::{
    DealRecord, ForecastSection, ForecastStatus, Series, METRIC_FREE_CASH_FLOW,
    STANDARD_PROFIT_METRICS,
};
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use log::{info, warn};

/// Final stage: completes the record's shape, checks the required fields and hands
/// the result to persistence.
pub struct RecordAssembler;

impl RecordAssembler {
    /// Fills summary fields and empty sections. Fails when the record lacks a company
    /// name, a currency, or any revenue value.
    pub fn finalize(mut record: DealRecord) -> Result<DealRecord> {
        let missing = missing_required_fields(&record);
        if !missing.is_empty() {
            warn!("Record incomplete, not persisting: missing {}", missing.join(", "));
            return Err(DealRecordError::IncompleteRecord { missing });
        }

        for metric in STANDARD_PROFIT_METRICS {
            record
                .profit_metrics
                .entry(metric.to_string())
                .or_insert_with(|| Series::new(metric));
        }

        if record.free_cash_flow.forecast.status == ForecastStatus::Pending {
            record.free_cash_flow.forecast =
                ForecastSection::not_available(METRIC_FREE_CASH_FLOW, "forecast was not computed");
        }

        fill_summary(&mut record);
        Ok(record)
    }

    /// Finalizes and persists. Nothing is written when finalization fails.
    pub fn publish(
        store: &dyn RecordStore,
        deal_id: &str,
        record: DealRecord,
        created_at: DateTime<Utc>,
    ) -> Result<DealRecord> {
        let record = Self::finalize(record)?;
        store.save(deal_id, &record, created_at)?;
        info!(
            "Published deal {} ({} revenue periods, forecast {})",
            deal_id,
            record.summary.revenue_periods,
            if record.summary.fcf_forecast_available {
                "available"
            } else {
                "not available"
            }
        );
        Ok(record)
    }
}

pub fn missing_required_fields(record: &DealRecord) -> Vec<String> {
    let mut missing = Vec::new();
    if is_blank(record.header.company_name.as_deref()) {
        missing.push("header.company_name".to_string());
    }
    if is_blank(record.header.currency.as_deref()) {
        missing.push("header.currency".to_string());
    }
    if !record.revenue.has_values() {
        missing.push("revenue".to_string());
    }
    missing
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

fn fill_summary(record: &mut DealRecord) {
    let latest_actual = record
        .revenue
        .items
        .iter()
        .rev()
        .find(|i| i.value.is_some() && i.period.is_canonical() && !i.is_estimate())
        .or_else(|| record.revenue.latest())
        .cloned();

    let revenue_periods = record.revenue.values().count();

    let forecast = &record.free_cash_flow.forecast;
    let fcf_base_year = forecast.parameters.as_ref().map(|p| p.base_year.clone());
    let fcf_forecast_available = forecast.is_available();

    let mut sections_not_available = Vec::new();
    if !record.revenue.has_values() {
        sections_not_available.push("revenue".to_string());
    }
    for (name, series) in &record.profit_metrics {
        if !series.has_values() {
            sections_not_available.push(format!("profitMetrics.{}", name));
        }
    }
    let tale = &record.tale_of_the_tape;
    for (name, series) in [
        ("capex", &tale.capex),
        ("change_in_working_capital", &tale.change_in_working_capital),
        ("one_time_cost", &tale.one_time_cost),
    ] {
        if !series.has_values() {
            sections_not_available.push(format!("tale_of_the_tape.{}", name));
        }
    }
    if !record.free_cash_flow.historical.has_values() {
        sections_not_available.push("free_cash_flow.historical".to_string());
    }
    if !fcf_forecast_available {
        sections_not_available.push("free_cash_flow.forecast".to_string());
    }

    let flagged_items: usize = record
        .series()
        .iter()
        .map(|s| s.items.iter().filter(|i| !i.flags.is_empty()).count())
        .sum();

    let summary = &mut record.summary;
    summary.latest_revenue = latest_actual;
    summary.revenue_periods = revenue_periods;
    summary.fcf_base_year = fcf_base_year;
    summary.fcf_forecast_available = fcf_forecast_available;
    summary.sections_not_available = sections_not_available;
    summary.flagged_items = flagged_items;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::PeriodKey;
    use crate::schema::{LineItem, SourceTag};
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    fn complete_record() -> DealRecord {
        let mut record = DealRecord::default();
        record.header.company_name = Some("Acme".to_string());
        record.header.currency = Some("USD".to_string());
        record.revenue = Series::from_items(
            "revenue",
            vec![
                LineItem::new(PeriodKey::year(2023), Some(dec!(100)), SourceTag::GeneralExtraction),
                LineItem::new(PeriodKey::estimate(2024), Some(dec!(120)), SourceTag::GeneralExtraction),
            ],
        );
        record
    }

    #[test]
    fn test_finalize_fills_shape_and_summary() {
        let record = RecordAssembler::finalize(complete_record()).unwrap();

        for metric in STANDARD_PROFIT_METRICS {
            assert!(record.profit_metrics.contains_key(metric), "{} missing", metric);
        }
        assert_eq!(record.summary.revenue_periods, 2);
        let latest = record.summary.latest_revenue.unwrap();
        assert_eq!(latest.period.year, Some(2023));
        assert!(!record.summary.fcf_forecast_available);
        assert!(record
            .summary
            .sections_not_available
            .contains(&"tale_of_the_tape.capex".to_string()));
        assert!(matches!(
            record.free_cash_flow.forecast.status,
            ForecastStatus::NotAvailable { .. }
        ));
    }

    #[test]
    fn test_missing_fields_are_listed() {
        let mut record = complete_record();
        record.header.company_name = Some("  ".to_string());
        record.revenue = Series::from_items(
            "revenue",
            vec![LineItem::new(PeriodKey::year(2023), None, SourceTag::GeneralExtraction)],
        );

        match RecordAssembler::finalize(record) {
            Err(DealRecordError::IncompleteRecord { missing }) => {
                assert_eq!(missing, vec!["header.company_name", "revenue"]);
            }
            other => panic!("expected IncompleteRecord, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_incomplete_record_is_not_persisted() {
        let store = MemoryStore::new();
        let mut record = complete_record();
        record.header.currency = None;

        let result = RecordAssembler::publish(&store, "deal", record, Utc::now());
        assert!(matches!(result, Err(DealRecordError::IncompleteRecord { .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn test_publish_persists_finalized_record() {
        let store = MemoryStore::new();
        let published =
            RecordAssembler::publish(&store, "deal", complete_record(), Utc::now()).unwrap();
        let loaded = store.load("deal").unwrap();
        assert_eq!(loaded.record, published);
    }
}
