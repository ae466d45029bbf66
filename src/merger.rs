use crate::fragment::{Fragment, SectionKind};
use crate::schema::{
    DealRecord, Series, METRIC_CAPEX, METRIC_FREE_CASH_FLOW, METRIC_ONE_TIME_COST,
    METRIC_REVENUE, METRIC_WORKING_CAPITAL, SUPPORTING_METRICS,
};
use log::{debug, info, warn};

/// Combines one general fragment and any dedicated fragments into a draft record.
pub struct SectionMerger;

impl SectionMerger {
    pub fn merge(fragments: Vec<Fragment>) -> DealRecord {
        let mut record = DealRecord::default();

        let mut general: Option<Fragment> = None;
        let mut dedicated: Vec<Fragment> = Vec::new();
        for fragment in fragments {
            match fragment.kind {
                SectionKind::General if general.is_none() => general = Some(fragment),
                SectionKind::General => warn!("Ignoring additional general fragment"),
                kind if dedicated.iter().any(|f| f.kind == kind) => {
                    warn!("Ignoring additional {} fragment", kind)
                }
                _ => dedicated.push(fragment),
            }
        }
        dedicated.sort_by_key(|f| f.kind);

        match general {
            Some(general) => apply_general(&mut record, general),
            None => warn!("No general fragment; header and narrative sections stay empty"),
        }

        for fragment in &dedicated {
            let Some(metric) = fragment.kind.covered_metric() else {
                continue;
            };
            if fragment.covers(metric) {
                if let Some(series) = fragment.metric(metric) {
                    let replaced = slot(&mut record, metric).len();
                    info!(
                        "Dedicated {} pass supersedes general {} ({} items replace {})",
                        fragment.kind,
                        metric,
                        series.len(),
                        replaced
                    );
                    *slot(&mut record, metric) = series.clone();
                }
            } else {
                warn!(
                    "Dedicated {} pass supplied no {} items; falling back to general extraction",
                    fragment.kind, metric
                );
            }
        }

        // A dedicated pass contributes its own metric plus the supporting balances.
        // Anything else it returned belongs to another pass and is dropped.
        for fragment in &dedicated {
            for (metric, series) in &fragment.metrics {
                if fragment.kind.covered_metric() == Some(metric.as_str()) {
                    continue;
                }
                if !SUPPORTING_METRICS.contains(&metric.as_str()) {
                    debug!(
                        "Ignoring {} items from the {} pass: not owned by it",
                        metric, fragment.kind
                    );
                    continue;
                }
                let target = slot(&mut record, metric);
                let filled = series
                    .items
                    .iter()
                    .filter(|item| target.fill_missing((*item).clone()))
                    .count();
                if filled > 0 {
                    debug!(
                        "{} pass filled {} missing {} periods",
                        fragment.kind, filled, metric
                    );
                }
            }
        }

        record
    }
}

fn apply_general(record: &mut DealRecord, general: Fragment) {
    record.header = general.header;
    record.summary.description = general.description;
    record.summary.source_context = general.source_context;
    record.summary.confidence = general.confidence;
    record.summary.recommendation = general.recommendation;
    if let Some(risk) = general.risk_analysis {
        record.risk_analysis = risk;
    }
    if let Some(market) = general.market_intelligence {
        record.market_intelligence = market;
    }

    for (metric, series) in general.metrics {
        let target = slot(record, &metric);
        if target.is_empty() {
            *target = series;
        } else {
            for item in series.items {
                target.insert(item);
            }
        }
    }
}

/// The series in the record a metric lands in.
fn slot<'a>(record: &'a mut DealRecord, metric: &str) -> &'a mut Series {
    match metric {
        METRIC_REVENUE => &mut record.revenue,
        METRIC_CAPEX => &mut record.tale_of_the_tape.capex,
        METRIC_WORKING_CAPITAL => &mut record.tale_of_the_tape.change_in_working_capital,
        METRIC_ONE_TIME_COST => &mut record.tale_of_the_tape.one_time_cost,
        METRIC_FREE_CASH_FLOW => &mut record.free_cash_flow.historical,
        other => record
            .profit_metrics
            .entry(other.to_string())
            .or_insert_with(|| Series::new(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::period::PeriodKey;
    use crate::schema::SourceTag;
    use crate::validator::validate_fragment;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};

    fn fragment(raw: Value, kind: SectionKind) -> Fragment {
        validate_fragment(&raw, kind, &PipelineConfig::default()).unwrap()
    }

    fn merge(fragments: Vec<Fragment>) -> DealRecord {
        SectionMerger::merge(fragments)
    }

    #[test]
    fn test_dedicated_capex_supersedes_general() {
        let general = fragment(
            json!({"tale_of_the_tape": {"capex": {"year_wise": {"2023": "50", "2022": "45"}}}}),
            SectionKind::General,
        );
        let capex = fragment(
            json!({"tale_of_the_tape": {"capex": {"year_wise": {"2023": "55"}}}}),
            SectionKind::Capex,
        );

        let record = merge(vec![general, capex]);
        let series = &record.tale_of_the_tape.capex;
        assert_eq!(series.len(), 1);
        let item = series.get(&PeriodKey::year(2023)).unwrap();
        assert_eq!(item.value, Some(dec!(55)));
        assert_eq!(item.source, SourceTag::DedicatedCapex);
    }

    #[test]
    fn test_dedicated_null_values_still_supersede() {
        let general = fragment(json!({"capex": {"2023": "50"}}), SectionKind::General);
        let capex = fragment(json!({"capex": {"2023": "-"}}), SectionKind::Capex);

        let record = merge(vec![general, capex]);
        let item = record
            .tale_of_the_tape
            .capex
            .get(&PeriodKey::year(2023))
            .unwrap();
        assert_eq!(item.value, None);
        assert_eq!(item.source, SourceTag::DedicatedCapex);
    }

    #[test]
    fn test_empty_dedicated_fragment_falls_back_to_general() {
        let general = fragment(json!({"capex": {"2023": "50"}}), SectionKind::General);
        let capex = fragment(json!({"capex": {}}), SectionKind::Capex);

        let record = merge(vec![general, capex]);
        let item = record
            .tale_of_the_tape
            .capex
            .get(&PeriodKey::year(2023))
            .unwrap();
        assert_eq!(item.value, Some(dec!(50)));
        assert_eq!(item.source, SourceTag::GeneralExtraction);
    }

    #[test]
    fn test_dedicated_pass_cannot_write_into_another_pass_slot() {
        let capex = fragment(
            json!({"tale_of_the_tape": {"capex": {"year_wise": {"2023": "55"}}}}),
            SectionKind::Capex,
        );
        let fcf = fragment(
            json!({
                "free_cash_flow": {"historical": {"2023": "20"}},
                "capex": {"2021": "9"},
                "revenue": {"2023": "400"}
            }),
            SectionKind::FreeCashFlow,
        );

        let record = merge(vec![fcf, capex]);
        let series = &record.tale_of_the_tape.capex;
        assert_eq!(series.len(), 1);
        assert_eq!(series.items[0].value, Some(dec!(55)));
        assert!(series.items.iter().all(|i| i.source == SourceTag::DedicatedCapex));
        assert!(record.revenue.is_empty());
    }

    #[test]
    fn test_supporting_balances_fill_missing_periods_only() {
        let general = fragment(
            json!({"profit_metrics": {"operating_cash_flow": {"2023": "30"}}}),
            SectionKind::General,
        );
        let fcf = fragment(
            json!({
                "free_cash_flow": {"historical": {"2023": "20"}},
                "operating_cash_flow": {"2022": "25", "2023": "99"}
            }),
            SectionKind::FreeCashFlow,
        );

        let record = merge(vec![general, fcf]);
        let ocf = record.profit_metric("operating_cash_flow").unwrap();
        assert_eq!(ocf.value_at(&PeriodKey::year(2022)), Some(dec!(25)));
        assert_eq!(ocf.value_at(&PeriodKey::year(2023)), Some(dec!(30)));
    }

    #[test]
    fn test_general_fcf_locations_are_combined() {
        let general = fragment(
            json!({
                "free_cash_flow": {"historical": {"2022": "8"}},
                "profit_metrics": {"free_cash_flow": [{"period": "2023", "value": "9"}]}
            }),
            SectionKind::General,
        );
        let record = merge(vec![general]);
        assert_eq!(record.free_cash_flow.historical.len(), 2);
        assert!(!record.profit_metrics.contains_key("free_cash_flow"));
    }

    #[test]
    fn test_no_dedicated_fragments_keeps_general_values() {
        let general = fragment(
            json!({
                "company_name": "Acme",
                "tale_of_the_tape": {"capex": {"year_wise": {"2023": "50"}}}
            }),
            SectionKind::General,
        );
        let record = merge(vec![general]);
        let item = record
            .tale_of_the_tape
            .capex
            .get(&PeriodKey::year(2023))
            .unwrap();
        assert_eq!(item.value, Some(dec!(50)));
        assert_eq!(item.source, SourceTag::GeneralExtraction);
        assert_eq!(record.header.company_name.as_deref(), Some("Acme"));
    }
}
