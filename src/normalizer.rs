use crate::config::PipelineConfig;
use crate::currency::{code_for_symbol, detect_symbol, resolve_symbol};
use crate::schema::{DealRecord, Header, ItemFlag, Scale, Series, Unit};
use crate::utils::{detect_scale, is_per_share_metric, is_percentage_metric};
use log::{debug, info, warn};
use rust_decimal::Decimal;

/// Rewrites periods, units, currency glyphs and CAPEX signs into one convention.
/// Running it twice yields the same record.
pub struct Normalizer {
    plausibility_ratio: Decimal,
}

impl Normalizer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            plausibility_ratio: config.plausibility_ratio,
        }
    }

    pub fn normalize(&self, mut record: DealRecord) -> DealRecord {
        normalize_header(&mut record.header);
        let header_glyph = record.header.currency_symbol.clone();

        for series in record.series_mut() {
            canonicalize_periods(series);
            self.normalize_units(series, header_glyph.as_deref());
        }
        normalize_capex_signs(&mut record.tale_of_the_tape.capex);

        let flagged: usize = record
            .series()
            .iter()
            .map(|s| s.items.iter().filter(|i| !i.flags.is_empty()).count())
            .sum();
        info!("Normalized record: {} items carry flags", flagged);
        record
    }

    fn normalize_units(&self, series: &mut Series, header_glyph: Option<&str>) {
        if is_percentage_metric(&series.metric) {
            for item in &mut series.items {
                item.unit = Unit::percent();
            }
            return;
        }

        for item in &mut series.items {
            let text = item.original_text.as_deref().unwrap_or_default();
            if item.unit.scale == Scale::Unlabeled {
                item.unit.scale = detect_scale(text);
            }
            if item.unit.currency.is_none() {
                item.unit.currency = detect_symbol(text);
            }
        }

        if !is_per_share_metric(&series.metric) {
            rescale_to_millions(series);
            self.promote_unlabeled(series);
        }

        for item in &mut series.items {
            if item.unit.scale == Scale::Percent {
                continue;
            }
            match (&item.unit.currency, header_glyph) {
                (None, Some(glyph)) => item.unit.currency = Some(glyph.to_string()),
                (Some(own), Some(glyph)) if own != glyph => {
                    debug!(
                        "{} {}: currency {} differs from header {}",
                        series.metric, item.period, own, glyph
                    );
                    item.flag(ItemFlag::CurrencyMismatch);
                }
                _ => {}
            }
        }
    }

    /// Promotes unlabeled values to millions when an explicitly-millions sibling has a
    /// comparable magnitude. Promoted items never act as siblings themselves.
    fn promote_unlabeled(&self, series: &mut Series) {
        let anchors: Vec<Decimal> = series
            .items
            .iter()
            .filter(|i| i.unit.scale == Scale::Millions && !i.has_flag(ItemFlag::UnitInferred))
            .filter_map(|i| i.value)
            .filter(|v| !v.is_zero())
            .map(|v| v.abs())
            .collect();
        if anchors.is_empty() {
            return;
        }

        let ratio = self.plausibility_ratio;
        let mut promoted = 0;
        for item in &mut series.items {
            if item.unit.scale != Scale::Unlabeled {
                continue;
            }
            let Some(value) = item.value else {
                continue;
            };
            let magnitude = value.abs();
            let plausible = magnitude.is_zero()
                || anchors.iter().any(|anchor| {
                    let (high, low) = if magnitude > *anchor {
                        (magnitude, *anchor)
                    } else {
                        (*anchor, magnitude)
                    };
                    low.checked_mul(ratio).map_or(true, |limit| high <= limit)
                });
            if plausible {
                item.unit.scale = Scale::Millions;
                item.flag(ItemFlag::UnitInferred);
                promoted += 1;
            }
        }
        if promoted > 0 {
            debug!("{}: {} unlabeled values read as millions", series.metric, promoted);
        }
    }
}

/// Resolves the header's currency code and glyph from whichever of the two is present.
pub fn normalize_header(header: &mut Header) {
    if let Some(currency) = header.currency.take() {
        let trimmed = currency.trim().to_string();
        let code = match code_for_symbol(&trimmed) {
            Some(code) if trimmed.chars().any(|c| !c.is_ascii_alphabetic()) => code.to_string(),
            _ if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) => {
                trimmed.to_uppercase()
            }
            _ => trimmed,
        };
        header.currency_symbol = Some(resolve_symbol(&code));
        header.currency = Some(code);
    } else if let Some(symbol) = header.currency_symbol.as_deref() {
        header.currency = code_for_symbol(symbol).map(str::to_string);
    }
}

/// Re-derives every period from its original label and restores sort order.
pub fn canonicalize_periods(series: &mut Series) {
    let items = std::mem::take(&mut series.items);
    let mut rebuilt = Series::new(series.metric.clone());
    for mut item in items {
        let forced_estimate = item.period.is_estimate;
        item.period = item.period.canonicalize();
        item.period.is_estimate |= forced_estimate;
        if !item.period.is_canonical() {
            item.flag(ItemFlag::NonCanonicalPeriod);
        }
        rebuilt.insert(item);
    }
    series.items = rebuilt.items;
}

fn rescale_to_millions(series: &mut Series) {
    for item in &mut series.items {
        let Some(factor) = item.unit.scale.to_millions_factor() else {
            continue;
        };
        if item.unit.scale == Scale::Millions {
            continue;
        }
        if let Some(value) = item.value {
            item.value = value.checked_mul(factor).map(|v| v.normalize());
            if item.value.is_none() {
                warn!(
                    "{} {}: {} is out of range in millions, dropping the value",
                    series.metric,
                    item.period,
                    item.original_text.as_deref().unwrap_or_default()
                );
            }
        }
        item.unit.scale = Scale::Millions;
    }
}

/// CAPEX is reported as a magnitude when the source consistently shows outflows as
/// negatives. Mixed signs are left alone and flagged.
pub fn normalize_capex_signs(series: &mut Series) {
    let values: Vec<Decimal> = series.items.iter().filter_map(|i| i.value).collect();
    let has_negative = values.iter().any(|v| v.is_sign_negative() && !v.is_zero());
    let has_positive = values.iter().any(|v| v.is_sign_positive() && !v.is_zero());

    match (has_negative, has_positive) {
        (true, false) => {
            for item in series.items.iter_mut().filter(|i| i.value.is_some()) {
                item.value = item.value.map(|v| v.abs());
                item.flag(ItemFlag::SignNormalized);
            }
            debug!("{}: outflow signs converted to magnitudes", series.metric);
        }
        (true, true) => {
            for item in series.items.iter_mut().filter(|i| i.value.is_some()) {
                item.flag(ItemFlag::AmbiguousSign);
            }
            debug!("{}: mixed signs left as reported", series.metric);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::PeriodKey;
    use crate::schema::{LineItem, SourceTag};
    use rust_decimal_macros::dec;

    fn item(label: &str, text: &str, value: Decimal) -> LineItem {
        let mut li = LineItem::new(PeriodKey::parse(label), Some(value), SourceTag::GeneralExtraction);
        li.original_text = Some(text.to_string());
        li
    }

    fn normalizer() -> Normalizer {
        Normalizer::new(&PipelineConfig::default())
    }

    fn usd_record() -> DealRecord {
        let mut record = DealRecord::default();
        record.header.company_name = Some("Acme".to_string());
        record.header.currency = Some("USD".to_string());
        record
    }

    #[test]
    fn test_header_currency_resolution() {
        let mut header = Header {
            currency: Some("eur".to_string()),
            ..Header::default()
        };
        normalize_header(&mut header);
        assert_eq!(header.currency.as_deref(), Some("EUR"));
        assert_eq!(header.currency_symbol.as_deref(), Some("€"));

        let mut glyph_only = Header {
            currency: Some("£".to_string()),
            ..Header::default()
        };
        normalize_header(&mut glyph_only);
        assert_eq!(glyph_only.currency.as_deref(), Some("GBP"));
        assert_eq!(glyph_only.currency_symbol.as_deref(), Some("£"));

        let mut unknown = Header {
            currency: Some("Zorkmids".to_string()),
            ..Header::default()
        };
        normalize_header(&mut unknown);
        assert_eq!(unknown.currency_symbol.as_deref(), Some("Zorkmids"));
    }

    #[test]
    fn test_units_move_out_of_text_and_rescale() {
        let mut record = usd_record();
        record.revenue = Series::from_items(
            "revenue",
            vec![
                item("FY22", "$950k", dec!(950)),
                item("FY23", "$1.2bn", dec!(1.2)),
                item("FY24", "1,300 million", dec!(1300)),
            ],
        );

        let record = normalizer().normalize(record);
        let values: Vec<Option<Decimal>> = record.revenue.items.iter().map(|i| i.value).collect();
        assert_eq!(values, vec![Some(dec!(0.95)), Some(dec!(1200)), Some(dec!(1300))]);
        for li in &record.revenue.items {
            assert_eq!(li.unit, Unit::millions(Some("$".to_string())));
            assert!(!li.has_flag(ItemFlag::CurrencyMismatch));
        }
    }

    #[test]
    fn test_unlabeled_values_promoted_only_when_plausible() {
        let mut record = usd_record();
        record.profit_metrics.insert(
            "ebitda".to_string(),
            Series::from_items(
                "ebitda",
                vec![
                    item("2022", "14", dec!(14)),
                    item("2023", "$15M", dec!(15)),
                    item("2024", "16000000", dec!(16000000)),
                ],
            ),
        );

        let record = normalizer().normalize(record);
        let ebitda = record.profit_metric("ebitda").unwrap();
        let fy22 = ebitda.get(&PeriodKey::year(2022)).unwrap();
        assert_eq!(fy22.unit.scale, Scale::Millions);
        assert!(fy22.has_flag(ItemFlag::UnitInferred));

        let fy24 = ebitda.get(&PeriodKey::year(2024)).unwrap();
        assert_eq!(fy24.unit.scale, Scale::Unlabeled);
        assert_eq!(fy24.value, Some(dec!(16000000)));
    }

    #[test]
    fn test_percentage_metrics_are_never_rescaled() {
        let mut record = usd_record();
        record.profit_metrics.insert(
            "ebitda_margin_percent".to_string(),
            Series::from_items("ebitda_margin_percent", vec![item("2023", "21.5%", dec!(21.5))]),
        );
        let record = normalizer().normalize(record);
        let margin = &record.profit_metric("ebitda_margin_percent").unwrap().items[0];
        assert_eq!(margin.value, Some(dec!(21.5)));
        assert_eq!(margin.unit, Unit::percent());
    }

    #[test]
    fn test_currency_mismatch_is_flagged_not_converted() {
        let mut record = usd_record();
        record.revenue = Series::from_items("revenue", vec![item("2023", "€40m", dec!(40))]);
        let record = normalizer().normalize(record);
        let li = &record.revenue.items[0];
        assert_eq!(li.value, Some(dec!(40)));
        assert_eq!(li.unit.currency.as_deref(), Some("€"));
        assert!(li.has_flag(ItemFlag::CurrencyMismatch));
    }

    #[test]
    fn test_capex_signs() {
        let mut negative = Series::from_items(
            "capex",
            vec![item("2022", "(5)", dec!(-5)), item("2023", "-7", dec!(-7))],
        );
        normalize_capex_signs(&mut negative);
        assert_eq!(negative.items[0].value, Some(dec!(5)));
        assert!(negative.items[1].has_flag(ItemFlag::SignNormalized));

        let mut mixed = Series::from_items(
            "capex",
            vec![item("2022", "5", dec!(5)), item("2023", "-7", dec!(-7))],
        );
        normalize_capex_signs(&mut mixed);
        assert_eq!(mixed.items[1].value, Some(dec!(-7)));
        assert!(mixed.items[0].has_flag(ItemFlag::AmbiguousSign));
    }

    #[test]
    fn test_one_time_cost_and_working_capital_signs_are_verbatim() {
        let mut record = usd_record();
        record.tale_of_the_tape.one_time_cost =
            Series::from_items("one_time_cost", vec![item("2023", "-2", dec!(-2))]);
        record.tale_of_the_tape.change_in_working_capital =
            Series::from_items("change_in_working_capital", vec![item("2023", "-3", dec!(-3))]);
        let record = normalizer().normalize(record);
        assert_eq!(record.tale_of_the_tape.one_time_cost.items[0].value, Some(dec!(-2)));
        assert_eq!(
            record.tale_of_the_tape.change_in_working_capital.items[0].value,
            Some(dec!(-3))
        );
    }

    #[test]
    fn test_period_collisions_resolved_after_canonicalization() {
        let mut series = Series::new("revenue");
        // Bypass insert so both labels survive until canonicalization.
        series.items.push(item("FY2023", "10", dec!(10)));
        series.items.push(item("Q1 2023", "2", dec!(2)));
        series.items.push(item("2023A", "11", dec!(11)));
        canonicalize_periods(&mut series);
        assert_eq!(series.len(), 2);
        let fy = series.get(&PeriodKey::year(2023)).unwrap();
        assert_eq!(fy.value, Some(dec!(10)));
        assert!(fy.has_flag(ItemFlag::DuplicatePeriod));
        assert_eq!(series.items[0].period.quarter, Some(1));
    }

    #[test]
    fn test_out_of_range_rescale_drops_value() {
        let mut record = usd_record();
        record.profit_metrics.insert(
            "ebitda".to_string(),
            Series::from_items(
                "ebitda",
                vec![
                    item(
                        "2022",
                        "70000000000000000000000000000bn",
                        dec!(70000000000000000000000000000),
                    ),
                    item("2023", "$15M", dec!(15)),
                ],
            ),
        );

        let record = normalizer().normalize(record);
        let ebitda = record.profit_metric("ebitda").unwrap();
        let fy22 = ebitda.get(&PeriodKey::year(2022)).unwrap();
        assert_eq!(fy22.value, None);
        assert_eq!(fy22.unit.scale, Scale::Millions);
        assert_eq!(ebitda.value_at(&PeriodKey::year(2023)), Some(dec!(15)));
    }

    #[test]
    fn test_huge_anchor_ratio_does_not_overflow() {
        let mut record = usd_record();
        record.revenue = Series::from_items(
            "revenue",
            vec![
                item("2022", "$70000000000000000000000000000M", dec!(70000000000000000000000000000)),
                item("2023", "75000000000000000000000000000", dec!(75000000000000000000000000000)),
            ],
        );
        let record = normalizer().normalize(record);
        let fy23 = record.revenue.get(&PeriodKey::year(2023)).unwrap();
        assert_eq!(fy23.unit.scale, Scale::Millions);
        assert!(fy23.has_flag(ItemFlag::UnitInferred));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let mut record = usd_record();
        record.revenue = Series::from_items(
            "revenue",
            vec![
                item("FY22", "90", dec!(90)),
                item("FY23", "$100M", dec!(100)),
                item("Budget", "120", dec!(120)),
            ],
        );
        record.tale_of_the_tape.capex = Series::from_items(
            "capex",
            vec![item("2022", "(5)", dec!(-5)), item("2023", "(6)", dec!(-6))],
        );

        let once = normalizer().normalize(record);
        let twice = normalizer().normalize(once.clone());
        assert_eq!(once, twice);
    }
}
