//! Fills periods that are still missing from disclosed accounting identities.
//!
//! Runs on the normalized record, so both sides of an identity are already in
//! millions with their currency glyph resolved. Extracted values are never
//! overridden, and every filled item is tagged `derived` with the identity it used.

use crate::config::PipelineConfig;
use crate::schema::{
    DealRecord, LineItem, MethodTag, Scale, Series, SourceTag, Unit, METRIC_ADJUSTED_EBITDA,
    METRIC_EBITDA, METRIC_FREE_CASH_FLOW, METRIC_GROSS_PROFIT, METRIC_NET_WORKING_CAPITAL,
    METRIC_OPERATING_CASH_FLOW, METRIC_OPERATING_EXPENSES,
};
use log::{debug, info, warn};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

pub struct IdentityResolver {
    enabled: bool,
}

impl IdentityResolver {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            enabled: config.enable_derivations,
        }
    }

    pub fn resolve(&self, mut record: DealRecord) -> DealRecord {
        if !self.enabled {
            debug!("Derivations disabled");
            return record;
        }

        let profit = resolve_profit_identities(&mut record.profit_metrics);

        // One-time cost = Adjusted EBITDA - Reported EBITDA
        let adjusted = metric_or_empty(&record.profit_metrics, METRIC_ADJUSTED_EBITDA);
        let reported = metric_or_empty(&record.profit_metrics, METRIC_EBITDA);
        let bridge = fill_derived(
            &mut record.tale_of_the_tape.one_time_cost,
            paired(&adjusted, &reported, |a, r| a.checked_sub(r)),
            MethodTag::CalculatedFromBridge,
        );

        let ocf = metric_or_empty(&record.profit_metrics, METRIC_OPERATING_CASH_FLOW);

        // FCF = OCF - |CAPEX|
        let fcf = fill_derived(
            &mut record.free_cash_flow.historical,
            paired(&ocf, &record.tale_of_the_tape.capex, |o, c| o.checked_sub(c.abs())),
            MethodTag::OcfMinusCapex,
        );

        // CAPEX = OCF - FCF, only from FCF that was reported directly.
        let reported_fcf = Series::from_items(
            METRIC_FREE_CASH_FLOW,
            record
                .free_cash_flow
                .historical
                .items
                .iter()
                .filter(|item| item.source != SourceTag::Derived && item.method == MethodTag::Direct)
                .cloned(),
        );
        let capex = fill_derived(
            &mut record.tale_of_the_tape.capex,
            paired(&ocf, &reported_fcf, |o, f| o.checked_sub(f)),
            MethodTag::DerivedFromFcf,
        );

        // Change in WC = NWC(N) - NWC(N-1)
        let nwc = metric_or_empty(&record.profit_metrics, METRIC_NET_WORKING_CAPITAL);
        let wc = fill_derived(
            &mut record.tale_of_the_tape.change_in_working_capital,
            year_over_year_change(&nwc),
            MethodTag::CalculatedFromNwc,
        );

        if profit + bridge + fcf + capex + wc > 0 {
            info!(
                "Derived missing periods: {} profit metric, {} one-time cost, {} FCF, {} CAPEX, {} change in WC",
                profit, bridge, fcf, capex, wc
            );
        }
        record
    }
}

/// EBITDA, operating expenses and gross profit from whichever two are present.
/// Operating expenses are reported as a negative cost.
fn resolve_profit_identities(metrics: &mut BTreeMap<String, Series>) -> usize {
    let mut filled = 0;

    // EBITDA = GP - |OpEx|
    let gp = metric_or_empty(metrics, METRIC_GROSS_PROFIT);
    let opex = metric_or_empty(metrics, METRIC_OPERATING_EXPENSES);
    filled += fill_metric(
        metrics,
        METRIC_EBITDA,
        paired(&gp, &opex, |g, o| g.checked_sub(o.abs())),
        MethodTag::EbitdaFromGrossProfit,
    );

    // OpEx = -(GP - EBITDA)
    let ebitda = metric_or_empty(metrics, METRIC_EBITDA);
    filled += fill_metric(
        metrics,
        METRIC_OPERATING_EXPENSES,
        paired(&gp, &ebitda, |g, e| g.checked_sub(e).map(|d| -d)),
        MethodTag::OperatingExpensesFromEbitda,
    );

    // GP = EBITDA + |OpEx|
    let opex = metric_or_empty(metrics, METRIC_OPERATING_EXPENSES);
    filled += fill_metric(
        metrics,
        METRIC_GROSS_PROFIT,
        paired(&ebitda, &opex, |e, o| e.checked_add(o.abs())),
        MethodTag::GrossProfitFromEbitda,
    );

    filled
}

fn metric_or_empty(metrics: &BTreeMap<String, Series>, metric: &str) -> Series {
    metrics
        .get(metric)
        .cloned()
        .unwrap_or_else(|| Series::new(metric))
}

fn fill_metric(
    metrics: &mut BTreeMap<String, Series>,
    metric: &str,
    candidates: Vec<LineItem>,
    method: MethodTag,
) -> usize {
    if candidates.is_empty() {
        return 0;
    }
    let target = metrics
        .entry(metric.to_string())
        .or_insert_with(|| Series::new(metric));
    fill_derived(target, candidates, method)
}

/// The unit two operands share. Scales must match; a currency on one side only is
/// taken as the shared one.
fn shared_unit(left: &Unit, right: &Unit) -> Option<Unit> {
    if left.scale != right.scale || left.scale == Scale::Percent {
        return None;
    }
    let currency = match (&left.currency, &right.currency) {
        (Some(l), Some(r)) if l != r => return None,
        (Some(c), _) | (None, Some(c)) => Some(c.clone()),
        (None, None) => None,
    };
    Some(Unit {
        currency,
        scale: left.scale,
    })
}

/// Applies `op` to every canonical period where both series have a value in a shared unit.
fn paired<F>(left: &Series, right: &Series, op: F) -> Vec<LineItem>
where
    F: Fn(Decimal, Decimal) -> Option<Decimal>,
{
    let mut derived = Vec::new();
    for item in left.items.iter().filter(|i| i.period.is_canonical()) {
        let (Some(lhs), Some(other)) = (item.value, right.get(&item.period)) else {
            continue;
        };
        let Some(rhs) = other.value else {
            continue;
        };
        let Some(unit) = shared_unit(&item.unit, &other.unit) else {
            debug!(
                "Skipping {} derivation for {}: units {} and {} differ",
                left.metric,
                item.period,
                item.unit.label(),
                other.unit.label()
            );
            continue;
        };
        let Some(value) = op(lhs, rhs) else {
            warn!(
                "Skipping {} derivation for {}: result out of range",
                left.metric, item.period
            );
            continue;
        };
        derived.push(
            LineItem::new(item.period.clone(), Some(value), SourceTag::Derived).with_unit(unit),
        );
    }
    derived
}

fn year_over_year_change(series: &Series) -> Vec<LineItem> {
    let points: Vec<&LineItem> = series
        .items
        .iter()
        .filter(|i| i.period.is_canonical() && i.period.quarter.is_none() && i.value.is_some())
        .collect();

    points
        .windows(2)
        .filter_map(|pair| {
            let (prev, curr) = (pair[0], pair[1]);
            let consecutive = match (prev.period.year, curr.period.year) {
                (Some(a), Some(b)) => b == a + 1,
                _ => false,
            };
            if !consecutive {
                return None;
            }
            let unit = shared_unit(&prev.unit, &curr.unit)?;
            let Some(change) = curr.value?.checked_sub(prev.value?) else {
                warn!("Skipping change in WC for {}: result out of range", curr.period);
                return None;
            };
            Some(LineItem::new(curr.period.clone(), Some(change), SourceTag::Derived).with_unit(unit))
        })
        .collect()
}

fn fill_derived(target: &mut Series, candidates: Vec<LineItem>, method: MethodTag) -> usize {
    candidates
        .into_iter()
        .map(|item| item.with_method(method.clone()))
        .filter(|item| target.fill_missing(item.clone()))
        .count()
}
