//! Deterministic free cash flow projection.
//!
//! Growth is taken from the reported history only: a three-point CAGR when enough
//! history exists, the last period-over-period change otherwise. No randomness and no
//! clock are involved, so the same history always yields the same forecast.

use crate::config::PipelineConfig;
use crate::period::PeriodKey;
use crate::schema::{
    DealRecord, ForecastParameters, ForecastSection, ForecastStatus, LineItem, MethodTag, Series,
    SourceTag,
};
use crate::utils::format_percent;
use log::{debug, info};
use rust_decimal::{Decimal, MathematicalOps};

const GROWTH_DP: u32 = 6;
const VALUE_DP: u32 = 4;
const CAGR_WINDOW: usize = 3;

pub struct ForecastEngine {
    horizon: u32,
}

impl ForecastEngine {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            horizon: config.forecast_horizon,
        }
    }

    pub fn with_horizon(horizon: u32) -> Self {
        Self { horizon }
    }

    /// Attaches the projection of the record's historical free cash flow.
    pub fn apply(&self, mut record: DealRecord) -> DealRecord {
        record.free_cash_flow.forecast = self.project(&record.free_cash_flow.historical);
        record
    }

    pub fn project(&self, historical: &Series) -> ForecastSection {
        let metric = historical.metric.as_str();
        let points = historical.historical_values();

        if points.len() < 2 {
            let reason = format!(
                "at least two historical periods with values are required, found {}",
                points.len()
            );
            info!("Forecast not available for {}: {}", metric, reason);
            return ForecastSection::not_available(metric, reason);
        }

        let (growth, methodology) = match select_growth(&points) {
            Ok(selected) => selected,
            Err(reason) => {
                info!("Forecast not available for {}: {}", metric, reason);
                return ForecastSection::not_available(metric, reason);
            }
        };
        let growth = growth.round_dp(GROWTH_DP);

        let (base_year, base_value) = points[points.len() - 1];
        let base_item = historical.get(&PeriodKey::year(base_year));
        let base_period = base_item
            .map(|item| item.period.clone())
            .unwrap_or_else(|| PeriodKey::year(base_year));
        let unit = base_item.map(|item| item.unit.clone()).unwrap_or_default();

        let Some(factor) = Decimal::ONE.checked_add(growth) else {
            let reason = "growth factor is out of range".to_string();
            info!("Forecast not available for {}: {}", metric, reason);
            return ForecastSection::not_available(metric, reason);
        };
        let mut series = Series::new(metric);
        let mut value = base_value;
        for step in 1..=self.horizon {
            let Some(next) = value.checked_mul(factor) else {
                let reason = format!("projection overflows after {} periods", step - 1);
                info!("Forecast not available for {}: {}", metric, reason);
                return ForecastSection::not_available(metric, reason);
            };
            value = next;
            let year = base_year + step as i32;
            series.insert(
                LineItem::new(
                    PeriodKey::estimate(year),
                    Some(value.round_dp(VALUE_DP).normalize()),
                    SourceTag::Forecast,
                )
                .with_unit(unit.clone())
                .with_method(methodology.clone()),
            );
        }

        info!(
            "Projected {} for {} periods from {} at {} ({})",
            metric,
            self.horizon,
            base_period,
            format_percent(growth),
            methodology
        );

        ForecastSection {
            status: ForecastStatus::Available,
            parameters: Some(ForecastParameters {
                base_year: base_period,
                growth_rate: growth,
                horizon: self.horizon,
                methodology,
            }),
            series,
        }
    }
}

/// Picks the growth rate and names how it was obtained. `points` is sorted by year
/// and holds at least two entries.
fn select_growth(points: &[(i32, Decimal)]) -> Result<(Decimal, MethodTag), String> {
    if points.len() < CAGR_WINDOW {
        let [(_, prev), (_, curr)] = [points[points.len() - 2], points[points.len() - 1]];
        let growth = period_over_period(prev, curr)?;
        let methodology = if prev <= Decimal::ZERO || curr <= Decimal::ZERO {
            MethodTag::CagrProjectionNonPositiveBase
        } else {
            MethodTag::PeriodOverPeriodProjection
        };
        return Ok((growth, methodology));
    }

    let window = &points[points.len() - CAGR_WINDOW..];
    if window.iter().any(|(_, value)| *value <= Decimal::ZERO) {
        let (_, prev) = window[CAGR_WINDOW - 2];
        let (_, curr) = window[CAGR_WINDOW - 1];
        debug!("Non-positive value in CAGR window; using last period-over-period change");
        let growth = period_over_period(prev, curr)?;
        return Ok((growth, MethodTag::CagrProjectionNonPositiveBase));
    }

    let (start_year, start) = window[0];
    let (end_year, end) = window[CAGR_WINDOW - 1];
    let growth = compound_annual_growth(start, end, (end_year - start_year) as u32)?;
    Ok((growth, MethodTag::CagrProjection))
}

/// `curr / prev - 1`, undefined for a zero base.
fn period_over_period(prev: Decimal, curr: Decimal) -> Result<Decimal, String> {
    if prev.is_zero() {
        return Err("growth is undefined: previous period value is zero".to_string());
    }
    curr.checked_div(prev)
        .and_then(|ratio| ratio.checked_sub(Decimal::ONE))
        .ok_or_else(|| "growth is undefined: division overflow".to_string())
}

/// `(end / start)^(1 / years) - 1` for strictly positive endpoints.
fn compound_annual_growth(start: Decimal, end: Decimal, years: u32) -> Result<Decimal, String> {
    if start.is_zero() {
        return Err("growth is undefined: starting value is zero".to_string());
    }
    let ratio = end
        .checked_div(start)
        .ok_or_else(|| "growth is undefined: division overflow".to_string())?;

    let annual = match years {
        0 => return Err("growth is undefined: window spans no time".to_string()),
        1 => Some(ratio),
        2 => ratio.sqrt(),
        n => ratio.checked_powd(Decimal::ONE / Decimal::from(n)),
    };

    annual
        .and_then(|factor| factor.checked_sub(Decimal::ONE))
        .ok_or_else(|| "growth is undefined: root could not be computed".to_string())
}
