use crate::period::PeriodKey;
use log::debug;
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const METRIC_REVENUE: &str = "revenue";
pub const METRIC_CAPEX: &str = "capex";
pub const METRIC_WORKING_CAPITAL: &str = "change_in_working_capital";
pub const METRIC_ONE_TIME_COST: &str = "one_time_cost";
pub const METRIC_FREE_CASH_FLOW: &str = "free_cash_flow";
pub const METRIC_OPERATING_CASH_FLOW: &str = "operating_cash_flow";
pub const METRIC_NET_WORKING_CAPITAL: &str = "net_working_capital";
pub const METRIC_EBITDA: &str = "ebitda";
pub const METRIC_ADJUSTED_EBITDA: &str = "adjusted_ebitda";
pub const METRIC_GROSS_PROFIT: &str = "gross_profit";
pub const METRIC_OPERATING_EXPENSES: &str = "operating_expenses";

/// Balances that only feed derivations. No extraction pass owns them.
pub const SUPPORTING_METRICS: [&str; 2] = [METRIC_NET_WORKING_CAPITAL, METRIC_OPERATING_CASH_FLOW];

/// Profit metrics every finished record exposes, even when nothing was extracted.
pub const STANDARD_PROFIT_METRICS: [&str; 11] = [
    METRIC_GROSS_PROFIT,
    "operating_income",
    METRIC_EBITDA,
    METRIC_ADJUSTED_EBITDA,
    "net_income",
    "earnings_per_share",
    METRIC_OPERATING_CASH_FLOW,
    "gross_margin_percent",
    "operating_margin_percent",
    "ebitda_margin_percent",
    "net_margin_percent",
];

pub const CAPEX_SIGN_CONVENTION: &str = "Magnitude; outflow = positive cost";
pub const WORKING_CAPITAL_SIGN_CONVENTION: &str = "As reported: NWC(N) - NWC(N-1)";
pub const ONE_TIME_COST_SIGN_CONVENTION: &str = "+ Expense / - Gain";

/// Which extraction pass (or pipeline stage) produced a value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    #[schemars(description = "The general, whole-document extraction pass")]
    GeneralExtraction,

    #[schemars(description = "The dedicated capital expenditure pass")]
    DedicatedCapex,

    #[schemars(description = "The dedicated change-in-working-capital pass")]
    DedicatedWorkingCapital,

    #[schemars(description = "The dedicated free cash flow pass")]
    DedicatedFcf,

    #[schemars(description = "Calculated by the pipeline from other extracted metrics")]
    Derived,

    #[schemars(description = "Projected by the forecast engine")]
    Forecast,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GeneralExtraction => "general_extraction",
            Self::DedicatedCapex => "dedicated_capex",
            Self::DedicatedWorkingCapital => "dedicated_working_capital",
            Self::DedicatedFcf => "dedicated_fcf",
            Self::Derived => "derived",
            Self::Forecast => "forecast",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a value was obtained. Serialized as a plain string; labels the pipeline does not
/// recognize survive as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MethodTag {
    Direct,
    Calculated,
    DerivedFromFcf,
    CalculatedFromNwc,
    CalculatedFromBridge,
    OcfMinusCapex,
    EbitdaFromGrossProfit,
    OperatingExpensesFromEbitda,
    GrossProfitFromEbitda,
    CagrProjection,
    PeriodOverPeriodProjection,
    /// Growth was computed from at least one zero or negative base value.
    CagrProjectionNonPositiveBase,
    NotFound,
    Other(String),
}

impl MethodTag {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "" | "-" | "direct" => Self::Direct,
            "calculated" => Self::Calculated,
            "derived_from_fcf" => Self::DerivedFromFcf,
            "calculated_from_nwc" => Self::CalculatedFromNwc,
            "calculated_from_bridge" => Self::CalculatedFromBridge,
            "ocf_minus_capex" => Self::OcfMinusCapex,
            "ebitda_from_gross_profit" => Self::EbitdaFromGrossProfit,
            "operating_expenses_from_ebitda" => Self::OperatingExpensesFromEbitda,
            "gross_profit_from_ebitda" => Self::GrossProfitFromEbitda,
            "cagr_projection" | "fcf_cagr" => Self::CagrProjection,
            "period_over_period_projection" => Self::PeriodOverPeriodProjection,
            "cagr_projection_non_positive_base" => Self::CagrProjectionNonPositiveBase,
            "not_found" => Self::NotFound,
            _ => Self::Other(label.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Direct => "direct",
            Self::Calculated => "calculated",
            Self::DerivedFromFcf => "derived_from_fcf",
            Self::CalculatedFromNwc => "calculated_from_nwc",
            Self::CalculatedFromBridge => "calculated_from_bridge",
            Self::OcfMinusCapex => "ocf_minus_capex",
            Self::EbitdaFromGrossProfit => "ebitda_from_gross_profit",
            Self::OperatingExpensesFromEbitda => "operating_expenses_from_ebitda",
            Self::GrossProfitFromEbitda => "gross_profit_from_ebitda",
            Self::CagrProjection => "cagr_projection",
            Self::PeriodOverPeriodProjection => "period_over_period_projection",
            Self::CagrProjectionNonPositiveBase => "cagr_projection_non_positive_base",
            Self::NotFound => "not_found",
            Self::Other(label) => label,
        }
    }
}

impl From<String> for MethodTag {
    fn from(value: String) -> Self {
        Self::from_label(&value)
    }
}

impl From<MethodTag> for String {
    fn from(value: MethodTag) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for MethodTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl JsonSchema for MethodTag {
    fn schema_name() -> String {
        "MethodTag".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        String::json_schema(gen)
    }
}

/// Order of magnitude a monetary value is expressed in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    /// No magnitude declared and none could be verified.
    #[default]
    Unlabeled,
    Units,
    Thousands,
    Millions,
    Billions,
    Percent,
}

impl Scale {
    /// Factor that converts a value in this scale into millions.
    pub fn to_millions_factor(&self) -> Option<Decimal> {
        match self {
            Self::Units => Some(Decimal::new(1, 6)),
            Self::Thousands => Some(Decimal::new(1, 3)),
            Self::Millions => Some(Decimal::ONE),
            Self::Billions => Some(Decimal::from(1000)),
            Self::Unlabeled | Self::Percent => None,
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Unlabeled | Self::Units => "",
            Self::Thousands => "K",
            Self::Millions => "M",
            Self::Billions => "B",
            Self::Percent => "%",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
pub struct Unit {
    #[schemars(description = "Currency glyph ($, €, £, ...) or code when no glyph is known")]
    pub currency: Option<String>,
    pub scale: Scale,
}

impl Unit {
    pub fn millions(currency: Option<String>) -> Self {
        Self {
            currency,
            scale: Scale::Millions,
        }
    }

    pub fn percent() -> Self {
        Self {
            currency: None,
            scale: Scale::Percent,
        }
    }

    pub fn is_unlabeled(&self) -> bool {
        self.scale == Scale::Unlabeled && self.currency.is_none()
    }

    /// Compact label such as `$M`, `€B` or `%`.
    pub fn label(&self) -> String {
        format!(
            "{}{}",
            self.currency.as_deref().unwrap_or_default(),
            self.scale.suffix()
        )
    }
}

/// Annotations attached to a single value by the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ItemFlag {
    NonCanonicalPeriod,
    DuplicatePeriod,
    AmbiguousSign,
    SignNormalized,
    UnitInferred,
    CurrencyMismatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct LineItem {
    pub period: PeriodKey,

    #[schemars(description = "Null when the source gave no usable number; never treated as zero")]
    pub value: Option<Decimal>,

    pub unit: Unit,
    pub source: SourceTag,
    pub method: MethodTag,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Verbatim value text from the extractor, kept for transparency")]
    pub original_text: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<ItemFlag>,
}

impl LineItem {
    pub fn new(period: PeriodKey, value: Option<Decimal>, source: SourceTag) -> Self {
        Self {
            period,
            value,
            unit: Unit::default(),
            source,
            method: MethodTag::Direct,
            original_text: None,
            flags: Vec::new(),
        }
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_method(mut self, method: MethodTag) -> Self {
        self.method = method;
        self
    }

    pub fn flag(&mut self, flag: ItemFlag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    pub fn has_flag(&self, flag: ItemFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_estimate(&self) -> bool {
        self.period.is_estimate
    }

    /// Display text with the unit's currency glyph prepended once and the scale
    /// appended, e.g. `$12.5M` or `-3.2%`.
    pub fn display_value(&self) -> String {
        let Some(value) = self.value else {
            return "-".to_string();
        };
        let number = value.normalize().to_string();
        let with_glyph = match &self.unit.currency {
            Some(glyph) => crate::currency::prefix_symbol(&number, glyph),
            None => number,
        };
        format!("{}{}", with_glyph, self.unit.scale.suffix())
    }
}

/// Ordered, duplicate-free sequence of values for one metric.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema)]
pub struct Series {
    pub metric: String,
    pub items: Vec<LineItem>,
}

impl Series {
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            items: Vec::new(),
        }
    }

    pub fn from_items(metric: impl Into<String>, items: impl IntoIterator<Item = LineItem>) -> Self {
        let mut series = Self::new(metric);
        for item in items {
            series.insert(item);
        }
        series
    }

    /// Inserts in chronological position. When the period is already present the
    /// first non-null value is kept and the survivor is flagged `duplicate_period`.
    pub fn insert(&mut self, item: LineItem) {
        match self.items.binary_search_by(|existing| existing.period.cmp(&item.period)) {
            Ok(idx) => {
                let existing = &mut self.items[idx];
                debug!(
                    "{}: duplicate period {} ({} vs {}), keeping first non-null",
                    self.metric,
                    item.period,
                    existing
                        .value
                        .map_or_else(|| "null".to_string(), |v| v.to_string()),
                    item.value.map_or_else(|| "null".to_string(), |v| v.to_string()),
                );
                if existing.value.is_none() && item.value.is_some() {
                    let mut replacement = item;
                    for flag in &existing.flags {
                        replacement.flag(*flag);
                    }
                    *existing = replacement;
                }
                existing.flag(ItemFlag::DuplicatePeriod);
            }
            Err(idx) => self.items.insert(idx, item),
        }
    }

    /// Inserts only when the period is absent; never touches an existing value.
    pub fn fill_missing(&mut self, item: LineItem) -> bool {
        match self.items.binary_search_by(|existing| existing.period.cmp(&item.period)) {
            Ok(idx) if self.items[idx].value.is_some() => false,
            Ok(idx) => {
                self.items[idx] = item;
                true
            }
            Err(idx) => {
                self.items.insert(idx, item);
                true
            }
        }
    }

    pub fn get(&self, period: &PeriodKey) -> Option<&LineItem> {
        self.items
            .binary_search_by(|existing| existing.period.cmp(period))
            .ok()
            .map(|idx| &self.items[idx])
    }

    pub fn value_at(&self, period: &PeriodKey) -> Option<Decimal> {
        self.get(period).and_then(|item| item.value)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn has_values(&self) -> bool {
        self.items.iter().any(|item| item.value.is_some())
    }

    /// Non-null values on canonical periods, in chronological order.
    pub fn values(&self) -> impl Iterator<Item = (&PeriodKey, Decimal)> {
        self.items
            .iter()
            .filter(|item| item.period.is_canonical())
            .filter_map(|item| item.value.map(|v| (&item.period, v)))
    }

    /// Non-null, non-estimate values on canonical full-year periods.
    pub fn historical_values(&self) -> Vec<(i32, Decimal)> {
        self.items
            .iter()
            .filter(|item| !item.is_estimate() && item.period.quarter.is_none())
            .filter_map(|item| match (item.period.is_canonical(), item.period.year, item.value) {
                (true, Some(year), Some(value)) => Some((year, value)),
                _ => None,
            })
            .collect()
    }

    pub fn latest(&self) -> Option<&LineItem> {
        self.items
            .iter()
            .rev()
            .find(|item| item.value.is_some() && item.period.is_canonical())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ForecastParameters {
    #[schemars(description = "Last historical period used as the anchor for projection")]
    pub base_year: PeriodKey,

    #[schemars(description = "Per-period growth rate as a fraction (0.1 = 10%)")]
    pub growth_rate: Decimal,

    pub horizon: u32,
    pub methodology: MethodTag,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ForecastStatus {
    Available,
    NotAvailable {
        reason: String,
    },
    #[default]
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema)]
pub struct ForecastSection {
    pub status: ForecastStatus,
    pub parameters: Option<ForecastParameters>,
    pub series: Series,
}

impl ForecastSection {
    pub fn not_available(metric: &str, reason: impl Into<String>) -> Self {
        Self {
            status: ForecastStatus::NotAvailable {
                reason: reason.into(),
            },
            parameters: None,
            series: Series::new(metric),
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == ForecastStatus::Available
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema)]
pub struct Header {
    pub company_name: Option<String>,

    #[schemars(description = "Three-letter currency code, e.g. USD")]
    pub currency: Option<String>,

    pub currency_symbol: Option<String>,

    #[schemars(description = "Deal value as entered by the user, kept verbatim")]
    pub deal_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema)]
pub struct Recommendation {
    #[schemars(description = "Buy, Hold or Sell")]
    pub recommendation: Option<String>,
    pub confidence_percent: Option<Decimal>,
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema)]
pub struct Summary {
    pub description: Option<String>,
    pub source_context: Option<String>,
    pub confidence: Option<String>,
    pub recommendation: Option<Recommendation>,

    pub latest_revenue: Option<LineItem>,
    pub revenue_periods: usize,
    pub fcf_base_year: Option<PeriodKey>,
    pub fcf_forecast_available: bool,

    #[schemars(description = "Sections that are present but carry no usable values")]
    pub sections_not_available: Vec<String>,

    pub flagged_items: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema)]
pub struct RiskAnalysis {
    pub operational_risks: Vec<String>,
    pub financial_risks: Vec<String>,
    pub market_risks: Vec<String>,
    pub regulatory_risks: Vec<String>,
    pub source_context: Option<String>,
    pub confidence: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema)]
pub struct MarketIntelligence {
    pub market_size: Option<String>,
    pub market_growth_percent: Option<String>,
    pub market_share_percent: Option<String>,
    pub industry_position: Option<String>,
    pub key_competitors: Vec<String>,
    pub market_trends: Option<String>,
    pub customer_base: Option<String>,
    pub geographic_presence: Option<String>,
    pub source_context: Option<String>,
    pub confidence: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct SignConventions {
    pub capex: String,
    pub change_in_working_capital: String,
    pub one_time_cost: String,
}

impl Default for SignConventions {
    fn default() -> Self {
        Self {
            capex: CAPEX_SIGN_CONVENTION.to_string(),
            change_in_working_capital: WORKING_CAPITAL_SIGN_CONVENTION.to_string(),
            one_time_cost: ONE_TIME_COST_SIGN_CONVENTION.to_string(),
        }
    }
}

/// CAPEX, change in working capital and one-time costs, read alongside EBITDA.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct TaleOfTheTape {
    pub capex: Series,
    pub change_in_working_capital: Series,
    pub one_time_cost: Series,
    pub sign_conventions: SignConventions,
}

impl Default for TaleOfTheTape {
    fn default() -> Self {
        Self {
            capex: Series::new(METRIC_CAPEX),
            change_in_working_capital: Series::new(METRIC_WORKING_CAPITAL),
            one_time_cost: Series::new(METRIC_ONE_TIME_COST),
            sign_conventions: SignConventions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct FreeCashFlow {
    #[schemars(
        description = "Values reported or derived from the document; document-side estimates stay here flagged as estimates"
    )]
    pub historical: Series,
    pub forecast: ForecastSection,
}

impl Default for FreeCashFlow {
    fn default() -> Self {
        Self {
            historical: Series::new(METRIC_FREE_CASH_FLOW),
            forecast: ForecastSection {
                series: Series::new(METRIC_FREE_CASH_FLOW),
                ..ForecastSection::default()
            },
        }
    }
}

/// The reconciled financial record of one deal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct DealRecord {
    pub header: Header,
    pub summary: Summary,
    pub revenue: Series,

    #[serde(rename = "profitMetrics")]
    pub profit_metrics: BTreeMap<String, Series>,

    #[serde(rename = "riskAnalysis")]
    pub risk_analysis: RiskAnalysis,

    #[serde(rename = "marketIntelligence")]
    pub market_intelligence: MarketIntelligence,

    pub tale_of_the_tape: TaleOfTheTape,
    pub free_cash_flow: FreeCashFlow,
}

impl Default for DealRecord {
    fn default() -> Self {
        Self {
            header: Header::default(),
            summary: Summary::default(),
            revenue: Series::new(METRIC_REVENUE),
            profit_metrics: BTreeMap::new(),
            risk_analysis: RiskAnalysis::default(),
            market_intelligence: MarketIntelligence::default(),
            tale_of_the_tape: TaleOfTheTape::default(),
            free_cash_flow: FreeCashFlow::default(),
        }
    }
}

impl DealRecord {
    /// Every monetary or ratio series in the record, in a stable order.
    pub fn series_mut(&mut self) -> Vec<&mut Series> {
        let mut all = vec![&mut self.revenue];
        all.extend(self.profit_metrics.values_mut());
        all.push(&mut self.tale_of_the_tape.capex);
        all.push(&mut self.tale_of_the_tape.change_in_working_capital);
        all.push(&mut self.tale_of_the_tape.one_time_cost);
        all.push(&mut self.free_cash_flow.historical);
        all.push(&mut self.free_cash_flow.forecast.series);
        all
    }

    pub fn series(&self) -> Vec<&Series> {
        let mut all = vec![&self.revenue];
        all.extend(self.profit_metrics.values());
        all.push(&self.tale_of_the_tape.capex);
        all.push(&self.tale_of_the_tape.change_in_working_capital);
        all.push(&self.tale_of_the_tape.one_time_cost);
        all.push(&self.free_cash_flow.historical);
        all.push(&self.free_cash_flow.forecast.series);
        all
    }

    pub fn profit_metric(&self, metric: &str) -> Option<&Series> {
        self.profit_metrics.get(metric)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(DealRecord)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}
