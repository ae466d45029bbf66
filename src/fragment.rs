use crate::schema::{
    Header, MarketIntelligence, Recommendation, RiskAnalysis, Series, SourceTag, METRIC_CAPEX,
    METRIC_FREE_CASH_FLOW, METRIC_WORKING_CAPITAL,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The extraction pass a fragment came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    General,
    Capex,
    WorkingCapital,
    FreeCashFlow,
}

impl SectionKind {
    pub fn all() -> [SectionKind; 4] {
        [
            Self::General,
            Self::Capex,
            Self::WorkingCapital,
            Self::FreeCashFlow,
        ]
    }

    pub fn dedicated() -> [SectionKind; 3] {
        [Self::Capex, Self::WorkingCapital, Self::FreeCashFlow]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Capex => "capex",
            Self::WorkingCapital => "working_capital",
            Self::FreeCashFlow => "free_cash_flow",
        }
    }

    pub fn source_tag(&self) -> SourceTag {
        match self {
            Self::General => SourceTag::GeneralExtraction,
            Self::Capex => SourceTag::DedicatedCapex,
            Self::WorkingCapital => SourceTag::DedicatedWorkingCapital,
            Self::FreeCashFlow => SourceTag::DedicatedFcf,
        }
    }

    /// The metric a dedicated pass owns. The general pass owns none.
    pub fn covered_metric(&self) -> Option<&'static str> {
        match self {
            Self::General => None,
            Self::Capex => Some(METRIC_CAPEX),
            Self::WorkingCapital => Some(METRIC_WORKING_CAPITAL),
            Self::FreeCashFlow => Some(METRIC_FREE_CASH_FLOW),
        }
    }

    /// JSON schema describing the fragment a FieldExtractor should return for this section.
    pub fn target_schema(&self) -> serde_json::Result<serde_json::Value> {
        let root = match self {
            Self::General => schemars::schema_for!(GeneralFragmentShape),
            Self::Capex => schemars::schema_for!(CapexFragmentShape),
            Self::WorkingCapital => schemars::schema_for!(WorkingCapitalFragmentShape),
            Self::FreeCashFlow => schemars::schema_for!(FreeCashFlowFragmentShape),
        };
        serde_json::to_value(root)
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recoverable problem found while reading a fragment. The offending value is kept
/// as null; the fragment itself is still usable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct FragmentIssue {
    pub path: String,
    pub details: String,
}

/// A validated, typed extraction fragment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fragment {
    pub kind: SectionKind,
    pub header: Header,
    pub description: Option<String>,
    pub source_context: Option<String>,
    pub confidence: Option<String>,
    pub recommendation: Option<Recommendation>,
    pub risk_analysis: Option<RiskAnalysis>,
    pub market_intelligence: Option<MarketIntelligence>,

    /// Every metric series found in the fragment, keyed by canonical metric name.
    pub metrics: BTreeMap<String, Series>,

    pub issues: Vec<FragmentIssue>,
}

impl Fragment {
    pub fn empty(kind: SectionKind) -> Self {
        Self {
            kind,
            header: Header::default(),
            description: None,
            source_context: None,
            confidence: None,
            recommendation: None,
            risk_analysis: None,
            market_intelligence: None,
            metrics: BTreeMap::new(),
            issues: Vec::new(),
        }
    }

    pub fn metric(&self, name: &str) -> Option<&Series> {
        self.metrics.get(name)
    }

    /// A dedicated fragment covers its metric when it supplied at least one item,
    /// null values included.
    pub fn covers(&self, metric: &str) -> bool {
        self.kind.covered_metric() == Some(metric)
            && self.metrics.get(metric).is_some_and(|s| !s.is_empty())
    }
}

// Shapes below exist to document the extractor contract as JSON schema. The validator
// reads raw JSON directly so that deviations degrade to nulls instead of failing.

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RawLineItem {
    #[schemars(description = "Period label exactly as written (FY23, 2024E, Q1 2023, FY2023-24)")]
    pub period: String,

    #[schemars(
        description = "Value exactly as written, keeping signs, parentheses and units. Use \"-\" when not found."
    )]
    pub value: Option<String>,

    #[schemars(description = "Unit label such as $M, USD thousands or %")]
    pub unit: Option<String>,

    #[schemars(description = "direct | calculated | not_found")]
    pub source: Option<String>,

    #[schemars(description = "How the value was obtained, e.g. direct or OCF_minus_CAPEX")]
    pub method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RawYearValue {
    pub value: Option<String>,
    pub source: Option<String>,
    pub method: Option<String>,
}

/// Year-keyed metric block, e.g. `{"unit": "$M", "year_wise": {"FY23": {"value": "12"}}}`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RawYearWiseMetric {
    pub unit: Option<String>,
    pub source: Option<String>,
    pub year_wise: BTreeMap<String, RawYearValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RawRevenue {
    pub history: Vec<RawLineItem>,
    pub present: Option<RawLineItem>,
    #[schemars(description = "Projected revenue; every item here is treated as an estimate")]
    pub future: Vec<RawLineItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RawCompanySummary {
    pub text: Option<String>,
    pub source_context: Option<String>,
    #[schemars(description = "high | medium | low")]
    pub confidence: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RawSuggestion {
    #[schemars(description = "Buy, Hold or Sell")]
    pub recommendation: Option<String>,
    pub confidence_percent: Option<String>,
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RawTaleOfTheTape {
    pub capex: Option<RawYearWiseMetric>,
    pub change_in_working_capital: Option<RawYearWiseMetric>,
    #[schemars(description = "+ Expense / - Gain")]
    pub one_time_cost: Option<RawYearWiseMetric>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RawFreeCashFlow {
    pub historical: BTreeMap<String, RawYearValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GeneralFragmentShape {
    pub company_name: Option<String>,
    #[schemars(description = "Three-letter currency code, e.g. USD")]
    pub currency: Option<String>,
    pub company_summary: Option<RawCompanySummary>,
    pub revenue: RawRevenue,
    #[schemars(description = "Metric name to list of period values")]
    pub profit_metrics: BTreeMap<String, Vec<RawLineItem>>,
    pub tale_of_the_tape: Option<RawTaleOfTheTape>,
    pub free_cash_flow: Option<RawFreeCashFlow>,
    pub market_intelligence: Option<MarketIntelligence>,
    pub risk_analysis: Option<RiskAnalysis>,
    pub ai_suggestion: Option<RawSuggestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CapexTale {
    pub capex: RawYearWiseMetric,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CapexFragmentShape {
    pub tale_of_the_tape: CapexTale,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkingCapitalTale {
    #[schemars(description = "Reported change, or NWC(N) - NWC(N-1) when only balances are given")]
    pub change_in_working_capital: RawYearWiseMetric,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkingCapitalFragmentShape {
    pub tale_of_the_tape: WorkingCapitalTale,
    #[schemars(description = "Net working capital balances by year, when disclosed")]
    pub net_working_capital: Option<BTreeMap<String, RawYearValue>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FreeCashFlowFragmentShape {
    pub free_cash_flow: RawFreeCashFlow,
    pub operating_cash_flow: Option<BTreeMap<String, RawYearValue>>,
}
