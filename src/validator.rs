//! Turns an untrusted extractor fragment into a typed [`Fragment`].
//!
//! Only structural failures reject a fragment. Everything else (placeholder values,
//! unparsable numbers, odd period labels) degrades to a null value or a
//! non-canonical period and is reported as a [`FragmentIssue`].

use crate::config::PipelineConfig;
use crate::error::{DealRecordError, Result};
use crate::fragment::{Fragment, FragmentIssue, SectionKind};
use crate::period::PeriodKey;
use crate::schema::{
    Header, ItemFlag, LineItem, MarketIntelligence, MethodTag, Recommendation, RiskAnalysis,
    Series, SourceTag, Unit, METRIC_CAPEX, METRIC_FREE_CASH_FLOW, METRIC_NET_WORKING_CAPITAL,
    METRIC_ONE_TIME_COST, METRIC_OPERATING_CASH_FLOW, METRIC_OPERATING_EXPENSES, METRIC_REVENUE,
    METRIC_WORKING_CAPITAL, SUPPORTING_METRICS,
};
use crate::utils::{is_placeholder, parse_decimal_text, parse_unit_label};
use log::debug;
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Period label given to values that arrived without any period.
pub const UNSPECIFIED_PERIOD: &str = "unspecified";

const TALE_METRICS: [&str; 3] = [METRIC_CAPEX, METRIC_WORKING_CAPITAL, METRIC_ONE_TIME_COST];
const PERIOD_FIELDS: [&str; 5] = ["period", "year", "period_label_raw", "label", "fiscal_year"];

/// Keys inside a metric block that describe the series rather than name a period.
const RESERVED_KEYS: [&str; 13] = [
    "unit",
    "units",
    "source",
    "method",
    "formula_used",
    "year_wise",
    "historical",
    "forecast_next_5_years",
    "base_year",
    "growth_rate_used",
    "methodology",
    "metric",
    "currency",
];

/// Series-level settings inherited by every item beneath them.
#[derive(Debug, Clone, Default)]
struct ItemDefaults {
    unit: Option<Unit>,
    method: Option<MethodTag>,
    estimate: bool,
}

impl ItemDefaults {
    fn merged_with(&self, obj: &Map<String, Value>) -> Self {
        let mut next = self.clone();
        if let Some(unit) = obj
            .get("unit")
            .or_else(|| obj.get("units"))
            .and_then(Value::as_str)
        {
            next.unit = Some(parse_unit_label(unit));
        }

        let method = obj
            .get("method")
            .and_then(Value::as_str)
            .filter(|m| !matches!(m.trim(), "" | "-"));
        // Extractors put "calculated" / "not_found" in `source`; that is a method here.
        let source_hint = obj.get("source").and_then(Value::as_str).filter(|s| {
            matches!(s.trim().to_lowercase().as_str(), "calculated" | "not_found")
        });
        if let Some(label) = method.or(source_hint) {
            next.method = Some(MethodTag::from_label(label));
        }

        if obj.get("is_estimate").and_then(Value::as_bool) == Some(true) {
            next.estimate = true;
        }
        next
    }

    fn as_estimate(&self) -> Self {
        Self {
            estimate: true,
            ..self.clone()
        }
    }
}

pub struct FragmentValidator {
    placeholders: Vec<String>,
}

impl FragmentValidator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            placeholders: config.placeholder_tokens.clone(),
        }
    }

    pub fn validate(&self, raw: &Value, kind: SectionKind) -> Result<Fragment> {
        let root = raw.as_object().ok_or_else(|| {
            DealRecordError::malformed("$", format!("expected an object, found {}", type_name(raw)))
        })?;

        let mut fragment = Fragment::empty(kind);
        let mut issues = Vec::new();

        if kind == SectionKind::General {
            fragment.header = self.read_header(root);
            self.read_company_summary(root, &mut fragment);
            fragment.recommendation = self.read_recommendation(root);
            fragment.risk_analysis = self.read_risk_analysis(root, &mut issues);
            fragment.market_intelligence = self.read_market_intelligence(root, &mut issues);
        }

        fragment.metrics = self.read_metrics(root, kind.source_tag(), &mut issues)?;
        fragment.issues = issues;

        debug!(
            "Validated {} fragment: {} metrics, {} issues",
            kind,
            fragment.metrics.len(),
            fragment.issues.len()
        );
        Ok(fragment)
    }

    fn read_metrics(
        &self,
        root: &Map<String, Value>,
        source: SourceTag,
        issues: &mut Vec<FragmentIssue>,
    ) -> Result<BTreeMap<String, Series>> {
        let mut metrics = BTreeMap::new();
        let defaults = ItemDefaults::default();

        if let Some(revenue) = root.get(METRIC_REVENUE) {
            let items = self.read_container(revenue, "$.revenue", &defaults, source, issues)?;
            collect(&mut metrics, METRIC_REVENUE, items);
        }

        match root.get("profit_metrics") {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (name, container) in map {
                    let path = format!("$.profit_metrics.{}", name);
                    let items = self.read_container(container, &path, &defaults, source, issues)?;
                    collect(&mut metrics, &canonical_metric_name(name), items);
                }
            }
            Some(other) => {
                return Err(DealRecordError::malformed(
                    "$.profit_metrics",
                    format!("expected an object, found {}", type_name(other)),
                ))
            }
        }

        let tale = match root.get("tale_of_the_tape") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(other) => {
                return Err(DealRecordError::malformed(
                    "$.tale_of_the_tape",
                    format!("expected an object, found {}", type_name(other)),
                ))
            }
        };

        for metric in TALE_METRICS {
            if let Some(container) = tale.and_then(|t| t.get(metric)) {
                let path = format!("$.tale_of_the_tape.{}", metric);
                let items = self.read_container(container, &path, &defaults, source, issues)?;
                collect(&mut metrics, metric, items);
            }
            if let Some(container) = root.get(metric) {
                let path = format!("$.{}", metric);
                let items = self.read_container(container, &path, &defaults, source, issues)?;
                collect(&mut metrics, metric, items);
            }
        }

        for metric in std::iter::once(METRIC_FREE_CASH_FLOW).chain(SUPPORTING_METRICS) {
            if let Some(container) = root.get(metric) {
                let path = format!("$.{}", metric);
                let items = self.read_container(container, &path, &defaults, source, issues)?;
                collect(&mut metrics, metric, items);
            }
        }

        Ok(metrics)
    }

    fn read_container(
        &self,
        value: &Value,
        path: &str,
        defaults: &ItemDefaults,
        source: SourceTag,
        issues: &mut Vec<FragmentIssue>,
    ) -> Result<Vec<LineItem>> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Array(elements) => Ok(self.read_list(elements, path, defaults, source, issues)),
            Value::Object(obj) => self.read_object_container(obj, path, defaults, source, issues),
            scalar => Ok(vec![self.read_value(
                scalar,
                PeriodKey::non_canonical(UNSPECIFIED_PERIOD),
                path,
                defaults,
                source,
                issues,
            )]),
        }
    }

    fn read_list(
        &self,
        elements: &[Value],
        path: &str,
        defaults: &ItemDefaults,
        source: SourceTag,
        issues: &mut Vec<FragmentIssue>,
    ) -> Vec<LineItem> {
        let mut items = Vec::new();
        for (idx, element) in elements.iter().enumerate() {
            let element_path = format!("{}[{}]", path, idx);
            match element {
                Value::Null => {}
                Value::Object(obj) => items.push(self.read_item_object(
                    obj,
                    None,
                    &element_path,
                    defaults,
                    source,
                    issues,
                )),
                Value::Array(_) => issues.push(issue(&element_path, "nested list ignored")),
                scalar => items.push(self.read_value(
                    scalar,
                    PeriodKey::non_canonical(UNSPECIFIED_PERIOD),
                    &element_path,
                    defaults,
                    source,
                    issues,
                )),
            }
        }
        items
    }

    fn read_object_container(
        &self,
        obj: &Map<String, Value>,
        path: &str,
        defaults: &ItemDefaults,
        source: SourceTag,
        issues: &mut Vec<FragmentIssue>,
    ) -> Result<Vec<LineItem>> {
        let defaults = defaults.merged_with(obj);

        if ["history", "present", "future"]
            .iter()
            .any(|key| obj.contains_key(*key))
        {
            return self.read_timeline(obj, path, &defaults, source, issues);
        }

        if PERIOD_FIELDS.iter().any(|key| obj.contains_key(*key)) && obj.contains_key("value") {
            return Ok(vec![self.read_item_object(
                obj, None, path, &defaults, source, issues,
            )]);
        }

        let mut items = Vec::new();
        for nested in ["year_wise", "historical"] {
            match obj.get(nested) {
                None | Some(Value::Null) => {}
                Some(Value::Object(map)) => items.extend(self.read_year_map(
                    map,
                    &format!("{}.{}", path, nested),
                    &defaults,
                    source,
                    issues,
                )),
                Some(Value::Array(list)) => items.extend(self.read_list(
                    list,
                    &format!("{}.{}", path, nested),
                    &defaults,
                    source,
                    issues,
                )),
                Some(other) => issues.push(issue(
                    &format!("{}.{}", path, nested),
                    &format!("expected a map of periods, found {}", type_name(other)),
                )),
            }
        }

        // Document-side projections are kept, but only ever as estimates.
        if let Some(Value::Object(map)) = obj.get("forecast_next_5_years") {
            items.extend(self.read_year_map(
                map,
                &format!("{}.forecast_next_5_years", path),
                &defaults.as_estimate(),
                source,
                issues,
            ));
        }

        items.extend(self.read_year_map(obj, path, &defaults, source, issues));
        Ok(items)
    }

    /// Revenue's `{history, present, future}` shape.
    fn read_timeline(
        &self,
        obj: &Map<String, Value>,
        path: &str,
        defaults: &ItemDefaults,
        source: SourceTag,
        issues: &mut Vec<FragmentIssue>,
    ) -> Result<Vec<LineItem>> {
        let mut items = Vec::new();

        for (key, item_defaults) in [("history", defaults.clone()), ("future", defaults.as_estimate())] {
            let key_path = format!("{}.{}", path, key);
            match obj.get(key) {
                None | Some(Value::Null) => {}
                Some(Value::Array(list)) => {
                    items.extend(self.read_list(list, &key_path, &item_defaults, source, issues))
                }
                Some(Value::Object(map)) => items.extend(self.read_year_map(
                    map,
                    &key_path,
                    &item_defaults,
                    source,
                    issues,
                )),
                Some(other) => {
                    return Err(DealRecordError::malformed(
                        key_path,
                        format!("expected a list, found {}", type_name(other)),
                    ))
                }
            }
        }

        let present_path = format!("{}.present", path);
        match obj.get("present") {
            None | Some(Value::Null) => {}
            Some(Value::Object(present)) if present.is_empty() => {}
            Some(Value::Object(present)) => items.push(self.read_item_object(
                present,
                Some("present"),
                &present_path,
                defaults,
                source,
                issues,
            )),
            Some(Value::Array(list)) => {
                items.extend(self.read_list(list, &present_path, defaults, source, issues))
            }
            Some(scalar) => items.push(self.read_value(
                scalar,
                PeriodKey::non_canonical("present"),
                &present_path,
                defaults,
                source,
                issues,
            )),
        }

        Ok(items)
    }

    fn read_year_map(
        &self,
        map: &Map<String, Value>,
        path: &str,
        defaults: &ItemDefaults,
        source: SourceTag,
        issues: &mut Vec<FragmentIssue>,
    ) -> Vec<LineItem> {
        let mut items = Vec::new();
        for (label, value) in map {
            if RESERVED_KEYS.contains(&label.as_str()) {
                continue;
            }
            let entry_path = format!("{}.{}", path, label);
            match value {
                Value::Object(obj) => items.push(self.read_item_object(
                    obj,
                    Some(label),
                    &entry_path,
                    defaults,
                    source,
                    issues,
                )),
                Value::Array(_) => issues.push(issue(&entry_path, "expected a single value")),
                scalar => {
                    let mut period = PeriodKey::parse(label);
                    period.is_estimate |= defaults.estimate;
                    items.push(self.read_value(scalar, period, &entry_path, defaults, source, issues));
                }
            }
        }
        items
    }

    fn read_item_object(
        &self,
        obj: &Map<String, Value>,
        fallback_label: Option<&str>,
        path: &str,
        defaults: &ItemDefaults,
        source: SourceTag,
        issues: &mut Vec<FragmentIssue>,
    ) -> LineItem {
        let label = PERIOD_FIELDS
            .iter()
            .find_map(|field| match obj.get(*field) {
                Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .or_else(|| fallback_label.map(str::to_string));

        let item_defaults = defaults.merged_with(obj);
        let mut period = match label {
            Some(label) => PeriodKey::parse(&label),
            None => PeriodKey::non_canonical(UNSPECIFIED_PERIOD),
        };
        period.is_estimate |= item_defaults.estimate;

        let value = obj
            .get("value")
            .or_else(|| obj.get("amount"))
            .unwrap_or(&Value::Null);

        self.read_value(value, period, path, &item_defaults, source, issues)
    }

    fn read_value(
        &self,
        value: &Value,
        period: PeriodKey,
        path: &str,
        defaults: &ItemDefaults,
        source: SourceTag,
        issues: &mut Vec<FragmentIssue>,
    ) -> LineItem {
        let (parsed, original_text) = match value {
            Value::Null => (None, None),
            Value::Number(n) => {
                let text = n.to_string();
                let parsed = Decimal::from_str(&text)
                    .or_else(|_| Decimal::from_scientific(&text))
                    .ok();
                if parsed.is_none() {
                    issues.push(issue(path, &format!("number {} is out of range", text)));
                }
                (parsed, Some(text))
            }
            Value::String(text) => {
                let parsed = parse_decimal_text(text, &self.placeholders);
                if parsed.is_none()
                    && !text.trim().is_empty()
                    && !is_placeholder(text, &self.placeholders)
                {
                    issues.push(issue(path, &format!("'{}' is not a number", text.trim())));
                }
                (parsed, Some(text.trim().to_string()))
            }
            other => {
                issues.push(issue(
                    path,
                    &format!("expected a number, found {}", type_name(other)),
                ));
                (None, None)
            }
        };

        let mut item = LineItem::new(period, parsed, source);
        item.original_text = original_text;
        if let Some(unit) = &defaults.unit {
            item.unit = unit.clone();
        }
        if let Some(method) = &defaults.method {
            item.method = method.clone();
        }
        if !item.period.is_canonical() {
            item.flag(ItemFlag::NonCanonicalPeriod);
        }
        item
    }

    fn read_header(&self, root: &Map<String, Value>) -> Header {
        let header = root.get("header").and_then(Value::as_object);
        let lookup = |key: &str| {
            root.get(key)
                .or_else(|| header.and_then(|h| h.get(key)))
                .and_then(|v| self.text_of(v))
        };

        Header {
            company_name: lookup("company_name"),
            currency: lookup("currency"),
            currency_symbol: lookup("currency_symbol"),
            deal_value: lookup("deal_value"),
        }
    }

    fn read_company_summary(&self, root: &Map<String, Value>, fragment: &mut Fragment) {
        match root.get("company_summary").or_else(|| root.get("summary")) {
            Some(Value::Object(summary)) => {
                fragment.description = ["text", "description", "summary"]
                    .iter()
                    .find_map(|key| summary.get(*key).and_then(|v| self.text_of(v)));
                fragment.source_context = summary.get("source_context").and_then(|v| self.text_of(v));
                fragment.confidence = summary.get("confidence").and_then(|v| self.text_of(v));
            }
            Some(other) => fragment.description = self.text_of(other),
            None => {}
        }
    }

    fn read_recommendation(&self, root: &Map<String, Value>) -> Option<Recommendation> {
        let obj = root
            .get("ai_suggestion")
            .or_else(|| root.get("recommendation"))
            .and_then(Value::as_object)?;

        let confidence_percent = match obj.get("confidence_percent") {
            Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).ok(),
            Some(Value::String(s)) => parse_decimal_text(s, &self.placeholders),
            _ => None,
        };

        let recommendation = Recommendation {
            recommendation: obj.get("recommendation").and_then(|v| self.text_of(v)),
            confidence_percent,
            rationale: obj.get("rationale").and_then(|v| self.text_of(v)),
        };
        (recommendation != Recommendation::default()).then_some(recommendation)
    }

    fn read_risk_analysis(
        &self,
        root: &Map<String, Value>,
        issues: &mut Vec<FragmentIssue>,
    ) -> Option<RiskAnalysis> {
        let obj = match root.get("risk_analysis")? {
            Value::Object(obj) => obj,
            Value::Null => return None,
            other => {
                issues.push(issue(
                    "$.risk_analysis",
                    &format!("expected an object, found {}", type_name(other)),
                ));
                return None;
            }
        };

        Some(RiskAnalysis {
            operational_risks: self.text_list(obj.get("operational_risks")),
            financial_risks: self.text_list(obj.get("financial_risks")),
            market_risks: self.text_list(obj.get("market_risks")),
            regulatory_risks: self.text_list(obj.get("regulatory_risks")),
            source_context: obj.get("source_context").and_then(|v| self.text_of(v)),
            confidence: obj.get("confidence").and_then(|v| self.text_of(v)),
        })
    }

    fn read_market_intelligence(
        &self,
        root: &Map<String, Value>,
        issues: &mut Vec<FragmentIssue>,
    ) -> Option<MarketIntelligence> {
        let obj = match root.get("market_intelligence")? {
            Value::Object(obj) => obj,
            Value::Null => return None,
            other => {
                issues.push(issue(
                    "$.market_intelligence",
                    &format!("expected an object, found {}", type_name(other)),
                ));
                return None;
            }
        };
        let text = |key: &str| obj.get(key).and_then(|v| self.text_of(v));

        Some(MarketIntelligence {
            market_size: text("market_size"),
            market_growth_percent: text("market_growth_percent"),
            market_share_percent: text("market_share_percent"),
            industry_position: text("industry_position"),
            key_competitors: self.text_list(obj.get("key_competitors")),
            market_trends: text("market_trends"),
            customer_base: text("customer_base"),
            geographic_presence: text("geographic_presence"),
            source_context: text("source_context"),
            confidence: text("confidence"),
        })
    }

    /// Free text from any JSON value; placeholders and blanks read as absent.
    fn text_of(&self, value: &Value) -> Option<String> {
        let text = match value {
            Value::Null => return None,
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => other.to_string(),
        };
        if text.is_empty() || is_placeholder(&text, &self.placeholders) {
            None
        } else {
            Some(text)
        }
    }

    fn text_list(&self, value: Option<&Value>) -> Vec<String> {
        match value {
            Some(Value::Array(list)) => list.iter().filter_map(|v| self.text_of(v)).collect(),
            Some(other) => self.text_of(other).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

/// Validates one raw fragment with the given configuration.
pub fn validate_fragment(
    raw: &Value,
    kind: SectionKind,
    config: &PipelineConfig,
) -> Result<Fragment> {
    FragmentValidator::new(config).validate(raw, kind)
}

/// Maps the metric names extractors tend to use onto canonical keys.
pub fn canonical_metric_name(name: &str) -> String {
    let normalized = name
        .trim()
        .to_lowercase()
        .replace([' ', '-', '/'], "_");
    match normalized.as_str() {
        "fcf" | "free_cashflow" => METRIC_FREE_CASH_FLOW.to_string(),
        "ocf" | "cash_from_operations" | "cash_flow_from_operations" | "operating_cashflow" => {
            METRIC_OPERATING_CASH_FLOW.to_string()
        }
        "capital_expenditure" | "capital_expenditures" | "capital_expenditures_capex" => {
            METRIC_CAPEX.to_string()
        }
        "nwc" | "working_capital" => METRIC_NET_WORKING_CAPITAL.to_string(),
        "eps" => "earnings_per_share".to_string(),
        "ebit" => "operating_income".to_string(),
        "opex" | "operating_costs" => METRIC_OPERATING_EXPENSES.to_string(),
        _ => normalized,
    }
}

fn collect(metrics: &mut BTreeMap<String, Series>, metric: &str, items: Vec<LineItem>) {
    if items.is_empty() {
        return;
    }
    let series = metrics
        .entry(metric.to_string())
        .or_insert_with(|| Series::new(metric));
    for item in items {
        series.insert(item);
    }
}

fn issue(path: &str, details: &str) -> FragmentIssue {
    FragmentIssue {
        path: path.to_string(),
        details: details.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Scale;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn validate(raw: Value, kind: SectionKind) -> Result<Fragment> {
        validate_fragment(&raw, kind, &PipelineConfig::default())
    }

    #[test]
    fn test_non_object_root_is_rejected() {
        let err = validate(json!([1, 2, 3]), SectionKind::General).unwrap_err();
        match err {
            DealRecordError::MalformedFragment { path, .. } => assert_eq!(path, "$"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_structural_failures_are_rejected() {
        assert!(matches!(
            validate(json!({"profit_metrics": [1]}), SectionKind::General),
            Err(DealRecordError::MalformedFragment { .. })
        ));
        assert!(matches!(
            validate(json!({"revenue": {"history": "lots"}}), SectionKind::General),
            Err(DealRecordError::MalformedFragment { .. })
        ));
        assert!(matches!(
            validate(json!({"tale_of_the_tape": "n/a"}), SectionKind::Capex),
            Err(DealRecordError::MalformedFragment { .. })
        ));
    }

    #[test]
    fn test_placeholders_become_null_without_issues() {
        let fragment = validate(
            json!({"tale_of_the_tape": {"capex": {"year_wise": {
                "FY22": {"value": "-", "source": "not_found"},
                "FY23": {"value": "N/A"},
                "FY24": {"value": "12.5"}
            }}}}),
            SectionKind::Capex,
        )
        .unwrap();

        let capex = fragment.metric("capex").unwrap();
        assert_eq!(capex.len(), 3);
        assert_eq!(capex.value_at(&PeriodKey::year(2022)), None);
        assert_eq!(capex.value_at(&PeriodKey::year(2023)), None);
        assert_eq!(capex.value_at(&PeriodKey::year(2024)), Some(dec!(12.5)));
        assert_eq!(
            capex.get(&PeriodKey::year(2022)).unwrap().method,
            MethodTag::NotFound
        );
        assert!(fragment.issues.is_empty());
        assert!(fragment.covers("capex"));
    }

    #[test]
    fn test_unparsable_numbers_are_reported() {
        let fragment = validate(
            json!({"profit_metrics": {"ebitda": [
                {"period": "2023", "value": "about ten"},
                {"period": "2024", "value": true}
            ]}}),
            SectionKind::General,
        )
        .unwrap();

        let ebitda = fragment.metric("ebitda").unwrap();
        assert!(!ebitda.has_values());
        assert_eq!(fragment.issues.len(), 2);
        assert!(fragment.issues[0].path.starts_with("$.profit_metrics.ebitda"));
    }

    #[test]
    fn test_revenue_timeline_marks_future_as_estimates() {
        let fragment = validate(
            json!({
                "company_name": "Acme Ltd",
                "currency": "USD",
                "revenue": {
                    "history": [
                        {"period": "FY22", "value": "90", "unit": "$M"},
                        {"period": "FY23", "value": "100", "unit": "$M"}
                    ],
                    "present": {"period": "FY24", "value": "110"},
                    "future": [{"period": "2025", "value": "125"}]
                }
            }),
            SectionKind::General,
        )
        .unwrap();

        let revenue = fragment.metric("revenue").unwrap();
        assert_eq!(revenue.len(), 4);
        let future = revenue.items.last().unwrap();
        assert_eq!(future.period.year, Some(2025));
        assert!(future.is_estimate());
        assert_eq!(revenue.items[0].unit.scale, Scale::Millions);
        assert_eq!(revenue.items[0].unit.currency.as_deref(), Some("$"));
        assert_eq!(fragment.header.company_name.as_deref(), Some("Acme Ltd"));
        assert_eq!(fragment.header.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn test_scalar_container_uses_unspecified_period() {
        let fragment = validate(
            json!({"profit_metrics": {"net_income": "(4.2)"}}),
            SectionKind::General,
        )
        .unwrap();

        let item = &fragment.metric("net_income").unwrap().items[0];
        assert_eq!(item.value, Some(dec!(-4.2)));
        assert!(item.period.non_canonical);
        assert_eq!(item.period.unparsed_original, UNSPECIFIED_PERIOD);
        assert!(item.has_flag(ItemFlag::NonCanonicalPeriod));
        assert_eq!(item.original_text.as_deref(), Some("(4.2)"));
    }

    #[test]
    fn test_fcf_fragment_with_document_forecast() {
        let fragment = validate(
            json!({"free_cash_flow": {
                "historical": {
                    "FY2023": {"value": "12.3", "source": "direct", "method": "direct"},
                    "FY2024": {"value": "10.1", "source": "calculated", "method": "OCF_minus_CAPEX"}
                },
                "forecast_next_5_years": {
                    "base_year": "2024",
                    "growth_rate_used": "8%",
                    "methodology": "FCF_CAGR",
                    "2025E": "10.9"
                }
            }}),
            SectionKind::FreeCashFlow,
        )
        .unwrap();

        let fcf = fragment.metric("free_cash_flow").unwrap();
        assert_eq!(fcf.len(), 3);
        assert_eq!(fcf.historical_values().len(), 2);
        assert_eq!(
            fcf.get(&PeriodKey::year(2024)).unwrap().method,
            MethodTag::OcfMinusCapex
        );
        assert!(fcf.items[2].is_estimate());
        assert_eq!(fcf.items[0].source, SourceTag::DedicatedFcf);
    }

    #[test]
    fn test_working_capital_fragment_reads_supporting_balances() {
        let fragment = validate(
            json!({
                "tale_of_the_tape": {"change_in_working_capital": {"unit": "$M", "year_wise": {}}},
                "net_working_capital": {"2022": "40", "2023": "46"}
            }),
            SectionKind::WorkingCapital,
        )
        .unwrap();

        assert!(!fragment.covers("change_in_working_capital"));
        let nwc = fragment.metric("net_working_capital").unwrap();
        assert_eq!(nwc.value_at(&PeriodKey::year(2023)), Some(dec!(46)));
    }

    #[test]
    fn test_general_fragment_narrative_sections() {
        let fragment = validate(
            json!({
                "company_summary": {"text": "Maker of widgets", "confidence": "high"},
                "ai_suggestion": {"recommendation": "Buy", "confidence_percent": "72%", "rationale": "Growing"},
                "risk_analysis": {"operational_risks": ["Key person"], "financial_risks": "Leverage"},
                "market_intelligence": {"key_competitors": ["Globex", "-"], "market_size": {"value": "5bn"}}
            }),
            SectionKind::General,
        )
        .unwrap();

        assert_eq!(fragment.description.as_deref(), Some("Maker of widgets"));
        let rec = fragment.recommendation.unwrap();
        assert_eq!(rec.confidence_percent, Some(dec!(72)));
        let risk = fragment.risk_analysis.unwrap();
        assert_eq!(risk.financial_risks, vec!["Leverage"]);
        assert!(risk.market_risks.is_empty());
        let market = fragment.market_intelligence.unwrap();
        assert_eq!(market.key_competitors, vec!["Globex"]);
        assert!(market.market_size.unwrap().contains("5bn"));
    }

    #[test]
    fn test_dedicated_fragment_ignores_header_fields() {
        let fragment = validate(
            json!({"company_name": "Ignored", "capex": {"2023": 55}}),
            SectionKind::Capex,
        )
        .unwrap();
        assert!(fragment.header.company_name.is_none());
        assert_eq!(
            fragment.metric("capex").unwrap().value_at(&PeriodKey::year(2023)),
            Some(dec!(55))
        );
    }

    #[test]
    fn test_canonical_metric_names() {
        assert_eq!(canonical_metric_name("FCF"), "free_cash_flow");
        assert_eq!(canonical_metric_name("Gross Profit"), "gross_profit");
        assert_eq!(canonical_metric_name("EPS"), "earnings_per_share");
    }
}
