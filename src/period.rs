//! Period labels as they appear in extracted documents ("FY23", "2024E", "Q1 2023",
//! "FY2023-24", "Dec-23", ...) parsed into one canonical [`PeriodKey`].
//!
//! The parser is total: a label it cannot understand is kept as a distinct,
//! `non_canonical` key so that no value silently disappears.

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

static FISCAL_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\D)((?:19|20)\d{2})\s*[-/]\s*(\d{2}|(?:19|20)\d{2})(?:\D|$)").unwrap()
});
static QUARTER_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bQ([1-4])\s*[-']?\s*(?:FY|CY)?\s*'?((?:19|20)\d{2}|\d{2})(?:\D|$)").unwrap()
});
static YEAR_FIRST_QUARTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)((?:19|20)\d{2})\s*-?\s*Q([1-4])(?:\D|$)").unwrap());
static NUMERIC_QUARTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([1-4])Q\s*[-']?\s*((?:19|20)\d{2}|\d{2})(?:\D|$)").unwrap());
static FULL_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)((?:19|20)\d{2})(?:\D|$)").unwrap());
static FY_TWO_DIGIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:FY|CY)\s*'?(\d{2})(?:\D|$)").unwrap());
static MONTH_TWO_DIGIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:JAN|FEB|MAR|APR|MAY|JUN|JUL|AUG|SEP|SEPT|OCT|NOV|DEC)[A-Z]*[-\s']+(\d{2})(?:\D|$)")
        .unwrap()
});
static APOSTROPHE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'(\d{2})(?:\D|$)").unwrap());
static ESTIMATE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d\s*[EFBP](?:[^A-Z]|$)").unwrap());
static ESTIMATE_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:EST|ESTIMATE|ESTIMATED|FORECAST|FCST|PROJECTED|PROJECTION|BUDGET|PLAN)\b")
        .unwrap()
});

/// A canonicalized period identifier.
///
/// Two keys are equal when they denote the same canonical period (year and optional
/// quarter); the estimate flag and the original label do not take part in identity.
/// Non-canonical keys are identified by their original label and order after every
/// canonical key.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PeriodKey {
    #[schemars(description = "Calendar or fiscal year the period ends in")]
    pub year: Option<i32>,

    #[schemars(description = "Quarter (1-4) for quarterly periods, absent for full years")]
    pub quarter: Option<u8>,

    #[schemars(description = "True for budget, forecast, projected or estimated periods")]
    pub is_estimate: bool,

    #[schemars(description = "True when the label could not be parsed into a year")]
    pub non_canonical: bool,

    #[schemars(description = "The label exactly as the extractor supplied it")]
    pub unparsed_original: String,
}

impl PeriodKey {
    /// Parses a raw period label. Never fails.
    pub fn parse(label: &str) -> Self {
        let original = label.trim().to_string();
        let upper = original.to_uppercase();

        let Some((year, quarter)) = parse_year_and_quarter(&upper) else {
            return Self::non_canonical(original);
        };

        Self {
            year: Some(year),
            quarter,
            is_estimate: is_estimate_label(&upper),
            non_canonical: false,
            unparsed_original: original,
        }
    }

    pub fn non_canonical(label: impl Into<String>) -> Self {
        Self {
            year: None,
            quarter: None,
            is_estimate: false,
            non_canonical: true,
            unparsed_original: label.into(),
        }
    }

    /// Actual (historical) full-year key.
    pub fn year(year: i32) -> Self {
        Self {
            year: Some(year),
            quarter: None,
            is_estimate: false,
            non_canonical: false,
            unparsed_original: year.to_string(),
        }
    }

    /// Estimated full-year key, labelled `<year>E`.
    pub fn estimate(year: i32) -> Self {
        Self {
            year: Some(year),
            quarter: None,
            is_estimate: true,
            non_canonical: false,
            unparsed_original: format!("{}E", year),
        }
    }

    /// Re-derives the key from its original label. Parsing the same label always
    /// yields the same key, which makes canonicalization idempotent.
    pub fn canonicalize(&self) -> Self {
        Self::parse(&self.unparsed_original)
    }

    pub fn is_canonical(&self) -> bool {
        !self.non_canonical && self.year.is_some()
    }

    /// Canonical display label: `2023`, `2023E`, `2023Q1`, `2023Q1E`, or the original
    /// label for non-canonical keys.
    pub fn label(&self) -> String {
        match (self.non_canonical, self.year) {
            (false, Some(year)) => {
                let mut out = year.to_string();
                if let Some(q) = self.quarter {
                    out.push_str(&format!("Q{}", q));
                }
                if self.is_estimate {
                    out.push('E');
                }
                out
            }
            _ => self.unparsed_original.clone(),
        }
    }

    fn identity(&self) -> (u8, i32, u8, &str) {
        match (self.non_canonical, self.year) {
            (false, Some(year)) => (0, year, self.quarter.unwrap_or(5), ""),
            _ => (1, 0, 0, self.unparsed_original.as_str()),
        }
    }
}

impl PartialEq for PeriodKey {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for PeriodKey {}

impl Hash for PeriodKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for PeriodKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeriodKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

fn parse_year_and_quarter(upper: &str) -> Option<(i32, Option<u8>)> {
    if upper.is_empty() {
        return None;
    }

    // Fiscal spans such as "FY2023-24" end in their second year.
    if let Some(caps) = FISCAL_SPAN.captures(upper) {
        let start: i32 = caps[1].parse().ok()?;
        let end = expand_span_end(start, &caps[2])?;
        if end == start + 1 {
            return Some((end, None));
        }
    }

    if let Some(caps) = QUARTER_FIRST.captures(upper) {
        let quarter: u8 = caps[1].parse().ok()?;
        return Some((expand_year(&caps[2])?, Some(quarter)));
    }
    if let Some(caps) = YEAR_FIRST_QUARTER.captures(upper) {
        let quarter: u8 = caps[2].parse().ok()?;
        return Some((caps[1].parse().ok()?, Some(quarter)));
    }
    if let Some(caps) = NUMERIC_QUARTER.captures(upper) {
        let quarter: u8 = caps[1].parse().ok()?;
        return Some((expand_year(&caps[2])?, Some(quarter)));
    }

    let years: Vec<i32> = FULL_YEAR
        .captures_iter(upper)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    if let Some(first) = years.first() {
        // "2022 vs 2023" names two periods at once; keep it rather than guess.
        if years.iter().any(|y| y != first) {
            return None;
        }
        return Some((*first, None));
    }

    for pattern in [&*FY_TWO_DIGIT, &*MONTH_TWO_DIGIT, &*APOSTROPHE_YEAR] {
        if let Some(caps) = pattern.captures(upper) {
            return Some((expand_year(&caps[1])?, None));
        }
    }

    None
}

/// Two-digit years pivot at 50: `23` → 2023, `98` → 1998.
fn expand_year(digits: &str) -> Option<i32> {
    let value: i32 = digits.parse().ok()?;
    if digits.len() == 4 {
        return Some(value);
    }
    Some(if value <= 50 { 2000 + value } else { 1900 + value })
}

fn expand_span_end(start: i32, digits: &str) -> Option<i32> {
    let value: i32 = digits.parse().ok()?;
    if digits.len() == 4 {
        return Some(value);
    }
    let mut end = (start / 100) * 100 + value;
    if end < start {
        end += 100;
    }
    Some(end)
}

fn is_estimate_label(upper: &str) -> bool {
    ESTIMATE_SUFFIX.is_match(upper) || ESTIMATE_WORD.is_match(upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_year_variants_share_one_key() {
        let labels = ["2023", "FY23", "FY 2023", "CY 2023", "FY2023", "2023A", "Dec-23"];
        for label in labels {
            let key = PeriodKey::parse(label);
            assert!(key.is_canonical(), "{} should be canonical", label);
            assert_eq!(key.year, Some(2023), "{}", label);
            assert!(!key.is_estimate, "{} is an actual", label);
            assert_eq!(key, PeriodKey::year(2023));
        }
    }

    #[test]
    fn test_estimate_markers() {
        for label in ["2023E", "FY24B", "2025F", "FY26P", "2027 Budget", "2028 (forecast)"] {
            let key = PeriodKey::parse(label);
            assert!(key.is_estimate, "{} should be an estimate", label);
            assert!(key.is_canonical());
        }
        assert!(!PeriodKey::parse("FY2023").is_estimate);
    }

    #[test]
    fn test_quarters() {
        let q = PeriodKey::parse("Q1 2023");
        assert_eq!((q.year, q.quarter), (Some(2023), Some(1)));

        let q = PeriodKey::parse("1Q23");
        assert_eq!((q.year, q.quarter), (Some(2023), Some(1)));

        let q = PeriodKey::parse("2023Q3E");
        assert_eq!((q.year, q.quarter, q.is_estimate), (Some(2023), Some(3), true));

        assert!(PeriodKey::parse("Q4 2023") < PeriodKey::parse("FY2023"));
    }

    #[test]
    fn test_fiscal_span_ends_in_second_year() {
        assert_eq!(PeriodKey::parse("FY2023-24").year, Some(2024));
        assert_eq!(PeriodKey::parse("1999/00").year, Some(2000));
        assert_eq!(PeriodKey::parse("2022/2023").year, Some(2023));
    }

    #[test]
    fn test_unparsable_label_is_kept() {
        let key = PeriodKey::parse("Latest twelve months");
        assert!(key.non_canonical);
        assert_eq!(key.label(), "Latest twelve months");
        assert!(key > PeriodKey::year(2099));

        assert!(PeriodKey::parse("2022 vs 2023").non_canonical);
        assert!(PeriodKey::parse("").non_canonical);
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        for label in ["FY23", "2024E", "Q2 FY25", "LTM", "FY2023-24"] {
            let once = PeriodKey::parse(label);
            let twice = once.canonicalize();
            assert_eq!(once, twice);
            assert_eq!(once.is_estimate, twice.is_estimate);
            assert_eq!(once.unparsed_original, twice.unparsed_original);
        }
    }

    #[test]
    fn test_labels() {
        assert_eq!(PeriodKey::parse("FY23").label(), "2023");
        assert_eq!(PeriodKey::parse("FY24B").label(), "2024E");
        assert_eq!(PeriodKey::estimate(2026).label(), "2026E");
        assert_eq!(PeriodKey::parse("Q2 2024").label(), "2024Q2");
    }
}
