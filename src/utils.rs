use crate::currency::detect_symbol;
use crate::schema::{Scale, Unit};
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::LazyLock;

/// Tokens extractors use in place of a number.
pub const DEFAULT_PLACEHOLDER_TOKENS: [&str; 12] = [
    "-", "--", "—", "–", "n/a", "na", "n.a.", "null", "none", "not_found", "tbd", "nm",
];

static BILLIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^a-z])(?:b|bn|bln|billion|billions)(?:[^a-z]|$)").unwrap()
});
static MILLIONS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^a-z])(?:m|mm|mn|mln|mio|million|millions)(?:[^a-z]|$)").unwrap()
});
static THOUSANDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^a-z])(?:k|th|thousand|thousands)(?:[^a-z]|$)|'000|000s").unwrap()
});
static UNITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^a-z])(?:units|absolute|actual)(?:[^a-z]|$)").unwrap());

/// Parses a number the way accounting documents write it: thousands separators are
/// dropped, `(12.5)` is negative, glyphs and magnitude words around the digits are
/// ignored. Returns `None` for placeholders, empty strings, and text with no digits.
pub fn parse_decimal_text(text: &str, placeholders: &[String]) -> Option<Decimal> {
    let trimmed = text.trim();
    if trimmed.is_empty() || is_placeholder(trimmed, placeholders) {
        return None;
    }

    let mut body = trimmed;
    let mut negative = false;
    if body.starts_with('(') && body.ends_with(')') && body.len() > 2 {
        negative = true;
        body = &body[1..body.len() - 1];
    }

    let cleaned: String = body
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    // A minus sign is only meaningful in front of the digits.
    let (sign, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest.replace('-', "")),
        None => (false, cleaned.replace('-', "")),
    };

    let mut value = Decimal::from_str(&digits).ok()?;
    if sign {
        value = -value;
    }
    if negative {
        value = -value.abs();
    }
    Some(value)
}

pub fn is_placeholder(text: &str, placeholders: &[String]) -> bool {
    let lowered = text.trim().to_lowercase();
    placeholders.iter().any(|token| *token == lowered)
}

pub fn default_placeholders() -> Vec<String> {
    DEFAULT_PLACEHOLDER_TOKENS
        .iter()
        .map(|token| token.to_string())
        .collect()
}

/// Detects the magnitude declared in a value or unit label.
pub fn detect_scale(text: &str) -> Scale {
    let lowered = text.to_lowercase();
    if lowered.contains('%') || lowered.contains("percent") {
        Scale::Percent
    } else if BILLIONS.is_match(&lowered) {
        Scale::Billions
    } else if MILLIONS.is_match(&lowered) {
        Scale::Millions
    } else if THOUSANDS.is_match(&lowered) {
        Scale::Thousands
    } else if UNITS.is_match(&lowered) {
        Scale::Units
    } else {
        Scale::Unlabeled
    }
}

/// Reads a unit label such as `"$M"`, `"USD millions"`, `"%"` or `"€ in thousands"`.
pub fn parse_unit_label(label: &str) -> Unit {
    let scale = detect_scale(label);
    let currency = match scale {
        Scale::Percent => None,
        _ => detect_symbol(label),
    };
    Unit { currency, scale }
}

/// Metrics expressed as ratios rather than money.
pub fn is_percentage_metric(metric: &str) -> bool {
    let lowered = metric.to_lowercase();
    lowered.ends_with("_percent") || lowered.contains("margin") || lowered.contains("growth")
}

/// Per-share figures are neither rescaled to millions nor treated as percentages.
pub fn is_per_share_metric(metric: &str) -> bool {
    let lowered = metric.to_lowercase();
    lowered.contains("per_share") || lowered == "eps"
}

/// Cuts text to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Formats a growth rate fraction as a percentage string, e.g. `0.1` → `10%`.
pub fn format_percent(rate: Decimal) -> String {
    match rate.checked_mul(Decimal::ONE_HUNDRED) {
        Some(percent) => format!("{}%", percent.round_dp(2).normalize()),
        None => format!("{}x", rate.round_dp(2).normalize()),
    }
}
