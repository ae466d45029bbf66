//! Fixed currency lookup table: three-letter code to display glyph, plus the inverse
//! detection used when a glyph or code is embedded in a value's text.

const CURRENCY_SYMBOLS: &[(&str, &str)] = &[
    ("USD", "$"),
    ("EUR", "€"),
    ("GBP", "£"),
    ("JPY", "¥"),
    ("CNY", "¥"),
    ("INR", "₹"),
    ("KRW", "₩"),
    ("RUB", "₽"),
    ("TRY", "₺"),
    ("ILS", "₪"),
    ("NGN", "₦"),
    ("PHP", "₱"),
    ("VND", "₫"),
    ("THB", "฿"),
    ("BRL", "R$"),
    ("AUD", "A$"),
    ("CAD", "C$"),
    ("NZD", "NZ$"),
    ("HKD", "HK$"),
    ("SGD", "S$"),
    ("MXN", "Mex$"),
    ("ZAR", "R"),
    ("CHF", "CHF"),
    ("SEK", "kr"),
    ("NOK", "kr"),
    ("DKK", "kr"),
    ("PLN", "zł"),
    ("AED", "AED"),
    ("SAR", "SAR"),
];

/// Glyphs checked longest first so `NZ$` wins over `$`.
const DETECTABLE_GLYPHS: &[&str] = &[
    "Mex$", "NZ$", "HK$", "R$", "A$", "C$", "S$", "$", "€", "£", "¥", "₹", "₩", "₽", "₺", "₪",
    "₦", "₱", "₫", "฿",
];

/// Maps a currency code to its display glyph. Unknown codes pass through unchanged.
pub fn resolve_symbol(code: &str) -> String {
    let normalized = code.trim().to_uppercase();
    CURRENCY_SYMBOLS
        .iter()
        .find(|(c, _)| *c == normalized)
        .map(|(_, symbol)| symbol.to_string())
        .unwrap_or_else(|| code.trim().to_string())
}

/// Reverse lookup used when the extractor returned a glyph instead of a code.
/// Ambiguous glyphs resolve to the first code in the table (`$` → USD, `¥` → JPY).
pub fn code_for_symbol(symbol: &str) -> Option<&'static str> {
    CURRENCY_SYMBOLS
        .iter()
        .find(|(_, s)| *s == symbol.trim())
        .map(|(code, _)| *code)
}

/// Finds a currency glyph or a known three-letter code inside free text such as
/// `"$1.2M"`, `"USD 40m"` or `"(€3.5)"`. Codes are reported as their glyph.
pub fn detect_symbol(text: &str) -> Option<String> {
    if let Some(glyph) = DETECTABLE_GLYPHS.iter().find(|g| text.contains(**g)) {
        return Some(glyph.to_string());
    }

    let upper = text.to_uppercase();
    upper
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|token| token.len() == 3)
        .find_map(|token| {
            CURRENCY_SYMBOLS
                .iter()
                .find(|(code, _)| *code == token)
                .map(|(_, symbol)| symbol.to_string())
        })
}

/// Prepends `symbol` to `text` unless it is already there, before or after a sign.
pub fn prefix_symbol(text: &str, symbol: &str) -> String {
    let trimmed = text.trim();
    if symbol.is_empty() || trimmed.contains(symbol) {
        return trimmed.to_string();
    }
    match trimmed.strip_prefix('-') {
        Some(rest) => format!("-{}{}", symbol, rest),
        None => format!("{}{}", symbol, trimmed),
    }
}
