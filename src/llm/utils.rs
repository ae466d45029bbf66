use crate::error::{DealRecordError, Result};
use crate::fragment::SectionKind;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static THINK_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<think>.*?</think>").unwrap());
static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").unwrap());

/// Strips reasoning blocks and markdown fences, then cuts to the outermost object.
pub fn clean_json_output(content: &str) -> String {
    let without_think = THINK_BLOCK.replace_all(content, "");
    let unfenced = match CODE_FENCE.captures(&without_think) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()).to_string(),
        None => without_think.to_string(),
    };
    let trimmed = unfenced.trim();

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => trimmed[start..=end].to_string(),
        _ => trimmed.to_string(),
    }
}

pub fn parse_json_output(content: &str, section: SectionKind) -> Result<Value> {
    let cleaned = clean_json_output(content);
    serde_json::from_str(&cleaned).map_err(|e| DealRecordError::ExtractionFailure {
        section: section.to_string(),
        reason: format!("model returned invalid JSON: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_fences_and_think_blocks() {
        let raw = "<think>the table says FY23</think>\n```json\n{\"company_name\": \"Acme\"}\n```";
        assert_eq!(clean_json_output(raw), "{\"company_name\": \"Acme\"}");
    }

    #[test]
    fn test_cuts_surrounding_prose() {
        let raw = "Here is the data: {\"a\": {\"b\": 1}} hope this helps";
        assert_eq!(clean_json_output(raw), "{\"a\": {\"b\": 1}}");
    }

    #[test]
    fn test_parse_failure_names_section() {
        match parse_json_output("no json here", SectionKind::Capex) {
            Err(DealRecordError::ExtractionFailure { section, .. }) => {
                assert_eq!(section, SectionKind::Capex.to_string())
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
