//! Validation of untrusted generation output.
//!
//! The backend is asked for one JSON object. Anything else is rejected
//! with [`Error::GenerationInvalidOutput`]; the only leniency is a single
//! Markdown code fence around the object.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use takeoff_core::{DerivedItemSuggestion, Error, Formula, NewSuggestion, Result};

/// Maximum accepted length of the reasoning summary in characters.
pub const MAX_REASONING_CHARS: usize = 2000;

/// Maximum derived items per suggestion.
pub const MAX_DERIVED_ITEMS: usize = 32;

/// Classification as returned by the generation backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratedClassification {
    #[serde(default)]
    pub suggested_commodity_code: Option<String>,
    #[serde(default)]
    pub suggested_pricing_code: Option<String>,
    #[serde(default)]
    pub derived_items: Vec<DerivedItemSuggestion>,
    pub reasoning_summary: String,
}

fn code_pattern() -> &'static Regex {
    static CODE: OnceLock<Regex> = OnceLock::new();
    CODE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9 ._/\-]{0,63}$").expect("code regex is valid")
    })
}

fn unit_pattern() -> &'static Regex {
    static UNIT: OnceLock<Regex> = OnceLock::new();
    UNIT.get_or_init(|| Regex::new(r"^[A-Za-z0-9²³/ .\-]{1,16}$").expect("unit regex is valid"))
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::GenerationInvalidOutput(msg.into())
}

/// Remove one enclosing Markdown code fence, if present.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json"), which may run straight into the body
    let body = body.trim_start();
    let info_len = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(body.len());
    body[info_len..].trim()
}

fn normalize_code(field: &str, code: Option<String>) -> Result<Option<String>> {
    let Some(code) = code else {
        return Ok(None);
    };
    let code = code.trim();
    if code.is_empty() {
        return Ok(None);
    }
    if !code_pattern().is_match(code) {
        return Err(invalid(format!("{field} has invalid syntax: {code:?}")));
    }
    Ok(Some(code.to_string()))
}

fn validate_derived_item(index: usize, item: DerivedItemSuggestion) -> Result<DerivedItemSuggestion> {
    let commodity = normalize_code("derived_commodity_code", Some(item.derived_commodity_code))?
        .ok_or_else(|| invalid(format!("derived_items[{index}] has no commodity code")))?;
    let pricing = normalize_code("derived_pricing_code", item.derived_pricing_code)?;

    let formula = item.quantity_formula.trim().to_string();
    Formula::parse(&formula)
        .map_err(|e| invalid(format!("derived_items[{index}] quantity_formula: {e}")))?;

    let unit = item.quantity_unit.trim().to_string();
    if !unit_pattern().is_match(&unit) {
        return Err(invalid(format!(
            "derived_items[{index}] has invalid quantity_unit: {unit:?}"
        )));
    }

    Ok(DerivedItemSuggestion {
        derived_commodity_code: commodity,
        derived_pricing_code: pricing,
        quantity_formula: formula,
        quantity_unit: unit,
    })
}

/// Parse and validate raw backend output.
pub fn parse_generated(raw: &str) -> Result<GeneratedClassification> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(invalid("empty response"));
    }
    let parsed: GeneratedClassification =
        serde_json::from_str(body).map_err(|e| invalid(format!("not a valid suggestion object: {e}")))?;

    let suggested_commodity_code =
        normalize_code("suggested_commodity_code", parsed.suggested_commodity_code)?;
    let suggested_pricing_code =
        normalize_code("suggested_pricing_code", parsed.suggested_pricing_code)?;

    if parsed.derived_items.len() > MAX_DERIVED_ITEMS {
        return Err(invalid(format!(
            "too many derived items: {}",
            parsed.derived_items.len()
        )));
    }
    let derived_items = parsed
        .derived_items
        .into_iter()
        .enumerate()
        .map(|(i, item)| validate_derived_item(i, item))
        .collect::<Result<Vec<_>>>()?;

    let reasoning_summary = parsed.reasoning_summary.trim().to_string();
    if reasoning_summary.is_empty() {
        return Err(invalid("reasoning_summary is empty"));
    }
    if reasoning_summary.chars().count() > MAX_REASONING_CHARS {
        return Err(invalid("reasoning_summary is too long"));
    }

    if suggested_commodity_code.is_none()
        && suggested_pricing_code.is_none()
        && derived_items.is_empty()
    {
        return Err(invalid("no code and no derived item suggested"));
    }

    Ok(GeneratedClassification {
        suggested_commodity_code,
        suggested_pricing_code,
        derived_items,
        reasoning_summary,
    })
}

/// Validate backend output and turn it into a suggestion request for `fingerprint`.
pub fn parse_suggestion(raw: &str, fingerprint: Option<&str>) -> Result<NewSuggestion> {
    let generated = parse_generated(raw)?;
    Ok(NewSuggestion {
        pattern_fingerprint: fingerprint.map(str::to_string),
        suggested_commodity_code: generated.suggested_commodity_code,
        suggested_pricing_code: generated.suggested_pricing_code,
        derived_items: generated.derived_items,
        reasoning_summary: generated.reasoning_summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "suggested_commodity_code": "23-31 13 11",
        "suggested_pricing_code": "HVAC-DUCT-GALV",
        "derived_items": [
            {
                "derived_commodity_code": "23-07 13",
                "quantity_formula": "lengthMm * (widthMm + heightMm) * 2 / 1000000",
                "quantity_unit": "m2"
            }
        ],
        "reasoning_summary": "Galvanized rectangular supply duct, insulated indoors."
    }"#;

    fn assert_invalid(raw: &str) {
        match parse_suggestion(raw, Some("fp")) {
            Err(Error::GenerationInvalidOutput(_)) => {}
            other => panic!("expected GenerationInvalidOutput, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_output() {
        let s = parse_suggestion(VALID, Some("fp")).unwrap();
        assert_eq!(s.pattern_fingerprint.as_deref(), Some("fp"));
        assert_eq!(s.suggested_commodity_code.as_deref(), Some("23-31 13 11"));
        assert_eq!(s.derived_items.len(), 1);
        assert!(s.derived_items[0].derived_pricing_code.is_none());
    }

    #[test]
    fn test_fenced_output_accepted() {
        let fenced = format!("```json\n{VALID}\n```");
        assert!(parse_suggestion(&fenced, None).is_ok());
        let bare_fence = format!("```\n{VALID}\n```");
        assert!(parse_suggestion(&bare_fence, None).is_ok());
    }

    #[test]
    fn test_single_line_fence_accepted() {
        let s = parse_suggestion(
            r#"```json{"suggested_commodity_code":"A1","reasoning_summary":"ok"}```"#,
            None,
        )
        .unwrap();
        assert_eq!(s.suggested_commodity_code.as_deref(), Some("A1"));

        let untagged = r#"```{"suggested_commodity_code":"A1","reasoning_summary":"ok"}```"#;
        assert!(parse_suggestion(untagged, None).is_ok());
        let spaced = r#"``` json {"suggested_commodity_code":"A1","reasoning_summary":"ok"} ```"#;
        assert!(parse_suggestion(spaced, None).is_ok());
    }

    #[test]
    fn test_brace_on_fence_line_kept() {
        let s = parse_suggestion(
            "```{\n\"suggested_commodity_code\": \"A1\",\n\"reasoning_summary\": \"ok\"\n}\n```",
            None,
        )
        .unwrap();
        assert_eq!(s.suggested_commodity_code.as_deref(), Some("A1"));
    }

    #[test]
    fn test_not_json_rejected() {
        assert_invalid("not json");
        assert_invalid("");
        assert_invalid("Here you go: {\"reasoning_summary\": \"x\"}");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert_invalid(r#"{"suggested_commodity_code":"A1","reasoning_summary":"x","confidence":0.9}"#);
        assert_invalid(
            r#"{"derived_items":[{"derived_commodity_code":"A","quantity_formula":"1","quantity_unit":"ea","extra":1}],"reasoning_summary":"x"}"#,
        );
    }

    #[test]
    fn test_empty_reasoning_rejected() {
        assert_invalid(r#"{"suggested_commodity_code":"A1","reasoning_summary":"   "}"#);
    }

    #[test]
    fn test_requires_code_or_derived_item() {
        assert_invalid(r#"{"suggested_commodity_code":"","reasoning_summary":"nothing fits"}"#);
        let pricing_only = r#"{"suggested_pricing_code":"P-7","reasoning_summary":"priced only"}"#;
        assert!(parse_suggestion(pricing_only, None).is_ok());
    }

    #[test]
    fn test_code_syntax_checked() {
        assert_invalid(r#"{"suggested_commodity_code":"DROP TABLE; --","reasoning_summary":"x"}"#);
        assert_invalid(r#"{"suggested_commodity_code":"-leading","reasoning_summary":"x"}"#);
    }

    #[test]
    fn test_bad_formula_rejected() {
        assert_invalid(
            r#"{"derived_items":[{"derived_commodity_code":"A","quantity_formula":"depth_mm * 2","quantity_unit":"m"}],"reasoning_summary":"x"}"#,
        );
        assert_invalid(
            r#"{"derived_items":[{"derived_commodity_code":"A","quantity_formula":"length_mm *","quantity_unit":"m"}],"reasoning_summary":"x"}"#,
        );
    }

    #[test]
    fn test_trailing_fence_only_is_not_stripped() {
        assert_invalid(&format!("{VALID}\n```"));
    }
}
