//! Recovers the verdict object from whatever text the tool produced.
//!
//! JSON-shaped tiers are tried first (fenced block, whole text, outer braces,
//! anchored object scan); a Markdown label scan is the last resort.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::decoder::strip_ansi;
use super::error::{PipelineError, PipelineResult};
use super::record::{ANCHOR_FIELD, MAX_CATALYSTS};

const MAX_CATALYST_CHARS: usize = 200;

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)```").expect("fence regex"));
static FENCE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json|JSON)?").expect("fence marker regex"));
static GREEDY_ANCHORED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)\{.*"sentiment".*\}"#).expect("anchored regex"));

static SENTIMENT_LABEL: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"(?i)\*\*SENTIMENT:?\*\*:?\s*(\w+)").expect("sentiment regex"),
        Regex::new(r#"(?i)sentiment["\s]*:\s*"?(\w+)"#).expect("sentiment regex"),
        Regex::new(r#"(?i)"sentiment"\s*:\s*"(\w+)""#).expect("sentiment regex"),
    ]
});
static SCORE_LABEL: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"\((-?\d+)/100\)").expect("score regex"),
        Regex::new(r#"(?i)score["\s*]*:[\s*"]*(-?\d+)"#).expect("score regex"),
        Regex::new(r#"(?i)"score"\s*:\s*(-?\d+)"#).expect("score regex"),
    ]
});
static RISK_LABEL: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"(?i)\*\*RISK[_ ]LEVEL:?\*\*:?\s*(\w+)").expect("risk regex"),
        Regex::new(r#"(?i)risk[_\s]*level["\s]*:\s*"?(\w+)"#).expect("risk regex"),
        Regex::new(r#"(?i)"risk_level"\s*:\s*"(\w+)""#).expect("risk regex"),
    ]
});
static SUMMARY_LABEL: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"(?is)\*\*SUMMARY:?\*\*:?\s*(.+)$").expect("summary regex"),
        Regex::new(r#"(?i)summary["\s]*:\s*([^\n]+)"#).expect("summary regex"),
        Regex::new(r#"(?i)"summary"\s*:\s*"([^"]+)""#).expect("summary regex"),
    ]
});
static BULLET_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*[-*+]\s+(.+?)\s*$").expect("bullet regex"));
static CATALYST_ARRAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)"catalysts"\s*:\s*\[(.*?)\]"#).expect("catalyst regex"));

/// Returns the recovered object (always a JSON object), or
/// `NoRecoverablePayload` when no tier finds anything.
pub fn extract(text: &str) -> PipelineResult<Value> {
    let text = strip_ansi(text);
    if text.trim().is_empty() {
        return Err(PipelineError::NoRecoverablePayload("empty candidate".into()));
    }

    if let Some(value) = extract_json(&text) {
        return Ok(value);
    }
    if let Some(value) = extract_markdown_fields(&text) {
        debug!("verdict recovered from markdown labels");
        return Ok(value);
    }
    Err(PipelineError::NoRecoverablePayload(format!(
        "no JSON object or sentiment label in {} chars",
        text.len()
    )))
}

fn extract_json(text: &str) -> Option<Value> {
    // 1. fenced code block
    for caps in FENCED_BLOCK.captures_iter(text) {
        if let Some(value) = parse_object(&caps[1]) {
            debug!("verdict recovered from fenced block");
            return Some(value);
        }
    }

    // 2. the text itself
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
            return Some(value);
        }
    }

    let cleaned = cleanup(trimmed);
    for candidate in [trimmed, cleaned.as_str()] {
        // 2b. whole text after cleanup, including double-encoded strings
        if let Some(value) = parse_object(candidate) {
            return Some(value);
        }
        // 3. outermost braces
        if let Some(value) = outer_braces(candidate).and_then(parse_object) {
            debug!("verdict recovered from brace span");
            return Some(value);
        }
    }

    // 4. anchored object: balanced scan, then greedy match
    for candidate in [trimmed, cleaned.as_str()] {
        if let Some(value) = balanced_objects(candidate)
            .into_iter()
            .filter(|span| span.contains(ANCHOR_FIELD))
            .find_map(|span| parse_object(span).and_then(anchored))
        {
            debug!("verdict recovered from anchored object scan");
            return Some(value);
        }
    }
    for candidate in [trimmed, cleaned.as_str()] {
        if let Some(value) = GREEDY_ANCHORED
            .find(candidate)
            .and_then(|m| parse_object(m.as_str()))
            .and_then(anchored) {
            return Some(value);
        }
    }
    None
}

/// Parses `s` as a JSON object, retrying once on the cleaned-up form and
/// unwrapping a JSON string that itself contains an object.
fn parse_object(s: &str) -> Option<Value> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(s) {
        Ok(value @ Value::Object(_)) => return Some(value),
        Ok(Value::String(inner)) if inner.trim_start().starts_with('{') => {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(inner.trim()) {
                return Some(value);
            }
        }
        _ => {}
    }

    let cleaned = cleanup(s);
    if cleaned == s {
        return None;
    }
    // unescaped `\n` can leave raw newlines inside string values
    [cleaned.clone(), cleaned.replace(['\r', '\n'], " ")]
        .iter()
        .find_map(|c| match serde_json::from_str::<Value>(c) {
            Ok(value @ Value::Object(_)) => Some(value),
            _ => None,
        })
}

fn anchored(value: Value) -> Option<Value> {
    value.get(ANCHOR_FIELD).is_some().then_some(value)
}

/// Undoes shell and fence artifacts: leftover ``` markers, one enclosing pair of
/// quotes, `\"` and `\n` escapes.
pub fn cleanup(text: &str) -> String {
    let mut cleaned = FENCE_MARKER.replace_all(text, "").trim().to_string();
    if cleaned.len() >= 2 && cleaned.starts_with('"') && cleaned.ends_with('"') {
        cleaned = cleaned[1..cleaned.len() - 1].to_string();
    }
    cleaned.replace("\\\"", "\"").replace("\\n", "\n").trim().to_string()
}

fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Every balanced `{...}` span, in order of their opening brace. Braces inside
/// JSON strings are skipped.
fn balanced_objects(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    for (start, _) in text.match_indices('{') {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (offset, &b) in bytes[start..].iter().enumerate() {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        spans.push(&text[start..=start + offset]);
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    spans
}

/// Scans prose for labelled fields. Yields nothing unless a sentiment label is
/// present.
pub fn extract_markdown_fields(text: &str) -> Option<Value> {
    let sentiment = first_capture(&*SENTIMENT_LABEL, text)?;

    let mut fields = Map::new();
    fields.insert("sentiment".into(), json!(sentiment.to_uppercase()));

    if let Some(score) = first_capture(&*SCORE_LABEL, text).and_then(|s| s.parse::<i64>().ok()) {
        fields.insert("score".into(), json!(score));
    }
    if let Some(risk) = first_capture(&*RISK_LABEL, text) {
        fields.insert("risk_level".into(), json!(risk.to_uppercase()));
    }
    if let Some(summary) = first_capture(&*SUMMARY_LABEL, text) {
        fields.insert("summary".into(), json!(summary.trim().replace('"', "")));
    }

    let mut catalysts: Vec<String> = BULLET_LINE
        .captures_iter(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|c| !c.is_empty())
        .map(|c| c.chars().take(MAX_CATALYST_CHARS).collect())
        .collect();
    if let Some(caps) = CATALYST_ARRAY.captures(text) {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&format!("[{}]", &caps[1])) {
            catalysts.extend(items.into_iter().filter_map(|c| c.as_str().map(str::to_string)));
        }
    }
    catalysts.truncate(MAX_CATALYSTS);
    fields.insert("catalysts".into(), json!(catalysts));

    Some(Value::Object(fields))
}

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.captures(text).map(|caps| caps[1].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict() -> Value {
        json!({
            "sentiment": "BEARISH",
            "score": -25,
            "catalysts": ["Bitcoin decline", "Fed hawkish"],
            "risk_level": "HIGH",
            "summary": "Market sentiment is negative due to {risk-off} flows"
        })
    }

    #[test]
    fn recovers_plain_object() {
        let text = verdict().to_string();
        assert_eq!(extract(&text).unwrap(), verdict());
    }

    #[test]
    fn recovers_object_inside_prose_fences_and_ansi() {
        let body = serde_json::to_string_pretty(&verdict()).unwrap();
        let wrapped = [
            format!("Here is my analysis:\n```json\n{}\n```\nLet me know!", body),
            format!("```\n{}\n```", body),
            format!("Sure! {} Hope this helps.", body),
            format!("\x1b[1m\x1b[32m{}\x1b[0m", body),
            format!("Result:\n\x1b[2K{}\n\x1b[0mDone.", verdict()),
        ];
        for text in wrapped {
            assert_eq!(extract(&text).unwrap(), verdict(), "failed on: {}", text);
        }
    }

    #[test]
    fn recovers_first_of_a_duplicated_emission() {
        let text = format!("{}\n{}", verdict(), verdict());
        assert_eq!(extract(&text).unwrap(), verdict());

        let text = format!(
            "{{\"note\":\"preamble\"}} then {} and trailing {{oops",
            verdict()
        );
        assert_eq!(extract(&text).unwrap(), verdict());
    }

    #[test]
    fn undoes_double_stringification() {
        let encoded = serde_json::to_string(&verdict().to_string()).unwrap();
        assert!(encoded.starts_with("\"{\\\""));
        assert_eq!(extract(&encoded).unwrap(), verdict());

        let shell_escaped = r#""{\"sentiment\":\"BULLISH\",\"score\":10,\"summary\":\"a\nb\"}""#;
        let value = extract(shell_escaped).unwrap();
        assert_eq!(value["sentiment"], "BULLISH");
        assert_eq!(value["score"], 10);
    }

    #[test]
    fn finds_verdict_inside_escaped_event_log() {
        let log = concat!(
            "{\"type\":\"say\",\"say\":\"reasoning\",\"content\":\"thinking {deeply}\"}\n",
            "{\"type\":\"completion_result\",\"content\":\"{\\\"sentiment\\\":\\\"NEUTRAL\\\",\\\"score\\\":5}\"}\n"
        );
        let value = extract(log).unwrap();
        assert_eq!(value["sentiment"], "NEUTRAL");
        assert_eq!(value["score"], 5);
    }

    #[test]
    fn cleanup_strips_artifacts() {
        assert_eq!(cleanup("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(cleanup(r#""{\"a\":\"x\"}""#), r#"{"a":"x"}"#);
    }

    #[test]
    fn markdown_labels_are_the_last_resort() {
        let report = "\
**SENTIMENT:** Bearish (-40/100)
**RISK LEVEL:** high

Key drivers:
- Hawkish Fed minutes
* Oil spike
+ Weak retail sales

**SUMMARY:** Risk-off tone across \"indices\".";
        let value = extract(report).unwrap();
        assert_eq!(value["sentiment"], "BEARISH");
        assert_eq!(value["score"], -40);
        assert_eq!(value["risk_level"], "HIGH");
        assert_eq!(
            value["catalysts"],
            json!(["Hawkish Fed minutes", "Oil spike", "Weak retail sales"])
        );
        assert_eq!(value["summary"], "Risk-off tone across indices.");
    }

    #[test]
    fn markdown_catalysts_are_capped() {
        let mut text = String::from("sentiment: bullish\n");
        for i in 0..8 {
            text.push_str(&format!("- catalyst {} {}\n", i, "x".repeat(300)));
        }
        let value = extract_markdown_fields(&text).unwrap();
        let catalysts = value["catalysts"].as_array().unwrap();
        assert_eq!(catalysts.len(), 5);
        assert!(catalysts
            .iter()
            .all(|c| c.as_str().unwrap().chars().count() == 200));
    }

    #[test]
    fn label_colon_and_quoted_fragments() {
        let value = extract_markdown_fields("Sentiment: neutral\nscore: 12\nrisk level: low").unwrap();
        assert_eq!(value["sentiment"], "NEUTRAL");
        assert_eq!(value["score"], 12);
        assert_eq!(value["risk_level"], "LOW");

        let broken = r#"{"sentiment": "bullish", "score": 30, "catalysts": ["ETF inflows", "Rate cut"], oops"#;
        let value = extract(broken).unwrap();
        assert_eq!(value["sentiment"], "BULLISH");
        assert_eq!(value["catalysts"], json!(["ETF inflows", "Rate cut"]));
    }

    #[test]
    fn prose_without_label_colon_is_not_a_verdict() {
        for text in [
            "Overall market sentiment is hard to judge today.",
            "Sentiment looks bullish but the risk level seems high.",
            "The score improved and the summary follows later.",
        ] {
            assert!(extract_markdown_fields(text).is_none(), "matched: {}", text);
            assert!(
                matches!(extract(text), Err(PipelineError::NoRecoverablePayload(_))),
                "recovered from: {}",
                text
            );
        }

        let value = extract_markdown_fields(
            "Market sentiment is mixed.\nSentiment: bearish\nThe score moved.\nScore: -15",
        )
        .unwrap();
        assert_eq!(value["sentiment"], "BEARISH");
        assert_eq!(value["score"], -15);
        assert!(value.get("risk_level").is_none());
    }

    #[test]
    fn nothing_recoverable() {
        assert!(matches!(
            extract("The model timed out before answering."),
            Err(PipelineError::NoRecoverablePayload(_))
        ));
        assert!(matches!(extract("   "), Err(PipelineError::NoRecoverablePayload(_))));
        assert!(extract_markdown_fields("- a bullet\n- another").is_none());
    }
}
