use serde_json::Value;
use tracing::warn;

use super::error::{PipelineError, PipelineResult};
use super::record::{RiskLevel, Sentiment, SentimentRecord, DEFAULT_SUMMARY, MAX_CATALYSTS};

/// Normalizes any recovered value into a complete verdict. Never fails: each
/// field that is missing or malformed falls back to its default independently.
pub fn normalize(raw: &Value) -> SentimentRecord {
    if let Err(e) = check_schema(raw) {
        warn!("⚠️ {}. Normalizing anyway.", e);
    }

    let sentiment = raw["sentiment"]
        .as_str()
        .and_then(Sentiment::from_label)
        .unwrap_or(Sentiment::Neutral);

    let score = raw["score"]
        .as_f64()
        .filter(|s| (-100.0..=100.0).contains(s))
        .map(|s| s.round() as i32)
        .unwrap_or(0);

    let risk_level = risk_value(raw)
        .and_then(|v| v.as_str())
        .and_then(RiskLevel::from_label)
        .unwrap_or(RiskLevel::Medium);

    let catalysts = raw["catalysts"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|c| c.as_str().map(str::to_string))
                .take(MAX_CATALYSTS)
                .collect()
        })
        .unwrap_or_default();

    let summary = raw["summary"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_SUMMARY.to_string());

    SentimentRecord {
        sentiment,
        score: Some(score),
        risk_level,
        catalysts,
        summary,
    }
}

/// Strict shape check. Only used to report how far the tool strayed from the
/// requested format; `normalize` repairs whatever this rejects.
pub fn check_schema(raw: &Value) -> PipelineResult<()> {
    let Some(obj) = raw.as_object() else {
        return Err(PipelineError::InvalidSchema("payload is not an object".into()));
    };

    let mut problems = Vec::new();
    if obj.get("sentiment").and_then(Value::as_str).and_then(Sentiment::from_label).is_none() {
        problems.push("sentiment");
    }
    if !obj.get("score").map_or(false, Value::is_number) {
        problems.push("score");
    }
    if risk_value(raw).and_then(Value::as_str).and_then(RiskLevel::from_label).is_none() {
        problems.push("risk_level");
    }
    if !obj.get("catalysts").map_or(false, Value::is_array) {
        problems.push("catalysts");
    }
    if !obj.get("summary").map_or(false, Value::is_string) {
        problems.push("summary");
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(PipelineError::InvalidSchema(format!("bad fields: {}", problems.join(", "))))
    }
}

// Some models answer in camelCase despite the prompt.
fn risk_value(raw: &Value) -> Option<&Value> {
    raw.get("risk_level").or_else(|| raw.get("riskLevel"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conformant_record_round_trips() {
        let record = SentimentRecord {
            sentiment: Sentiment::Bearish,
            score: Some(-25),
            risk_level: RiskLevel::High,
            catalysts: vec!["Bitcoin decline".into(), "Fed hawkish".into()],
            summary: "Market sentiment is negative".into(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(check_schema(&value).is_ok());
        assert_eq!(normalize(&value), record);
    }

    #[test]
    fn missing_sentiment_becomes_neutral() {
        let record = normalize(&json!({"score": 40, "summary": "x"}));
        assert_eq!(record.sentiment, Sentiment::Neutral);
        assert_eq!(record.score, Some(40));

        let record = normalize(&json!({"sentiment": "very good"}));
        assert_eq!(record.sentiment, Sentiment::Neutral);
    }

    #[test]
    fn out_of_range_score_is_zeroed() {
        assert_eq!(normalize(&json!({"score": 150})).score, Some(0));
        assert_eq!(normalize(&json!({"score": -101})).score, Some(0));
        assert_eq!(normalize(&json!({"score": "60"})).score, Some(0));
        assert_eq!(normalize(&json!({"score": -100})).score, Some(-100));
    }

    #[test]
    fn labels_are_uppercased_and_defaults_applied() {
        let record = normalize(&json!({
            "sentiment": "bullish",
            "risk_level": "low",
            "catalysts": ["a", 1, "b", null, "c", "d", "e", "f"],
            "summary": 12
        }));
        assert_eq!(record.sentiment, Sentiment::Bullish);
        assert_eq!(record.risk_level, RiskLevel::Low);
        assert_eq!(record.catalysts, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(record.summary, DEFAULT_SUMMARY);

        let record = normalize(&json!({"risk_level": "catastrophic", "catalysts": "Fed"}));
        assert_eq!(record.risk_level, RiskLevel::Medium);
        assert!(record.catalysts.is_empty());
    }

    #[test]
    fn non_object_input_still_yields_a_record() {
        let record = normalize(&json!(["not", "an", "object"]));
        assert_eq!(record.sentiment, Sentiment::Neutral);
        assert_eq!(record.risk_level, RiskLevel::Medium);
        assert_eq!(record.score, Some(0));
        assert!(matches!(
            check_schema(&json!(3)),
            Err(PipelineError::InvalidSchema(_))
        ));
    }
}
