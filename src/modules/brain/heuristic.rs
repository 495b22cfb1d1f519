use serde_json::json;
use tracing::info;

use super::record::{SentimentRecord, MAX_CATALYSTS};
use super::validator;
use crate::modules::perception::NewsRecord;

const BULLISH: [&str; 9] = [
    "rally", "bullish", "gains", "positive", "growth", "rises", "jumps", "surges", "recovery",
];
const BEARISH: [&str; 10] = [
    "fall", "decline", "bearish", "drop", "crash", "slump", "plunge", "declines", "losses",
    "negative",
];
const NEUTRAL: [&str; 8] = [
    "stable", "flat", "mixed", "uncertain", "caution", "wait", "holds", "steady",
];

/// Keyword-frequency estimate from headline titles. Deterministic and offline.
///
/// Each title counts toward at most one bucket (bullish checked first, then
/// bearish, then neutral). A direction wins only with a strict plurality; its
/// score is the bucket's share of all headlines, capped at ±50. Risk follows the
/// share of headlines with any directional keyword.
pub fn analyze(news: &[NewsRecord]) -> SentimentRecord {
    if news.is_empty() {
        return SentimentRecord::not_available("No news data to analyze");
    }

    let (mut bull, mut bear, mut flat) = (0usize, 0usize, 0usize);
    let mut catalysts: Vec<&str> = Vec::new();

    for item in news {
        let title = item.title.to_lowercase();
        let mentions = |words: &[&str]| words.iter().any(|w| title.contains(w));

        if mentions(&BULLISH[..]) {
            bull += 1;
        } else if mentions(&BEARISH[..]) {
            bear += 1;
        } else if mentions(&NEUTRAL[..]) {
            flat += 1;
        }

        for catalyst in catalysts_in(&title) {
            if !catalysts.contains(&catalyst) {
                catalysts.push(catalyst);
            }
        }
    }
    catalysts.truncate(MAX_CATALYSTS);

    let total = news.len() as f64;
    let (sentiment, score) = if bull > bear && bull > flat {
        ("BULLISH", (bull as f64 / total * 100.0).min(50.0))
    } else if bear > bull && bear > flat {
        ("BEARISH", (-(bear as f64) / total * 100.0).max(-50.0))
    } else {
        ("NEUTRAL", 0.0)
    };
    let score = score.round() as i64;

    let volatility = (bull + bear) as f64 / total;
    let risk_level = if volatility > 0.7 {
        "HIGH"
    } else if volatility < 0.3 {
        "LOW"
    } else {
        "MEDIUM"
    };

    info!(
        "🧮 Keyword heuristic: {} bullish / {} bearish / {} neutral -> {}",
        bull, bear, flat, sentiment
    );

    validator::normalize(&json!({
        "sentiment": sentiment,
        "score": score,
        "risk_level": risk_level,
        "catalysts": catalysts,
        "summary": format!(
            "Pattern-based analysis: {} bullish, {} bearish, {} neutral headlines analyzed. \
             Sentiment determined as {} with {} confidence score.",
            bull, bear, flat, sentiment, score.abs()
        ),
    }))
}

fn catalysts_in(title: &str) -> Vec<&'static str> {
    let mut found = Vec::new();
    if title.contains("fed") && (title.contains("rate") || title.contains("cut")) {
        found.push("Fed Rate Policy");
    }
    if title.contains("bitcoin") || title.contains("crypto") {
        found.push("Cryptocurrency");
    }
    if title.contains("ai") && (title.contains("spending") || title.contains("investment")) {
        found.push("AI Market Activity");
    }
    found
}
