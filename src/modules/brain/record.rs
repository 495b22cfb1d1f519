use serde::{Deserialize, Serialize};
use std::fmt;

use super::decoder::CandidateSource;
use super::launcher::LaunchStrategy;

/// Field names of the verdict schema. A JSON blob carrying any of them is
/// treated as the intended payload.
pub const RECOGNIZED_FIELDS: [&str; 4] = ["sentiment", "score", "catalysts", "risk_level"];

/// Field whose presence anchors a loose JSON match to the verdict schema.
pub const ANCHOR_FIELD: &str = "sentiment";

pub const MAX_CATALYSTS: usize = 5;
pub const DEFAULT_SUMMARY: &str = "No analysis available";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
    NotAvailable,
}

impl Sentiment {
    /// Case-insensitive parse of the three directional labels.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_uppercase().as_str() {
            "BULLISH" => Some(Self::Bullish),
            "BEARISH" => Some(Self::Bearish),
            "NEUTRAL" => Some(Self::Neutral),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bullish => "BULLISH",
            Self::Bearish => "BEARISH",
            Self::Neutral => "NEUTRAL",
            Self::NotAvailable => "NOT_AVAILABLE",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    NotAvailable,
}

impl RiskLevel {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_uppercase().as_str() {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::NotAvailable => "NOT_AVAILABLE",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The market verdict. Only the validator and the sentinel constructor build one,
/// so `sentiment` and `risk_level` always hold a known label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentRecord {
    pub sentiment: Sentiment,
    pub score: Option<i32>,
    pub risk_level: RiskLevel,
    pub catalysts: Vec<String>,
    pub summary: String,
}

impl SentimentRecord {
    pub fn not_available(reason: &str) -> Self {
        Self {
            sentiment: Sentiment::NotAvailable,
            score: None,
            risk_level: RiskLevel::NotAvailable,
            catalysts: Vec::new(),
            summary: format!("Analysis not available: {}", reason),
        }
    }

    pub fn is_available(&self) -> bool {
        self.sentiment != Sentiment::NotAvailable
    }
}

/// Where a verdict came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Provenance {
    ExternalTool {
        strategy: LaunchStrategy,
        source: CandidateSource,
    },
    Heuristic {
        reason: String,
    },
    Unavailable,
}

impl Provenance {
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::ExternalTool { .. } => "external_tool",
            Self::Heuristic { .. } => "keyword_heuristic",
            Self::Unavailable => "none",
        }
    }
}
