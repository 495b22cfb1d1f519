use crate::modules::perception::{serialize_to_table, NewsRecord};

const INSTRUCTIONS: &str = r#"You are an expert Market Sentiment Analyst for ES Futures (S&P 500).

TASK:
Analyze the provided TOON data and return valid JSON.

CRITICAL:
- Output ONLY the JSON object
- No markdown, no explanations
- Must be parseable as JSON

EXAMPLE:
{
  "sentiment": "BEARISH",
  "score": -25,
  "catalysts": ["Bitcoin decline", "Fed hawkish"],
  "risk_level": "HIGH",
  "summary": "Market sentiment is negative due to..."
}

STRUCTURE:
{
  "sentiment": "BULLISH" | "BEARISH" | "NEUTRAL",
  "score": number between -100 and 100,
  "catalysts": ["string", "string"],
  "risk_level": "LOW" | "MEDIUM" | "HIGH",
  "summary": "Brief explanation"
}
"#;

const RULES: &str = "RULES:
1. Analyze all headlines
2. Return ONLY JSON
3. No conversational text
";

/// Instructions, output schema and the headline table in one prompt.
pub fn build_prompt(news: &[NewsRecord]) -> String {
    format!(
        "{}\nDATA:\n{}\n\n{}",
        INSTRUCTIONS,
        serialize_to_table(news),
        RULES
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn prompt_embeds_the_table() {
        let news = vec![NewsRecord::new("Fed Cuts Rates", "CNBC", "https://x", Utc::now())];
        let prompt = build_prompt(&news);
        assert!(prompt.starts_with("You are an expert Market Sentiment Analyst"));
        assert!(prompt.contains("DATA:\nheadlines[1]{title,src}:\n  Fed Cuts Rates,CNBC\n"));
        assert!(prompt.trim_end().ends_with("3. No conversational text"));
    }
}
