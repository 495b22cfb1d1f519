use std::fmt;

use super::structs::NewsRecord;

/// Compact tabular rendering of headlines for the prompt:
///
/// ```text
/// headlines[2]{title,src}:
///   Fed Cuts Rates by 50bps,CNBC
///   Tech Stocks Rally on AI News,ZeroHedge
/// ```
pub struct HeadlineTable<'a> {
    name: &'a str,
    records: &'a [NewsRecord],
}

impl<'a> HeadlineTable<'a> {
    pub fn new(records: &'a [NewsRecord]) -> Self {
        Self { name: "headlines", records }
    }
}

impl fmt::Display for HeadlineTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]{{title,src}}:", self.name, self.records.len())?;
        for record in self.records {
            write!(f, "\n  {},{}", cell(&record.title), cell(&record.source))?;
        }
        Ok(())
    }
}

pub fn serialize_to_table(records: &[NewsRecord]) -> String {
    HeadlineTable::new(records).to_string()
}

// Quote cells that would otherwise be misread as a delimiter, a key or a literal.
fn cell(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.trim() != value
        || value.contains([',', '"', ':', '\n', '\r', '\\'])
        || matches!(value, "true" | "false" | "null")
        || value.parse::<f64>().is_ok();

    if !needs_quotes {
        return value.to_string();
    }
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r");
    format!("\"{}\"", escaped)
}
