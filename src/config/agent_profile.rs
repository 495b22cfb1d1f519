use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// How to reach the external analysis tool.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ToolSettings {
    pub command: String,
    pub args: Vec<String>,
    /// Prompts longer than this prefer the temp-file strategy over argv.
    pub inline_threshold_chars: usize,
    /// Hard ceiling for passing the prompt as an argument.
    pub inline_max_chars: usize,
    pub deadline_sec: u64,
    pub working_dir: Option<PathBuf>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            command: "kilocode".to_string(),
            args: vec!["-m".into(), "ask".into(), "--auto".into(), "--json".into()],
            inline_threshold_chars: 1000,
            inline_max_chars: 5000,
            deadline_sec: 90,
            working_dir: None,
        }
    }
}

impl ToolSettings {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_sec)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheSettings {
    pub freshness_hours: i64,
    pub lookback_hours: i64,
    pub retention_days: i64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            freshness_hours: 2,
            lookback_hours: 24,
            retention_days: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NewsSettings {
    pub sources: Vec<FeedSource>,
    pub items_per_source: usize,
    pub http_timeout_sec: u64,
    pub user_agent: String,
}

impl Default for NewsSettings {
    fn default() -> Self {
        Self {
            sources: vec![
                FeedSource {
                    name: "ZeroHedge".into(),
                    url: "http://feeds.feedburner.com/zerohedge/feed".into(),
                },
                FeedSource {
                    name: "CNBC".into(),
                    url: "https://search.cnbc.com/rs/search/combinedcms/view.xml?partnerId=wrss01&id=10000664"
                        .into(),
                },
            ],
            items_per_source: 10,
            http_timeout_sec: 15,
            user_agent: "Mozilla/5.0 (compatible; SentimentDesk/1.0)".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AgentProfile {
    pub tool: ToolSettings,
    pub cache: CacheSettings,
    pub news: NewsSettings,
}

impl AgentProfile {
    /// `agent_config.toml` (optional) overlaid by `SENTIMENT__TOOL__COMMAND`-style
    /// environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from("agent_config")
    }

    pub fn load_from(name: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(name).required(false))
            .add_source(
                Environment::with_prefix("SENTIMENT")
                    .separator("__")
                    .list_separator(" ")
                    .with_list_parse_key("tool.args")
                    .try_parsing(true),
            )
            .build()
            .context("failed to assemble agent profile")?;

        let profile: AgentProfile = settings
            .try_deserialize()
            .context("agent profile has invalid fields")?;
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let name = dir.path().join("absent_config");
        let profile = AgentProfile::load_from(name.to_str().unwrap()).unwrap();
        assert_eq!(profile.tool.command, "kilocode");
        assert_eq!(profile.tool.inline_threshold_chars, 1000);
        assert_eq!(profile.tool.deadline(), Duration::from_secs(90));
        assert_eq!(profile.cache.freshness_hours, 2);
        assert_eq!(profile.news.sources.len(), 2);
    }

    #[test]
    fn file_overrides_only_what_it_names() {
        let mut file = tempfile::Builder::new()
            .prefix("agent_profile")
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "[tool]\ncommand = \"fake-analyst\"\ndeadline_sec = 5\n\n[cache]\nlookback_hours = 6\n\n\
             [[news.sources]]\nname = \"Local\"\nurl = \"http://localhost/feed\""
        )
        .unwrap();
        let path = file.path().to_str().unwrap().trim_end_matches(".toml").to_string();

        let profile = AgentProfile::load_from(&path).unwrap();
        assert_eq!(profile.tool.command, "fake-analyst");
        assert_eq!(profile.tool.deadline_sec, 5);
        assert_eq!(profile.tool.inline_max_chars, 5000);
        assert_eq!(profile.cache.lookback_hours, 6);
        assert_eq!(profile.cache.freshness_hours, 2);
        assert_eq!(
            profile.news.sources,
            vec![FeedSource { name: "Local".into(), url: "http://localhost/feed".into() }]
        );
    }
}
