mod config;
mod database;
mod utils;
mod modules;

use clap::Parser;
use dotenvy::dotenv;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::AgentProfile;
use crate::database::{AnalysisStore, OfflineStore, PgNewsStore};
use crate::modules::brain::{AnalysisReport, SentimentAgent};
use crate::modules::perception::NewsSentinel;
use crate::utils::http_client::HttpClientFactory;

#[derive(Parser, Debug)]
#[command(name = "sentiment_desk")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "ES futures news sentiment via an external analysis tool", long_about = None)]
struct Cli {
    /// Scrape the feeds even when the headline cache is fresh
    #[arg(long)]
    refresh: bool,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,

    /// Re-run every N minutes instead of exiting
    #[arg(long, value_name = "MINUTES")]
    watch: Option<u64>,
}

async fn open_store() -> Arc<dyn AnalysisStore> {
    let enabled = env::var("USE_DATABASE")
        .map(|v| !v.eq_ignore_ascii_case("false"))
        .unwrap_or(true);
    let url = env::var("DATABASE_URL").ok().filter(|u| !u.is_empty());

    match (enabled, url) {
        (true, Some(url)) => match PgNewsStore::connect(&url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Database unavailable ({:#}). Running without persistence.", e);
                Arc::new(OfflineStore)
            }
        },
        _ => {
            info!("🔌 Database disabled, running memory-only");
            Arc::new(OfflineStore)
        }
    }
}

fn print_report(report: &AnalysisReport, as_json: bool) -> anyhow::Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let r = &report.record;
    println!("\n--- MARKET SENTIMENT ---");
    println!("Sentiment : {}", r.sentiment);
    match r.score {
        Some(score) => println!("Score     : {}", score),
        None => println!("Score     : n/a"),
    }
    println!("Risk      : {}", r.risk_level);
    if !r.catalysts.is_empty() {
        println!("Catalysts :");
        for c in &r.catalysts {
            println!("  - {}", c);
        }
    }
    println!("Summary   : {}", r.summary);
    println!(
        "[{} headlines | {} | {}]",
        report.news_count,
        report.data_source.as_str(),
        report.analysis_method
    );
    println!("------------------------");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    info!("Starting Sentiment Desk v{}...", env!("CARGO_PKG_VERSION"));

    let profile = AgentProfile::load()?;
    info!(
        "🛠️ Tool: {} {} (deadline {}s)",
        profile.tool.command,
        profile.tool.args.join(" "),
        profile.tool.deadline_sec
    );

    let store = open_store().await;
    let client = HttpClientFactory::create(&profile.news)?;
    let feed = Arc::new(NewsSentinel::new(client, profile.news.clone()));
    let agent = SentimentAgent::new(feed, store, profile);

    let mut force_refresh = cli.refresh;
    loop {
        let report = agent.run(force_refresh).await;
        print_report(&report, cli.json)?;

        if let Err(e) = agent.cleanup().await {
            warn!("⚠️ Cleanup failed: {:#}", e);
        }

        let Some(minutes) = cli.watch else { break };
        force_refresh = false;
        info!("💤 Next run in {} min", minutes);
        sleep(Duration::from_secs(minutes.max(1) * 60)).await;
    }

    Ok(())
}
