//! cafe-watch command line entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use cafe_watch_lib::application::{RunOrchestrator, probe};
use cafe_watch_lib::domain::{AccessibilityCheck, AlwaysAccessible};
use cafe_watch_lib::infrastructure::logging::log_system_info;
use cafe_watch_lib::infrastructure::{
    AppConfig, CollectionConfig, HtmlPageDriver, HttpAccessibilityCheck, HttpPageFetcher,
    NotionRecordStore, PostExtractor, RunLock, init_logging_with_config,
};

#[derive(Parser)]
#[command(name = "cafe-watch", version)]
#[command(about = "Observe Naver Cafe posts and mirror their engagement into Notion")]
struct Cli {
    /// Configuration file (defaults to config/default.toml when present)
    #[arg(long, global = true, env = "CAFE_WATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Observe every configured collection
    Run {
        /// Re-observe records regardless of status
        #[arg(long)]
        force: bool,

        /// Only run the named collection
        #[arg(long)]
        collection: Option<String>,
    },

    /// Extract a single post and print the result without touching the store
    Probe { url: String },
}

fn accessibility_check(config: &AppConfig) -> Result<Arc<dyn AccessibilityCheck>> {
    if config.accessibility.enabled {
        Ok(Arc::new(HttpAccessibilityCheck::new(
            &config.accessibility,
            &config.browser.user_agent,
        )?))
    } else {
        Ok(Arc::new(AlwaysAccessible))
    }
}

fn page_driver(config: &AppConfig) -> Result<HtmlPageDriver<HttpPageFetcher>> {
    HtmlPageDriver::new(HttpPageFetcher::new(&config.browser.user_agent)?)
}

fn selected_collections(config: &AppConfig, name: Option<&str>) -> Result<Vec<CollectionConfig>> {
    match name {
        Some(name) => config
            .collection(name)
            .cloned()
            .map(|c| vec![c])
            .ok_or_else(|| anyhow!("Unknown collection '{}'", name)),
        None => Ok(config.collections.clone()),
    }
}

async fn run(config: &AppConfig, force: bool, collection: Option<&str>) -> Result<()> {
    let _lock = RunLock::try_acquire(&config.run.lock_path).context("Failed to acquire run lock")?;

    let collections = selected_collections(config, collection)?;
    if collections.is_empty() {
        warn!("No collections configured, nothing to do");
        return Ok(());
    }

    let store = Arc::new(NotionRecordStore::new(&config.store)?);
    let extractor = PostExtractor::new(&config.browser, &config.extraction)?;
    let mut orchestrator = RunOrchestrator::new(
        Box::new(page_driver(config)?),
        store,
        accessibility_check(config)?,
        extractor,
        config.blocklist(),
        &config.run,
    );

    tokio::select! {
        reports = orchestrator.run_collections(&collections, force) => {
            for (name, report) in reports {
                match report {
                    Some(report) => info!(
                        "[{}] written {} / {} (new activity {}, failed {})",
                        name,
                        report.written(),
                        report.total,
                        report.new_activity,
                        report.failed
                    ),
                    None => warn!("[{}] not processed", name),
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("🛑 Interrupted, stopping run");
        }
    }

    Ok(())
}

async fn probe_url(config: &AppConfig, url: &str) -> Result<()> {
    let mut driver = page_driver(config)?;
    let extractor = PostExtractor::new(&config.browser, &config.extraction)?;
    let accessibility = accessibility_check(config)?;

    let report = probe(
        &mut driver,
        &extractor,
        &config.blocklist(),
        accessibility.as_ref(),
        url,
    )
    .await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging_with_config(&config.logging)?;
    log_system_info();

    let result = match cli.command {
        Commands::Run { force, collection } => run(&config, force, collection.as_deref()).await,
        Commands::Probe { url } => probe_url(&config, &url).await,
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
