use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use tunerguy_hub::config;
use tunerguy_hub::db;
use tunerguy_hub::embed::FetchOptions;
use tunerguy_hub::reddit::RedditClient;
use tunerguy_hub::refresh;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Refresh every Reddit embed snippet once and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Exit with an error if any snippet failed to refresh
    #[arg(long)]
    fail_on_error: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let reddit = RedditClient::from_config(&cfg).context("failed to build Reddit client")?;

    info!("Starting one-off Reddit refresh");
    let report = refresh::refresh_all(&pool, &reddit, FetchOptions::from(cfg.embeds)).await?;
    pool.close().await;

    for (id, err) in &report.failed {
        warn!(snippet_id = id, error = %err, "snippet left stale");
    }
    info!(
        refreshed = report.refreshed.len(),
        failed = report.failed.len(),
        "Reddit refresh completed"
    );

    if args.fail_on_error && !report.is_clean() {
        bail!("{} snippet(s) failed to refresh", report.failed.len());
    }
    Ok(())
}
