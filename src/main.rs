use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use tunerguy_hub::config;
use tunerguy_hub::db;
use tunerguy_hub::embed::FetchOptions;
use tunerguy_hub::reddit::RedditClient;
use tunerguy_hub::refresh;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Refresh every Reddit embed snippet on a fixed schedule"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run a refresh pass right away instead of waiting one interval
    #[arg(long)]
    run_now: bool,
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
    let opts = FetchOptions::from(cfg.embeds);

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(?err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    info!(
        interval_hours = cfg.refresh.interval_hours,
        "starting reddit refresh scheduler"
    );
    refresh::run_scheduler(
        &pool,
        &reddit,
        opts,
        cfg.refresh_interval(),
        cfg.refresh.run_on_startup || args.run_now,
        shutdown,
    )
    .await?;

    pool.close().await;
    Ok(())
}
