use anyhow::{anyhow, bail, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::db::{self, Pool};
use crate::embed::FetchOptions;
use crate::reddit::RedditService;
use crate::snippets;

/// Outcome of one pass over every snippet.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: Vec<i64>,
    /// Snippet id and the rendered error.
    pub failed: Vec<(i64, String)>,
}

impl RefreshReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Refresh every persisted snippet, one after another.
///
/// A failure on one snippet is logged and recorded; the pass continues with
/// the next one. Only failing to list the snippets aborts the pass.
#[instrument(skip_all)]
pub async fn refresh_all(
    pool: &Pool,
    reddit: &dyn RedditService,
    opts: FetchOptions,
) -> Result<RefreshReport> {
    let embeds = db::list_reddit_embeds(pool).await?;
    let mut report = RefreshReport::default();
    for embed in embeds {
        match snippets::refresh_snippet(pool, reddit, opts, embed.id).await {
            Ok(updated) => {
                info!(
                    snippet_id = embed.id,
                    subreddit = %embed.subreddit,
                    cached = updated.cached_posts.len(),
                    "snippet refreshed"
                );
                report.refreshed.push(embed.id);
            }
            Err(err) => {
                warn!(?err, snippet_id = embed.id, subreddit = %embed.subreddit, "snippet refresh failed; continuing");
                report.failed.push((embed.id, err.to_string()));
            }
        }
    }
    info!(
        refreshed = report.refreshed.len(),
        failed = report.failed.len(),
        "reddit refresh pass finished"
    );
    Ok(report)
}

/// Run [`refresh_all`] every `interval` until `shutdown` resolves.
///
/// The first pass happens immediately when `run_on_startup` is set, otherwise
/// one full interval after start. A pass that errors out is logged and the
/// schedule carries on.
pub async fn run_scheduler<F>(
    pool: &Pool,
    reddit: &dyn RedditService,
    opts: FetchOptions,
    interval: Duration,
    run_on_startup: bool,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    if interval.is_zero() {
        bail!("refresh interval must be positive");
    }
    let now = Instant::now();
    // The timer computes the deadline after next from the first one.
    let first = now
        .checked_add(interval)
        .filter(|t| t.checked_add(interval).is_some())
        .ok_or_else(|| anyhow!("refresh interval of {interval:?} is out of range"))?;
    let start = if run_on_startup { now } else { first };
    let mut timer = tokio::time::interval_at(start, interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    info!(interval_secs = interval.as_secs(), run_on_startup, "reddit refresh scheduler started");
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("reddit refresh scheduler stopping");
                return Ok(());
            }
            _ = timer.tick() => {
                debug!("reddit refresh tick");
                if let Err(err) = refresh_all(pool, reddit, opts).await {
                    warn!(?err, "reddit refresh pass aborted");
                }
            }
        }
    }
}
