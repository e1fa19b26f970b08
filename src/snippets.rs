//! Reddit embed snippets: creation, refresh and page attachment.
//!
//! A snippet's lifecycle is independent of the pages that point at it.
//! Creation validates the subreddit (format, then existence) before any
//! listing is fetched; refresh replaces the cached fragments wholesale.
use thiserror::Error;
use tracing::{info, instrument};

use crate::db::{self, Pool};
use crate::embed::{decode_legacy, fetch_top_posts, FetchOptions};
use crate::model::RedditEmbed;
use crate::reddit::{RedditError, RedditService};
use crate::validators::{validate_subreddit, validate_subreddit_format, validate_title, ValidationError};

#[derive(Debug, Error)]
pub enum SnippetError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Reddit request failed: {0}")]
    Upstream(#[from] RedditError),
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
    #[error("snippet {0} not found")]
    NotFound(i64),
    #[error("page {page_id} cannot reference a snippet")]
    InvalidTarget { page_id: i64 },
}

/// Validate, fetch once, then persist. Nothing is stored when any step fails.
#[instrument(skip(pool, reddit, opts))]
pub async fn create_snippet(
    pool: &Pool,
    reddit: &dyn RedditService,
    opts: FetchOptions,
    title: &str,
    subreddit: &str,
) -> Result<RedditEmbed, SnippetError> {
    validate_title(title)?;
    validate_subreddit(reddit, subreddit).await?;
    let cached = fetch_top_posts(reddit, subreddit, opts).await?;
    let id = db::insert_reddit_embed(pool, title.trim(), subreddit, &cached, true).await?;
    info!(snippet_id = id, subreddit, cached = cached.len(), "created reddit snippet");
    load(pool, id).await
}

/// Store a snippet whose cache comes from the legacy `|`-joined string.
/// Only the format is checked; no Reddit call is made.
#[instrument(skip(pool, encoded))]
pub async fn import_legacy_snippet(
    pool: &Pool,
    title: &str,
    subreddit: &str,
    encoded: &str,
) -> Result<RedditEmbed, SnippetError> {
    validate_title(title)?;
    validate_subreddit_format(subreddit)?;
    let cached = decode_legacy(encoded);
    let id = db::insert_reddit_embed(pool, title.trim(), subreddit, &cached, false).await?;
    info!(snippet_id = id, subreddit, cached = cached.len(), "imported legacy snippet");
    load(pool, id).await
}

/// Re-fetch and overwrite the cached fragments of one snippet.
#[instrument(skip(pool, reddit, opts))]
pub async fn refresh_snippet(
    pool: &Pool,
    reddit: &dyn RedditService,
    opts: FetchOptions,
    id: i64,
) -> Result<RedditEmbed, SnippetError> {
    let snippet = load(pool, id).await?;
    let cached = fetch_top_posts(reddit, &snippet.subreddit, opts).await?;
    if !db::update_cached_posts(pool, id, &cached).await? {
        return Err(SnippetError::NotFound(id));
    }
    info!(snippet_id = id, subreddit = %snippet.subreddit, cached = cached.len(), "refreshed reddit snippet");
    load(pool, id).await
}

/// Point a hub or category at a snippet, or clear the reference with `None`.
#[instrument(skip(pool))]
pub async fn attach_snippet(
    pool: &Pool,
    page_id: i64,
    snippet_id: Option<i64>,
) -> Result<(), SnippetError> {
    let page = db::get_page(pool, page_id)
        .await?
        .ok_or(SnippetError::InvalidTarget { page_id })?;
    if !page.kind.accepts_embed() {
        return Err(SnippetError::InvalidTarget { page_id });
    }
    if let Some(id) = snippet_id {
        load(pool, id).await?;
    }
    db::set_page_embed(pool, page_id, snippet_id).await?;
    Ok(())
}

/// Cached fragments shown on a page; empty when it has no snippet.
pub async fn embeds_for_page(pool: &Pool, page_id: i64) -> Result<Vec<String>, SnippetError> {
    Ok(db::page_embed(pool, page_id)
        .await?
        .map(|s| s.cached_posts)
        .unwrap_or_default())
}

pub async fn delete_snippet(pool: &Pool, id: i64) -> Result<(), SnippetError> {
    if !db::delete_reddit_embed(pool, id).await? {
        return Err(SnippetError::NotFound(id));
    }
    info!(snippet_id = id, "deleted reddit snippet");
    Ok(())
}

pub async fn load(pool: &Pool, id: i64) -> Result<RedditEmbed, SnippetError> {
    db::get_reddit_embed(pool, id)
        .await?
        .ok_or(SnippetError::NotFound(id))
}

impl SnippetError {
    /// Whether the failure is a problem with editor input rather than the system.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, SnippetError::Validation(_) | SnippetError::InvalidTarget { .. })
    }
}
