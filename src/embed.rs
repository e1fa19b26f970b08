//! Selection and rendering of embeddable Reddit posts.
//!
//! A snippet keeps at most `limit` rendered `reddit-card` blockquotes taken
//! from the first `scan_limit` hot posts of a subreddit, skipping anything
//! written by a moderator (pinned threads, announcements) and anything whose
//! title contains the legacy list delimiter.

use std::collections::HashSet;
use tracing::{debug, instrument};

use crate::config;
use crate::reddit::{RedditError, RedditService, Submission};

/// Separator of the legacy single-string cache encoding.
pub const LEGACY_DELIMITER: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub limit: usize,
    pub scan_limit: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            limit: 2,
            scan_limit: 10,
        }
    }
}

impl From<config::Embeds> for FetchOptions {
    fn from(embeds: config::Embeds) -> Self {
        Self {
            limit: embeds.limit,
            scan_limit: embeds.scan_limit,
        }
    }
}

/// Fetch the moderator list and the hot listing, then render up to
/// `opts.limit` eligible posts in listing order.
#[instrument(skip(reddit))]
pub async fn fetch_top_posts(
    reddit: &dyn RedditService,
    subreddit: &str,
    opts: FetchOptions,
) -> Result<Vec<String>, RedditError> {
    let moderators: HashSet<String> = reddit.moderators(subreddit).await?.into_iter().collect();
    let hot = reddit.hot(subreddit, opts.scan_limit).await?;
    let picked = select_eligible(
        &hot,
        &moderators,
        LEGACY_DELIMITER,
        opts.limit,
        opts.scan_limit,
    );
    debug!(
        scanned = hot.len().min(opts.scan_limit),
        picked = picked.len(),
        "selected embeddable posts"
    );
    Ok(picked.into_iter().map(render_embed).collect())
}

/// Walk `submissions` in order, skipping excluded authors and titles containing
/// `exclude_char`, until `limit` posts are collected or `scan_limit` posts were seen.
pub fn select_eligible<'a>(
    submissions: &'a [Submission],
    exclude_authors: &HashSet<String>,
    exclude_char: char,
    limit: usize,
    scan_limit: usize,
) -> Vec<&'a Submission> {
    submissions
        .iter()
        .take(scan_limit)
        .filter(|s| !exclude_authors.contains(&s.author) && !s.title.contains(exclude_char))
        .take(limit)
        .collect()
}

/// Render the `reddit-card` blockquote consumed by Reddit's embed script.
/// The markup matches fragments already stored by the site byte for byte.
pub fn render_embed(s: &Submission) -> String {
    format!(
        concat!(
            r#"<blockquote class="reddit-card" style="height:316px" data-embed-height="316">"#,
            r#"<a href="https://www.reddit.com{permalink}">{title}</a><br> by"#,
            r#"<a href="https://www.reddit.com/user/{author}">u/{author}</a> in "#,
            r#"<a href="https://www.reddit.com{sub_url}">{subreddit}</a></blockquote>"#,
        ),
        permalink = s.permalink,
        title = s.title,
        author = s.author,
        sub_url = s.subreddit_url(),
        subreddit = s.subreddit,
    )
}

/// `true` unless the exact-name search answers "not found". Any other
/// upstream failure is returned as an error.
pub async fn community_exists(
    reddit: &dyn RedditService,
    name: &str,
) -> Result<bool, RedditError> {
    match reddit.search_by_exact_name(name).await {
        Ok(()) => Ok(true),
        Err(RedditError::NotFound) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Join fragments into the legacy single-string encoding.
pub fn encode_legacy(codes: &[String]) -> String {
    codes.join(LEGACY_DELIMITER.to_string().as_str())
}

/// Split the legacy encoding back into fragments. An empty string is an
/// empty cache. A fragment that itself contained the delimiter comes back
/// as several fragments; the legacy format cannot represent it.
pub fn decode_legacy(encoded: &str) -> Vec<String> {
    if encoded.is_empty() {
        return Vec::new();
    }
    encoded.split(LEGACY_DELIMITER).map(str::to_string).collect()
}
