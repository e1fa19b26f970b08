//! Latest-post tracking.
//!
//! Every post save stamps the owning category with the newest publish date
//! among its posts and a fresh save revision, in the same transaction as the
//! post write. A backdated post never lowers the marker. "Latest" is then a
//! comparison: highest `date_of_last_post`, ties going to the most recent
//! save. No flag has to be moved between siblings.
//!
//! Two posts saved at the same time under different categories race on the
//! marker and the last commit wins. There is no locking beyond SQLite's own
//! write serialisation.
use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument};

use crate::db::{self, Pool};
use crate::model::{slugify, Category, NewPost, PageKind, Post, PostEdit};
use crate::validators::{validate_post_snippet, ValidationError};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("page {0} not found")]
    PageNotFound(i64),
    #[error("post {0} not found")]
    PostNotFound(i64),
    #[error("posts must live under a category; page {page_id} is a {kind}")]
    ParentNotCategory { page_id: i64, kind: PageKind },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl TrackerError {
    /// Whether the failure is a problem with editor input rather than the system.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            TrackerError::Validation(_)
                | TrackerError::PageNotFound(_)
                | TrackerError::PostNotFound(_)
                | TrackerError::ParentNotCategory { .. }
        )
    }
}

fn check_post_fields(title: &str, snippet: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    validate_post_snippet(snippet)
}

/// Create a post under `new_post.parent_id` and move the latest marker.
///
/// The category is the structural parent; the date defaults to today (UTC).
#[instrument(skip_all, fields(parent_id = new_post.parent_id))]
pub async fn record_post(pool: &Pool, new_post: NewPost) -> Result<Post, TrackerError> {
    check_post_fields(&new_post.title, &new_post.snippet)?;
    let date = new_post.date.unwrap_or_else(|| Utc::now().date_naive());

    let mut tx = pool.begin().await?;
    let parent = db::fetch_page(&mut tx, new_post.parent_id)
        .await?
        .ok_or(TrackerError::PageNotFound(new_post.parent_id))?;
    if parent.kind != PageKind::Category {
        return Err(TrackerError::ParentNotCategory {
            page_id: parent.id,
            kind: parent.kind,
        });
    }

    let title = new_post.title.trim();
    let id = db::insert_page(&mut tx, Some(parent.id), PageKind::Post, title).await?;
    db::insert_post(&mut tx, id, parent.id, date, &new_post.snippet).await?;
    let (marker, revision) = db::mark_last_post(&mut tx, parent.id).await?;
    tx.commit().await?;

    info!(post_id = id, category_id = parent.id, %date, %marker, revision, "recorded post");
    Ok(Post {
        id,
        category_id: parent.id,
        title: title.to_string(),
        slug: slugify(title),
        date,
        snippet: new_post.snippet,
    })
}

/// Re-save an existing post. The category is re-derived from the tree and
/// the marker is recomputed, so moving the newest post back in time can
/// lower it.
#[instrument(skip(pool, edit))]
pub async fn update_post(pool: &Pool, post_id: i64, edit: PostEdit) -> Result<Post, TrackerError> {
    let mut tx = pool.begin().await?;
    let mut post = db::fetch_post(&mut tx, post_id)
        .await?
        .ok_or(TrackerError::PostNotFound(post_id))?;
    let page = db::fetch_page(&mut tx, post_id)
        .await?
        .ok_or(TrackerError::PageNotFound(post_id))?;
    let parent_id = page.parent_id.ok_or(TrackerError::PageNotFound(post_id))?;
    let parent = db::fetch_page(&mut tx, parent_id)
        .await?
        .ok_or(TrackerError::PageNotFound(parent_id))?;
    if parent.kind != PageKind::Category {
        return Err(TrackerError::ParentNotCategory {
            page_id: parent.id,
            kind: parent.kind,
        });
    }

    if let Some(title) = edit.title {
        post.title = title.trim().to_string();
        post.slug = slugify(&post.title);
    }
    if let Some(snippet) = edit.snippet {
        post.snippet = snippet;
    }
    if let Some(date) = edit.date {
        post.date = date;
    }
    check_post_fields(&post.title, &post.snippet)?;
    post.category_id = parent.id;

    db::update_post(&mut tx, &post).await?;
    let (marker, revision) = db::mark_last_post(&mut tx, parent.id).await?;
    tx.commit().await?;

    info!(post_id, category_id = parent.id, date = %post.date, %marker, revision, "updated post");
    Ok(post)
}

/// The category holding the latest post: greatest date, ties to the most
/// recent save. Categories without posts never qualify.
pub fn latest_among(categories: &[Category]) -> Option<&Category> {
    categories
        .iter()
        .filter(|c| c.date_of_last_post.is_some())
        .max_by_key(|c| c.latest_key())
}

/// Latest category anywhere below a hub (or the home page).
#[instrument(skip(pool))]
pub async fn latest_category(pool: &Pool, page_id: i64) -> Result<Option<Category>, TrackerError> {
    let categories = db::categories_under(pool, page_id).await?;
    Ok(latest_among(&categories).cloned())
}

/// Latest category among the siblings of `category_id` (itself included).
#[instrument(skip(pool))]
pub async fn latest_sibling(pool: &Pool, category_id: i64) -> Result<Option<Category>, TrackerError> {
    let categories = db::sibling_categories(pool, category_id).await?;
    Ok(latest_among(&categories).cloned())
}
