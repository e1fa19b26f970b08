//! Read models for hub and category pages.
use anyhow::{anyhow, Result};
use serde::Serialize;
use tracing::instrument;

use crate::db::{self, CategoryWithPosts, Pool};
use crate::model::{Page, PageKind, Post};
use crate::tracker::latest_among;

/// Posts shown per category card on a hub page.
pub const POSTS_PER_CATEGORY: i64 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct HubOverview {
    pub hub: Page,
    /// Latest first; categories without posts last.
    pub categories: Vec<CategoryWithPosts>,
    pub latest_category_id: Option<i64>,
    pub reddit_embeds: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryOverview {
    pub category: Page,
    pub latest_post: Option<Post>,
    pub posts: Vec<Post>,
    pub reddit_embeds: Vec<String>,
}

#[instrument(skip(pool))]
pub async fn hub_overview(pool: &Pool, hub_id: i64) -> Result<HubOverview> {
    let hub = db::get_page(pool, hub_id)
        .await?
        .ok_or_else(|| anyhow!("page {hub_id} not found"))?;
    if !matches!(hub.kind, PageKind::Hub | PageKind::Home) {
        return Err(anyhow!("page {hub_id} is a {}, not a hub", hub.kind));
    }

    let categories = db::categories_under(pool, hub_id).await?;
    let latest_category_id = latest_among(&categories).map(|c| c.id());

    let mut cards = Vec::with_capacity(categories.len());
    for category in categories {
        let posts = db::posts_in_category(pool, category.id(), Some(POSTS_PER_CATEGORY)).await?;
        cards.push(CategoryWithPosts { category, posts });
    }

    let reddit_embeds = db::page_embed(pool, hub_id)
        .await?
        .map(|s| s.cached_posts)
        .unwrap_or_default();

    Ok(HubOverview {
        hub,
        categories: cards,
        latest_category_id,
        reddit_embeds,
    })
}

#[instrument(skip(pool))]
pub async fn category_overview(pool: &Pool, category_id: i64) -> Result<CategoryOverview> {
    let category = db::get_page(pool, category_id)
        .await?
        .ok_or_else(|| anyhow!("page {category_id} not found"))?;
    if category.kind != PageKind::Category {
        return Err(anyhow!("page {category_id} is a {}, not a category", category.kind));
    }

    let mut posts = db::posts_in_category(pool, category_id, None).await?;
    let latest_post = if posts.is_empty() {
        None
    } else {
        Some(posts.remove(0))
    };
    let reddit_embeds = db::page_embed(pool, category_id)
        .await?
        .map(|s| s.cached_posts)
        .unwrap_or_default();

    Ok(CategoryOverview {
        category,
        latest_post,
        posts,
        reddit_embeds,
    })
}
