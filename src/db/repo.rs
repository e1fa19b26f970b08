use crate::model::{slugify, Category, Page, PageKind, Post, RedditEmbed};
use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

const PAGE_COLUMNS: &str = "p.id, p.parent_id, p.kind, p.title, p.slug, p.reddit_embed_id, p.created_at";

const CATEGORY_ORDER: &str =
    "c.date_of_last_post IS NULL, c.date_of_last_post DESC, c.last_post_revision DESC, p.id";

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    // WAL plus stricter durability; foreign keys are on by default in sqlx.
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database URL: {normalized}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePool::connect_with(options).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn page_from_row(row: &SqliteRow) -> Result<Page> {
    let kind: String = row.try_get("kind")?;
    Ok(Page {
        id: row.try_get("id")?,
        parent_id: row.try_get("parent_id")?,
        kind: PageKind::parse_kind(&kind).ok_or_else(|| anyhow!("unknown page kind '{kind}'"))?,
        title: row.try_get("title")?,
        slug: row.try_get("slug")?,
        reddit_embed_id: row.try_get("reddit_embed_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn category_from_row(row: &SqliteRow) -> Result<Category> {
    Ok(Category {
        page: page_from_row(row)?,
        date_of_last_post: row.try_get("date_of_last_post")?,
        last_post_revision: row.try_get("last_post_revision")?,
    })
}

fn post_from_row(row: &SqliteRow) -> Result<Post> {
    Ok(Post {
        id: row.try_get("id")?,
        category_id: row.try_get("category_id")?,
        title: row.try_get("title")?,
        slug: row.try_get("slug")?,
        date: row.try_get("date")?,
        snippet: row.try_get("snippet")?,
    })
}

fn embed_from_row(row: &SqliteRow) -> Result<RedditEmbed> {
    let raw: String = row.try_get("cached_posts")?;
    let cached_posts: Vec<String> =
        serde_json::from_str(&raw).context("cached_posts is not a JSON string array")?;
    Ok(RedditEmbed {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        subreddit: row.try_get("subreddit")?,
        cached_posts,
        refreshed_at: row.try_get("refreshed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

// ---------------------------------------------------------------------------
// Page tree
// ---------------------------------------------------------------------------

/// Create a home, hub or category page under `parent_id`.
/// Posts go through `tracker::record_post` so their category marker is kept.
#[instrument(skip_all)]
pub async fn create_page(
    pool: &Pool,
    parent_id: Option<i64>,
    kind: PageKind,
    title: &str,
) -> Result<i64> {
    if kind == PageKind::Post {
        return Err(anyhow!("posts are created through tracker::record_post"));
    }
    let mut tx = pool.begin().await?;
    let parent_kind = match parent_id {
        Some(pid) => Some(
            fetch_page(&mut tx, pid)
                .await?
                .ok_or_else(|| anyhow!("parent page {pid} not found"))?
                .kind,
        ),
        None => None,
    };
    if !kind.allowed_under(parent_kind) {
        return Err(anyhow!(
            "a {} page cannot be created under {}",
            kind,
            parent_kind.map_or("the root", |k| k.as_str())
        ));
    }
    let id = insert_page(&mut tx, parent_id, kind, title).await?;
    if kind == PageKind::Category {
        sqlx::query("INSERT INTO categories (page_id) VALUES (?)")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(id)
}

pub(crate) async fn insert_page(
    conn: &mut SqliteConnection,
    parent_id: Option<i64>,
    kind: PageKind,
    title: &str,
) -> Result<i64> {
    let rec = sqlx::query(
        "INSERT INTO pages (parent_id, kind, title, slug) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(parent_id)
    .bind(kind.as_str())
    .bind(title)
    .bind(slugify(title))
    .fetch_one(&mut *conn)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

pub(crate) async fn fetch_page(conn: &mut SqliteConnection, id: i64) -> Result<Option<Page>> {
    let row = sqlx::query(&format!("SELECT {PAGE_COLUMNS} FROM pages p WHERE p.id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(page_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn get_page(pool: &Pool, id: i64) -> Result<Option<Page>> {
    let mut conn = pool.acquire().await?;
    fetch_page(&mut conn, id).await
}

#[instrument(skip_all)]
pub async fn get_parent(pool: &Pool, id: i64) -> Result<Option<Page>> {
    let row = sqlx::query(&format!(
        "SELECT {PAGE_COLUMNS} FROM pages p JOIN pages child ON child.parent_id = p.id WHERE child.id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(page_from_row).transpose()
}

/// Pages sharing the parent of `id`, including the page itself, by id.
#[instrument(skip_all)]
pub async fn siblings_of(pool: &Pool, id: i64) -> Result<Vec<Page>> {
    let rows = sqlx::query(&format!(
        "SELECT {PAGE_COLUMNS} FROM pages p \
         WHERE p.parent_id IS (SELECT parent_id FROM pages WHERE id = ?) \
           AND EXISTS (SELECT 1 FROM pages WHERE id = ?) \
         ORDER BY p.id"
    ))
    .bind(id)
    .bind(id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(page_from_row).collect()
}

/// Every page below `id` (recursively), excluding `id` itself, by id.
#[instrument(skip_all)]
pub async fn descendants_of(pool: &Pool, id: i64) -> Result<Vec<Page>> {
    let rows = sqlx::query(&format!(
        "WITH RECURSIVE tree(id) AS ( \
             SELECT id FROM pages WHERE parent_id = ? \
             UNION ALL \
             SELECT child.id FROM pages child JOIN tree ON child.parent_id = tree.id \
         ) \
         SELECT {PAGE_COLUMNS} FROM pages p JOIN tree ON tree.id = p.id ORDER BY p.id"
    ))
    .bind(id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(page_from_row).collect()
}

// ---------------------------------------------------------------------------
// Categories and posts
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn get_category(pool: &Pool, id: i64) -> Result<Option<Category>> {
    let row = sqlx::query(&format!(
        "SELECT {PAGE_COLUMNS}, c.date_of_last_post, c.last_post_revision \
         FROM categories c JOIN pages p ON p.id = c.page_id WHERE c.page_id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(category_from_row).transpose()
}

/// Categories sharing the parent of `id` (itself included), latest first.
#[instrument(skip_all)]
pub async fn sibling_categories(pool: &Pool, id: i64) -> Result<Vec<Category>> {
    let rows = sqlx::query(&format!(
        "SELECT {PAGE_COLUMNS}, c.date_of_last_post, c.last_post_revision \
         FROM categories c JOIN pages p ON p.id = c.page_id \
         WHERE p.parent_id IS (SELECT parent_id FROM pages WHERE id = ?) \
           AND EXISTS (SELECT 1 FROM pages WHERE id = ?) \
         ORDER BY {CATEGORY_ORDER}"
    ))
    .bind(id)
    .bind(id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(category_from_row).collect()
}

/// Categories anywhere below `id`, latest first (categories without posts last).
#[instrument(skip_all)]
pub async fn categories_under(pool: &Pool, id: i64) -> Result<Vec<Category>> {
    let rows = sqlx::query(&format!(
        "WITH RECURSIVE tree(id) AS ( \
             SELECT id FROM pages WHERE parent_id = ? \
             UNION ALL \
             SELECT child.id FROM pages child JOIN tree ON child.parent_id = tree.id \
         ) \
         SELECT {PAGE_COLUMNS}, c.date_of_last_post, c.last_post_revision \
         FROM categories c JOIN pages p ON p.id = c.page_id JOIN tree ON tree.id = p.id \
         ORDER BY {CATEGORY_ORDER}"
    ))
    .bind(id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(category_from_row).collect()
}

pub(crate) async fn fetch_post(conn: &mut SqliteConnection, id: i64) -> Result<Option<Post>> {
    let row = sqlx::query(
        "SELECT p.id, s.category_id, p.title, p.slug, s.date, s.snippet \
         FROM posts s JOIN pages p ON p.id = s.page_id WHERE s.page_id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    row.as_ref().map(post_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn get_post(pool: &Pool, id: i64) -> Result<Option<Post>> {
    let mut conn = pool.acquire().await?;
    fetch_post(&mut conn, id).await
}

/// Posts of a category, newest publish date first. `limit = None` returns all.
#[instrument(skip_all)]
pub async fn posts_in_category(
    pool: &Pool,
    category_id: i64,
    limit: Option<i64>,
) -> Result<Vec<Post>> {
    let rows = sqlx::query(
        "SELECT p.id, s.category_id, p.title, p.slug, s.date, s.snippet \
         FROM posts s JOIN pages p ON p.id = s.page_id \
         WHERE s.category_id = ? ORDER BY s.date DESC, p.id DESC LIMIT ?",
    )
    .bind(category_id)
    .bind(limit.unwrap_or(-1))
    .fetch_all(pool)
    .await?;
    rows.iter().map(post_from_row).collect()
}

pub(crate) async fn insert_post(
    conn: &mut SqliteConnection,
    page_id: i64,
    category_id: i64,
    date: NaiveDate,
    snippet: &str,
) -> Result<()> {
    sqlx::query("INSERT INTO posts (page_id, category_id, date, snippet) VALUES (?, ?, ?, ?)")
        .bind(page_id)
        .bind(category_id)
        .bind(date)
        .bind(snippet)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub(crate) async fn update_post(
    conn: &mut SqliteConnection,
    post: &Post,
) -> Result<()> {
    sqlx::query("UPDATE pages SET title = ?, slug = ? WHERE id = ?")
        .bind(&post.title)
        .bind(&post.slug)
        .bind(post.id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE posts SET category_id = ?, date = ?, snippet = ? WHERE page_id = ?")
        .bind(post.category_id)
        .bind(post.date)
        .bind(&post.snippet)
        .bind(post.id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Recompute the category's last post date from its posts and bump its save
/// revision. Must run after the post write. Returns the new marker and revision.
pub(crate) async fn mark_last_post(
    conn: &mut SqliteConnection,
    category_id: i64,
) -> Result<(NaiveDate, i64)> {
    let row = sqlx::query(
        "UPDATE categories \
         SET date_of_last_post = (SELECT MAX(date) FROM posts WHERE category_id = ?), \
             last_post_revision = (SELECT COALESCE(MAX(last_post_revision), 0) + 1 FROM categories) \
         WHERE page_id = ? RETURNING date_of_last_post, last_post_revision",
    )
    .bind(category_id)
    .bind(category_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| anyhow!("category {category_id} not found"))?;
    let marker: Option<NaiveDate> = row.try_get("date_of_last_post")?;
    let marker = marker.ok_or_else(|| anyhow!("category {category_id} has no posts"))?;
    Ok((marker, row.try_get("last_post_revision")?))
}

// ---------------------------------------------------------------------------
// Reddit embed snippets
// ---------------------------------------------------------------------------

#[instrument(skip_all)]
pub async fn insert_reddit_embed(
    pool: &Pool,
    title: &str,
    subreddit: &str,
    cached_posts: &[String],
    refreshed: bool,
) -> Result<i64> {
    let encoded = serde_json::to_string(cached_posts)?;
    let refreshed_at = refreshed.then(Utc::now);
    let rec = sqlx::query(
        "INSERT INTO reddit_embeds (title, subreddit, cached_posts, refreshed_at) VALUES (?, ?, ?, ?) RETURNING id",
    )
    .bind(title)
    .bind(subreddit)
    .bind(encoded)
    .bind(refreshed_at)
    .fetch_one(pool)
    .await?;
    Ok(rec.get::<i64, _>("id"))
}

#[instrument(skip_all)]
pub async fn get_reddit_embed(pool: &Pool, id: i64) -> Result<Option<RedditEmbed>> {
    let row = sqlx::query(
        "SELECT id, title, subreddit, cached_posts, refreshed_at, created_at FROM reddit_embeds WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(embed_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn list_reddit_embeds(pool: &Pool) -> Result<Vec<RedditEmbed>> {
    let rows = sqlx::query(
        "SELECT id, title, subreddit, cached_posts, refreshed_at, created_at FROM reddit_embeds ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(embed_from_row).collect()
}

/// Replace the cached fragments of a snippet. Returns false if it no longer exists.
#[instrument(skip_all)]
pub async fn update_cached_posts(pool: &Pool, id: i64, cached_posts: &[String]) -> Result<bool> {
    let encoded = serde_json::to_string(cached_posts)?;
    let res = sqlx::query(
        "UPDATE reddit_embeds SET cached_posts = ?, refreshed_at = ? WHERE id = ?",
    )
    .bind(encoded)
    .bind(Utc::now())
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn delete_reddit_embed(pool: &Pool, id: i64) -> Result<bool> {
    let res = sqlx::query("DELETE FROM reddit_embeds WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn set_page_embed(pool: &Pool, page_id: i64, embed_id: Option<i64>) -> Result<()> {
    sqlx::query("UPDATE pages SET reddit_embed_id = ? WHERE id = ?")
        .bind(embed_id)
        .bind(page_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// The snippet a hub or category points at, if any.
#[instrument(skip_all)]
pub async fn page_embed(pool: &Pool, page_id: i64) -> Result<Option<RedditEmbed>> {
    let row = sqlx::query(
        "SELECT e.id, e.title, e.subreddit, e.cached_posts, e.refreshed_at, e.created_at \
         FROM reddit_embeds e JOIN pages p ON p.reddit_embed_id = e.id WHERE p.id = ?",
    )
    .bind(page_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(embed_from_row).transpose()
}
