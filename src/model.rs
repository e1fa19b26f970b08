use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    Home,
    Hub,
    Category,
    Post,
}

impl PageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageKind::Home => "home",
            PageKind::Hub => "hub",
            PageKind::Category => "category",
            PageKind::Post => "post",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "home" => Some(PageKind::Home),
            "hub" => Some(PageKind::Hub),
            "category" => Some(PageKind::Category),
            "post" => Some(PageKind::Post),
            _ => None,
        }
    }

    /// Whether a page of this kind may be created under `parent`
    /// (`None` means the tree root).
    pub fn allowed_under(&self, parent: Option<PageKind>) -> bool {
        matches!(
            (self, parent),
            (PageKind::Home, None)
                | (PageKind::Hub, Some(PageKind::Home))
                | (PageKind::Category, Some(PageKind::Home | PageKind::Hub))
                | (PageKind::Post, Some(PageKind::Category))
        )
    }

    /// Hubs and categories may point at a Reddit embed snippet.
    pub fn accepts_embed(&self) -> bool {
        matches!(self, PageKind::Hub | PageKind::Category)
    }
}

impl std::fmt::Display for PageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of the page tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub kind: PageKind,
    pub title: String,
    pub slug: String,
    /// Non-owning pointer to a snippet; no reverse collection is kept.
    pub reddit_embed_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A category page together with its latest-post marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub page: Page,
    pub date_of_last_post: Option<NaiveDate>,
    /// Monotonic save counter, used to break ties between equal dates.
    pub last_post_revision: i64,
}

impl Category {
    pub fn id(&self) -> i64 {
        self.page.id
    }

    /// Ordering key for "which category holds the latest post".
    /// Categories without posts always rank last.
    pub fn latest_key(&self) -> (bool, Option<NaiveDate>, i64) {
        (
            self.date_of_last_post.is_some(),
            self.date_of_last_post,
            self.last_post_revision,
        )
    }
}

/// A published post. Its category is always the structural parent and is
/// only ever written by the tracker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    pub category_id: i64,
    pub title: String,
    pub slug: String,
    pub date: NaiveDate,
    pub snippet: String,
}

/// Input for creating a post. There is deliberately no category field.
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub parent_id: i64,
    pub title: String,
    pub snippet: String,
    /// Publish date; defaults to today (UTC).
    pub date: Option<NaiveDate>,
}

/// Editable fields of an existing post.
#[derive(Debug, Clone, Default)]
pub struct PostEdit {
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub date: Option<NaiveDate>,
}

/// Reusable snippet caching a few embeddable posts for one subreddit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedditEmbed {
    pub id: i64,
    pub title: String,
    pub subreddit: String,
    pub cached_posts: Vec<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Lowercase slug: alphanumeric runs kept, everything else collapsed to `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}
