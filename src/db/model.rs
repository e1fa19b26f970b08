//! View models returned by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use crate::model::{Category, Post};
use serde::Serialize;

/// A category and a slice of its most recent posts.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryWithPosts {
    pub category: Category,
    pub posts: Vec<Post>,
}
