//! Database module: page tree, latest-post markers and the embed cache.
//!
//! This module is split into two submodules:
//! - `model`: view models assembled from several queries.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `tunerguy_hub::db`; the repository
//! API and the view models are re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::CategoryWithPosts;
