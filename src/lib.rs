//! Latest-post tracking and Reddit embed caching for the TunerGuy hub site.
//!
//! - [`tracker`] keeps each category's "latest post" marker in step with post saves.
//! - [`snippets`] and [`embed`] build and refresh the cached Reddit cards.
//! - [`refresh`] is the periodic job that re-fetches every snippet.

pub mod config;
pub mod db;
pub mod embed;
pub mod hub;
pub mod model;
pub mod reddit;
pub mod refresh;
pub mod snippets;
pub mod tracker;
pub mod validators;
