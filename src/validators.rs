use thiserror::Error;
use tracing::instrument;

use crate::embed::community_exists;
use crate::reddit::RedditService;
use crate::snippets::SnippetError;

pub const TITLE_MAX_CHARS: usize = 20;
pub const SUBREDDIT_MAX_CHARS: usize = 15;
pub const POST_SNIPPET_MAX_CHARS: usize = 200;

/// Field-level problems shown to editors. Each variant has its own message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Title cannot be empty.")]
    EmptyTitle,
    #[error("Title cannot be longer than {} characters.", TITLE_MAX_CHARS)]
    TitleTooLong,
    #[error("Subreddit name cannot be empty.")]
    EmptySubreddit,
    #[error("Enter the subreddit name without the \"r/\" prefix.")]
    SubredditPrefix,
    #[error("Subreddit name cannot be longer than {} characters.", SUBREDDIT_MAX_CHARS)]
    SubredditTooLong,
    #[error("Subreddit name cannot contain any special characters.")]
    SubredditFormat,
    #[error("Subreddit was not found, please check the name or try again later.")]
    SubredditNotFound,
    #[error("Post excerpt cannot be longer than {} characters.", POST_SNIPPET_MAX_CHARS)]
    PostSnippetTooLong,
}

impl ValidationError {
    /// Name of the form field the message belongs to.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::EmptyTitle | ValidationError::TitleTooLong => "title",
            ValidationError::PostSnippetTooLong => "snippet",
            _ => "subreddit",
        }
    }

    /// `field: message`, as shown next to the offending form field.
    pub fn form_message(&self) -> String {
        format!("{}: {}", self.field(), self)
    }
}

pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(ValidationError::TitleTooLong);
    }
    Ok(())
}

/// Alphanumeric only: no `r/` prefix, no separators, no punctuation.
pub fn validate_subreddit_format(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptySubreddit);
    }
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("r/") || lower.starts_with("/r/") {
        return Err(ValidationError::SubredditPrefix);
    }
    if name.chars().count() > SUBREDDIT_MAX_CHARS {
        return Err(ValidationError::SubredditTooLong);
    }
    if !name.chars().all(char::is_alphanumeric) {
        return Err(ValidationError::SubredditFormat);
    }
    Ok(())
}

pub fn validate_post_snippet(snippet: &str) -> Result<(), ValidationError> {
    if snippet.chars().count() > POST_SNIPPET_MAX_CHARS {
        return Err(ValidationError::PostSnippetTooLong);
    }
    Ok(())
}

/// Format check first; the existence lookup only runs for well-formed names.
/// Upstream failures other than "not found" surface as `SnippetError::Upstream`.
#[instrument(skip(reddit))]
pub async fn validate_subreddit(reddit: &dyn RedditService, name: &str) -> Result<(), SnippetError> {
    validate_subreddit_format(name)?;
    if !community_exists(reddit, name).await? {
        return Err(ValidationError::SubredditNotFound.into());
    }
    Ok(())
}
