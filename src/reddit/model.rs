use serde::{Deserialize, Serialize};

/// A post as returned by a subreddit listing.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub author: String,
    pub title: String,
    /// Path below `https://www.reddit.com`, e.g. `/r/formula1/comments/abc/x/`.
    pub permalink: String,
    /// Display name of the subreddit, without the `r/` prefix.
    pub subreddit: String,
}

impl Submission {
    /// Relative URL of the source subreddit, `/r/{name}/`.
    pub fn subreddit_url(&self) -> String {
        format!("/r/{}/", self.subreddit)
    }
}

#[derive(Deserialize, Debug)]
pub struct Listing<T> {
    pub data: ListingData<T>,
}

#[derive(Deserialize, Debug)]
pub struct ListingData<T> {
    pub children: Vec<Thing<T>>,
}

#[derive(Deserialize, Debug)]
pub struct Thing<T> {
    pub data: T,
}

/// `about/moderators` returns users directly under `children`.
#[derive(Deserialize, Debug)]
pub struct UserList {
    pub data: UserListData,
}

#[derive(Deserialize, Debug)]
pub struct UserListData {
    pub children: Vec<UserEntry>,
}

#[derive(Deserialize, Debug)]
pub struct UserEntry {
    pub name: String,
}

/// Token endpoint reply. Reddit answers failed password grants with a 200
/// and an `error` field.
#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub error: Option<String>,
}
