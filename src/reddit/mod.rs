use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode, Url};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::reddit::model::{Listing, TokenResponse, UserList};

pub mod model;

pub use model::Submission;

const REDDIT_AUTH_URL: &str = "https://www.reddit.com/api/v1/access_token";
const REDDIT_API_BASE: &str = "https://oauth.reddit.com/";

/// Renew the bearer token this long before Reddit says it expires.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum RedditError {
    /// The subreddit (or endpoint) does not exist. The only recoverable kind.
    #[error("not found on Reddit")]
    NotFound,
    #[error("rate limited by Reddit: {0}")]
    RateLimited(String),
    #[error("Reddit authentication failed: {0}")]
    Auth(String),
    #[error("Reddit error {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to reach Reddit: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid Reddit response: {0}")]
    Decode(String),
    #[error("invalid Reddit URL: {0}")]
    InvalidUrl(String),
}

/// Script-app credentials for the password grant.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub user_agent: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

impl From<&Config> for Credentials {
    fn from(cfg: &Config) -> Self {
        Self {
            client_id: cfg.reddit.client_id.clone(),
            client_secret: cfg.reddit.client_secret.clone(),
            username: cfg.reddit.username.clone(),
            password: cfg.reddit.password.clone(),
            user_agent: cfg.reddit.user_agent.clone(),
        }
    }
}

/// The slice of the Reddit API the embed cache consumes.
#[async_trait]
pub trait RedditService: Send + Sync {
    /// Usernames of the subreddit's current moderators.
    async fn moderators(&self, subreddit: &str) -> Result<Vec<String>, RedditError>;

    /// Up to `limit` posts in "hot" order.
    async fn hot(&self, subreddit: &str, limit: usize) -> Result<Vec<Submission>, RedditError>;

    /// Succeeds when a subreddit with exactly this name exists;
    /// `RedditError::NotFound` otherwise.
    async fn search_by_exact_name(&self, name: &str) -> Result<(), RedditError>;
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct RedditClient {
    http: Client,
    auth_url: Url,
    api_base: Url,
    credentials: Credentials,
    token: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for RedditClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedditClient")
            .field("auth_url", &self.auth_url)
            .field("api_base", &self.api_base)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

fn parse_url(raw: &str) -> Result<Url, RedditError> {
    Url::parse(raw).map_err(|e| RedditError::InvalidUrl(format!("{raw}: {e}")))
}

impl RedditClient {
    pub fn new(credentials: Credentials, timeout: Duration) -> Result<Self, RedditError> {
        Self::with_urls(
            credentials,
            timeout,
            parse_url(REDDIT_AUTH_URL)?,
            parse_url(REDDIT_API_BASE)?,
        )
    }

    pub fn from_config(cfg: &Config) -> Result<Self, RedditError> {
        Self::new(Credentials::from(cfg), cfg.request_timeout())
    }

    pub fn with_urls(
        credentials: Credentials,
        timeout: Duration,
        auth_url: Url,
        api_base: Url,
    ) -> Result<Self, RedditError> {
        let http = Client::builder()
            .user_agent(credentials.user_agent.clone())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            auth_url,
            api_base,
            credentials,
            token: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RedditError> {
        self.api_base
            .join(path)
            .map_err(|e| RedditError::InvalidUrl(format!("{path}: {e}")))
    }

    pub fn build_token_request(&self) -> Result<reqwest::Request, RedditError> {
        let c = &self.credentials;
        self.http
            .post(self.auth_url.clone())
            .basic_auth(&c.client_id, Some(&c.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", c.username.as_str()),
                ("password", c.password.as_str()),
            ])
            .build()
            .map_err(RedditError::from)
    }

    pub fn build_get(
        &self,
        path: &str,
        query: &[(&str, &str)],
        token: &str,
    ) -> Result<reqwest::Request, RedditError> {
        self.http
            .get(self.endpoint(path)?)
            .bearer_auth(token)
            .query(&[("raw_json", "1")])
            .query(query)
            .build()
            .map_err(RedditError::from)
    }

    pub fn build_post_form(
        &self,
        path: &str,
        form: &[(&str, &str)],
        token: &str,
    ) -> Result<reqwest::Request, RedditError> {
        self.http
            .post(self.endpoint(path)?)
            .bearer_auth(token)
            .query(&[("raw_json", "1")])
            .form(form)
            .build()
            .map_err(RedditError::from)
    }

    async fn send(&self, request: reqwest::Request) -> Result<Response, RedditError> {
        debug!(method = %request.method(), url = %request.url(), "reddit request");
        let res = self.http.execute(request).await?;
        let status = res.status();
        debug!(%status, "reddit response");
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        Err(classify_failure(status, body))
    }

    /// Send an authenticated API call. A 401 drops the cached token so the
    /// next call signs in again.
    async fn send_api(&self, request: reqwest::Request) -> Result<Response, RedditError> {
        let result = self.send(request).await;
        if let Err(RedditError::Auth(_)) = &result {
            warn!("Reddit rejected the bearer token; discarding it");
            self.token.lock().await.take();
        }
        result
    }

    /// Run the password grant. Returns the bearer token and its lifetime in seconds.
    pub async fn authenticate(&self) -> Result<(String, i64), RedditError> {
        let request = self.build_token_request()?;
        let res = self.send(request).await.map_err(|err| match err {
            RedditError::NotFound => RedditError::Auth("token endpoint not found".into()),
            other => other,
        })?;
        let payload: TokenResponse = res.json().await?;
        parse_token(payload)
    }

    async fn bearer(&self) -> Result<String, RedditError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Utc::now() {
                return Ok(token.value.clone());
            }
        }
        let (value, ttl) = self.authenticate().await?;
        let lifetime = chrono::Duration::seconds((ttl - TOKEN_EXPIRY_MARGIN_SECS).max(0));
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Utc::now() + lifetime,
        });
        info!(ttl, "authenticated with Reddit");
        Ok(value)
    }
}

fn parse_token(payload: TokenResponse) -> Result<(String, i64), RedditError> {
    if let Some(error) = payload.error {
        return Err(RedditError::Auth(error));
    }
    let token = payload
        .access_token
        .ok_or_else(|| RedditError::Decode("token response without access_token".into()))?;
    if let Some(kind) = payload.token_type.as_deref() {
        if !kind.eq_ignore_ascii_case("bearer") {
            return Err(RedditError::Auth(format!("unexpected token type: {kind}")));
        }
    }
    Ok((token, payload.expires_in.unwrap_or(3600)))
}

/// Map a non-success HTTP status to an error kind.
pub fn classify_failure(status: StatusCode, body: String) -> RedditError {
    match status {
        StatusCode::NOT_FOUND => RedditError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => {
            warn!("Rate limited by Reddit: {}", body);
            RedditError::RateLimited(body)
        }
        StatusCode::UNAUTHORIZED => RedditError::Auth(format!("{status}: {body}")),
        _ => RedditError::Status { status, body },
    }
}

#[async_trait]
impl RedditService for RedditClient {
    async fn moderators(&self, subreddit: &str) -> Result<Vec<String>, RedditError> {
        let token = self.bearer().await?;
        let request = self.build_get(&format!("r/{subreddit}/about/moderators"), &[], &token)?;
        let payload: UserList = self.send_api(request).await?.json().await?;
        Ok(payload.data.children.into_iter().map(|u| u.name).collect())
    }

    async fn hot(&self, subreddit: &str, limit: usize) -> Result<Vec<Submission>, RedditError> {
        let token = self.bearer().await?;
        let limit = limit.to_string();
        let request = self.build_get(
            &format!("r/{subreddit}/hot"),
            &[("limit", limit.as_str())],
            &token,
        )?;
        let payload: Listing<Submission> = self.send_api(request).await?.json().await?;
        Ok(payload.data.children.into_iter().map(|t| t.data).collect())
    }

    async fn search_by_exact_name(&self, name: &str) -> Result<(), RedditError> {
        let token = self.bearer().await?;
        let request = self.build_post_form(
            "api/search_reddit_names",
            &[("query", name), ("exact", "true"), ("include_over_18", "true")],
            &token,
        )?;
        self.send_api(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn client() -> RedditClient {
        RedditClient::new(credentials(), Duration::from_secs(5)).unwrap()
    }

    fn header<'a>(request: &'a reqwest::Request, name: &str) -> &'a str {
        request
            .headers()
            .get(name)
            .and_then(|h| h.to_str().ok())
            .unwrap()
    }

    #[test]
    fn token_request_uses_basic_auth_and_password_grant() {
        let request = client().build_token_request().unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().as_str(), REDDIT_AUTH_URL);
        // base64("cid:secret")
        assert_eq!(header(&request, "Authorization"), "Basic Y2lkOnNlY3JldA==");
        let body = request
            .body()
            .and_then(|b| b.as_bytes())
            .map(|b| String::from_utf8_lossy(b).to_string())
            .unwrap();
        assert_eq!(body, "grant_type=password&username=bot&password=hunter2");
    }

    #[test]
    fn get_request_sets_bearer_and_raw_json() {
        let request = client()
            .build_get("r/formula1/hot", &[("limit", "10")], "tok")
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::GET);
        assert_eq!(request.url().host_str(), Some("oauth.reddit.com"));
        assert_eq!(request.url().path(), "/r/formula1/hot");
        assert_eq!(request.url().query(), Some("raw_json=1&limit=10"));
        assert_eq!(header(&request, "Authorization"), "Bearer tok");
    }

    #[test]
    fn search_request_is_exact_form_post() {
        let request = client()
            .build_post_form(
                "api/search_reddit_names",
                &[("query", "formula1"), ("exact", "true")],
                "tok",
            )
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/api/search_reddit_names");
        assert_eq!(
            header(&request, "Content-Type"),
            "application/x-www-form-urlencoded"
        );
    }

    #[test]
    fn failures_are_classified() {
        assert!(matches!(
            classify_failure(StatusCode::NOT_FOUND, String::new()),
            RedditError::NotFound
        ));
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down".into()),
            RedditError::RateLimited(body) if body == "slow down"
        ));
        assert!(matches!(
            classify_failure(StatusCode::UNAUTHORIZED, String::new()),
            RedditError::Auth(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::FORBIDDEN, "private".into()),
            RedditError::Status { status, .. } if status == StatusCode::FORBIDDEN
        ));
    }

    #[test]
    fn token_payloads() {
        let ok: TokenResponse = serde_json::from_value(json!({
            "access_token": "abc",
            "token_type": "bearer",
            "expires_in": 86400,
            "scope": "*"
        }))
        .unwrap();
        assert_eq!(parse_token(ok).unwrap(), ("abc".to_string(), 86400));

        let rejected: TokenResponse =
            serde_json::from_value(json!({ "error": "invalid_grant" })).unwrap();
        assert!(matches!(parse_token(rejected), Err(RedditError::Auth(e)) if e == "invalid_grant"));

        let empty: TokenResponse = serde_json::from_value(json!({})).unwrap();
        assert!(matches!(parse_token(empty), Err(RedditError::Decode(_))));
    }

    #[test]
    fn listing_payloads_decode() {
        let hot: Listing<Submission> = serde_json::from_value(json!({
            "kind": "Listing",
            "data": {
                "after": null,
                "children": [
                    { "kind": "t3", "data": {
                        "author": "f1mod",
                        "title": "Daily Discussion",
                        "permalink": "/r/formula1/comments/1/daily/",
                        "subreddit": "formula1",
                        "stickied": true
                    }},
                    { "kind": "t3", "data": {
                        "author": "fan",
                        "title": "Great race",
                        "permalink": "/r/formula1/comments/2/great/",
                        "subreddit": "formula1"
                    }}
                ]
            }
        }))
        .unwrap();
        let posts: Vec<Submission> = hot.data.children.into_iter().map(|t| t.data).collect();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[1].author, "fan");
        assert_eq!(posts[1].subreddit_url(), "/r/formula1/");

        let mods: UserList = serde_json::from_value(json!({
            "kind": "UserList",
            "data": { "children": [
                { "name": "f1mod", "id": "t2_1", "mod_permissions": ["all"] },
                { "name": "AutoModerator", "id": "t2_2" }
            ]}
        }))
        .unwrap();
        let names: Vec<String> = mods.data.children.into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec!["f1mod", "AutoModerator"]);
    }

    fn credentials() -> Credentials {
        Credentials {
            client_id: "cid".into(),
            client_secret: "secret".into(),
            username: "bot".into(),
            password: "hunter2".into(),
            user_agent: "tunerguy-hub/test".into(),
        }
    }

    fn local_client(addr: SocketAddr, timeout: Duration) -> RedditClient {
        RedditClient::with_urls(
            credentials(),
            timeout,
            Url::parse(&format!("http://{addr}/api/v1/access_token")).unwrap(),
            Url::parse(&format!("http://{addr}/")).unwrap(),
        )
        .unwrap()
    }

    /// Reads one request and returns its request line.
    fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).unwrap_or(0);
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_string();
                let body_len = head
                    .lines()
                    .find_map(|l| {
                        let l = l.to_ascii_lowercase();
                        l.strip_prefix("content-length:")
                            .and_then(|v| v.trim().parse::<usize>().ok())
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    }

    /// Plain HTTP/1.1 responder on a background thread; `respond` maps a
    /// request line to a status line and JSON body.
    fn serve<F>(respond: F) -> SocketAddr
    where
        F: Fn(&str) -> (&'static str, String) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let request_line = read_request(&mut stream);
                let (status, body) = respond(&request_line);
                let reply = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(reply.as_bytes());
            }
        });
        addr
    }

    #[tokio::test]
    async fn rejected_token_is_dropped_and_renewed() {
        let token_hits = Arc::new(AtomicUsize::new(0));
        let api_hits = Arc::new(AtomicUsize::new(0));
        let (tokens, calls) = (token_hits.clone(), api_hits.clone());
        let addr = serve(move |line| {
            if line.contains("/api/v1/access_token") {
                let n = tokens.fetch_add(1, Ordering::SeqCst);
                let body = json!({
                    "access_token": format!("tok-{n}"),
                    "token_type": "bearer",
                    "expires_in": 3600
                });
                ("200 OK", body.to_string())
            } else {
                calls.fetch_add(1, Ordering::SeqCst);
                ("401 Unauthorized", json!({ "message": "Unauthorized" }).to_string())
            }
        });
        let reddit = local_client(addr, Duration::from_secs(5));

        for _ in 0..2 {
            let err = reddit.hot("formula1", 10).await.unwrap_err();
            assert!(matches!(err, RedditError::Auth(_)), "{err}");
        }
        assert_eq!(api_hits.load(Ordering::SeqCst), 2);
        assert_eq!(token_hits.load(Ordering::SeqCst), 2);
        assert!(reddit.token.lock().await.is_none());
    }

    #[tokio::test]
    async fn accepted_token_is_reused() {
        let token_hits = Arc::new(AtomicUsize::new(0));
        let tokens = token_hits.clone();
        let addr = serve(move |line| {
            if line.contains("/api/v1/access_token") {
                tokens.fetch_add(1, Ordering::SeqCst);
                let body = json!({ "access_token": "tok", "token_type": "bearer", "expires_in": 3600 });
                ("200 OK", body.to_string())
            } else {
                let body = json!({ "kind": "UserList", "data": { "children": [{ "name": "f1mod" }] } });
                ("200 OK", body.to_string())
            }
        });
        let reddit = local_client(addr, Duration::from_secs(5));

        assert_eq!(reddit.moderators("formula1").await.unwrap(), vec!["f1mod"]);
        assert_eq!(reddit.moderators("formula1").await.unwrap(), vec!["f1mod"]);
        assert_eq!(token_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn configured_timeout_bounds_requests() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming().flatten() {
                held.push(stream);
            }
        });

        let yaml = crate::config::example().replace("request_timeout_secs: 10", "request_timeout_secs: 1");
        let cfg: Config = serde_yaml::from_str(&yaml).unwrap();
        let reddit = local_client(addr, cfg.request_timeout());

        let started = std::time::Instant::now();
        let err = reddit.hot("formula1", 10).await.unwrap_err();
        assert!(matches!(err, RedditError::Http(ref e) if e.is_timeout()), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn transport_failure_is_not_a_missing_community() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let reddit = local_client(addr, Duration::from_secs(2));

        let err = crate::embed::community_exists(&reddit, "formula1")
            .await
            .unwrap_err();
        assert!(matches!(err, RedditError::Http(_)), "{err}");
    }
}
