use async_trait::async_trait;
use octocrab::Octocrab;
use reqwest::header::{HeaderMap, ACCEPT, LINK, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

use crate::descriptor::{GistDescriptor, RepositoryDescriptor};
use crate::error::ApiError;
use crate::ratelimit::RateState;

/// Items requested per listing page (the API maximum).
pub const DEFAULT_PER_PAGE: u8 = 100;

const API_VERSION: &str = "2022-11-28";

/// How requests authenticate against GitHub.
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    /// Public data only, 60 requests/hour.
    Anonymous,
    /// Personal access token: private and public data.
    Token(String),
}

impl Auth {
    pub fn token(&self) -> Option<&str> {
        match self {
            Auth::Anonymous => None,
            Auth::Token(token) => Some(token),
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Anonymous => write!(f, "Anonymous"),
            Auth::Token(_) => write!(f, "Token([REDACTED])"),
        }
    }
}

/// Which listing endpoint family to call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListScope {
    /// `/users/{login}/...`: public items of any account.
    User(String),
    /// `/user/...` and `/gists`: everything the token can see.
    Authenticated,
}

/// Position in a paged listing. Page numbers start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub page: u32,
    pub per_page: u8,
}

impl PageCursor {
    pub fn first(per_page: u8) -> Self {
        Self { page: 1, per_page }
    }
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Next page number, `0` when this was the last page.
    pub next_page: u32,
    pub rate: Option<RateState>,
}

/// The narrow surface of the GitHub API the backup core needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// Login of the account owning the configured token.
    async fn authenticated_login(&self) -> Result<String, ApiError>;

    async fn repositories_page(
        &self,
        scope: &ListScope,
        cursor: PageCursor,
    ) -> Result<Page<RepositoryDescriptor>, ApiError>;

    async fn gists_page(
        &self,
        scope: &ListScope,
        cursor: PageCursor,
    ) -> Result<Page<GistDescriptor>, ApiError>;

    /// Plain GET of a raw content URL.
    async fn fetch_raw(&self, url: &str) -> Result<Vec<u8>, ApiError>;
}

/// GitHub client: octocrab for identity, reqwest for paged listings whose
/// rate-limit and `Link` headers the core has to read.
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: Url,
    auth: Auth,
    timeout: Duration,
}

impl GitHubClient {
    pub fn new(api_url: &str, auth: Auth, timeout: Duration) -> Result<Self, ApiError> {
        let api_url = normalize_base(api_url)?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ApiError::Transport {
                url: api_url.to_string(),
                source,
            })?;

        debug!("GitHub client for {} ({:?})", api_url, auth);

        Ok(Self {
            http,
            api_url,
            auth,
            timeout,
        })
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    fn endpoint(&self, path: &str, query: &[(&str, &str)], cursor: PageCursor) -> Result<Url, ApiError> {
        let mut url = self.api_url.join(path).map_err(|e| ApiError::InvalidUrl {
            url: format!("{}{}", self.api_url, path),
            reason: e.to_string(),
        })?;

        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("per_page", &cursor.per_page.to_string());
            pairs.append_pair("page", &cursor.page.to_string());
        }

        Ok(url)
    }

    async fn get_page<T: DeserializeOwned>(&self, url: Url) -> Result<Page<T>, ApiError> {
        debug!("GET {}", url);

        let mut request = self
            .http
            .get(url.clone())
            .header(USER_AGENT, user_agent())
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);

        if let Some(token) = self.auth.token() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|source| ApiError::Transport {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        let rate = rate_from_headers(response.headers());
        let next_page = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .map(next_page_from_link)
            .unwrap_or(0);

        let body = response.text().await.map_err(|source| ApiError::Transport {
            url: url.to_string(),
            source,
        })?;

        if !status.is_success() {
            return Err(status_error(status, &url, &body, rate));
        }

        let items: Vec<T> = serde_json::from_str(&body).map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })?;

        Ok(Page {
            items,
            next_page,
            rate,
        })
    }
}

#[async_trait]
impl GitHubApi for GitHubClient {
    async fn authenticated_login(&self) -> Result<String, ApiError> {
        let token = self.auth.token().ok_or_else(|| ApiError::Unauthorized {
            status: 401,
            message: "no token configured".to_string(),
        })?;

        let client = Octocrab::builder()
            .base_uri(self.api_url.as_str())?
            .personal_token(token.to_string())
            .build()?;

        let user = tokio::time::timeout(self.timeout, client.current().user())
            .await
            .map_err(|_| ApiError::Timeout(self.timeout.as_secs()))??;

        info!("Authenticated as GitHub user: {}", user.login);
        Ok(user.login)
    }

    async fn repositories_page(
        &self,
        scope: &ListScope,
        cursor: PageCursor,
    ) -> Result<Page<RepositoryDescriptor>, ApiError> {
        let url = match scope {
            ListScope::User(login) => self.endpoint(
                &format!("users/{}/repos", login),
                &[("type", "owner"), ("sort", "pushed"), ("direction", "desc")],
                cursor,
            )?,
            ListScope::Authenticated => self.endpoint(
                "user/repos",
                &[
                    ("affiliation", "owner"),
                    ("visibility", "all"),
                    ("sort", "pushed"),
                    ("direction", "desc"),
                ],
                cursor,
            )?,
        };

        self.get_page(url).await
    }

    async fn gists_page(
        &self,
        scope: &ListScope,
        cursor: PageCursor,
    ) -> Result<Page<GistDescriptor>, ApiError> {
        let url = match scope {
            ListScope::User(login) => self.endpoint(&format!("users/{}/gists", login), &[], cursor)?,
            ListScope::Authenticated => self.endpoint("gists", &[], cursor)?,
        };

        self.get_page(url).await
    }

    async fn fetch_raw(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        debug!("Fetching raw content: {}", url);

        let response = self
            .http
            .get(url)
            .header(USER_AGENT, user_agent())
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                message: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let bytes = response.bytes().await.map_err(|source| ApiError::Transport {
            url: url.to_string(),
            source,
        })?;

        Ok(bytes.to_vec())
    }
}

fn user_agent() -> String {
    format!("gitvault/{}", env!("CARGO_PKG_VERSION"))
}

/// `Url::join` drops the last path segment unless the base ends with `/`,
/// which matters for GitHub Enterprise bases like `https://ghe/api/v3`.
fn normalize_base(api_url: &str) -> Result<Url, ApiError> {
    let mut base = api_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }

    Url::parse(&base).map_err(|e| ApiError::InvalidUrl {
        url: api_url.to_string(),
        reason: e.to_string(),
    })
}

fn rate_from_headers(headers: &HeaderMap) -> Option<RateState> {
    let remaining = headers.get("x-ratelimit-remaining")?.to_str().ok()?;
    let reset = headers.get("x-ratelimit-reset")?.to_str().ok()?;
    RateState::from_headers(remaining, reset)
}

fn status_error(status: StatusCode, url: &Url, body: &str, rate: Option<RateState>) -> ApiError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect());

    let rate_limited = rate.map(|r| r.remaining == 0).unwrap_or(false);

    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized {
            status: status.as_u16(),
            message,
        },
        StatusCode::FORBIDDEN if !rate_limited => ApiError::Unauthorized {
            status: status.as_u16(),
            message,
        },
        _ => ApiError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            message,
        },
    }
}

/// Extract the page number of the `rel="next"` entry of a `Link` header.
///
/// Returns `0` when there is no next page.
pub fn next_page_from_link(header: &str) -> u32 {
    header
        .split(',')
        .filter(|part| part.contains("rel=\"next\""))
        .filter_map(|part| {
            let start = part.find('<')? + 1;
            let end = part.find('>')?;
            Url::parse(part.get(start..end)?).ok()
        })
        .find_map(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "page")
                .and_then(|(_, value)| value.parse::<u32>().ok())
        })
        .unwrap_or(0)
}
