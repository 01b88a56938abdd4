//! GitHub REST access.
//!
//! [`HttpClient`] is a thin blocking JSON client: GET requests take a typed
//! query struct, POST requests a typed JSON body, and every non-2xx status is
//! mapped to an [`ApiError`]. [`GitHubClient`] builds the handful of
//! repository endpoints the changelog and release commands need on top of it
//! and exposes them through the [`ReleaseApi`] trait, which is what the
//! orchestration code depends on.

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const USER_AGENT_VALUE: &str = concat!("issuelog/", env!("CARGO_PKG_VERSION"));
const ISSUES_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The resource does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    #[error("API error {status} for {url}: {message}")]
    Status {
        status: u16,
        url: String,
        message: String,
    },

    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("failed to decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("invalid access token: {0}")]
    InvalidToken(String),
}

/// Query parameters for listing repository issues.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IssueQuery<'a> {
    pub state: &'a str,
    pub sort: &'a str,
    pub filter: &'a str,
    pub since: String,
    pub labels: &'a str,
    pub per_page: u32,
    pub page: u32,
}

impl<'a> IssueQuery<'a> {
    pub fn closed_with_label(label: &'a str, since: DateTime<Utc>) -> Self {
        Self {
            state: "closed",
            sort: "created",
            filter: "all",
            since: since.to_rfc3339_opts(SecondsFormat::Secs, true),
            labels: label,
            per_page: ISSUES_PER_PAGE,
            page: 1,
        }
    }
}

/// Body of a create-release request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CreateRelease {
    pub tag_name: String,
    pub name: String,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Issue {
    pub title: String,
    pub number: u64,
    #[serde(rename = "html_url")]
    pub url: String,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// Remote operations used by the changelog and release commands.
pub trait ReleaseApi: Sync {
    fn latest_release_tag(&self) -> Result<String, ApiError>;
    fn tag_commit_date(&self, tag: &str) -> Result<DateTime<Utc>, ApiError>;
    fn closed_issues_since(
        &self,
        label: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Issue>, ApiError>;
    fn create_release(&self, release: &CreateRelease) -> Result<Release, ApiError>;
}

pub struct HttpClient {
    client: Client,
    headers: HeaderMap,
}

// Custom Debug to keep the token out of logs
impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient").finish_non_exhaustive()
    }
}

impl HttpClient {
    pub fn new(token: &str) -> Result<Self, ApiError> {
        let mut auth = HeaderValue::from_str(&format!("token {token}"))
            .map_err(|err| ApiError::InvalidToken(err.to_string()))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        Ok(Self {
            client: Client::new(),
            headers,
        })
    }

    pub fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        self.send(url, self.client.get(url))
    }

    pub fn get_with_query<Q, T>(&self, url: &str, query: &Q) -> Result<T, ApiError>
    where
        Q: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(url, self.client.get(url).query(query))
    }

    pub fn post<B, T>(&self, url: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(url, self.client.post(url).json(body))
    }

    fn send<T: DeserializeOwned>(&self, url: &str, request: RequestBuilder) -> Result<T, ApiError> {
        tracing::debug!(url, "sending request");
        let response = request
            .headers(self.headers.clone())
            .send()
            .map_err(|err| ApiError::Network {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        let text = response.text().map_err(|err| ApiError::Network {
            url: url.to_string(),
            message: err.to_string(),
        })?;

        if !status.is_success() {
            return Err(status_error(url, status, &text));
        }

        serde_json::from_str(&text).map_err(|err| ApiError::Decode {
            url: url.to_string(),
            message: err.to_string(),
        })
    }
}

fn status_error(url: &str, status: StatusCode, body: &str) -> ApiError {
    if status == StatusCode::NOT_FOUND {
        return ApiError::NotFound(url.to_string());
    }

    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|parsed| parsed.message)
        .unwrap_or_else(|_| body.trim().to_string());
    ApiError::Status {
        status: status.as_u16(),
        url: url.to_string(),
        message,
    }
}

#[derive(Debug, Deserialize)]
struct LatestRelease {
    tag_name: String,
}

#[derive(Debug, Deserialize)]
struct GitObjectRef {
    #[serde(rename = "type")]
    kind: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct TagRef {
    object: GitObjectRef,
}

#[derive(Debug, Deserialize)]
struct Signature {
    date: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct GitCommit {
    committer: Signature,
}

#[derive(Debug)]
pub struct GitHubClient {
    http: HttpClient,
    repo_url: String,
}

impl GitHubClient {
    pub fn new(api_url: &str, owner: &str, repo: &str, token: &str) -> Result<Self, ApiError> {
        Ok(Self {
            http: HttpClient::new(token)?,
            repo_url: repo_url(api_url, owner, repo),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.repo_url)
    }
}

pub fn repo_url(api_url: &str, owner: &str, repo: &str) -> String {
    format!("{}/repos/{owner}/{repo}", api_url.trim_end_matches('/'))
}

impl ReleaseApi for GitHubClient {
    fn latest_release_tag(&self) -> Result<String, ApiError> {
        let release: LatestRelease = self.http.get(&self.url("releases/latest"))?;
        Ok(release.tag_name)
    }

    fn tag_commit_date(&self, tag: &str) -> Result<DateTime<Utc>, ApiError> {
        let tag_ref: TagRef = self.http.get(&self.url(&format!("git/ref/tags/{tag}")))?;

        // Annotated tags point at a tag object, which in turn points at the commit.
        let mut object = tag_ref.object;
        while object.kind == "tag" {
            let tag_object: TagRef = self.http.get(&object.url)?;
            object = tag_object.object;
        }

        let commit: GitCommit = self.http.get(&object.url)?;
        Ok(commit.committer.date)
    }

    fn closed_issues_since(
        &self,
        label: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Issue>, ApiError> {
        let url = self.url("issues");
        let mut query = IssueQuery::closed_with_label(label, since);
        let mut issues = Vec::new();

        loop {
            let page: Vec<Issue> = self.http.get_with_query(&url, &query)?;
            let last_page = page.len() < query.per_page as usize;
            issues.extend(page);
            if last_page {
                break;
            }
            query.page += 1;
        }

        Ok(issues)
    }

    fn create_release(&self, release: &CreateRelease) -> Result<Release, ApiError> {
        self.http.post(&self.url("releases"), release)
    }
}
