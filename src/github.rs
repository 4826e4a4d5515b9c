//! # GitHub API Client
//!
//! Repository API collaborator for triage actions, with rate-limit tracking
//! from response headers. The [`RepoApi`] trait is the seam the executor and
//! adapter work against; [`GitHubClient`] is the production implementation.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header, Client as HttpClient, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

const GITHUB_API_URL: &str = "https://api.github.com";
const PAGE_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("GitHub API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Rate limit exceeded, reset in {reset_in:?}")]
    RateLimitExceeded { reset_in: Duration },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// An open pull request as seen by the scheduled scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestSummary {
    /// PR number.
    pub number: u64,
    /// Current label names on the PR.
    pub labels: Vec<String>,
}

/// Repository hosting API used by the triage pipeline.
///
/// Covers exactly the four collaborator operations triage needs: changed
/// files for a PR, label addition, comment creation, and the open-PR listing
/// behind the scheduled scan.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepoApi: Send + Sync {
    /// List the changed file paths for a pull request.
    async fn list_changed_files(&self, pr_number: u64) -> Result<Vec<String>, GitHubError>;

    /// Add labels to an issue or PR.
    async fn add_labels(&self, number: u64, labels: &[String]) -> Result<(), GitHubError>;

    /// Create a comment on an issue or PR.
    async fn create_comment(&self, number: u64, body: &str) -> Result<(), GitHubError>;

    /// List open pull requests with their current labels.
    async fn list_open_pull_requests(&self) -> Result<Vec<PullRequestSummary>, GitHubError>;
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct ApiErrorBody {
    message: String,
    documentation_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LabelBody {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PullBody {
    number: u64,
    #[serde(default)]
    labels: Vec<LabelBody>,
}

#[derive(Debug, Deserialize)]
struct FileBody {
    filename: String,
}

#[derive(Debug, Serialize)]
struct CommentRequest<'a> {
    body: &'a str,
}

/// Rate-limit state tracked from `x-ratelimit-*` response headers.
#[derive(Debug)]
struct RateLimit {
    remaining: i32,
    reset: Option<Instant>,
}

/// GitHub REST client for triage operations.
pub struct GitHubClient {
    http_client: HttpClient,
    base_url: String,
    token: Option<String>,
    owner: String,
    repo: String,
    rate_limit: Mutex<RateLimit>,
}

impl GitHubClient {
    /// Create a new GitHub client for one repository.
    ///
    /// Without a token, requests are unauthenticated and heavily rate
    /// limited by GitHub.
    pub fn new(token: Option<String>, owner: String, repo: String) -> Result<Self, GitHubError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            header::HeaderValue::from_static("2022-11-28"),
        );

        let http_client = HttpClient::builder()
            .user_agent("triage-controller/1.0")
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            base_url: GITHUB_API_URL.to_string(),
            token,
            owner,
            repo,
            rate_limit: Mutex::new(RateLimit {
                remaining: 5000, // GitHub's default rate limit
                reset: None,
            }),
        })
    }

    /// Override the API base URL (for testing against a local server).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Make an HTTP request with rate-limit accounting.
    async fn make_request(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response, GitHubError> {
        self.check_rate_limit()?;

        let mut request = self.http_client.request(method, url);
        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        self.update_rate_limit(&response);

        if response.status().as_u16() == 403 {
            // Check if it's a rate limit error
            if let Some(reset_in) = Self::get_rate_limit_reset(&response) {
                return Err(GitHubError::RateLimitExceeded { reset_in });
            }
        }

        Ok(response)
    }

    /// Check if we're within rate limits.
    fn check_rate_limit(&self) -> Result<(), GitHubError> {
        let mut state = self.rate_limit.lock().expect("rate limit lock poisoned");

        if let Some(reset_time) = state.reset {
            if Instant::now() < reset_time {
                return Err(GitHubError::RateLimitExceeded {
                    reset_in: reset_time - Instant::now(),
                });
            }
            // The window rolled over; let requests through again and pick up
            // fresh counters from the next response's headers.
            state.reset = None;
            state.remaining = 1;
        }

        if state.remaining <= 0 {
            // Exhausted without a reset header; back off for a minute
            // rather than wedging until restart.
            let backoff = Duration::from_secs(60);
            state.reset = Some(Instant::now() + backoff);
            return Err(GitHubError::RateLimitExceeded { reset_in: backoff });
        }

        Ok(())
    }

    /// Update rate-limit tracking from response headers.
    fn update_rate_limit(&self, response: &Response) {
        let mut state = self.rate_limit.lock().expect("rate limit lock poisoned");

        if let Some(remaining) = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<i32>().ok())
        {
            state.remaining = remaining;
        }

        if state.remaining <= 0 {
            if let Some(reset) = response
                .headers()
                .get("x-ratelimit-reset")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<i64>().ok())
            {
                let now = chrono::Utc::now().timestamp();
                #[allow(clippy::cast_sign_loss)]
                let seconds_until_reset = (reset - now).max(0) as u64;
                state.reset = Some(Instant::now() + Duration::from_secs(seconds_until_reset));
            }
        } else {
            state.reset = None;
        }
    }

    /// Extract rate-limit reset time from a 403 response.
    fn get_rate_limit_reset(response: &Response) -> Option<Duration> {
        response
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.parse::<i64>().ok())
            .map(|reset_timestamp| {
                let now = chrono::Utc::now().timestamp();
                #[allow(clippy::cast_sign_loss)]
                let seconds_until_reset = (reset_timestamp - now).max(0) as u64;
                Duration::from_secs(seconds_until_reset)
            })
    }

    /// Turn an unsuccessful response into an `ApiError`.
    async fn api_error(response: Response) -> GitHubError {
        let status = response.status().as_u16();
        let message = match response.json::<ApiErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => "unparseable error body".to_string(),
        };
        GitHubError::ApiError { status, message }
    }
}

#[async_trait]
impl RepoApi for GitHubClient {
    #[instrument(skip(self), fields(pr_number = %pr_number))]
    async fn list_changed_files(&self, pr_number: u64) -> Result<Vec<String>, GitHubError> {
        let mut files = Vec::new();
        let mut page = 1;

        loop {
            let url = format!(
                "{}/repos/{}/{}/pulls/{}/files?per_page={PAGE_SIZE}&page={page}",
                self.base_url, self.owner, self.repo, pr_number
            );

            let response = self.make_request(reqwest::Method::GET, &url, None).await?;
            if !response.status().is_success() {
                return Err(Self::api_error(response).await);
            }

            let batch: Vec<FileBody> = response.json().await?;
            let batch_len = batch.len();
            files.extend(batch.into_iter().map(|f| f.filename));

            if batch_len < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        debug!("Retrieved {} changed files for PR #{}", files.len(), pr_number);
        Ok(files)
    }

    #[instrument(skip(self), fields(number = %number, labels = ?labels))]
    async fn add_labels(&self, number: u64, labels: &[String]) -> Result<(), GitHubError> {
        if labels.is_empty() {
            return Ok(());
        }

        let url = format!(
            "{}/repos/{}/{}/issues/{}/labels",
            self.base_url, self.owner, self.repo, number
        );

        let body = serde_json::json!({ "labels": labels });
        let response = self
            .make_request(reqwest::Method::POST, &url, Some(body))
            .await?;

        if response.status().is_success() {
            info!("Added {} labels to #{}", labels.len(), number);
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }

    #[instrument(skip(self, body), fields(number = %number))]
    async fn create_comment(&self, number: u64, body: &str) -> Result<(), GitHubError> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments",
            self.base_url, self.owner, self.repo, number
        );

        let request = serde_json::to_value(CommentRequest { body })?;
        let response = self
            .make_request(reqwest::Method::POST, &url, Some(request))
            .await?;

        if response.status().is_success() {
            info!("Created comment on #{}", number);
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }

    #[instrument(skip(self))]
    async fn list_open_pull_requests(&self) -> Result<Vec<PullRequestSummary>, GitHubError> {
        let mut pulls = Vec::new();
        let mut page = 1;

        loop {
            let url = format!(
                "{}/repos/{}/{}/pulls?state=open&per_page={PAGE_SIZE}&page={page}",
                self.base_url, self.owner, self.repo
            );

            let response = self.make_request(reqwest::Method::GET, &url, None).await?;
            if !response.status().is_success() {
                return Err(Self::api_error(response).await);
            }

            let batch: Vec<PullBody> = response.json().await?;
            let batch_len = batch.len();
            pulls.extend(batch.into_iter().map(|pr| PullRequestSummary {
                number: pr.number,
                labels: pr.labels.into_iter().map(|l| l.name).collect(),
            }));

            if batch_len < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        debug!("Retrieved {} open pull requests", pulls.len());
        Ok(pulls)
    }
}
