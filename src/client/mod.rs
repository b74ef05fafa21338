pub mod retry;
mod wire;

use crate::error::{ApiError, ApiResult, ConfigError};
use crate::model::{DiffFile, Project, RunWindow};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub use retry::{ResponseClass, RetryPolicy};

pub const TOKEN_HEADER: &str = "PRIVATE-TOKEN";
pub const DEFAULT_PER_PAGE: u32 = 100;

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: u64,
    pub username: String,
    pub is_admin: Option<bool>,
}

/// A commit as it appears in a branch listing, before details are fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub sha: String,
    pub title: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub authored_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitDetail {
    /// `(additions, deletions)` when the server reports them.
    pub stats: Option<(u64, u64)>,
}

/// Server-side date filtering applied to a commit listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFilter {
    SinceUntil,
    SinceOnly,
    Unfiltered,
}

impl DateFilter {
    /// The next, less demanding query shape to try when a server rejects this one.
    pub fn fallback(self) -> Option<DateFilter> {
        match self {
            DateFilter::SinceUntil => Some(DateFilter::SinceOnly),
            DateFilter::SinceOnly => Some(DateFilter::Unfiltered),
            DateFilter::Unfiltered => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CommitQuery<'a> {
    pub project_id: u64,
    pub ref_name: &'a str,
    pub window: &'a RunWindow,
    pub filter: DateFilter,
}

/// The slice of the GitLab API the collector consumes.
#[async_trait]
pub trait GitLabApi: Send + Sync {
    async fn current_user(&self) -> ApiResult<CurrentUser>;

    async fn projects_page(&self, page: u32) -> ApiResult<Page<Project>>;

    async fn branches_page(&self, project_id: u64, page: u32) -> ApiResult<Page<String>>;

    async fn commits_page(&self, query: &CommitQuery<'_>, page: u32) -> ApiResult<Page<CommitSummary>>;

    async fn commit_detail(&self, project_id: u64, sha: &str) -> ApiResult<CommitDetail>;

    async fn commit_diff_page(&self, project_id: u64, sha: &str, page: u32) -> ApiResult<Page<DiffFile>>;
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub per_page: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

/// Authenticated GitLab transport. Each run builds its own instance.
#[derive(Clone)]
pub struct GitLabClient {
    http: Client,
    api_base: Url,
    token: String,
    retry: RetryPolicy,
    per_page: u32,
}

struct Fetched {
    headers: HeaderMap,
    body: Vec<u8>,
}

impl GitLabClient {
    pub fn new(gitlab_url: &str, token: &str, settings: &ClientSettings) -> Result<Self, ConfigError> {
        let api_base = api_base(gitlab_url)?;
        if token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        let http = Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("gitlab-commits/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::InvalidSetting {
                name: "http client".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            api_base,
            token: token.trim().to_string(),
            retry: settings.retry.clone(),
            per_page: settings.per_page.clamp(1, 100),
        })
    }

    fn endpoint(&self, path: &str) -> ApiResult<Url> {
        self.api_base.join(path).map_err(|e| ApiError::Rejected {
            status: 0,
            body: format!("invalid endpoint {path}: {e}"),
        })
    }

    /// Sends a GET with the credential attached, retrying throttled and transient failures.
    async fn send(&self, path: &str, query: &[(&str, String)], resource: &str) -> ApiResult<Fetched> {
        let url = self.endpoint(path)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let (class, hint, reason) = match self
                .http
                .get(url.clone())
                .header(TOKEN_HEADER, &self.token)
                .query(query)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    let headers = response.headers().clone();
                    match retry::classify(status, &headers) {
                        ResponseClass::Success => match response.bytes().await {
                            Ok(body) => {
                                return Ok(Fetched {
                                    headers,
                                    body: body.to_vec(),
                                })
                            }
                            Err(e) => (ResponseClass::Transient, None, e.to_string()),
                        },
                        ResponseClass::Unauthorized => {
                            return Err(ApiError::Unauthorized {
                                status: status.as_u16(),
                            })
                        }
                        ResponseClass::NotFound => {
                            return Err(ApiError::NotFound {
                                resource: resource.to_string(),
                            })
                        }
                        ResponseClass::Rejected => {
                            let body = response.text().await.unwrap_or_default();
                            return Err(ApiError::Rejected {
                                status: status.as_u16(),
                                body: truncate(&body, 200),
                            });
                        }
                        class => (
                            class,
                            retry::retry_after(&headers, Utc::now()),
                            format!("HTTP {status}"),
                        ),
                    }
                }
                Err(e) => (ResponseClass::Transient, None, e.to_string()),
            };

            if self.retry.exhausted(attempt) {
                warn!(resource, attempt, %reason, "giving up after retries");
                return Err(match class {
                    ResponseClass::RateLimited => ApiError::RateLimited { attempts: attempt },
                    _ => ApiError::Transient {
                        attempts: attempt,
                        reason,
                    },
                });
            }
            let delay = self.retry.delay(attempt, hint);
            debug!(resource, attempt, ?delay, %reason, "retrying request");
            tokio::time::sleep(delay).await;
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        resource: &str,
    ) -> ApiResult<(T, HeaderMap)> {
        let fetched = self.send(path, query, resource).await?;
        let value = serde_json::from_slice(&fetched.body).map_err(|e| ApiError::Decode {
            resource: resource.to_string(),
            reason: e.to_string(),
        })?;
        Ok((value, fetched.headers))
    }

    async fn get_page<W: DeserializeOwned>(
        &self,
        path: &str,
        mut query: Vec<(&str, String)>,
        page: u32,
        resource: &str,
    ) -> ApiResult<Page<W>> {
        query.push(("page", page.to_string()));
        query.push(("per_page", self.per_page.to_string()));
        let (items, headers): (Vec<W>, _) = self.get_json(path, &query, resource).await?;
        let next_page = next_page(&headers, page, items.len(), self.per_page);
        Ok(Page { items, next_page })
    }
}

#[async_trait]
impl GitLabApi for GitLabClient {
    async fn current_user(&self) -> ApiResult<CurrentUser> {
        let (user, _): (wire::WireUser, _) = self.get_json("user", &[], "current user").await?;
        Ok(user.into())
    }

    async fn projects_page(&self, page: u32) -> ApiResult<Page<Project>> {
        let query = vec![
            ("order_by", "id".to_string()),
            ("sort", "asc".to_string()),
            ("simple", "true".to_string()),
        ];
        let raw: Page<wire::WireProject> = self.get_page("projects", query, page, "projects").await?;
        Ok(Page {
            items: raw.items.into_iter().map(Project::from).collect(),
            next_page: raw.next_page,
        })
    }

    async fn branches_page(&self, project_id: u64, page: u32) -> ApiResult<Page<String>> {
        let path = format!("projects/{project_id}/repository/branches");
        let resource = format!("branches of project {project_id}");
        let raw: Page<wire::WireBranch> = self.get_page(&path, Vec::new(), page, &resource).await?;
        Ok(Page {
            items: raw.items.into_iter().map(|b| b.name).collect(),
            next_page: raw.next_page,
        })
    }

    async fn commits_page(&self, query: &CommitQuery<'_>, page: u32) -> ApiResult<Page<CommitSummary>> {
        let path = format!("projects/{}/repository/commits", query.project_id);
        let resource = format!("commits of project {} on {}", query.project_id, query.ref_name);
        let mut params = vec![("ref_name", query.ref_name.to_string())];
        match query.filter {
            DateFilter::SinceUntil => {
                params.push(("since", rfc3339(&query.window.since)));
                params.push(("until", rfc3339(&query.window.until)));
            }
            DateFilter::SinceOnly => params.push(("since", rfc3339(&query.window.since))),
            DateFilter::Unfiltered => {}
        }
        let raw: Page<wire::WireCommit> = self.get_page(&path, params, page, &resource).await?;
        let total = raw.items.len();
        let items: Vec<CommitSummary> = raw
            .items
            .into_iter()
            .filter_map(wire::WireCommit::into_summary)
            .collect();
        if items.len() < total {
            warn!(
                project_id = query.project_id,
                dropped = total - items.len(),
                "commits without an author date were ignored"
            );
        }
        Ok(Page {
            items,
            next_page: raw.next_page,
        })
    }

    async fn commit_detail(&self, project_id: u64, sha: &str) -> ApiResult<CommitDetail> {
        let path = format!("projects/{project_id}/repository/commits/{sha}");
        let resource = format!("commit {sha} of project {project_id}");
        let query = [("stats", "true".to_string())];
        let (commit, _): (wire::WireCommit, _) = self.get_json(&path, &query, &resource).await?;
        Ok(commit.into_detail())
    }

    async fn commit_diff_page(&self, project_id: u64, sha: &str, page: u32) -> ApiResult<Page<DiffFile>> {
        let path = format!("projects/{project_id}/repository/commits/{sha}/diff");
        let resource = format!("diff of commit {sha} in project {project_id}");
        let raw: Page<wire::WireDiff> = self.get_page(&path, Vec::new(), page, &resource).await?;
        Ok(Page {
            items: raw.items.into_iter().map(DiffFile::from).collect(),
            next_page: raw.next_page,
        })
    }
}

/// Normalises an instance URL into its `/api/v4/` base.
pub fn api_base(gitlab_url: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: gitlab_url.to_string(),
        reason,
    };
    let trimmed = gitlab_url.trim();
    if trimmed.is_empty() {
        return Err(invalid("URL is empty".to_string()));
    }
    let mut url = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("URL has no host".to_string()));
    }
    url.set_query(None);
    url.set_fragment(None);
    let mut path = url.path().trim_end_matches('/').to_string();
    if !path.ends_with("/api/v4") {
        path.push_str("/api/v4");
    }
    path.push('/');
    url.set_path(&path);
    Ok(url)
}

/// Reads `X-Next-Page`; servers that omit it get the full-page heuristic.
fn next_page(headers: &HeaderMap, page: u32, received: usize, per_page: u32) -> Option<u32> {
    match headers.get("x-next-page").and_then(|v| v.to_str().ok()) {
        Some(value) => value.trim().parse::<u32>().ok().filter(|next| *next > page),
        None if received >= per_page as usize && received > 0 => Some(page + 1),
        None => None,
    }
}

fn rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
