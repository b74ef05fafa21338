//! In-memory GitLab used by the pipeline tests.

use crate::client::{CommitDetail, CommitQuery, CommitSummary, CurrentUser, DateFilter, GitLabApi, Page};
use crate::error::{ApiError, ApiResult};
use crate::model::{DiffFile, Project};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn project(id: u64) -> Project {
    Project {
        id,
        name: format!("project-{id}"),
        path_with_namespace: format!("group/project-{id}"),
        default_branch: Some("main".to_string()),
        visibility: "private".to_string(),
    }
}

pub fn at(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts)
        .expect("valid timestamp")
        .with_timezone(&Utc)
}

pub fn commit(sha: &str, authored: &str) -> CommitSummary {
    CommitSummary {
        sha: sha.to_string(),
        title: format!("change {sha}"),
        message: format!("change {sha}\n\ndetails for {sha}"),
        author_name: format!("author of {sha}"),
        author_email: format!("{sha}@example.com"),
        authored_at: at(authored),
        committed_at: Some(at(authored)),
    }
}

pub fn patch(path: &str, body: &str) -> DiffFile {
    DiffFile {
        old_path: path.to_string(),
        new_path: path.to_string(),
        new_file: false,
        renamed_file: false,
        deleted_file: false,
        diff: body.to_string(),
    }
}

#[derive(Default)]
pub struct FakeProject {
    project: Option<Project>,
    branches: Vec<(String, Vec<CommitSummary>)>,
    /// Branch listing answers 404; commits stay reachable by ref name.
    unlisted: bool,
    branch_error: Option<ApiError>,
    detail_errors: HashMap<String, ApiError>,
    stats: HashMap<String, (u64, u64)>,
    diffs: HashMap<String, Vec<DiffFile>>,
    delay: Duration,
    hang: bool,
}

impl FakeProject {
    pub fn branch(&mut self, name: &str, commits: Vec<CommitSummary>) -> &mut Self {
        self.branches.push((name.to_string(), commits));
        self
    }

    pub fn without_branch_endpoint(&mut self) -> &mut Self {
        self.unlisted = true;
        self
    }

    pub fn fail_branches(&mut self, err: ApiError) -> &mut Self {
        self.branch_error = Some(err);
        self
    }

    pub fn fail_detail(&mut self, sha: &str, err: ApiError) -> &mut Self {
        self.detail_errors.insert(sha.to_string(), err);
        self
    }

    pub fn stats(&mut self, sha: &str, additions: u64, deletions: u64) -> &mut Self {
        self.stats.insert(sha.to_string(), (additions, deletions));
        self
    }

    pub fn diff(&mut self, sha: &str, files: Vec<DiffFile>) -> &mut Self {
        self.diffs.insert(sha.to_string(), files);
        self
    }

    pub fn delay(&mut self, delay: Duration) -> &mut Self {
        self.delay = delay;
        self
    }

    /// Branch listing never completes.
    pub fn hang(&mut self) -> &mut Self {
        self.hang = true;
        self
    }

    fn commits_on(&self, ref_name: &str) -> Option<&Vec<CommitSummary>> {
        self.branches
            .iter()
            .find(|(name, _)| name == ref_name)
            .map(|(_, commits)| commits)
    }
}

pub struct FakeGitLab {
    page_size: usize,
    projects: BTreeMap<u64, FakeProject>,
    project_error: Option<ApiError>,
    user: ApiResult<CurrentUser>,
    reject_filters: bool,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeGitLab {
    pub fn new() -> Self {
        Self {
            page_size: 100,
            projects: BTreeMap::new(),
            project_error: None,
            user: Ok(CurrentUser {
                id: 1,
                username: "root".to_string(),
                is_admin: Some(true),
            }),
            reject_filters: false,
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn fail_projects(mut self, err: ApiError) -> Self {
        self.project_error = Some(err);
        self
    }

    pub fn with_user(mut self, user: ApiResult<CurrentUser>) -> Self {
        self.user = user;
        self
    }

    /// Server answers 400 to any date-filtered commit listing.
    pub fn reject_date_filters(mut self) -> Self {
        self.reject_filters = true;
        self
    }

    pub fn add_project(&mut self, project: Project) -> &mut FakeProject {
        let entry = self.projects.entry(project.id).or_default();
        entry.project = Some(project);
        entry
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(endpoint).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, endpoint: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(endpoint.to_string()).or_insert(0) += 1;
        }
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    fn paginate<T: Clone>(&self, items: &[T], page: u32) -> Page<T> {
        let start = (page.saturating_sub(1) as usize) * self.page_size;
        let end = (start + self.page_size).min(items.len());
        let slice = if start < items.len() {
            items[start..end].to_vec()
        } else {
            Vec::new()
        };
        Page {
            items: slice,
            next_page: (end < items.len()).then_some(page + 1),
        }
    }

    fn project(&self, id: u64) -> ApiResult<&FakeProject> {
        self.projects.get(&id).ok_or_else(|| ApiError::NotFound {
            resource: format!("project {id}"),
        })
    }
}

#[async_trait]
impl GitLabApi for FakeGitLab {
    async fn current_user(&self) -> ApiResult<CurrentUser> {
        self.record("user");
        self.user.clone()
    }

    async fn projects_page(&self, page: u32) -> ApiResult<Page<Project>> {
        self.record("projects");
        if let Some(err) = &self.project_error {
            return Err(err.clone());
        }
        let all: Vec<Project> = self
            .projects
            .values()
            .filter_map(|p| p.project.clone())
            .collect();
        Ok(self.paginate(&all, page))
    }

    async fn branches_page(&self, project_id: u64, page: u32) -> ApiResult<Page<String>> {
        self.record("branches");
        let fake = self.project(project_id)?;
        let _guard = self.enter();
        if fake.hang {
            std::future::pending::<()>().await;
        }
        if !fake.delay.is_zero() {
            tokio::time::sleep(fake.delay).await;
        }
        if let Some(err) = &fake.branch_error {
            return Err(err.clone());
        }
        if fake.unlisted {
            return Err(ApiError::NotFound {
                resource: format!("branches of project {project_id}"),
            });
        }
        let names: Vec<String> = fake.branches.iter().map(|(name, _)| name.clone()).collect();
        Ok(self.paginate(&names, page))
    }

    async fn commits_page(&self, query: &CommitQuery<'_>, page: u32) -> ApiResult<Page<CommitSummary>> {
        self.record("commits");
        if self.reject_filters && query.filter != DateFilter::Unfiltered {
            return Err(ApiError::Rejected {
                status: 400,
                body: "since/until not supported".to_string(),
            });
        }
        let fake = self.project(query.project_id)?;
        let commits = fake.commits_on(query.ref_name).ok_or_else(|| ApiError::NotFound {
            resource: format!("branch {}", query.ref_name),
        })?;
        let window = query.window;
        let visible: Vec<CommitSummary> = commits
            .iter()
            .filter(|c| match query.filter {
                DateFilter::SinceUntil => window.contains(&c.authored_at),
                DateFilter::SinceOnly => c.authored_at >= window.since,
                DateFilter::Unfiltered => true,
            })
            .cloned()
            .collect();
        Ok(self.paginate(&visible, page))
    }

    async fn commit_detail(&self, project_id: u64, sha: &str) -> ApiResult<CommitDetail> {
        self.record("detail");
        let fake = self.project(project_id)?;
        if let Some(err) = fake.detail_errors.get(sha) {
            return Err(err.clone());
        }
        Ok(CommitDetail {
            stats: fake.stats.get(sha).copied(),
        })
    }

    async fn commit_diff_page(&self, project_id: u64, sha: &str, page: u32) -> ApiResult<Page<DiffFile>> {
        self.record("diff");
        let fake = self.project(project_id)?;
        let files = fake.diffs.get(sha).cloned().unwrap_or_default();
        Ok(self.paginate(&files, page))
    }
}
