use crate::client::{CommitQuery, CommitSummary, DateFilter, GitLabApi};
use crate::error::{ApiError, ApiResult};
use crate::model::{CommitRecord, CommitStats, DiffFile, Project, RunWindow, SkippedCommit};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Commits collected for one project, plus the ones whose details could not be fetched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectCommits {
    pub commits: Vec<CommitRecord>,
    pub skipped: Vec<SkippedCommit>,
}

pub struct CommitFetcher<'a> {
    api: &'a dyn GitLabApi,
    project: &'a Project,
    window: &'a RunWindow,
    filter: DateFilter,
}

/// Every commit authored inside `window` on any branch of `project`, each sha once.
///
/// Errors returned here are project-level: the caller decides whether they
/// abort the run (`ApiError::is_fatal`) or only fail this project.
pub async fn fetch_commits(
    api: &dyn GitLabApi,
    project: &Project,
    window: &RunWindow,
) -> ApiResult<ProjectCommits> {
    CommitFetcher::new(api, project, window).fetch().await
}

impl<'a> CommitFetcher<'a> {
    pub fn new(api: &'a dyn GitLabApi, project: &'a Project, window: &'a RunWindow) -> Self {
        Self {
            api,
            project,
            window,
            filter: DateFilter::SinceUntil,
        }
    }

    pub async fn fetch(mut self) -> ApiResult<ProjectCommits> {
        let branches = self.branches().await?;
        let mut seen: HashSet<String> = HashSet::new();
        let mut pending: Vec<CommitSummary> = Vec::new();

        for branch in &branches {
            let listed = match self.branch_commits(branch).await {
                Ok(listed) => listed,
                Err(err) if err.is_not_found() => {
                    debug!(project_id = self.project.id, %branch, "branch vanished during run");
                    continue;
                }
                Err(err) => return Err(err),
            };
            for summary in listed {
                if seen.insert(summary.sha.clone()) {
                    pending.push(summary);
                }
            }
        }

        let mut result = ProjectCommits::default();
        for summary in pending {
            let sha = summary.sha.clone();
            match self.record(summary).await {
                Ok(record) => result.commits.push(record),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(project_id = self.project.id, %sha, error = %err, "skipping commit");
                    result.skipped.push(SkippedCommit {
                        project_id: self.project.id,
                        sha,
                        reason: err.to_string(),
                    });
                }
            }
        }

        debug!(
            project_id = self.project.id,
            branches = branches.len(),
            commits = result.commits.len(),
            skipped = result.skipped.len(),
            "project fetched"
        );
        Ok(result)
    }

    /// All branch names, default branch first, the rest sorted so first-seen is stable.
    async fn branches(&self) -> ApiResult<Vec<String>> {
        let mut names = Vec::new();
        let mut page = 1;
        loop {
            let batch = match self.api.branches_page(self.project.id, page).await {
                Ok(batch) => batch,
                Err(err) if err.is_not_found() => {
                    debug!(project_id = self.project.id, "branch listing unavailable, using default branch");
                    return Ok(self.project.default_branch.iter().cloned().collect());
                }
                Err(err) => return Err(err),
            };
            names.extend(batch.items);
            match batch.next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        names.sort();
        names.dedup();
        if let Some(default) = &self.project.default_branch {
            if let Some(pos) = names.iter().position(|n| n == default) {
                let name = names.remove(pos);
                names.insert(0, name);
            }
        }
        Ok(names)
    }

    /// Lists one branch, stepping down to less specific date filters when the server rejects them.
    async fn branch_commits(&mut self, branch: &str) -> ApiResult<Vec<CommitSummary>> {
        loop {
            match self.page_through(branch).await {
                Err(ApiError::Rejected { status, body }) => match self.filter.fallback() {
                    Some(next) => {
                        warn!(
                            project_id = self.project.id,
                            status,
                            %body,
                            from = ?self.filter,
                            to = ?next,
                            "commit listing rejected, retrying with fewer filters"
                        );
                        self.filter = next;
                    }
                    None => return Err(ApiError::Rejected { status, body }),
                },
                other => return other,
            }
        }
    }

    async fn page_through(&self, branch: &str) -> ApiResult<Vec<CommitSummary>> {
        let query = CommitQuery {
            project_id: self.project.id,
            ref_name: branch,
            window: self.window,
            filter: self.filter,
        };
        let mut collected = Vec::new();
        let mut order = NewestFirst::default();
        let mut page = 1;

        loop {
            let batch = self.api.commits_page(&query, page).await?;
            let past_window = self.filter == DateFilter::Unfiltered
                && order.observe(&batch.items)
                && entirely_before(&batch.items, self.window.since);

            collected.extend(
                batch
                    .items
                    .into_iter()
                    .filter(|c| self.window.contains(&c.authored_at)),
            );

            if past_window {
                debug!(project_id = self.project.id, branch, page, "stopping at commits older than window");
                break;
            }
            match batch.next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }
        Ok(collected)
    }

    async fn record(&self, summary: CommitSummary) -> ApiResult<CommitRecord> {
        let detail = self.api.commit_detail(self.project.id, &summary.sha).await?;
        let diff = self.diff(&summary.sha).await?;
        let stats = match detail.stats {
            Some((additions, deletions)) => CommitStats {
                additions,
                deletions,
                files_changed: diff.len() as u64,
            },
            None => CommitStats::from_diff(&diff),
        };
        Ok(CommitRecord {
            sha: summary.sha,
            project_id: self.project.id,
            project_path: self.project.path_with_namespace.clone(),
            author_name: summary.author_name,
            author_email: summary.author_email,
            authored_at: summary.authored_at,
            title: summary.title,
            message: summary.message,
            diff,
            stats,
        })
    }

    async fn diff(&self, sha: &str) -> ApiResult<Vec<DiffFile>> {
        let mut files = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.api.commit_diff_page(self.project.id, sha, page).await?;
            files.extend(batch.items);
            match batch.next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }
        Ok(files)
    }
}

/// Tracks whether the listing seen so far is ordered newest-first, across page boundaries.
#[derive(Debug, Default)]
struct NewestFirst {
    last: Option<DateTime<Utc>>,
    broken: bool,
}

impl NewestFirst {
    fn observe(&mut self, page: &[CommitSummary]) -> bool {
        for commit in page {
            let ts = ordering_key(commit);
            if self.last.is_some_and(|prev| ts > prev) {
                self.broken = true;
            }
            self.last = Some(ts);
        }
        !self.broken
    }
}

fn ordering_key(commit: &CommitSummary) -> DateTime<Utc> {
    commit.committed_at.unwrap_or(commit.authored_at)
}

fn entirely_before(page: &[CommitSummary], since: DateTime<Utc>) -> bool {
    !page.is_empty()
        && page
            .iter()
            .all(|c| c.authored_at < since && ordering_key(c) < since)
}
