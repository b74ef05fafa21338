use crate::error::ConfigError;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A repository hosted on the instance, as seen by the admin credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    pub path_with_namespace: String,
    pub default_branch: Option<String>,
    pub visibility: String,
}

/// One file's entry in a commit diff, in the order the server returned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffFile {
    pub old_path: String,
    pub new_path: String,
    pub new_file: bool,
    pub renamed_file: bool,
    pub deleted_file: bool,
    pub diff: String,
}

impl DiffFile {
    /// Counts added and deleted lines in the patch text.
    ///
    /// Anything before the first `@@` hunk header is file preamble. GitLab
    /// usually sends none, so a `---`/`+++` line inside a hunk is content.
    pub fn line_counts(&self) -> (u64, u64) {
        let hunked = self.diff.lines().any(|line| line.starts_with("@@"));
        let mut added = 0;
        let mut deleted = 0;
        for line in self
            .diff
            .lines()
            .skip_while(|line| hunked && !line.starts_with("@@"))
        {
            if line.starts_with('+') {
                added += 1;
            } else if line.starts_with('-') {
                deleted += 1;
            }
        }
        (added, deleted)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStats {
    pub additions: u64,
    pub deletions: u64,
    pub files_changed: u64,
}

impl CommitStats {
    pub fn from_diff(diff: &[DiffFile]) -> Self {
        let (additions, deletions) = diff.iter().fold((0, 0), |(a, d), file| {
            let (fa, fd) = file.line_counts();
            (a + fa, d + fd)
        });
        Self {
            additions,
            deletions,
            files_changed: diff.len() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: String,
    pub project_id: u64,
    pub project_path: String,
    pub author_name: String,
    pub author_email: String,
    pub authored_at: DateTime<Utc>,
    pub title: String,
    pub message: String,
    pub diff: Vec<DiffFile>,
    pub stats: CommitStats,
}

impl CommitRecord {
    /// Identity used for `users_count`: lower-cased email, or the name when no email is recorded.
    pub fn author_key(&self) -> String {
        let email = self.author_email.trim();
        if email.is_empty() {
            self.author_name.trim().to_lowercase()
        } else {
            email.to_lowercase()
        }
    }
}

/// Inclusive time window `[since, until]` applied to `authored_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl RunWindow {
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Self, ConfigError> {
        if since > until {
            return Err(ConfigError::InvalidWindow(format!(
                "since ({}) is after until ({})",
                since.to_rfc3339(),
                until.to_rfc3339()
            )));
        }
        Ok(Self { since, until })
    }

    /// `days = 1` is "today so far" (UTC); each extra day moves `since` back one midnight.
    pub fn trailing_days(days: u32, now: DateTime<Utc>) -> Result<Self, ConfigError> {
        if days == 0 {
            return Err(ConfigError::InvalidWindow(
                "days must be at least 1".to_string(),
            ));
        }
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| Utc.from_utc_datetime(&naive))
            .ok_or_else(|| ConfigError::InvalidWindow(format!("cannot derive midnight of {now}")))?;
        let since = Duration::try_days(i64::from(days) - 1)
            .and_then(|back| midnight.checked_sub_signed(back))
            .ok_or_else(|| ConfigError::InvalidWindow(format!("{days} days is out of range")))?;
        Self::new(since, now)
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        timestamp >= &self.since && timestamp <= &self.until
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFailure {
    pub project_id: u64,
    pub project_path: String,
    pub reason: String,
}

/// A commit that was listed but whose details could not be retrieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedCommit {
    pub project_id: u64,
    pub sha: String,
    pub reason: String,
}

/// Result of one project's fetch, handed from the scheduler to the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectOutcome {
    Fetched {
        project: Project,
        commits: Vec<CommitRecord>,
        skipped: Vec<SkippedCommit>,
    },
    Failed(ProjectFailure),
}

impl ProjectOutcome {
    pub fn project_id(&self) -> u64 {
        match self {
            ProjectOutcome::Fetched { project, .. } => project.id,
            ProjectOutcome::Failed(failure) => failure.project_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Complete,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub date: DateTime<Utc>,
    pub gitlab_url: String,
    pub days_included: u32,
    pub projects_count: usize,
    pub users_count: usize,
    pub commits_count: usize,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub projects_scanned: usize,
    pub status: RunStatus,
    pub failed_projects: Vec<ProjectFailure>,
    pub skipped_commits: Vec<SkippedCommit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub commits: Vec<CommitRecord>,
}
