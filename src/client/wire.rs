//! JSON shapes returned by the GitLab v4 REST API.
//!
//! Only the fields the collector needs are declared; everything else in the
//! payload is ignored. Conversions into crate types happen here so that
//! nothing past the client works with raw payloads.

use crate::client::{CommitDetail, CommitSummary, CurrentUser};
use crate::model::{DiffFile, Project};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct WireUser {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub is_admin: Option<bool>,
}

impl From<WireUser> for CurrentUser {
    fn from(user: WireUser) -> Self {
        CurrentUser {
            id: user.id,
            username: user.username,
            is_admin: user.is_admin,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireProject {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub path_with_namespace: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
}

impl From<WireProject> for Project {
    fn from(p: WireProject) -> Self {
        Project {
            id: p.id,
            path_with_namespace: p.path_with_namespace.unwrap_or_else(|| p.name.clone()),
            name: p.name,
            default_branch: p.default_branch.filter(|b| !b.is_empty()),
            visibility: p.visibility.unwrap_or_else(|| "unknown".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireBranch {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireCommit {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub author_email: String,
    #[serde(default)]
    pub authored_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub committed_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: Option<WireStats>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireStats {
    pub additions: u64,
    pub deletions: u64,
}

impl WireCommit {
    /// Older servers omit `authored_date`; `created_at` is the author date there.
    pub fn into_summary(self) -> Option<CommitSummary> {
        let authored_at = self.authored_date.or(self.created_at)?;
        Some(CommitSummary {
            title: if self.title.is_empty() {
                self.message.lines().next().unwrap_or_default().to_string()
            } else {
                self.title
            },
            sha: self.id,
            message: self.message,
            author_name: self.author_name,
            author_email: self.author_email,
            authored_at,
            committed_at: self.committed_date,
        })
    }

    pub fn into_detail(self) -> CommitDetail {
        CommitDetail {
            stats: self.stats.map(|s| (s.additions, s.deletions)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireDiff {
    #[serde(default)]
    pub old_path: String,
    #[serde(default)]
    pub new_path: String,
    #[serde(default)]
    pub new_file: bool,
    #[serde(default)]
    pub renamed_file: bool,
    #[serde(default)]
    pub deleted_file: bool,
    #[serde(default)]
    pub diff: String,
}

impl From<WireDiff> for DiffFile {
    fn from(d: WireDiff) -> Self {
        DiffFile {
            old_path: d.old_path,
            new_path: d.new_path,
            new_file: d.new_file,
            renamed_file: d.renamed_file,
            deleted_file: d.deleted_file,
            diff: d.diff,
        }
    }
}
