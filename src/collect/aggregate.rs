use crate::model::{
    CommitRecord, ProjectFailure, ProjectOutcome, Report, ReportMetadata, RunStatus, RunWindow,
    SkippedCommit,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Run-level facts the aggregator cannot derive from the outcomes themselves.
#[derive(Debug, Clone)]
pub struct ReportContext {
    pub generated_at: DateTime<Utc>,
    pub gitlab_url: String,
    pub days: u32,
    pub window: RunWindow,
    pub projects_scanned: usize,
}

/// Merges per-project outcomes into one deduplicated commit set.
///
/// Outcomes are applied in project id order and the first record seen for a
/// `(project_id, sha)` key wins, so the result does not depend on the order
/// the scheduler finished projects in.
#[derive(Debug, Default)]
pub struct Aggregator {
    commits: BTreeMap<(u64, String), CommitRecord>,
    failures: Vec<ProjectFailure>,
    skipped: Vec<SkippedCommit>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, mut outcomes: Vec<ProjectOutcome>) {
        outcomes.sort_by_key(ProjectOutcome::project_id);
        for outcome in outcomes {
            match outcome {
                ProjectOutcome::Fetched {
                    commits, skipped, ..
                } => {
                    for record in commits {
                        self.commits
                            .entry((record.project_id, record.sha.clone()))
                            .or_insert(record);
                    }
                    self.skipped.extend(skipped);
                }
                ProjectOutcome::Failed(failure) => self.failures.push(failure),
            }
        }
    }

    pub fn finish(self, context: ReportContext) -> Report {
        let mut commits: Vec<CommitRecord> = self.commits.into_values().collect();
        commits.sort_by(|a, b| {
            (a.project_id, a.authored_at, &a.sha).cmp(&(b.project_id, b.authored_at, &b.sha))
        });

        let projects: BTreeSet<u64> = commits.iter().map(|c| c.project_id).collect();
        let users: HashSet<String> = commits.iter().map(CommitRecord::author_key).collect();

        let mut failed_projects = self.failures;
        failed_projects.sort_by_key(|f| f.project_id);
        let mut skipped_commits = self.skipped;
        skipped_commits.sort_by(|a, b| (a.project_id, &a.sha).cmp(&(b.project_id, &b.sha)));
        skipped_commits.dedup_by(|a, b| a.project_id == b.project_id && a.sha == b.sha);

        let status = if failed_projects.is_empty() {
            RunStatus::Complete
        } else {
            RunStatus::Partial
        };

        Report {
            metadata: ReportMetadata {
                date: context.generated_at,
                gitlab_url: context.gitlab_url,
                days_included: context.days,
                projects_count: projects.len(),
                users_count: users.len(),
                commits_count: commits.len(),
                since: context.window.since,
                until: context.window.until,
                projects_scanned: context.projects_scanned,
                status,
                failed_projects,
                skipped_commits,
            },
            commits,
        }
    }
}

/// Convenience for the common case of merging everything at once.
pub fn assemble(outcomes: Vec<ProjectOutcome>, context: ReportContext) -> Report {
    let mut aggregator = Aggregator::new();
    aggregator.merge(outcomes);
    aggregator.finish(context)
}
