//! The collection pipeline: enumerate projects, fetch each one's commits on a
//! bounded pool, and merge the outcomes into a single report.

pub mod aggregate;
pub mod commits;
pub mod projects;
pub mod run;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod fake;

pub use aggregate::{assemble, Aggregator, ReportContext};
pub use commits::{fetch_commits, CommitFetcher, ProjectCommits};
pub use projects::list_all_projects;
pub use run::{collect_report, run_with_api, RunPlan};
pub use scheduler::{default_workers, resolve_workers, run_all};
