use crate::client::GitLabApi;
use crate::collect::commits::fetch_commits;
use crate::error::{ApiError, ApiResult};
use crate::model::{Project, ProjectFailure, ProjectOutcome, RunWindow};
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use std::sync::Arc;
use std::thread;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub const MAX_DEFAULT_WORKERS: usize = 32;

/// Four workers per core, capped. Fetching is I/O bound.
pub fn default_workers() -> usize {
    let cores = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores * 4).clamp(1, MAX_DEFAULT_WORKERS)
}

/// `0` selects the default.
pub fn resolve_workers(requested: usize) -> usize {
    if requested == 0 {
        default_workers()
    } else {
        requested
    }
}

/// Fetches every project with at most `workers` in flight.
///
/// Outcomes arrive in completion order. A fatal API error (bad credential)
/// cancels everything still running and is returned instead of the outcomes.
/// Dropping the returned future stops the spawned tasks as well.
pub async fn run_all(
    api: Arc<dyn GitLabApi>,
    projects: Vec<Project>,
    window: RunWindow,
    workers: usize,
    cancel: CancellationToken,
    progress: ProgressBar,
) -> ApiResult<Vec<ProjectOutcome>> {
    let workers = workers.max(1);
    debug!(projects = projects.len(), workers, "starting project fetch");

    // Spawned tasks outlive their JoinHandles; tie them to this future instead.
    let scope = cancel.child_token();
    let _scope_guard = scope.clone().drop_guard();

    let tasks = projects.into_iter().map(|project| {
        let api = Arc::clone(&api);
        let cancel = scope.clone();
        let target = project.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => None,
                result = fetch_commits(api.as_ref(), &target, &window) => Some(result),
            }
        });
        async move { (project, handle.await) }
    });

    let mut pending = stream::iter(tasks).buffer_unordered(workers);
    let mut outcomes = Vec::new();

    while let Some((project, joined)) = pending.next().await {
        progress.inc(1);
        let project_id = project.id;
        let outcome = match joined {
            Ok(Some(Ok(fetched))) => ProjectOutcome::Fetched {
                project,
                commits: fetched.commits,
                skipped: fetched.skipped,
            },
            Ok(Some(Err(err))) if err.is_fatal() => {
                error!(project_id, error = %err, "credential rejected, cancelling run");
                cancel.cancel();
                return Err(err);
            }
            Ok(Some(Err(err))) => {
                warn!(project_id, project = %project.path_with_namespace, kind = err.kind(), error = %err, "project failed");
                ProjectOutcome::Failed(ProjectFailure {
                    project_id,
                    project_path: project.path_with_namespace,
                    reason: err.to_string(),
                })
            }
            Ok(None) => return Err(ApiError::Cancelled),
            Err(join) => {
                warn!(project_id, project = %project.path_with_namespace, error = %join, "project task aborted");
                ProjectOutcome::Failed(ProjectFailure {
                    project_id,
                    project_path: project.path_with_namespace,
                    reason: format!("task aborted: {join}"),
                })
            }
        };
        outcomes.push(outcome);
    }

    if cancel.is_cancelled() {
        return Err(ApiError::Cancelled);
    }
    Ok(outcomes)
}
