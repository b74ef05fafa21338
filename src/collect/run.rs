use crate::client::{GitLabApi, GitLabClient};
use crate::collect::aggregate::{assemble, ReportContext};
use crate::collect::projects::list_all_projects;
use crate::collect::scheduler::{resolve_workers, run_all};
use crate::config::RunRequest;
use crate::error::{Result, RunError};
use crate::model::{Report, RunWindow};
use chrono::Utc;
use indicatif::ProgressBar;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything a run needs once the request has been validated.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub gitlab_url: String,
    pub days: u32,
    pub window: RunWindow,
    pub workers: usize,
}

impl RunPlan {
    pub fn from_request(request: &RunRequest) -> Result<Self> {
        request.validate()?;
        Ok(Self {
            gitlab_url: request.gitlab_url.trim().to_string(),
            days: request.days,
            window: RunWindow::trailing_days(request.days, Utc::now())?,
            workers: resolve_workers(request.threads),
        })
    }
}

/// One complete run against a live instance. Used by both `fetch` and `serve`.
pub async fn collect_report(request: &RunRequest, progress: ProgressBar) -> Result<Report> {
    let plan = RunPlan::from_request(request)?;
    let client = GitLabClient::new(
        &request.gitlab_url,
        &request.admin_token,
        &request.client_settings(),
    )?;
    run_with_api(Arc::new(client), &plan, CancellationToken::new(), progress).await
}

pub async fn run_with_api(
    api: Arc<dyn GitLabApi>,
    plan: &RunPlan,
    cancel: CancellationToken,
    progress: ProgressBar,
) -> Result<Report> {
    preflight(api.as_ref()).await?;

    let projects = list_all_projects(api.as_ref())
        .await
        .map_err(RunError::from_api)?;
    let projects_scanned = projects.len();
    info!(
        projects = projects_scanned,
        workers = plan.workers,
        since = %plan.window.since,
        until = %plan.window.until,
        "collecting commits"
    );

    progress.set_length(projects_scanned as u64);
    let outcomes = run_all(
        Arc::clone(&api),
        projects,
        plan.window,
        plan.workers,
        cancel,
        progress.clone(),
    )
    .await
    .map_err(RunError::from_api)?;
    progress.finish_and_clear();

    let report = assemble(
        outcomes,
        ReportContext {
            generated_at: Utc::now(),
            gitlab_url: plan.gitlab_url.clone(),
            days: plan.days,
            window: plan.window,
            projects_scanned,
        },
    );

    info!(
        commits = report.metadata.commits_count,
        projects = report.metadata.projects_count,
        users = report.metadata.users_count,
        failed = report.metadata.failed_projects.len(),
        "run finished"
    );
    Ok(report)
}

async fn preflight(api: &dyn GitLabApi) -> Result<()> {
    match api.current_user().await {
        Ok(user) => {
            match user.is_admin {
                Some(false) => warn!(
                    user = %user.username,
                    "credential is not an administrator; only projects visible to it will be scanned"
                ),
                Some(true) => debug!(user = %user.username, "authenticated as administrator"),
                None => debug!(user = %user.username, "server did not report admin status"),
            }
            Ok(())
        }
        Err(err) if err.is_fatal() => Err(RunError::Authentication(err)),
        Err(err) => {
            warn!(error = %err, "could not verify credential, continuing");
            Ok(())
        }
    }
}
