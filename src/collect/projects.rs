use crate::client::GitLabApi;
use crate::error::ApiResult;
use crate::model::Project;
use std::collections::HashSet;
use tracing::debug;

/// Walks the project listing to exhaustion. Projects repeated across pages are kept once.
pub async fn list_all_projects(api: &dyn GitLabApi) -> ApiResult<Vec<Project>> {
    let mut projects = Vec::new();
    let mut seen = HashSet::new();
    let mut page = 1;

    loop {
        let batch = api.projects_page(page).await?;
        debug!(page, count = batch.items.len(), "fetched project page");
        for project in batch.items {
            if seen.insert(project.id) {
                projects.push(project);
            }
        }
        match batch.next_page {
            Some(next) if next > page => page = next,
            _ => break,
        }
    }

    Ok(projects)
}
