//! A GitLab-shaped HTTP server for integration tests, served by axum on an
//! ephemeral local port.

#![allow(dead_code)]

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

pub const TOKEN: &str = "glpat-test-admin";

struct Failure {
    fragment: String,
    status: u16,
    retry_after: Option<String>,
    remaining: usize,
}

struct FakeProject {
    json: Value,
    branches: Vec<(String, Vec<Value>)>,
}

#[derive(Default)]
pub struct GitLabState {
    projects: BTreeMap<u64, FakeProject>,
    stats: HashMap<String, (u64, u64)>,
    diffs: HashMap<String, Vec<Value>>,
    failures: Vec<Failure>,
    reject_date_filters: bool,
    hits: HashMap<&'static str, usize>,
}

impl GitLabState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn project(mut self, id: u64, path: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        self.projects.insert(
            id,
            FakeProject {
                json: json!({
                    "id": id,
                    "name": name,
                    "path_with_namespace": path,
                    "default_branch": "main",
                    "visibility": "private",
                }),
                branches: Vec::new(),
            },
        );
        self
    }

    /// Appends to the branch listing, which is served newest-first as given.
    pub fn commit(mut self, project_id: u64, branch: &str, sha: &str, authored: DateTime<Utc>) -> Self {
        let project = self
            .projects
            .get_mut(&project_id)
            .expect("project registered before its commits");
        let commit = json!({
            "id": sha,
            "short_id": &sha[..sha.len().min(8)],
            "title": format!("Change {sha}"),
            "message": format!("Change {sha}\n\nMore about {sha}."),
            "author_name": format!("Dev {}", &sha[..1]),
            "author_email": format!("dev-{}@example.com", &sha[..1]),
            "authored_date": authored.to_rfc3339(),
            "committed_date": authored.to_rfc3339(),
            "created_at": authored.to_rfc3339(),
        });
        match project.branches.iter_mut().find(|(name, _)| name == branch) {
            Some((_, commits)) => commits.push(commit),
            None => project.branches.push((branch.to_string(), vec![commit])),
        }
        self
    }

    pub fn stats(mut self, sha: &str, additions: u64, deletions: u64) -> Self {
        self.stats.insert(sha.to_string(), (additions, deletions));
        self
    }

    pub fn diff(mut self, sha: &str, path: &str, patch: &str) -> Self {
        self.diffs.entry(sha.to_string()).or_default().push(json!({
            "old_path": path,
            "new_path": path,
            "new_file": false,
            "renamed_file": false,
            "deleted_file": false,
            "diff": patch,
        }));
        self
    }

    /// The next `times` requests whose path contains `fragment` answer `status`.
    pub fn fail(mut self, fragment: &str, status: u16, times: usize, retry_after: Option<&str>) -> Self {
        self.failures.push(Failure {
            fragment: fragment.to_string(),
            status,
            retry_after: retry_after.map(str::to_string),
            remaining: times,
        });
        self
    }

    pub fn reject_date_filters(mut self) -> Self {
        self.reject_date_filters = true;
        self
    }
}

pub struct FakeGitLabServer {
    pub url: String,
    state: Arc<Mutex<GitLabState>>,
}

impl FakeGitLabServer {
    pub async fn start(state: GitLabState) -> Self {
        let state = Arc::new(Mutex::new(state));
        let app = Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    pub fn hits(&self, endpoint: &str) -> usize {
        self.state
            .lock()
            .expect("state lock")
            .hits
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn paginated(items: &[Value], query: &HashMap<String, String>) -> Response {
    let page: usize = query.get("page").and_then(|p| p.parse().ok()).unwrap_or(1).max(1);
    let per_page: usize = query
        .get("per_page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(20)
        .max(1);
    let start = (page - 1) * per_page;
    let slice: Vec<Value> = items.iter().skip(start).take(per_page).cloned().collect();
    let next = if start + per_page < items.len() {
        (page + 1).to_string()
    } else {
        String::new()
    };
    let mut response = Json(Value::Array(slice)).into_response();
    if let Ok(value) = HeaderValue::from_str(&next) {
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-next-page"), value);
    }
    response
}

fn in_window(commit: &Value, query: &HashMap<String, String>) -> bool {
    let authored = commit["authored_date"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok());
    let bound = |key: &str| {
        query
            .get(key)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    };
    match authored {
        Some(at) => {
            bound("since").map_or(true, |since| at >= since)
                && bound("until").map_or(true, |until| at <= until)
        }
        None => true,
    }
}

async fn handle(
    axum::extract::State(state): axum::extract::State<Arc<Mutex<GitLabState>>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let mut state = state.lock().expect("state lock");
    let path = uri.path().to_string();
    let query: HashMap<String, String> = url::form_urlencoded::parse(uri.query().unwrap_or("").as_bytes())
        .into_owned()
        .collect();

    let Some(rest) = path.strip_prefix("/api/v4/") else {
        return error(StatusCode::NOT_FOUND, "404 Not Found");
    };
    let segments: Vec<&str> = rest.split('/').collect();
    let endpoint: &'static str = match segments.as_slice() {
        ["user"] => "user",
        ["projects"] => "projects",
        ["projects", _, "repository", "branches"] => "branches",
        ["projects", _, "repository", "commits"] => "commits",
        ["projects", _, "repository", "commits", _] => "detail",
        ["projects", _, "repository", "commits", _, "diff"] => "diff",
        _ => return error(StatusCode::NOT_FOUND, "404 Not Found"),
    };
    *state.hits.entry(endpoint).or_insert(0) += 1;

    if headers.get("private-token").and_then(|v| v.to_str().ok()) != Some(TOKEN) {
        return error(StatusCode::UNAUTHORIZED, "401 Unauthorized");
    }

    if let Some(failure) = state
        .failures
        .iter_mut()
        .find(|f| f.remaining > 0 && path.contains(&f.fragment))
    {
        failure.remaining -= 1;
        let status = StatusCode::from_u16(failure.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = error(status, "scripted failure");
        if let Some(after) = failure.retry_after.as_deref().and_then(|a| HeaderValue::from_str(a).ok()) {
            response.headers_mut().insert("retry-after", after);
        }
        return response;
    }

    let project_id: Option<u64> = segments.get(1).and_then(|id| id.parse().ok());
    let project = project_id.and_then(|id| state.projects.get(&id));

    match endpoint {
        "user" => Json(json!({
            "id": 1,
            "username": "root",
            "is_admin": true,
        }))
        .into_response(),
        "projects" => {
            let all: Vec<Value> = state.projects.values().map(|p| p.json.clone()).collect();
            paginated(&all, &query)
        }
        "branches" => match project {
            Some(p) => {
                let names: Vec<Value> = p
                    .branches
                    .iter()
                    .map(|(name, _)| json!({ "name": name }))
                    .collect();
                paginated(&names, &query)
            }
            None => error(StatusCode::NOT_FOUND, "404 Project Not Found"),
        },
        "commits" => {
            if state.reject_date_filters && (query.contains_key("since") || query.contains_key("until")) {
                return error(StatusCode::BAD_REQUEST, "since is invalid");
            }
            let Some(p) = project else {
                return error(StatusCode::NOT_FOUND, "404 Project Not Found");
            };
            let ref_name = query.get("ref_name").cloned().unwrap_or_default();
            match p.branches.iter().find(|(name, _)| *name == ref_name) {
                Some((_, commits)) => {
                    let visible: Vec<Value> = commits
                        .iter()
                        .filter(|c| in_window(c, &query))
                        .cloned()
                        .collect();
                    paginated(&visible, &query)
                }
                None => error(StatusCode::NOT_FOUND, "404 Branch Not Found"),
            }
        }
        "detail" => {
            let sha = segments[4];
            let found = project.and_then(|p| {
                p.branches
                    .iter()
                    .flat_map(|(_, commits)| commits.iter())
                    .find(|c| c["id"] == sha)
                    .cloned()
            });
            match found {
                Some(mut commit) => {
                    if let Some((additions, deletions)) = state.stats.get(sha) {
                        commit["stats"] = json!({
                            "additions": additions,
                            "deletions": deletions,
                            "total": additions + deletions,
                        });
                    }
                    Json(commit).into_response()
                }
                None => error(StatusCode::NOT_FOUND, "404 Commit Not Found"),
            }
        }
        "diff" => {
            let sha = segments[4];
            let files = state.diffs.get(sha).cloned().unwrap_or_default();
            paginated(&files, &query)
        }
        _ => error(StatusCode::NOT_FOUND, "404 Not Found"),
    }
}
