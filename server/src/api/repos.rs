//! Session, repository lifecycle, and branch-protection endpoints.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use git_store::protect::BranchProtection;
use git_store::repo::{RepoId, Repository};

use crate::api::AppState;
use crate::auth::User;
use crate::directory::RepoInfo;
use crate::git_http::request_user;
use crate::notify::{RepoEvent, RepoEventKind};
use crate::validation::{validate_branch, validate_slug};

/// How long `/api/events` waits before answering 204.
const EVENT_POLL_TIMEOUT: Duration = Duration::from_secs(25);

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response()
}

async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<User, Response> {
    request_user(state, headers).await.ok_or_else(unauthorized)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub session: String,
    pub user: User,
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Response {
    let Some(user) =
        crate::auth::verify_basic(state.identity.as_ref(), &request.login, &request.password).await
    else {
        return unauthorized();
    };
    match state.sessions.create_session(user.clone()) {
        Ok(session) => Json(LoginResponse { session, user }).into_response(),
        Err(err) => {
            tracing::error!("session creation failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "session store failed").into_response()
        }
    }
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(session) = headers.get("x-skiff-session").and_then(|v| v.to_str().ok()) {
        if let Err(err) = state.sessions.delete_session(session) {
            tracing::warn!("logout failed: {err}");
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

/// Long-poll for the next repository event visible to this user.
pub async fn next_event(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user = match require_user(&state, &headers).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    let mut events = state.hub.subscribe(&user.username);
    match tokio::time::timeout(EVENT_POLL_TIMEOUT, events.recv()).await {
        Ok(Some(event)) => Json(event).into_response(),
        _ => StatusCode::NO_CONTENT.into_response(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRepoRequest {
    pub name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default)]
    pub description: String,
}

fn default_branch() -> String {
    "main".to_string()
}

pub async fn create_repo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateRepoRequest>,
) -> Response {
    let user = match require_user(&state, &headers).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    if let Err(err) = validate_slug(&request.name) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() })))
            .into_response();
    }
    if let Err(err) = validate_branch(&request.default_branch) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() })))
            .into_response();
    }
    if state.directory.resolve(&user.username, &request.name).await.is_some() {
        return (StatusCode::CONFLICT, Json(json!({ "error": "repository already exists" })))
            .into_response();
    }

    let id = RepoId::new(&user.username, &request.name);
    let repository = match Repository::init(
        state.store.clone(),
        id.clone(),
        &request.default_branch,
        &request.description,
    )
    .await
    {
        Ok(repository) => repository,
        Err(err) => return crate::api::git_error_response(err),
    };

    let info = RepoInfo {
        id: id.clone(),
        private: request.private,
        default_branch: request.default_branch.clone(),
    };
    if let Err(err) = state.directory.register(info.clone()).await {
        tracing::error!("directory registration for {id} failed: {err}");
        let _ = repository.delete().await;
        return (StatusCode::INTERNAL_SERVER_ERROR, "directory unavailable").into_response();
    }
    (StatusCode::CREATED, Json(info)).into_response()
}

pub async fn list_repos(State(state): State<AppState>, Path(owner): Path<String>) -> Response {
    let mut repos = state.directory.list_for_owner(&owner).await;
    // Private repositories stay out of anonymous listings.
    repos.retain(|info| !info.private);
    Json(repos).into_response()
}

pub async fn delete_repo(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let user = match require_user(&state, &headers).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    if user.username != owner {
        return (StatusCode::FORBIDDEN, Json(json!({ "error": "not the repository owner" })))
            .into_response();
    }
    let Some(info) = state.directory.resolve(&owner, &repo).await else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "repository not found" })))
            .into_response();
    };

    let repository = Repository::open(state.store.clone(), info.id.clone());
    if let Err(err) = repository.delete().await {
        return crate::api::git_error_response(err);
    }
    if let Err(err) = state.directory.unregister(&info.id).await {
        tracing::error!("directory removal for {} failed: {err}", info.id);
    }
    state.cache.invalidate_repo(&info.id).await;
    state.hub.broadcast(&RepoEvent { repo: info.id, branch: None, kind: RepoEventKind::Deleted });
    StatusCode::NO_CONTENT.into_response()
}

pub async fn get_protection(
    State(state): State<AppState>,
    Path((owner, repo, branch)): Path<(String, String, String)>,
) -> Response {
    let Some(info) = state.directory.resolve(&owner, &repo).await else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "repository not found" })))
            .into_response();
    };
    match state.protections.get(&info.id, &branch) {
        Ok(rules) => Json(rules.unwrap_or_default()).into_response(),
        Err(err) => crate::api::git_error_response(err),
    }
}

pub async fn put_protection(
    State(state): State<AppState>,
    Path((owner, repo, branch)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(rules): Json<BranchProtection>,
) -> Response {
    let user = match require_user(&state, &headers).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    if user.username != owner {
        return (StatusCode::FORBIDDEN, Json(json!({ "error": "not the repository owner" })))
            .into_response();
    }
    if let Err(err) = validate_branch(&branch) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() })))
            .into_response();
    }
    let Some(info) = state.directory.resolve(&owner, &repo).await else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "repository not found" })))
            .into_response();
    };
    match state.protections.set(info.id, &branch, rules.clone()) {
        Ok(()) => Json(rules).into_response(),
        Err(err) => crate::api::git_error_response(err),
    }
}
