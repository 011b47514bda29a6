//! HTTP application state, router, and serving loop.

pub mod browse;
pub mod merge;
pub mod repos;

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post, put};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use git_store::cache::RepoCache;
use git_store::errors::GitError;
use git_store::protect::MemoryProtectionStore;
use git_store::store::BlobStore;

use crate::auth::{IdentityProvider, SessionManager};
use crate::directory::RepoDirectory;
use crate::git_http;
use crate::notify::NotifyHub;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BlobStore>,
    pub directory: Arc<dyn RepoDirectory>,
    pub identity: Arc<dyn IdentityProvider>,
    pub sessions: Arc<SessionManager>,
    pub protections: Arc<MemoryProtectionStore>,
    pub cache: RepoCache,
    pub hub: NotifyHub,
}

/// Map a core error onto the HTTP surface. Conflicts carry the conflicting
/// paths so a UI can show them.
pub fn git_error_response(err: GitError) -> Response {
    match err {
        GitError::NotFound(what) => {
            (StatusCode::NOT_FOUND, Json(json!({ "error": what }))).into_response()
        }
        GitError::Unauthorized => {
            (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response()
        }
        GitError::Forbidden(why) => {
            (StatusCode::FORBIDDEN, Json(json!({ "error": why }))).into_response()
        }
        GitError::Conflict { files } => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "merge conflict", "conflictingFiles": files })),
        )
            .into_response(),
        GitError::Malformed(what) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": what }))).into_response()
        }
        GitError::Transport(what) => {
            tracing::error!("storage failure: {what}");
            (StatusCode::BAD_GATEWAY, Json(json!({ "error": "storage unavailable" })))
                .into_response()
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Git Smart HTTP
        .route("/{owner}/{repo}/info/refs", get(git_http::info_refs))
        .route("/{owner}/{repo}/git-upload-pack", post(git_http::upload_pack))
        .route("/{owner}/{repo}/git-receive-pack", post(git_http::receive_pack))
        // Sessions
        .route("/api/login", post(repos::login))
        .route("/api/logout", post(repos::logout))
        .route("/api/events", get(repos::next_event))
        // Repository lifecycle & protection
        .route("/api/repos", post(repos::create_repo))
        .route("/api/repos/{owner}", get(repos::list_repos))
        .route("/api/repos/{owner}/{repo}", delete(repos::delete_repo))
        // Wildcard so nested branch names (feature/x) resolve.
        .route(
            "/api/repos/{owner}/{repo}/protection/{*branch}",
            get(repos::get_protection).put(repos::put_protection),
        )
        // Browsing
        .route("/api/repos/{owner}/{repo}/branches", get(browse::branches))
        .route("/api/repos/{owner}/{repo}/commits", get(browse::commits))
        .route("/api/repos/{owner}/{repo}/commit-count", get(browse::commit_count))
        .route("/api/repos/{owner}/{repo}/tree", get(browse::tree))
        .route("/api/repos/{owner}/{repo}/file", get(browse::file))
        .route("/api/repos/{owner}/{repo}/commits/{oid}/diff", get(browse::diff))
        .route("/api/repos/{owner}/{repo}/compare", get(browse::compare))
        // Merging
        .route("/api/repos/{owner}/{repo}/merge", post(merge::merge_pr))
        .route("/api/repos/{owner}/{repo}/update-branch", put(merge::update_branch))
        .with_state(state)
}

pub async fn run_api(state: AppState, addr: &str, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {addr}");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
