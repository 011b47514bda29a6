//! Pull-request merge endpoints.
//!
//! Ref updates race with concurrent pushes (there is no global lock), so
//! the merge handler re-reads the head tip immediately before merging and
//! answers 409 when it moved from what the caller reviewed.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use git_store::merge::{self, MergeRequest};
use git_store::object::{Oid, Signature};
use git_store::repo::Repository;

use crate::api::{AppState, git_error_response};
use crate::git_http::request_user;
use crate::notify::{RepoEvent, RepoEventKind};
use crate::validation::validate_branch;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeBody {
    pub base_branch: String,
    /// Head defaults to the base repository (same-repo PR).
    pub head_owner: Option<String>,
    pub head_repo: Option<String>,
    pub head_branch: String,
    pub message: Option<String>,
    /// Tip the caller reviewed; the merge aborts if the branch moved.
    pub expected_head_oid: Option<Oid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeView {
    pub merge_commit: Oid,
    pub base_oid: Oid,
    pub head_oid: Oid,
}

fn author_for(user: &crate::auth::User) -> Signature {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Signature::new(user.username.clone(), user.email.clone(), now)
}

struct MergeContext {
    base: Repository,
    head: Repository,
    author: Signature,
}

/// Shared setup: authenticate, require base-repo ownership, resolve both
/// repositories.
async fn merge_context(
    state: &AppState,
    headers: &HeaderMap,
    owner: &str,
    repo: &str,
    body: &MergeBody,
) -> Result<MergeContext, Response> {
    for branch in [&body.base_branch, &body.head_branch] {
        if let Err(err) = validate_branch(branch) {
            return Err(
                (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() })))
                    .into_response(),
            );
        }
    }
    let Some(user) = request_user(state, headers).await else {
        return Err(
            (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" }))).into_response()
        );
    };
    if user.username != owner {
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "merging requires repository ownership" })),
        )
            .into_response());
    }
    let Some(base_info) = state.directory.resolve(owner, repo).await else {
        return Err(
            (StatusCode::NOT_FOUND, Json(json!({ "error": "repository not found" })))
                .into_response(),
        );
    };

    let head_owner = body.head_owner.as_deref().unwrap_or(owner);
    let head_repo = body.head_repo.as_deref().unwrap_or(repo);
    let Some(head_info) = state.directory.resolve(head_owner, head_repo).await else {
        return Err(
            (StatusCode::NOT_FOUND, Json(json!({ "error": "head repository not found" })))
                .into_response(),
        );
    };

    Ok(MergeContext {
        base: Repository::open(state.store.clone(), base_info.id),
        head: Repository::open(state.store.clone(), head_info.id),
        author: author_for(&user),
    })
}

/// The narrow TOCTOU window between review and merge: the head must still
/// be where the caller saw it.
async fn head_moved(
    head: &Repository,
    branch: &str,
    expected: Option<Oid>,
) -> Result<Option<Oid>, Response> {
    let current = match head.refs().resolve(branch).await {
        Ok(oid) => oid,
        Err(err) => return Err(git_error_response(err)),
    };
    match expected {
        Some(expected) if expected != current => Ok(Some(current)),
        _ => Ok(None),
    }
}

// POST /api/repos/{owner}/{repo}/merge
pub async fn merge_pr(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<MergeBody>,
) -> Response {
    let context = match merge_context(&state, &headers, &owner, &repo, &body).await {
        Ok(context) => context,
        Err(response) => return response,
    };
    match head_moved(&context.head, &body.head_branch, body.expected_head_oid).await {
        Ok(Some(current)) => {
            return (
                StatusCode::CONFLICT,
                Json(json!({ "error": "head branch moved", "currentHeadOid": current })),
            )
                .into_response();
        }
        Ok(None) => {}
        Err(response) => return response,
    }

    let message = body.message.clone().unwrap_or_else(|| {
        format!("Merge branch '{}' into {}\n", body.head_branch, body.base_branch)
    });
    let outcome = match merge::merge_branches(MergeRequest {
        base: &context.base,
        base_branch: &body.base_branch,
        head: &context.head,
        head_branch: &body.head_branch,
        author: context.author,
        message,
    })
    .await
    {
        Ok(outcome) => outcome,
        Err(err) => return git_error_response(err),
    };

    let base_id = context.base.id().clone();
    state.cache.invalidate_branch(&base_id, &body.base_branch).await;
    state.hub.broadcast(&RepoEvent {
        repo: base_id,
        branch: Some(body.base_branch.clone()),
        kind: RepoEventKind::Merged,
    });

    Json(MergeView {
        merge_commit: outcome.merge_commit,
        base_oid: outcome.base_oid,
        head_oid: outcome.head_oid,
    })
    .into_response()
}

// PUT /api/repos/{owner}/{repo}/update-branch
//
// Three-way sync of a PR head over its moved base; conflicts come back as
// 409 with the conflicting paths.
pub async fn update_branch(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<MergeBody>,
) -> Response {
    let context = match merge_context(&state, &headers, &owner, &repo, &body).await {
        Ok(context) => context,
        Err(response) => return response,
    };
    match head_moved(&context.head, &body.head_branch, body.expected_head_oid).await {
        Ok(Some(current)) => {
            return (
                StatusCode::CONFLICT,
                Json(json!({ "error": "head branch moved", "currentHeadOid": current })),
            )
                .into_response();
        }
        Ok(None) => {}
        Err(response) => return response,
    }

    let message = body.message.clone().unwrap_or_else(|| {
        format!("Merge branch '{}' into {}\n", body.base_branch, body.head_branch)
    });
    let outcome = match merge::update_branch(MergeRequest {
        base: &context.base,
        base_branch: &body.base_branch,
        head: &context.head,
        head_branch: &body.head_branch,
        author: context.author,
        message,
    })
    .await
    {
        Ok(outcome) => outcome,
        Err(err) => return git_error_response(err),
    };

    let head_id = context.head.id().clone();
    state.cache.invalidate_branch(&head_id, &body.head_branch).await;
    state.hub.broadcast(&RepoEvent {
        repo: head_id,
        branch: Some(body.head_branch.clone()),
        kind: RepoEventKind::Merged,
    });

    Json(MergeView {
        merge_commit: outcome.merge_commit,
        base_oid: outcome.base_oid,
        head_oid: outcome.head_oid,
    })
    .into_response()
}
