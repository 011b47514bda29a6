//! Git Smart HTTP (protocol v0) endpoints.
//!
//! `info/refs` advertisement, push via `git-receive-pack`, and a degenerate
//! `git-upload-pack` that answers a bare NAK (pack generation for fetches
//! is not served here; standard clients still probe these routes).
//!
//! Error framing follows the protocol, not HTTP: push-content problems are
//! reported as `ng` pkt-lines inside a 200 response, because that is the
//! only place git clients look. HTTP status is reserved for routing and
//! auth failures.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use metrics::{counter, histogram};
use serde::Deserialize;
use std::time::Instant;

use git_store::receive;
use git_store::refs::{Service, advertisement};
use git_store::repo::Repository;

use crate::api::AppState;
use crate::auth::User;
use crate::directory::RepoInfo;
use crate::notify::{RepoEvent, RepoEventKind};

pub const AGENT: &str = concat!("skiff/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
pub struct ServiceQuery {
    pub service: Option<String>,
}

/// `repo` and `repo.git` address the same repository.
fn strip_git_suffix(name: &str) -> &str {
    name.strip_suffix(".git").unwrap_or(name)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"skiff\"")],
        "authentication required",
    )
        .into_response()
}

/// Resolve the ambient user: session header first, then HTTP Basic.
pub(crate) async fn request_user(state: &AppState, headers: &HeaderMap) -> Option<User> {
    if let Some(session) = headers.get("x-skiff-session").and_then(|v| v.to_str().ok())
        && let Ok(Some(user)) = state.sessions.get_user(session)
    {
        return Some(user);
    }
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (login, password) = crate::auth::parse_basic(header)?;
    crate::auth::verify_basic(state.identity.as_ref(), &login, &password).await
}

pub(crate) enum Access {
    Read,
    Write,
}

/// Repository lookup plus the read/write gate: private repositories need an
/// authenticated reader, pushes need the owner.
pub(crate) async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    owner: &str,
    repo: &str,
    access: Access,
) -> Result<(RepoInfo, Repository), Response> {
    let repo = strip_git_suffix(repo);
    let Some(info) = state.directory.resolve(owner, repo).await else {
        return Err((StatusCode::NOT_FOUND, "repository not found").into_response());
    };
    let user = request_user(state, headers).await;
    match access {
        Access::Read => {
            if info.private && user.is_none() {
                return Err(unauthorized());
            }
        }
        Access::Write => match &user {
            Some(user) if user.username == info.id.owner => {}
            Some(_) => {
                return Err((StatusCode::FORBIDDEN, "push requires repository ownership")
                    .into_response());
            }
            None => return Err(unauthorized()),
        },
    }
    let repository = Repository::open(state.store.clone(), info.id.clone());
    Ok((info, repository))
}

// GET /{owner}/{repo}/info/refs?service=git-upload-pack|git-receive-pack
pub async fn info_refs(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<ServiceQuery>,
    headers: HeaderMap,
) -> Response {
    let start = Instant::now();
    let Some(service) = query.service.as_deref().and_then(Service::parse) else {
        return (StatusCode::BAD_REQUEST, "unsupported service").into_response();
    };
    let access = match service {
        Service::UploadPack => Access::Read,
        Service::ReceivePack => Access::Write,
    };
    let (_, repository) = match authorize(&state, &headers, &owner, &repo, access).await {
        Ok(ok) => ok,
        Err(response) => return response,
    };

    let body = match advertisement(repository.refs(), service, AGENT).await {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!("advertisement for {owner}/{repo} failed: {err}");
            return (StatusCode::BAD_GATEWAY, "storage unavailable").into_response();
        }
    };
    counter!("git_http.info_refs", "service" => service.as_str()).increment(1);
    histogram!("git_http.info_refs_ms").record(start.elapsed().as_millis() as f64);

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            format!("application/x-{}-advertisement", service.as_str()),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(body))
        .expect("response")
}

// POST /{owner}/{repo}/git-upload-pack
//
// Fetch negotiation is answered with a bare NAK: this server is push- and
// browse-heavy and does not generate packs.
pub async fn upload_pack(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = authorize(&state, &headers, &owner, &repo, Access::Read).await {
        return response;
    }
    counter!("git_http.upload_pack").increment(1);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-git-upload-pack-result")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from("0008NAK\n"))
        .expect("response")
}

// POST /{owner}/{repo}/git-receive-pack
pub async fn receive_pack(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let start = Instant::now();
    let (info, repository) = match authorize(&state, &headers, &owner, &repo, Access::Write).await {
        Ok(ok) => ok,
        Err(response) => return response,
    };

    let outcome =
        match receive::receive_pack(&repository, state.protections.as_ref(), &body).await {
            Ok(outcome) => outcome,
            Err(err) if matches!(err, git_store::GitError::Malformed(_)) => {
                return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
            }
            Err(err) => {
                tracing::error!("receive-pack for {owner}/{repo} failed: {err}");
                return (StatusCode::BAD_GATEWAY, "storage unavailable").into_response();
            }
        };

    for branch in &outcome.updated_branches {
        state.cache.invalidate_branch(&info.id, branch).await;
        state.hub.broadcast(&RepoEvent {
            repo: info.id.clone(),
            branch: Some(branch.clone()),
            kind: RepoEventKind::Pushed,
        });
    }

    counter!("git_http.receive_pack").increment(1);
    counter!("git_http.receive_pack_objects").increment(outcome.stored_objects as u64);
    histogram!("git_http.receive_pack_ms").record(start.elapsed().as_millis() as f64);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-git-receive-pack-result")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(outcome.response))
        .expect("response")
}
