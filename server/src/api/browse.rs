//! Read-only content endpoints: branches, history, trees, files, diffs.
//!
//! Every lookup goes through the fingerprint cache first; results that came
//! back empty are served but never cached, so a repository gaining its
//! first commit shows up without waiting out a TTL.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use git_store::cache::CacheKind;
use git_store::diff::FileChange;
use git_store::graph::WalkedCommit;
use git_store::object::{Oid, Signature};
use git_store::repo::Repository;

use crate::api::{AppState, git_error_response};
use crate::directory::RepoInfo;
use crate::git_http::{Access, authorize};

/// Files larger than this are listed but not inlined.
const MAX_FILE_PREVIEW_BYTES: usize = 128 * 1024;

const DEFAULT_COMMIT_PAGE: usize = 20;
const MAX_COMMIT_PAGE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchEntry {
    pub name: String,
    pub oid: Oid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitEntry {
    pub oid: Oid,
    pub summary: String,
    pub message: String,
    pub author: Signature,
    pub committer: Signature,
    pub parents: Vec<Oid>,
}

impl From<&WalkedCommit> for CommitEntry {
    fn from(walked: &WalkedCommit) -> Self {
        CommitEntry {
            oid: walked.oid,
            summary: walked.commit.summary().to_string(),
            message: walked.commit.message.clone(),
            author: walked.commit.author.clone(),
            committer: walked.commit.committer.clone(),
            parents: walked.commit.parents.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeEntryView {
    pub name: String,
    pub path: String,
    pub kind: String,
    pub mode: String,
    pub oid: Oid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileView {
    pub path: String,
    pub oid: Oid,
    pub size: usize,
    pub binary: bool,
    /// UTF-8 (lossy) content; absent for binary or oversized files.
    pub content: Option<String>,
}

fn not_found(what: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": what }))).into_response()
}

async fn read_repo(
    state: &AppState,
    headers: &HeaderMap,
    owner: &str,
    repo: &str,
) -> Result<(RepoInfo, Repository), Response> {
    authorize(state, headers, owner, repo, Access::Read).await
}

#[derive(Debug, Deserialize)]
pub struct BranchQuery {
    pub branch: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommitsQuery {
    pub branch: Option<String>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub branch: Option<String>,
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub base: String,
    pub head: String,
}

/// Branch tip for a request, defaulting to the repository default branch.
/// `Ok(None)` means the branch simply has no commits yet.
async fn resolve_tip(
    repository: &Repository,
    info: &RepoInfo,
    branch: Option<&str>,
) -> Result<Option<(String, Oid)>, Response> {
    let branch = branch.unwrap_or(&info.default_branch).to_string();
    match repository.refs().resolve(&branch).await {
        Ok(oid) => Ok(Some((branch, oid))),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(git_error_response(err)),
    }
}

// GET /api/repos/{owner}/{repo}/branches
pub async fn branches(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let (info, repository) = match read_repo(&state, &headers, &owner, &repo).await {
        Ok(ok) => ok,
        Err(response) => return response,
    };
    let key = state.cache.key(CacheKind::Branches, &info.id, None, None);
    if let Some(cached) = state.cache.get_json::<Vec<BranchEntry>>(&key).await {
        return Json(cached).into_response();
    }

    let names = match repository.refs().list_branches().await {
        Ok(names) => names,
        Err(err) => return git_error_response(err),
    };
    let mut entries = Vec::with_capacity(names.len());
    for name in names {
        match repository.refs().resolve(&name).await {
            Ok(oid) => entries.push(BranchEntry { name, oid }),
            Err(err) => tracing::warn!("unresolvable branch {name}: {err}"),
        }
    }
    state.cache.put_list(CacheKind::Branches, &key, &entries).await;
    Json(entries).into_response()
}

// GET /api/repos/{owner}/{repo}/commits?branch=&limit=&skip=
pub async fn commits(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<CommitsQuery>,
    headers: HeaderMap,
) -> Response {
    let (info, repository) = match read_repo(&state, &headers, &owner, &repo).await {
        Ok(ok) => ok,
        Err(response) => return response,
    };
    let limit = query.limit.unwrap_or(DEFAULT_COMMIT_PAGE).min(MAX_COMMIT_PAGE);
    let skip = query.skip.unwrap_or(0);
    let Some((branch, tip)) = (match resolve_tip(&repository, &info, query.branch.as_deref()).await
    {
        Ok(tip) => tip,
        Err(response) => return response,
    }) else {
        return Json(Vec::<CommitEntry>::new()).into_response();
    };

    let extra = format!("l{limit}-s{skip}");
    let key = state.cache.key(CacheKind::Commits, &info.id, Some(&branch), Some(&extra));
    if let Some(cached) = state.cache.get_json::<Vec<CommitEntry>>(&key).await {
        return Json(cached).into_response();
    }

    let walked = match repository.first_parent_log(tip, limit, skip).await {
        Ok(walked) => walked,
        Err(err) => return git_error_response(err),
    };
    let entries: Vec<CommitEntry> = walked.iter().map(CommitEntry::from).collect();
    state.cache.put_list(CacheKind::Commits, &key, &entries).await;
    Json(entries).into_response()
}

// GET /api/repos/{owner}/{repo}/commit-count?branch=
pub async fn commit_count(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<BranchQuery>,
    headers: HeaderMap,
) -> Response {
    let (info, repository) = match read_repo(&state, &headers, &owner, &repo).await {
        Ok(ok) => ok,
        Err(response) => return response,
    };
    let Some((branch, tip)) = (match resolve_tip(&repository, &info, query.branch.as_deref()).await
    {
        Ok(tip) => tip,
        Err(response) => return response,
    }) else {
        return Json(json!({ "count": 0 })).into_response();
    };

    let key = state.cache.key(CacheKind::CommitCount, &info.id, Some(&branch), None);
    if let Some(count) = state.cache.get_json::<usize>(&key).await {
        return Json(json!({ "count": count })).into_response();
    }
    let count = match repository.commit_count(tip).await {
        Ok(count) => count,
        Err(err) => return git_error_response(err),
    };
    if count > 0 {
        state.cache.put_json(CacheKind::CommitCount, &key, &count).await;
    }
    Json(json!({ "count": count })).into_response()
}

// GET /api/repos/{owner}/{repo}/tree?branch=&path=
pub async fn tree(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<PathQuery>,
    headers: HeaderMap,
) -> Response {
    let (info, repository) = match read_repo(&state, &headers, &owner, &repo).await {
        Ok(ok) => ok,
        Err(response) => return response,
    };
    let Some((branch, tip)) = (match resolve_tip(&repository, &info, query.branch.as_deref()).await
    {
        Ok(tip) => tip,
        Err(response) => return response,
    }) else {
        return not_found("branch has no commits");
    };
    let tree_path = query.path.unwrap_or_default();
    let tree_path = tree_path.trim_matches('/').to_string();

    let extra = if tree_path.is_empty() { "-".to_string() } else { tree_path.clone() };
    let key = state.cache.key(CacheKind::Trees, &info.id, Some(&branch), Some(&extra));
    if let Some(cached) = state.cache.get_json::<Vec<TreeEntryView>>(&key).await {
        return Json(cached).into_response();
    }

    let root = match repository.read_commit(tip).await {
        Ok(commit) => commit.tree,
        Err(err) => return git_error_response(err),
    };
    let tree_oid = if tree_path.is_empty() {
        root
    } else {
        match repository.entry_at_path(root, &tree_path).await {
            Ok(Some(entry)) if entry.is_tree() => entry.oid,
            Ok(_) => return not_found("path is not a directory"),
            Err(err) => return git_error_response(err),
        }
    };
    let tree = match repository.read_tree(tree_oid).await {
        Ok(tree) => tree,
        Err(err) => return git_error_response(err),
    };
    let entries: Vec<TreeEntryView> = tree
        .entries
        .iter()
        .map(|entry| TreeEntryView {
            name: entry.name.clone(),
            path: if tree_path.is_empty() {
                entry.name.clone()
            } else {
                format!("{tree_path}/{}", entry.name)
            },
            kind: if entry.is_tree() { "directory" } else { "file" }.to_string(),
            mode: entry.mode.clone(),
            oid: entry.oid,
        })
        .collect();
    state.cache.put_list(CacheKind::Trees, &key, &entries).await;
    Json(entries).into_response()
}

// GET /api/repos/{owner}/{repo}/file?branch=&path=
pub async fn file(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<PathQuery>,
    headers: HeaderMap,
) -> Response {
    let (info, repository) = match read_repo(&state, &headers, &owner, &repo).await {
        Ok(ok) => ok,
        Err(response) => return response,
    };
    let Some(file_path) = query.path.filter(|p| !p.is_empty()) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "path is required" })))
            .into_response();
    };
    let Some((branch, tip)) = (match resolve_tip(&repository, &info, query.branch.as_deref()).await
    {
        Ok(tip) => tip,
        Err(response) => return response,
    }) else {
        return not_found("branch has no commits");
    };

    let key = state.cache.key(CacheKind::Files, &info.id, Some(&branch), Some(&file_path));
    if let Some(cached) = state.cache.get_json::<FileView>(&key).await {
        return Json(cached).into_response();
    }

    let root = match repository.read_commit(tip).await {
        Ok(commit) => commit.tree,
        Err(err) => return git_error_response(err),
    };
    let entry = match repository.entry_at_path(root, &file_path).await {
        Ok(Some(entry)) if !entry.is_tree() => entry,
        Ok(_) => return not_found("file not found"),
        Err(err) => return git_error_response(err),
    };
    let data = match repository.read_blob(entry.oid).await {
        Ok(data) => data,
        Err(err) => return git_error_response(err),
    };
    let binary = data[..data.len().min(8000)].contains(&0);
    let view = FileView {
        path: file_path,
        oid: entry.oid,
        size: data.len(),
        binary,
        content: (!binary && data.len() <= MAX_FILE_PREVIEW_BYTES)
            .then(|| String::from_utf8_lossy(&data).into_owned()),
    };
    state.cache.put_json(CacheKind::Files, &key, &view).await;
    Json(view).into_response()
}

// GET /api/repos/{owner}/{repo}/commits/{oid}/diff
pub async fn diff(
    State(state): State<AppState>,
    Path((owner, repo, oid)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    let (info, repository) = match read_repo(&state, &headers, &owner, &repo).await {
        Ok(ok) => ok,
        Err(response) => return response,
    };
    let oid = match Oid::from_hex(&oid) {
        Ok(oid) => oid,
        Err(err) => return git_error_response(err),
    };

    // Commit content is immutable, so the diff caches under the long TTL.
    let scope = format!("diff-{oid}");
    let key = state.cache.key(CacheKind::GitObject, &info.id, Some(&scope), None);
    if let Some(cached) = state.cache.get_json::<serde_json::Value>(&key).await {
        return Json(cached).into_response();
    }

    let diff = match repository.commit_diff(oid).await {
        Ok(diff) => diff,
        Err(err) => return git_error_response(err),
    };
    state.cache.put_json(CacheKind::GitObject, &key, &diff).await;
    Json(diff).into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareView {
    pub merge_base: Option<Oid>,
    pub commits: Vec<CommitEntry>,
    pub files: Vec<FileChange>,
}

// GET /api/repos/{owner}/{repo}/compare?base=&head=
pub async fn compare(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
    Query(query): Query<CompareQuery>,
    headers: HeaderMap,
) -> Response {
    let (_, repository) = match read_repo(&state, &headers, &owner, &repo).await {
        Ok(ok) => ok,
        Err(response) => return response,
    };
    let base = match repository.refs().resolve(&query.base).await {
        Ok(oid) => oid,
        Err(err) => return git_error_response(err),
    };
    let head = match repository.refs().resolve(&query.head).await {
        Ok(oid) => oid,
        Err(err) => return git_error_response(err),
    };

    let merge_base = match repository.merge_base(base, head).await {
        Ok(merge_base) => merge_base,
        Err(err) => return git_error_response(err),
    };
    let commits = match repository.commits_between(head, merge_base).await {
        Ok(walked) => walked.iter().map(CommitEntry::from).collect(),
        Err(err) => return git_error_response(err),
    };

    let base_tree = match merge_base.or(Some(base)) {
        Some(oid) => match repository.read_commit(oid).await {
            Ok(commit) => Some(commit.tree),
            Err(err) => return git_error_response(err),
        },
        None => None,
    };
    let head_tree = match repository.read_commit(head).await {
        Ok(commit) => commit.tree,
        Err(err) => return git_error_response(err),
    };
    let files = match repository.diff_trees(base_tree, Some(head_tree)).await {
        Ok(files) => files,
        Err(err) => return git_error_response(err),
    };

    Json(CompareView { merge_base, commits, files }).into_response()
}
