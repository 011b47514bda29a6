//! Branch merging: PR merges (possibly across repositories) and the
//! three-way "update branch" sync.
//!
//! Cross-repo merges never share objects between repositories: everything
//! reachable from the head tip that the base repository lacks is copied
//! into it first, then the merge commit is composed locally.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::StreamExt;
use futures::stream;

use crate::errors::{GitError, Result};
use crate::object::{Commit, Oid, Signature, Tree, TreeEntry};
use crate::repo::Repository;

/// Parallel width for object copies between repositories.
const COPY_BATCH: usize = 50;

pub struct MergeRequest<'a> {
    pub base: &'a Repository,
    pub base_branch: &'a str,
    pub head: &'a Repository,
    pub head_branch: &'a str,
    pub author: Signature,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub merge_commit: Oid,
    pub base_oid: Oid,
    pub head_oid: Oid,
}

fn committer_now(author: &Signature) -> Signature {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Signature { name: author.name.clone(), email: author.email.clone(), timestamp: now, tz_offset_minutes: 0 }
}

async fn resolve_branch(repo: &Repository, branch: &str) -> Result<Oid> {
    repo.refs().resolve(branch).await.map_err(|err| {
        if err.is_not_found() {
            GitError::not_found(format!("branch {branch} in {}", repo.id()))
        } else {
            err
        }
    })
}

/// Merge `head_branch` into `base_branch` (pull-request semantics).
///
/// The merge commit's parent order is meaningful: first parent is the base
/// tip whose ref advances. The resulting tree is the head tree as-is; no
/// three-way tree is synthesized on this path.
pub async fn merge_branches(req: MergeRequest<'_>) -> Result<MergeOutcome> {
    let base_oid = resolve_branch(req.base, req.base_branch).await?;
    let head_oid = resolve_branch(req.head, req.head_branch).await?;

    let cross_repo = req.base.id() != req.head.id();
    if cross_repo {
        let stop = req.head.merge_base(head_oid, base_oid).await?;
        copy_reachable(req.head, req.base, head_oid, stop).await?;
    }

    // The head commit now lives in the base repo either way.
    let head_tree = req.base.read_commit(head_oid).await?.tree;

    let committer = committer_now(&req.author);
    let merge = Commit {
        tree: head_tree,
        parents: vec![base_oid, head_oid],
        author: req.author.clone(),
        committer,
        message: req.message.clone(),
    };
    let merge_commit = req.base.write_commit(&merge).await?;
    req.base.refs().write(req.base_branch, merge_commit).await?;

    let readback = req.base.refs().resolve(req.base_branch).await?;
    if readback != merge_commit {
        return Err(GitError::transport(format!(
            "ref {} read back {readback}, expected {merge_commit}",
            req.base_branch
        )));
    }
    Ok(MergeOutcome { merge_commit, base_oid, head_oid })
}

/// Advance a PR head branch over a moved base: three-way merge of the two
/// tips against their merge-base, conflicts reported instead of merged.
///
/// Parent order here is `[head, base]`: the head branch is the one whose
/// ref advances.
pub async fn update_branch(req: MergeRequest<'_>) -> Result<MergeOutcome> {
    let head_oid = resolve_branch(req.head, req.head_branch).await?;
    let base_oid = resolve_branch(req.base, req.base_branch).await?;

    if req.base.id() != req.head.id() {
        let stop = req.base.merge_base(base_oid, head_oid).await?;
        copy_reachable(req.base, req.head, base_oid, stop).await?;
    }

    let repo = req.head;
    let merge_base = repo.merge_base(head_oid, base_oid).await?;
    let base_files = repo.tree_paths(repo.read_commit(base_oid).await?.tree).await?;
    let head_files = repo.tree_paths(repo.read_commit(head_oid).await?.tree).await?;
    let merge_base_files = match merge_base {
        Some(m) => repo.tree_paths(repo.read_commit(m).await?.tree).await?,
        None => BTreeMap::new(),
    };

    let mut paths: HashSet<&String> = merge_base_files.keys().collect();
    paths.extend(head_files.keys());
    paths.extend(base_files.keys());

    // A path conflicts when both sides changed it away from the merge-base
    // to distinct surviving blobs. Delete-versus-modify resolves in favor
    // of the head change below.
    let mut conflicts: Vec<String> = Vec::new();
    let mut merged: BTreeMap<String, (Oid, String)> = BTreeMap::new();
    for path in paths {
        let at_base_of_merge = merge_base_files.get(path);
        let in_head = head_files.get(path);
        let in_base = base_files.get(path);
        let head_changed = in_head != at_base_of_merge;
        let base_changed = in_base != at_base_of_merge;
        if head_changed
            && base_changed
            && let (Some(h), Some(b)) = (in_head, in_base)
            && h.0 != b.0
        {
            conflicts.push(path.clone());
            continue;
        }
        let keep = if head_changed { in_head } else if base_changed { in_base } else { in_head };
        if let Some(entry) = keep {
            merged.insert(path.clone(), entry.clone());
        }
    }
    if !conflicts.is_empty() {
        conflicts.sort();
        return Err(GitError::Conflict { files: conflicts });
    }

    let merged_tree = write_tree_from_paths(repo, &merged).await?;
    let committer = committer_now(&req.author);
    let merge = Commit {
        tree: merged_tree,
        parents: vec![head_oid, base_oid],
        author: req.author.clone(),
        committer,
        message: req.message.clone(),
    };
    let merge_commit = repo.write_commit(&merge).await?;
    repo.refs().write(req.head_branch, merge_commit).await?;
    Ok(MergeOutcome { merge_commit, base_oid, head_oid })
}

/// Copy every object reachable from `tip` that `dst` does not already hold.
///
/// Commit traversal preserves the full parent list for breadth and stops at
/// the merge-base (when known) and at any commit the destination already
/// has; per commit, its tree is walked recursively. The raw loose-object
/// bytes are copied key-for-key in bounded parallel batches.
pub async fn copy_reachable(
    src: &Repository,
    dst: &Repository,
    tip: Oid,
    stop_at: Option<Oid>,
) -> Result<()> {
    let mut to_copy: Vec<Oid> = Vec::new();
    let mut queued: HashSet<Oid> = HashSet::new();
    let mut commits = VecDeque::from([tip]);
    let mut seen_commits = HashSet::new();

    while let Some(commit_oid) = commits.pop_front() {
        if !seen_commits.insert(commit_oid) || Some(commit_oid) == stop_at {
            continue;
        }
        if dst.has_object(commit_oid).await? {
            continue;
        }
        let commit = src.read_commit(commit_oid).await?;
        to_copy.push(commit_oid);
        queued.insert(commit_oid);

        // Tree walk, skipping whole subtrees the destination already has.
        let mut trees = vec![commit.tree];
        while let Some(tree_oid) = trees.pop() {
            if queued.contains(&tree_oid) || dst.has_object(tree_oid).await? {
                continue;
            }
            let tree = src.read_tree(tree_oid).await?;
            to_copy.push(tree_oid);
            queued.insert(tree_oid);
            for entry in tree.entries {
                if entry.is_tree() {
                    trees.push(entry.oid);
                } else if !queued.contains(&entry.oid) && !dst.has_object(entry.oid).await? {
                    to_copy.push(entry.oid);
                    queued.insert(entry.oid);
                }
            }
        }
        for parent in commit.parents {
            commits.push_back(parent);
        }
    }

    let results: Vec<Result<()>> = stream::iter(to_copy.into_iter().map(|oid| async move {
        let key = oid.loose_key();
        let src_key = src.fs().key_for(&key);
        let dst_key = dst.fs().key_for(&key);
        let data = src
            .store()
            .get(&src_key)
            .await?
            .ok_or_else(|| GitError::not_found(format!("object {oid} in {}", src.id())))?;
        dst.store().put(&dst_key, data, None).await
    }))
    .buffer_unordered(COPY_BATCH)
    .collect()
    .await;
    results.into_iter().collect()
}

/// Materialize a flat `path -> (oid, mode)` map as nested tree objects,
/// writing subtrees bottom-up. Returns the root tree OID.
pub async fn write_tree_from_paths(
    repo: &Repository,
    paths: &BTreeMap<String, (Oid, String)>,
) -> Result<Oid> {
    // Group files by directory, making sure every ancestor directory exists.
    let mut dirs: BTreeMap<String, Vec<TreeEntry>> = BTreeMap::new();
    dirs.insert(String::new(), Vec::new());
    for (path, (oid, mode)) in paths {
        let (dir, name) = match path.rsplit_once('/') {
            Some((dir, name)) => (dir.to_string(), name.to_string()),
            None => (String::new(), path.clone()),
        };
        let mut ancestor = dir.clone();
        loop {
            dirs.entry(ancestor.clone()).or_default();
            match ancestor.rsplit_once('/') {
                Some((parent, _)) => ancestor = parent.to_string(),
                None => {
                    if !ancestor.is_empty() {
                        dirs.entry(String::new()).or_default();
                    }
                    break;
                }
            }
        }
        dirs.get_mut(&dir)
            .ok_or_else(|| GitError::transport("directory grouping lost a parent"))?
            .push(TreeEntry { mode: mode.clone(), name, oid: *oid });
    }

    // Deepest directories first so parents can reference child tree OIDs.
    let mut order: Vec<String> = dirs.keys().cloned().collect();
    order.sort_by_key(|d| std::cmp::Reverse(d.matches('/').count() + usize::from(!d.is_empty())));

    let mut written: BTreeMap<String, Oid> = BTreeMap::new();
    for dir in order {
        let mut entries = dirs.remove(&dir).unwrap_or_default();
        let child_prefix = if dir.is_empty() { String::new() } else { format!("{dir}/") };
        for (child_dir, child_oid) in &written {
            if let Some(rest) = child_dir.strip_prefix(&child_prefix)
                && !rest.is_empty()
                && !rest.contains('/')
            {
                entries.push(TreeEntry { mode: "40000".into(), name: rest.to_string(), oid: *child_oid });
            }
        }
        let oid = repo.write_tree(&Tree { entries }).await?;
        written.insert(dir, oid);
    }
    written
        .remove("")
        .ok_or_else(|| GitError::transport("tree materialization produced no root"))
}
