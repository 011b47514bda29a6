//! Commit-graph traversal: first-parent walks, merge-base, ancestry.
//!
//! Graphs are DAGs but may be deep; every walk is bounded and keeps a
//! visited set so a malformed graph cannot loop.

use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::errors::Result;
use crate::object::{Commit, Oid};
use crate::repo::Repository;

/// Ancestor-set cap for merge-base computation.
const MERGE_BASE_CAP: usize = 10_000;
/// Visited cap for the multi-parent ancestry test.
const ANCESTRY_CAP: usize = 10_000;
/// Cap for commits-between listings.
const BETWEEN_CAP: usize = 1_000;

/// A commit paired with its OID, as yielded by walks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedCommit {
    pub oid: Oid,
    pub commit: Commit,
}

impl Repository {
    /// First-parent walk from `from`, skipping `skip` commits and yielding
    /// at most `limit`. Stops at the root or at a missing parent object.
    pub async fn first_parent_log(
        &self,
        from: Oid,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<WalkedCommit>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(from);
        let mut index = 0usize;
        while let Some(oid) = cursor {
            if !seen.insert(oid) || out.len() >= limit {
                break;
            }
            let commit = match self.read_commit(oid).await {
                Ok(c) => c,
                Err(err) if err.is_not_found() => break,
                Err(err) => return Err(err),
            };
            cursor = commit.first_parent();
            if index >= skip {
                out.push(WalkedCommit { oid, commit });
            }
            index += 1;
        }
        Ok(out)
    }

    /// Number of first-parent ancestors of `from` (inclusive), capped.
    pub async fn commit_count(&self, from: Oid) -> Result<usize> {
        let mut seen = HashSet::new();
        let mut cursor = Some(from);
        while let Some(oid) = cursor {
            if !seen.insert(oid) || seen.len() > MERGE_BASE_CAP {
                break;
            }
            match self.read_commit(oid).await {
                Ok(c) => cursor = c.first_parent(),
                Err(err) if err.is_not_found() => break,
                Err(err) => return Err(err),
            }
        }
        Ok(seen.len())
    }

    /// First common first-parent ancestor of `a` and `b`, or `None`.
    ///
    /// Collects up to 10 000 first-parent ancestors of `a`, then walks `b`'s
    /// chain and returns the first hit.
    pub async fn merge_base(&self, a: Oid, b: Oid) -> Result<Option<Oid>> {
        let mut ancestors = HashSet::new();
        let mut cursor = Some(a);
        while let Some(oid) = cursor {
            if !ancestors.insert(oid) || ancestors.len() >= MERGE_BASE_CAP {
                break;
            }
            match self.read_commit(oid).await {
                Ok(c) => cursor = c.first_parent(),
                Err(err) if err.is_not_found() => break,
                Err(err) => return Err(err),
            }
        }
        let mut cursor = Some(b);
        let mut seen = HashSet::new();
        while let Some(oid) = cursor {
            if ancestors.contains(&oid) {
                return Ok(Some(oid));
            }
            if !seen.insert(oid) || seen.len() >= MERGE_BASE_CAP {
                break;
            }
            match self.read_commit(oid).await {
                Ok(c) => cursor = c.first_parent(),
                Err(err) if err.is_not_found() => break,
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// True when `ancestor` equals `descendant` or is reachable from it
    /// through any parent (multi-parent BFS, capped at 10 000 visited).
    pub async fn is_ancestor(&self, ancestor: Oid, descendant: Oid) -> Result<bool> {
        if ancestor == descendant {
            return Ok(true);
        }
        let mut queue = VecDeque::from([descendant]);
        let mut visited = HashSet::new();
        while let Some(oid) = queue.pop_front() {
            if !visited.insert(oid) {
                continue;
            }
            if visited.len() > ANCESTRY_CAP {
                return Ok(false);
            }
            let commit = match self.read_commit(oid).await {
                Ok(c) => c,
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err),
            };
            for parent in commit.parents {
                if parent == ancestor {
                    return Ok(true);
                }
                queue.push_back(parent);
            }
        }
        Ok(false)
    }

    /// First-parent commits from `head` down to (excluding) `stop`, capped
    /// at 1000. Reaching the root without meeting `stop` returns the whole
    /// chain.
    pub async fn commits_between(&self, head: Oid, stop: Option<Oid>) -> Result<Vec<WalkedCommit>> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(head);
        while let Some(oid) = cursor {
            if Some(oid) == stop || !seen.insert(oid) || out.len() >= BETWEEN_CAP {
                break;
            }
            let commit = match self.read_commit(oid).await {
                Ok(c) => c,
                Err(err) if err.is_not_found() => break,
                Err(err) => return Err(err),
            };
            cursor = commit.first_parent();
            out.push(WalkedCommit { oid, commit });
        }
        Ok(out)
    }

    /// Flatten a tree into `path -> (oid, mode)` for every blob under it.
    pub async fn tree_paths(&self, root: Oid) -> Result<BTreeMap<String, (Oid, String)>> {
        let mut out = BTreeMap::new();
        let mut stack = vec![(String::new(), root)];
        // Identical subtrees may appear under several paths; content
        // addressing keeps the recursion acyclic without a visited set.
        while let Some((dir, tree_oid)) = stack.pop() {
            let tree = self.read_tree(tree_oid).await?;
            for entry in tree.entries {
                let path = if dir.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{dir}/{}", entry.name)
                };
                if entry.is_tree() {
                    stack.push((path, entry.oid));
                } else {
                    out.insert(path, (entry.oid, entry.mode));
                }
            }
        }
        Ok(out)
    }
}
