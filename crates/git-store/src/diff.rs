//! Content diff: recursive tree comparison and line-level hunks.
//!
//! The line diff is a deterministic two-pointer walk, not an LCS. It must
//! attribute every line exactly once and group neighbouring changes; those
//! properties are what the UI and the tests rely on.

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::object::{EntryKind, Oid, Tree};
use crate::repo::Repository;

/// Changes closer than this many context lines share a hunk.
const HUNK_CONTEXT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Deleted,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
    pub old_oid: Option<Oid>,
    pub new_oid: Option<Oid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Context,
    Addition,
    Deletion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub kind: LineKind,
    pub old_line: Option<usize>,
    pub new_line: Option<usize>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    pub lines: Vec<DiffLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDiff {
    #[serde(flatten)]
    pub change: FileChange,
    pub hunks: Vec<Hunk>,
    pub additions: usize,
    pub deletions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitDiff {
    pub files: Vec<FileDiff>,
    pub additions: usize,
    pub deletions: usize,
}

impl Repository {
    /// Structural comparison of two trees, recursing into subtrees and
    /// enumerating the blobs inside added or deleted directories.
    pub async fn diff_trees(&self, old: Option<Oid>, new: Option<Oid>) -> Result<Vec<FileChange>> {
        let mut changes = Vec::new();
        let mut work = vec![(String::new(), old, new)];
        while let Some((dir, old_oid, new_oid)) = work.pop() {
            if old_oid == new_oid {
                continue;
            }
            let old_tree = match old_oid {
                Some(oid) => self.read_tree(oid).await?,
                None => Tree::default(),
            };
            let new_tree = match new_oid {
                Some(oid) => self.read_tree(oid).await?,
                None => Tree::default(),
            };
            let mut names: Vec<&str> = old_tree
                .entries
                .iter()
                .chain(new_tree.entries.iter())
                .map(|e| e.name.as_str())
                .collect();
            names.sort_unstable();
            names.dedup();
            for name in names {
                let path = if dir.is_empty() { name.to_string() } else { format!("{dir}/{name}") };
                let old_entry = old_tree.entry(name);
                let new_entry = new_tree.entry(name);
                match (old_entry, new_entry) {
                    (None, Some(e)) if e.kind() == EntryKind::Tree => {
                        work.push((path, None, Some(e.oid)));
                    }
                    (None, Some(e)) => changes.push(FileChange {
                        path,
                        kind: ChangeKind::Added,
                        old_oid: None,
                        new_oid: Some(e.oid),
                    }),
                    (Some(e), None) if e.kind() == EntryKind::Tree => {
                        work.push((path, Some(e.oid), None));
                    }
                    (Some(e), None) => changes.push(FileChange {
                        path,
                        kind: ChangeKind::Deleted,
                        old_oid: Some(e.oid),
                        new_oid: None,
                    }),
                    (Some(o), Some(n)) if o.oid == n.oid => {}
                    (Some(o), Some(n)) if o.is_tree() && n.is_tree() => {
                        work.push((path, Some(o.oid), Some(n.oid)));
                    }
                    (Some(o), Some(n)) => changes.push(FileChange {
                        path,
                        kind: ChangeKind::Modified,
                        old_oid: Some(o.oid),
                        new_oid: Some(n.oid),
                    }),
                    (None, None) => {}
                }
            }
        }
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(changes)
    }

    /// Load blob contents for a change and build its hunks.
    pub async fn file_diff(&self, change: FileChange) -> Result<FileDiff> {
        let old_text = match change.old_oid {
            Some(oid) => String::from_utf8_lossy(&self.read_blob(oid).await?).into_owned(),
            None => String::new(),
        };
        let new_text = match change.new_oid {
            Some(oid) => String::from_utf8_lossy(&self.read_blob(oid).await?).into_owned(),
            None => String::new(),
        };
        let hunks = diff_lines(&old_text, &new_text);
        let additions = hunks
            .iter()
            .flat_map(|h| &h.lines)
            .filter(|l| l.kind == LineKind::Addition)
            .count();
        let deletions = hunks
            .iter()
            .flat_map(|h| &h.lines)
            .filter(|l| l.kind == LineKind::Deletion)
            .count();
        Ok(FileDiff { change, hunks, additions, deletions })
    }

    /// Diff of a commit against its first parent (or the empty tree).
    pub async fn commit_diff(&self, commit_oid: Oid) -> Result<CommitDiff> {
        let commit = self.read_commit(commit_oid).await?;
        let parent_tree = match commit.first_parent() {
            Some(parent) => Some(self.read_commit(parent).await?.tree),
            None => None,
        };
        let changes = self.diff_trees(parent_tree, Some(commit.tree)).await?;
        let mut files = Vec::with_capacity(changes.len());
        let mut additions = 0;
        let mut deletions = 0;
        for change in changes {
            let file = self.file_diff(change).await?;
            additions += file.additions;
            deletions += file.deletions;
            files.push(file);
        }
        Ok(CommitDiff { files, additions, deletions })
    }
}

fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let trimmed = text.strip_suffix('\n').unwrap_or(text);
    trimmed.split('\n').collect()
}

/// Line-oriented diff of two text blobs.
pub fn diff_lines(old_text: &str, new_text: &str) -> Vec<Hunk> {
    let old = split_lines(old_text);
    let new = split_lines(new_text);

    if old.is_empty() && new.is_empty() {
        return Vec::new();
    }
    // Pure add or delete: one hunk spanning the file.
    if old.is_empty() || new.is_empty() {
        let lines: Vec<DiffLine> = if old.is_empty() {
            new.iter()
                .enumerate()
                .map(|(i, l)| DiffLine {
                    kind: LineKind::Addition,
                    old_line: None,
                    new_line: Some(i + 1),
                    content: (*l).to_string(),
                })
                .collect()
        } else {
            old.iter()
                .enumerate()
                .map(|(i, l)| DiffLine {
                    kind: LineKind::Deletion,
                    old_line: Some(i + 1),
                    new_line: None,
                    content: (*l).to_string(),
                })
                .collect()
        };
        return vec![Hunk {
            old_start: if old.is_empty() { 0 } else { 1 },
            old_lines: old.len(),
            new_start: if new.is_empty() { 0 } else { 1 },
            new_lines: new.len(),
            lines,
        }];
    }

    let records = walk_changes(&old, &new);
    group_hunks(records)
}

/// Sequential two-pointer walk. On a mismatch it resynchronizes at the
/// nearest matching line, preferring the shorter of a deletion run or an
/// addition run; ties and absent matches become a paired delete+add.
fn walk_changes(old: &[&str], new: &[&str]) -> Vec<DiffLine> {
    let mut records = Vec::with_capacity(old.len().max(new.len()));
    let (mut i, mut j) = (0usize, 0usize);
    while i < old.len() && j < new.len() {
        if old[i] == new[j] {
            records.push(DiffLine {
                kind: LineKind::Context,
                old_line: Some(i + 1),
                new_line: Some(j + 1),
                content: old[i].to_string(),
            });
            i += 1;
            j += 1;
            continue;
        }
        let delete_run = old[i..].iter().position(|l| *l == new[j]);
        let insert_run = new[j..].iter().position(|l| *l == old[i]);
        match (delete_run, insert_run) {
            (Some(d), Some(a)) if d <= a => emit_deletions(&mut records, old, &mut i, d),
            (Some(_), Some(a)) => emit_additions(&mut records, new, &mut j, a),
            (Some(d), None) => emit_deletions(&mut records, old, &mut i, d),
            (None, Some(a)) => emit_additions(&mut records, new, &mut j, a),
            (None, None) => {
                emit_deletions(&mut records, old, &mut i, 1);
                emit_additions(&mut records, new, &mut j, 1);
            }
        }
    }
    let remaining_old = old.len() - i;
    emit_deletions(&mut records, old, &mut i, remaining_old);
    let remaining_new = new.len() - j;
    emit_additions(&mut records, new, &mut j, remaining_new);
    records
}

fn emit_deletions(records: &mut Vec<DiffLine>, old: &[&str], i: &mut usize, count: usize) {
    for _ in 0..count {
        records.push(DiffLine {
            kind: LineKind::Deletion,
            old_line: Some(*i + 1),
            new_line: None,
            content: old[*i].to_string(),
        });
        *i += 1;
    }
}

fn emit_additions(records: &mut Vec<DiffLine>, new: &[&str], j: &mut usize, count: usize) {
    for _ in 0..count {
        records.push(DiffLine {
            kind: LineKind::Addition,
            old_line: None,
            new_line: Some(*j + 1),
            content: new[*j].to_string(),
        });
        *j += 1;
    }
}

fn group_hunks(records: Vec<DiffLine>) -> Vec<Hunk> {
    let change_indices: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.kind != LineKind::Context)
        .map(|(idx, _)| idx)
        .collect();
    if change_indices.is_empty() {
        return Vec::new();
    }

    // Merge change clusters separated by at most HUNK_CONTEXT context lines,
    // then pad each cluster with up to HUNK_CONTEXT context lines.
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for &idx in &change_indices {
        match ranges.last_mut() {
            Some((_, end)) if idx - *end <= HUNK_CONTEXT + 1 => *end = idx,
            _ => ranges.push((idx, idx)),
        }
    }

    let mut hunks = Vec::with_capacity(ranges.len());
    for (first, last) in ranges {
        let start = first.saturating_sub(HUNK_CONTEXT);
        let end = (last + HUNK_CONTEXT + 1).min(records.len());
        let lines: Vec<DiffLine> = records[start..end].to_vec();
        let old_lines = lines.iter().filter(|l| l.old_line.is_some()).count();
        let new_lines = lines.iter().filter(|l| l.new_line.is_some()).count();
        let old_start = lines.iter().find_map(|l| l.old_line).unwrap_or(0);
        let new_start = lines.iter().find_map(|l| l.new_line).unwrap_or(0);
        hunks.push(Hunk { old_start, old_lines, new_start, new_lines, lines });
    }
    hunks
}
