//! Receive-pack orchestration: parse the command section, unpack the pack,
//! enforce branch protection, update refs, and compose the pkt-line status
//! response.
//!
//! Protocol-level failures are reported in-band (`unpack <err>` / `ng`)
//! inside a successful response; only transport errors escape as `Err`.

use std::collections::HashMap;

use futures::StreamExt;
use futures::stream;

use crate::errors::{GitError, Result};
use crate::object::{ObjectType, Oid};
use crate::pack::{PACK_SIGNATURE, PackFile};
use crate::pkt::{PKT_FLUSH, Pkt, decode_pkt_line, encode_pkt_line};
use crate::protect::ProtectionStore;
use crate::repo::Repository;

/// Parallel width for loading external delta bases.
const BASE_LOAD_BATCH: usize = 20;
/// Parallel width for storing unpacked objects.
const STORE_BATCH: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub old: Oid,
    pub new: Oid,
    pub name: String,
}

impl RefUpdate {
    pub fn is_delete(&self) -> bool {
        self.new.is_zero()
    }

    pub fn is_create(&self) -> bool {
        self.old.is_zero()
    }

    /// Branch name for protection lookups and cache invalidation; `None`
    /// for refs outside `refs/heads/`.
    pub fn branch(&self) -> Option<&str> {
        self.name.strip_prefix("refs/heads/")
    }
}

#[derive(Debug)]
pub struct ReceiveOutcome {
    /// Full pkt-line response body for the client.
    pub response: Vec<u8>,
    /// Branches whose refs changed; callers invalidate their caches.
    pub updated_branches: Vec<String>,
    pub stored_objects: usize,
}

struct Request {
    updates: Vec<RefUpdate>,
    pack: Option<Vec<u8>>,
}

/// Split the body into the pkt-line command section and the raw pack. The
/// pack is located by scanning for the literal `PACK` signature; pushes
/// that only delete refs carry no pack at all.
fn parse_request(body: &[u8]) -> Result<Request> {
    let pack_at = body
        .windows(PACK_SIGNATURE.len())
        .position(|w| w == PACK_SIGNATURE);
    let (mut commands, pack) = match pack_at {
        Some(at) => (&body[..at], Some(body[at..].to_vec())),
        None => (body, None),
    };

    let mut updates = Vec::new();
    while !commands.is_empty() {
        let (pkt, rest) = decode_pkt_line(commands)?;
        commands = rest;
        let Pkt::Data(line) = pkt else { break };
        let line = match line.iter().position(|&b| b == 0) {
            Some(nul) => &line[..nul], // capabilities after NUL on the first line
            None => &line[..],
        };
        let text = std::str::from_utf8(line)
            .map_err(|_| GitError::malformed("command line is not UTF-8"))?
            .trim_end();
        if text.is_empty() {
            continue;
        }
        let mut parts = text.splitn(3, ' ');
        let (old, new, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(old), Some(new), Some(name)) => (old, new, name),
            _ => return Err(GitError::malformed(format!("bad update command {text:?}"))),
        };
        updates.push(RefUpdate {
            old: Oid::from_hex(old)?,
            new: Oid::from_hex(new)?,
            name: name.to_string(),
        });
    }
    Ok(Request { updates, pack })
}

struct UnpackResult {
    ok: bool,
    stored: usize,
    error: Option<String>,
}

/// Unpack the pack bytes into loose objects: resolve deltas (preloading
/// external ref-delta bases in parallel), re-hash every object, and store
/// them in parallel batches.
async fn unpack_into(repo: &Repository, pack_bytes: &[u8]) -> UnpackResult {
    let pack = match PackFile::parse(pack_bytes) {
        Ok(p) => p,
        Err(err) => {
            return UnpackResult { ok: false, stored: 0, error: Some(err.to_string()) };
        }
    };

    let mut wanted = pack.external_bases();
    wanted.sort_unstable();
    wanted.dedup();
    let loaded: Vec<Option<(Oid, (ObjectType, bytes::Bytes))>> =
        stream::iter(wanted.into_iter().map(|oid| async move {
            match repo.read_object(oid).await {
                Ok(obj) => Some((oid, obj)),
                Err(err) => {
                    if !err.is_not_found() {
                        tracing::warn!("loading delta base {oid}: {err}");
                    }
                    None
                }
            }
        }))
        .buffer_unordered(BASE_LOAD_BATCH)
        .collect()
        .await;
    let external: HashMap<_, _> = loaded.into_iter().flatten().collect();

    let resolved = pack.resolve(&external);
    if resolved.skipped > 0 {
        tracing::warn!(
            "pack for {} left {} deltas unresolved",
            repo.id(),
            resolved.skipped
        );
    }

    let results: Vec<Result<()>> =
        stream::iter(resolved.objects.into_iter().map(|(kind, payload)| async move {
            repo.write_object(kind, &payload).await.map(|_| ())
        }))
        .buffer_unordered(STORE_BATCH)
        .collect()
        .await;

    let mut stored = 0;
    for result in results {
        match result {
            Ok(()) => stored += 1,
            Err(err) => {
                return UnpackResult { ok: false, stored, error: Some(err.to_string()) };
            }
        }
    }
    UnpackResult { ok: true, stored, error: None }
}

/// Run a full receive-pack request against a repository.
pub async fn receive_pack(
    repo: &Repository,
    protections: &dyn ProtectionStore,
    body: &[u8],
) -> Result<ReceiveOutcome> {
    let request = parse_request(body)?;

    // Pre-unpack gates: deletion and direct-push protection. Rejected
    // updates drop out of the rest of the flow entirely.
    let mut allowed: Vec<RefUpdate> = Vec::new();
    let mut rejections: Vec<String> = Vec::new();
    for update in request.updates {
        let rules = match update.branch() {
            Some(branch) => protections.rules_for(repo.id(), branch).await?,
            None => None,
        };
        if let Some(rules) = &rules {
            if rules.prevent_deletion && update.is_delete() {
                rejections.push(format!(
                    "ng {} protected branch - deletion not allowed",
                    update.name
                ));
                continue;
            }
            if rules.prevent_direct_push && !update.is_delete() {
                rejections.push(format!(
                    "ng {} protected branch - direct push not allowed, use a pull request",
                    update.name
                ));
                continue;
            }
        }
        allowed.push(update);
    }

    // Everything rejected: no unpack, no new objects in the store.
    if allowed.is_empty() {
        return Ok(ReceiveOutcome {
            response: status_response("unpack ok", &[], &rejections),
            updated_branches: Vec::new(),
            stored_objects: 0,
        });
    }

    let unpack = match &request.pack {
        Some(pack_bytes) => unpack_into(repo, pack_bytes).await,
        None => UnpackResult { ok: true, stored: 0, error: None },
    };

    if !unpack.ok {
        let reason = unpack.error.unwrap_or_else(|| "unpack failed".to_string());
        for update in &allowed {
            rejections.push(format!("ng {} unpacker error", update.name));
        }
        return Ok(ReceiveOutcome {
            response: status_response(&format!("unpack {reason}"), &[], &rejections),
            updated_branches: Vec::new(),
            stored_objects: unpack.stored,
        });
    }

    // Post-unpack gate: force pushes can only be judged once the new tip's
    // history is present in the store.
    let mut applied: Vec<RefUpdate> = Vec::new();
    for update in allowed {
        if !update.is_delete() && !update.is_create() {
            let rules = match update.branch() {
                Some(branch) => protections.rules_for(repo.id(), branch).await?,
                None => None,
            };
            if rules.is_some_and(|r| r.prevent_force_push)
                && !repo.is_ancestor(update.old, update.new).await?
            {
                rejections.push(format!(
                    "ng {} protected branch - force push not allowed",
                    update.name
                ));
                continue;
            }
        }
        applied.push(update);
    }

    let mut ok_refs = Vec::with_capacity(applied.len());
    let mut updated_branches = Vec::new();
    for update in &applied {
        if update.is_delete() {
            repo.refs().delete(&update.name).await?;
        } else {
            repo.refs().write(&update.name, update.new).await?;
        }
        if let Some(branch) = update.branch() {
            updated_branches.push(branch.to_string());
        }
        ok_refs.push(update.name.clone());
    }

    Ok(ReceiveOutcome {
        response: status_response("unpack ok", &ok_refs, &rejections),
        updated_branches,
        stored_objects: unpack.stored,
    })
}

fn status_response(unpack_line: &str, ok_refs: &[String], rejections: &[String]) -> Vec<u8> {
    let mut body = Vec::with_capacity(64);
    body.extend_from_slice(&encode_pkt_line(format!("{unpack_line}\n").as_bytes()));
    for name in ok_refs {
        body.extend_from_slice(&encode_pkt_line(format!("ok {name}\n").as_bytes()));
    }
    for line in rejections {
        body.extend_from_slice(&encode_pkt_line(format!("{line}\n").as_bytes()));
    }
    body.extend_from_slice(PKT_FLUSH);
    body
}
