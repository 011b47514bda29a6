//! Packfile codec for receive-pack.
//!
//! Parses v2/v3 packfiles: varint object headers, zlib bodies of unknown
//! compressed length, and ofs/ref deltas resolved against in-pack entries
//! or externally supplied base objects. The codec is strict about framing
//! (bad signature, truncated varint, unrecoverable zlib failure are
//! [`GitError::Malformed`]) and lenient about delta bases: entries whose
//! base cannot be found are skipped and counted, the unpack does not abort.

use std::collections::HashMap;

use bytes::Bytes;
use flate2::{Decompress, FlushDecompress, Status};

use crate::errors::{GitError, Result};
use crate::object::{ObjectType, Oid, oid_for};

pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";

const OBJ_OFS_DELTA: u8 = 6;
const OBJ_REF_DELTA: u8 = 7;

#[derive(Debug, Clone)]
enum RawEntry {
    Base { kind: ObjectType, data: Bytes },
    OfsDelta { base_offset: u64, delta: Bytes },
    RefDelta { base: Oid, delta: Bytes },
}

#[derive(Debug, Clone)]
struct PackEntry {
    /// Absolute offset of the entry header within the pack buffer.
    offset: u64,
    raw: RawEntry,
}

/// A parsed pack, prior to delta resolution.
#[derive(Debug)]
pub struct PackFile {
    pub version: u32,
    pub declared_count: u32,
    entries: Vec<PackEntry>,
}

/// Result of resolving a parsed pack.
#[derive(Debug, Default)]
pub struct ResolvedPack {
    /// Fully resolved `(type, payload)` objects, in pack file order.
    pub objects: Vec<(ObjectType, Bytes)>,
    /// Delta entries skipped because their base never materialized.
    pub skipped: usize,
}

impl PackFile {
    /// Parse the pack header and every object entry in file order.
    pub fn parse(data: &[u8]) -> Result<PackFile> {
        if data.len() < 12 || &data[..4] != PACK_SIGNATURE {
            return Err(GitError::malformed("bad pack signature"));
        }
        let version = u32::from_be_bytes(data[4..8].try_into().unwrap_or_default());
        if version != 2 && version != 3 {
            return Err(GitError::malformed(format!("unsupported pack version {version}")));
        }
        let declared_count = u32::from_be_bytes(data[8..12].try_into().unwrap_or_default());

        let mut entries = Vec::with_capacity(declared_count as usize);
        let mut pos = 12usize;
        for _ in 0..declared_count {
            let offset = pos as u64;
            let (kind_code, _declared_size) = read_object_header(data, &mut pos)?;
            let raw = match kind_code {
                OBJ_OFS_DELTA => {
                    let distance = read_ofs_distance(data, &mut pos)?;
                    let base_offset = offset.checked_sub(distance).ok_or_else(|| {
                        GitError::malformed("ofs-delta distance before start of pack")
                    })?;
                    let (delta, consumed) = inflate_with_recovery(&data[pos..])?;
                    pos += consumed;
                    RawEntry::OfsDelta { base_offset, delta: Bytes::from(delta) }
                }
                OBJ_REF_DELTA => {
                    if pos + 20 > data.len() {
                        return Err(GitError::malformed("truncated ref-delta base oid"));
                    }
                    let base = Oid::from_raw(&data[pos..pos + 20])?;
                    pos += 20;
                    let (delta, consumed) = inflate_with_recovery(&data[pos..])?;
                    pos += consumed;
                    RawEntry::RefDelta { base, delta: Bytes::from(delta) }
                }
                code => {
                    let kind = ObjectType::from_pack_code(code)?;
                    let (body, consumed) = inflate_with_recovery(&data[pos..])?;
                    pos += consumed;
                    RawEntry::Base { kind, data: Bytes::from(body) }
                }
            };
            entries.push(PackEntry { offset, raw });
        }
        // A 20-byte SHA-1 trailer may follow; it is not required to validate.
        Ok(PackFile { version, declared_count, entries })
    }

    /// Base OIDs referenced by ref-deltas. The caller preloads these from
    /// the repository before calling [`resolve`](Self::resolve); some may
    /// turn out to live inside the pack itself, which is fine.
    pub fn external_bases(&self) -> Vec<Oid> {
        self.entries
            .iter()
            .filter_map(|e| match &e.raw {
                RawEntry::RefDelta { base, .. } => Some(*base),
                _ => None,
            })
            .collect()
    }

    /// Resolve every entry to its transitively non-delta form.
    ///
    /// `external` maps already-stored base OIDs to their `(type, payload)`.
    /// Delta chains are resolved by repeated passes, so a delta whose base
    /// appears later in the file (or is itself a delta) still converges.
    pub fn resolve(&self, external: &HashMap<Oid, (ObjectType, Bytes)>) -> ResolvedPack {
        let mut resolved: Vec<Option<(ObjectType, Bytes)>> = vec![None; self.entries.len()];
        let mut index_by_offset = HashMap::with_capacity(self.entries.len());
        let mut index_by_oid: HashMap<Oid, usize> = HashMap::new();

        for (idx, entry) in self.entries.iter().enumerate() {
            index_by_offset.insert(entry.offset, idx);
            if let RawEntry::Base { kind, data } = &entry.raw {
                index_by_oid.insert(oid_for(*kind, data), idx);
                resolved[idx] = Some((*kind, data.clone()));
            }
        }

        loop {
            let mut progressed = false;
            for idx in 0..self.entries.len() {
                if resolved[idx].is_some() {
                    continue;
                }
                let (base, delta) = match &self.entries[idx].raw {
                    RawEntry::OfsDelta { base_offset, delta } => {
                        let base = index_by_offset
                            .get(base_offset)
                            .and_then(|&i| resolved[i].clone());
                        (base, delta)
                    }
                    RawEntry::RefDelta { base, delta } => {
                        let base = index_by_oid
                            .get(base)
                            .and_then(|&i| resolved[i].clone())
                            .or_else(|| external.get(base).cloned());
                        (base, delta)
                    }
                    RawEntry::Base { .. } => unreachable!("base entries resolve up front"),
                };
                let Some((kind, base_data)) = base else { continue };
                match apply_delta(&base_data, delta) {
                    Ok(data) => {
                        let data = Bytes::from(data);
                        index_by_oid.insert(oid_for(kind, &data), idx);
                        resolved[idx] = Some((kind, data));
                        progressed = true;
                    }
                    Err(err) => {
                        // Corrupt delta body: drop the entry, keep unpacking.
                        tracing::warn!("skipping undecodable delta at {}: {err}", self.entries[idx].offset);
                    }
                }
            }
            if !progressed {
                break;
            }
        }

        let mut outcome = ResolvedPack::default();
        for slot in resolved {
            match slot {
                Some(obj) => outcome.objects.push(obj),
                None => outcome.skipped += 1,
            }
        }
        outcome
    }
}

/// Object header varint: top bit continuation, next 3 bits type, low 4 bits
/// the size nibble; continuation bytes add 7 bits each. The size is
/// informational only and never trusted for bounds.
fn read_object_header(data: &[u8], pos: &mut usize) -> Result<(u8, u64)> {
    let mut byte = next_byte(data, pos)?;
    let kind = (byte >> 4) & 0x07;
    let mut size = (byte & 0x0f) as u64;
    let mut shift = 4u32;
    while byte & 0x80 != 0 {
        byte = next_byte(data, pos)?;
        if shift > 57 {
            return Err(GitError::malformed("object size varint overflow"));
        }
        size |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
    }
    Ok((kind, size))
}

/// Ofs-delta back distance, accumulated as `((v + 1) << 7) | bits`.
fn read_ofs_distance(data: &[u8], pos: &mut usize) -> Result<u64> {
    let mut byte = next_byte(data, pos)?;
    let mut value = (byte & 0x7f) as u64;
    while byte & 0x80 != 0 {
        byte = next_byte(data, pos)?;
        value = value
            .checked_add(1)
            .and_then(|v| v.checked_shl(7))
            .map(|v| v | (byte & 0x7f) as u64)
            .ok_or_else(|| GitError::malformed("ofs-delta distance overflow"))?;
    }
    Ok(value)
}

fn next_byte(data: &[u8], pos: &mut usize) -> Result<u8> {
    let byte = *data
        .get(*pos)
        .ok_or_else(|| GitError::malformed("truncated pack varint"))?;
    *pos += 1;
    Ok(byte)
}

/// Inflate a zlib stream whose compressed length is unknown, reporting how
/// many input bytes it consumed. This is how the next object's offset is
/// found; when the zlib header is absent the raw-deflate retry covers it.
pub fn inflate_with_recovery(input: &[u8]) -> Result<(Vec<u8>, usize)> {
    match inflate_stream(input, true) {
        Ok(out) => Ok(out),
        Err(_) => inflate_stream(input, false),
    }
}

fn inflate_stream(input: &[u8], zlib_header: bool) -> Result<(Vec<u8>, usize)> {
    let mut inflater = Decompress::new(zlib_header);
    let mut out = Vec::with_capacity(8 * 1024);
    loop {
        let consumed = inflater.total_in() as usize;
        let produced = inflater.total_out() as usize;
        let status = inflater
            .decompress_vec(&input[consumed..], &mut out, FlushDecompress::None)
            .map_err(|e| GitError::malformed(format!("zlib inflate: {e}")))?;
        match status {
            Status::StreamEnd => return Ok((out, inflater.total_in() as usize)),
            Status::Ok | Status::BufError => {
                if out.len() == out.capacity() {
                    out.reserve(out.capacity().max(8 * 1024));
                    continue;
                }
                // No room problem and no forward progress: truncated stream.
                if inflater.total_in() as usize == consumed
                    && inflater.total_out() as usize == produced
                {
                    return Err(GitError::malformed("truncated zlib stream"));
                }
            }
        }
    }
}

/// Apply a git delta: base-size varint, result-size varint, then copy and
/// insert commands. The result length must equal the declared size.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut pos = 0usize;
    let base_size = read_size_varint(delta, &mut pos)?;
    let result_size = read_size_varint(delta, &mut pos)?;
    if base_size != base.len() as u64 {
        return Err(GitError::malformed(format!(
            "delta base size {base_size} does not match base of {} bytes",
            base.len()
        )));
    }
    let mut out = Vec::with_capacity(result_size as usize);
    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;
        if cmd & 0x80 != 0 {
            // Copy from base; low bits select which offset/size bytes follow.
            let mut offset = 0u64;
            for bit in 0..4 {
                if cmd & (1 << bit) != 0 {
                    offset |= (next_byte(delta, &mut pos)? as u64) << (8 * bit);
                }
            }
            let mut size = 0u64;
            for bit in 0..3 {
                if cmd & (1 << (4 + bit)) != 0 {
                    size |= (next_byte(delta, &mut pos)? as u64) << (8 * bit);
                }
            }
            if size == 0 {
                size = 0x10000;
            }
            let start = offset as usize;
            let end = start
                .checked_add(size as usize)
                .filter(|&e| e <= base.len())
                .ok_or_else(|| GitError::malformed("delta copy outside base"))?;
            out.extend_from_slice(&base[start..end]);
        } else if cmd > 0 {
            let n = cmd as usize;
            if pos + n > delta.len() {
                return Err(GitError::malformed("delta insert past end"));
            }
            out.extend_from_slice(&delta[pos..pos + n]);
            pos += n;
        } else {
            return Err(GitError::malformed("delta command 0 is reserved"));
        }
    }
    if out.len() as u64 != result_size {
        return Err(GitError::malformed(format!(
            "delta produced {} bytes, declared {result_size}",
            out.len()
        )));
    }
    Ok(out)
}

fn read_size_varint(data: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = next_byte(data, pos)?;
        if shift > 63 {
            return Err(GitError::malformed("delta size varint overflow"));
        }
        value |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}
