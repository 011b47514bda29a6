//! Loose-object codec: OIDs, zlib framing, commit/tree/tag records.
//!
//! An object of type `T` with payload `P` hashes as
//! `SHA1("T <len>\0" || P)` and is stored zlib-compressed under
//! `objects/<oid[0:2]>/<oid[2:]>`. Both the pack codec and receive-pack
//! funnel through the encoders here so the hash is computed over identical
//! bytes regardless of how an object arrived.

use std::fmt;
use std::io::{Read, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::errors::{GitError, Result};

/// 40-hex SHA-1 object identifier, held as raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid([u8; 20]);

impl Oid {
    pub const ZERO: Oid = Oid([0; 20]);

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let raw = hex::decode(hex_str.trim())
            .map_err(|_| GitError::malformed(format!("bad oid {hex_str:?}")))?;
        Self::from_raw(&raw)
    }

    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        let raw: [u8; 20] = raw
            .try_into()
            .map_err(|_| GitError::malformed("oid must be 20 bytes"))?;
        Ok(Oid(raw))
    }

    pub fn as_raw(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    /// Blob-store key of the loose object, relative to the repo prefix.
    pub fn loose_key(self) -> String {
        let hex_str = self.to_hex();
        format!("objects/{}/{}", &hex_str[..2], &hex_str[2..])
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.to_hex())
    }
}

impl Serialize for Oid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Oid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Oid::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Commit => "commit",
            ObjectType::Tree => "tree",
            ObjectType::Blob => "blob",
            ObjectType::Tag => "tag",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "commit" => Ok(ObjectType::Commit),
            "tree" => Ok(ObjectType::Tree),
            "blob" => Ok(ObjectType::Blob),
            "tag" => Ok(ObjectType::Tag),
            other => Err(GitError::malformed(format!("unknown object type {other:?}"))),
        }
    }

    /// Packfile type code (OBJ_COMMIT=1 .. OBJ_TAG=4).
    pub fn pack_code(self) -> u8 {
        match self {
            ObjectType::Commit => 1,
            ObjectType::Tree => 2,
            ObjectType::Blob => 3,
            ObjectType::Tag => 4,
        }
    }

    pub fn from_pack_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(ObjectType::Commit),
            2 => Ok(ObjectType::Tree),
            3 => Ok(ObjectType::Blob),
            4 => Ok(ObjectType::Tag),
            other => Err(GitError::malformed(format!("unknown pack object type {other}"))),
        }
    }
}

/// SHA-1 over the canonical header + payload.
pub fn oid_for(kind: ObjectType, payload: &[u8]) -> Oid {
    let mut hasher = Sha1::new();
    hasher.update(format!("{} {}\0", kind.as_str(), payload.len()).as_bytes());
    hasher.update(payload);
    Oid(hasher.finalize().into())
}

pub fn compress_zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(GitError::transport)?;
    encoder.finish().map_err(GitError::transport)
}

/// Loose-object bytes as stored: zlib("<type> <size>\0" || payload).
pub fn encode_loose(kind: ObjectType, payload: &[u8]) -> Result<Vec<u8>> {
    let mut raw = Vec::with_capacity(payload.len() + 16);
    raw.extend_from_slice(format!("{} {}\0", kind.as_str(), payload.len()).as_bytes());
    raw.extend_from_slice(payload);
    compress_zlib(&raw)
}

/// Inverse of [`encode_loose`]: inflate, split at the first NUL, parse the
/// `"<type> <size>"` header.
pub fn decode_loose(data: &[u8]) -> Result<(ObjectType, Bytes)> {
    let mut decoder = ZlibDecoder::new(data);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| GitError::malformed(format!("loose object inflate: {e}")))?;
    let nul = raw
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| GitError::malformed("loose object missing header NUL"))?;
    let header = std::str::from_utf8(&raw[..nul])
        .map_err(|_| GitError::malformed("loose object header is not UTF-8"))?;
    let (kind, size) = header
        .split_once(' ')
        .ok_or_else(|| GitError::malformed("loose object header missing size"))?;
    let kind = ObjectType::parse(kind)?;
    let size: usize = size
        .parse()
        .map_err(|_| GitError::malformed("loose object size is not a number"))?;
    let payload = raw.split_off(nul + 1);
    if payload.len() != size {
        return Err(GitError::malformed(format!(
            "loose object size mismatch: declared {size}, actual {}",
            payload.len()
        )));
    }
    Ok((kind, Bytes::from(payload)))
}

/// Author/committer identity with the raw timezone preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub timestamp: i64,
    pub tz_offset_minutes: i32,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            timestamp,
            tz_offset_minutes: 0,
        }
    }

    /// `Name <email> <unix-seconds> <±HHMM>`
    fn render(&self) -> String {
        let sign = if self.tz_offset_minutes < 0 { '-' } else { '+' };
        let abs = self.tz_offset_minutes.unsigned_abs();
        format!(
            "{} <{}> {} {}{:02}{:02}",
            self.name,
            self.email,
            self.timestamp,
            sign,
            abs / 60,
            abs % 60
        )
    }

    fn parse(raw: &str) -> Result<Self> {
        let open = raw
            .find('<')
            .ok_or_else(|| GitError::malformed("signature missing <email>"))?;
        let close = raw[open..]
            .find('>')
            .map(|i| open + i)
            .ok_or_else(|| GitError::malformed("signature missing <email>"))?;
        let name = raw[..open].trim_end().to_string();
        let email = raw[open + 1..close].to_string();
        let mut rest = raw[close + 1..].split_ascii_whitespace();
        let timestamp: i64 = rest
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| GitError::malformed("signature missing timestamp"))?;
        let tz = rest.next().unwrap_or("+0000");
        let tz_offset_minutes = parse_tz(tz)?;
        Ok(Self { name, email, timestamp, tz_offset_minutes })
    }
}

fn parse_tz(tz: &str) -> Result<i32> {
    let (sign, digits) = match tz.as_bytes().first() {
        Some(b'-') => (-1, &tz[1..]),
        Some(b'+') => (1, &tz[1..]),
        _ => (1, tz),
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(GitError::malformed(format!("bad timezone {tz:?}")));
    }
    let hours: i32 = digits[..2].parse().unwrap_or(0);
    let minutes: i32 = digits[2..].parse().unwrap_or(0);
    Ok(sign * (hours * 60 + minutes))
}

/// Parsed commit record. Parents are ordered; the first is the mainline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub tree: Oid,
    pub parents: Vec<Oid>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

impl Commit {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(payload);
        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;
        let mut message = String::new();
        let mut lines = text.split('\n');
        for line in lines.by_ref() {
            if line.is_empty() {
                // Header/message separator; the rest is the message verbatim.
                message = lines.collect::<Vec<_>>().join("\n");
                break;
            }
            if let Some(rest) = line.strip_prefix("tree ") {
                tree = Some(Oid::from_hex(rest)?);
            } else if let Some(rest) = line.strip_prefix("parent ") {
                parents.push(Oid::from_hex(rest)?);
            } else if let Some(rest) = line.strip_prefix("author ") {
                author = Some(Signature::parse(rest)?);
            } else if let Some(rest) = line.strip_prefix("committer ") {
                committer = Some(Signature::parse(rest)?);
            }
            // gpgsig, encoding etc. are carried only in the raw bytes.
        }
        Ok(Commit {
            tree: tree.ok_or_else(|| GitError::malformed("commit missing tree"))?,
            parents,
            author: author.ok_or_else(|| GitError::malformed("commit missing author"))?,
            committer: committer.ok_or_else(|| GitError::malformed("commit missing committer"))?,
            message,
        })
    }

    /// Canonical encoding: no trailing spaces, exact timestamp format, a
    /// second encode of a parsed commit is byte-identical.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.message.len());
        out.extend_from_slice(b"tree ");
        out.extend_from_slice(self.tree.to_hex().as_bytes());
        out.push(b'\n');
        for parent in &self.parents {
            out.extend_from_slice(b"parent ");
            out.extend_from_slice(parent.to_hex().as_bytes());
            out.push(b'\n');
        }
        out.extend_from_slice(b"author ");
        out.extend_from_slice(self.author.render().as_bytes());
        out.push(b'\n');
        out.extend_from_slice(b"committer ");
        out.extend_from_slice(self.committer.render().as_bytes());
        out.push(b'\n');
        out.push(b'\n');
        out.extend_from_slice(self.message.as_bytes());
        out
    }

    pub fn oid(&self) -> Oid {
        oid_for(ObjectType::Commit, &self.encode())
    }

    pub fn first_parent(&self) -> Option<Oid> {
        self.parents.first().copied()
    }

    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Blob,
    Tree,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// ASCII octal, as stored: `100644`, `100755`, `120000`, `40000`.
    pub mode: String,
    pub name: String,
    pub oid: Oid,
}

impl TreeEntry {
    pub fn kind(&self) -> EntryKind {
        if self.mode == "40000" || self.mode == "040000" {
            EntryKind::Tree
        } else {
            EntryKind::Blob
        }
    }

    pub fn is_tree(&self) -> bool {
        self.kind() == EntryKind::Tree
    }

    /// Git orders tree entries by name bytes with directories compared as
    /// `name/`.
    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.clone().into_bytes();
        if self.is_tree() {
            key.push(b'/');
        }
        key
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub const EMPTY_OID: &'static str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

    /// Records of `mode SP name NUL oid(20 raw bytes)`.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < payload.len() {
            let sp = payload[pos..]
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| GitError::malformed("tree entry missing space"))?;
            let mode = std::str::from_utf8(&payload[pos..pos + sp])
                .map_err(|_| GitError::malformed("tree mode is not ASCII"))?
                .to_string();
            pos += sp + 1;
            let nul = payload[pos..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| GitError::malformed("tree entry missing NUL"))?;
            let name = String::from_utf8_lossy(&payload[pos..pos + nul]).into_owned();
            pos += nul + 1;
            if pos + 20 > payload.len() {
                return Err(GitError::malformed("tree entry truncated oid"));
            }
            let oid = Oid::from_raw(&payload[pos..pos + 20])?;
            pos += 20;
            entries.push(TreeEntry { mode, name, oid });
        }
        Ok(Tree { entries })
    }

    /// Canonical encoding; entries are re-sorted into Git byte order and
    /// tree modes rendered as `40000`.
    pub fn encode(&self) -> Vec<u8> {
        let mut entries = self.entries.clone();
        entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        let mut out = Vec::with_capacity(entries.len() * 40);
        for entry in entries {
            let mode = if entry.is_tree() { "40000" } else { entry.mode.as_str() };
            out.extend_from_slice(mode.as_bytes());
            out.push(b' ');
            out.extend_from_slice(entry.name.as_bytes());
            out.push(0);
            out.extend_from_slice(entry.oid.as_raw());
        }
        out
    }

    pub fn oid(&self) -> Oid {
        oid_for(ObjectType::Tree, &self.encode())
    }

    pub fn entry(&self, name: &str) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}
