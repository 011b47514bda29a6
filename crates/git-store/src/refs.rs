//! Ref storage, resolution, and the `info/refs` advertisement.

use crate::errors::{GitError, Result};
use crate::fs::RepoFs;
use crate::object::Oid;
use crate::pkt::{PKT_FLUSH, encode_pkt_line};

use bytes::Bytes;

/// Symref chains longer than this are treated as corrupt.
const MAX_SYMREF_DEPTH: usize = 5;

pub const ZERO_OID_HEX: &str = "0000000000000000000000000000000000000000";

/// `refs/...` and `HEAD` pass through; anything else is a branch shorthand.
pub fn normalize(name: &str) -> String {
    if name == "HEAD" || name.starts_with("refs/") {
        name.to_string()
    } else {
        format!("refs/heads/{name}")
    }
}

#[derive(Clone)]
pub struct Refs {
    fs: RepoFs,
}

impl Refs {
    pub fn new(fs: RepoFs) -> Self {
        Self { fs }
    }

    /// Resolve a ref to an OID, following `ref: ` indirections.
    pub async fn resolve(&self, name: &str) -> Result<Oid> {
        let mut current = normalize(name);
        for _ in 0..MAX_SYMREF_DEPTH {
            let raw = self.fs.read_file(&current).await?;
            let text = String::from_utf8_lossy(&raw);
            let text = text.trim();
            if let Some(target) = text.strip_prefix("ref: ") {
                current = normalize(target.trim());
                continue;
            }
            if text.len() < 40 {
                return Err(GitError::malformed(format!("ref {current} holds {text:?}")));
            }
            return Oid::from_hex(&text[..40]);
        }
        Err(GitError::malformed(format!("symref chain too deep at {name}")))
    }

    /// A ref exists when it resolves and its object is present.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        match self.resolve(name).await {
            Ok(oid) => self.fs.exists(&oid.loose_key()).await,
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Leaf names under `refs/heads/`, slashes preserved (`feature/x`).
    pub async fn list_branches(&self) -> Result<Vec<String>> {
        self.list_under("refs/heads/").await
    }

    pub async fn list_tags(&self) -> Result<Vec<String>> {
        self.list_under("refs/tags/").await
    }

    async fn list_under(&self, prefix: &str) -> Result<Vec<String>> {
        let mut dir = self.fs.key_for(prefix);
        dir.push('/');
        let keys = self.fs.store().list(&dir).await?;
        Ok(keys.into_iter().map(|k| k[dir.len()..].to_string()).collect())
    }

    /// Every `refs/...` ref with its OID, in key order, then resolved.
    pub async fn all(&self) -> Result<Vec<(String, Oid)>> {
        let root = format!("{}/refs/", self.fs.prefix());
        let mut out = Vec::new();
        for key in self.fs.store().list(&root).await? {
            let name = format!("refs/{}", &key[root.len()..]);
            match self.resolve(&name).await {
                Ok(oid) => out.push((name, oid)),
                Err(err) => tracing::warn!("unreadable ref {name}: {err}"),
            }
        }
        Ok(out)
    }

    pub async fn write(&self, name: &str, oid: Oid) -> Result<()> {
        self.fs
            .write_file(&normalize(name), Bytes::from(format!("{oid}\n")))
            .await
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.fs.unlink(&normalize(name)).await
    }

    /// Target of a symbolic HEAD, e.g. `refs/heads/main`.
    pub async fn head_target(&self) -> Result<Option<String>> {
        match self.fs.read_file("HEAD").await {
            Ok(raw) => {
                let text = String::from_utf8_lossy(&raw);
                Ok(text.trim().strip_prefix("ref: ").map(|t| t.trim().to_string()))
            }
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    UploadPack,
    ReceivePack,
}

impl Service {
    pub fn as_str(self) -> &'static str {
        match self {
            Service::UploadPack => "git-upload-pack",
            Service::ReceivePack => "git-receive-pack",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "git-upload-pack" => Some(Service::UploadPack),
            "git-receive-pack" => Some(Service::ReceivePack),
            _ => None,
        }
    }
}

fn capabilities(service: Service, head_target: Option<&str>, agent: &str) -> String {
    match service {
        Service::UploadPack => {
            let symref = head_target.unwrap_or("refs/heads/main");
            format!(
                "multi_ack thin-pack side-band side-band-64k ofs-delta shallow \
                 deepen-since deepen-not deepen-relative no-progress include-tag \
                 multi_ack_detailed symref=HEAD:{symref} agent={agent}"
            )
        }
        Service::ReceivePack => format!(
            "report-status report-status-v2 delete-refs quiet atomic ofs-delta \
             push-options object-format=sha1 agent={agent}"
        ),
    }
}

/// Build the full `info/refs` advertisement body for a service.
///
/// Framing: pkt-line `# service=<svc>\n`, flush, refs (capabilities after a
/// NUL on the first line, or a synthetic `capabilities^{}` line when the
/// repository has none), flush.
pub async fn advertisement(refs: &Refs, service: Service, agent: &str) -> Result<Vec<u8>> {
    let head_target = refs.head_target().await?;
    let caps = capabilities(service, head_target.as_deref(), agent);

    let mut lines: Vec<(String, Oid)> = Vec::new();
    if service == Service::UploadPack
        && let Ok(head) = refs.resolve("HEAD").await
    {
        lines.push(("HEAD".to_string(), head));
    }
    lines.extend(refs.all().await?);

    let mut body = Vec::with_capacity(512);
    body.extend_from_slice(&encode_pkt_line(
        format!("# service={}\n", service.as_str()).as_bytes(),
    ));
    body.extend_from_slice(PKT_FLUSH);
    if lines.is_empty() {
        body.extend_from_slice(&encode_pkt_line(
            format!("{ZERO_OID_HEX} capabilities^{{}}\0{caps}\n").as_bytes(),
        ));
    } else {
        for (idx, (name, oid)) in lines.iter().enumerate() {
            let line = if idx == 0 {
                format!("{oid} {name}\0{caps}\n")
            } else {
                format!("{oid} {name}\n")
            };
            body.extend_from_slice(&encode_pkt_line(line.as_bytes()));
        }
    }
    body.extend_from_slice(PKT_FLUSH);
    Ok(body)
}
