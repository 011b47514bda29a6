//! Shared fixtures for router-level integration tests.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use tower::ServiceExt;

use git_store::object::{Commit, ObjectType, Oid, Signature, Tree, TreeEntry, compress_zlib, oid_for};
use server::api::{AppState, build_router};
use server::config::{Config, UserEntry};

pub const ZERO: &str = "0000000000000000000000000000000000000000";

pub fn test_state(users: &[(&str, &str, &str)]) -> (AppState, Router) {
    let mut config = Config::default();
    for (username, email, password) in users {
        config.users.push(UserEntry {
            username: (*username).to_string(),
            email: (*email).to_string(),
            password: (*password).to_string(),
        });
    }
    let state = server::build_state(&config).expect("state");
    let router = build_router(state.clone());
    (state, router)
}

pub fn basic_auth(login: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{login}:{password}")))
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Bytes) {
    let response = router.clone().oneshot(request).await.expect("request");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    (status, body)
}

pub async fn send_json(
    router: &Router,
    method: &str,
    uri: &str,
    auth: Option<&str>,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        request = request.header(header::AUTHORIZATION, auth);
    }
    let request = request.body(Body::from(body.to_string())).expect("request");
    let (status, bytes) = send(router, request).await;
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}

pub async fn get_json(router: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).expect("request");
    let (status, bytes) = send(router, request).await;
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

pub async fn create_repo(router: &Router, auth: &str, name: &str) {
    let (status, _) = send_json(
        router,
        "POST",
        "/api/repos",
        Some(auth),
        serde_json::json!({ "name": name }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

fn encode_obj_header(kind_code: u8, size: u64) -> Vec<u8> {
    let mut n = size;
    let mut first = (n & 0x0f) as u8 | (kind_code << 4);
    n >>= 4;
    let mut out = vec![];
    if n != 0 {
        first |= 0x80;
    }
    out.push(first);
    while n != 0 {
        let mut byte = (n & 0x7f) as u8;
        n >>= 7;
        if n != 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
    out
}

pub fn build_pack(objects: &[(ObjectType, Vec<u8>)]) -> Vec<u8> {
    let mut pack = Vec::new();
    pack.extend_from_slice(b"PACK");
    pack.extend_from_slice(&2u32.to_be_bytes());
    pack.extend_from_slice(&(objects.len() as u32).to_be_bytes());
    for (kind, payload) in objects {
        pack.extend_from_slice(&encode_obj_header(kind.pack_code(), payload.len() as u64));
        pack.extend_from_slice(&compress_zlib(payload).expect("zlib"));
    }
    pack
}

pub fn pkt_line(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{:04x}", data.len() + 4).into_bytes();
    out.extend_from_slice(data);
    out
}

pub fn push_body(old: &str, new: &str, reference: &str, pack: Option<&[u8]>) -> Vec<u8> {
    let mut body = pkt_line(format!("{old} {new} {reference}\0report-status\n").as_bytes());
    body.extend_from_slice(b"0000");
    if let Some(pack) = pack {
        body.extend_from_slice(pack);
    }
    body
}

/// Objects for one commit touching the given files (no parents unless set).
pub struct CommitFixture {
    pub objects: Vec<(ObjectType, Vec<u8>)>,
    pub commit_oid: Oid,
}

pub fn commit_fixture(files: &[(&str, &str)], parents: Vec<Oid>, timestamp: i64) -> CommitFixture {
    let mut objects = Vec::new();
    let mut entries = Vec::new();
    for (name, content) in files {
        let payload = content.as_bytes().to_vec();
        let oid = oid_for(ObjectType::Blob, &payload);
        objects.push((ObjectType::Blob, payload));
        entries.push(TreeEntry { mode: "100644".to_string(), name: (*name).to_string(), oid });
    }
    let tree = Tree { entries };
    let tree_payload = tree.encode();
    let tree_oid = oid_for(ObjectType::Tree, &tree_payload);
    objects.push((ObjectType::Tree, tree_payload));

    let sig = Signature::new("Alice Example", "alice@example.com", timestamp);
    let commit = Commit {
        tree: tree_oid,
        parents,
        author: sig.clone(),
        committer: sig,
        message: format!("commit at {timestamp}\n"),
    };
    let commit_payload = commit.encode();
    let commit_oid = oid_for(ObjectType::Commit, &commit_payload);
    objects.push((ObjectType::Commit, commit_payload));

    CommitFixture { objects, commit_oid }
}

pub async fn push(
    router: &Router,
    auth: &str,
    owner: &str,
    repo: &str,
    old: &str,
    new: &str,
    reference: &str,
    pack: Option<&[u8]>,
) -> String {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/{owner}/{repo}/git-receive-pack"))
        .header(header::AUTHORIZATION, auth)
        .header(header::CONTENT_TYPE, "application/x-git-receive-pack-request")
        .body(Body::from(push_body(old, new, reference, pack)))
        .expect("request");
    let (status, body) = send(router, request).await;
    assert_eq!(status, StatusCode::OK);
    String::from_utf8_lossy(&body).into_owned()
}
