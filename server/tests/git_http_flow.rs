//! Smart HTTP end-to-end: advertisement, pushes, and protection gates.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::*;
use git_store::object::{Commit, ObjectType, Signature, oid_for};

const ALICE: &[(&str, &str, &str)] = &[("alice", "alice@example.com", "s3cret")];

#[tokio::test]
async fn info_refs_on_empty_repo_advertises_capabilities() {
    let (_, router) = test_state(ALICE);
    let auth = basic_auth("alice", "s3cret");
    create_repo(&router, &auth, "empty").await;

    let request = Request::builder()
        .uri("/alice/empty/info/refs?service=git-upload-pack")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8_lossy(&body);
    assert!(text.starts_with("001e# service=git-upload-pack\n0000"));
    assert!(text.contains(&format!("{ZERO} capabilities^{{}}\0")));
    assert!(text.contains("side-band-64k"));
    assert!(text.contains("symref=HEAD:refs/heads/main"));
    assert!(text.ends_with("0000"));
}

#[tokio::test]
async fn info_refs_rejects_unknown_service_and_repo() {
    let (_, router) = test_state(ALICE);
    let auth = basic_auth("alice", "s3cret");
    create_repo(&router, &auth, "repo").await;

    let request = Request::builder()
        .uri("/alice/repo/info/refs?service=git-annex")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .uri("/alice/ghost/info/refs?service=git-upload-pack")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn push_requires_ownership_and_credentials() {
    let (_, router) = test_state(&[
        ("alice", "alice@example.com", "s3cret"),
        ("bob", "bob@example.com", "hunter2"),
    ]);
    let alice = basic_auth("alice", "s3cret");
    create_repo(&router, &alice, "repo").await;

    // Anonymous push: 401 with a Basic challenge.
    let fixture = commit_fixture(&[("README", "hello\n")], vec![], 1_700_000_000);
    let pack = build_pack(&fixture.objects);
    let body = push_body(ZERO, &fixture.commit_oid.to_hex(), "refs/heads/main", Some(&pack));
    let request = Request::builder()
        .method("POST")
        .uri("/alice/repo/git-receive-pack")
        .body(Body::from(body.clone()))
        .unwrap();
    let response = router.clone();
    let response = tower::ServiceExt::oneshot(response, request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let challenge = response
        .headers()
        .get(header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(challenge.contains("Basic realm=\"skiff\""));

    // Authenticated non-owner: 403.
    let bob = basic_auth("bob", "hunter2");
    let request = Request::builder()
        .method("POST")
        .uri("/alice/repo/git-receive-pack")
        .header(header::AUTHORIZATION, &bob)
        .body(Body::from(body))
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn push_single_commit_then_browse() {
    let (_, router) = test_state(ALICE);
    let auth = basic_auth("alice", "s3cret");
    create_repo(&router, &auth, "repo").await;

    // A fresh repository serves an empty commit listing...
    let (status, commits) = get_json(&router, "/api/repos/alice/repo/commits").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(commits.as_array().map(Vec::len), Some(0));

    let fixture = commit_fixture(&[("README", "hello\n")], vec![], 1_700_000_000);
    let pack = build_pack(&fixture.objects);
    let response = push(
        &router,
        &auth,
        "alice",
        "repo",
        ZERO,
        &fixture.commit_oid.to_hex(),
        "refs/heads/main",
        Some(&pack),
    )
    .await;
    assert_eq!(response, "000eunpack ok\n0017ok refs/heads/main\n0000");

    // ...and the push is immediately visible: emptiness was not cached.
    let (_, commits) = get_json(&router, "/api/repos/alice/repo/commits").await;
    let listed = commits.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["oid"], fixture.commit_oid.to_hex());

    let (_, branches) = get_json(&router, "/api/repos/alice/repo/branches").await;
    assert_eq!(branches[0]["name"], "main");

    let (status, file) =
        get_json(&router, "/api/repos/alice/repo/file?path=README").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(file["content"], "hello\n");
    assert_eq!(file["binary"], false);

    let (_, count) = get_json(&router, "/api/repos/alice/repo/commit-count").await;
    assert_eq!(count["count"], 1);
}

#[tokio::test]
async fn push_with_git_suffix_addresses_same_repo() {
    let (_, router) = test_state(ALICE);
    let auth = basic_auth("alice", "s3cret");
    create_repo(&router, &auth, "repo").await;

    let fixture = commit_fixture(&[("README", "hello\n")], vec![], 1_700_000_000);
    let pack = build_pack(&fixture.objects);
    let response = push(
        &router,
        &auth,
        "alice",
        "repo.git",
        ZERO,
        &fixture.commit_oid.to_hex(),
        "refs/heads/main",
        Some(&pack),
    )
    .await;
    assert!(response.contains("ok refs/heads/main"));

    let (_, branches) = get_json(&router, "/api/repos/alice/repo/branches").await;
    assert_eq!(branches[0]["oid"], fixture.commit_oid.to_hex());
}

#[tokio::test]
async fn upload_pack_answers_nak() {
    let (_, router) = test_state(ALICE);
    let auth = basic_auth("alice", "s3cret");
    create_repo(&router, &auth, "repo").await;

    let request = Request::builder()
        .method("POST")
        .uri("/alice/repo/git-upload-pack")
        .body(Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(router.clone(), request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/x-git-upload-pack-result"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.as_ref(), b"0008NAK\n");
}

#[tokio::test]
async fn force_push_protection_rejects_non_fast_forward() {
    let (_, router) = test_state(ALICE);
    let auth = basic_auth("alice", "s3cret");
    create_repo(&router, &auth, "repo").await;

    let first = commit_fixture(&[("README", "v1\n")], vec![], 1_700_000_000);
    let pack = build_pack(&first.objects);
    push(&router, &auth, "alice", "repo", ZERO, &first.commit_oid.to_hex(), "refs/heads/main", Some(&pack)).await;

    let (status, _) = send_json(
        &router,
        "PUT",
        "/api/repos/alice/repo/protection/main",
        Some(&auth),
        serde_json::json!({ "prevent_force_push": true }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // A replacement root commit: not a descendant of the current tip.
    let rewrite = commit_fixture(&[("README", "rewritten\n")], vec![], 1_700_000_100);
    let pack = build_pack(&rewrite.objects);
    let response = push(
        &router,
        &auth,
        "alice",
        "repo",
        &first.commit_oid.to_hex(),
        &rewrite.commit_oid.to_hex(),
        "refs/heads/main",
        Some(&pack),
    )
    .await;
    assert!(response.contains("unpack ok"));
    assert!(response.contains("ng refs/heads/main protected branch - force push not allowed"));

    let (_, branches) = get_json(&router, "/api/repos/alice/repo/branches").await;
    assert_eq!(branches[0]["oid"], first.commit_oid.to_hex());

    // A descendant of the tip passes the same gate.
    let sig = Signature::new("Alice Example", "alice@example.com", 1_700_000_200);
    let tree = first.objects.iter().find(|(k, _)| *k == ObjectType::Tree).unwrap();
    let child = Commit {
        tree: oid_for(ObjectType::Tree, &tree.1),
        parents: vec![first.commit_oid],
        author: sig.clone(),
        committer: sig,
        message: "second\n".into(),
    };
    let child_payload = child.encode();
    let child_oid = oid_for(ObjectType::Commit, &child_payload);
    let pack = build_pack(&[(ObjectType::Commit, child_payload)]);
    let response = push(
        &router,
        &auth,
        "alice",
        "repo",
        &first.commit_oid.to_hex(),
        &child_oid.to_hex(),
        "refs/heads/main",
        Some(&pack),
    )
    .await;
    assert!(response.contains("ok refs/heads/main"));
}

#[tokio::test]
async fn deletion_protection_blocks_and_skips_unpack() {
    let (state, router) = test_state(ALICE);
    let auth = basic_auth("alice", "s3cret");
    create_repo(&router, &auth, "repo").await;

    let first = commit_fixture(&[("README", "v1\n")], vec![], 1_700_000_000);
    let pack = build_pack(&first.objects);
    push(&router, &auth, "alice", "repo", ZERO, &first.commit_oid.to_hex(), "refs/heads/main", Some(&pack)).await;

    send_json(
        &router,
        "PUT",
        "/api/repos/alice/repo/protection/main",
        Some(&auth),
        serde_json::json!({ "prevent_deletion": true }),
    )
    .await;

    let smuggled = commit_fixture(&[("README", "smuggled\n")], vec![], 1_700_000_300);
    let pack = build_pack(&smuggled.objects);
    let response = push(
        &router,
        &auth,
        "alice",
        "repo",
        &first.commit_oid.to_hex(),
        ZERO,
        "refs/heads/main",
        Some(&pack),
    )
    .await;
    assert!(response.contains("ng refs/heads/main protected branch - deletion not allowed"));

    // No unpack happened: the smuggled objects are not in the store.
    let repo = git_store::Repository::open(state.store.clone(), git_store::RepoId::new("alice", "repo"));
    assert!(!repo.has_object(smuggled.commit_oid).await.unwrap());
    assert_eq!(repo.refs().resolve("main").await.unwrap(), first.commit_oid);
}

#[tokio::test]
async fn invalid_branch_names_are_rejected() {
    let (_, router) = test_state(ALICE);
    let auth = basic_auth("alice", "s3cret");

    // Repo creation refuses a default branch that could escape the ref
    // namespace.
    let (status, body) = send_json(
        &router,
        "POST",
        "/api/repos",
        Some(&auth),
        serde_json::json!({ "name": "repo", "defaultBranch": "a/../b" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap_or_default().contains("branch"));

    create_repo(&router, &auth, "repo").await;

    let (status, _) = send_json(
        &router,
        "PUT",
        "/api/repos/alice/repo/protection/has%20space",
        Some(&auth),
        serde_json::json!({ "prevent_deletion": true }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(
        &router,
        "POST",
        "/api/repos/alice/repo/merge",
        Some(&auth),
        serde_json::json!({ "baseBranch": "main", "headBranch": "../feature" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn private_repo_gates_reads() {
    let (_, router) = test_state(ALICE);
    let auth = basic_auth("alice", "s3cret");
    let (status, _) = send_json(
        &router,
        "POST",
        "/api/repos",
        Some(&auth),
        serde_json::json!({ "name": "secret", "private": true }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let request = Request::builder()
        .uri("/alice/secret/info/refs?service=git-upload-pack")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/alice/secret/info/refs?service=git-upload-pack")
        .header(header::AUTHORIZATION, &auth)
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
}
