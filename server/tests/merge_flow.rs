//! Merge engine end-to-end: cross-repo PR merges, branch sync conflicts,
//! comparisons, and the TOCTOU guard.

mod common;

use axum::http::StatusCode;
use common::*;
use git_store::object::Oid;

const USERS: &[(&str, &str, &str)] = &[
    ("alice", "alice@example.com", "s3cret"),
    ("bob", "bob@example.com", "hunter2"),
];

#[tokio::test]
async fn cross_repo_merge_copies_objects_and_advances_base() {
    let (state, router) = test_state(USERS);
    let alice = basic_auth("alice", "s3cret");
    let bob = basic_auth("bob", "hunter2");

    create_repo(&router, &alice, "proj").await;
    create_repo(&router, &bob, "proj").await;

    // Shared root lands in alice/proj:main.
    let root = commit_fixture(&[("README", "base\n")], vec![], 1_700_000_000);
    let pack = build_pack(&root.objects);
    push(&router, &alice, "alice", "proj", ZERO, &root.commit_oid.to_hex(), "refs/heads/main", Some(&pack)).await;

    // Bob's fork: same root plus one commit adding lib.rs.
    let extra = commit_fixture(
        &[("README", "base\n"), ("lib.rs", "fn f() {}\n")],
        vec![root.commit_oid],
        1_700_000_100,
    );
    let mut objects = root.objects.clone();
    objects.extend(extra.objects.clone());
    let pack = build_pack(&objects);
    push(&router, &bob, "bob", "proj", ZERO, &extra.commit_oid.to_hex(), "refs/heads/feature", Some(&pack)).await;

    let upstream = git_store::Repository::open(
        state.store.clone(),
        git_store::RepoId::new("alice", "proj"),
    );
    assert!(!upstream.has_object(extra.commit_oid).await.unwrap());

    let (status, merged) = send_json(
        &router,
        "POST",
        "/api/repos/alice/proj/merge",
        Some(&alice),
        serde_json::json!({
            "baseBranch": "main",
            "headOwner": "bob",
            "headRepo": "proj",
            "headBranch": "feature",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(merged["baseOid"], root.commit_oid.to_hex());
    assert_eq!(merged["headOid"], extra.commit_oid.to_hex());

    // Bob's commit was copied, the merge commit adopted the head tree, and
    // main advanced to it.
    assert!(upstream.has_object(extra.commit_oid).await.unwrap());
    let merge_oid = Oid::from_hex(merged["mergeCommit"].as_str().unwrap()).unwrap();
    let merge_commit = upstream.read_commit(merge_oid).await.unwrap();
    assert_eq!(
        merge_commit.parents,
        vec![root.commit_oid, extra.commit_oid]
    );
    assert_eq!(upstream.refs().resolve("main").await.unwrap(), merge_oid);

    let (status, file) = get_json(&router, "/api/repos/alice/proj/file?path=lib.rs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(file["content"], "fn f() {}\n");
}

#[tokio::test]
async fn merge_requires_base_ownership() {
    let (_, router) = test_state(USERS);
    let alice = basic_auth("alice", "s3cret");
    let bob = basic_auth("bob", "hunter2");
    create_repo(&router, &alice, "proj").await;

    let (status, _) = send_json(
        &router,
        "POST",
        "/api/repos/alice/proj/merge",
        Some(&bob),
        serde_json::json!({ "baseBranch": "main", "headBranch": "feature" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn toctou_guard_rejects_moved_head() {
    let (_, router) = test_state(USERS);
    let alice = basic_auth("alice", "s3cret");
    create_repo(&router, &alice, "proj").await;

    let root = commit_fixture(&[("README", "base\n")], vec![], 1_700_000_000);
    let pack = build_pack(&root.objects);
    push(&router, &alice, "alice", "proj", ZERO, &root.commit_oid.to_hex(), "refs/heads/main", Some(&pack)).await;
    let feature = commit_fixture(&[("README", "feature\n")], vec![root.commit_oid], 1_700_000_100);
    let mut objects = root.objects.clone();
    objects.extend(feature.objects.clone());
    let pack = build_pack(&objects);
    push(&router, &alice, "alice", "proj", ZERO, &feature.commit_oid.to_hex(), "refs/heads/feature", Some(&pack)).await;

    // The caller reviewed some other tip; the branch has since moved.
    let stale = commit_fixture(&[("README", "stale\n")], vec![], 1_600_000_000);
    let (status, body) = send_json(
        &router,
        "POST",
        "/api/repos/alice/proj/merge",
        Some(&alice),
        serde_json::json!({
            "baseBranch": "main",
            "headBranch": "feature",
            "expectedHeadOid": stale.commit_oid.to_hex(),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["currentHeadOid"], feature.commit_oid.to_hex());
}

#[tokio::test]
async fn update_branch_conflict_returns_409_with_files() {
    let (state, router) = test_state(USERS);
    let alice = basic_auth("alice", "s3cret");
    create_repo(&router, &alice, "proj").await;

    let root = commit_fixture(&[("README.md", "start\n")], vec![], 1_700_000_000);
    let pack = build_pack(&root.objects);
    push(&router, &alice, "alice", "proj", ZERO, &root.commit_oid.to_hex(), "refs/heads/main", Some(&pack)).await;

    // Head and base both rewrite README.md.
    let head = commit_fixture(&[("README.md", "head edit\n")], vec![root.commit_oid], 1_700_000_100);
    let mut objects = root.objects.clone();
    objects.extend(head.objects.clone());
    let pack = build_pack(&objects);
    push(&router, &alice, "alice", "proj", ZERO, &head.commit_oid.to_hex(), "refs/heads/feature", Some(&pack)).await;

    let base = commit_fixture(&[("README.md", "base edit\n")], vec![root.commit_oid], 1_700_000_200);
    let pack = build_pack(&base.objects);
    push(
        &router,
        &alice,
        "alice",
        "proj",
        &root.commit_oid.to_hex(),
        &base.commit_oid.to_hex(),
        "refs/heads/main",
        Some(&pack),
    )
    .await;

    let (status, body) = send_json(
        &router,
        "PUT",
        "/api/repos/alice/proj/update-branch",
        Some(&alice),
        serde_json::json!({ "baseBranch": "main", "headBranch": "feature" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["conflictingFiles"], serde_json::json!(["README.md"]));

    // Nothing moved.
    let repo = git_store::Repository::open(
        state.store.clone(),
        git_store::RepoId::new("alice", "proj"),
    );
    assert_eq!(repo.refs().resolve("feature").await.unwrap(), head.commit_oid);
    assert_eq!(repo.refs().resolve("main").await.unwrap(), base.commit_oid);
}

#[tokio::test]
async fn update_branch_merges_disjoint_edits() {
    let (state, router) = test_state(USERS);
    let alice = basic_auth("alice", "s3cret");
    create_repo(&router, &alice, "proj").await;

    let root = commit_fixture(&[("a.txt", "a\n"), ("b.txt", "b\n")], vec![], 1_700_000_000);
    let pack = build_pack(&root.objects);
    push(&router, &alice, "alice", "proj", ZERO, &root.commit_oid.to_hex(), "refs/heads/main", Some(&pack)).await;

    let head = commit_fixture(
        &[("a.txt", "a\n"), ("b.txt", "b head\n")],
        vec![root.commit_oid],
        1_700_000_100,
    );
    let mut objects = root.objects.clone();
    objects.extend(head.objects.clone());
    let pack = build_pack(&objects);
    push(&router, &alice, "alice", "proj", ZERO, &head.commit_oid.to_hex(), "refs/heads/feature", Some(&pack)).await;

    let base = commit_fixture(
        &[("a.txt", "a base\n"), ("b.txt", "b\n")],
        vec![root.commit_oid],
        1_700_000_200,
    );
    let pack = build_pack(&base.objects);
    push(
        &router,
        &alice,
        "alice",
        "proj",
        &root.commit_oid.to_hex(),
        &base.commit_oid.to_hex(),
        "refs/heads/main",
        Some(&pack),
    )
    .await;

    let (status, merged) = send_json(
        &router,
        "PUT",
        "/api/repos/alice/proj/update-branch",
        Some(&alice),
        serde_json::json!({ "baseBranch": "main", "headBranch": "feature" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let repo = git_store::Repository::open(
        state.store.clone(),
        git_store::RepoId::new("alice", "proj"),
    );
    let merge_oid = Oid::from_hex(merged["mergeCommit"].as_str().unwrap()).unwrap();
    let commit = repo.read_commit(merge_oid).await.unwrap();
    // Head branch is the advanced ref, so it is the first parent.
    assert_eq!(commit.parents, vec![head.commit_oid, base.commit_oid]);
    let paths = repo.tree_paths(commit.tree).await.unwrap();
    assert_eq!(repo.read_blob(paths["a.txt"].0).await.unwrap().as_ref(), b"a base\n");
    assert_eq!(repo.read_blob(paths["b.txt"].0).await.unwrap().as_ref(), b"b head\n");
}

#[tokio::test]
async fn compare_and_commit_diff_endpoints() {
    let (_, router) = test_state(USERS);
    let alice = basic_auth("alice", "s3cret");
    create_repo(&router, &alice, "proj").await;

    let root = commit_fixture(&[("README.md", "start\n")], vec![], 1_700_000_000);
    let pack = build_pack(&root.objects);
    push(&router, &alice, "alice", "proj", ZERO, &root.commit_oid.to_hex(), "refs/heads/main", Some(&pack)).await;

    let head = commit_fixture(
        &[("README.md", "start\nmore\n")],
        vec![root.commit_oid],
        1_700_000_100,
    );
    let mut objects = root.objects.clone();
    objects.extend(head.objects.clone());
    let pack = build_pack(&objects);
    push(&router, &alice, "alice", "proj", ZERO, &head.commit_oid.to_hex(), "refs/heads/feature", Some(&pack)).await;

    let (status, compared) = get_json(
        &router,
        "/api/repos/alice/proj/compare?base=main&head=feature",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(compared["mergeBase"], root.commit_oid.to_hex());
    assert_eq!(compared["commits"].as_array().map(Vec::len), Some(1));
    assert_eq!(compared["files"][0]["path"], "README.md");
    assert_eq!(compared["files"][0]["kind"], "modified");

    let (status, diff) = get_json(
        &router,
        &format!("/api/repos/alice/proj/commits/{}/diff", head.commit_oid.to_hex()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(diff["additions"], 1);
    assert_eq!(diff["deletions"], 0);
    assert_eq!(diff["files"][0]["path"], "README.md");
}
