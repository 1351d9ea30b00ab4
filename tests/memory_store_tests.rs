//! Store-protocol tests for the in-memory backend.
//!
//! These pin down the semantics the registry relies on: lazy TTL expiry,
//! set auto-removal, and commit-or-conflict transactions.

use r_token_registry::memory::RMemoryStore;
use r_token_registry::store::{StagedOp, StoreTransaction, TokenStore};
use std::time::Duration;

#[tokio::test]
async fn get_and_ttl_of_missing_key() {
    let store = RMemoryStore::new();

    assert!(store.get("missing").await.expect("get failed").is_none());
    assert!(store.ttl("missing").await.expect("ttl failed").is_none());
    assert!(!store.exists("missing").await.expect("exists failed"));
}

#[tokio::test]
async fn set_then_get_with_ttl() {
    let store = RMemoryStore::new();

    store.set("k", "v", 60).await.expect("set failed");

    assert_eq!(
        store.get("k").await.expect("get failed").as_deref(),
        Some("v")
    );
    let ttl = store.ttl("k").await.expect("ttl failed");
    assert!(matches!(ttl, Some(t) if t > 0 && t <= 60));
}

#[tokio::test]
async fn value_expires_lazily() {
    let store = RMemoryStore::new();

    store.set("k", "v", 1).await.expect("set failed");
    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert!(store.get("k").await.expect("get failed").is_none());
    assert!(store.ttl("k").await.expect("ttl failed").is_none());
}

#[tokio::test]
async fn new_set_has_no_expiry_until_asked() {
    let store = RMemoryStore::new();

    assert!(store.add_member("s", "a").await.expect("sadd failed"));

    // A fresh set persists; -1 mirrors a key without a TTL.
    assert_eq!(store.ttl("s").await.expect("ttl failed"), Some(-1));

    assert!(store.expire("s", 60).await.expect("expire failed"));
    let ttl = store.ttl("s").await.expect("ttl failed");
    assert!(matches!(ttl, Some(t) if t > 0 && t <= 60));
}

#[tokio::test]
async fn add_member_reports_novelty() {
    let store = RMemoryStore::new();

    assert!(store.add_member("s", "a").await.expect("sadd failed"));
    assert!(!store.add_member("s", "a").await.expect("sadd failed"));
    assert!(store.add_member("s", "b").await.expect("sadd failed"));

    let mut members = store.members("s").await.expect("members failed");
    members.sort();
    assert_eq!(members, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn removing_last_member_deletes_the_set() {
    let store = RMemoryStore::new();

    store.add_member("s", "a").await.expect("sadd failed");
    store.add_member("s", "b").await.expect("sadd failed");

    let removed = store
        .remove_members("s", &["a".to_string(), "b".to_string()])
        .await
        .expect("srem failed");
    assert_eq!(removed, 2);

    // The emptied set is gone entirely, not an empty shell.
    assert!(!store.exists("s").await.expect("exists failed"));
    assert!(store.ttl("s").await.expect("ttl failed").is_none());
}

#[tokio::test]
async fn expire_on_missing_key_is_false() {
    let store = RMemoryStore::new();

    assert!(!store.expire("missing", 60).await.expect("expire failed"));
}

#[tokio::test]
async fn delete_counts_only_existing_keys() {
    let store = RMemoryStore::new();

    store.set("a", "1", 60).await.expect("set failed");
    store.set("b", "2", 60).await.expect("set failed");

    let removed = store
        .delete(&["a".to_string(), "b".to_string(), "c".to_string()])
        .await
        .expect("del failed");

    assert_eq!(removed, 2);
    assert!(store.get("a").await.expect("get failed").is_none());
}

#[tokio::test]
async fn transaction_commits_when_unchallenged() {
    let store = RMemoryStore::new();

    let mut tx = store.begin().await.expect("begin failed");
    tx.watch(&["k".to_string()]).await.expect("watch failed");
    tx.stage(StagedOp::SetValue {
        key: "k".to_string(),
        value: "v".to_string(),
        expire_seconds: 60,
    });
    assert!(tx.exec().await.expect("exec failed"));

    assert_eq!(
        store.get("k").await.expect("get failed").as_deref(),
        Some("v")
    );
}

#[tokio::test]
async fn transaction_conflicts_when_watched_key_changes() {
    let store = RMemoryStore::new();
    store.set("k", "old", 60).await.expect("set failed");

    let mut tx = store.begin().await.expect("begin failed");
    tx.watch(&["k".to_string()]).await.expect("watch failed");

    // Another writer slips in between watch and exec.
    store.set("k", "intruder", 60).await.expect("set failed");

    tx.stage(StagedOp::SetValue {
        key: "k".to_string(),
        value: "mine".to_string(),
        expire_seconds: 60,
    });
    assert!(!tx.exec().await.expect("exec failed"));

    // Nothing from the losing transaction was applied.
    assert_eq!(
        store.get("k").await.expect("get failed").as_deref(),
        Some("intruder")
    );
}

#[tokio::test]
async fn transaction_conflicts_when_watched_key_is_deleted() {
    let store = RMemoryStore::new();
    store.set("k", "v", 60).await.expect("set failed");

    let mut tx = store.begin().await.expect("begin failed");
    tx.watch(&["k".to_string()]).await.expect("watch failed");

    store.delete(&["k".to_string()]).await.expect("del failed");

    tx.stage(StagedOp::Delete {
        keys: vec!["k".to_string()],
    });
    assert!(!tx.exec().await.expect("exec failed"));
}

#[tokio::test]
async fn transaction_conflicts_when_watched_key_expires() {
    let store = RMemoryStore::new();
    store.set("k", "v", 1).await.expect("set failed");

    let mut tx = store.begin().await.expect("begin failed");
    tx.watch(&["k".to_string()]).await.expect("watch failed");

    tokio::time::sleep(Duration::from_millis(1100)).await;

    tx.stage(StagedOp::SetValue {
        key: "other".to_string(),
        value: "v".to_string(),
        expire_seconds: 60,
    });
    // Expiry observed at exec counts as a modification of the watched key.
    assert!(!tx.exec().await.expect("exec failed"));
    assert!(store.get("other").await.expect("get failed").is_none());
}

#[tokio::test]
async fn unrelated_writes_do_not_conflict() {
    let store = RMemoryStore::new();

    let mut tx = store.begin().await.expect("begin failed");
    tx.watch(&["k".to_string()]).await.expect("watch failed");

    store.set("elsewhere", "v", 60).await.expect("set failed");

    tx.stage(StagedOp::SetValue {
        key: "k".to_string(),
        value: "v".to_string(),
        expire_seconds: 60,
    });
    assert!(tx.exec().await.expect("exec failed"));
}

#[tokio::test]
async fn empty_transaction_commits_trivially() {
    let store = RMemoryStore::new();

    let mut tx = store.begin().await.expect("begin failed");
    tx.watch(&["k".to_string()]).await.expect("watch failed");
    assert!(tx.exec().await.expect("exec failed"));
}

#[tokio::test]
async fn cancel_discards_staged_writes() {
    let store = RMemoryStore::new();

    let mut tx = store.begin().await.expect("begin failed");
    tx.watch(&["k".to_string()]).await.expect("watch failed");
    tx.stage(StagedOp::SetValue {
        key: "k".to_string(),
        value: "v".to_string(),
        expire_seconds: 60,
    });
    tx.cancel().await.expect("cancel failed");

    assert!(store.get("k").await.expect("get failed").is_none());
}

#[tokio::test]
async fn transaction_reads_see_current_state() {
    let store = RMemoryStore::new();
    store.add_member("s", "a").await.expect("sadd failed");
    store.set("k", "v", 60).await.expect("set failed");

    let mut tx = store.begin().await.expect("begin failed");
    assert!(tx.is_member("s", "a").await.expect("sismember failed"));
    assert!(!tx.is_member("s", "b").await.expect("sismember failed"));
    assert_eq!(tx.members("s").await.expect("smembers failed"), vec!["a".to_string()]);
    assert!(tx.exists("k").await.expect("exists failed"));
    assert_eq!(tx.get("k").await.expect("get failed").as_deref(), Some("v"));
    assert!(tx.ttl("k").await.expect("ttl failed").is_some());
    tx.cancel().await.expect("cancel failed");
}

#[tokio::test]
async fn staged_remove_members_drops_emptied_set() {
    let store = RMemoryStore::new();
    store.add_member("s", "a").await.expect("sadd failed");

    let mut tx = store.begin().await.expect("begin failed");
    tx.watch(&["s".to_string()]).await.expect("watch failed");
    tx.stage(StagedOp::RemoveMembers {
        key: "s".to_string(),
        members: vec!["a".to_string()],
    });
    assert!(tx.exec().await.expect("exec failed"));

    assert!(!store.exists("s").await.expect("exists failed"));
}
