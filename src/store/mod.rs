//! ## 日本語
//!
//! registry が利用する狭いストアプロトコルです。
//!
//! set への追加・削除・列挙、key の存在確認、TTL の設定と読み出し、値の
//! get/set/delete、そして watch → stage → commit-or-conflict の楽観的
//! トランザクションだけを要求します。Redis/Valkey バックエンドは `redis`
//! feature で有効になり、テスト用のインメモリバックエンドは常に利用
//! できます。
//!
//! ## English
//!
//! The narrow store protocol the registry consumes.
//!
//! Only set add/remove/enumerate, key existence, TTL write/read, value
//! get/set/delete, and a watch → stage → commit-or-conflict optimistic
//! transaction are required. The Redis/Valkey backend is enabled by the
//! `redis` feature; the in-memory backend is always available.

use crate::models::RTokenError;
use async_trait::async_trait;

#[cfg(feature = "redis")]
mod redis_store;

#[cfg(feature = "redis")]
pub use redis_store::RRedisStore;

/// ## 日本語
///
/// トランザクションへステージされる書き込みです。`exec` が成功するまで
/// ストアには一切反映されません。
///
/// ## English
///
/// A write staged into a transaction. Nothing reaches the store until `exec`
/// commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagedOp {
    /// Write a value with a TTL (SETEX semantics).
    SetValue {
        /// Destination key.
        key: String,
        /// Encoded value.
        value: String,
        /// TTL attached to the key.
        expire_seconds: u64,
    },
    /// Delete keys outright.
    Delete {
        /// Keys to delete.
        keys: Vec<String>,
    },
    /// Remove members from a set. Removing the last member removes the set
    /// itself, matching Redis.
    RemoveMembers {
        /// The set key.
        key: String,
        /// Members to remove.
        members: Vec<String>,
    },
}

/// ## 日本語
///
/// 進行中の楽観的トランザクションです。
///
/// `watch` 以降に監視対象 key が書き換えられた場合、`exec` は何も適用せずに
/// `Ok(false)` を返します（conflict）。読み出しはトランザクションの接続上で
/// 即時に実行され、書き込みは `exec` までステージされるだけです。
///
/// ## English
///
/// An in-flight optimistic transaction.
///
/// If any watched key is modified after `watch`, `exec` applies nothing and
/// returns `Ok(false)` (conflict). Reads run immediately on the
/// transaction's connection; writes are merely staged until `exec`.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Adds keys to the watch list. Watching the same key twice keeps the
    /// earliest observation.
    async fn watch(&mut self, keys: &[String]) -> Result<(), RTokenError>;

    /// Reads all members of a set. An absent set reads as empty.
    async fn members(&mut self, key: &str) -> Result<Vec<String>, RTokenError>;

    /// Returns whether `member` is in the set at `key`.
    async fn is_member(&mut self, key: &str, member: &str) -> Result<bool, RTokenError>;

    /// Returns whether `key` currently exists.
    async fn exists(&mut self, key: &str) -> Result<bool, RTokenError>;

    /// Remaining TTL in seconds. `None` when the key does not exist,
    /// `Some(-1)` when it exists without an expiry.
    async fn ttl(&mut self, key: &str) -> Result<Option<i64>, RTokenError>;

    /// Reads a value.
    async fn get(&mut self, key: &str) -> Result<Option<String>, RTokenError>;

    /// Stages a write for `exec`.
    fn stage(&mut self, op: StagedOp);

    /// Commits the staged writes. `Ok(false)` means a watched key changed
    /// and nothing was applied.
    async fn exec(self) -> Result<bool, RTokenError>;

    /// Abandons the transaction, releasing all watches. Nothing is applied.
    async fn cancel(self) -> Result<(), RTokenError>;
}

/// ## 日本語
///
/// registry が要求するストアプロトコルです。
///
/// 非トランザクション操作は単発のコマンドとして即時に実行されます。複数
/// ステップの一貫性が必要な箇所はすべて [`StoreTransaction`] を経由します。
///
/// ## English
///
/// The store protocol the registry requires.
///
/// Non-transactional operations execute immediately as single commands; every
/// multi-step consistency concern goes through [`StoreTransaction`].
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// The backend's transaction handle.
    type Tx: StoreTransaction;

    /// Opens a transaction. Watches are added with [`StoreTransaction::watch`].
    async fn begin(&self) -> Result<Self::Tx, RTokenError>;

    /// Adds a member to a set, creating the set (without expiry) if absent.
    /// Returns whether the member was newly added.
    async fn add_member(&self, key: &str, member: &str) -> Result<bool, RTokenError>;

    /// Removes members from a set; returns how many were removed. Removing
    /// the last member removes the set itself.
    async fn remove_members(&self, key: &str, members: &[String]) -> Result<u64, RTokenError>;

    /// Reads all members of a set. An absent set reads as empty.
    async fn members(&self, key: &str) -> Result<Vec<String>, RTokenError>;

    /// Returns whether `key` currently exists.
    async fn exists(&self, key: &str) -> Result<bool, RTokenError>;

    /// Sets the key's expiry to `seconds` from now. Returns `false` when the
    /// key does not exist.
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, RTokenError>;

    /// Remaining TTL in seconds. `None` when the key does not exist,
    /// `Some(-1)` when it exists without an expiry.
    async fn ttl(&self, key: &str) -> Result<Option<i64>, RTokenError>;

    /// Reads a value.
    async fn get(&self, key: &str) -> Result<Option<String>, RTokenError>;

    /// Writes a value with a TTL (SETEX semantics).
    async fn set(&self, key: &str, value: &str, expire_seconds: u64) -> Result<(), RTokenError>;

    /// Deletes keys; returns how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, RTokenError>;
}
