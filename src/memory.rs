//! ## 日本語
//!
//! インメモリのストアバックエンドです。
//!
//! Redis バックエンドと同じプロトコルを実装します：TTL による遅延失効、
//! 空になった set の自動削除、そして watch したバージョンの照合による
//! commit-or-conflict トランザクション。Redis サーバー無しで registry 全体を
//! 決定的にテストするための実装です。
//!
//! ## English
//!
//! In-memory store backend.
//!
//! Implements the same protocol as the Redis backend: lazy TTL expiry,
//! automatic removal of emptied sets, and commit-or-conflict transactions
//! driven by watched-version comparison. It exists so the whole registry can
//! be tested deterministically without a Redis server.

use crate::models::RTokenError;
use crate::store::{StagedOp, StoreTransaction, TokenStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Returns the current Unix epoch milliseconds.
fn now_ms_u64() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

fn wrong_type(key: &str) -> RTokenError {
    RTokenError::store(std::io::Error::other(format!(
        "WRONGTYPE operation against key {key}"
    )))
}

#[derive(Debug, Clone)]
enum EntryValue {
    Value(String),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: EntryValue,
    // None = no expiry (persists until deleted), like a Redis key without TTL.
    expires_at_ms: Option<u64>,
}

#[derive(Default)]
struct Shared {
    entries: HashMap<String, Entry>,
    // Monotonic per-key modification counters. Retained after deletion so a
    // delete is observable to a transaction that watched the key.
    versions: HashMap<String, u64>,
}

impl Shared {
    fn bump(&mut self, key: &str) {
        *self.versions.entry(key.to_string()).or_insert(0) += 1;
    }

    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    // 日本語: 期限切れの key をその場で削除する（バージョンも進める）。
    // English: Lazily drop an expired key, bumping its version.
    fn purge_if_expired(&mut self, key: &str, now_ms: u64) {
        let expired = self
            .entries
            .get(key)
            .and_then(|entry| entry.expires_at_ms)
            .is_some_and(|at| at <= now_ms);
        if expired {
            self.entries.remove(key);
            self.bump(key);
        }
    }

    fn live(&mut self, key: &str, now_ms: u64) -> Option<&Entry> {
        self.purge_if_expired(key, now_ms);
        self.entries.get(key)
    }

    fn remaining_ttl(&mut self, key: &str, now_ms: u64) -> Option<i64> {
        let entry = self.live(key, now_ms)?;
        match entry.expires_at_ms {
            None => Some(-1),
            Some(at) => Some(at.saturating_sub(now_ms).div_ceil(1000) as i64),
        }
    }

    fn apply(&mut self, op: StagedOp, now_ms: u64) {
        match op {
            StagedOp::SetValue {
                key,
                value,
                expire_seconds,
            } => {
                self.entries.insert(
                    key.clone(),
                    Entry {
                        value: EntryValue::Value(value),
                        expires_at_ms: Some(now_ms + expire_seconds.saturating_mul(1000)),
                    },
                );
                self.bump(&key);
            }
            StagedOp::Delete { keys } => {
                for key in keys {
                    if self.entries.remove(&key).is_some() {
                        self.bump(&key);
                    }
                }
            }
            StagedOp::RemoveMembers { key, members } => {
                let mut changed = false;
                let mut emptied = false;
                if let Some(entry) = self.entries.get_mut(&key) {
                    if let EntryValue::Set(set) = &mut entry.value {
                        for member in &members {
                            changed |= set.remove(member);
                        }
                        emptied = set.is_empty();
                    }
                }
                if emptied {
                    self.entries.remove(&key);
                }
                if changed {
                    self.bump(&key);
                }
            }
        }
    }
}

/// ## 日本語
///
/// インメモリのストアです。`Clone` は同じ共有状態へのハンドルを増やす
/// だけです。
///
/// ## English
///
/// The in-memory store. `Clone` creates another handle to the same shared
/// state.
#[derive(Clone, Default)]
pub struct RMemoryStore {
    inner: Arc<Mutex<Shared>>,
}

impl RMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for RMemoryStore {
    type Tx = RMemoryTx;

    async fn begin(&self) -> Result<Self::Tx, RTokenError> {
        Ok(RMemoryTx {
            inner: Arc::clone(&self.inner),
            watched: HashMap::new(),
            staged: Vec::new(),
        })
    }

    async fn add_member(&self, key: &str, member: &str) -> Result<bool, RTokenError> {
        let mut shared = self.inner.lock().await;
        let now = now_ms_u64();
        shared.purge_if_expired(key, now);
        let entry = shared
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry {
                value: EntryValue::Set(BTreeSet::new()),
                expires_at_ms: None,
            });
        let added = match &mut entry.value {
            EntryValue::Set(set) => set.insert(member.to_string()),
            EntryValue::Value(_) => return Err(wrong_type(key)),
        };
        if added {
            shared.bump(key);
        }
        Ok(added)
    }

    async fn remove_members(&self, key: &str, members: &[String]) -> Result<u64, RTokenError> {
        let mut shared = self.inner.lock().await;
        let now = now_ms_u64();
        shared.purge_if_expired(key, now);
        let mut removed = 0u64;
        let emptied;
        match shared.entries.get_mut(key) {
            None => return Ok(0),
            Some(entry) => match &mut entry.value {
                EntryValue::Set(set) => {
                    for member in members {
                        if set.remove(member) {
                            removed += 1;
                        }
                    }
                    emptied = set.is_empty();
                }
                EntryValue::Value(_) => return Err(wrong_type(key)),
            },
        }
        if emptied {
            shared.entries.remove(key);
        }
        if removed > 0 {
            shared.bump(key);
        }
        Ok(removed)
    }

    async fn members(&self, key: &str) -> Result<Vec<String>, RTokenError> {
        let mut shared = self.inner.lock().await;
        let now = now_ms_u64();
        match shared.live(key, now) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.value {
                EntryValue::Set(set) => Ok(set.iter().cloned().collect()),
                EntryValue::Value(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, RTokenError> {
        let mut shared = self.inner.lock().await;
        let now = now_ms_u64();
        Ok(shared.live(key, now).is_some())
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, RTokenError> {
        let mut shared = self.inner.lock().await;
        let now = now_ms_u64();
        shared.purge_if_expired(key, now);
        match shared.entries.get_mut(key) {
            None => Ok(false),
            Some(entry) => {
                entry.expires_at_ms = Some(now + seconds.saturating_mul(1000));
                shared.bump(key);
                Ok(true)
            }
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<i64>, RTokenError> {
        let mut shared = self.inner.lock().await;
        let now = now_ms_u64();
        Ok(shared.remaining_ttl(key, now))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RTokenError> {
        let mut shared = self.inner.lock().await;
        let now = now_ms_u64();
        match shared.live(key, now) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                EntryValue::Value(value) => Ok(Some(value.clone())),
                EntryValue::Set(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn set(&self, key: &str, value: &str, expire_seconds: u64) -> Result<(), RTokenError> {
        let mut shared = self.inner.lock().await;
        let now = now_ms_u64();
        shared.apply(
            StagedOp::SetValue {
                key: key.to_string(),
                value: value.to_string(),
                expire_seconds,
            },
            now,
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, RTokenError> {
        let mut shared = self.inner.lock().await;
        let now = now_ms_u64();
        let mut removed = 0u64;
        for key in keys {
            shared.purge_if_expired(key, now);
            if shared.entries.remove(key).is_some() {
                shared.bump(key);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// ## 日本語
///
/// インメモリバックエンドのトランザクションです。
///
/// watch 時点の各 key のバージョンを記録し、`exec` で現在のバージョンと
/// 照合します。ひとつでもずれていれば何も適用せず conflict を報告します。
///
/// ## English
///
/// A transaction on the in-memory backend.
///
/// Records each watched key's version at watch time and compares against the
/// current versions in `exec`; any difference reports a conflict with nothing
/// applied.
pub struct RMemoryTx {
    inner: Arc<Mutex<Shared>>,
    watched: HashMap<String, u64>,
    staged: Vec<StagedOp>,
}

#[async_trait]
impl StoreTransaction for RMemoryTx {
    async fn watch(&mut self, keys: &[String]) -> Result<(), RTokenError> {
        let mut shared = self.inner.lock().await;
        let now = now_ms_u64();
        for key in keys {
            shared.purge_if_expired(key, now);
            let version = shared.version(key);
            // Keep the earliest observation so a change between two watch
            // calls still conflicts.
            self.watched.entry(key.clone()).or_insert(version);
        }
        Ok(())
    }

    async fn members(&mut self, key: &str) -> Result<Vec<String>, RTokenError> {
        let mut shared = self.inner.lock().await;
        let now = now_ms_u64();
        match shared.live(key, now) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.value {
                EntryValue::Set(set) => Ok(set.iter().cloned().collect()),
                EntryValue::Value(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn is_member(&mut self, key: &str, member: &str) -> Result<bool, RTokenError> {
        let mut shared = self.inner.lock().await;
        let now = now_ms_u64();
        match shared.live(key, now) {
            None => Ok(false),
            Some(entry) => match &entry.value {
                EntryValue::Set(set) => Ok(set.contains(member)),
                EntryValue::Value(_) => Err(wrong_type(key)),
            },
        }
    }

    async fn exists(&mut self, key: &str) -> Result<bool, RTokenError> {
        let mut shared = self.inner.lock().await;
        let now = now_ms_u64();
        Ok(shared.live(key, now).is_some())
    }

    async fn ttl(&mut self, key: &str) -> Result<Option<i64>, RTokenError> {
        let mut shared = self.inner.lock().await;
        let now = now_ms_u64();
        Ok(shared.remaining_ttl(key, now))
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, RTokenError> {
        let mut shared = self.inner.lock().await;
        let now = now_ms_u64();
        match shared.live(key, now) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                EntryValue::Value(value) => Ok(Some(value.clone())),
                EntryValue::Set(_) => Err(wrong_type(key)),
            },
        }
    }

    fn stage(&mut self, op: StagedOp) {
        self.staged.push(op);
    }

    async fn exec(mut self) -> Result<bool, RTokenError> {
        let mut shared = self.inner.lock().await;
        let now = now_ms_u64();
        for (key, watched_version) in &self.watched {
            shared.purge_if_expired(key, now);
            if shared.version(key) != *watched_version {
                return Ok(false);
            }
        }
        for op in self.staged.drain(..) {
            shared.apply(op, now);
        }
        Ok(true)
    }

    async fn cancel(mut self) -> Result<(), RTokenError> {
        self.watched.clear();
        self.staged.clear();
        Ok(())
    }
}
