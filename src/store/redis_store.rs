//! ## 日本語
//!
//! Redis/Valkey をバックエンドにしたストア実装です。
//!
//! 値の失効は Redis の TTL（秒）に任せます。楽観的トランザクションは
//! WATCH / MULTI / EXEC で実現し、WATCH から EXEC までのあいだトランザク
//! ションが接続を占有します（接続ごとの tokio::Mutex を保持し続けるため、
//! 他タスクのコマンドが割り込むことはありません）。
//!
//! ## English
//!
//! Redis/Valkey-backed store implementation.
//!
//! Value expiry is delegated to Redis TTLs (seconds). Optimistic transactions
//! map onto WATCH / MULTI / EXEC; a transaction owns its connection from
//! WATCH to EXEC by holding that connection's tokio::Mutex guard, so no other
//! task's commands interleave on it.

use crate::models::RTokenError;
use crate::store::{StagedOp, StoreTransaction, TokenStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

fn no_connections() -> RTokenError {
    RTokenError::store(redis::RedisError::from((
        redis::ErrorKind::ClientError,
        "no redis connections",
    )))
}

/// ## 日本語
///
/// Redis/Valkey をバックエンドにしたストアです。
///
/// 内部で複数の接続を確保し、簡易的なラウンドロビンで利用します。`Clone` は
/// 同じ接続プールへのハンドルを増やすだけです。
///
/// ## English
///
/// A store backed by Redis/Valkey.
///
/// The store allocates a small connection pool and uses round-robin
/// selection; `Clone` creates another handle to the same pool.
#[derive(Clone)]
pub struct RRedisStore {
    // 日本語: 共有の非同期 ConnectionManager 群。Arc<Mutex<..>> 単位なのは
    //        トランザクションが OwnedMutexGuard で接続を持ち出せるように
    //        するため。
    // English: Shared async ConnectionManagers. Each sits in its own
    //          Arc<Mutex<..>> so a transaction can carry the connection away
    //          as an OwnedMutexGuard.
    connections: Arc<Vec<Arc<Mutex<ConnectionManager>>>>,
    next_index: Arc<AtomicUsize>,
}

impl RRedisStore {
    /// ## 日本語
    ///
    /// 既存の非同期 Redis 接続マネージャからストアを作成します。
    ///
    /// ## English
    ///
    /// Creates a store from an existing async Redis connection manager.
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connections: Arc::new(vec![Arc::new(Mutex::new(connection))]),
            next_index: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// ## 日本語
    ///
    /// Redis/Valkey に接続してストアを作成します。
    ///
    /// `redis_url` の例：
    /// - `redis://127.0.0.1/`
    /// - `redis://:password@127.0.0.1/0`
    ///
    /// ## English
    ///
    /// Connects to Redis/Valkey and creates a store.
    ///
    /// Examples for `redis_url`:
    /// - `redis://127.0.0.1/`
    /// - `redis://:password@127.0.0.1/0`
    pub async fn connect(redis_url: &str) -> Result<Self, RTokenError> {
        let client = redis::Client::open(redis_url).map_err(RTokenError::store)?;

        // 日本語: ConnectionManager は切断時に再接続を試みる（挙動は redis
        //        crate に依存）。
        // English: ConnectionManager attempts reconnection on disconnect
        //          (behavior depends on the redis crate).
        let mut connections = Vec::with_capacity(4);
        for _ in 0..4 {
            let connection = client
                .get_connection_manager()
                .await
                .map_err(RTokenError::store)?;
            connections.push(Arc::new(Mutex::new(connection)));
        }
        Ok(Self {
            connections: Arc::new(connections),
            next_index: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// ## 日本語
    ///
    /// 接続プールから次の接続をロックして取得します。
    ///
    /// ## English
    ///
    /// Locks and returns the next connection from the pool.
    async fn lock_connection(&self) -> Result<OwnedMutexGuard<ConnectionManager>, RTokenError> {
        let len = self.connections.len();
        if len == 0 {
            return Err(no_connections());
        }
        let index = self.next_index.fetch_add(1, Ordering::Relaxed) % len;
        match self.connections.get(index) {
            Some(connection) => Ok(Arc::clone(connection).lock_owned().await),
            None => Err(no_connections()),
        }
    }
}

#[async_trait]
impl TokenStore for RRedisStore {
    type Tx = RRedisTx;

    async fn begin(&self) -> Result<Self::Tx, RTokenError> {
        Ok(RRedisTx {
            connection: self.lock_connection().await?,
            staged: Vec::new(),
        })
    }

    async fn add_member(&self, key: &str, member: &str) -> Result<bool, RTokenError> {
        let mut connection = self.lock_connection().await?;
        let added: i64 = connection
            .sadd(key, member)
            .await
            .map_err(RTokenError::store)?;
        Ok(added == 1)
    }

    async fn remove_members(&self, key: &str, members: &[String]) -> Result<u64, RTokenError> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut connection = self.lock_connection().await?;
        let removed: u64 = connection
            .srem(key, members)
            .await
            .map_err(RTokenError::store)?;
        Ok(removed)
    }

    async fn members(&self, key: &str) -> Result<Vec<String>, RTokenError> {
        let mut connection = self.lock_connection().await?;
        let members: Vec<String> = connection.smembers(key).await.map_err(RTokenError::store)?;
        Ok(members)
    }

    async fn exists(&self, key: &str) -> Result<bool, RTokenError> {
        let mut connection = self.lock_connection().await?;
        let exists: bool = connection.exists(key).await.map_err(RTokenError::store)?;
        Ok(exists)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, RTokenError> {
        let mut connection = self.lock_connection().await?;
        // 日本語: redis crate の API が i64 を要求するため、変換できない場合
        //        は上限に丸める。
        // English: The redis crate API expects i64; saturate when the value
        //          does not fit.
        let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
        let updated: bool = connection
            .expire(key, seconds)
            .await
            .map_err(RTokenError::store)?;
        Ok(updated)
    }

    async fn ttl(&self, key: &str) -> Result<Option<i64>, RTokenError> {
        let mut connection = self.lock_connection().await?;
        let ttl: i64 = connection.ttl(key).await.map_err(RTokenError::store)?;
        if ttl == -2 {
            return Ok(None);
        }
        Ok(Some(ttl))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RTokenError> {
        let mut connection = self.lock_connection().await?;
        let value: Option<String> = connection.get(key).await.map_err(RTokenError::store)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, expire_seconds: u64) -> Result<(), RTokenError> {
        let mut connection = self.lock_connection().await?;
        let _: () = connection
            .set_ex(key, value, expire_seconds)
            .await
            .map_err(RTokenError::store)?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, RTokenError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut connection = self.lock_connection().await?;
        let removed: u64 = connection.del(keys).await.map_err(RTokenError::store)?;
        Ok(removed)
    }
}

/// ## 日本語
///
/// Redis バックエンドのトランザクションです。
///
/// WATCH 済みの接続を占有し、`exec` で staged な書き込みを MULTI/EXEC
/// パイプラインとして送信します。EXEC が nil を返した場合（watch 対象が
/// 書き換えられた場合）は conflict として `Ok(false)` を返します。
///
/// ## English
///
/// A transaction on the Redis backend.
///
/// Owns a WATCHed connection; `exec` sends the staged writes as one
/// MULTI/EXEC pipeline. A nil EXEC reply (a watched key was modified)
/// reports a conflict as `Ok(false)`.
pub struct RRedisTx {
    connection: OwnedMutexGuard<ConnectionManager>,
    staged: Vec<StagedOp>,
}

#[async_trait]
impl StoreTransaction for RRedisTx {
    async fn watch(&mut self, keys: &[String]) -> Result<(), RTokenError> {
        if keys.is_empty() {
            return Ok(());
        }
        let _: () = redis::cmd("WATCH")
            .arg(keys)
            .query_async(&mut *self.connection)
            .await
            .map_err(RTokenError::store)?;
        Ok(())
    }

    async fn members(&mut self, key: &str) -> Result<Vec<String>, RTokenError> {
        let members: Vec<String> = self
            .connection
            .smembers(key)
            .await
            .map_err(RTokenError::store)?;
        Ok(members)
    }

    async fn is_member(&mut self, key: &str, member: &str) -> Result<bool, RTokenError> {
        let is_member: bool = self
            .connection
            .sismember(key, member)
            .await
            .map_err(RTokenError::store)?;
        Ok(is_member)
    }

    async fn exists(&mut self, key: &str) -> Result<bool, RTokenError> {
        let exists: bool = self
            .connection
            .exists(key)
            .await
            .map_err(RTokenError::store)?;
        Ok(exists)
    }

    async fn ttl(&mut self, key: &str) -> Result<Option<i64>, RTokenError> {
        let ttl: i64 = self.connection.ttl(key).await.map_err(RTokenError::store)?;
        if ttl == -2 {
            return Ok(None);
        }
        Ok(Some(ttl))
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, RTokenError> {
        let value: Option<String> = self
            .connection
            .get(key)
            .await
            .map_err(RTokenError::store)?;
        Ok(value)
    }

    fn stage(&mut self, op: StagedOp) {
        self.staged.push(op);
    }

    async fn exec(mut self) -> Result<bool, RTokenError> {
        if self.staged.is_empty() {
            let _: () = redis::cmd("UNWATCH")
                .query_async(&mut *self.connection)
                .await
                .map_err(RTokenError::store)?;
            return Ok(true);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &self.staged {
            match op {
                StagedOp::SetValue {
                    key,
                    value,
                    expire_seconds,
                } => {
                    pipe.set_ex(key, value, *expire_seconds).ignore();
                }
                StagedOp::Delete { keys } => {
                    if !keys.is_empty() {
                        pipe.del(keys.as_slice()).ignore();
                    }
                }
                StagedOp::RemoveMembers { key, members } => {
                    if !members.is_empty() {
                        pipe.srem(key, members.as_slice()).ignore();
                    }
                }
            }
        }

        // 日本語: EXEC が nil（= watch 対象の変更で中断）だと None になる。
        // English: The reply is None when EXEC returned nil because a watched
        //          key changed.
        let committed: Option<()> = pipe
            .query_async(&mut *self.connection)
            .await
            .map_err(RTokenError::store)?;
        Ok(committed.is_some())
    }

    async fn cancel(mut self) -> Result<(), RTokenError> {
        let _: () = redis::cmd("UNWATCH")
            .query_async(&mut *self.connection)
            .await
            .map_err(RTokenError::store)?;
        self.staged.clear();
        Ok(())
    }
}
