#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::empty_loop)]
#![deny(clippy::indexing_slicing)]
#![deny(unused)]
//! # r-token-registry
//!
//! A distributed bearer-token registry backed by a shared key-value store.
//!
//! The library exposes three main building blocks:
//! - [`RTokenRegistry`]: issues, retrieves, enumerates, and revokes opaque
//!   bearer tokens, each bound to an identity and carrying a JSON payload.
//! - [`TokenStore`](store::TokenStore): the store protocol. Any backend that
//!   offers optimistic (watch / stage / exec) transactions can plug in.
//! - [`RRedisStore`](store::RRedisStore) and [`RMemoryStore`](memory::RMemoryStore):
//!   the Redis/Valkey backend and an in-process backend with the same
//!   observable behavior, useful for tests.
//!
//! ## How the token lifecycle works
//!
//! 1. Your login handler calls [`RTokenRegistry::issue_access_token`] with an
//!    identity and a payload. The registry sweeps stale memberships, evicts
//!    the oldest tokens when the per-identity limit would be exceeded, and
//!    writes the record under a fresh random token with a TTL.
//! 2. The raw token is returned to the client. Only the raw value ever
//!    crosses the boundary; the record stays server-side.
//! 3. Validation is a lookup: [`RTokenRegistry::get_access_token`] returns
//!    the record and its remaining TTL, or `None` for anything absent,
//!    expired, or corrupted.
//! 4. Revocation deletes the record; expiry is otherwise handled entirely by
//!    store TTLs, so no background janitor runs anywhere.
//!
//! Multiple processes may operate on the same store concurrently. There is
//! no coordinator: every multi-step operation runs as an optimistic
//! transaction and retries when another writer wins the race.
//!
//! ## 繁體中文
//!
//! 這是一個以共享 key-value 儲存為後端的分散式 bearer token 註冊庫。
//!
//! 主要由三個元件構成：
//! - [`RTokenRegistry`]: 簽發、查詢、列舉與註銷不透明 token，每個 token
//!   綁定一個 identity 並攜帶 JSON payload。
//! - [`TokenStore`](store::TokenStore): 儲存協議。任何支援樂觀交易
//!   （watch / stage / exec）的後端都能接入。
//! - [`RRedisStore`](store::RRedisStore) 與 [`RMemoryStore`](memory::RMemoryStore):
//!   Redis/Valkey 後端，以及行為一致、適合測試的行程內後端。
//!
//! ## token 生命週期
//!
//! 1. 登入端點呼叫 [`RTokenRegistry::issue_access_token`]，傳入 identity 與
//!    payload。註冊庫會先清掃過期的成員資格，必要時逐出最舊的 token 以
//!    維持每個 identity 的數量上限，再以帶 TTL 的方式寫入新紀錄。
//! 2. raw token 回傳給客戶端；紀錄本體永遠留在伺服器側。
//! 3. 驗證即查詢：[`RTokenRegistry::get_access_token`] 回傳紀錄與剩餘
//!    TTL；不存在、已過期、或已損毀的一律回傳 `None`。
//! 4. 註銷即刪除紀錄；過期完全交給儲存端的 TTL，不需要任何背景清理程序。
//!
//! 多個行程可以同時操作同一個儲存。沒有協調者：所有多步驟操作都以樂觀
//! 交易執行，競爭失敗時自動重試。

mod codec;
mod keys;
pub mod memory;
mod models;
mod reconcile;
mod registry;
pub mod store;

pub use crate::codec::{FieldShape, RRecordValidator};
pub use crate::models::{RIdentity, RTokenError, RTokenInfo, RTokenRecord};
pub use crate::registry::RTokenRegistry;
use std::fmt;

/// ## 日本語
///
/// token の種別です。種別ごとに key prefix・TTL・上限が分かれます。
///
/// ## English
///
/// The kind of a token. Each kind has its own key prefixes, TTL, and limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Short-lived access token.
    Access,
    /// Long-lived refresh token.
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Access => write!(f, "ACCESS"),
            TokenKind::Refresh => write!(f, "REFRESH"),
        }
    }
}

/// ## 日本語
///
/// 1 つの token 種別の設定です。
///
/// `limit` が `None` の場合、identity あたりの保有数は無制限です。
/// `key_prefix` は token レコードの、`user_key_prefix` は identity ごとの
/// membership set のキー名前空間です。
///
/// ## English
///
/// The configuration for one token kind.
///
/// A `limit` of `None` means an identity may hold unboundedly many tokens.
/// `key_prefix` namespaces token records; `user_key_prefix` namespaces the
/// per-identity membership sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RKindConfig {
    /// Maximum live tokens per identity, or `None` for unlimited.
    pub limit: Option<usize>,
    /// TTL applied to records and membership sets, in seconds.
    pub expire_seconds: u64,
    /// Key namespace for token records.
    pub key_prefix: String,
    /// Key namespace for per-identity membership sets.
    pub user_key_prefix: String,
}

impl RKindConfig {
    /// Default access-token configuration: limit 1, one hour TTL.
    ///
    /// ## 繁體中文
    ///
    /// access token 的預設組態：上限 1、TTL 一小時。
    pub fn access() -> Self {
        Self {
            limit: Some(1),
            expire_seconds: 3600,
            key_prefix: "access_token".to_string(),
            user_key_prefix: "user_access_token".to_string(),
        }
    }

    /// Default refresh-token configuration: limit 1, 36 hour TTL.
    ///
    /// ## 繁體中文
    ///
    /// refresh token 的預設組態：上限 1、TTL 三十六小時。
    pub fn refresh() -> Self {
        Self {
            limit: Some(1),
            expire_seconds: 129_600,
            key_prefix: "refresh_token".to_string(),
            user_key_prefix: "user_refresh_token".to_string(),
        }
    }
}
