//! Error types for r-token-registry.
//!
//! The library intentionally keeps its own error type small. Store backend
//! faults are propagated unchanged inside [`RTokenError::Store`]; retry policy
//! for infrastructure faults belongs to the store client, not this library.
//!
//! ## 繁體中文
//!
//! r-token-registry 的錯誤型別。
//!
//! 本庫的錯誤型別刻意保持精簡。儲存後端的錯誤會原封不動地包在
//! [`RTokenError::Store`] 中往外傳遞；基礎設施層的重試策略屬於儲存用戶端的
//! 責任，而不是本庫的。

use crate::TokenKind;
use thiserror::Error;

/// Errors returned by r-token-registry.
///
/// Decode and structural-validation failures never appear here: holders of a
/// bare raw token must not be able to distinguish "expired", "tampered", and
/// "never existed", so those conditions present as absence at the API.
///
/// ## 繁體中文
///
/// r-token-registry 會回傳的錯誤集合。
///
/// 解碼失敗與結構驗證失敗不會出現在這裡：只持有 raw token 的呼叫端不應能
/// 區分「過期」「被竄改」「從未存在」，因此這些情況一律以「不存在」呈現。
#[derive(Debug, Error)]
pub enum RTokenError {
    /// The store backend reported a fault. Propagated unchanged.
    ///
    /// ## 繁體中文
    ///
    /// 儲存後端回報的錯誤，原封不動往外傳遞。
    #[error("store backend error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A token record could not be serialized for storage.
    ///
    /// ## 繁體中文
    ///
    /// token record 無法序列化以寫入儲存。
    #[error("failed to encode token record: {0}")]
    Encode(#[from] serde_json::Error),

    /// A single-pass operation lost its optimistic transaction to a
    /// concurrent writer. The operation had no partial effect; the caller
    /// may simply run it again.
    ///
    /// ## 繁體中文
    ///
    /// 單趟操作的樂觀交易輸給了並行的寫入者。操作不會留下部分效果，呼叫端
    /// 重新執行即可。
    #[error("optimistic store transaction conflicted; no partial effect was applied")]
    TransientStore,

    /// A retried operation kept conflicting until its attempt budget ran out.
    ///
    /// ## 繁體中文
    ///
    /// 重試型操作在嘗試次數用完前持續發生衝突。
    #[error("store transaction retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// How many attempts were made before giving up.
        attempts: usize,
    },

    /// The requested token kind was not configured on this registry. This is
    /// a caller programming error and is never retried.
    ///
    /// ## 繁體中文
    ///
    /// 請求的 token kind 未在此 registry 上設定。屬於呼叫端的程式錯誤，
    /// 不會重試。
    #[error("token kind {0} is not configured on this registry")]
    UnsupportedKind(TokenKind),
}

impl RTokenError {
    /// Wraps a backend error without losing its source chain.
    pub(crate) fn store(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Store(Box::new(err))
    }
}
