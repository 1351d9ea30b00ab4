use crate::models::RTokenRecord;
use serde::{Deserialize, Serialize};

/// ## 日本語
///
/// 境界を越えて返される唯一の形です。
///
/// raw token、残り TTL（秒）、保存されたレコードをまとめて持ちます。
/// シリアライズ時はレコードのフィールドがこの構造体に平坦化されます。
///
/// ## English
///
/// The only shape returned across the library boundary.
///
/// Carries the raw token, the remaining TTL in seconds, and the stored
/// record. Record fields are flattened into this struct when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RTokenInfo {
    /// The externally visible credential string.
    pub token: String,
    /// Remaining TTL in seconds as reported by the store.
    pub expires_in: i64,
    /// The stored record.
    #[serde(flatten)]
    pub record: RTokenRecord,
}
