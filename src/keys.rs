//! ## 日本語
//!
//! token kind・raw token・identity からストアのキーを決定的に導出します。
//!
//! 純関数のみで、副作用も失敗モードもありません。
//!
//! ## English
//!
//! Deterministic derivation of store keys from token kind, raw token, and
//! identity.
//!
//! Pure functions only; no side effects, no failure modes.

use crate::models::RIdentity;
use crate::RKindConfig;

/// ## 日本語
///
/// 単一 token のレコードを保存するキーを返します。形式は
/// `"{key_prefix}/{raw_token}"` です。
///
/// ## English
///
/// Returns the key holding a single token's record, in the form
/// `"{key_prefix}/{raw_token}"`.
pub fn token_key(cfg: &RKindConfig, raw_token: &str) -> String {
    format!("{}/{}", cfg.key_prefix, raw_token)
}

/// ## 日本語
///
/// ある identity の live な token key 集合を保存するキーを返します。形式は
/// `"{user_key_prefix}/{identity}"` です。
///
/// ## English
///
/// Returns the key holding an identity's set of live token keys, in the form
/// `"{user_key_prefix}/{identity}"`.
pub fn identity_set_key(cfg: &RKindConfig, identity: &RIdentity) -> String {
    format!("{}/{}", cfg.user_key_prefix, identity)
}

/// ## 日本語
///
/// token key から raw token 部分を取り出します。キーがこの kind の prefix で
/// 始まらない場合は `None` を返します。
///
/// ## English
///
/// Recovers the raw token portion of a token key. Returns `None` when the key
/// does not start with this kind's prefix.
pub fn raw_token_from_key<'a>(cfg: &RKindConfig, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(&cfg.key_prefix)?.strip_prefix('/')
}
