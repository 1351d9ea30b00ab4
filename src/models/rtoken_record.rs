use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// ## 日本語
///
/// token の発行対象となる principal の識別子です。
///
/// 呼び出し側から与えられる不透明な値で、本ライブラリが生成することは
/// ありません。文字列または整数を受け付け、ストアのキー組み立て時は
/// `Display` 表現をそのまま使います。
///
/// ## English
///
/// The principal identifier a token is issued on behalf of.
///
/// An opaque value supplied by the caller; this library never generates one.
/// Either a string or an integer is accepted, and the `Display` form is used
/// verbatim when store keys are derived.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RIdentity {
    /// Integer identity.
    Int(i64),
    /// String identity.
    Str(String),
}

impl fmt::Display for RIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RIdentity::Int(id) => write!(f, "{id}"),
            RIdentity::Str(id) => write!(f, "{id}"),
        }
    }
}

impl From<&str> for RIdentity {
    fn from(id: &str) -> Self {
        RIdentity::Str(id.to_string())
    }
}

impl From<String> for RIdentity {
    fn from(id: String) -> Self {
        RIdentity::Str(id)
    }
}

impl From<i64> for RIdentity {
    fn from(id: i64) -> Self {
        RIdentity::Int(id)
    }
}

impl From<u32> for RIdentity {
    fn from(id: u32) -> Self {
        RIdentity::Int(i64::from(id))
    }
}

/// ## 日本語
///
/// raw token に紐づくサーバー側のレコードです。
///
/// 一度書き込まれた後は変更されません（ローテーションは新しいレコード +
/// 新しい raw token として扱います）。`idf` はレコードの形を区別するための
/// ランダムな識別子です。
///
/// ## English
///
/// The server-side record bound to a raw token.
///
/// Immutable once written (rotation means a new record under a new raw
/// token). `idf` is a random identifier distinguishing record shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RTokenRecord {
    /// Caller-defined payload data.
    pub payload: Map<String, Value>,
    /// The identity the token was issued for.
    pub uid: RIdentity,
    /// Random per-record discriminator (UUID v4 hex).
    pub idf: String,
}
