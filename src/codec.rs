//! ## 日本語
//!
//! token record とストア互換の値のあいだの変換、およびデコード済みレコードの
//! 構造チェックです。
//!
//! エンコードは正準な JSON 文字列で、同じレコードからは常に同じバイト列が
//! 得られます。デコードの失敗は呼び出し側で「存在しない」と同じ扱いに
//! なります。
//!
//! ## English
//!
//! Conversion between token records and store-compatible values, plus the
//! structural integrity check applied to decoded records.
//!
//! Encoding is a canonical JSON string: identical records always produce
//! identical bytes. Decode failures are treated by callers exactly like
//! absence.

use crate::models::{RTokenError, RTokenRecord};
use serde_json::Value;

/// ## 日本語
///
/// レコードをストアに書き込める文字列へエンコードします。
///
/// ## English
///
/// Encodes a record into the string written to the store.
pub fn encode_record(record: &RTokenRecord) -> Result<String, RTokenError> {
    Ok(serde_json::to_string(record)?)
}

/// ## 日本語
///
/// ストアから読み出した文字列を JSON 値へデコードします。壊れた入力では
/// エラーを返します（呼び出し側はこれを「存在しない」と同様に扱います）。
///
/// ## English
///
/// Decodes a string read from the store into a JSON value. Malformed input
/// yields an error, which callers treat identically to absence.
pub fn decode_record(raw: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(raw)
}

/// ## 日本語
///
/// 構造チェック済みの JSON 値を型付きレコードへ変換します。
///
/// ## English
///
/// Converts a structurally checked JSON value into a typed record.
pub fn record_from_value(value: Value) -> Option<RTokenRecord> {
    serde_json::from_value(value).ok()
}

/// ## 日本語
///
/// フィールドに要求されるプリミティブな形です。
///
/// ## English
///
/// The primitive shape required of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    /// Must be a JSON string.
    Str,
    /// Must be a JSON number.
    Num,
    /// Must be a JSON object.
    Map,
    /// Must be a JSON string or number.
    StrOrNum,
}

impl FieldShape {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldShape::Str => value.is_string(),
            FieldShape::Num => value.is_number(),
            FieldShape::Map => value.is_object(),
            FieldShape::StrOrNum => value.is_string() || value.is_number(),
        }
    }
}

/// ## 日本語
///
/// デコード済みレコードを期待スキーマに対して検査します。
///
/// 列挙中に改竄されたレコードや古いスキーマのレコードを、全体を中断せずに
/// 静かに読み飛ばすために使われます。
///
/// ## English
///
/// Checks a decoded record against an expected schema.
///
/// Used to reject tampered or stale-schema records during enumeration without
/// aborting the whole listing; invalid entries are silently skipped.
#[derive(Debug, Clone)]
pub struct RRecordValidator {
    fields: Vec<(&'static str, FieldShape)>,
}

impl RRecordValidator {
    /// Builds a validator from a required-field table.
    pub fn new(fields: Vec<(&'static str, FieldShape)>) -> Self {
        Self { fields }
    }

    /// ## 日本語
    ///
    /// 不透明 token レコードのスキーマです：`payload` は map、`uid` は
    /// 文字列または数値、`idf` は文字列。
    ///
    /// ## English
    ///
    /// The opaque token record schema: `payload` is a map, `uid` a string or
    /// number, `idf` a string.
    pub fn opaque() -> Self {
        Self::new(vec![
            ("payload", FieldShape::Map),
            ("uid", FieldShape::StrOrNum),
            ("idf", FieldShape::Str),
        ])
    }

    /// ## 日本語
    ///
    /// すべての必須フィールドが期待された形で存在するかを返します。
    ///
    /// ## English
    ///
    /// Returns whether every required field is present with its expected
    /// shape.
    pub fn validate(&self, value: &Value) -> bool {
        let Some(map) = value.as_object() else {
            return false;
        };
        self.fields
            .iter()
            .all(|(name, shape)| map.get(*name).is_some_and(|v| shape.matches(v)))
    }
}
