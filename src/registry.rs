//! ## 日本語
//!
//! token ライフサイクルの中核です。
//!
//! 発行・取得・列挙・失効を [`crate::store::TokenStore`] の上で調停します。
//! プロセス内ロックによる調停は一切なく、複数ステップの一貫性はすべて
//! ストアの楽観的トランザクションで実現します。同一 identity + kind への
//! 操作はその identity の set key の watch を介して自然に直列化され、
//! 異なる identity 同士は競合しません。
//!
//! ## English
//!
//! The core of the token lifecycle.
//!
//! Orchestrates issuance, retrieval, enumeration, and revocation on top of a
//! [`crate::store::TokenStore`]. There is no in-process locking authority:
//! all multi-step consistency comes from the store's optimistic transactions.
//! Operations on the same identity + kind serialize naturally through the
//! watch on that identity's set key; different identities never contend.

use crate::codec::{self, RRecordValidator};
use crate::keys;
use crate::models::{RIdentity, RTokenError, RTokenInfo, RTokenRecord};
use crate::reconcile::{enforce_limit, reconcile, MAX_TX_ATTEMPTS};
use crate::store::{StagedOp, StoreTransaction, TokenStore};
use crate::{RKindConfig, TokenKind};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use serde_json::{Map, Value};

/// Raw tokens are 48 random bytes, base64 url-safe encoded (64 chars).
const RAW_TOKEN_BYTES: usize = 48;

/// Entries this close to expiry are not worth returning from a listing.
const LIST_TTL_GUARD_SECONDS: i64 = 5;

/// ## 日本語
///
/// token の発行・取得・列挙・失効を行う registry です。
///
/// kind（access / refresh）ごとの設定は構築時に与え、以後は変更できません。
/// すべての操作は非同期で、await ポイント以外で呼び出しスレッドを
/// ブロックしません。
///
/// ## English
///
/// Issues, retrieves, enumerates, and revokes tokens.
///
/// Per-kind (access / refresh) configuration is supplied at construction and
/// immutable thereafter. All operations are asynchronous and never block the
/// calling thread beyond an await point.
pub struct RTokenRegistry<S> {
    store: S,
    access: Option<RKindConfig>,
    refresh: Option<RKindConfig>,
    validator: RRecordValidator,
}

impl<S: TokenStore> RTokenRegistry<S> {
    /// ## 日本語
    ///
    /// 既定の設定（access: 上限 1 / 3600 秒、refresh: 上限 1 / 129600 秒）で
    /// registry を作成します。
    ///
    /// ## English
    ///
    /// Creates a registry with the default configurations (access: limit 1 /
    /// 3600 s, refresh: limit 1 / 129600 s).
    pub fn new(store: S) -> Self {
        Self::with_kinds(store, Some(RKindConfig::access()), Some(RKindConfig::refresh()))
    }

    /// ## 日本語
    ///
    /// kind ごとの設定を明示して registry を作成します。`None` の kind への
    /// 操作は [`RTokenError::UnsupportedKind`] で即座に失敗します。
    ///
    /// ## English
    ///
    /// Creates a registry with explicit per-kind configurations. Operations
    /// on a `None` kind fail fast with [`RTokenError::UnsupportedKind`].
    pub fn with_kinds(
        store: S,
        access: Option<RKindConfig>,
        refresh: Option<RKindConfig>,
    ) -> Self {
        Self {
            store,
            access,
            refresh,
            validator: RRecordValidator::opaque(),
        }
    }

    /// Returns the underlying store handle.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// ## 日本語
    ///
    /// kind の設定を返します。未設定の kind は
    /// [`RTokenError::UnsupportedKind`] です。
    ///
    /// ## English
    ///
    /// Returns the configuration for a kind, or
    /// [`RTokenError::UnsupportedKind`] when it was not configured.
    pub fn kind_config(&self, kind: TokenKind) -> Result<&RKindConfig, RTokenError> {
        let cfg = match kind {
            TokenKind::Access => self.access.as_ref(),
            TokenKind::Refresh => self.refresh.as_ref(),
        };
        cfg.ok_or(RTokenError::UnsupportedKind(kind))
    }

    fn generate_raw_token() -> String {
        let mut bytes = [0u8; RAW_TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    // 日本語: デコード + 構造検証。失敗はすべて「存在しない」に畳み込み、
    //        データ破損のシグナルとしてだけログに残す。
    // English: Decode + structural validation. Every failure folds into
    //          absence; it is only logged as a data-integrity signal.
    fn decode_validated(&self, key: &str, raw: &str) -> Option<RTokenRecord> {
        let value = match codec::decode_record(raw) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(key = %key, error = %err, "discarding token record that failed to decode");
                return None;
            }
        };
        if !self.validator.validate(&value) {
            tracing::debug!(key = %key, "discarding token record that failed structural validation");
            return None;
        }
        codec::record_from_value(value)
    }

    /// ## 日本語
    ///
    /// 新しい token を発行します。
    ///
    /// 各試行は次の流れです：membership の掃除 → 上限の強制（設定時）→
    /// raw token の生成（set に既存の key が出た場合は作り直し）→ SADD と
    /// set TTL の更新 → set key と token key を watch するトランザクションで
    /// メンバーシップと上限を再確認しつつレコードを TTL 付きで書き込み。
    /// conflict した試行は最初からやり直し、書き込まれなかった自分の
    /// メンバーシップは次の掃除が拾います。試行回数を使い切ると
    /// [`RTokenError::RetriesExhausted`] です。
    ///
    /// ## English
    ///
    /// Issues a new token.
    ///
    /// Each attempt: sweep memberships → enforce the limit (when configured)
    /// → generate a raw token (regenerating if its key is somehow already a
    /// member) → SADD and refresh the set TTL → one transaction watching the
    /// set key and the token key that re-checks membership and the limit,
    /// then writes the record with its TTL. A conflicted attempt restarts
    /// from the sweep; the dangling self-membership it may leave behind is
    /// collected by that sweep. Exhausting the attempt budget yields
    /// [`RTokenError::RetriesExhausted`].
    pub async fn issue(
        &self,
        identity: impl Into<RIdentity>,
        payload: Map<String, Value>,
        kind: TokenKind,
    ) -> Result<RTokenInfo, RTokenError> {
        let cfg = self.kind_config(kind)?;
        let identity = identity.into();
        let set_key = keys::identity_set_key(cfg, &identity);
        let record = RTokenRecord {
            payload,
            uid: identity,
            idf: uuid::Uuid::new_v4().simple().to_string(),
        };
        let encoded = codec::encode_record(&record)?;

        for _ in 0..MAX_TX_ATTEMPTS {
            reconcile(&self.store, &set_key).await?;
            if let Some(limit) = cfg.limit {
                enforce_limit(&self.store, &set_key, limit).await?;
            }

            // 日本語: 衝突（すでにメンバー）なら作り直す。生成だけで一意と
            //        見なしてはいけない。
            // English: Regenerate on collision (already a member); uniqueness
            //          by construction alone must not be assumed.
            let (raw_token, token_key) = loop {
                let raw = Self::generate_raw_token();
                let token_key = keys::token_key(cfg, &raw);
                if self.store.add_member(&set_key, &token_key).await? {
                    break (raw, token_key);
                }
            };
            self.store.expire(&set_key, cfg.expire_seconds).await?;

            let mut tx = self.store.begin().await?;
            tx.watch(&[set_key.clone(), token_key.clone()]).await?;
            let members = tx.members(&set_key).await?;
            // 日本語: メンバーから消えていれば並行の退避に取られている。
            //        上限超過はもう一方の並行発行が同時に滑り込んだ印で、
            //        どちらもこの試行を破棄する。
            // English: Gone from the set means a concurrent eviction took it.
            //          Exceeding the limit means another issuance slipped in
            //          concurrently. Either way this attempt is abandoned.
            let still_member = members.iter().any(|member| member == &token_key);
            let over_limit = cfg.limit.is_some_and(|limit| members.len() > limit);
            if !still_member || over_limit {
                tx.cancel().await?;
                continue;
            }
            tx.stage(StagedOp::SetValue {
                key: token_key.clone(),
                value: encoded.clone(),
                expire_seconds: cfg.expire_seconds,
            });
            if !tx.exec().await? {
                continue;
            }

            let expires_in = self.store.ttl(&token_key).await?.unwrap_or(0);
            return Ok(RTokenInfo {
                token: raw_token,
                expires_in,
                record,
            });
        }

        tracing::warn!(
            set_key = %set_key,
            attempts = MAX_TX_ATTEMPTS,
            "token issuance kept losing its transaction"
        );
        Err(RTokenError::RetriesExhausted {
            attempts: MAX_TX_ATTEMPTS,
        })
    }

    /// ## 日本語
    ///
    /// raw token からレコードを引きます。
    ///
    /// 存在しない・デコードできない・構造検証に落ちる・TTL が消えている、
    /// のいずれも `None` です（raw token しか持たない相手に内部状態を
    /// 漏らさないため）。
    ///
    /// ## English
    ///
    /// Looks up a token by its raw value.
    ///
    /// Absent, undecodable, structurally invalid, and vanished-TTL records
    /// all present as `None`, so a holder of only the raw token learns
    /// nothing about internal state.
    pub async fn get(
        &self,
        raw_token: &str,
        kind: TokenKind,
    ) -> Result<Option<RTokenInfo>, RTokenError> {
        let cfg = self.kind_config(kind)?;
        let token_key = keys::token_key(cfg, raw_token);

        let mut tx = self.store.begin().await?;
        tx.watch(&[token_key.clone()]).await?;
        let value = tx.get(&token_key).await?;
        let ttl = tx.ttl(&token_key).await?;
        tx.cancel().await?;

        let Some(value) = value else {
            return Ok(None);
        };
        let Some(record) = self.decode_validated(&token_key, &value) else {
            return Ok(None);
        };
        let Some(expires_in) = ttl else {
            return Ok(None);
        };
        Ok(Some(RTokenInfo {
            token: raw_token.to_string(),
            expires_in,
            record,
        }))
    }

    /// ## 日本語
    ///
    /// identity の live な token を `expires_in` 昇順で列挙します。
    ///
    /// 先に membership を掃除してから 1 トランザクション内で全メンバーを
    /// 読みます。デコード・検証に落ちたもの、残り TTL が 5 秒以下のものは
    /// 黙って読み飛ばします。
    ///
    /// ## English
    ///
    /// Enumerates an identity's live tokens, sorted ascending by
    /// `expires_in`.
    ///
    /// Memberships are swept first; all members are then read within one
    /// transaction. Entries that fail decode or validation, and entries with
    /// 5 seconds or less remaining, are silently skipped.
    pub async fn list_for_identity(
        &self,
        identity: impl Into<RIdentity>,
        kind: TokenKind,
    ) -> Result<Vec<RTokenInfo>, RTokenError> {
        let cfg = self.kind_config(kind)?;
        let identity = identity.into();
        let set_key = keys::identity_set_key(cfg, &identity);

        reconcile(&self.store, &set_key).await?;

        let mut tx = self.store.begin().await?;
        tx.watch(&[set_key.clone()]).await?;
        let members = tx.members(&set_key).await?;
        if members.is_empty() {
            tx.cancel().await?;
            return Ok(Vec::new());
        }
        tx.watch(&members).await?;

        let mut infos = Vec::new();
        for member in &members {
            let Some(value) = tx.get(member).await? else {
                continue;
            };
            let Some(record) = self.decode_validated(member, &value) else {
                continue;
            };
            let Some(expires_in) = tx.ttl(member).await? else {
                continue;
            };
            if expires_in <= LIST_TTL_GUARD_SECONDS {
                continue;
            }
            let Some(raw_token) = keys::raw_token_from_key(cfg, member) else {
                continue;
            };
            infos.push(RTokenInfo {
                token: raw_token.to_string(),
                expires_in,
                record,
            });
        }
        tx.cancel().await?;

        infos.sort_by_key(|info| info.expires_in);
        Ok(infos)
    }

    /// ## 日本語
    ///
    /// レコードだけを削除して token を失効させます。
    ///
    /// set のメンバーシップは急いで外しません（往復を減らすため）。残った
    /// メンバーシップは次の掃除が外します。冪等です。
    ///
    /// ## English
    ///
    /// Revokes a token by deleting its record only.
    ///
    /// The set membership is not eagerly removed (fewer round trips); the
    /// dangling membership is cleared by the next sweep. Idempotent.
    pub async fn revoke_one(&self, raw_token: &str, kind: TokenKind) -> Result<(), RTokenError> {
        let cfg = self.kind_config(kind)?;
        let token_key = keys::token_key(cfg, raw_token);
        self.store.delete(&[token_key]).await?;
        Ok(())
    }

    /// ## 日本語
    ///
    /// identity の token をまとめて失効させます。
    ///
    /// `subset` が与えられた（かつ空でない）場合は現在のメンバーとの共通
    /// 部分だけを、省略された場合は全メンバーを、レコードとメンバーシップ
    /// の両方まとめてアトミックに削除します。単趟操作なので、conflict は
    /// [`RTokenError::TransientStore`] として呼び出し側に返します。
    ///
    /// ## English
    ///
    /// Revokes an identity's tokens in bulk.
    ///
    /// With a non-empty `subset`, only its intersection with the current
    /// members is deleted; without one, every member is. Records and
    /// memberships go atomically together. This is single-pass: a conflict
    /// surfaces as [`RTokenError::TransientStore`].
    pub async fn revoke_all_for_identity(
        &self,
        identity: impl Into<RIdentity>,
        kind: TokenKind,
        subset: Option<&[String]>,
    ) -> Result<(), RTokenError> {
        let cfg = self.kind_config(kind)?;
        let identity = identity.into();
        let set_key = keys::identity_set_key(cfg, &identity);

        let mut tx = self.store.begin().await?;
        tx.watch(&[set_key.clone()]).await?;
        let members = tx.members(&set_key).await?;
        if members.is_empty() {
            tx.cancel().await?;
            return Ok(());
        }

        let doomed: Vec<String> = match subset {
            None => members,
            Some(raw_tokens) if raw_tokens.is_empty() => members,
            Some(raw_tokens) => raw_tokens
                .iter()
                .map(|raw| keys::token_key(cfg, raw))
                .filter(|token_key| members.contains(token_key))
                .collect(),
        };
        if doomed.is_empty() {
            tx.cancel().await?;
            return Ok(());
        }

        tx.stage(StagedOp::RemoveMembers {
            key: set_key.clone(),
            members: doomed.clone(),
        });
        tx.stage(StagedOp::Delete { keys: doomed });
        if !tx.exec().await? {
            return Err(RTokenError::TransientStore);
        }
        Ok(())
    }

    /// ## 日本語
    ///
    /// kind が分からない raw 値に対して、設定済みの全 kind の token key を
    /// 並列に削除します。
    ///
    /// ## English
    ///
    /// For a raw value whose kind is not known in advance, deletes the
    /// derived token key under every configured kind, in parallel.
    pub async fn revoke_both_kinds(&self, raw_token: &str) -> Result<(), RTokenError> {
        let access = async {
            if let Some(cfg) = self.access.as_ref() {
                self.store
                    .delete(&[keys::token_key(cfg, raw_token)])
                    .await?;
            }
            Ok::<(), RTokenError>(())
        };
        let refresh = async {
            if let Some(cfg) = self.refresh.as_ref() {
                self.store
                    .delete(&[keys::token_key(cfg, raw_token)])
                    .await?;
            }
            Ok::<(), RTokenError>(())
        };
        tokio::try_join!(access, refresh)?;
        Ok(())
    }

    /// Issues an access token. See [`RTokenRegistry::issue`].
    pub async fn issue_access_token(
        &self,
        identity: impl Into<RIdentity>,
        payload: Map<String, Value>,
    ) -> Result<RTokenInfo, RTokenError> {
        self.issue(identity, payload, TokenKind::Access).await
    }

    /// Issues a refresh token. See [`RTokenRegistry::issue`].
    pub async fn issue_refresh_token(
        &self,
        identity: impl Into<RIdentity>,
        payload: Map<String, Value>,
    ) -> Result<RTokenInfo, RTokenError> {
        self.issue(identity, payload, TokenKind::Refresh).await
    }

    /// Looks up an access token. See [`RTokenRegistry::get`].
    pub async fn get_access_token(
        &self,
        raw_token: &str,
    ) -> Result<Option<RTokenInfo>, RTokenError> {
        self.get(raw_token, TokenKind::Access).await
    }

    /// Looks up a refresh token. See [`RTokenRegistry::get`].
    pub async fn get_refresh_token(
        &self,
        raw_token: &str,
    ) -> Result<Option<RTokenInfo>, RTokenError> {
        self.get(raw_token, TokenKind::Refresh).await
    }

    /// Enumerates an identity's access tokens. See
    /// [`RTokenRegistry::list_for_identity`].
    pub async fn list_access_tokens(
        &self,
        identity: impl Into<RIdentity>,
    ) -> Result<Vec<RTokenInfo>, RTokenError> {
        self.list_for_identity(identity, TokenKind::Access).await
    }

    /// Enumerates an identity's refresh tokens. See
    /// [`RTokenRegistry::list_for_identity`].
    pub async fn list_refresh_tokens(
        &self,
        identity: impl Into<RIdentity>,
    ) -> Result<Vec<RTokenInfo>, RTokenError> {
        self.list_for_identity(identity, TokenKind::Refresh).await
    }

    /// Revokes one access token. See [`RTokenRegistry::revoke_one`].
    pub async fn revoke_access_token(&self, raw_token: &str) -> Result<(), RTokenError> {
        self.revoke_one(raw_token, TokenKind::Access).await
    }

    /// Revokes one refresh token. See [`RTokenRegistry::revoke_one`].
    pub async fn revoke_refresh_token(&self, raw_token: &str) -> Result<(), RTokenError> {
        self.revoke_one(raw_token, TokenKind::Refresh).await
    }

    /// Revokes an identity's access tokens in bulk. See
    /// [`RTokenRegistry::revoke_all_for_identity`].
    pub async fn revoke_all_access(
        &self,
        identity: impl Into<RIdentity>,
        subset: Option<&[String]>,
    ) -> Result<(), RTokenError> {
        self.revoke_all_for_identity(identity, TokenKind::Access, subset)
            .await
    }

    /// Revokes an identity's refresh tokens in bulk. See
    /// [`RTokenRegistry::revoke_all_for_identity`].
    pub async fn revoke_all_refresh(
        &self,
        identity: impl Into<RIdentity>,
        subset: Option<&[String]>,
    ) -> Result<(), RTokenError> {
        self.revoke_all_for_identity(identity, TokenKind::Refresh, subset)
            .await
    }
}
