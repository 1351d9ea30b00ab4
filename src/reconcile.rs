//! ## 日本語
//!
//! identity の token-membership set を遅延クリーンアップします。
//!
//! レコード側は TTL で勝手に消えるため、set には消えた token key を指す
//! メンバーが残り得ます。これは一時的なゴミであって恒久的な不整合では
//! なく、上限チェックや列挙の前にここで機会的に掃除されます。
//!
//! ## English
//!
//! Lazy cleanup of an identity's token-membership set.
//!
//! Records expire on their own through TTLs, so the set can hold members
//! pointing at token keys that no longer exist. Those are transient garbage,
//! not permanent inconsistency, and are swept here opportunistically before
//! any limit check or enumeration.

use crate::models::RTokenError;
use crate::store::{StagedOp, StoreTransaction, TokenStore};

/// Attempt budget shared by the optimistic-transaction loops.
pub(crate) const MAX_TX_ATTEMPTS: usize = 10;

/// ## 日本語
///
/// set のメンバーのうち、対応する token key がすでに存在しないものを取り
/// 除きます。set が空、または全メンバーが健在なら何もしません。
///
/// 掃除は機会的なので、conflict が続いた場合は諦めて正常終了します（次の
/// 呼び出しがやり直します）。
///
/// ## English
///
/// Removes set members whose token key no longer exists. No-op when the set
/// is empty or every member is still alive.
///
/// The sweep is opportunistic: persistent conflicts give up successfully and
/// leave the work for the next call.
pub(crate) async fn reconcile<S: TokenStore>(store: &S, set_key: &str) -> Result<(), RTokenError> {
    for _ in 0..MAX_TX_ATTEMPTS {
        let mut tx = store.begin().await?;
        tx.watch(&[set_key.to_string()]).await?;
        let members = tx.members(set_key).await?;
        if members.is_empty() {
            tx.cancel().await?;
            return Ok(());
        }
        tx.watch(&members).await?;

        let mut stale = Vec::new();
        for member in &members {
            if !tx.exists(member).await? {
                stale.push(member.clone());
            }
        }
        if stale.is_empty() {
            tx.cancel().await?;
            return Ok(());
        }

        tx.stage(StagedOp::RemoveMembers {
            key: set_key.to_string(),
            members: stale.clone(),
        });
        if tx.exec().await? {
            tracing::debug!(
                set_key = %set_key,
                removed = stale.len(),
                "reconciled expired token memberships"
            );
            return Ok(());
        }
    }
    Ok(())
}

/// ## 日本語
///
/// メンバー数が `limit` 以上のとき、残り TTL が最も短いもの（同値なら
/// token key の昇順）から `count - limit + 1` 個を、レコードとメンバーシップ
/// の両方まとめてアトミックに削除します。
///
/// limit が現在のメンバー数より低く設定し直された場合は、一回の呼び出しで
/// 複数エントリが退避されます。
///
/// ## English
///
/// When the member count is at or above `limit`, atomically deletes both the
/// records and the memberships of the `count - limit + 1` members with the
/// smallest remaining TTL (ties broken by ascending token key).
///
/// If the limit was lowered below the current live count, a single call
/// evicts multiple entries.
pub(crate) async fn enforce_limit<S: TokenStore>(
    store: &S,
    set_key: &str,
    limit: usize,
) -> Result<(), RTokenError> {
    for _ in 0..MAX_TX_ATTEMPTS {
        let mut tx = store.begin().await?;
        tx.watch(&[set_key.to_string()]).await?;
        let members = tx.members(set_key).await?;
        if members.is_empty() || members.len() < limit {
            tx.cancel().await?;
            return Ok(());
        }
        tx.watch(&members).await?;

        // 日本語: TTL 昇順（同値は key 昇順）に並べる。消えた直後のメンバー
        //        は TTL を -2 扱いにして先頭に寄せる（削除は no-op、
        //        メンバーシップだけ外れる）。
        // English: Order by TTL ascending, then key ascending. A member that
        //          just vanished ranks first with TTL -2; deleting it is a
        //          no-op and only its membership goes away.
        let mut ranked = Vec::with_capacity(members.len());
        for member in &members {
            let ttl = tx.ttl(member).await?.unwrap_or(-2);
            ranked.push((ttl, member.clone()));
        }
        ranked.sort();

        let evict_count = members.len() - limit + 1;
        let doomed: Vec<String> = ranked
            .into_iter()
            .take(evict_count)
            .map(|(_, member)| member)
            .collect();

        tx.stage(StagedOp::Delete {
            keys: doomed.clone(),
        });
        tx.stage(StagedOp::RemoveMembers {
            key: set_key.to_string(),
            members: doomed.clone(),
        });
        if tx.exec().await? {
            tracing::debug!(
                set_key = %set_key,
                evicted = doomed.len(),
                "evicted tokens over the per-identity limit"
            );
            return Ok(());
        }
    }
    tracing::warn!(
        set_key = %set_key,
        attempts = MAX_TX_ATTEMPTS,
        "limit enforcement kept losing its transaction"
    );
    Err(RTokenError::RetriesExhausted {
        attempts: MAX_TX_ATTEMPTS,
    })
}
