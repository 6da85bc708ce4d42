use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::value_objects::{Isbn13, RentalId, UserId};
use crate::ports::RemoteStateStore;

/// 進行中のレンタル操作のキー
type OperationKey = (UserId, Isbn13);

/// 進行中操作の保持者
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holder {
    /// `acquire`の呼び出し元。`release`されなければ`pending_timeout`で期限切れ
    Caller,
    /// `RentalLease`。リースが破棄されるまで期限切れにならない
    Lease,
}

/// 進行中操作の記録（メモリ上のみ）
///
/// 完了時（release / リースの破棄）または有効期限切れで削除される。
#[derive(Debug, Clone, Copy)]
struct PendingOperation {
    token: u64,
    acquired_at: Instant,
    holder: Holder,
}

impl PendingOperation {
    fn is_live(&self, now: Instant, pending_timeout: Duration) -> bool {
        match self.holder {
            Holder::Lease => true,
            Holder::Caller => now.duration_since(self.acquired_at) < pending_timeout,
        }
    }
}

/// `acquire`で登録した進行中操作の所有権
///
/// `release`に渡す。期限切れ後に別の呼び出し元が取得したエントリは解除しない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationToken(u64);

/// 取得が拒否された理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// 同じキーの操作が処理中
    InFlight,
    /// Pending / Active の記録がリモートに既に存在する
    AlreadyRented(RentalId),
    /// リモートでの存在確認に失敗した（フェイルクローズ）
    CheckFailed,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::InFlight => f.write_str("a rental for this book is in flight"),
            DenialReason::AlreadyRented(id) => write!(f, "rental {} is already open", id),
            DenialReason::CheckFailed => f.write_str("could not verify existing rentals"),
        }
    }
}

/// 取得の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    Acquired(OperationToken),
    Denied(DenialReason),
}

impl Acquisition {
    pub fn is_acquired(&self) -> bool {
        matches!(self, Acquisition::Acquired(_))
    }
}

/// 取引タスクが保持する進行中操作
///
/// 破棄（正常終了・エラー・panicによる巻き戻しのいずれでも）で解除される。
/// 保持している間、同じキーの取得は必ず拒否される。
pub struct RentalLease {
    guard: Arc<IdempotentTransactionGuard>,
    key: OperationKey,
    token: u64,
}

impl Drop for RentalLease {
    fn drop(&mut self) {
        self.guard.remove_if_owned(&self.key, self.token);
    }
}

#[derive(Default)]
struct Registry {
    next_token: u64,
    operations: HashMap<OperationKey, PendingOperation>,
}

/// 重複レンタル防止ガード
///
/// 同じ(ユーザー, 書籍)への並行・連続したレンタル申請が
/// 2件のレンタル記録を生まないようにする。
///
/// - `acquire` / `release`: 呼び出し元が解除する。解除されなければ`pending_timeout`で期限切れ
/// - `lease`: 取引タスク用。リースが生きている限り期限切れにならない
pub struct IdempotentTransactionGuard {
    store: Arc<dyn RemoteStateStore>,
    registry: Mutex<Registry>,
    pending_timeout: Duration,
    stale_pending_after: chrono::Duration,
}

impl IdempotentTransactionGuard {
    pub fn new(
        store: Arc<dyn RemoteStateStore>,
        pending_timeout: Duration,
        stale_pending_after: Duration,
    ) -> Self {
        Self {
            store,
            registry: Mutex::new(Registry::default()),
            pending_timeout,
            stale_pending_after: chrono::Duration::from_std(stale_pending_after)
                .unwrap_or(chrono::Duration::MAX),
        }
    }

    /// 取得を試みる（真偽値のみ）
    pub async fn try_acquire(&self, user_id: &UserId, isbn13: &Isbn13) -> bool {
        self.acquire(user_id, isbn13).await.is_acquired()
    }

    /// 取得を試み、拒否理由も返す
    ///
    /// 1. 進行中の操作があれば拒否
    /// 2. 進行中操作として登録
    /// 3. リモートに Pending / Active の記録があれば登録を取り消して拒否
    /// 4. リモートの確認自体が失敗した場合も拒否（重複の危険を冒さない）
    pub async fn acquire(&self, user_id: &UserId, isbn13: &Isbn13) -> Acquisition {
        let key = (user_id.clone(), isbn13.clone());
        let token = match self.register(&key, Holder::Caller) {
            Ok(token) => token,
            Err(reason) => return Acquisition::Denied(reason),
        };

        match self.check_remote(&key, token).await {
            Ok(()) => Acquisition::Acquired(OperationToken(token)),
            Err(reason) => Acquisition::Denied(reason),
        }
    }

    /// 取引タスク用に取得する
    ///
    /// 判定は`acquire`と同じ。返されたリースを破棄するまでエントリは残る。
    pub async fn lease(
        self: &Arc<Self>,
        user_id: &UserId,
        isbn13: &Isbn13,
    ) -> Result<RentalLease, DenialReason> {
        let key = (user_id.clone(), isbn13.clone());
        let token = self.register(&key, Holder::Lease)?;
        let lease = RentalLease {
            guard: Arc::clone(self),
            key,
            token,
        };

        self.check_remote(&lease.key, token).await?;
        Ok(lease)
    }

    /// `acquire`で登録した進行中操作を解除する（結果に関わらず）
    ///
    /// 期限切れ後に別の呼び出し元が登録し直したエントリには触れない。
    pub fn release(&self, user_id: &UserId, isbn13: &Isbn13, token: OperationToken) {
        let key = (user_id.clone(), isbn13.clone());
        self.remove_if_owned(&key, token.0);
    }

    /// 進行中の操作があるか（期限切れは含まない）
    pub fn is_pending(&self, user_id: &UserId, isbn13: &Isbn13) -> bool {
        let key = (user_id.clone(), isbn13.clone());
        let now = Instant::now();
        self.lock()
            .operations
            .get(&key)
            .is_some_and(|op| op.is_live(now, self.pending_timeout))
    }

    fn register(&self, key: &OperationKey, holder: Holder) -> Result<u64, DenialReason> {
        let (user_id, isbn13) = key;
        let mut registry = self.lock();
        let now = Instant::now();

        if let Some(existing) = registry.operations.get(key) {
            if existing.is_live(now, self.pending_timeout) {
                debug!(%user_id, %isbn13, "Rental already in flight");
                return Err(DenialReason::InFlight);
            }
            warn!(%user_id, %isbn13, "Pending rental operation expired");
        }

        registry.next_token += 1;
        let token = registry.next_token;
        registry.operations.insert(
            key.clone(),
            PendingOperation {
                token,
                acquired_at: now,
                holder,
            },
        );
        Ok(token)
    }

    async fn check_remote(&self, key: &OperationKey, token: u64) -> Result<(), DenialReason> {
        let (user_id, isbn13) = key;
        match self.store.get_active_rental(user_id, isbn13).await {
            Ok(Some(record)) if record.blocks_new_rental(Utc::now(), self.stale_pending_after) => {
                self.remove_if_owned(key, token);
                debug!(%user_id, %isbn13, rental_id = %record.id, "Open rental already exists");
                Err(DenialReason::AlreadyRented(record.id))
            }
            Ok(_) => Ok(()),
            Err(err) => {
                self.remove_if_owned(key, token);
                warn!(%user_id, %isbn13, error = %err, "Existing rental check failed, denying");
                Err(DenialReason::CheckFailed)
            }
        }
    }

    fn remove_if_owned(&self, key: &OperationKey, token: u64) {
        let mut registry = self.lock();
        if registry
            .operations
            .get(key)
            .is_some_and(|op| op.token == token)
        {
            registry.operations.remove(key);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        // 登録簿の更新は途中でpanicしないため、poisonでも内容は整合している
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
