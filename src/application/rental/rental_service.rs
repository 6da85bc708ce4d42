use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument};

use crate::config::RentalSettings;
use crate::domain::{RentalRecord, commands::RentalRequest, rental};
use crate::ports::{RemoteStateStore, StoreError, WriteAck};

use super::errors::{RentalError, Result};
use super::retry::RetryPolicy;
use super::transaction_guard::IdempotentTransactionGuard;

/// レンタル取引マネージャ
///
/// 検証 → 重複ガード → 期間計算 → リモート書き込み → 結果報告 を順に行う。
/// 複製は安価（内部はArc）で、ハンドラ間で共有できる。
#[derive(Clone)]
pub struct RentalTransactionManager {
    store: Arc<dyn RemoteStateStore>,
    guard: Arc<IdempotentTransactionGuard>,
    retry: RetryPolicy,
    settings: Arc<RentalSettings>,
}

impl RentalTransactionManager {
    pub fn new(store: Arc<dyn RemoteStateStore>, settings: RentalSettings) -> Self {
        let guard = Arc::new(IdempotentTransactionGuard::new(
            store.clone(),
            settings.pending_timeout,
            settings.stale_pending_after,
        ));
        Self {
            store,
            guard,
            retry: RetryPolicy::from_settings(&settings),
            settings: Arc::new(settings),
        }
    }

    pub fn guard(&self) -> &IdempotentTransactionGuard {
        &self.guard
    }

    pub fn settings(&self) -> &RentalSettings {
        &self.settings
    }

    /// 書籍をレンタルする
    ///
    /// 入力検証は呼び出し元で即座に行う。受け付けた取引はバックグラウンドタスクで
    /// 実行されるため、呼び出し側がこのFutureを破棄しても取引は終端状態
    /// （Active / Failed）まで進む。
    ///
    /// # エラー
    /// - Validation: 入力不正
    /// - DuplicateRental: 同じ(ユーザー, 書籍)のレンタルが処理中または既存
    /// - RemoteWrite: 再試行の上限まで書き込みに失敗（記録は Failed に遷移）
    #[instrument(
        skip(self, request),
        fields(user_id = %request.user_id, isbn13 = %request.book.isbn13())
    )]
    pub async fn rent(&self, request: RentalRequest) -> Result<RentalRecord> {
        // 1. 入力検証（ローカル・即時）
        rental::validate_request(&request, &self.settings.pricing)?;

        let manager = self.clone();
        let transaction = tokio::spawn(async move { manager.run_guarded(request).await });

        transaction
            .await
            .map_err(|e| RentalError::Interrupted(e.to_string()))?
    }

    async fn run_guarded(&self, request: RentalRequest) -> Result<RentalRecord> {
        let user_id = request.user_id.clone();
        let isbn13 = request.book.isbn13().clone();

        // 2. 重複ガード。リースはこのタスクが終わるまで保持し、すべての経路で破棄時に解除される
        let _lease = match self.guard.lease(&user_id, &isbn13).await {
            Ok(lease) => lease,
            Err(reason) => {
                info!(%reason, "Rental rejected as duplicate");
                return Err(RentalError::DuplicateRental { reason });
            }
        };

        self.execute(&request).await
    }

    async fn execute(&self, request: &RentalRequest) -> Result<RentalRecord> {
        // 3. 期間・料金を計算して Pending の記録を生成
        let pending = rental::open_rental(request, &self.settings.pricing)?;

        // 4. Pending を冪等キー付きで書き込む
        if let Err(source) = self.persist(&pending).await {
            self.mark_failed(&pending).await;
            return Err(RentalError::RemoteWrite {
                rental_id: pending.id,
                source,
            });
        }

        // 5. Active へ遷移（2回目の確定書き込み）
        let active = rental::activate(&pending, Utc::now())?;
        if let Err(source) = self.persist(&active).await {
            self.mark_failed(&pending).await;
            return Err(RentalError::RemoteWrite {
                rental_id: pending.id,
                source,
            });
        }

        info!(
            rental_id = %active.id,
            start_date = %active.start_date,
            due_date = %active.due_date,
            fee_cents = active.fee.cents(),
            "Rental activated"
        );
        Ok(active)
    }

    async fn persist(&self, record: &RentalRecord) -> std::result::Result<WriteAck, StoreError> {
        let key = record.idempotency_key();
        self.retry
            .run("write_rental", || self.store.write_rental(record, &key))
            .await
    }

    /// Failed への遷移を書き込む
    ///
    /// これも失敗した場合、記録は Pending のまま残るが、
    /// `stale_pending_after`経過後は新規レンタルを妨げない。
    async fn mark_failed(&self, pending: &RentalRecord) {
        let failed = match rental::fail(pending, Utc::now()) {
            Ok(failed) => failed,
            Err(err) => {
                error!(rental_id = %pending.id, error = %err, "Cannot mark rental as failed");
                return;
            }
        };

        match self.persist(&failed).await {
            Ok(_) => info!(rental_id = %failed.id, "Rental marked as failed"),
            Err(err) => error!(
                rental_id = %failed.id,
                error = %err,
                "Failed to record rental failure; record stays pending until stale"
            ),
        }
    }
}
