use crate::domain::{RentalTransitionError, RentalValidationError, value_objects::RentalId};
use crate::ports::StoreError;
use thiserror::Error;

use super::transaction_guard::DenialReason;

/// レンタル取引アプリケーション層のエラー
#[derive(Debug, Error)]
pub enum RentalError {
    /// 入力不正（再試行しない）
    #[error("Invalid rental request: {0}")]
    Validation(#[from] RentalValidationError),

    /// 同じ(ユーザー, 書籍)のレンタルが処理中、または既に存在する
    ///
    /// 入力エラーではなく、並行アクセスに対する正当な拒否。
    #[error("Rental already processing ({reason})")]
    DuplicateRental { reason: DenialReason },

    /// 再試行の上限までリモート書き込みに失敗した
    #[error("Failed to persist rental {rental_id}")]
    RemoteWrite {
        rental_id: RentalId,
        #[source]
        source: StoreError,
    },

    /// 状態遷移の不整合
    #[error("Invalid rental state: {0}")]
    InvalidState(#[from] RentalTransitionError),

    /// バックグラウンドの取引タスクが完了しなかった
    #[error("Rental transaction interrupted: {0}")]
    Interrupted(String),
}

/// アプリケーション層の Result型
pub type Result<T> = std::result::Result<T, RentalError>;
