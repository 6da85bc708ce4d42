use thiserror::Error;

use super::RentalStatus;

/// レンタル期間計算のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RentalWindowError {
    /// 日数が0以下
    #[error("rental duration must be positive (got {0} days)")]
    InvalidDuration(i64),
    /// 日数が上限を超えている
    #[error("rental duration of {days} days exceeds the maximum of {max} days")]
    DurationTooLong { days: i64, max: i64 },
    /// 料金の計算結果が表現できる範囲を超えた
    #[error("rental fee for {days} days is out of range")]
    FeeOverflow { days: i64 },
}

/// レンタル申請の検証エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RentalValidationError {
    #[error("isbn13 must not be empty")]
    EmptyIsbn,
    #[error("user_id must not be empty")]
    EmptyUserId,
    #[error(transparent)]
    Window(#[from] RentalWindowError),
}

/// レンタル状態遷移のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RentalTransitionError {
    /// 既に終端状態（Active / Failed）
    #[error("rental is already in terminal state {0:?}")]
    AlreadyTerminal(RentalStatus),
}
