use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{
    IdempotencyKey, Isbn13, RentalFee, RentalId, RentalTransitionError, RentalValidationError,
    RentalWindowError, UserId, commands::RentalRequest,
};

/// レンタル期間の上限（日数）のデフォルト値
pub const DEFAULT_MAX_DURATION_DAYS: i64 = 365;

/// レンタル状態
///
/// Pending → Active（成功）または Pending → Failed（再試行の上限到達）。
/// Active と Failed は終端状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RentalStatus {
    Pending,
    Active,
    Failed,
}

impl RentalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RentalStatus::Pending => "pending",
            RentalStatus::Active => "active",
            RentalStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RentalStatus::Active | RentalStatus::Failed)
    }

    /// 同じ(ユーザー, 書籍)の新規レンタルを妨げる状態か
    pub fn is_open(&self) -> bool {
        matches!(self, RentalStatus::Pending | RentalStatus::Active)
    }
}

impl std::str::FromStr for RentalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RentalStatus::Pending),
            "active" => Ok(RentalStatus::Active),
            "failed" => Ok(RentalStatus::Failed),
            _ => Err(format!("Invalid rental status: {}", s)),
        }
    }
}

/// レンタル期間 [start_date, due_date)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalWindow {
    pub start_date: NaiveDate,
    pub due_date: NaiveDate,
}

impl RentalWindow {
    /// 期間の日数
    pub fn days(&self) -> i64 {
        (self.due_date - self.start_date).num_days()
    }
}

/// 料金体系
///
/// 料金 = 基本料金 + 日額 × 日数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalPricing {
    pub flat_fee_cents: i64,
    pub daily_fee_cents: i64,
    pub max_duration_days: i64,
}

impl Default for RentalPricing {
    fn default() -> Self {
        Self {
            flat_fee_cents: 100,
            daily_fee_cents: 0,
            max_duration_days: DEFAULT_MAX_DURATION_DAYS,
        }
    }
}

/// 純粋関数：レンタル期間を計算する
///
/// 開始日は`requested_at`を日単位（UTC）に切り捨てた日付。
/// 返却期限は開始日 + `duration_days`。
pub fn compute_window(
    requested_at: DateTime<Utc>,
    duration_days: i64,
) -> Result<RentalWindow, RentalWindowError> {
    if duration_days <= 0 {
        return Err(RentalWindowError::InvalidDuration(duration_days));
    }

    let start_date = requested_at.date_naive();
    let due_date = Duration::try_days(duration_days)
        .and_then(|span| start_date.checked_add_signed(span))
        .ok_or(RentalWindowError::DurationTooLong {
            days: duration_days,
            max: (NaiveDate::MAX - start_date).num_days(),
        })?;

    Ok(RentalWindow {
        start_date,
        due_date,
    })
}

/// 純粋関数：料金を計算する
pub fn compute_fee(
    pricing: &RentalPricing,
    duration_days: i64,
) -> Result<RentalFee, RentalWindowError> {
    if duration_days <= 0 {
        return Err(RentalWindowError::InvalidDuration(duration_days));
    }
    if duration_days > pricing.max_duration_days {
        return Err(RentalWindowError::DurationTooLong {
            days: duration_days,
            max: pricing.max_duration_days,
        });
    }

    pricing
        .daily_fee_cents
        .checked_mul(duration_days)
        .and_then(|daily| daily.checked_add(pricing.flat_fee_cents))
        .map(RentalFee::from_cents)
        .ok_or(RentalWindowError::FeeOverflow {
            days: duration_days,
        })
}

/// 純粋関数：レンタル申請を検証する
pub fn validate_request(
    request: &RentalRequest,
    pricing: &RentalPricing,
) -> Result<(), RentalValidationError> {
    if request.book.isbn13().is_blank() {
        return Err(RentalValidationError::EmptyIsbn);
    }
    if request.user_id.is_blank() {
        return Err(RentalValidationError::EmptyUserId);
    }
    if request.duration_days <= 0 {
        return Err(RentalWindowError::InvalidDuration(request.duration_days).into());
    }
    if request.duration_days > pricing.max_duration_days {
        return Err(RentalWindowError::DurationTooLong {
            days: request.duration_days,
            max: pricing.max_duration_days,
        }
        .into());
    }
    compute_fee(pricing, request.duration_days)?;
    Ok(())
}

/// レンタル記録
///
/// 不変条件：(user_id, isbn13) ごとに Pending / Active の記録は高々1件。
/// RentalTransactionManager が生成し、以降はリモートストアが所有する。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalRecord {
    pub id: RentalId,
    pub user_id: UserId,
    pub isbn13: Isbn13,
    pub title: String,
    pub start_date: NaiveDate,
    pub due_date: NaiveDate,
    pub fee: RentalFee,
    pub label: String,
    pub status: RentalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RentalRecord {
    /// この状態を書き込む際の冪等キー
    ///
    /// 状態遷移ごとに別キーとなるため、Pending の再送と Active への遷移は区別される。
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::new(format!("{}:{}", self.id, self.status.as_str()))
    }

    /// 新規レンタルを妨げるか
    ///
    /// `stale_after`より古い Pending は放棄されたものとみなす。
    pub fn blocks_new_rental(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        match self.status {
            RentalStatus::Active => true,
            RentalStatus::Pending => now - self.updated_at < stale_after,
            RentalStatus::Failed => false,
        }
    }
}

/// 純粋関数：Pending 状態のレンタル記録を生成する
///
/// 副作用なし。IDはここで採番される。
pub fn open_rental(
    request: &RentalRequest,
    pricing: &RentalPricing,
) -> Result<RentalRecord, RentalValidationError> {
    validate_request(request, pricing)?;

    let window = compute_window(request.requested_at, request.duration_days)?;
    let fee = compute_fee(pricing, request.duration_days)?;

    Ok(RentalRecord {
        id: RentalId::new(),
        user_id: request.user_id.clone(),
        isbn13: request.book.isbn13().clone(),
        title: request.book.title().to_string(),
        start_date: window.start_date,
        due_date: window.due_date,
        fee,
        label: request.label.clone(),
        status: RentalStatus::Pending,
        created_at: request.requested_at,
        updated_at: request.requested_at,
    })
}

/// 純粋関数：Pending → Active
pub fn activate(
    record: &RentalRecord,
    at: DateTime<Utc>,
) -> Result<RentalRecord, RentalTransitionError> {
    transition(record, RentalStatus::Active, at)
}

/// 純粋関数：Pending → Failed
pub fn fail(
    record: &RentalRecord,
    at: DateTime<Utc>,
) -> Result<RentalRecord, RentalTransitionError> {
    transition(record, RentalStatus::Failed, at)
}

fn transition(
    record: &RentalRecord,
    to: RentalStatus,
    at: DateTime<Utc>,
) -> Result<RentalRecord, RentalTransitionError> {
    if record.status.is_terminal() {
        return Err(RentalTransitionError::AlreadyTerminal(record.status));
    }

    Ok(RentalRecord {
        status: to,
        updated_at: at,
        ..record.clone()
    })
}
