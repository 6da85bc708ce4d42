use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BookRef, UserId};

/// コマンド：書籍をレンタルする
///
/// 送信時に呼び出し側が生成し、1回だけ消費される。
/// 開始日と返却期限は`requested_at`のみから算出する（表示用の日付と
/// 実際の取引日付を別々に組み立てない）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalRequest {
    pub user_id: UserId,
    pub book: BookRef,
    pub requested_at: DateTime<Utc>,
    pub duration_days: i64,
    pub label: String,
}

impl RentalRequest {
    pub fn new(
        user_id: UserId,
        book: BookRef,
        requested_at: DateTime<Utc>,
        duration_days: i64,
        label: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            book,
            requested_at,
            duration_days,
            label: label.into(),
        }
    }
}
