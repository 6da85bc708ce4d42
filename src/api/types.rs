use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::application::book_detail::{BookDetail, Description};
use crate::config::RentalSettings;
use crate::domain::{
    RentalRecord,
    commands::RentalRequest,
    value_objects::{BookRef, Isbn13, UserId},
};

/// レンタル作成リクエスト（POST /rentals）
#[derive(Debug, Clone, Deserialize)]
pub struct RentBookRequest {
    pub user_id: String,
    pub isbn13: String,
    pub title: String,
    /// 省略時は設定のデフォルト日数
    pub duration_days: Option<i64>,
    /// 省略時は設定のデフォルトラベル
    pub label: Option<String>,
}

impl RentBookRequest {
    /// コマンドに変換する
    ///
    /// 申請時刻はサーバー側で付与する。開始日・返却期限はここから一意に決まる。
    pub fn to_command(&self, settings: &RentalSettings, now: DateTime<Utc>) -> RentalRequest {
        RentalRequest::new(
            UserId::new(self.user_id.clone()),
            BookRef::new(Isbn13::new(self.isbn13.clone()), self.title.clone()),
            now,
            self.duration_days.unwrap_or(settings.default_duration_days),
            self.label
                .clone()
                .unwrap_or_else(|| settings.default_label.clone()),
        )
    }
}

/// レンタルレスポンス
#[derive(Debug, Serialize, Deserialize)]
pub struct RentalResponse {
    pub rental_id: Uuid,
    pub user_id: String,
    pub isbn13: String,
    pub title: String,
    pub start_date: NaiveDate,
    pub due_date: NaiveDate,
    pub fee_cents: i64,
    pub label: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl From<RentalRecord> for RentalResponse {
    fn from(record: RentalRecord) -> Self {
        Self {
            rental_id: record.id.value(),
            user_id: record.user_id.to_string(),
            isbn13: record.isbn13.to_string(),
            title: record.title,
            start_date: record.start_date,
            due_date: record.due_date,
            fee_cents: record.fee.cents(),
            label: record.label,
            status: record.status.as_str().to_string(),
            created_at: record.created_at,
        }
    }
}

/// お気に入りレスポンス
#[derive(Debug, Serialize, Deserialize)]
pub struct FavoriteResponse {
    pub user_id: String,
    pub isbn13: String,
    pub is_favorite: bool,
}

/// 書籍詳細のクエリパラメータ
#[derive(Debug, Deserialize)]
pub struct BookDetailQuery {
    pub user_id: Option<String>,
    pub title: Option<String>,
}

/// 書籍詳細レスポンス
#[derive(Debug, Serialize)]
pub struct BookDetailResponse {
    pub isbn13: String,
    pub title: String,
    pub description: Description,
    pub is_favorite: bool,
}

impl From<BookDetail> for BookDetailResponse {
    fn from(detail: BookDetail) -> Self {
        Self {
            isbn13: detail.book.isbn13().to_string(),
            title: detail.book.title().to_string(),
            description: detail.description,
            is_favorite: detail.is_favorite,
        }
    }
}

/// エラーレスポンス
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    /// バージョン競合時の正本の値
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            is_favorite: None,
        }
    }

    pub fn with_favorite(mut self, is_favorite: bool) -> Self {
        self.is_favorite = Some(is_favorite);
        self
    }
}
