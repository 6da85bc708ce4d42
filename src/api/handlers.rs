use crate::application::BookServices;
use crate::domain::value_objects::{BookRef, Isbn13, UserId};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use std::sync::Arc;

use super::{
    error::ApiError,
    types::{
        BookDetailQuery, BookDetailResponse, FavoriteResponse, RentBookRequest, RentalResponse,
    },
};

// ============================================================================
// State
// ============================================================================

/// ハンドラー間で共有されるアプリケーション状態
#[derive(Clone)]
pub struct AppState {
    pub services: BookServices,
}

// ============================================================================
// Command handlers (POST)
// ============================================================================

/// POST /rentals - 書籍をレンタルする
///
/// 強制されるルール:
/// - isbn13 / user_id が空でないこと
/// - 日数が1以上かつ上限以下であること
/// - 同じ(ユーザー, 書籍)のレンタルが処理中・有効でないこと
pub async fn create_rental(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RentBookRequest>,
) -> Result<(StatusCode, Json<RentalResponse>), ApiError> {
    let cmd = req.to_command(state.services.rentals.settings(), chrono::Utc::now());

    let record = state.services.rent(cmd).await?;

    Ok((StatusCode::CREATED, Json(RentalResponse::from(record))))
}

/// POST /users/:user_id/favorites/:isbn13/toggle - お気に入りをトグル
///
/// バージョン競合時は409と正本の値を返す。
pub async fn toggle_favorite(
    State(state): State<Arc<AppState>>,
    Path((user_id, isbn13)): Path<(String, String)>,
) -> Result<Json<FavoriteResponse>, ApiError> {
    let user_id = UserId::new(user_id);
    let isbn13 = Isbn13::new(isbn13);

    let is_favorite = state.services.toggle_favorite(&user_id, &isbn13).await?;

    Ok(Json(FavoriteResponse {
        user_id: user_id.to_string(),
        isbn13: isbn13.to_string(),
        is_favorite,
    }))
}

// ============================================================================
// Query handlers (GET)
// ============================================================================

/// GET /users/:user_id/favorites/:isbn13 - お気に入り状態を取得
///
/// ローカル状態がなければリモートから同期する。
pub async fn get_favorite(
    State(state): State<Arc<AppState>>,
    Path((user_id, isbn13)): Path<(String, String)>,
) -> Result<Json<FavoriteResponse>, ApiError> {
    let user_id = UserId::new(user_id);
    let isbn13 = Isbn13::new(isbn13);

    let favorites = &state.services.favorites;
    let is_favorite = if favorites.local_state(&user_id, &isbn13).is_some() {
        state.services.is_favorite(&user_id, &isbn13)
    } else {
        favorites.refresh(&user_id, &isbn13).await?
    };

    Ok(Json(FavoriteResponse {
        user_id: user_id.to_string(),
        isbn13: isbn13.to_string(),
        is_favorite,
    }))
}

/// GET /books/:isbn13?user_id=..&title=.. - 書籍詳細を取得
///
/// user_idは必須。説明が取得できない場合も200を返す。
pub async fn get_book_detail(
    State(state): State<Arc<AppState>>,
    Path(isbn13): Path<String>,
    Query(query): Query<BookDetailQuery>,
) -> Result<Json<BookDetailResponse>, ApiError> {
    let user_id = query
        .user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("user_id query parameter is required".to_string()))?;

    let book = BookRef::new(Isbn13::new(isbn13), query.title.unwrap_or_default());
    let detail = state
        .services
        .book_detail(&UserId::new(user_id), book)
        .await;

    Ok(Json(BookDetailResponse::from(detail)))
}
