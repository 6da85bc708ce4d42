use crate::application::{favorite::FavoriteError, rental::RentalError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::types::ErrorResponse;

/// API層のエラー型
///
/// アプリケーション層のエラーをラップし、HTTPレスポンスへのマッピングを提供する。
#[derive(Debug)]
pub enum ApiError {
    Rental(RentalError),
    Favorite(FavoriteError),
    BadRequest(String),
}

impl From<RentalError> for ApiError {
    fn from(err: RentalError) -> Self {
        ApiError::Rental(err)
    }
}

impl From<FavoriteError> for ApiError {
    fn from(err: FavoriteError) -> Self {
        ApiError::Favorite(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            // 400 Bad Request - 入力不正
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("BAD_REQUEST", msg),
            ),
            ApiError::Rental(RentalError::Validation(e)) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::new("VALIDATION_ERROR", e.to_string()),
            ),

            // 409 Conflict - 並行操作による拒否
            ApiError::Rental(RentalError::DuplicateRental { reason }) => (
                StatusCode::CONFLICT,
                ErrorResponse::new(
                    "RENTAL_ALREADY_PROCESSING",
                    format!("Rental already processing: {}", reason),
                ),
            ),
            ApiError::Favorite(FavoriteError::VersionConflict {
                actual,
                is_favorite,
                ..
            }) => (
                StatusCode::CONFLICT,
                ErrorResponse::new(
                    "VERSION_CONFLICT",
                    format!("Favorite was modified elsewhere (now at {})", actual),
                )
                .with_favorite(is_favorite),
            ),

            // 503 Service Unavailable - 再試行の上限に達したリモート障害
            // 詳細はログに記録し、クライアントには一般的なメッセージのみを返す
            ApiError::Rental(RentalError::RemoteWrite { rental_id, source }) => {
                tracing::error!(%rental_id, error = %source, "Rental remote write failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorResponse::new("REMOTE_WRITE_ERROR", "Failed to persist rental"),
                )
            }
            ApiError::Favorite(FavoriteError::RemoteWrite(e)) => {
                tracing::error!(error = %e, "Favorite remote write failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorResponse::new("REMOTE_WRITE_ERROR", "Failed to persist favorite"),
                )
            }
            ApiError::Favorite(FavoriteError::Transport(e)) => {
                tracing::error!(error = %e, "Favorite read failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorResponse::new("TRANSPORT_ERROR", "Failed to read favorite"),
                )
            }

            // 500 Internal Server Error - システム障害
            ApiError::Rental(e @ (RentalError::InvalidState(_) | RentalError::Interrupted(_))) => {
                tracing::error!(error = %e, "Rental transaction error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("INTERNAL_ERROR", "An unexpected error occurred"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
