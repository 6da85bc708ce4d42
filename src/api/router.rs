use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::{AppState, create_rental, get_book_detail, get_favorite, toggle_favorite};

/// Creates the API router with all rental and favorite endpoints
///
/// Command endpoints (Write operations):
/// - POST /rentals - Rent a book
/// - POST /users/:user_id/favorites/:isbn13/toggle - Toggle a favorite
///
/// Query endpoints (Read operations):
/// - GET /users/:user_id/favorites/:isbn13 - Current favorite flag
/// - GET /books/:isbn13 - Book detail (description + favorite flag)
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check endpoint
        .route("/health", get(health_check))
        // Command endpoints (Write operations)
        .route("/rentals", post(create_rental))
        .route(
            "/users/:user_id/favorites/:isbn13/toggle",
            post(toggle_favorite),
        )
        // Query endpoints (Read operations)
        .route("/users/:user_id/favorites/:isbn13", get(get_favorite))
        .route("/books/:isbn13", get(get_book_detail))
        // Add tracing middleware
        .layer(TraceLayer::new_for_http())
        // Add application state
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
