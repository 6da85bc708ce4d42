pub mod book_detail;
pub mod favorite;
pub mod rental;

use std::sync::Arc;

use crate::config::RentalSettings;
use crate::domain::{
    RentalRecord,
    commands::RentalRequest,
    value_objects::{BookRef, Isbn13, UserId},
};
use crate::ports::{DescriptionProvider, RemoteStateStore};

use book_detail::BookDetail;
use favorite::FavoriteToggleController;
use rental::RentalTransactionManager;

/// 呼び出し側に公開するサービス群
///
/// リモートストアのハンドルは明示的に注入する（プロセス全体の暗黙の状態を持たない）。
#[derive(Clone)]
pub struct BookServices {
    pub rentals: RentalTransactionManager,
    pub favorites: Arc<FavoriteToggleController>,
    pub descriptions: Arc<dyn DescriptionProvider>,
}

impl BookServices {
    pub fn new(
        store: Arc<dyn RemoteStateStore>,
        descriptions: Arc<dyn DescriptionProvider>,
        settings: RentalSettings,
    ) -> Self {
        Self {
            rentals: RentalTransactionManager::new(store.clone(), settings),
            favorites: Arc::new(FavoriteToggleController::new(store)),
            descriptions,
        }
    }

    pub async fn rent(&self, request: RentalRequest) -> rental::Result<RentalRecord> {
        self.rentals.rent(request).await
    }

    pub async fn toggle_favorite(&self, user_id: &UserId, isbn13: &Isbn13) -> favorite::Result<bool> {
        self.favorites.toggle(user_id, isbn13).await
    }

    pub fn is_favorite(&self, user_id: &UserId, isbn13: &Isbn13) -> bool {
        self.favorites.is_favorite(user_id, isbn13)
    }

    pub async fn book_detail(&self, user_id: &UserId, book: BookRef) -> BookDetail {
        book_detail::load_book_detail(
            self.descriptions.as_ref(),
            &self.favorites,
            user_id,
            book,
        )
        .await
    }
}
