use serde::Serialize;
use tracing::warn;

use crate::domain::value_objects::{BookRef, UserId};
use crate::ports::DescriptionProvider;

use super::favorite::FavoriteToggleController;

/// 書籍説明の表示状態
///
/// 取得できなかった場合も表示上の状態にすぎず、エラーにはしない。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "text", rename_all = "snake_case")]
pub enum Description {
    Available(String),
    Unavailable,
}

/// 書籍詳細画面のデータ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDetail {
    pub book: BookRef,
    pub description: Description,
    pub is_favorite: bool,
}

/// 書籍詳細を組み立てる
///
/// 説明の取得とお気に入り状態の同期は並行に行う。
/// どちらの失敗もログに残すだけで、詳細の表示は続行する。
pub async fn load_book_detail(
    descriptions: &dyn DescriptionProvider,
    favorites: &FavoriteToggleController,
    user_id: &UserId,
    book: BookRef,
) -> BookDetail {
    let isbn13 = book.isbn13().clone();

    let description = async {
        match descriptions.fetch_description(&isbn13).await {
            Ok(Some(text)) => Description::Available(text),
            Ok(None) => Description::Unavailable,
            Err(err) => {
                warn!(%isbn13, error = %err, "Description lookup failed");
                Description::Unavailable
            }
        }
    };

    let is_favorite = async {
        // 既にローカル状態があれば（楽観的更新中を含め）それを優先する
        if favorites.local_state(user_id, &isbn13).is_some() {
            return favorites.is_favorite(user_id, &isbn13);
        }
        match favorites.refresh(user_id, &isbn13).await {
            Ok(value) => value,
            Err(err) => {
                warn!(%user_id, %isbn13, error = %err, "Favorite lookup failed");
                false
            }
        }
    };

    let (description, is_favorite) = futures::join!(description, is_favorite);

    BookDetail {
        book,
        description,
        is_favorite,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{
        DescriptionProvider as InMemoryDescriptions, RemoteStateStore as InMemoryStore,
    };
    use crate::domain::{FavoriteEntry, Version, value_objects::Isbn13};
    use std::sync::Arc;

    fn book() -> BookRef {
        BookRef::new(Isbn13::new("9780140449136"), "Crime and Punishment")
    }

    #[tokio::test]
    async fn test_detail_with_description_and_remote_favorite() {
        let store = Arc::new(InMemoryStore::new());
        let descriptions = InMemoryDescriptions::new();
        let user = UserId::new("u1");
        descriptions.add_description(book().isbn13().clone(), "A novel about guilt.");
        store.put_favorite(FavoriteEntry {
            user_id: user.clone(),
            isbn13: book().isbn13().clone(),
            is_favorite: true,
            version: Version::new(2),
        });
        let favorites = FavoriteToggleController::new(store);

        let detail = load_book_detail(&descriptions, &favorites, &user, book()).await;

        assert_eq!(
            detail.description,
            Description::Available("A novel about guilt.".to_string())
        );
        assert!(detail.is_favorite);
        assert_eq!(detail.book, book());
    }

    #[tokio::test]
    async fn test_missing_description_is_not_an_error() {
        let favorites = FavoriteToggleController::new(Arc::new(InMemoryStore::new()));
        let descriptions = InMemoryDescriptions::new();

        let detail = load_book_detail(&descriptions, &favorites, &UserId::new("u1"), book()).await;

        assert_eq!(detail.description, Description::Unavailable);
        assert!(!detail.is_favorite);
    }

    #[tokio::test]
    async fn test_failures_degrade_to_display_defaults() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_next_reads(1);
        let favorites = FavoriteToggleController::new(store);
        let descriptions = InMemoryDescriptions::new();
        descriptions.set_failing(true);

        let detail = load_book_detail(&descriptions, &favorites, &UserId::new("u1"), book()).await;

        assert_eq!(detail.description, Description::Unavailable);
        assert!(!detail.is_favorite);
    }
}
