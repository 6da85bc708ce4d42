use crate::domain::value_objects::Isbn13;
use async_trait::async_trait;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Description provider port for the external content API.
///
/// Purely informational. A missing description is a display-only condition
/// and never affects rental or favorite state.
#[async_trait]
pub trait DescriptionProvider: Send + Sync {
    /// Fetch the free-text description of a book.
    ///
    /// Resolves once. `Ok(None)` means the content API has no entry for the ISBN.
    async fn fetch_description(&self, isbn13: &Isbn13) -> Result<Option<String>>;
}
