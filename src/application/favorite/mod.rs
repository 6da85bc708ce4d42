mod errors;
mod favorite_service;

pub use errors::{FavoriteError, Result};
pub use favorite_service::FavoriteToggleController;
