pub mod commands;
pub mod errors;
pub mod favorite;
pub mod rental;
pub mod value_objects;

pub use errors::*;
pub use favorite::{FavoriteEntry, FavoriteSyncState};
pub use rental::{RentalRecord, RentalStatus};
pub use value_objects::*;
