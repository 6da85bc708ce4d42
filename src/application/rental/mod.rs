mod errors;
mod rental_service;
mod retry;
mod transaction_guard;

pub use errors::{RentalError, Result};
pub use rental_service::RentalTransactionManager;
pub use retry::RetryPolicy;
pub use transaction_guard::{
    Acquisition, DenialReason, IdempotentTransactionGuard, OperationToken, RentalLease,
};
