pub mod description_provider;
pub mod remote_state_store;

pub use description_provider::DescriptionProvider;
pub use remote_state_store::RemoteStateStore;
