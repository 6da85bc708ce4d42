pub mod remote_state_store;

// パブリックに型を再エクスポート
pub use remote_state_store::RemoteStateStore as PostgresRemoteStateStore;
