pub mod errors;
pub mod handle;
pub mod manager;
pub mod schema;
pub mod snapshot;

pub use errors::StoreError;
pub use handle::StoreHandle;
pub use manager::{StoreManager, StoreManagerConfig};
pub use schema::open_hot_database;
pub use snapshot::{load_cold_into_hot, snapshot_hot_to_cold};
