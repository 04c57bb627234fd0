// Library module for bucket
// Re-exports the sync pipeline for the binary and integration tests

pub mod config;
pub mod error;
pub mod hash;
pub mod logging;
pub mod store;
pub mod sync;

pub use config::{Destination, FileConfig, StoreConfig, SyncConfig};
pub use error::SyncError;
pub use store::{MemoryStore, ObjectStore, S3Store};
pub use sync::{Pipeline, SyncSummary};
