pub mod backend;
pub mod memory;
pub mod s3;

pub use backend::{ObjectMeta, ObjectStore, PutRequest, MD5_METADATA_KEY};
pub use memory::MemoryStore;
pub use s3::S3Store;
