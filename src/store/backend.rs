use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

/// User metadata attribute holding the base64 MD5 of an object's content.
pub const MD5_METADATA_KEY: &str = "md5chksum";

/// Metadata returned by a `head` lookup
#[derive(Debug, Clone, Default)]
pub struct ObjectMeta {
    pub content_length: u64,
    pub content_type: Option<String>,
    /// User metadata with the store's prefix (`x-amz-meta-`) removed
    pub user_metadata: HashMap<String, String>,
}

impl ObjectMeta {
    /// Stored content digest written by a previous sync, if any.
    ///
    /// Stores disagree on header casing (`md5chksum` vs `Md5chksum`), so the
    /// key is matched case-insensitively. Blank values count as missing.
    pub fn stored_md5(&self) -> Option<&str> {
        self.user_metadata
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(MD5_METADATA_KEY))
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// A fully described put of one object.
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub key: String,
    pub body: Vec<u8>,
    pub content_length: u64,
    pub content_type: String,
    /// Custom metadata attributes, stored with the object
    pub metadata: HashMap<String, String>,
    /// Base64 MD5 of `body`; the store must reject the put if it does not match
    pub content_md5: String,
}

/// Object store operations used by the sync pipeline
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch object metadata. `Ok(None)` means the object does not exist;
    /// any other failure is an error.
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>>;

    /// Store an object, verifying its integrity against `content_md5`.
    async fn put(&self, request: PutRequest) -> Result<()>;

    /// Human-readable location of a key, for logs.
    fn describe(&self, key: &str) -> String {
        key.to_string()
    }
}
