use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::hash::ContentDigest;
use crate::store::backend::{ObjectMeta, ObjectStore, PutRequest};

/// An object held by [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
}

/// In-process object store.
///
/// Behaves like S3 for the operations the pipeline uses: unknown keys are
/// "not found", and a put whose Content-MD5 does not match its body is
/// rejected the way S3 answers `BadDigest`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    heads: AtomicUsize,
    puts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, bypassing put accounting.
    pub fn insert(&self, key: &str, body: &[u8], metadata: HashMap<String, String>) {
        let object = StoredObject {
            body: body.to_vec(),
            content_type: "binary/octet-stream".to_string(),
            metadata,
        };
        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), object);
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Number of put requests received, including rejected ones.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn head_count(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.read().map_err(|_| anyhow!("store lock poisoned"))?;
        Ok(objects.get(key).map(|object| ObjectMeta {
            content_length: object.body.len() as u64,
            content_type: Some(object.content_type.clone()),
            user_metadata: object.metadata.clone(),
        }))
    }

    async fn put(&self, request: PutRequest) -> Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);

        if request.body.len() as u64 != request.content_length {
            bail!(
                "IncompleteBody: expected {} bytes, got {}",
                request.content_length,
                request.body.len()
            );
        }
        let actual = ContentDigest::of(&request.body).to_base64();
        if actual != request.content_md5 {
            bail!(
                "BadDigest: Content-MD5 {} does not match body digest {}",
                request.content_md5,
                actual
            );
        }

        let object = StoredObject {
            body: request.body,
            content_type: request.content_type,
            metadata: request.metadata,
        };
        self.objects
            .write()
            .map_err(|_| anyhow!("store lock poisoned"))?
            .insert(request.key, object);
        Ok(())
    }

    fn describe(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}
