// Content fingerprinting
// Streams a file through MD5 and records its size

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use md5::{Digest as _, Md5};

use crate::error::{Result, SyncError};

/// Read buffer size used while hashing
const BUFFER_SIZE: usize = 64 * 1024;

/// A 128-bit MD5 content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 16]);

impl ContentDigest {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Digest of an in-memory buffer.
    pub fn of(data: &[u8]) -> Self {
        Self::from_slice(&Md5::digest(data))
    }

    fn from_slice(raw: &[u8]) -> Self {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(raw);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Lowercase hex, the form S3 reports as the ETag of a single-part upload.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Standard base64, the form used for both the `md5chksum` metadata
    /// attribute and the `Content-MD5` header.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Result of fingerprinting a stream: its digest and total byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub digest: ContentDigest,
    pub size: u64,
}

/// Hash a reader to end-of-input in bounded chunks.
///
/// The reader is fully consumed; reopen or rewind it before reuse.
pub fn fingerprint<R: Read>(mut reader: R) -> io::Result<Fingerprint> {
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut size = 0u64;

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
        size += bytes_read as u64;
    }

    Ok(Fingerprint {
        digest: ContentDigest::from_slice(&hasher.finalize()),
        size,
    })
}

/// Open and fingerprint a file.
pub fn fingerprint_file(path: &Path) -> Result<Fingerprint> {
    let file = File::open(path).map_err(|e| SyncError::from_io_error(e, path))?;
    fingerprint(file).map_err(|e| SyncError::from_io_error(e, path))
}
