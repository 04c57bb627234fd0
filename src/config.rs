//! Run configuration.
//!
//! The pipeline receives one immutable [`SyncConfig`]; the S3 client is
//! built from a [`StoreConfig`]. Both are resolved once at startup from
//! command-line flags, environment, the optional `~/.bucket.toml` file and
//! built-in defaults, in that order of precedence.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SyncError};

/// Number of concurrent upload workers when none is configured.
pub const DEFAULT_WORKERS: usize = 4;

/// Region used when neither flags, environment nor config file name one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// File name of the per-user config file in the home directory.
pub const CONFIG_FILE_NAME: &str = ".bucket.toml";

const BUCKET_SCHEME: &str = "s3://";

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Fixed size of the upload worker pool; also the work queue capacity.
    pub workers: usize,
    /// Decide and report everything, but never send a put.
    pub dry_run: bool,
    /// Per-call limit for metadata lookups and puts. `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            dry_run: false,
            request_timeout: None,
        }
    }
}

impl SyncConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(SyncError::Config {
                path: None,
                reason: "workers must be at least 1".to_string(),
            });
        }
        if self.request_timeout == Some(Duration::ZERO) {
            return Err(SyncError::Config {
                path: None,
                reason: "timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Parsed `s3://bucket[/prefix]` destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub bucket: String,
    /// Key prefix without leading or trailing slashes; empty for the bucket root
    pub prefix: String,
}

impl Destination {
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |reason: &str| SyncError::InvalidDestination {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let rest = url
            .strip_prefix(BUCKET_SCHEME)
            .ok_or_else(|| invalid("missing s3:// scheme"))?;

        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return Err(invalid("bucket name is empty"));
        }

        let prefix = prefix
            .split('/')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/");

        Ok(Self {
            bucket: bucket.to_string(),
            prefix,
        })
    }
}

/// Settings consumed by the S3 store constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub bucket: String,
    pub prefix: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub path_style: bool,
    /// Compare the returned ETag with the content MD5 after each put
    pub verify_etag: bool,
    /// Log every store request
    pub debug: bool,
}

/// Optional settings read from the TOML config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub profile: Option<String>,
    pub path_style: Option<bool>,
    pub workers: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub verify_etag: Option<bool>,
}

impl FileConfig {
    /// Default location: `$HOME/.bucket.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_FILE_NAME))
    }

    /// Load the config file.
    ///
    /// An explicit path must exist. Without one, the default path is tried
    /// and a missing file yields the empty config.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.is_file() => path,
                _ => return Ok((Self::default(), None)),
            },
        };

        let text = std::fs::read_to_string(&path).map_err(|e| SyncError::Config {
            path: Some(path.clone()),
            reason: format!("cannot read config file: {}", e),
        })?;
        let config = Self::parse(&text).map_err(|reason| SyncError::Config {
            path: Some(path.clone()),
            reason,
        })?;
        Ok((config, Some(path)))
    }

    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }
}
