use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use bucket::config::{
    Destination, FileConfig, StoreConfig, SyncConfig, DEFAULT_REGION, DEFAULT_WORKERS,
};
use bucket::logging::init_tracing;
use bucket::store::S3Store;
use bucket::sync::Pipeline;

#[derive(Parser)]
#[command(name = "bucket")]
#[command(version)]
#[command(about = "An AWS S3 bucket synchronization tool")]
#[command(long_about = r#"
An AWS S3 bucket synchronization tool.

Uploads use MD5 hashing to detect changes and to validate transfers. Every
uploaded object carries an 'md5chksum' metadata attribute holding the base64
encoded checksum of its content.

Credentials are read from the usual AWS environment variables or from
~/.aws/credentials:

  AWS_ACCESS_KEY_ID
  AWS_SECRET_ACCESS_KEY

Examples:
  bucket upload /path/to/my-bucket s3://my-bucket
  bucket upload --dry-run ./site s3://my-bucket/www
"#)]
struct Cli {
    /// Perform a simulation without actually making any changes
    #[arg(long, global = true)]
    dry_run: bool,

    /// AWS region
    #[arg(short, long, global = true)]
    region: Option<String>,

    /// AWS profile in ~/.aws/credentials and ~/.aws/config
    #[arg(short, long, global = true)]
    profile: Option<String>,

    /// AWS endpoint url
    #[arg(short = 'u', long, global = true)]
    endpoint_url: Option<String>,

    /// Delete destination files that no longer exist in the source
    #[arg(short, long, global = true)]
    delete: bool,

    /// Force path style urls
    #[arg(long, global = true)]
    path_style: bool,

    /// Log every request and pipeline step
    #[arg(long, global = true)]
    debug: bool,

    /// Config file (default: ~/.bucket.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload new or modified files from DIRECTORY to BUCKET
    ///
    /// Modification is detected via a change in the MD5 checksum. The
    /// checksum is verified by the store and kept in the 'md5chksum'
    /// metadata key.
    Upload {
        /// Local source directory
        directory: PathBuf,

        /// Destination, s3://bucket or s3://bucket/prefix
        #[arg(value_name = "BUCKET")]
        destination: String,

        /// Number of concurrent upload workers
        #[arg(long)]
        workers: Option<usize>,

        /// Per-request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let (file_config, file_path) = FileConfig::load(cli.config.as_deref())?;
    if let Some(path) = &file_path {
        info!("Using config file: {}", path.display());
    }

    // Read by the S3 credential loader; set before any runtime threads exist
    let profile = cli.profile.clone().or_else(|| {
        env_var("AWS_PROFILE")
            .is_none()
            .then(|| file_config.profile.clone())
            .flatten()
    });
    if let Some(profile) = profile {
        std::env::set_var("AWS_PROFILE", profile);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    match &cli.command {
        Commands::Upload {
            directory,
            destination,
            workers,
            timeout,
        } => {
            let destination = Destination::parse(destination)?;
            let store_config = store_config(&cli, &file_config, destination);
            let sync_config = SyncConfig::default()
                .with_workers(workers.or(file_config.workers).unwrap_or(DEFAULT_WORKERS))
                .with_dry_run(cli.dry_run)
                .with_request_timeout(
                    timeout
                        .or(file_config.timeout_secs)
                        .map(Duration::from_secs),
                );

            if cli.delete {
                warn!("--delete is not implemented yet; no remote objects will be removed");
            }

            runtime.block_on(async {
                let store = S3Store::new(&store_config)?;
                let pipeline = Pipeline::new(Arc::new(store), sync_config)?;
                pipeline.upload(directory).await?;
                Ok::<_, anyhow::Error>(())
            })
        }
    }
}

/// Flag, then environment, then config file, then default.
fn store_config(cli: &Cli, file: &FileConfig, destination: Destination) -> StoreConfig {
    let region = cli
        .region
        .clone()
        .or_else(|| env_var("AWS_REGION"))
        .or_else(|| file.region.clone())
        .unwrap_or_else(|| DEFAULT_REGION.to_string());
    let endpoint = cli
        .endpoint_url
        .clone()
        .or_else(|| env_var("AWS_ENDPOINT_URL"))
        .or_else(|| file.endpoint_url.clone());

    StoreConfig {
        bucket: destination.bucket,
        prefix: destination.prefix,
        region,
        endpoint,
        path_style: cli.path_style || file.path_style.unwrap_or(false),
        verify_etag: file.verify_etag.unwrap_or(true),
        debug: cli.debug,
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
