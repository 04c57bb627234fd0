use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use opendal::layers::LoggingLayer;
use opendal::{services::S3, ErrorKind, Operator};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::hash::ContentDigest;
use crate::store::backend::{ObjectMeta, ObjectStore, PutRequest};

/// S3 and S3-compatible storage using OpenDAL
pub struct S3Store {
    operator: Operator,
    bucket: String,
    prefix: String,
    verify_etag: bool,
}

/// How a returned ETag compares with the hex MD5 of the body that was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EtagCheck {
    Match,
    /// Multipart ETags are not a content MD5
    Multipart,
    Mismatch,
}

fn check_etag(etag: &str, expected_hex: &str) -> EtagCheck {
    let etag = etag.trim().trim_matches('"');
    if etag.contains('-') {
        EtagCheck::Multipart
    } else if etag.eq_ignore_ascii_case(expected_hex) {
        EtagCheck::Match
    } else {
        EtagCheck::Mismatch
    }
}

/// S3 builder for the resolved store configuration. Credentials are left
/// to OpenDAL's default chain.
fn store_builder(config: &StoreConfig) -> S3 {
    let mut builder = S3::default()
        .bucket(&config.bucket)
        .region(&config.region)
        // Every PutObject carries a Content-MD5 header, so S3 itself
        // rejects a body that does not match with BadDigest
        .checksum_algorithm("md5");

    if !config.prefix.is_empty() {
        builder = builder.root(&format!("/{}", config.prefix));
    }
    if let Some(endpoint) = &config.endpoint {
        builder = builder.endpoint(endpoint);
    }
    // OpenDAL addresses buckets path-style unless told otherwise
    if !config.path_style {
        builder = builder.enable_virtual_host_style();
    }
    builder
}

impl S3Store {
    /// Build a store from the resolved store configuration.
    ///
    /// Credentials come from the standard AWS chain:
    /// 1. Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY)
    /// 2. Shared credentials file (~/.aws/credentials, honoring AWS_PROFILE)
    /// 3. EC2 Instance Profile / ECS Task Role / EKS Pod Identity
    pub fn new(config: &StoreConfig) -> Result<Self> {
        Self::with_builder(store_builder(config), config)
    }

    fn with_builder(builder: S3, config: &StoreConfig) -> Result<Self> {
        let mut operator = Operator::new(builder)
            .context("Failed to configure S3 client")?
            .finish();
        if config.debug {
            operator = operator.layer(LoggingLayer::default());
        }

        Ok(Self {
            operator,
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
            verify_etag: config.verify_etag,
        })
    }

    /// Second check after a successful put: the ETag S3 computed over the
    /// stored bytes must equal the MD5 we sent. On a mismatch the object is
    /// removed, so no later run can find it tagged with a matching
    /// `md5chksum` and skip it.
    async fn verify_integrity(
        &self,
        key: &str,
        etag: Option<String>,
        expected_hex: &str,
    ) -> Result<()> {
        let etag = match etag {
            Some(etag) => etag,
            None => match self.operator.stat(key).await?.etag() {
                Some(etag) => etag.to_string(),
                None => {
                    debug!(key, "store returned no ETag, relying on Content-MD5 alone");
                    return Ok(());
                }
            },
        };

        match check_etag(&etag, expected_hex) {
            EtagCheck::Match => Ok(()),
            EtagCheck::Multipart => {
                debug!(key, etag = %etag, "multipart ETag, relying on Content-MD5 alone");
                Ok(())
            }
            EtagCheck::Mismatch => {
                warn!(key, etag = %etag, "stored ETag does not match content MD5, removing object");
                if let Err(e) = self.operator.delete(key).await {
                    bail!(
                        "integrity check failed: stored ETag {} does not match content MD5 {}, \
                         and removing the object failed: {}",
                        etag,
                        expected_hex,
                        e
                    );
                }
                bail!(
                    "integrity check failed: stored ETag {} does not match content MD5 {}; \
                     object removed",
                    etag,
                    expected_hex
                );
            }
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>> {
        match self.operator.stat(key).await {
            Ok(meta) => Ok(Some(ObjectMeta {
                content_length: meta.content_length(),
                content_type: meta.content_type().map(str::to_string),
                user_metadata: meta.user_metadata().cloned().unwrap_or_default(),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("HEAD request failed"),
        }
    }

    async fn put(&self, request: PutRequest) -> Result<()> {
        let PutRequest {
            key,
            body,
            content_length,
            content_type,
            metadata,
            content_md5,
        } = request;

        if body.len() as u64 != content_length {
            bail!(
                "body is {} bytes but content length is {}",
                body.len(),
                content_length
            );
        }

        // OpenDAL derives the Content-MD5 header from the body it sends;
        // make sure that is the digest the caller asked for.
        let digest = ContentDigest::of(&body);
        if digest.to_base64() != content_md5 {
            bail!("request body does not match its Content-MD5 {}", content_md5);
        }

        let written = self
            .operator
            .write_with(&key, body)
            .content_type(&content_type)
            .user_metadata(metadata)
            .await
            .context("PUT request failed")?;

        if self.verify_etag {
            self.verify_integrity(&key, written.etag().map(str::to_string), &digest.to_hex())
                .await?;
        }
        Ok(())
    }

    fn describe(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            format!("s3://{}/{}", self.bucket, key)
        } else {
            format!("s3://{}/{}/{}", self.bucket, self.prefix, key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MD5_METADATA_KEY;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    const BUCKET: &str = "test-bucket";
    const MD5_A_HEX: &str = "7fc56270e7a70fa81a5935b72eacbe29";
    const MD5_A_BASE64: &str = "f8VicOenD6gaWTW3Lqy+KQ==";

    /// One HTTP request as seen by the local server
    #[derive(Debug, Clone)]
    struct Recorded {
        method: String,
        target: String,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    }

    impl Recorded {
        fn path(&self) -> &str {
            self.target.split('?').next().unwrap_or_default()
        }

        fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(name).map(String::as_str)
        }
    }

    struct Reply {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: String,
    }

    impl Reply {
        fn status(status: u16) -> Self {
            Self {
                status,
                headers: Vec::new(),
                body: String::new(),
            }
        }

        fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
            self.headers.push((name, value.into()));
            self
        }
    }

    type Requests = Arc<Mutex<Vec<Recorded>>>;

    /// Minimal HTTP/1.1 server standing in for S3. Returns its endpoint
    /// and the requests it has received.
    async fn serve<F>(respond: F) -> (String, Requests)
    where
        F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let requests: Requests = Arc::default();
        let respond = Arc::new(respond);

        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = Arc::clone(&seen);
                let respond = Arc::clone(&respond);
                tokio::spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut reader = BufReader::new(read);
                    loop {
                        let mut line = String::new();
                        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                            return;
                        }
                        let mut parts = line.split_whitespace();
                        let method = parts.next().unwrap_or_default().to_string();
                        let target = parts.next().unwrap_or_default().to_string();

                        let mut headers = HashMap::new();
                        loop {
                            let mut line = String::new();
                            reader.read_line(&mut line).await.unwrap();
                            let line = line.trim_end();
                            if line.is_empty() {
                                break;
                            }
                            if let Some((name, value)) = line.split_once(':') {
                                let name = name.trim().to_lowercase();
                                headers.insert(name, value.trim().to_string());
                            }
                        }

                        let length = headers
                            .get("content-length")
                            .and_then(|v| v.parse::<usize>().ok())
                            .unwrap_or(0);
                        let mut body = vec![0u8; length];
                        reader.read_exact(&mut body).await.unwrap();

                        let request = Recorded {
                            method,
                            target,
                            headers,
                            body,
                        };
                        let reply = respond(&request);
                        seen.lock().unwrap().push(request.clone());

                        let mut response = format!("HTTP/1.1 {} Reply\r\n", reply.status);
                        let mut has_length = false;
                        for (name, value) in &reply.headers {
                            has_length |= name.eq_ignore_ascii_case("content-length");
                            response.push_str(&format!("{}: {}\r\n", name, value));
                        }
                        if !has_length {
                            let length = reply.body.len();
                            response.push_str(&format!("Content-Length: {}\r\n", length));
                        }
                        response.push_str("\r\n");
                        if request.method != "HEAD" {
                            response.push_str(&reply.body);
                        }
                        if write.write_all(response.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        (endpoint, requests)
    }

    fn test_config(endpoint: &str) -> StoreConfig {
        StoreConfig {
            bucket: BUCKET.to_string(),
            prefix: String::new(),
            region: "us-east-1".to_string(),
            endpoint: Some(endpoint.to_string()),
            path_style: true,
            verify_etag: true,
            debug: false,
        }
    }

    /// Same builder `S3Store::new` uses, with fixed credentials instead of
    /// whatever the machine running the tests has configured.
    fn test_store(config: &StoreConfig) -> S3Store {
        let builder = store_builder(config)
            .access_key_id("AKIDTEST")
            .secret_access_key("secret")
            .disable_config_load()
            .disable_ec2_metadata();
        S3Store::with_builder(builder, config).unwrap()
    }

    fn put_request(key: &str, body: &[u8]) -> PutRequest {
        let md5 = ContentDigest::of(body).to_base64();
        PutRequest {
            key: key.to_string(),
            body: body.to_vec(),
            content_length: body.len() as u64,
            content_type: "text/plain".to_string(),
            metadata: HashMap::from([(MD5_METADATA_KEY.to_string(), md5.clone())]),
            content_md5: md5,
        }
    }

    /// Behaves like S3 for a single-part put: the ETag is the body's MD5.
    fn honest_store(request: &Recorded) -> Reply {
        match request.method.as_str() {
            "PUT" => {
                let etag = ContentDigest::of(&request.body).to_hex();
                Reply::status(200).header("ETag", format!("\"{}\"", etag))
            }
            "HEAD" => Reply::status(200)
                .header("Content-Length", "1")
                .header("ETag", format!("\"{}\"", MD5_A_HEX)),
            _ => Reply::status(400),
        }
    }

    #[test]
    fn test_check_etag() {
        assert_eq!(check_etag(&format!("\"{}\"", MD5_A_HEX), MD5_A_HEX), EtagCheck::Match);
        assert_eq!(check_etag(&MD5_A_HEX.to_uppercase(), MD5_A_HEX), EtagCheck::Match);
        assert_eq!(
            check_etag("\"9b2cf535f27731c974343645a3985328-3\"", MD5_A_HEX),
            EtagCheck::Multipart
        );
        assert_eq!(
            check_etag("\"00000000000000000000000000000000\"", MD5_A_HEX),
            EtagCheck::Mismatch
        );
    }

    #[test]
    fn test_describe() {
        let mut config = test_config("http://127.0.0.1:1");
        assert_eq!(test_store(&config).describe("x.txt"), "s3://test-bucket/x.txt");

        config.prefix = "site/www".to_string();
        assert_eq!(test_store(&config).describe("x.txt"), "s3://test-bucket/site/www/x.txt");
    }

    #[tokio::test]
    async fn test_put_sends_content_md5_and_digest_metadata() {
        let (endpoint, requests) = serve(honest_store).await;
        let store = test_store(&test_config(&endpoint));

        store.put(put_request("sub/x.txt", b"A")).await.unwrap();

        let requests = requests.lock().unwrap();
        let put = requests.iter().find(|r| r.method == "PUT").unwrap();
        assert_eq!(put.path(), "/test-bucket/sub/x.txt");
        assert_eq!(put.body, b"A");
        assert_eq!(put.header("content-md5"), Some(MD5_A_BASE64));
        assert_eq!(put.header("x-amz-meta-md5chksum"), Some(MD5_A_BASE64));
        assert_eq!(put.header("content-type"), Some("text/plain"));
        assert!(put
            .header("authorization")
            .is_some_and(|auth| auth.contains("content-md5")));
    }

    #[tokio::test]
    async fn test_put_under_prefix_uses_root() {
        let (endpoint, requests) = serve(honest_store).await;
        let mut config = test_config(&endpoint);
        config.prefix = "site".to_string();
        let store = test_store(&config);

        store.put(put_request("x.txt", b"A")).await.unwrap();

        let requests = requests.lock().unwrap();
        let put = requests.iter().find(|r| r.method == "PUT").unwrap();
        assert_eq!(put.path(), "/test-bucket/site/x.txt");
    }

    #[tokio::test]
    async fn test_etag_mismatch_removes_object() {
        let (endpoint, requests) = serve(|request| match request.method.as_str() {
            "PUT" | "HEAD" => Reply::status(200)
                .header("Content-Length", if request.method == "HEAD" { "1" } else { "0" })
                .header("ETag", "\"00000000000000000000000000000000\""),
            "DELETE" => Reply::status(204),
            "POST" => Reply {
                status: 200,
                headers: vec![("Content-Type", "application/xml".to_string())],
                body: "<DeleteResult><Deleted><Key>x.txt</Key></Deleted></DeleteResult>"
                    .to_string(),
            },
            _ => Reply::status(400),
        })
        .await;
        let store = test_store(&test_config(&endpoint));

        let err = store.put(put_request("x.txt", b"A")).await.unwrap_err();
        assert!(err.to_string().contains("integrity check failed"));

        let requests = requests.lock().unwrap();
        let removed = requests.iter().any(|r| {
            (r.method == "DELETE" && r.path() == "/test-bucket/x.txt")
                || (r.method == "POST" && r.target.contains("delete"))
        });
        assert!(removed, "no delete sent after a bad ETag: {requests:?}");
    }

    #[tokio::test]
    async fn test_etag_mismatch_ignored_when_verification_disabled() {
        let (endpoint, requests) = serve(|_| {
            Reply::status(200).header("ETag", "\"00000000000000000000000000000000\"")
        })
        .await;
        let mut config = test_config(&endpoint);
        config.verify_etag = false;
        let store = test_store(&config);

        store.put(put_request("x.txt", b"A")).await.unwrap();
        assert!(requests.lock().unwrap().iter().all(|r| r.method == "PUT"));
    }

    #[tokio::test]
    async fn test_put_rejects_body_digest_mismatch_before_sending() {
        let (endpoint, requests) = serve(honest_store).await;
        let store = test_store(&test_config(&endpoint));

        let mut request = put_request("x.txt", b"A");
        request.content_md5 = ContentDigest::of(b"B").to_base64();
        assert!(store.put(request).await.is_err());
        assert!(requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_head_not_found_is_none() {
        let (endpoint, _) = serve(|_| Reply::status(404)).await;
        let store = test_store(&test_config(&endpoint));

        assert!(store.head("missing.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_head_reads_stored_digest() {
        let (endpoint, requests) = serve(|_| {
            Reply::status(200)
                .header("Content-Length", "1")
                .header("Content-Type", "text/plain")
                .header("ETag", format!("\"{}\"", MD5_A_HEX))
                .header("x-amz-meta-md5chksum", MD5_A_BASE64)
        })
        .await;
        let store = test_store(&test_config(&endpoint));

        let meta = store.head("x.txt").await.unwrap().unwrap();
        assert_eq!(meta.content_length, 1);
        assert_eq!(meta.content_type.as_deref(), Some("text/plain"));
        assert_eq!(meta.stored_md5(), Some(MD5_A_BASE64));

        let requests = requests.lock().unwrap();
        assert_eq!(requests[0].method, "HEAD");
        assert_eq!(requests[0].path(), "/test-bucket/x.txt");
    }

    #[tokio::test]
    async fn test_head_access_denied_is_error() {
        let (endpoint, _) = serve(|_| Reply::status(403)).await;
        let store = test_store(&test_config(&endpoint));

        assert!(store.head("x.txt").await.is_err());
    }
}
