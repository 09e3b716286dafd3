//! Object storage for research documents.
//!
//! Two operations matter to the pipeline: finding when the newest research
//! document was written (the retriever's freshness signal) and uploading
//! VOC files. Both go through [`ObjectStore`]; the production backend is an
//! S3-compatible bucket reached with the REST API and AWS Signature V4.
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! bucket = "crm-research"
//! prefix = "voc/"
//! region = "ap-northeast-2"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! # public_base_url = "https://cdn.example.com/voc"
//! ```
//!
//! Credentials come from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and
//! optionally `AWS_SESSION_TOKEN`.
//!
//! Custom endpoints are addressed path-style (`/<bucket>/<key>`); AWS
//! endpoints use virtual-hosted style (`<bucket>.s3.<region>.amazonaws.com`).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::StorageConfig;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Last-modified time of the newest object whose key ends with `suffix`.
    /// `Ok(None)` when no object matches.
    async fn latest_modified(&self, suffix: &str) -> Result<Option<DateTime<Utc>>>;

    /// Write an object, overwriting any existing one. Returns its URL.
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String>;
}

/// Build the configured store. A missing `[storage]` section yields a store
/// whose every call fails, which the retriever treats as "unreachable".
pub fn create_store(config: Option<&StorageConfig>) -> Result<Arc<dyn ObjectStore>> {
    match config {
        Some(cfg) => Ok(Arc::new(S3Store::new(cfg.clone())?)),
        None => Ok(Arc::new(UnconfiguredStore)),
    }
}

pub struct UnconfiguredStore;

#[async_trait]
impl ObjectStore for UnconfiguredStore {
    async fn latest_modified(&self, _suffix: &str) -> Result<Option<DateTime<Utc>>> {
        bail!("object storage is not configured")
    }

    async fn put_object(&self, _key: &str, _body: Vec<u8>, _content_type: &str) -> Result<String> {
        bail!("storage connection not configured")
    }
}

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

pub struct S3Store {
    config: StorageConfig,
    creds: AwsCredentials,
    client: reqwest::Client,
}

/// Object metadata from a `ListObjectsV2` page.
#[derive(Debug, Clone, PartialEq)]
pub struct ListedObject {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
}

impl S3Store {
    pub fn new(config: StorageConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            creds: AwsCredentials::from_env()?,
            client,
        })
    }

    /// Scheme, host, and the path prefix that addresses the bucket.
    fn addressing(&self) -> (String, String, String) {
        match self.config.endpoint_url {
            Some(ref endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                (scheme.to_string(), host, format!("/{}", self.config.bucket))
            }
            None => (
                "https".to_string(),
                format!(
                    "{}.s3.{}.amazonaws.com",
                    self.config.bucket, self.config.region
                ),
                String::new(),
            ),
        }
    }

    /// Compute SigV4 headers for one request.
    ///
    /// `canonical_query` must already be sorted and URI-encoded.
    fn sign(
        &self,
        method: &str,
        host: &str,
        canonical_uri: &str,
        canonical_query: &str,
        payload_hash: &str,
        extra_headers: &[(String, String)],
    ) -> Vec<(String, String)> {
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("host".to_string(), host.to_string()),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.extend(extra_headers.iter().cloned());
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, canonical_uri, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        );
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut out: Vec<(String, String)> = headers
            .into_iter()
            .filter(|(k, _)| k != "host")
            .collect();
        out.push(("Authorization".to_string(), authorization));
        out
    }

    async fn list_page(&self, continuation_token: Option<&str>) -> Result<(Vec<ListedObject>, Option<String>)> {
        let (scheme, host, bucket_path) = self.addressing();

        let mut params = vec![
            ("list-type".to_string(), "2".to_string()),
            ("max-keys".to_string(), "1000".to_string()),
        ];
        if !self.config.prefix.is_empty() {
            params.push(("prefix".to_string(), self.config.prefix.clone()));
        }
        if let Some(token) = continuation_token {
            params.push(("continuation-token".to_string(), token.to_string()));
        }
        params.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_query = params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_uri = format!("{}/", bucket_path);
        let payload_hash = hex_sha256(b"");
        let headers = self.sign("GET", &host, &canonical_uri, &canonical_query, &payload_hash, &[]);

        let url = format!("{}://{}{}?{}", scheme, host, canonical_uri, canonical_query);
        let mut req = self.client.get(&url);
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let resp = req.send().await.with_context(|| {
            format!(
                "Failed to list objects in s3://{}/{}",
                self.config.bucket, self.config.prefix
            )
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 ListObjectsV2 failed (HTTP {}): {}",
                status,
                body.chars().take(500).collect::<String>()
            );
        }

        let xml = resp.text().await?;
        Ok(parse_list_objects_response(&xml))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn latest_modified(&self, suffix: &str) -> Result<Option<DateTime<Utc>>> {
        let mut latest: Option<DateTime<Utc>> = None;
        let mut token: Option<String> = None;

        loop {
            let (objects, next) = self.list_page(token.as_deref()).await?;
            latest = objects
                .iter()
                .filter(|o| o.key.ends_with(suffix))
                .filter_map(|o| o.last_modified)
                .chain(latest)
                .max();

            match next {
                Some(t) => token = Some(t),
                None => break,
            }
        }

        debug!(target: "storage", bucket = %self.config.bucket, ?latest, "latest object lookup");
        Ok(latest)
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String> {
        let (scheme, host, bucket_path) = self.addressing();
        let full_key = format!("{}{}", self.config.prefix, key);
        let encoded_key = full_key
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        let canonical_uri = format!("{}/{}", bucket_path, encoded_key);

        let payload_hash = hex_sha256(&body);
        let extra = vec![("content-type".to_string(), content_type.to_string())];
        let headers = self.sign("PUT", &host, &canonical_uri, "", &payload_hash, &extra);

        let url = format!("{}://{}{}", scheme, host, canonical_uri);
        let mut req = self.client.put(&url).body(body);
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("Failed to put s3://{}/{}", self.config.bucket, full_key))?;

        if !resp.status().is_success() {
            let status = resp.status();
            bail!("S3 PutObject failed (HTTP {}) for key '{}'", status, full_key);
        }

        Ok(url)
    }
}

// ============ AWS SigV4 Helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding; leaves `A-Z a-z 0-9 - _ . ~` untouched.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}

// ============ ListObjectsV2 parsing ============

/// Parse one `ListObjectsV2` page. Returns the objects and, when the
/// listing is truncated, the continuation token for the next page.
/// Directory placeholder keys (ending in `/`) are skipped.
pub fn parse_list_objects_response(xml: &str) -> (Vec<ListedObject>, Option<String>) {
    let is_truncated = extract_xml_value(xml, "IsTruncated").as_deref() == Some("true");
    let next_token = if is_truncated {
        extract_xml_value(xml, "NextContinuationToken")
    } else {
        None
    };

    let mut objects = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        remaining = &remaining[block_start + end + "</Contents>".len()..];

        let key = extract_xml_value(block, "Key").unwrap_or_default();
        if key.is_empty() || key.ends_with('/') {
            continue;
        }
        let last_modified = extract_xml_value(block, "LastModified")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        objects.push(ListedObject { key, last_modified });
    }

    (objects, next_token)
}

fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}
