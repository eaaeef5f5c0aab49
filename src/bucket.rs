//! Object-store bucket client.
//!
//! Lists and downloads objects from an S3-compatible bucket using the S3
//! REST API with AWS Signature V4 authentication. Handles pagination for
//! large buckets, glob-based filtering on object keys, and custom endpoints
//! for S3-compatible stores (MinIO, OCI Object Storage, LocalStack).
//!
//! Uses only pure-Rust dependencies (`hmac`, `sha2`) for request signing.
//!
//! # Configuration
//!
//! ```toml
//! [bucket]
//! bucket = "seq-queue"
//! region = "us-east-1"
//! include_globs = ["**/*.fasta", "**/*.fa"]
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! # Credentials
//!
//! Read from environment variables at client construction:
//! - `AWS_ACCESS_KEY_ID` — required
//! - `AWS_SECRET_ACCESS_KEY` — required
//! - `AWS_SESSION_TOKEN` — optional (temporary credentials / instance roles)
//!
//! # Addressing
//!
//! Standard AWS endpoints use virtual-host addressing
//! (`<bucket>.s3.<region>.amazonaws.com`); custom endpoints use path-style
//! (`<endpoint>/<bucket>/<key>`), which is what MinIO and OCI's S3
//! compatibility layer expect.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::BucketConfig;
use crate::models::SourceObject;
use crate::traits::ObjectSource;

type HmacSha256 = Hmac<Sha256>;

/// Outcome of a conditional `put_object` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    /// The object already existed; existing data is never overwritten.
    AlreadyExists,
}

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

/// A client bound to one bucket, holding credentials, glob filters, and a
/// reqwest client reused across calls.
pub struct BucketClient {
    config: BucketConfig,
    creds: AwsCredentials,
    http: reqwest::Client,
    include: GlobSet,
    exclude: GlobSet,
}

impl BucketClient {
    /// Build a client for the configured bucket. Fails when credentials are
    /// missing from the environment or a glob pattern is invalid; both are
    /// startup configuration errors and fatal.
    pub fn new(config: &BucketConfig) -> Result<Self> {
        let creds = AwsCredentials::from_env()?;
        let include = build_globset(&config.include_globs)?;
        let exclude = build_globset(&config.exclude_globs)?;

        Ok(Self {
            config: config.clone(),
            creds,
            http: reqwest::Client::new(),
            include,
            exclude,
        })
    }

    /// List the bucket's objects, apply glob filters, and return them sorted
    /// ascending by creation time. Pages through `ListObjectsV2` until the
    /// listing is exhausted.
    pub async fn list_objects(&self) -> Result<Vec<SourceObject>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !self.config.prefix.is_empty() {
                params.push(("prefix".to_string(), self.config.prefix.clone()));
            }
            if let Some(ref token) = continuation_token {
                params.push(("continuation-token".to_string(), token.clone()));
            }
            params.sort_by(|a, b| a.0.cmp(&b.0));
            let query: String = params
                .iter()
                .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
                .collect::<Vec<_>>()
                .join("&");

            let resp = self
                .signed_request("GET", &self.bucket_root_uri(), &query, &[])
                .send()
                .await
                .with_context(|| {
                    format!("Failed to list objects in bucket '{}'", self.config.bucket)
                })?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "ListObjectsV2 failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let xml = resp.text().await?;
            let page = parse_listing(&xml)?;
            objects.extend(page.objects);

            match page.next_token {
                Some(token) if page.truncated => continuation_token = Some(token),
                _ => break,
            }
        }

        objects.retain(|obj| {
            let rel = self.relative_key(&obj.name);
            !self.exclude.is_match(&rel) && self.include.is_match(&rel)
        });
        objects.sort_by_key(|obj| obj.created_at);
        Ok(objects)
    }

    /// Read one object's full content as UTF-8 text.
    pub async fn fetch_object(&self, name: &str) -> Result<String> {
        let resp = self
            .signed_request("GET", &self.object_uri(name), "", &[])
            .send()
            .await
            .with_context(|| format!("Failed to fetch object '{}'", name))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            bail!("Object '{}' not found in bucket '{}'", name, self.config.bucket);
        }
        if !resp.status().is_success() {
            bail!("GetObject failed (HTTP {}) for '{}'", resp.status(), name);
        }

        let bytes = resp.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).to_string())
    }

    /// Write a string into an object, refusing to overwrite. Sends
    /// `If-None-Match: *`; a precondition failure classifies as
    /// [`PutOutcome::AlreadyExists`] rather than an error.
    pub async fn put_object(&self, name: &str, content: &str) -> Result<PutOutcome> {
        let body = content.as_bytes().to_vec();
        let resp = self
            .signed_request("PUT", &self.object_uri(name), "", &body)
            .header("If-None-Match", "*")
            .body(body.clone())
            .send()
            .await
            .with_context(|| format!("Failed to put object '{}'", name))?;

        if resp.status() == reqwest::StatusCode::PRECONDITION_FAILED {
            return Ok(PutOutcome::AlreadyExists);
        }
        if !resp.status().is_success() {
            bail!("PutObject failed (HTTP {}) for '{}'", resp.status(), name);
        }
        Ok(PutOutcome::Created)
    }

    /// Delete one object. Currently unused by the reconciler itself; exposed
    /// for operator tooling and bring-up scripts.
    pub async fn delete_object(&self, name: &str) -> Result<()> {
        let resp = self
            .signed_request("DELETE", &self.object_uri(name), "", &[])
            .send()
            .await
            .with_context(|| format!("Failed to delete object '{}'", name))?;

        if !resp.status().is_success() {
            bail!("DeleteObject failed (HTTP {}) for '{}'", resp.status(), name);
        }
        Ok(())
    }

    // ============ Addressing ============

    /// Region used in the SigV4 credential scope. Custom endpoints may omit
    /// one; S3-compatible stores conventionally accept `us-east-1`.
    fn region(&self) -> &str {
        if self.config.region.is_empty() {
            "us-east-1"
        } else {
            &self.config.region
        }
    }

    /// Scheme and host for the configured endpoint.
    fn scheme_and_host(&self) -> (&'static str, String) {
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
                (scheme, host)
            }
            None => (
                "https",
                format!(
                    "{}.s3.{}.amazonaws.com",
                    self.config.bucket, self.config.region
                ),
            ),
        }
    }

    /// URI of the bucket root, for listing.
    fn bucket_root_uri(&self) -> String {
        if self.config.endpoint_url.is_some() {
            format!("/{}", self.config.bucket)
        } else {
            "/".to_string()
        }
    }

    /// URI of a single object.
    fn object_uri(&self, key: &str) -> String {
        let encoded: String = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        if self.config.endpoint_url.is_some() {
            format!("/{}/{}", self.config.bucket, encoded)
        } else {
            format!("/{}", encoded)
        }
    }

    /// Object key with the configured prefix removed, for glob matching.
    fn relative_key(&self, key: &str) -> String {
        if self.config.prefix.is_empty() {
            return key.to_string();
        }
        let prefix = self.config.prefix.trim_end_matches('/');
        key.strip_prefix(prefix)
            .map(|s| s.trim_start_matches('/').to_string())
            .unwrap_or_else(|| key.to_string())
    }

    // ============ SigV4 signing ============

    /// Build a request with SigV4 headers for the given method, URI, and
    /// canonical (already sorted and encoded) query string. The body, when
    /// present, participates via its SHA-256 hash; callers still attach it
    /// to the returned builder.
    fn signed_request(
        &self,
        method: &str,
        canonical_uri: &str,
        canonical_query: &str,
        body: &[u8],
    ) -> reqwest::RequestBuilder {
        let (scheme, host) = self.scheme_and_host();
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(body);

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, canonical_uri, canonical_query, canonical_headers, signed_headers, payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region());
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key =
            derive_signing_key(&self.creds.secret_access_key, &date_stamp, self.region(), "s3");
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let url = if canonical_query.is_empty() {
            format!("{}://{}{}", scheme, host, canonical_uri)
        } else {
            format!("{}://{}{}?{}", scheme, host, canonical_uri, canonical_query)
        };

        let mut builder = self
            .http
            .request(
                reqwest::Method::from_bytes(method.as_bytes()).expect("static method name"),
                &url,
            )
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);

        if let Some(ref token) = self.creds.session_token {
            builder = builder.header("x-amz-security-token", token);
        }
        builder
    }
}

#[async_trait]
impl ObjectSource for BucketClient {
    async fn list(&self) -> Result<Vec<SourceObject>> {
        self.list_objects().await
    }

    async fn fetch(&self, name: &str) -> Result<String> {
        self.fetch_object(name).await
    }
}

// ============ SigV4 helpers ============

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

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the SigV4 signing key chain:
///
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

/// URI-encode per RFC 3986, leaving only unreserved characters.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

// ============ Listing XML (minimal, no extra deps) ============

struct ListingPage {
    objects: Vec<SourceObject>,
    truncated: bool,
    next_token: Option<String>,
}

/// Parse a `ListObjectsV2` XML response. Keys ending in `/` (folder
/// placeholders) are skipped.
fn parse_listing(xml: &str) -> Result<ListingPage> {
    let truncated = xml_text(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = xml_text(xml, "NextContinuationToken");

    let mut objects = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<Contents>") {
        let body_start = start + "<Contents>".len();
        let Some(end) = rest[body_start..].find("</Contents>") else {
            break;
        };
        let block = &rest[body_start..body_start + end];
        rest = &rest[body_start + end + "</Contents>".len()..];

        let name = xml_text(block, "Key").unwrap_or_default();
        if name.is_empty() || name.ends_with('/') {
            continue;
        }

        let created_at = match xml_text(block, "LastModified")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        {
            Some(dt) => dt.with_timezone(&Utc),
            None => {
                warn!(key = %name, "listing entry has no parseable LastModified, skipping");
                continue;
            }
        };

        let content_hash = xml_text(block, "ETag")
            .unwrap_or_default()
            .trim_matches('"')
            .to_string();
        let size = xml_text(block, "Size")
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);

        objects.push(SourceObject {
            name,
            size,
            created_at,
            content_hash,
        });
    }

    Ok(ListingPage {
        objects,
        truncated,
        next_token,
    })
}

/// Extract the text content of a simple, non-nested XML tag.
fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)?;
    Some(xml[start..start + end].to_string())
}

/// Build a [`GlobSet`] from pattern strings.
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <IsTruncated>false</IsTruncated>
  <Contents>
    <Key>SEQ|ABC123.fasta</Key>
    <LastModified>2024-05-01T10:00:00Z</LastModified>
    <ETag>"d41d8cd98f00b204e9800998ecf8427e"</ETag>
    <Size>1024</Size>
  </Contents>
  <Contents>
    <Key>folder/</Key>
    <LastModified>2024-05-01T09:00:00Z</LastModified>
    <ETag>"0"</ETag>
    <Size>0</Size>
  </Contents>
</ListBucketResult>"#;

    #[test]
    fn test_parse_listing() {
        let page = parse_listing(LISTING).unwrap();
        assert!(!page.truncated);
        assert!(page.next_token.is_none());
        assert_eq!(page.objects.len(), 1);
        let obj = &page.objects[0];
        assert_eq!(obj.name, "SEQ|ABC123.fasta");
        assert_eq!(obj.size, 1024);
        assert_eq!(obj.content_hash, "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_parse_truncated_listing() {
        let xml = "<ListBucketResult><IsTruncated>true</IsTruncated>\
                   <NextContinuationToken>tok123</NextContinuationToken></ListBucketResult>";
        let page = parse_listing(xml).unwrap();
        assert!(page.truncated);
        assert_eq!(page.next_token.as_deref(), Some("tok123"));
        assert!(page.objects.is_empty());
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("SEQ|ABC 123.fasta"), "SEQ%7CABC%20123.fasta");
        assert_eq!(uri_encode("plain-key_0.9~x"), "plain-key_0.9~x");
    }

    #[test]
    fn test_signing_key_is_deterministic() {
        let a = derive_signing_key("secret", "20240501", "us-east-1", "s3");
        let b = derive_signing_key("secret", "20240501", "us-east-1", "s3");
        assert_eq!(a, b);
        let c = derive_signing_key("secret", "20240502", "us-east-1", "s3");
        assert_ne!(a, c);
    }
}
