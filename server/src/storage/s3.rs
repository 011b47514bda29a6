//! S3-compatible blob store client.
//!
//! A small path-style REST client with AWS Signature V4 signing, enough for
//! get/put/delete/head and paginated ListObjectsV2 against S3 or MinIO.
//! Transport failures map to `GitError::Transport`; 404s are the not-found
//! shapes of the `BlobStore` contract.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};

use git_store::errors::{GitError, Result};
use git_store::store::BlobStore;

use crate::config::S3Config;

type HmacSha256 = Hmac<Sha256>;

pub struct S3BlobStore {
    client: reqwest::Client,
    config: S3Config,
}

impl S3BlobStore {
    pub fn new(config: S3Config) -> anyhow::Result<Self> {
        if config.access_key.is_empty() || config.secret_key.is_empty() {
            anyhow::bail!("S3 credentials missing; set SKIFF_S3_ACCESS_KEY / SKIFF_S3_SECRET_KEY");
        }
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, config })
    }

    fn host(&self) -> Result<String> {
        let trimmed = self
            .config
            .endpoint
            .strip_prefix("https://")
            .or_else(|| self.config.endpoint.strip_prefix("http://"))
            .unwrap_or(&self.config.endpoint);
        Ok(trimmed.trim_end_matches('/').to_string())
    }

    /// Path-style URI for a key: `/<bucket>/<encoded key>`.
    fn canonical_uri(&self, key: &str) -> String {
        let mut uri = format!("/{}", self.config.bucket);
        for segment in key.split('/') {
            uri.push('/');
            uri.push_str(&urlencoding::encode(segment));
        }
        uri
    }

    async fn request(
        &self,
        method: Method,
        key: &str,
        query: &[(String, String)],
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response> {
        let host = self.host()?;
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date_stamp = now.format("%Y%m%d").to_string();
        let payload_hash = hex::encode(Sha256::digest(&body));

        let canonical_uri = if key.is_empty() {
            format!("/{}", self.config.bucket)
        } else {
            self.canonical_uri(key)
        };

        let mut sorted_query = query.to_vec();
        sorted_query.sort();
        let canonical_query = sorted_query
            .iter()
            .map(|(k, v)| {
                format!(
                    "{}={}",
                    urlencoding::encode(k),
                    urlencoding::encode(v)
                )
            })
            .collect::<Vec<_>>()
            .join("&");

        let canonical_headers = format!(
            "host:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n"
        );
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";

        let canonical_request = format!(
            "{}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
            method.as_str()
        );

        let scope = format!("{date_stamp}/{}/s3/aws4_request", self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signature = {
            let key = sign_step(
                format!("AWS4{}", self.config.secret_key).as_bytes(),
                date_stamp.as_bytes(),
            );
            let key = sign_step(&key, self.config.region.as_bytes());
            let key = sign_step(&key, b"s3");
            let key = sign_step(&key, b"aws4_request");
            hex::encode(sign_step(&key, string_to_sign.as_bytes()))
        };

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.config.access_key
        );

        let scheme = if self.config.endpoint.starts_with("http://") { "http" } else { "https" };
        let mut url = format!("{scheme}://{host}{canonical_uri}");
        if !canonical_query.is_empty() {
            url.push('?');
            url.push_str(&canonical_query);
        }

        let mut request = self
            .client
            .request(method, &url)
            .header("authorization", authorization)
            .header("x-amz-date", amz_date)
            .header("x-amz-content-sha256", payload_hash);
        if let Some(content_type) = content_type {
            request = request.header("content-type", content_type);
        }
        if !body.is_empty() {
            request = request.body(body);
        }
        request.send().await.map_err(GitError::transport)
    }
}

fn sign_step(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let response = self
            .request(Method::GET, key, &[], Bytes::new(), None)
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                Ok(Some(response.bytes().await.map_err(GitError::transport)?))
            }
            status => Err(GitError::transport(format!("GET {key}: {status}"))),
        }
    }

    async fn put(&self, key: &str, data: Bytes, content_type: Option<&str>) -> Result<()> {
        let content_type = content_type.unwrap_or("application/octet-stream");
        let response = self
            .request(Method::PUT, key, &[], data, Some(content_type))
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(GitError::transport(format!("PUT {key}: {}", response.status())))
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, key, &[], Bytes::new(), None)
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(GitError::transport(format!("DELETE {key}: {status}"))),
        }
    }

    async fn head(&self, key: &str) -> Result<bool> {
        let response = self
            .request(Method::HEAD, key, &[], Bytes::new(), None)
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(GitError::transport(format!("HEAD {key}: {status}"))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("prefix".to_string(), prefix.to_string()),
            ];
            if let Some(token) = &continuation {
                query.push(("continuation-token".to_string(), token.clone()));
            }
            let response = self
                .request(Method::GET, "", &query, Bytes::new(), None)
                .await?;
            if !response.status().is_success() {
                return Err(GitError::transport(format!(
                    "LIST {prefix}: {}",
                    response.status()
                )));
            }
            let xml = response.text().await.map_err(GitError::transport)?;
            keys.extend(extract_tag_values(&xml, "Key"));
            if extract_tag_values(&xml, "IsTruncated").first().map(String::as_str) == Some("true") {
                continuation = extract_tag_values(&xml, "NextContinuationToken").pop();
                if continuation.is_none() {
                    break;
                }
            } else {
                break;
            }
        }
        Ok(keys)
    }
}

/// Pull every `<tag>value</tag>` out of a ListObjectsV2 response body.
fn extract_tag_values(xml: &str, tag: &str) -> Vec<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut values = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find(&open) {
        rest = &rest[start + open.len()..];
        let Some(end) = rest.find(&close) else { break };
        values.push(xml_unescape(&rest[..end]));
        rest = &rest[end + close.len()..];
    }
    values
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
