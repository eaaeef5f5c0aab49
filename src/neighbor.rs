//! Neighbor server client.
//!
//! A thin wrapper over the sequence-relatedness server's HTTP API. Two calls
//! matter to the reconciler: the complete set of identities the server
//! already holds (`GET /api/v2/guids`) and single-sequence submission
//! (`POST /api/v2/insert`). Submission never carries more than one logical
//! sequence per call.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::traits::SequenceServer;

pub struct NeighborClient {
    base_url: String,
    http: reqwest::Client,
}

impl NeighborClient {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Fetch the complete identity set held by the server. Any non-success
    /// response is a listing fault and aborts the caller's pass.
    pub async fn guids(&self) -> Result<HashSet<String>> {
        let url = self.url("/api/v2/guids");
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to reach neighbor server at {}", url))?;

        if !resp.status().is_success() {
            bail!("Neighbor server guid listing failed (HTTP {})", resp.status());
        }

        let body = resp.bytes().await?;
        let guids: Vec<String> = serde_json::from_slice(&body)
            .context("Neighbor server returned malformed guid listing")?;
        Ok(guids.into_iter().collect())
    }

    /// Submit one identity/sequence pair. Returns the raw status code for
    /// every answered request, including rejections and server errors, so
    /// the caller can classify and record it. Only transport failures (no
    /// response at all) surface as `Err`.
    pub async fn insert(&self, identity: &str, sequence: &str) -> Result<u16> {
        let url = self.url("/api/v2/insert");
        let resp = self
            .http
            .post(&url)
            .form(&[("guid", identity), ("seq", sequence)])
            .send()
            .await
            .with_context(|| format!("Failed to reach neighbor server at {}", url))?;

        Ok(resp.status().as_u16())
    }
}

#[async_trait]
impl SequenceServer for NeighborClient {
    async fn identities(&self) -> Result<HashSet<String>> {
        self.guids().await
    }

    async fn submit(&self, identity: &str, sequence: &str) -> Result<u16> {
        self.insert(identity, sequence).await
    }
}
