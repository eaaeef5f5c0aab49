use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub ledger: LedgerConfig,
    pub server: ServerConfig,
    pub bucket: BucketConfig,
    #[serde(default)]
    pub poll: PollConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Base URL of the neighbor server, e.g. `http://localhost:5025`.
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct BucketConfig {
    pub bucket: String,
    pub region: String,
    #[serde(default)]
    pub prefix: String,
    /// Custom endpoint for S3-compatible stores (MinIO, OCI, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Required identity tag: only objects named `<tag>|...` carry a valid
    /// identity and are eligible for submission.
    #[serde(default = "default_identity_tag")]
    pub identity_tag: String,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.fasta".to_string(), "**/*.fa".to_string()]
}

fn default_identity_tag() -> String {
    "SEQ".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollConfig {
    /// Seconds to sleep after a pass that found no candidates.
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            idle_secs: default_idle_secs(),
        }
    }
}

fn default_idle_secs() -> u64 {
    180
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.server.base_url.is_empty() {
        anyhow::bail!("server.base_url must not be empty");
    }
    if !config.server.base_url.starts_with("http://")
        && !config.server.base_url.starts_with("https://")
    {
        anyhow::bail!(
            "server.base_url must be an http(s) URL, got '{}'",
            config.server.base_url
        );
    }

    if config.bucket.bucket.is_empty() {
        anyhow::bail!("bucket.bucket must not be empty");
    }
    if config.bucket.region.is_empty() && config.bucket.endpoint_url.is_none() {
        anyhow::bail!("bucket.region must be set when no endpoint_url is given");
    }
    if config.bucket.identity_tag.is_empty() {
        anyhow::bail!("bucket.identity_tag must not be empty");
    }
    if config.bucket.identity_tag.contains('|') {
        anyhow::bail!("bucket.identity_tag must not contain the '|' separator");
    }

    if config.poll.idle_secs == 0 {
        anyhow::bail!("poll.idle_secs must be > 0");
    }

    Ok(config)
}
