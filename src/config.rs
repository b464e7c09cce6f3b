//! TOML configuration.
//!
//! The whole configuration is loaded once by [`load_config`] at the process
//! boundary and then passed by reference into every component. Components
//! never read environment variables themselves; [`load_config`] is the only
//! place where `CLOUDFLARE_*` variables fill in missing credentials.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub cloudflare: CloudflareConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub listing: ListingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CloudflareConfig {
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Shared token used by any service section without its own token.
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for CloudflareConfig {
    fn default() -> Self {
        Self {
            account_id: None,
            api_base: default_api_base(),
            api_token: None,
        }
    }
}

fn default_api_base() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

/// Request body shape accepted by a Workers AI embedding model.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// `{"text": "..."}`
    Text,
    /// `{"contexts": [{"text": "..."}]}`
    Contexts,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub model: String,
    #[serde(default = "default_input")]
    pub input: InputFormat,
}

fn default_input() -> InputFormat {
    InputFormat::Text
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_primary")]
    pub primary: ModelConfig,
    #[serde(default = "default_fallback")]
    pub fallback: Option<ModelConfig>,
    /// Set to `false` to fail on the first non-success status.
    #[serde(default = "default_use_fallback")]
    pub use_fallback: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            fallback: default_fallback(),
            use_fallback: true,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            api_token: None,
        }
    }
}

fn default_primary() -> ModelConfig {
    ModelConfig {
        model: "@cf/baai/bge-m3".to_string(),
        input: InputFormat::Contexts,
    }
}

fn default_fallback() -> Option<ModelConfig> {
    Some(ModelConfig {
        model: "@cf/baai/bge-base-en-v1.5".to_string(),
        input: InputFormat::Text,
    })
}

fn default_use_fallback() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// Expected vector length. Records with any other length are skipped.
    /// When unset, the first accepted vector of a run fixes the length.
    #[serde(default)]
    pub dimensions: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: None,
            dimensions: None,
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            api_token: None,
        }
    }
}

fn default_batch_size() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    #[serde(default = "default_content_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            root: default_content_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_content_root() -> PathBuf {
    PathBuf::from("content/posts")
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.markdown".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListingConfig {
    #[serde(default)]
    pub namespace_id: Option<String>,
    #[serde(default = "default_listing_key")]
    pub key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            namespace_id: None,
            key: default_listing_key(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            api_token: None,
        }
    }
}

fn default_listing_key() -> String {
    "all_posts_metadata".to_string()
}

/// Account id and bearer token for one Cloudflare service.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_base: String,
    pub account_id: String,
    pub token: String,
}

impl EmbeddingConfig {
    /// The fallback model, if one is configured and enabled.
    pub fn fallback_model(&self) -> Option<&ModelConfig> {
        if self.use_fallback {
            self.fallback.as_ref()
        } else {
            None
        }
    }
}

impl Config {
    /// Credentials for the Workers AI embedding endpoint.
    pub fn embedding_credentials(&self) -> Result<Credentials> {
        self.credentials("embedding", self.embedding.api_token.as_ref())
    }

    /// Credentials for the Vectorize index, plus the index name.
    pub fn index_credentials(&self) -> Result<(Credentials, String)> {
        let creds = self.credentials("index", self.index.api_token.as_ref())?;
        let name = self
            .index
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("index.name must be set"))?;
        Ok((creds, name))
    }

    /// Credentials for the KV metadata store, plus the namespace id.
    pub fn listing_credentials(&self) -> Result<(Credentials, String)> {
        let creds = self.credentials("listing", self.listing.api_token.as_ref())?;
        let namespace = self
            .listing
            .namespace_id
            .clone()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("listing.namespace_id must be set"))?;
        Ok((creds, namespace))
    }

    fn credentials(&self, section: &str, token: Option<&String>) -> Result<Credentials> {
        let account_id = self
            .cloudflare
            .account_id
            .clone()
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!("cloudflare.account_id must be set (or CLOUDFLARE_ACCOUNT_ID)")
            })?;
        let token = token
            .or(self.cloudflare.api_token.as_ref())
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no API token for [{}]: set {}.api_token, cloudflare.api_token or CLOUDFLARE_API_TOKEN",
                    section,
                    section
                )
            })?;
        Ok(Credentials {
            api_base: self.cloudflare.api_base.trim_end_matches('/').to_string(),
            account_id,
            token,
        })
    }

    /// Fill missing credentials from environment-like lookups.
    ///
    /// `lookup` is `std::env::var` in production and a map in tests.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fill(&mut self.cloudflare.account_id, lookup("CLOUDFLARE_ACCOUNT_ID"));
        fill(&mut self.cloudflare.api_token, lookup("CLOUDFLARE_API_TOKEN"));
        fill(&mut self.embedding.api_token, lookup("CLOUDFLARE_AI_TOKEN"));
        fill(&mut self.index.api_token, lookup("CLOUDFLARE_VECTORIZE_TOKEN"));
        fill(&mut self.listing.api_token, lookup("CLOUDFLARE_KV_TOKEN"));
    }

    fn validate(&self) -> Result<()> {
        if self.index.batch_size == 0 {
            bail!("index.batch_size must be > 0");
        }
        if self.index.dimensions == Some(0) {
            bail!("index.dimensions must be > 0 when set");
        }
        if self.search.top_k == 0 {
            bail!("search.top_k must be >= 1");
        }
        if self.embedding.timeout_secs == 0
            || self.index.timeout_secs == 0
            || self.listing.timeout_secs == 0
        {
            bail!("timeout_secs must be > 0");
        }
        if self.embedding.primary.model.trim().is_empty() {
            bail!("embedding.primary.model must not be empty");
        }
        Ok(())
    }
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_none() {
        *slot = value.filter(|v| !v.is_empty());
    }
}

/// Parse and validate a configuration document without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = parse_config(&content)?;
    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}
