//! Denormalized post listing in Workers KV.
//!
//! The listing is a JSON array of `{title, slug}` stored under a single key
//! (`all_posts_metadata` by default). It is independent of the vector index
//! and lets search answer exact title queries without an embedding call.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::config::{Config, Credentials};
use crate::frontmatter;
use crate::http;
use crate::models::{ListingEntry, SourceDocument};
use crate::scan;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("{endpoint} reported failure: {errors}")]
    Rejected { endpoint: String, errors: String },

    #[error("unexpected response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },
}

/// Listing entry for a document that declares both `title` and `slug`.
pub fn listing_entry(doc: &SourceDocument) -> Option<ListingEntry> {
    let parsed = frontmatter::parse(&doc.content);
    let title = parsed.declared("title")?;
    let slug = parsed.declared("slug")?;
    Some(ListingEntry {
        title: title.to_string(),
        slug: slug.strip_prefix('/').unwrap_or(slug).to_string(),
    })
}

/// Listing for every document that declares a title and slug, in input order.
pub fn build_listing(docs: &[SourceDocument]) -> Vec<ListingEntry> {
    docs.iter()
        .filter_map(|doc| {
            let entry = listing_entry(doc);
            if entry.is_none() {
                tracing::warn!(path = %doc.path, "missing title or slug; left out of listing");
            }
            entry
        })
        .collect()
}

/// Key/value store holding the listing.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn put_listing(&self, entries: &[ListingEntry]) -> Result<(), StoreError>;
    async fn fetch_listing(&self) -> Result<Vec<ListingEntry>, StoreError>;
}

pub struct KvClient {
    client: reqwest::Client,
    token: String,
    endpoint: String,
    max_retries: u32,
}

/// URL of one KV value. The key is a single path segment, percent-encoded.
pub fn kv_endpoint(credentials: &Credentials, namespace_id: &str, key: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(&credentials.api_base)
        .with_context(|| format!("invalid api_base: {}", credentials.api_base))?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("api_base cannot be a base URL: {}", credentials.api_base))?
        .pop_if_empty()
        .extend([
            "accounts",
            credentials.account_id.as_str(),
            "storage",
            "kv",
            "namespaces",
            namespace_id,
            "values",
            key,
        ]);
    Ok(url.to_string())
}

impl KvClient {
    pub fn new(config: &Config) -> Result<Self> {
        let (credentials, namespace_id) = config.listing_credentials()?;
        if config.listing.key.is_empty() {
            bail!("listing.key must not be empty");
        }
        let endpoint = kv_endpoint(&credentials, &namespace_id, &config.listing.key)?;
        let client = http::build_client(config.listing.timeout_secs)?;
        Ok(Self {
            client,
            token: credentials.token,
            endpoint,
            max_retries: config.listing.max_retries,
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, StoreError> {
        let endpoint = &self.endpoint;
        let request = request.bearer_auth(&self.token);
        let response = http::send_with_retry(request, self.max_retries, endpoint)
            .await
            .map_err(|e| StoreError::Transport {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| StoreError::Transport {
            endpoint: endpoint.clone(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            let body = http::excerpt(&body);
            tracing::warn!(endpoint = %endpoint, status = status.as_u16(), body = %body, "KV request failed");
            return Err(StoreError::Status {
                endpoint: endpoint.clone(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl MetadataStore for KvClient {
    async fn put_listing(&self, entries: &[ListingEntry]) -> Result<(), StoreError> {
        let request = self.client.put(&self.endpoint).json(entries);
        let body = self.send(request).await?;

        // The API wraps writes in {"success": bool, "errors": [...]}.
        if let Ok(json) = serde_json::from_str::<Value>(&body) {
            if json.get("success").and_then(Value::as_bool) == Some(false) {
                return Err(StoreError::Rejected {
                    endpoint: self.endpoint.clone(),
                    errors: json
                        .get("errors")
                        .map(Value::to_string)
                        .unwrap_or_default(),
                });
            }
        }
        Ok(())
    }

    async fn fetch_listing(&self) -> Result<Vec<ListingEntry>, StoreError> {
        let request = self.client.get(&self.endpoint);
        let body = self.send(request).await?;
        parse_listing(&body).map_err(|message| StoreError::InvalidResponse {
            endpoint: self.endpoint.clone(),
            message,
        })
    }
}

/// Parse a stored listing, ignoring entries without a string title and slug.
pub fn parse_listing(body: &str) -> Result<Vec<ListingEntry>, String> {
    let items: Vec<Value> = serde_json::from_str(body).map_err(|e| e.to_string())?;
    Ok(items
        .iter()
        .filter_map(|item| {
            Some(ListingEntry {
                title: item.get("title")?.as_str()?.to_string(),
                slug: item.get("slug")?.as_str()?.to_string(),
            })
        })
        .collect())
}

/// `postvec listing`: build the listing and write it to KV.
pub async fn run_listing(config: &Config, paths: &[std::path::PathBuf], dry_run: bool) -> Result<()> {
    let store = if dry_run {
        None
    } else {
        Some(KvClient::new(config)?)
    };

    let loaded = scan::load_documents(config, paths)?;
    let entries = build_listing(&loaded.documents);

    if entries.is_empty() {
        bail!("no documents declare both a title and a slug");
    }

    println!("listing");
    println!("  documents read: {}", loaded.documents.len());
    for failure in &loaded.failures {
        println!("  unreadable: {}: {}", failure.path, failure.error);
    }
    println!("  entries: {}", entries.len());
    for entry in entries.iter().take(3) {
        println!("  - {} ({})", entry.title, entry.slug);
    }

    match store {
        None => println!("  dry run: {} entries not uploaded", entries.len()),
        Some(store) => {
            store.put_listing(&entries).await?;
            println!("  uploaded: {}", entries.len());
        }
    }
    println!("ok");
    Ok(())
}
