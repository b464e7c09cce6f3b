//! Query pipeline: embed a query, search the index, format the matches.
//!
//! Search never fails once the clients are built. Any embedding or index
//! error is logged and yields an empty result list. Matches are kept in the
//! order the index returned them; there is no re-ranking.

use anyhow::Result;
use serde_json::Value;

use crate::config::Config;
use crate::embedding::{Embedder, WorkersAiEmbedder};
use crate::listing::{KvClient, MetadataStore};
use crate::models::{ListingEntry, SearchHit};
use crate::vectorize::{Match, VectorIndex, VectorizeClient};

/// Score reported for a title match.
const TITLE_MATCH_SCORE: &str = "1.0000";

/// Embed `query` and return up to `top_k` hits in index order.
pub async fn search(
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    query: &str,
    top_k: usize,
) -> Vec<SearchHit> {
    let query = query.trim();
    if query.is_empty() {
        return Vec::new();
    }

    let vector = match embedder.embed(query).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "query embedding failed");
            return Vec::new();
        }
    };

    match index.query(&vector, top_k).await {
        Ok(matches) => format_matches(&matches),
        Err(e) => {
            tracing::warn!(error = %e, "index query failed");
            Vec::new()
        }
    }
}

fn metadata_text<'a>(m: &'a Match, key: &str) -> Option<&'a str> {
    m.metadata
        .as_ref()?
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Turn index matches into hits, dropping any without a title, slug or score.
pub fn format_matches(matches: &[Match]) -> Vec<SearchHit> {
    matches
        .iter()
        .filter_map(|m| {
            let (Some(title), Some(slug)) = (metadata_text(m, "title"), metadata_text(m, "slug"))
            else {
                tracing::warn!(id = ?m.id, "match lacks title or slug; skipped");
                return None;
            };
            let Some(score) = m.score.filter(|s| s.is_finite()) else {
                tracing::warn!(id = ?m.id, "match has no score; skipped");
                return None;
            };
            Some(SearchHit {
                title: title.to_string(),
                slug: slug.to_string(),
                score: format!("{:.4}", score),
            })
        })
        .collect()
}

/// Listing entries whose title contains the query or is contained by it,
/// ignoring case.
pub fn title_matches(listing: &[ListingEntry], query: &str) -> Vec<SearchHit> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    listing
        .iter()
        .filter(|entry| {
            let title = entry.title.trim().to_lowercase();
            !title.is_empty() && (title.contains(&needle) || needle.contains(&title))
        })
        .map(|entry| SearchHit {
            title: entry.title.clone(),
            slug: entry.slug.clone(),
            score: TITLE_MATCH_SCORE.to_string(),
        })
        .collect()
}

/// Title lookup against the stored listing, then vector search when nothing matched.
pub async fn search_with_titles(
    store: &dyn MetadataStore,
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    query: &str,
    top_k: usize,
) -> Vec<SearchHit> {
    if query.trim().is_empty() {
        return Vec::new();
    }

    match store.fetch_listing().await {
        Ok(listing) => {
            let mut hits = title_matches(&listing, query);
            if !hits.is_empty() {
                hits.truncate(top_k);
                return hits;
            }
        }
        Err(e) => tracing::warn!(error = %e, "listing fetch failed; using vector search"),
    }

    search(embedder, index, query, top_k).await
}

/// `postvec search`: run a query and print the hits.
pub async fn run_search(
    config: &Config,
    query: &str,
    top_k: Option<usize>,
    titles: bool,
    json: bool,
) -> Result<()> {
    let top_k = top_k.unwrap_or(config.search.top_k);
    if top_k == 0 {
        anyhow::bail!("--top-k must be at least 1");
    }

    let embedder = WorkersAiEmbedder::new(config)?;
    let index = VectorizeClient::new(config)?;

    let hits = if titles {
        let store = KvClient::new(config)?;
        search_with_titles(&store, &embedder, &index, query, top_k).await
    } else {
        search(&embedder, &index, query, top_k).await
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{}] {}", i + 1, hit.score, hit.title);
        println!("    slug: {}", hit.slug);
    }
    Ok(())
}
