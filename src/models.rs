//! Core data models used throughout postvec.
//!
//! These types represent the documents, index records, and search results
//! that flow through the indexing and query pipelines.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A Markdown file read once per indexing run.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Path as discovered or given on the command line. Identity is derived from it.
    pub path: String,
    pub content: String,
}

/// Metadata as sent to the index: string keys to string values only.
pub type Metadata = BTreeMap<String, String>;

/// One vector destined for the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: Metadata,
}

/// A formatted search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub slug: String,
    /// Similarity score rendered with four decimals.
    pub score: String,
}

/// Entry of the denormalized `{title, slug}` listing kept in the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub title: String,
    pub slug: String,
}
