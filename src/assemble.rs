//! Document assembly: identity, index-safe metadata, and the embedding call.
//!
//! The index only stores scalar metadata, so every value leaving this module
//! is a string. Lists are JSON-encoded, booleans and other scalars use their
//! display form, and nulls are dropped.

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;

use crate::embedding::{EmbedError, Embedder};
use crate::frontmatter::{self, FrontValue, ParsedDocument};
use crate::models::{IndexRecord, Metadata, SourceDocument};

/// Front matter keys copied into the index metadata.
pub const ALLOWED_KEYS: [&str; 6] = ["title", "slug", "date", "category", "tags", "description"];

/// Why a document produced no index record.
#[derive(Debug, thiserror::Error)]
pub enum SkipReason {
    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error("embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Stable identity for a document: lowercase hex MD5 of the path's UTF-8 bytes.
pub fn document_id(path: &str) -> String {
    format!("{:x}", md5::compute(path.as_bytes()))
}

/// The declared slug without its leading `/`, or the parent directory name.
pub fn resolve_slug(parsed: &ParsedDocument, path: &str) -> String {
    if let Some(slug) = parsed.declared("slug") {
        return slug.strip_prefix('/').unwrap_or(slug).to_string();
    }

    let path = Path::new(path);
    path.parent()
        .and_then(Path::file_name)
        .or_else(|| path.file_stem())
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// ISO-8601 UTC timestamp with a literal `Z`, e.g. `2025-03-18T09:15:02.123456Z`.
pub fn utc_stamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Convert one front matter value to its index form. `None` means drop it.
fn index_value(value: &FrontValue) -> Option<String> {
    match value {
        FrontValue::Null => None,
        FrontValue::Text(s) => Some(s.clone()),
        FrontValue::Bool(b) => Some(b.to_string()),
        FrontValue::List(items) => serde_json::to_string(items).ok(),
    }
}

/// Build the metadata record for a parsed document.
pub fn build_metadata(parsed: &ParsedDocument, path: &str, now: DateTime<Utc>) -> Metadata {
    let mut metadata = Metadata::new();

    for key in ALLOWED_KEYS {
        let value = match key {
            "title" => Some(frontmatter::resolve_title(parsed, path)),
            "slug" => Some(resolve_slug(parsed, path)),
            _ => parsed.front_matter.get(key).and_then(index_value),
        };
        if let Some(value) = value {
            metadata.insert(key.to_string(), value);
        }
    }

    metadata
        .entry("date".to_string())
        .or_insert_with(|| utc_stamp(now));
    metadata.insert("file_path".to_string(), path.to_string());
    metadata
}

/// Everything about a document except its vector.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub id: String,
    pub path: String,
    /// Text sent to the embedding model.
    pub embed_text: String,
    pub metadata: Metadata,
    pub parse_error: Option<String>,
}

/// Parse a document and build its identity and metadata.
pub fn prepare(doc: &SourceDocument, now: DateTime<Utc>) -> PreparedDocument {
    let parsed = frontmatter::parse(&doc.content);
    let metadata = build_metadata(&parsed, &doc.path, now);

    // Blank body: embed the title.
    let embed_text = if parsed.body.trim().is_empty() {
        metadata.get("title").cloned().unwrap_or_default()
    } else {
        parsed.body.clone()
    };

    PreparedDocument {
        id: document_id(&doc.path),
        path: doc.path.clone(),
        embed_text,
        metadata,
        parse_error: parsed.parse_error,
    }
}

/// Produce an index record for `doc`, or the reason it must be skipped.
pub async fn assemble(
    doc: &SourceDocument,
    embedder: &dyn Embedder,
    dimensions: Option<usize>,
) -> Result<IndexRecord, SkipReason> {
    let prepared = prepare(doc, Utc::now());
    if let Some(err) = &prepared.parse_error {
        tracing::warn!(
            path = %prepared.path,
            error = %err,
            "front matter could not be parsed; indexing with derived title and slug"
        );
    }

    let values = embedder.embed(&prepared.embed_text).await?;

    if let Some(expected) = dimensions {
        if values.len() != expected {
            return Err(SkipReason::DimensionMismatch {
                expected,
                actual: values.len(),
            });
        }
    }

    Ok(IndexRecord {
        id: prepared.id,
        values,
        metadata: prepared.metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct FixedEmbedder {
        vector: Vec<f32>,
        seen: Mutex<Vec<String>>,
    }

    impl FixedEmbedder {
        fn new(vector: Vec<f32>) -> Self {
            Self {
                vector,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            self.seen.lock().unwrap().push(text.to_string());
            Ok(self.vector.clone())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            Err(EmbedError::Status {
                endpoint: "http://test".to_string(),
                status: 500,
                body: "boom".to_string(),
            })
        }
    }

    fn doc(path: &str, content: &str) -> SourceDocument {
        SourceDocument {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 18, 9, 15, 2).unwrap()
    }

    #[test]
    fn test_document_id_is_md5_of_path() {
        assert_eq!(
            document_id("posts/hello/index.md"),
            format!("{:x}", md5::compute(b"posts/hello/index.md"))
        );
        assert_eq!(document_id(""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_document_id_deterministic() {
        let a = document_id("content/posts/a.md");
        let b = document_id("content/posts/a.md");
        assert_eq!(a, b);
        assert_ne!(a, document_id("content/posts/b.md"));
    }

    #[test]
    fn test_hello_scenario_metadata() {
        let parsed = frontmatter::parse("---\ntitle: \"Hello\"\nslug: \"/hello\"\n---\n# Hello\nWorld");
        let metadata = build_metadata(&parsed, "posts/hello/index.md", fixed_now());

        assert_eq!(metadata["title"], "Hello");
        assert_eq!(metadata["slug"], "hello");
        assert_eq!(metadata["file_path"], "posts/hello/index.md");
        assert_eq!(metadata["date"], "2025-03-18T09:15:02.000000Z");
        assert!(!metadata.contains_key("tags"));
    }

    #[test]
    fn test_list_values_json_encoded() {
        let parsed = frontmatter::parse(
            "---\ntitle: T\ntags: [rust, search]\ncategory: [notes]\n---\nbody",
        );
        let metadata = build_metadata(&parsed, "p/index.md", fixed_now());
        assert_eq!(metadata["tags"], r#"["rust","search"]"#);
        assert_eq!(metadata["category"], r#"["notes"]"#);
    }

    #[test]
    fn test_scalars_stringified_and_nulls_dropped() {
        let parsed = frontmatter::parse(
            "---\ntitle: T\ndescription:\ncategory: true\ndate: 2024-01-02\nauthor: me\n---\nbody",
        );
        let metadata = build_metadata(&parsed, "p/index.md", fixed_now());
        assert_eq!(metadata["category"], "true");
        assert_eq!(metadata["date"], "2024-01-02");
        assert!(!metadata.contains_key("description"));
        assert!(!metadata.contains_key("author"));
    }

    #[test]
    fn test_null_date_gets_stamped() {
        let parsed = frontmatter::parse("---\ntitle: T\ndate:\n---\nbody");
        let metadata = build_metadata(&parsed, "p/index.md", fixed_now());
        assert_eq!(metadata["date"], "2025-03-18T09:15:02.000000Z");
    }

    #[test]
    fn test_utc_stamp_has_z_suffix() {
        let stamp = utc_stamp(fixed_now());
        assert!(stamp.ends_with('Z'));
        assert!(!stamp.contains("+00:00"));
    }

    #[test]
    fn test_slug_from_parent_directory() {
        let parsed = frontmatter::parse("# No front matter");
        assert_eq!(
            resolve_slug(&parsed, "content/posts/my-first-post/index.md"),
            "my-first-post"
        );
        assert_eq!(resolve_slug(&parsed, "lonely.md"), "lonely");
    }

    #[test]
    fn test_title_and_slug_always_present() {
        let parsed = frontmatter::parse("plain text only");
        let metadata = build_metadata(&parsed, "posts/plain/index.md", fixed_now());
        assert_eq!(metadata["title"], "index.md");
        assert_eq!(metadata["slug"], "plain");
    }

    #[tokio::test]
    async fn test_assemble_hello_record() {
        let embedder = FixedEmbedder::new(vec![0.1, 0.2, 0.3]);
        let path = "posts/hello/index.md";
        let record = assemble(
            &doc(path, "---\ntitle: \"Hello\"\nslug: \"/hello\"\n---\n# Hello\nWorld"),
            &embedder,
            Some(3),
        )
        .await
        .unwrap();

        assert_eq!(record.id, document_id(path));
        assert_eq!(record.values, vec![0.1, 0.2, 0.3]);
        assert_eq!(record.metadata["slug"], "hello");
        assert_eq!(
            *embedder.seen.lock().unwrap(),
            vec!["# Hello\nWorld".to_string()]
        );
    }

    #[tokio::test]
    async fn test_assemble_dimension_mismatch_skips() {
        let embedder = FixedEmbedder::new(vec![0.1, 0.2]);
        let err = assemble(&doc("a.md", "text"), &embedder, Some(768))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SkipReason::DimensionMismatch {
                expected: 768,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_assemble_embedding_failure_skips() {
        let err = assemble(&doc("a.md", "text"), &FailingEmbedder, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SkipReason::Embedding(EmbedError::Status { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_body_embeds_title() {
        let embedder = FixedEmbedder::new(vec![1.0]);
        assemble(&doc("a/index.md", "---\ntitle: Only Title\n---\n"), &embedder, None)
            .await
            .unwrap();
        assert_eq!(
            *embedder.seen.lock().unwrap(),
            vec!["Only Title".to_string()]
        );
    }

    #[tokio::test]
    async fn test_malformed_front_matter_still_indexed() {
        let embedder = FixedEmbedder::new(vec![0.1, 0.2, 0.3]);
        let path = "posts/broken-post/index.md";
        let content = "---\ntitle: [unclosed\n---\n# Heading Title\nbody";
        let record = assemble(&doc(path, content), &embedder, Some(3))
            .await
            .unwrap();

        assert_eq!(record.id, document_id(path));
        assert_eq!(record.metadata["title"], "Heading Title");
        assert_eq!(record.metadata["slug"], "broken-post");
        assert_eq!(record.metadata["file_path"], path);
        assert!(record.metadata["date"].ends_with('Z'));
        assert_eq!(*embedder.seen.lock().unwrap(), vec![content.to_string()]);
    }
}
