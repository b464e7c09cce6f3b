//! Content discovery and loading.
//!
//! Walks `[content].root` with `walkdir`, applying include/exclude globs
//! against paths relative to the root. Version control and build directories
//! are always excluded. Results are sorted for deterministic ordering.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{Config, ContentConfig};
use crate::models::SourceDocument;

/// Markdown files under the content root, sorted by path.
pub fn scan_content(content: &ContentConfig) -> Result<Vec<PathBuf>> {
    let root = &content.root;
    if !root.exists() {
        bail!("content root does not exist: {}", root.display());
    }

    let include_set = build_globset(&content.include_globs)?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(content.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(content.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy();

        if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
            continue;
        }
        paths.push(path.to_path_buf());
    }

    paths.sort();
    Ok(paths)
}

/// A file that could not be read as UTF-8 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFailure {
    pub path: String,
    pub error: String,
}

/// Documents that were read, plus the files that could not be.
#[derive(Debug, Default)]
pub struct LoadedDocuments {
    pub documents: Vec<SourceDocument>,
    pub failures: Vec<ReadFailure>,
}

/// Read each file as UTF-8. The document path is the path as given.
///
/// An unreadable file is logged and reported in `failures`; the others are
/// still read.
pub fn read_documents(paths: &[PathBuf]) -> LoadedDocuments {
    let mut loaded = LoadedDocuments::default();
    for path in paths {
        match std::fs::read_to_string(path) {
            Ok(content) => loaded.documents.push(SourceDocument {
                path: path_string(path),
                content,
            }),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not read document");
                loaded.failures.push(ReadFailure {
                    path: path_string(path),
                    error: e.to_string(),
                });
            }
        }
    }
    loaded
}

/// Documents for a command: the explicit `paths`, or everything under the content root.
///
/// Fails only when the content root cannot be scanned.
pub fn load_documents(config: &Config, paths: &[PathBuf]) -> Result<LoadedDocuments> {
    if paths.is_empty() {
        let discovered = scan_content(&config.content)?;
        tracing::debug!(root = %config.content.root.display(), files = discovered.len(), "scanned content root");
        Ok(read_documents(&discovered))
    } else {
        Ok(read_documents(paths))
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
