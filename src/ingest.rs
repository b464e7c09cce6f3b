//! Index run orchestration.
//!
//! Coordinates the flow: discovery → front matter → embedding → batched
//! upsert. Documents are processed one at a time. A document that cannot be
//! embedded is skipped and counted; a batch the index rejects fails the run.

use anyhow::{bail, Result};
use chrono::Utc;
use std::path::PathBuf;

use crate::assemble::{self, SkipReason};
use crate::config::Config;
use crate::embedding::{Embedder, WorkersAiEmbedder};
use crate::models::{IndexRecord, SourceDocument};
use crate::progress::{ProgressEvent, ProgressMode, ProgressReporter};
use crate::scan::{self, ReadFailure};
use crate::vectorize::{VectorIndex, VectorizeClient};

/// Outcome of an index run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Documents read.
    pub documents: usize,
    /// Documents that produced a record.
    pub assembled: usize,
    /// `(path, reason)` for each document that produced no record.
    pub skipped: Vec<(String, String)>,
    /// Records the index accepted.
    pub upserted: usize,
    pub batches_sent: usize,
    pub batches_failed: usize,
}

impl RunSummary {
    /// A run succeeds when every batch was accepted and at least one record landed.
    pub fn succeeded(&self) -> bool {
        self.batches_failed == 0 && self.upserted > 0
    }
}

async fn flush(
    index: &dyn VectorIndex,
    pending: &mut Vec<IndexRecord>,
    summary: &mut RunSummary,
    reporter: &dyn ProgressReporter,
) {
    if pending.is_empty() {
        return;
    }

    summary.batches_sent += 1;
    reporter.report(ProgressEvent::Uploading {
        batch: summary.batches_sent as u64,
        records: pending.len() as u64,
    });

    match index.upsert(pending).await {
        Ok(n) => summary.upserted += n,
        Err(e) => {
            tracing::warn!(batch = summary.batches_sent, records = pending.len(), error = %e, "batch upsert failed");
            summary.batches_failed += 1;
        }
    }
    pending.clear();
}

/// Embed `docs` and upsert them in batches of `batch_size`.
///
/// With `dimensions` unset, the first accepted vector fixes the length for
/// the rest of the run, so a fallback model with a different size can never
/// mix lengths inside one batch.
pub async fn index_documents(
    docs: &[SourceDocument],
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    dimensions: Option<usize>,
    batch_size: usize,
    reporter: &dyn ProgressReporter,
) -> RunSummary {
    let batch_size = batch_size.max(1);
    let total = docs.len() as u64;
    let mut summary = RunSummary {
        documents: docs.len(),
        ..RunSummary::default()
    };
    let mut pending: Vec<IndexRecord> = Vec::with_capacity(batch_size.min(docs.len()));
    let mut expected = dimensions;

    for (i, doc) in docs.iter().enumerate() {
        reporter.report(ProgressEvent::Processing {
            n: i as u64 + 1,
            total,
            path: doc.path.clone(),
        });

        match assemble::assemble(doc, embedder, expected).await {
            Ok(record) => {
                if expected.is_none() {
                    tracing::debug!(dimensions = record.values.len(), "vector length fixed by first record");
                    expected = Some(record.values.len());
                }
                summary.assembled += 1;
                pending.push(record);
                if pending.len() >= batch_size {
                    flush(index, &mut pending, &mut summary, reporter).await;
                }
            }
            Err(reason) => {
                skip(&mut summary, reporter, doc, &reason);
            }
        }
    }

    flush(index, &mut pending, &mut summary, reporter).await;
    summary
}

fn skip(
    summary: &mut RunSummary,
    reporter: &dyn ProgressReporter,
    doc: &SourceDocument,
    reason: &SkipReason,
) {
    tracing::warn!(path = %doc.path, reason = %reason, "document skipped");
    reporter.report(ProgressEvent::Skipped {
        path: doc.path.clone(),
        reason: reason.to_string(),
    });
    summary.skipped.push((doc.path.clone(), reason.to_string()));
}

/// Count files that could not be read as skipped documents.
pub fn skip_unreadable(
    summary: &mut RunSummary,
    reporter: &dyn ProgressReporter,
    failures: &[ReadFailure],
) {
    for failure in failures {
        let reason = format!("unreadable: {}", failure.error);
        reporter.report(ProgressEvent::Skipped {
            path: failure.path.clone(),
            reason: reason.clone(),
        });
        summary.documents += 1;
        summary.skipped.push((failure.path.clone(), reason));
    }
}

/// `postvec index`: discover, embed, and upsert documents.
pub async fn run_index(
    config: &Config,
    paths: &[PathBuf],
    dry_run: bool,
    limit: Option<usize>,
    progress: ProgressMode,
) -> Result<()> {
    // Credentials are checked before any file is read or request is made.
    let clients = if dry_run {
        None
    } else {
        Some((WorkersAiEmbedder::new(config)?, VectorizeClient::new(config)?))
    };

    let reporter = progress.reporter();
    let source = if paths.is_empty() {
        config.content.root.display().to_string()
    } else {
        format!("{} paths", paths.len())
    };
    reporter.report(ProgressEvent::Discovering {
        source: source.clone(),
    });

    let loaded = scan::load_documents(config, paths)?;
    let mut docs = loaded.documents;
    if let Some(limit) = limit {
        docs.truncate(limit);
    }

    let Some((embedder, index)) = clients else {
        print_dry_run(&source, &docs, &loaded.failures);
        return Ok(());
    };

    let mut summary = index_documents(
        &docs,
        &embedder,
        &index,
        config.index.dimensions,
        config.index.batch_size,
        reporter.as_ref(),
    )
    .await;
    skip_unreadable(&mut summary, reporter.as_ref(), &loaded.failures);

    println!("index {}", source);
    println!("  documents: {}", summary.documents);
    println!("  assembled: {}", summary.assembled);
    println!("  skipped: {}", summary.skipped.len());
    for (path, reason) in &summary.skipped {
        println!("    {}: {}", path, reason);
    }
    println!(
        "  batches: {} sent, {} failed",
        summary.batches_sent, summary.batches_failed
    );
    println!("  upserted: {}", summary.upserted);

    if summary.batches_failed > 0 {
        bail!(
            "{} of {} batches were rejected by the index",
            summary.batches_failed,
            summary.batches_sent
        );
    }
    if !summary.succeeded() {
        bail!("no documents were indexed");
    }
    println!("ok");
    Ok(())
}

fn print_dry_run(source: &str, docs: &[SourceDocument], failures: &[ReadFailure]) {
    let now = Utc::now();
    println!("index {} (dry-run)", source);
    println!("  documents: {}", docs.len());
    for failure in failures {
        println!("  unreadable  {}: {}", failure.path, failure.error);
    }
    for doc in docs {
        let prepared = assemble::prepare(doc, now);
        let field = |key: &str| prepared.metadata.get(key).cloned().unwrap_or_default();
        println!(
            "  {}  {}  slug={}  title={}",
            prepared.id,
            prepared.path,
            field("slug"),
            field("title")
        );
        if let Some(err) = &prepared.parse_error {
            println!("    front matter error: {}", err);
        }
    }
    println!("ok");
}
