//! Index run progress reporting.
//!
//! Reports what `postvec index` is doing so users see which document is being
//! embedded, how many are left, and which ones were skipped. Progress is
//! emitted on **stderr** so the stdout summary stays parseable for scripts.

use std::io::Write;

/// A single progress event for an index run.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// Reading documents from disk. Total unknown.
    Discovering { source: String },
    /// Document `n` of `total` is being embedded.
    Processing { n: u64, total: u64, path: String },
    /// A document produced no record.
    Skipped { path: String, reason: String },
    /// A batch is being sent to the index.
    Uploading { batch: u64, records: u64 },
}

/// Reports index progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "index  embedding  12 / 1,204  posts/a/index.md".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Discovering { source } => {
                format!("index {}  discovering...\n", source)
            }
            ProgressEvent::Processing { n, total, path } => format!(
                "index  embedding  {} / {}  {}\n",
                format_number(*n),
                format_number(*total),
                path
            ),
            ProgressEvent::Skipped { path, reason } => {
                format!("index  skipped  {}: {}\n", path, reason)
            }
            ProgressEvent::Uploading { batch, records } => format!(
                "index  upserting batch {}  {} records\n",
                batch,
                format_number(*records)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

fn event_json(event: &ProgressEvent) -> serde_json::Value {
    match event {
        ProgressEvent::Discovering { source } => serde_json::json!({
            "event": "progress",
            "phase": "discovering",
            "source": source
        }),
        ProgressEvent::Processing { n, total, path } => serde_json::json!({
            "event": "progress",
            "phase": "embedding",
            "n": n,
            "total": total,
            "path": path
        }),
        ProgressEvent::Skipped { path, reason } => serde_json::json!({
            "event": "skipped",
            "path": path,
            "reason": reason
        }),
        ProgressEvent::Uploading { batch, records } => serde_json::json!({
            "event": "progress",
            "phase": "upserting",
            "batch": batch,
            "records": records
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
