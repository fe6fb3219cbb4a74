use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use log::{error, warn};
use serde::Serialize;

use crate::runtime::ensure_parent_dir;

/// One anomaly an operator has to review after the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    UnresolvedLink { page: String, target: String },
    MalformedAnchor { page: String, target: String },
    ParseFailure { page: String, error: String },
    RedirectDropped { page: String },
    CollisionRenamed { page: String, original: String, renamed: String },
    SubmissionFailed { page: String, detail: String },
    ImageDownloadFailed { page: String, image: String, error: String },
    LedgerFailed { page: String, error: String },
}

impl Diagnostic {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnresolvedLink { .. } => "unresolved_link",
            Self::MalformedAnchor { .. } => "malformed_anchor",
            Self::ParseFailure { .. } => "parse_failure",
            Self::RedirectDropped { .. } => "redirect_dropped",
            Self::CollisionRenamed { .. } => "collision_renamed",
            Self::SubmissionFailed { .. } => "submission_failed",
            Self::ImageDownloadFailed { .. } => "image_download_failed",
            Self::LedgerFailed { .. } => "ledger_failed",
        }
    }

    pub fn page(&self) -> &str {
        match self {
            Self::UnresolvedLink { page, .. }
            | Self::MalformedAnchor { page, .. }
            | Self::ParseFailure { page, .. }
            | Self::RedirectDropped { page }
            | Self::CollisionRenamed { page, .. }
            | Self::SubmissionFailed { page, .. }
            | Self::ImageDownloadFailed { page, .. }
            | Self::LedgerFailed { page, .. } => page,
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Self::UnresolvedLink { target, .. } => {
                format!("no page matches link target `{target}`; linked into the default space")
            }
            Self::MalformedAnchor { target, .. } => {
                format!("link target `{target}` has an empty anchor; anchor dropped")
            }
            Self::ParseFailure { error, .. } => {
                format!("markup could not be parsed ({error}); original body kept")
            }
            Self::RedirectDropped { .. } => "redirect page not migrated".to_string(),
            Self::CollisionRenamed {
                original, renamed, ..
            } => format!("title `{original}` already existed; created as `{renamed}`"),
            Self::SubmissionFailed { detail, .. } => detail.clone(),
            Self::ImageDownloadFailed { image, error, .. } => {
                format!("failed to download `{image}`: {error}")
            }
            Self::LedgerFailed { error, .. } => {
                format!("destination changed but the ledger was not updated: {error}")
            }
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}",
            self.kind(),
            single_line(self.page()),
            single_line(&self.detail())
        )
    }
}

/// Escapes line breaks and tabs so an entry stays on one log line and keeps
/// its columns.
fn single_line(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}

/// Append-only destination for diagnostics. Recording never fails the run.
pub trait DiagnosticSink {
    fn record(&mut self, diagnostic: Diagnostic);
    fn recorded(&self) -> usize;
}

/// Diagnostic log file shared by the whole run, one tab-separated line per entry.
pub struct FileDiagnosticLog {
    path: PathBuf,
    file: File,
    recorded: usize,
}

impl FileDiagnosticLog {
    pub fn open(path: &Path) -> Result<Self> {
        ensure_parent_dir(path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open diagnostic log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            recorded: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DiagnosticSink for FileDiagnosticLog {
    fn record(&mut self, diagnostic: Diagnostic) {
        warn!("{}: {}", diagnostic.page(), diagnostic.detail());
        let line = format!("{}\t{diagnostic}\n", unix_timestamp());
        let written = self
            .file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush());
        if let Err(err) = written {
            error!(
                "failed to append to diagnostic log {}: {err}",
                self.path.display()
            );
        }
        self.recorded += 1;
    }

    fn recorded(&self) -> usize {
        self.recorded
    }
}

#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    entries: Vec<Diagnostic>,
}

impl MemoryDiagnostics {
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.kind() == kind)
            .count()
    }
}

impl DiagnosticSink for MemoryDiagnostics {
    fn record(&mut self, diagnostic: Diagnostic) {
        warn!("{}: {}", diagnostic.page(), diagnostic.detail());
        self.entries.push(diagnostic);
    }

    fn recorded(&self) -> usize {
        self.entries.len()
    }
}

/// Holds entries without logging them until the caller decides whether they
/// count. Entries are either replayed into a real sink or dropped.
#[derive(Debug, Default)]
pub struct DeferredDiagnostics {
    entries: Vec<Diagnostic>,
}

impl DeferredDiagnostics {
    pub fn replay_into(self, sink: &mut dyn DiagnosticSink) {
        for entry in self.entries {
            sink.record(entry);
        }
    }
}

impl DiagnosticSink for DeferredDiagnostics {
    fn record(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    fn recorded(&self) -> usize {
        self.entries.len()
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
