//! Recoverable findings of a run and the final summary.

use crate::engine::MigrationState;
use crate::error::Error;
use crate::formats::DeletedRow;
use crate::identifier::{ItemId, MergeGroup};
use dashmap::DashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningReason {
    UnmatchedPath,
    UnresolvedIdentifier,
    IdentifierTaken,
    MissingFile,
    UnresolvableTarget,
    FieldError(String),
}

impl fmt::Display for WarningReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningReason::UnmatchedPath => f.write_str("no rule for path"),
            WarningReason::UnresolvedIdentifier => f.write_str("unresolved identifier"),
            WarningReason::IdentifierTaken => f.write_str("new identifier already used by another row"),
            WarningReason::MissingFile => f.write_str("file missing after copy"),
            WarningReason::UnresolvableTarget => f.write_str("no filesystem location"),
            WarningReason::FieldError(e) => write!(f, "field skipped: {}", e),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Diagnostic {
    /// Field left unmodified.
    FieldWarning {
        document: PathBuf,
        field: String,
        value: String,
        reason: WarningReason,
    },
    /// Entities collapsed onto one identifier. `deleted_row` is set when a row
    /// had to be removed to keep a key unique.
    MergeNotice {
        document: Option<PathBuf>,
        new_path: String,
        new_id: ItemId,
        merged: Vec<String>,
        deleted_row: Option<DeletedRow>,
    },
    SameSourceTarget {
        path: PathBuf,
    },
    JobFailed {
        path: PathBuf,
        error: String,
    },
}

#[derive(Debug, Default)]
struct Counters {
    paths_rewritten: AtomicUsize,
    identifiers_rewritten: AtomicUsize,
    rows_deleted: AtomicUsize,
    merges: AtomicUsize,
    unresolved: AtomicUsize,
    files_copied: AtomicUsize,
    files_relocated: AtomicUsize,
    timestamps_updated: AtomicUsize,
    missing_files: AtomicUsize,
    failed_jobs: AtomicUsize,
}

/// Shared, append-only sink for everything that is reported rather than raised.
pub struct Diagnostics {
    entries: Mutex<Vec<Diagnostic>>,
    reported: DashSet<String>,
    counters: Counters,
    log_no_warnings: bool,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Diagnostics {
    pub fn new(log_no_warnings: bool) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            reported: DashSet::new(),
            counters: Counters::default(),
            log_no_warnings,
        }
    }

    fn push(&self, diagnostic: Diagnostic) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }

    /// Report a field that was left as it is. Candidate values are reported once per run.
    pub fn field_warning(&self, document: &Path, field: &str, value: &str, reason: WarningReason) {
        let once = matches!(
            reason,
            WarningReason::UnmatchedPath | WarningReason::UnresolvedIdentifier
        );
        if once && !self.reported.insert(format!("{:?}\u{0}{}", reason, value)) {
            return;
        }
        match reason {
            WarningReason::UnmatchedPath | WarningReason::UnresolvedIdentifier => {
                self.counters.unresolved.fetch_add(1, Ordering::Relaxed);
            }
            WarningReason::MissingFile => {
                self.counters.missing_files.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        if reason == WarningReason::UnmatchedPath && self.log_no_warnings {
            debug!("No rule for {} ({} {})", value, document.display(), field);
            return;
        }
        warn!("{}: {} in {} [{}]", reason, value, document.display(), field);
        self.push(Diagnostic::FieldWarning {
            document: document.to_path_buf(),
            field: field.to_string(),
            value: value.to_string(),
            reason,
        });
    }

    pub fn merge_group(&self, group: &MergeGroup) {
        self.counters.merges.fetch_add(1, Ordering::Relaxed);
        let merged: Vec<String> = group.members.iter().map(|(_, p)| p.clone()).collect();
        warn!(
            "{} entities now share {} ({}), keeping {}: {:?}",
            merged.len(),
            group.new_path,
            group.new_id,
            group.retained(),
            merged
        );
        self.push(Diagnostic::MergeNotice {
            document: None,
            new_path: group.new_path.clone(),
            new_id: group.new_id,
            merged,
            deleted_row: None,
        });
    }

    pub fn row_deleted(&self, document: &Path, new_id: ItemId, row: DeletedRow) {
        self.counters.rows_deleted.fetch_add(1, Ordering::Relaxed);
        warn!(
            "Removed duplicate {}#{} from {} (now {}): {:?}",
            row.table,
            row.rowid,
            document.display(),
            new_id,
            row.content
        );
        self.push(Diagnostic::MergeNotice {
            document: Some(document.to_path_buf()),
            new_path: String::new(),
            new_id,
            merged: Vec::new(),
            deleted_row: Some(row),
        });
    }

    pub fn same_source_target(&self, path: &Path) {
        warn!("Working on the original file {}", path.display());
        self.push(Diagnostic::SameSourceTarget {
            path: path.to_path_buf(),
        });
    }

    pub fn job_failed(&self, path: &Path, err: &Error) {
        self.counters.failed_jobs.fetch_add(1, Ordering::Relaxed);
        error!("{}", err);
        self.push(Diagnostic::JobFailed {
            path: path.to_path_buf(),
            error: err.to_string(),
        });
    }

    pub fn add_paths_rewritten(&self, n: usize) {
        self.counters.paths_rewritten.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_identifiers_rewritten(&self, n: usize) {
        self.counters.identifiers_rewritten.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_files_copied(&self, n: usize) {
        self.counters.files_copied.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_files_relocated(&self, n: usize) {
        self.counters.files_relocated.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_timestamps_updated(&self, n: usize) {
        self.counters.timestamps_updated.fetch_add(n, Ordering::Relaxed);
    }

    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn report(&self, state: MigrationState) -> MigrationReport {
        let c = &self.counters;
        let report = MigrationReport {
            state,
            paths_rewritten: c.paths_rewritten.load(Ordering::Relaxed),
            identifiers_rewritten: c.identifiers_rewritten.load(Ordering::Relaxed),
            rows_deleted: c.rows_deleted.load(Ordering::Relaxed),
            merges: c.merges.load(Ordering::Relaxed),
            unresolved: c.unresolved.load(Ordering::Relaxed),
            files_copied: c.files_copied.load(Ordering::Relaxed),
            files_relocated: c.files_relocated.load(Ordering::Relaxed),
            timestamps_updated: c.timestamps_updated.load(Ordering::Relaxed),
            missing_files: c.missing_files.load(Ordering::Relaxed),
            failed_jobs: c.failed_jobs.load(Ordering::Relaxed),
            diagnostics: self.entries(),
        };
        info!(
            "{} paths, {} identifiers rewritten; {} merges, {} rows deleted, {} unresolved",
            report.paths_rewritten,
            report.identifiers_rewritten,
            report.merges,
            report.rows_deleted,
            report.unresolved
        );
        report
    }
}

/// Summary of a finished (or failed) run.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub state: MigrationState,
    pub paths_rewritten: usize,
    pub identifiers_rewritten: usize,
    pub rows_deleted: usize,
    pub merges: usize,
    pub unresolved: usize,
    pub files_copied: usize,
    pub files_relocated: usize,
    pub timestamps_updated: usize,
    pub missing_files: usize,
    pub failed_jobs: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl MigrationReport {
    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::FieldWarning { .. }))
    }

    pub fn merge_notices(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::MergeNotice { .. }))
    }
}
