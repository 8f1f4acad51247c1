use super::RunContext;
use crate::config::{EntitySpec, JobSpec, TableSpec};
use crate::error::{Error, Result};
use crate::formats::{DocumentKind, TableDocument};
use crate::paths::{join_prefix, normalize};
use crate::report::WarningReason;
use dashmap::DashSet;
use glob::{glob_with, MatchOptions, Pattern};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// One concrete file claimed by a job.
#[derive(Debug, Clone)]
pub struct JobFile {
    /// Position in the plan; the first half of every encounter key.
    pub index: usize,
    pub spec: Arc<JobSpec>,
    pub source: PathBuf,
    /// Path below the source root with `/` separators.
    pub relative: String,
    pub target: PathBuf,
    pub kind: DocumentKind,
    pub no_log: bool,
}

impl JobFile {
    pub fn tables(&self) -> &[TableSpec] {
        &self.spec.tables
    }

    pub fn entity(&self) -> Option<&EntitySpec> {
        if self.kind == DocumentKind::Table {
            self.spec.entity.as_ref()
        } else {
            None
        }
    }
}

/// Expand every job into files, claim each file for the first job that matches it,
/// compute targets and check table declarations against the source databases.
pub(crate) fn build_plan(ctx: &RunContext<'_>) -> Result<Vec<JobFile>> {
    let root = &ctx.config.source_root;
    let claimed: DashSet<PathBuf> = DashSet::new();
    let mut files = Vec::new();

    for spec in ctx.config.jobs() {
        let spec = Arc::new(spec);
        let sources = expand_source(root, &spec.source)?;
        if sources.is_empty() {
            debug!("Nothing matches '{}'", spec.source);
        }

        for source in sources {
            if !claimed.insert(source.clone()) {
                continue;
            }
            let relative = match source.strip_prefix(root) {
                Ok(rel) => normalize(&rel.to_string_lossy()),
                Err(_) => continue,
            };
            let kind = spec.kind_for(&source);

            let Some(target) = resolve_target(ctx, &spec, &relative) else {
                ctx.diagnostics.field_warning(
                    &source,
                    "target",
                    &relative,
                    WarningReason::UnresolvableTarget,
                );
                continue;
            };
            if same_file(&source, &target) && !ctx.confirm_in_place(&source) {
                continue;
            }
            if kind == DocumentKind::Table && (!spec.tables.is_empty() || spec.entity.is_some()) {
                let checked = TableDocument::open_read_only(&source, spec.tables.clone())
                    .and_then(|doc| doc.validate(spec.entity.as_ref()));
                match checked {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        ctx.diagnostics.job_failed(&source, &Error::job(&source, e));
                        continue;
                    }
                }
            }

            debug!("{} -> {} ({:?})", source.display(), target.display(), kind);
            files.push(JobFile {
                index: files.len(),
                spec: Arc::clone(&spec),
                source,
                relative,
                target,
                kind,
                no_log: spec.no_log,
            });
        }
    }
    Ok(files)
}

/// Files matched by a job source, sorted. A directory stands for every file below it.
pub fn expand_source(root: &Path, source: &str) -> Result<Vec<PathBuf>> {
    let source = source.trim_start_matches(['/', '\\']);
    if !source.contains(['*', '?', '[']) {
        let path = root.join(source);
        if path.is_file() {
            return Ok(vec![path]);
        }
        if path.is_dir() {
            return Ok(WalkDir::new(&path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .collect());
        }
        return Ok(Vec::new());
    }

    let pattern = format!(
        "{}/{}",
        Pattern::escape(normalize(&root.to_string_lossy()).trim_end_matches('/')),
        source
    );
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    let entries = glob_with(&pattern, options)
        .map_err(|e| Error::Config(format!("invalid pattern '{}': {}", source, e)))?;

    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => warn!("Cannot read {}: {}", e.path().display(), e.error()),
        }
    }
    files.sort();
    Ok(files)
}

/// Target of a job file: explicit, or the old location pushed through both rule stages.
pub(crate) fn resolve_target(ctx: &RunContext<'_>, spec: &JobSpec, relative: &str) -> Option<PathBuf> {
    if !spec.is_auto_target() {
        let explicit = PathBuf::from(&spec.target);
        return Some(if explicit.is_absolute() {
            explicit
        } else {
            ctx.config.target_root.join(explicit)
        });
    }
    let original_root = normalize(&ctx.config.original_root()?);
    let original = join_prefix(&original_root, relative);
    let rewritten = ctx.rules.rewrite(&original);
    ctx.resolver.resolve(&rewritten.path)
}

pub(crate) fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
