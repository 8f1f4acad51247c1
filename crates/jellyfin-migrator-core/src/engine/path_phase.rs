use super::plan::{same_file, JobFile};
use super::{entity_id, RunContext};
use crate::error::Result;
use crate::formats::{
    edit_document, DocumentAdapter, DocumentKind, EntityRow, Field, FieldRole, JsonDocument, JsonText,
    LinkDocument, TableDocument, XmlDocument,
};
use crate::paths::{is_rooted, resolver::copy_file};
use crate::report::WarningReason;
use crate::scanner::{classify, rewrite_image_list, ValueKind};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Phase 1 for one file: put a working copy at the target and rewrite every path in it.
pub(crate) fn run(ctx: &RunContext<'_>, job: &JobFile) -> Result<()> {
    if !same_file(&job.source, &job.target) {
        copy_file(&job.source, &job.target)?;
    }

    let rewritten = match job.kind {
        DocumentKind::Table => rewrite_table(ctx, job)?,
        DocumentKind::Xml => {
            let mut doc = XmlDocument::open(&job.target, &ctx.config.xml_skip_elements)?;
            rewrite_document(ctx, &mut doc)?
        }
        DocumentKind::Json => rewrite_document(ctx, &mut JsonDocument::open(&job.target)?)?,
        DocumentKind::Link => rewrite_document(ctx, &mut LinkDocument::open(&job.target)?)?,
        DocumentKind::Copy => 0,
    };
    if rewritten > 0 {
        debug!("{}: {} paths rewritten", job.relative, rewritten);
    }
    ctx.diagnostics.add_paths_rewritten(rewritten);
    Ok(())
}

fn rewrite_document<D: DocumentAdapter>(ctx: &RunContext<'_>, doc: &mut D) -> Result<usize> {
    let location = doc.location().to_path_buf();
    let summary = edit_document(doc, |field| rewrite_field(ctx, &location, field))?;
    if summary.rejected > 0 {
        warn!("{}: {} edits could not be applied", location.display(), summary.rejected);
    }
    doc.save()?;
    Ok(summary.applied)
}

/// Tables also feed the identifier registry: entity rows are read before and after the
/// rewrite and every entity whose path moved is recorded in row order.
fn rewrite_table(ctx: &RunContext<'_>, job: &JobFile) -> Result<usize> {
    let mut doc = TableDocument::open(&job.target, job.tables().to_vec())?;
    let before = match job.entity() {
        Some(entity) => doc.entity_rows(entity)?,
        None => Vec::new(),
    };
    for row in &before {
        if let Some(id) = row.id.as_ref().and_then(|v| entity_id(v, ctx.swap())) {
            ctx.registry.note_known(id);
        }
    }

    let location = job.target.clone();
    let summary = edit_document(&mut doc, |field| rewrite_field(ctx, &location, field))?;
    if summary.rejected > 0 {
        warn!("{}: {} cells could not be updated", location.display(), summary.rejected);
    }

    if let Some(entity) = job.entity() {
        let after: HashMap<i64, EntityRow> = doc
            .entity_rows(entity)?
            .into_iter()
            .map(|row| (row.rowid, row))
            .collect();
        for row in &before {
            record_entity(ctx, job, row, after.get(&row.rowid));
        }
    }

    doc.save()?;
    Ok(summary.applied)
}

fn record_entity(ctx: &RunContext<'_>, job: &JobFile, old: &EntityRow, new: Option<&EntityRow>) {
    let (Some(kind), Some(old_path)) = (old.kind.as_deref(), old.path.as_deref()) else {
        return;
    };
    let Some(new_path) = new.and_then(|row| row.path.as_deref()) else {
        return;
    };
    // Token paths never take part in identifier derivation.
    if old_path.is_empty() || old_path == new_path || old_path.starts_with('%') || new_path.starts_with('%') {
        return;
    }
    let old_id = old.id.as_ref().and_then(|v| entity_id(v, ctx.swap()));
    ctx.registry
        .record_path((job.index, old.rowid as u64), kind, old_path, new_path, old_id);
}

fn rewrite_field<K>(ctx: &RunContext<'_>, document: &Path, field: &Field<K>) -> Option<String> {
    let label = field.label.as_str();
    let value = field.value.as_str();
    match field.role {
        FieldRole::Path => rewrite_path(ctx, document, label, value, is_rooted(value)),
        FieldRole::ImageList => {
            rewrite_image_list(value, |path| rewrite_path(ctx, document, label, path, is_rooted(path)))
        }
        FieldRole::Json => rewrite_json(ctx, document, label, value),
        FieldRole::Auto => rewrite_auto(ctx, document, label, value),
    }
}

fn rewrite_auto(ctx: &RunContext<'_>, document: &Path, label: &str, value: &str) -> Option<String> {
    let class = classify(value);
    match class.kind {
        ValueKind::Path { .. } => rewrite_path(ctx, document, label, value, class.is_reportable()),
        ValueKind::ImageList => rewrite_image_list(value, |path| {
            rewrite_path(ctx, document, label, path, class.is_reportable())
        }),
        _ => None,
    }
}

fn rewrite_json(ctx: &RunContext<'_>, document: &Path, label: &str, value: &str) -> Option<String> {
    let text = match JsonText::parse(value.to_string()) {
        Ok(text) => text,
        Err(e) => {
            debug!("{} in {}: not JSON ({})", label, document.display(), e);
            return rewrite_auto(ctx, document, label, value);
        }
    };
    let edited = text.edit(|key, inner| {
        rewrite_auto(ctx, document, &format!("{}:{}", label, key), inner)
    });
    match edited {
        Ok(result) => result,
        Err(e) => {
            ctx.diagnostics.field_warning(
                document,
                label,
                value,
                WarningReason::FieldError(e.to_string()),
            );
            None
        }
    }
}

/// `Some` only when a rule matched and the text actually changed.
/// Surrounding whitespace is not part of the path and is kept as it is.
fn rewrite_path(
    ctx: &RunContext<'_>,
    document: &Path,
    label: &str,
    value: &str,
    report: bool,
) -> Option<String> {
    let path = value.trim();
    let rewrite = ctx.rules.rewrite(path);
    if rewrite.matched {
        if !rewrite.changed(path) {
            return None;
        }
        let start = value.len() - value.trim_start().len();
        let end = start + path.len();
        return Some(format!("{}{}{}", &value[..start], rewrite.path, &value[end..]));
    }
    if report {
        ctx.diagnostics
            .field_warning(document, label, path, WarningReason::UnmatchedPath);
    } else {
        debug!("{} in {}: no rule for '{}'", label, document.display(), path);
    }
    None
}
