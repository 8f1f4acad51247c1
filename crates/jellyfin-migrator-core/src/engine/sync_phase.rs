use super::id_phase::relocated_target;
use super::plan::{same_file, JobFile};
use super::RunContext;
use crate::error::Result;
use crate::formats::{DocumentAdapter, TableDocument};
use crate::paths::resolver::copy_file;
use crate::report::WarningReason;
use crate::timestamps::date_update;
use tracing::debug;

/// Copy a verbatim job file, placing it under its remapped name when its path embeds
/// an identifier that moved.
pub(crate) fn copy(ctx: &RunContext<'_>, job: &JobFile) -> Result<()> {
    let destination = relocated_target(ctx, &job.target).unwrap_or_else(|| job.target.clone());
    if same_file(&job.source, &destination) {
        debug!("{} is already in place", destination.display());
        return Ok(());
    }
    copy_file(&job.source, &destination)?;
    ctx.diagnostics.add_files_copied(1);
    if destination != job.target {
        ctx.diagnostics.add_files_relocated(1);
    }
    Ok(())
}

/// Write the on-disk creation and modification times of every entity back into its row.
pub(crate) fn timestamps(ctx: &RunContext<'_>, job: &JobFile) -> Result<()> {
    let Some(entity) = job.entity() else {
        return Ok(());
    };
    if entity.created_column.is_none() && entity.modified_column.is_none() {
        return Ok(());
    }

    let mut doc = TableDocument::open(&job.target, Vec::new())?;
    let mut updated = 0;
    for row in doc.entity_rows(entity)? {
        let Some(path) = row.path.as_deref().filter(|p| !p.is_empty()) else {
            continue;
        };
        let label = format!("{}.{}#{}", entity.table, entity.path_column, row.rowid);

        let Some(file) = ctx.resolver.resolve(path) else {
            ctx.diagnostics
                .field_warning(&job.target, &label, path, WarningReason::UnresolvableTarget);
            continue;
        };
        if !file.exists() {
            ctx.diagnostics
                .field_warning(&job.target, &label, path, WarningReason::MissingFile);
            continue;
        }
        let times = match ctx.file_times.read(&file) {
            Ok(times) => times,
            Err(e) => {
                ctx.diagnostics.field_warning(
                    &job.target,
                    &label,
                    path,
                    WarningReason::FieldError(e.to_string()),
                );
                continue;
            }
        };

        let created = entity
            .created_column
            .as_ref()
            .and_then(|_| date_update(row.created.as_deref(), &times.created));
        let modified = entity
            .modified_column
            .as_ref()
            .and_then(|_| date_update(row.modified.as_deref(), &times.modified));
        if created.is_none() && modified.is_none() {
            continue;
        }
        doc.update_dates(entity, row.rowid, created.as_deref(), modified.as_deref())?;
        updated += 1;
    }

    doc.save()?;
    debug!("{}: {} timestamps updated", job.relative, updated);
    ctx.diagnostics.add_timestamps_updated(updated);
    Ok(())
}
