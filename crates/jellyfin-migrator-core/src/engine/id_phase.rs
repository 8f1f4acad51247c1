use super::plan::JobFile;
use super::{encoded_of, value_of, RunContext};
use crate::error::Result;
use crate::formats::{
    edit_document, DocumentAdapter, DocumentKind, Field, JsonDocument, LinkDocument, Remap,
    TableDocument, XmlDocument,
};
use crate::identifier::{find_identifiers, EncodedId, Encoding, ItemId};
use crate::paths::resolver::move_file;
use crate::report::WarningReason;
use rusqlite::types::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Phase 2 for one file: substitute every remapped identifier, then move the file when
/// its own location embeds one. Returns the new location of a moved file.
pub(crate) fn run(ctx: &RunContext<'_>, job: &JobFile) -> Result<Option<PathBuf>> {
    let replaced = match job.kind {
        DocumentKind::Table => rewrite_table(ctx, job)?,
        DocumentKind::Xml => {
            let mut doc = XmlDocument::open(&job.target, &ctx.config.xml_skip_elements)?;
            substitute_document(ctx, &mut doc)?
        }
        DocumentKind::Json => substitute_document(ctx, &mut JsonDocument::open(&job.target)?)?,
        DocumentKind::Link => substitute_document(ctx, &mut LinkDocument::open(&job.target)?)?,
        DocumentKind::Copy => 0,
    };
    ctx.diagnostics.add_identifiers_rewritten(replaced);

    let Some(destination) = relocated_target(ctx, &job.target) else {
        return Ok(None);
    };
    move_file(&job.target, &destination)?;
    info!("Moved {} to {}", job.target.display(), destination.display());
    ctx.diagnostics.add_files_relocated(1);
    Ok(Some(destination))
}

/// Where `target` belongs once the identifiers in its path below the target root are replaced.
pub(super) fn relocated_target(ctx: &RunContext<'_>, target: &Path) -> Option<PathBuf> {
    let relative = ctx.resolver.relative_to_target(target)?;
    let substituted = ctx.registry.substitute_text(&relative).text?;
    Some(ctx.resolver.target_root().join(substituted))
}

fn substitute_document<D: DocumentAdapter>(ctx: &RunContext<'_>, doc: &mut D) -> Result<usize> {
    let location = doc.location().to_path_buf();
    let mut replaced = 0;
    edit_document(doc, |field| substitute_field(ctx, &location, field, &mut replaced))?;
    doc.save()?;
    Ok(replaced)
}

fn substitute_field<K>(
    ctx: &RunContext<'_>,
    document: &Path,
    field: &Field<K>,
    replaced: &mut usize,
) -> Option<String> {
    let substitution = ctx.registry.substitute_text(&field.value);
    for raw in &substitution.unresolved {
        ctx.diagnostics
            .field_warning(document, &field.label, raw, WarningReason::UnresolvedIdentifier);
    }
    *replaced += substitution.replaced;
    substitution.text
}

fn rewrite_table(ctx: &RunContext<'_>, job: &JobFile) -> Result<usize> {
    let mut doc = TableDocument::open(&job.target, job.tables().to_vec())?;
    let mut replaced = 0;

    for table in job.tables() {
        for id_column in &table.ids {
            let encodings = id_column.encodings()?;
            replaced += replace_column(ctx, job, &mut doc, &table.name, &id_column.column, &encodings)?;
        }
    }

    let location = job.target.clone();
    edit_document(&mut doc, |field| substitute_field(ctx, &location, field, &mut replaced))?;
    doc.save()?;
    Ok(replaced)
}

/// Replace every remapped value of one declared identifier column, keeping each value's
/// encoding. Values are applied in registry order so that when several old identifiers
/// collapse into one, the first entity keeps its row. Only rows of merged-away entities
/// are removed; any other collision leaves the row on its old value with a warning.
fn replace_column(
    ctx: &RunContext<'_>,
    job: &JobFile,
    doc: &mut TableDocument,
    table: &str,
    column: &str,
    encodings: &[Encoding],
) -> Result<usize> {
    let label = format!("{}.{}", table, column);
    let mut pending: Vec<(usize, Remap, ItemId)> = Vec::new();

    for value in doc.distinct_values(table, column)? {
        let Some(encoded) = encoded_of(&value) else {
            continue;
        };
        let decoded = encodings
            .iter()
            .find_map(|&encoding| ItemId::decode(&encoded, encoding, ctx.swap()).map(|id| (encoding, id)));
        let Some((encoding, old)) = decoded else {
            // Lists of identifiers in one text cell
            if let Value::Text(text) = &value {
                if let Some(new_text) = ctx.registry.substitute_text(text).text {
                    if let Some(new_id) = first_identifier(ctx, &new_text) {
                        let remap = Remap {
                            old: value.clone(),
                            new: Value::Text(new_text),
                            merge: false,
                        };
                        pending.push((usize::MAX, remap, new_id));
                        continue;
                    }
                }
            }
            debug!("{} in {}: '{}' is not an identifier", label, job.relative, render(&encoded));
            continue;
        };

        match ctx.registry.lookup(&old) {
            Some(new) => {
                let order = ctx.registry.record_index(&old).unwrap_or(usize::MAX);
                let remap = Remap {
                    new: value_of(new.encode(encoding, ctx.swap())),
                    old: value,
                    merge: ctx.registry.superseded(&old),
                };
                pending.push((order, remap, new));
            }
            None if ctx.registry.is_known(&old) => {}
            None => ctx.diagnostics.field_warning(
                &job.target,
                &label,
                &render(&encoded),
                WarningReason::UnresolvedIdentifier,
            ),
        }
    }

    pending.sort_by_key(|(order, ..)| *order);
    let remaps: Vec<Remap> = pending.iter().map(|(_, remap, _)| remap.clone()).collect();
    let outcomes = doc.remap_values(table, column, &remaps)?;

    let mut updated = 0;
    for ((_, remap, new_id), outcome) in pending.into_iter().zip(outcomes) {
        updated += outcome.updated;
        for row in outcome.deleted {
            ctx.diagnostics.row_deleted(&job.target, new_id, row);
        }
        for rowid in outcome.conflicts {
            ctx.diagnostics.field_warning(
                &job.target,
                &format!("{}#{}", label, rowid),
                &render_value(&remap.old),
                WarningReason::IdentifierTaken,
            );
        }
    }
    Ok(updated)
}

fn first_identifier(ctx: &RunContext<'_>, text: &str) -> Option<ItemId> {
    let found = find_identifiers(text).into_iter().next()?;
    let raw = EncodedId::Text(text[found.start..found.end].to_string());
    ItemId::decode(&raw, Encoding::text(found.form, false), ctx.swap())
}

fn render_value(value: &Value) -> String {
    encoded_of(value).map(|encoded| render(&encoded)).unwrap_or_default()
}

fn render(value: &EncodedId) -> String {
    match value {
        EncodedId::Binary(bytes) => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
        EncodedId::Text(text) => text.clone(),
    }
}
