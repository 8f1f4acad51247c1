use super::{DocumentAdapter, Edit, EditSummary, Field, FieldRole};
use crate::config::{EntitySpec, TableSpec};
use crate::error::{Error, Result};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Address of one cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellKey {
    pub table: String,
    pub column: String,
    pub rowid: i64,
}

/// A row removed while resolving a key collision, kept for manual recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedRow {
    pub table: String,
    pub rowid: i64,
    pub content: Vec<(String, String)>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub updated: usize,
    pub deleted: Vec<DeletedRow>,
    /// Rows whose update collided but that were not allowed to be dropped.
    pub conflicts: Vec<i64>,
}

/// One pending change of an identifier column value.
#[derive(Debug, Clone, PartialEq)]
pub struct Remap {
    pub old: Value,
    pub new: Value,
    /// The old entity was merged into another one, so colliding rows may be deleted.
    pub merge: bool,
}

#[derive(Debug, Clone)]
pub struct EntityRow {
    pub rowid: i64,
    pub id: Option<Value>,
    pub kind: Option<String>,
    pub path: Option<String>,
    pub created: Option<String>,
    pub modified: Option<String>,
}

/// An SQLite file with its declared tables. All edits of one job happen in a
/// single transaction that is committed by [`DocumentAdapter::save`].
pub struct TableDocument {
    path: PathBuf,
    conn: Connection,
    tables: Vec<TableSpec>,
    in_transaction: bool,
    dirty: bool,
}

pub(crate) fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

const PARKED_PREFIX: &str = "jellyfin-migrator:parked:";

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
    )
}

impl TableDocument {
    pub fn open(path: &Path, tables: Vec<TableSpec>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        debug!("Opened database {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            conn,
            tables,
            in_transaction: false,
            dirty: false,
        })
    }

    /// Open without write access, for checking declarations against a source file.
    pub fn open_read_only(path: &Path, tables: Vec<TableSpec>) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn,
            tables,
            in_transaction: false,
            dirty: false,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }

    fn columns_of(&self, table: &str) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1)")?;
        let names = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(names)
    }

    /// Every declared table and column must exist. A missing one is a configuration error.
    pub fn validate(&self, entity: Option<&EntitySpec>) -> Result<()> {
        let mut wanted: Vec<(&str, Vec<&str>)> = self
            .tables
            .iter()
            .map(|t| (t.name.as_str(), t.columns().collect()))
            .collect();
        if let Some(entity) = entity {
            wanted.push((entity.table.as_str(), entity.columns().collect()));
        }

        for (table, columns) in wanted {
            let existing = self.columns_of(table)?;
            if existing.is_empty() {
                return Err(Error::Config(format!(
                    "{}: declared table '{}' does not exist",
                    self.path.display(),
                    table
                )));
            }
            for column in columns {
                if !existing.contains(column) {
                    return Err(Error::Config(format!(
                        "{}: table '{}' has no column '{}'",
                        self.path.display(),
                        table,
                        column
                    )));
                }
            }
        }
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    /// Text cells of `table.column` in rowid order. Non-text values are skipped.
    pub fn for_each_row(
        &self,
        table: &str,
        column: &str,
        visit: &mut dyn FnMut(i64, &str),
    ) -> Result<()> {
        let sql = format!(
            "SELECT rowid, {col} FROM {tbl} WHERE {col} IS NOT NULL ORDER BY rowid",
            col = quote(column),
            tbl = quote(table)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let rowid: i64 = row.get(0)?;
            if let ValueRef::Text(bytes) = row.get_ref(1)? {
                match std::str::from_utf8(bytes) {
                    Ok(text) => visit(rowid, text),
                    Err(_) => debug!("{}.{}#{} is not UTF-8, skipped", table, column, rowid),
                }
            }
        }
        Ok(())
    }

    pub fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<Value>> {
        let sql = format!(
            "SELECT DISTINCT {col} FROM {tbl} WHERE {col} IS NOT NULL",
            col = quote(column),
            tbl = quote(table)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let values = stmt
            .query_map([], |row| row.get::<_, Value>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(values)
    }

    /// Replace every `old` in `table.column` with `new`.
    ///
    /// When the bulk update hits a uniqueness constraint the rows are updated one by one.
    /// A row whose update still collides is deleted when `merge` is set and otherwise
    /// left as it is and listed in [`ReplaceOutcome::conflicts`].
    pub fn replace_value(
        &mut self,
        table: &str,
        column: &str,
        old: &Value,
        new: &Value,
        merge: bool,
    ) -> Result<ReplaceOutcome> {
        self.begin()?;
        let update = format!(
            "UPDATE {tbl} SET {col} = ?1 WHERE {col} = ?2",
            col = quote(column),
            tbl = quote(table)
        );
        match self.conn.execute(&update, params![new, old]) {
            Ok(updated) => {
                self.dirty |= updated > 0;
                return Ok(ReplaceOutcome {
                    updated,
                    ..ReplaceOutcome::default()
                });
            }
            Err(e) if is_constraint_violation(&e) => {
                debug!("{}.{}: collision on update, retrying row by row", table, column);
            }
            Err(e) => return Err(e.into()),
        }

        let select = format!(
            "SELECT rowid FROM {tbl} WHERE {col} = ?1 ORDER BY rowid",
            col = quote(column),
            tbl = quote(table)
        );
        let rowids = {
            let mut stmt = self.conn.prepare(&select)?;
            let ids = stmt
                .query_map(params![old], |row| row.get::<_, i64>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };

        let update_row = format!(
            "UPDATE {tbl} SET {col} = ?1 WHERE rowid = ?2",
            col = quote(column),
            tbl = quote(table)
        );
        let mut outcome = ReplaceOutcome::default();
        for rowid in rowids {
            match self.conn.execute(&update_row, params![new, rowid]) {
                Ok(n) => outcome.updated += n,
                Err(e) if is_constraint_violation(&e) && !merge => {
                    debug!("{}.{}#{}: new value already taken", table, column, rowid);
                    outcome.conflicts.push(rowid);
                }
                Err(e) if is_constraint_violation(&e) => {
                    let content = self.row_content(table, rowid)?;
                    self.delete_row(table, rowid)?;
                    warn!(
                        "Deleted duplicate row {}#{} in {}: {:?}",
                        table,
                        rowid,
                        self.path.display(),
                        content
                    );
                    outcome.deleted.push(DeletedRow {
                        table: table.to_string(),
                        rowid,
                        content,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.dirty = true;
        Ok(outcome)
    }

    /// Apply a batch of value changes to one column, in the given order.
    ///
    /// Every old value is parked on a placeholder first, so a new value that equals
    /// another entry's old value never collides with a row that is about to move.
    /// Rows that still collide and may not be dropped get their old value back.
    pub fn remap_values(
        &mut self,
        table: &str,
        column: &str,
        remaps: &[Remap],
    ) -> Result<Vec<ReplaceOutcome>> {
        if remaps.is_empty() {
            return Ok(Vec::new());
        }
        self.begin()?;
        let park = format!(
            "UPDATE {tbl} SET {col} = ?1 WHERE {col} = ?2",
            col = quote(column),
            tbl = quote(table)
        );
        let parked: Vec<Value> = (0..remaps.len())
            .map(|i| Value::Text(format!("{}{}", PARKED_PREFIX, i)))
            .collect();
        for (remap, placeholder) in remaps.iter().zip(&parked) {
            self.dirty |= self.conn.execute(&park, params![placeholder, remap.old])? > 0;
        }

        let mut outcomes = Vec::with_capacity(remaps.len());
        for (remap, placeholder) in remaps.iter().zip(&parked) {
            outcomes.push(self.replace_value(table, column, placeholder, &remap.new, remap.merge)?);
        }

        for ((remap, placeholder), outcome) in remaps.iter().zip(&parked).zip(&outcomes) {
            if outcome.conflicts.is_empty() {
                continue;
            }
            let restored = self.replace_value(table, column, placeholder, &remap.old, false)?;
            if !restored.conflicts.is_empty() {
                return Err(Error::Other(format!(
                    "{}.{} in {}: rows {:?} can take neither their new nor their old value",
                    table,
                    column,
                    self.path.display(),
                    restored.conflicts
                )));
            }
            warn!(
                "Kept old value of {}.{} rows {:?} in {}: new value already taken",
                table,
                column,
                outcome.conflicts,
                self.path.display()
            );
        }
        Ok(outcomes)
    }

    /// Column name and rendered value of every cell of one row.
    pub fn row_content(&self, table: &str, rowid: i64) -> Result<Vec<(String, String)>> {
        let sql = format!("SELECT * FROM {} WHERE rowid = ?1", quote(table));
        let mut stmt = self.conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let content = stmt
            .query_row(params![rowid], |row| {
                let mut cells = Vec::with_capacity(names.len());
                for (i, name) in names.iter().enumerate() {
                    cells.push((name.clone(), render_value(row.get_ref(i)?)));
                }
                Ok(cells)
            })
            .optional()?;
        Ok(content.unwrap_or_default())
    }

    pub fn delete_row(&mut self, table: &str, rowid: i64) -> Result<bool> {
        self.begin()?;
        let sql = format!("DELETE FROM {} WHERE rowid = ?1", quote(table));
        let deleted = self.conn.execute(&sql, params![rowid])? > 0;
        self.dirty |= deleted;
        Ok(deleted)
    }

    /// Rows of the entity table, in rowid order.
    pub fn entity_rows(&self, entity: &EntitySpec) -> Result<Vec<EntityRow>> {
        let optional = |column: &Option<String>| {
            column.as_deref().map(quote).unwrap_or_else(|| "NULL".to_string())
        };
        let sql = format!(
            "SELECT rowid, {}, {}, {}, {}, {} FROM {} ORDER BY rowid",
            quote(&entity.id_column),
            quote(&entity.type_column),
            quote(&entity.path_column),
            optional(&entity.created_column),
            optional(&entity.modified_column),
            quote(&entity.table)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(EntityRow {
                    rowid: row.get(0)?,
                    id: row.get::<_, Option<Value>>(1)?,
                    kind: text_of(row.get_ref(2)?),
                    path: text_of(row.get_ref(3)?),
                    created: text_of(row.get_ref(4)?),
                    modified: text_of(row.get_ref(5)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn update_dates(
        &mut self,
        entity: &EntitySpec,
        rowid: i64,
        created: Option<&str>,
        modified: Option<&str>,
    ) -> Result<()> {
        self.begin()?;
        let updates = [
            (entity.created_column.as_deref(), created),
            (entity.modified_column.as_deref(), modified),
        ];
        for (column, value) in updates {
            if let (Some(column), Some(value)) = (column, value) {
                let sql = format!(
                    "UPDATE {} SET {} = ?1 WHERE rowid = ?2",
                    quote(&entity.table),
                    quote(column)
                );
                self.conn.execute(&sql, params![value, rowid])?;
                self.dirty = true;
            }
        }
        Ok(())
    }

    /// Roll back everything done since the last save.
    pub fn discard(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn.execute_batch("ROLLBACK")?;
            self.in_transaction = false;
            self.dirty = false;
        }
        Ok(())
    }
}

fn text_of(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

fn render_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => b.iter().map(|byte| format!("{:02x}", byte)).collect(),
    }
}

impl DocumentAdapter for TableDocument {
    type Key = CellKey;

    fn location(&self) -> &Path {
        &self.path
    }

    fn for_each_field(&self, visit: &mut dyn FnMut(Field<CellKey>)) -> Result<()> {
        for table in &self.tables {
            let roles = [
                (&table.paths, FieldRole::Path),
                (&table.images, FieldRole::ImageList),
                (&table.json, FieldRole::Json),
            ];
            for (columns, role) in roles {
                for column in columns {
                    self.for_each_row(&table.name, column, &mut |rowid, text| {
                        visit(Field {
                            key: CellKey {
                                table: table.name.clone(),
                                column: column.clone(),
                                rowid,
                            },
                            label: format!("{}.{}#{}", table.name, column, rowid),
                            role,
                            value: text.to_string(),
                        })
                    })?;
                }
            }
        }
        Ok(())
    }

    fn apply_edits(&mut self, edits: Vec<Edit<CellKey>>) -> Result<EditSummary> {
        self.begin()?;
        let mut summary = EditSummary::default();
        for edit in edits {
            let sql = format!(
                "UPDATE {} SET {} = ?1 WHERE rowid = ?2",
                quote(&edit.key.table),
                quote(&edit.key.column)
            );
            match self.conn.execute(&sql, params![edit.value, edit.key.rowid]) {
                Ok(n) if n > 0 => summary.applied += 1,
                Ok(_) => {
                    debug!("{}.{}#{} vanished before update", edit.key.table, edit.key.column, edit.key.rowid);
                    summary.rejected += 1;
                }
                Err(e) => {
                    warn!(
                        "Could not update {}.{}#{} in {}: {}",
                        edit.key.table,
                        edit.key.column,
                        edit.key.rowid,
                        self.path.display(),
                        e
                    );
                    summary.rejected += 1;
                }
            }
        }
        self.dirty |= summary.applied > 0;
        Ok(summary)
    }

    fn save(&mut self) -> Result<bool> {
        if !self.in_transaction {
            return Ok(false);
        }
        self.conn.execute_batch("COMMIT")?;
        self.in_transaction = false;
        let written = self.dirty;
        self.dirty = false;
        Ok(written)
    }
}
