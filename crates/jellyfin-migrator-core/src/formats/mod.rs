//! Document adapters. Each format exposes its textual fields through
//! [`DocumentAdapter`] and writes edits back without touching anything else.

pub mod json;
pub mod link;
pub mod table;
pub mod xml;

pub use json::{JsonDocument, JsonText};
pub use link::LinkDocument;
pub use table::{CellKey, DeletedRow, EntityRow, Remap, ReplaceOutcome, TableDocument};
pub use xml::XmlDocument;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Declared kind of a job file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Table,
    Xml,
    Json,
    Link,
    Copy,
}

impl DocumentKind {
    /// Kind implied by the file extension; unknown extensions are copied verbatim.
    pub fn infer(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "db" => DocumentKind::Table,
            "xml" | "nfo" => DocumentKind::Xml,
            "json" => DocumentKind::Json,
            "mblink" => DocumentKind::Link,
            _ => DocumentKind::Copy,
        }
    }

    pub fn is_structured(self) -> bool {
        self != DocumentKind::Copy
    }
}

/// How a field's text should be interpreted by the rewrite phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    /// Free text; the classifier decides.
    Auto,
    /// Declared path column.
    Path,
    /// Declared image metadata column.
    ImageList,
    /// Declared column holding a JSON document.
    Json,
}

/// One textual field of a document.
#[derive(Debug, Clone)]
pub struct Field<K> {
    pub key: K,
    /// Human readable location used in diagnostics (`table.column#rowid`, element path, ...).
    pub label: String,
    pub role: FieldRole,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Edit<K> {
    pub key: K,
    pub value: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EditSummary {
    pub applied: usize,
    pub rejected: usize,
}

impl EditSummary {
    pub fn merge(&mut self, other: EditSummary) {
        self.applied += other.applied;
        self.rejected += other.rejected;
    }
}

/// Shared scan/substitute contract implemented by every format.
pub trait DocumentAdapter {
    type Key: Clone;

    fn location(&self) -> &Path;

    /// Visit every textual field exposed to the scanner, in document order.
    fn for_each_field(&self, visit: &mut dyn FnMut(Field<Self::Key>)) -> Result<()>;

    /// Apply substitutions in memory (tables: inside the open transaction).
    /// Edits that cannot be applied are counted as rejected and leave their field untouched.
    fn apply_edits(&mut self, edits: Vec<Edit<Self::Key>>) -> Result<EditSummary>;

    /// Persist the document. Returns `false` when nothing had to be written.
    fn save(&mut self) -> Result<bool>;
}

/// Run `edit` over every field of `doc` and apply the replacements it returns.
pub fn edit_document<D, F>(doc: &mut D, mut edit: F) -> Result<EditSummary>
where
    D: DocumentAdapter,
    F: FnMut(&Field<D::Key>) -> Option<String>,
{
    let mut edits = Vec::new();
    doc.for_each_field(&mut |field| {
        if let Some(value) = edit(&field) {
            if value != field.value {
                edits.push(Edit {
                    key: field.key,
                    value,
                });
            }
        }
    })?;
    if edits.is_empty() {
        return Ok(EditSummary::default());
    }
    doc.apply_edits(edits)
}

/// Replace `path` with `bytes` through a sibling temporary file so a failed write
/// never leaves a half-written document behind.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{}.migrating", file_name));
    {
        let mut file = fs::File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&temp, path)?;
    Ok(())
}

/// Read a text document, returning the UTF-8 byte order mark separately.
pub(crate) fn read_text(path: &Path) -> Result<(bool, String)> {
    let bytes = fs::read(path)?;
    let bom = bytes.starts_with(&UTF8_BOM);
    let body = if bom { bytes[UTF8_BOM.len()..].to_vec() } else { bytes };
    let text = String::from_utf8(body).map_err(|e| {
        crate::error::Error::Other(format!("{} is not valid UTF-8: {}", path.display(), e))
    })?;
    Ok((bom, text))
}

pub(crate) fn with_bom(bom: bool, text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 3);
    if bom {
        out.extend_from_slice(&UTF8_BOM);
    }
    out.extend_from_slice(text.as_bytes());
    out
}
