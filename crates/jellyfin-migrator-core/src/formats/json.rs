use super::{read_text, with_bom, write_atomic, DocumentAdapter, Edit, EditSummary, Field, FieldRole};
use crate::error::{Error, Result};
use std::ops::Range;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
struct StringLiteral {
    span: Range<usize>,
    label: String,
    value: String,
}

/// JSON text with the position of every string value. Object keys are never exposed.
/// Edited literals are re-encoded individually; all other bytes are kept.
#[derive(Debug, Clone)]
pub struct JsonText {
    source: String,
    literals: Vec<StringLiteral>,
}

impl JsonText {
    pub fn parse(source: String) -> Result<Self> {
        serde_json::from_str::<serde_json::Value>(&source)?;
        let literals = scan_literals(&source)?;
        Ok(Self { source, literals })
    }

    pub fn len(&self) -> usize {
        self.literals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    /// `(index, label, value)` of every string value, in document order.
    pub fn values(&self) -> impl Iterator<Item = (usize, &str, &str)> {
        self.literals
            .iter()
            .enumerate()
            .map(|(i, l)| (i, l.label.as_str(), l.value.as_str()))
    }

    /// Render with `replacements` (literal index, new value) applied.
    pub fn render(&self, replacements: &[(usize, String)]) -> Result<String> {
        let mut ordered: Vec<&(usize, String)> = replacements.iter().collect();
        ordered.sort_by_key(|(i, _)| *i);

        let mut out = String::with_capacity(self.source.len());
        let mut cursor = 0;
        for (index, value) in ordered {
            let literal = self
                .literals
                .get(*index)
                .ok_or_else(|| Error::Other(format!("no string literal #{}", index)))?;
            if literal.span.start < cursor {
                continue;
            }
            out.push_str(&self.source[cursor..literal.span.start]);
            out.push_str(&serde_json::to_string(value)?);
            cursor = literal.span.end;
        }
        out.push_str(&self.source[cursor..]);
        Ok(out)
    }

    /// Apply `edit` to every string value; `None` when nothing changed.
    pub fn edit<F>(&self, mut edit: F) -> Result<Option<String>>
    where
        F: FnMut(&str, &str) -> Option<String>,
    {
        let replacements: Vec<(usize, String)> = self
            .values()
            .filter_map(|(i, label, value)| {
                edit(label, value)
                    .filter(|new| new != value)
                    .map(|new| (i, new))
            })
            .collect();
        if replacements.is_empty() {
            return Ok(None);
        }
        self.render(&replacements).map(Some)
    }
}

fn scan_literals(source: &str) -> Result<Vec<StringLiteral>> {
    let bytes = source.as_bytes();
    let mut containers: Vec<String> = Vec::new();
    let mut key: Option<String> = None;
    let mut literals = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'{' | b'[' => {
                containers.push(key.take().unwrap_or_default());
                i += 1;
            }
            b'}' | b']' => {
                containers.pop();
                key = None;
                i += 1;
            }
            b'"' => {
                let end = string_end(bytes, i)?;
                let value: String = serde_json::from_str(&source[i..end])?;
                let mut next = end;
                while next < bytes.len() && bytes[next].is_ascii_whitespace() {
                    next += 1;
                }
                if bytes.get(next) == Some(&b':') {
                    key = Some(value);
                } else {
                    let mut parts: Vec<&str> = containers
                        .iter()
                        .map(String::as_str)
                        .filter(|s| !s.is_empty())
                        .collect();
                    let current = key.take();
                    if let Some(k) = current.as_deref() {
                        parts.push(k);
                    }
                    literals.push(StringLiteral {
                        span: i..end,
                        label: parts.join("."),
                        value,
                    });
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    Ok(literals)
}

/// Index one past the closing quote of the literal starting at `start`.
fn string_end(bytes: &[u8], start: usize) -> Result<usize> {
    let mut j = start + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'"' => return Ok(j + 1),
            _ => j += 1,
        }
    }
    Err(Error::Other(format!("unterminated string at byte {}", start)))
}

/// A `.json` file.
pub struct JsonDocument {
    path: PathBuf,
    bom: bool,
    text: JsonText,
    replacements: Vec<(usize, String)>,
}

impl JsonDocument {
    pub fn open(path: &Path) -> Result<Self> {
        let (bom, source) = read_text(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            bom,
            text: JsonText::parse(source)?,
            replacements: Vec::new(),
        })
    }

    pub fn render(&self) -> Result<String> {
        self.text.render(&self.replacements)
    }
}

impl DocumentAdapter for JsonDocument {
    type Key = usize;

    fn location(&self) -> &Path {
        &self.path
    }

    fn for_each_field(&self, visit: &mut dyn FnMut(Field<usize>)) -> Result<()> {
        for (i, label, value) in self.text.values() {
            let value = self
                .replacements
                .iter()
                .rev()
                .find(|(k, _)| *k == i)
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| value.to_string());
            visit(Field {
                key: i,
                label: label.to_string(),
                role: FieldRole::Auto,
                value,
            });
        }
        Ok(())
    }

    fn apply_edits(&mut self, edits: Vec<Edit<usize>>) -> Result<EditSummary> {
        let mut summary = EditSummary::default();
        for edit in edits {
            if edit.key >= self.text.len() {
                summary.rejected += 1;
                continue;
            }
            self.replacements.retain(|(k, _)| *k != edit.key);
            self.replacements.push((edit.key, edit.value));
            summary.applied += 1;
        }
        Ok(summary)
    }

    fn save(&mut self) -> Result<bool> {
        if self.replacements.is_empty() {
            return Ok(false);
        }
        let rendered = self.render()?;
        write_atomic(&self.path, &with_bom(self.bom, &rendered))?;
        self.text = JsonText::parse(rendered)?;
        self.replacements.clear();
        Ok(true)
    }
}
