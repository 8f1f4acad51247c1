use super::{read_text, with_bom, write_atomic, DocumentAdapter, Edit, EditSummary, Field, FieldRole};
use crate::error::Result;
use std::path::{Path, PathBuf};

/// `.mblink` shortcut: the whole file is one path. Trailing whitespace is kept aside
/// and written back unchanged.
pub struct LinkDocument {
    path: PathBuf,
    bom: bool,
    target: String,
    trailer: String,
    edited: Option<String>,
}

impl LinkDocument {
    pub fn open(path: &Path) -> Result<Self> {
        let (bom, content) = read_text(path)?;
        let body_len = content.trim_end().len();
        Ok(Self {
            path: path.to_path_buf(),
            bom,
            target: content[..body_len].to_string(),
            trailer: content[body_len..].to_string(),
            edited: None,
        })
    }

    pub fn target(&self) -> &str {
        self.edited.as_deref().unwrap_or(&self.target)
    }
}

impl DocumentAdapter for LinkDocument {
    type Key = ();

    fn location(&self) -> &Path {
        &self.path
    }

    fn for_each_field(&self, visit: &mut dyn FnMut(Field<()>)) -> Result<()> {
        if !self.target().is_empty() {
            visit(Field {
                key: (),
                label: "link".to_string(),
                role: FieldRole::Path,
                value: self.target().to_string(),
            });
        }
        Ok(())
    }

    fn apply_edits(&mut self, edits: Vec<Edit<()>>) -> Result<EditSummary> {
        let mut summary = EditSummary::default();
        if let Some(edit) = edits.into_iter().last() {
            self.edited = Some(edit.value);
            summary.applied = 1;
        }
        Ok(summary)
    }

    fn save(&mut self) -> Result<bool> {
        let Some(target) = self.edited.take() else {
            return Ok(false);
        };
        let content = format!("{}{}", target, self.trailer);
        write_atomic(&self.path, &with_bom(self.bom, &content))?;
        self.target = target;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::super::edit_document;
    use super::*;

    #[test]
    fn test_link_round_trip_keeps_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Movies.mblink");
        std::fs::write(&path, "F:\\Movies\r\n").unwrap();

        let mut doc = LinkDocument::open(&path).unwrap();
        assert_eq!(doc.target(), "F:\\Movies");
        assert!(!doc.save().unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "F:\\Movies\r\n");

        edit_document(&mut doc, |f| {
            assert_eq!(f.role, FieldRole::Path);
            Some("/data/movies".to_string())
        })
        .unwrap();
        assert!(doc.save().unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "/data/movies\r\n");
    }
}
