use super::{read_text, with_bom, write_atomic, DocumentAdapter, Edit, EditSummary, Field, FieldRole};
use crate::error::{Error, Result};
use quick_xml::escape::partial_escape;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
struct TextNode {
    span: Range<usize>,
    cdata: bool,
    label: String,
    value: String,
}

/// XML (and `.nfo`) document. Only element text is exposed; edits are spliced into
/// the original bytes so markup, attributes and whitespace stay as they were.
pub struct XmlDocument {
    path: PathBuf,
    bom: bool,
    source: String,
    skip_elements: Vec<String>,
    nodes: Vec<TextNode>,
    replacements: Vec<Option<String>>,
}

impl XmlDocument {
    pub fn open(path: &Path, skip_elements: &[String]) -> Result<Self> {
        let (bom, source) = read_text(path)?;
        Self::parse(path, bom, source, skip_elements)
    }

    pub fn from_text(path: &Path, source: String, skip_elements: &[String]) -> Result<Self> {
        Self::parse(path, false, source, skip_elements)
    }

    fn parse(path: &Path, bom: bool, source: String, skip_elements: &[String]) -> Result<Self> {
        let nodes = scan_text_nodes(&source, skip_elements)
            .map_err(|e| Error::Xml(format!("{}: {}", path.display(), e)))?;
        debug!("{}: {} text nodes", path.display(), nodes.len());
        let replacements = vec![None; nodes.len()];
        Ok(Self {
            path: path.to_path_buf(),
            bom,
            source,
            skip_elements: skip_elements.to_vec(),
            nodes,
            replacements,
        })
    }

    /// The document with all applied edits.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.source.len());
        let mut cursor = 0;
        for (node, replacement) in self.nodes.iter().zip(&self.replacements) {
            let Some(value) = replacement else { continue };
            out.push_str(&self.source[cursor..node.span.start]);
            if node.cdata {
                out.push_str("<![CDATA[");
                out.push_str(value);
                out.push_str("]]>");
            } else {
                out.push_str(&partial_escape(value.as_str()));
            }
            cursor = node.span.end;
        }
        out.push_str(&self.source[cursor..]);
        out
    }

    fn is_dirty(&self) -> bool {
        self.replacements.iter().any(Option::is_some)
    }
}

fn scan_text_nodes(source: &str, skip_elements: &[String]) -> std::result::Result<Vec<TextNode>, String> {
    let mut reader = Reader::from_str(source);
    let mut stack: Vec<String> = Vec::new();
    let mut skipping = 0usize;
    let mut nodes = Vec::new();

    loop {
        let start = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| format!("at byte {}: {}", reader.buffer_position(), e))?;
        let end = reader.buffer_position() as usize;

        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if skipping > 0 || skip_elements.iter().any(|s| s.eq_ignore_ascii_case(&name)) {
                    skipping += 1;
                }
                stack.push(name);
            }
            Event::End(_) => {
                stack.pop();
                skipping = skipping.saturating_sub(1);
            }
            Event::Text(e) if skipping == 0 && !stack.is_empty() => {
                let value = match e.unescape() {
                    Ok(v) => v.into_owned(),
                    Err(err) => {
                        debug!("Skipping text at byte {}: {}", start, err);
                        continue;
                    }
                };
                if value.trim().is_empty() {
                    continue;
                }
                nodes.push(TextNode {
                    span: start..end,
                    cdata: false,
                    label: stack.join("/"),
                    value,
                });
            }
            Event::CData(e) if skipping == 0 && !stack.is_empty() => {
                let value = String::from_utf8_lossy(&e.into_inner()).into_owned();
                if value.trim().is_empty() {
                    continue;
                }
                nodes.push(TextNode {
                    span: start..end,
                    cdata: true,
                    label: stack.join("/"),
                    value,
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(nodes)
}

impl DocumentAdapter for XmlDocument {
    type Key = usize;

    fn location(&self) -> &Path {
        &self.path
    }

    fn for_each_field(&self, visit: &mut dyn FnMut(Field<usize>)) -> Result<()> {
        for (i, node) in self.nodes.iter().enumerate() {
            let value = self.replacements[i].clone().unwrap_or_else(|| node.value.clone());
            visit(Field {
                key: i,
                label: node.label.clone(),
                role: FieldRole::Auto,
                value,
            });
        }
        Ok(())
    }

    fn apply_edits(&mut self, edits: Vec<Edit<usize>>) -> Result<EditSummary> {
        let mut summary = EditSummary::default();
        for edit in edits {
            let Some(node) = self.nodes.get(edit.key) else {
                summary.rejected += 1;
                continue;
            };
            if node.cdata && edit.value.contains("]]>") {
                summary.rejected += 1;
                continue;
            }
            self.replacements[edit.key] = Some(edit.value);
            summary.applied += 1;
        }
        Ok(summary)
    }

    fn save(&mut self) -> Result<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }
        let rendered = self.render();
        write_atomic(&self.path, &with_bom(self.bom, &rendered))?;
        // spans refer to the old text
        self.nodes = scan_text_nodes(&rendered, &self.skip_elements)
            .map_err(|e| Error::Xml(format!("{}: {}", self.path.display(), e)))?;
        self.replacements = vec![None; self.nodes.len()];
        self.source = rendered;
        Ok(true)
    }
}
