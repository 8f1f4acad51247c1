use crate::identifier::TextForm;
use crate::paths::{normalize, PATH_TOKENS};

/// What a raw string most likely holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// A filesystem path. `token` is set when it starts with a path-variable token.
    Path { token: bool },
    /// The server's `path*ticks*type*w*h*hash|...` image metadata string.
    ImageList,
    /// A bare identifier in one of the text forms.
    Identifier(TextForm),
    Url,
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ValueKind,
    pub confidence: Confidence,
}

impl Classification {
    fn new(kind: ValueKind, confidence: Confidence) -> Self {
        Self { kind, confidence }
    }

    fn plain() -> Self {
        Self::new(ValueKind::Plain, Confidence::High)
    }

    pub fn is_path(&self) -> bool {
        matches!(self.kind, ValueKind::Path { .. })
    }

    /// Candidates worth a warning when nothing could be done with them.
    pub fn is_reportable(&self) -> bool {
        self.confidence == Confidence::High
            && matches!(self.kind, ValueKind::Path { .. } | ValueKind::ImageList)
    }
}

const MIN_CANDIDATE_LEN: usize = 3;

/// Classify a raw field value. Pure and cheap; called for every textual field.
pub fn classify(value: &str) -> Classification {
    let trimmed = value.trim();
    if trimmed.len() < MIN_CANDIDATE_LEN || trimmed.contains('\n') || is_numeric(trimmed) {
        return Classification::plain();
    }
    if let Some(form) = TextForm::of(trimmed) {
        return Classification::new(ValueKind::Identifier(form), Confidence::High);
    }
    if trimmed.contains("://") {
        return Classification::new(ValueKind::Url, Confidence::Low);
    }
    if trimmed.contains('*') {
        let first = trimmed.split('|').next().unwrap_or_default();
        let head = first.split('*').next().unwrap_or_default();
        if rooted_kind(head).is_some() {
            return Classification::new(ValueKind::ImageList, Confidence::High);
        }
    }
    if let Some(kind) = rooted_kind(trimmed) {
        return Classification::new(kind, Confidence::High);
    }
    if looks_relative(trimmed) {
        return Classification::new(ValueKind::Path { token: false }, Confidence::Low);
    }
    Classification::plain()
}

fn rooted_kind(value: &str) -> Option<ValueKind> {
    let normalized = normalize(value);
    if PATH_TOKENS.iter().any(|token| normalized.starts_with(token)) {
        return Some(ValueKind::Path { token: true });
    }
    let bytes = normalized.as_bytes();
    let drive = bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && bytes[2] == b'/';
    let unc = normalized.starts_with("//") && normalized.len() > 2;
    let unix = normalized.starts_with('/')
        && normalized[1..]
            .chars()
            .next()
            .map_or(false, |c| !c.is_whitespace() && c != '/');
    if (drive || unc || unix) && !all_components_numeric(&normalized) {
        Some(ValueKind::Path { token: false })
    } else {
        None
    }
}

fn looks_relative(value: &str) -> bool {
    let normalized = normalize(value);
    let components: Vec<&str> = normalized.split('/').filter(|c| !c.is_empty()).collect();
    components.len() >= 2 && !all_components_numeric(&normalized)
}

fn all_components_numeric(normalized: &str) -> bool {
    normalized
        .split('/')
        .filter(|c| !c.is_empty())
        .all(|c| c.chars().all(|ch| ch.is_ascii_digit() || ch == '.' || ch == '-'))
}

fn is_numeric(value: &str) -> bool {
    value.parse::<f64>().is_ok()
}
