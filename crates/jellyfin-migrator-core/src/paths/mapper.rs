use super::{join_prefix, normalize, strip_component_prefix};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Placeholders the server resolves at runtime. They are kept literally.
pub const PATH_TOKENS: [&str; 2] = ["%MetadataPath%", "%AppDataPath%"];

/// Rule entry whose `to` value selects the output separator instead of mapping a prefix.
pub const SEPARATOR_SENTINEL: &str = "target_path_slash";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRule {
    pub from: String,
    pub to: String,
}

impl PathRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Result of a single prefix rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    pub path: String,
    pub matched: bool,
}

impl Rewrite {
    pub fn changed(&self, original: &str) -> bool {
        self.path != original
    }
}

/// Ordered prefix rules; the first matching rule wins.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<PathRule>,
    separator: char,
    passthrough: bool,
}

impl RuleSet {
    /// Build a rule set from configuration pairs. The separator sentinel is consumed
    /// here and does not become a rule.
    pub fn from_rules(entries: &[PathRule]) -> Result<Self> {
        let mut rules = Vec::with_capacity(entries.len());
        let mut separator = '/';

        for entry in entries {
            if entry.from == SEPARATOR_SENTINEL {
                separator = match entry.to.as_str() {
                    "/" => '/',
                    "\\" => '\\',
                    other => {
                        return Err(Error::Config(format!(
                            "'{}' must be '/' or '\\', got '{}'",
                            SEPARATOR_SENTINEL, other
                        )))
                    }
                };
                continue;
            }
            if entry.from.trim().is_empty() {
                return Err(Error::Config(format!(
                    "path rule with empty prefix (replacement '{}')",
                    entry.to
                )));
            }
            rules.push(PathRule {
                from: trim_separator(&normalize(&entry.from)),
                to: trim_separator(&normalize(&entry.to)),
            });
        }

        Ok(Self {
            rules,
            separator,
            passthrough: true,
        })
    }

    /// Second-stage rule sets neither keep path tokens nor recognise already
    /// rewritten paths: anything not covered by a rule is unmatched.
    pub fn strict(mut self) -> Self {
        self.passthrough = false;
        self
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn rules(&self) -> &[PathRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rewrite `path` with the first rule whose prefix matches its normalized form.
    ///
    /// Unmatched input is returned untouched with `matched == false`. Path tokens and
    /// paths already below a replacement prefix count as matched and stay as they
    /// are, which keeps a second pass over rewritten documents a no-op.
    pub fn rewrite(&self, path: &str) -> Rewrite {
        let normalized = normalize(path);

        for rule in &self.rules {
            if let Some(rest) = strip_component_prefix(&normalized, &rule.from) {
                return Rewrite {
                    path: self.with_separator(&join_prefix(&rule.to, rest)),
                    matched: true,
                };
            }
        }

        if self.passthrough && self.is_canonical(&normalized) {
            return Rewrite {
                path: path.to_string(),
                matched: true,
            };
        }

        Rewrite {
            path: path.to_string(),
            matched: false,
        }
    }

    fn is_canonical(&self, normalized: &str) -> bool {
        if PATH_TOKENS
            .iter()
            .any(|token| strip_component_prefix(normalized, token).is_some())
        {
            return true;
        }
        self.rules
            .iter()
            .filter(|rule| !rule.to.is_empty() && rule.to != "/")
            .any(|rule| strip_component_prefix(normalized, &rule.to).is_some())
    }

    fn with_separator(&self, path: &str) -> String {
        if self.separator == '/' {
            path.to_string()
        } else {
            path.replace('/', &self.separator.to_string())
        }
    }
}

fn trim_separator(prefix: &str) -> String {
    if prefix.len() > 1 && prefix.ends_with('/') {
        prefix.trim_end_matches('/').to_string()
    } else {
        prefix.to_string()
    }
}
