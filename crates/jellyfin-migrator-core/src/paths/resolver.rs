use super::{is_rooted, RuleSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Maps rewritten (possibly container-relative) paths to real locations on this machine.
#[derive(Debug, Clone)]
pub struct FsResolver {
    rules: RuleSet,
    target_root: PathBuf,
}

impl FsResolver {
    pub fn new(rules: RuleSet, target_root: impl Into<PathBuf>) -> Self {
        Self {
            rules: rules.strict(),
            target_root: target_root.into(),
        }
    }

    pub fn target_root(&self) -> &Path {
        &self.target_root
    }

    /// Resolve a rewritten path.
    ///
    /// A rule whose result is absolute on this host names a real location. Relative
    /// results, and `/`-rooted results that are not absolute here, land beneath the
    /// target root. Rooted paths no rule covers cannot be resolved.
    pub fn resolve(&self, rewritten: &str) -> Option<PathBuf> {
        let rewrite = self.rules.rewrite(rewritten);
        let candidate = super::normalize(&rewrite.path);

        if rewrite.matched && Path::new(&candidate).is_absolute() {
            return Some(PathBuf::from(candidate));
        }
        if !rewrite.matched && is_rooted(&candidate) {
            return None;
        }

        let relative = candidate.trim_start_matches('/');
        if relative.is_empty() {
            return Some(self.target_root.clone());
        }
        Some(self.target_root.join(relative))
    }

    /// The part of `path` below the target root, with `/` separators.
    pub fn relative_to_target(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.target_root)
            .ok()
            .map(|rel| super::normalize(&rel.to_string_lossy()))
    }
}

/// Copy a single file, creating parent directories. Existing files are overwritten;
/// several sources mapping onto one destination is an expected merge.
pub fn copy_file(source: &Path, target: &Path) -> io::Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    if target.exists() {
        debug!("Overwriting {} with {}", target.display(), source.display());
    }
    fs::copy(source, target)
}

/// Move a file inside the target tree, creating parent directories.
pub fn move_file(source: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(source, target)
}
