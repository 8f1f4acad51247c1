//! Run configuration: roots, rule tables and the job list.

pub mod defaults;

use crate::error::{Error, Result};
use crate::formats::DocumentKind;
use crate::identifier::{Encoding, SwapRule, GUID_SWAP_ORDER};
use crate::paths::{PathRule, RuleSet};
use config::{Config, Environment, File as ConfigFile, FileFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "Migrator.toml";
pub const ENV_PREFIX: &str = "MIGRATOR";
pub const AUTO_TARGET: &str = "auto";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Copy of the old installation's data root on this machine.
    pub source_root: PathBuf,
    /// Where `source_root` lived on the old machine. Defaults to the layout's Windows root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_root: Option<String>,
    pub target_root: PathBuf,
    #[serde(default)]
    pub path_rules: Vec<PathRule>,
    #[serde(default)]
    pub fs_rules: Vec<PathRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<LayoutPreset>,
    #[serde(default)]
    pub log_no_warnings: bool,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub identifiers: IdentifierSettings,
    #[serde(default = "default_xml_skip_elements")]
    pub xml_skip_elements: Vec<String>,
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

/// Standard Jellyfin Windows to Linux layout. Its rules are appended after the user rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutPreset {
    pub windows_root: String,
    pub linux_root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub windows_ffmpeg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linux_ffmpeg: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierSettings {
    /// Byte permutation applied by every `ancestor-*` encoding.
    #[serde(default = "default_swap_order")]
    pub swap_order: Vec<usize>,
}

impl Default for IdentifierSettings {
    fn default() -> Self {
        Self {
            swap_order: default_swap_order(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Relative to `source_root`; may contain `*` and `**`.
    pub source: String,
    /// `"auto"` or an explicit path.
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<DocumentKind>,
    #[serde(default)]
    pub no_log: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<TableSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntitySpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub json: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<IdColumn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdColumn {
    pub column: String,
    pub encodings: Vec<String>,
}

/// The table whose rows are entities (`TypedBaseItems`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySpec {
    pub table: String,
    pub id_column: String,
    pub type_column: String,
    pub path_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_column: Option<String>,
}

fn default_workers() -> usize {
    1
}

fn default_swap_order() -> Vec<usize> {
    GUID_SWAP_ORDER.to_vec()
}

fn default_xml_skip_elements() -> Vec<String> {
    vec!["biography".to_string(), "outline".to_string()]
}

fn default_target() -> String {
    AUTO_TARGET.to_string()
}

/// Load configuration from a TOML file layered with `MIGRATOR__*` environment overrides.
pub fn load_configuration(path: &Path) -> Result<AppConfig> {
    let settings = Config::builder()
        .add_source(ConfigFile::from(path).format(FileFormat::Toml).required(true))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;
    let config: AppConfig = settings.try_deserialize()?;
    debug!("Loaded configuration from {}", path.display());
    Ok(config)
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_configuration(path)
    }

    /// Check everything that can be checked without touching the job files.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.source_root.as_os_str().is_empty() {
            return Err(Error::Config("source_root is required".into()));
        }
        if self.target_root.as_os_str().is_empty() {
            return Err(Error::Config("target_root is required".into()));
        }
        if self.original_root().is_none() {
            return Err(Error::Config(
                "original_root is required when no layout preset is given".into(),
            ));
        }
        self.path_rule_set()?;
        self.fs_rule_set()?;
        self.swap_rule()?;
        for job in self.jobs() {
            job.validate()?;
        }
        Ok(())
    }

    pub fn original_root(&self) -> Option<String> {
        self.original_root
            .clone()
            .or_else(|| self.layout.as_ref().map(|l| l.windows_root.clone()))
    }

    /// User rules followed by the layout preset. A user rule shadows a preset rule
    /// with the same prefix.
    pub fn effective_path_rules(&self) -> Vec<PathRule> {
        let base = self
            .layout
            .as_ref()
            .map(LayoutPreset::path_rules)
            .unwrap_or_default();
        merge_rules(&self.path_rules, base)
    }

    pub fn effective_fs_rules(&self) -> Vec<PathRule> {
        let base = self
            .layout
            .as_ref()
            .map(LayoutPreset::fs_rules)
            .unwrap_or_default();
        merge_rules(&self.fs_rules, base)
    }

    pub fn path_rule_set(&self) -> Result<RuleSet> {
        RuleSet::from_rules(&self.effective_path_rules())
    }

    pub fn fs_rule_set(&self) -> Result<RuleSet> {
        RuleSet::from_rules(&self.effective_fs_rules())
    }

    pub fn swap_rule(&self) -> Result<SwapRule> {
        SwapRule::new(&self.identifiers.swap_order)
    }

    /// The configured job list, or the built-in Jellyfin list when none is given.
    pub fn jobs(&self) -> Vec<JobSpec> {
        if self.jobs.is_empty() {
            defaults::jellyfin_jobs()
        } else {
            self.jobs.clone()
        }
    }

    /// A complete example configuration.
    pub fn template() -> Self {
        Self {
            source_root: PathBuf::from("D:/jellyfin-backup"),
            original_root: None,
            target_root: PathBuf::from("D:/jellyfin-migrated"),
            path_rules: vec![
                PathRule::new("F:/Movies", "/data/movies"),
                PathRule::new("F:/TV", "/data/tv"),
            ],
            fs_rules: vec![PathRule::new("/data", "D:/media")],
            layout: Some(LayoutPreset {
                windows_root: "C:/ProgramData/Jellyfin/Server".to_string(),
                linux_root: "/jellyfin".to_string(),
                windows_ffmpeg: Some("C:/Program Files/Jellyfin/Server/ffmpeg.exe".to_string()),
                linux_ffmpeg: Some("/usr/lib/jellyfin-ffmpeg/ffmpeg".to_string()),
            }),
            log_no_warnings: false,
            workers: default_workers(),
            identifiers: IdentifierSettings::default(),
            xml_skip_elements: default_xml_skip_elements(),
            jobs: defaults::jellyfin_jobs(),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("cannot serialize configuration: {}", e)))
    }

    /// Write the template to `path`. Existing files are never overwritten.
    pub fn write_template(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(Error::Config(format!(
                "{} already exists, refusing to overwrite",
                path.display()
            )));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, Self::template().to_toml()?)?;
        Ok(())
    }
}

impl LayoutPreset {
    pub fn path_rules(&self) -> Vec<PathRule> {
        let win = self.windows_root.trim_end_matches(['/', '\\']);
        let linux = self.linux_root.trim_end_matches('/');
        let mut rules = vec![
            PathRule::new(format!("{}/config", win), format!("{}/config", linux)),
            PathRule::new(format!("{}/cache", win), format!("{}/cache", linux)),
            PathRule::new(format!("{}/log", win), format!("{}/log", linux)),
            PathRule::new(format!("{}/transcodes", win), format!("{}/transcodes", linux)),
            PathRule::new(win, format!("{}/data", linux)),
        ];
        if let (Some(from), Some(to)) = (&self.windows_ffmpeg, &self.linux_ffmpeg) {
            rules.push(PathRule::new(from.as_str(), to.as_str()));
        }
        rules
    }

    /// Filesystem rules placing the Linux layout below the target root.
    pub fn fs_rules(&self) -> Vec<PathRule> {
        vec![
            PathRule::new(self.linux_root.trim_end_matches('/'), ""),
            PathRule::new("%AppDataPath%", "data/data"),
            PathRule::new("%MetadataPath%", "data/metadata"),
        ]
    }
}

fn merge_rules(user: &[PathRule], base: Vec<PathRule>) -> Vec<PathRule> {
    let mut rules = user.to_vec();
    rules.extend(
        base.into_iter()
            .filter(|b| !user.iter().any(|u| u.from == b.from)),
    );
    rules
}

impl JobSpec {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: default_target(),
            kind: None,
            no_log: false,
            tables: Vec::new(),
            entity: None,
        }
    }

    pub fn kind(mut self, kind: DocumentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn quiet(mut self) -> Self {
        self.no_log = true;
        self
    }

    pub fn table(mut self, table: TableSpec) -> Self {
        self.tables.push(table);
        self
    }

    pub fn entity(mut self, entity: EntitySpec) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn is_auto_target(&self) -> bool {
        self.target == AUTO_TARGET
    }

    pub fn has_wildcards(&self) -> bool {
        self.source.contains(['*', '?', '['])
    }

    /// Kind for a concrete file matched by this job.
    pub fn kind_for(&self, path: &Path) -> DocumentKind {
        self.kind.unwrap_or_else(|| DocumentKind::infer(path))
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(Error::Config("job with empty source".into()));
        }
        if !self.is_auto_target() && self.has_wildcards() {
            return Err(Error::Config(format!(
                "job '{}': an explicit target needs a single source file",
                self.source
            )));
        }
        if let Some(kind) = self.kind {
            if kind != DocumentKind::Table && (!self.tables.is_empty() || self.entity.is_some()) {
                return Err(Error::Config(format!(
                    "job '{}': table declarations on a {:?} job",
                    self.source, kind
                )));
            }
        }
        for table in &self.tables {
            if table.name.is_empty() {
                return Err(Error::Config(format!("job '{}': unnamed table", self.source)));
            }
            for id in &table.ids {
                id.encodings()?;
            }
        }
        Ok(())
    }
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn paths(mut self, columns: &[&str]) -> Self {
        self.paths.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn images(mut self, columns: &[&str]) -> Self {
        self.images.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn json(mut self, columns: &[&str]) -> Self {
        self.json.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn ids(mut self, encoding: Encoding, columns: &[&str]) -> Self {
        for column in columns {
            match self.ids.iter_mut().find(|c| c.column == *column) {
                Some(existing) => existing.encodings.push(encoding.tag().to_string()),
                None => self.ids.push(IdColumn {
                    column: column.to_string(),
                    encodings: vec![encoding.tag().to_string()],
                }),
            }
        }
        self
    }

    /// Every column this declaration refers to.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.paths
            .iter()
            .chain(&self.images)
            .chain(&self.json)
            .map(String::as_str)
            .chain(self.ids.iter().map(|c| c.column.as_str()))
    }
}

impl IdColumn {
    pub fn encodings(&self) -> Result<Vec<Encoding>> {
        if self.encodings.is_empty() {
            return Err(Error::Config(format!(
                "identifier column '{}' declares no encoding",
                self.column
            )));
        }
        self.encodings.iter().map(|tag| tag.parse()).collect()
    }
}

impl EntitySpec {
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        [
            Some(self.id_column.as_str()),
            Some(self.type_column.as_str()),
            Some(self.path_column.as_str()),
            self.created_column.as_deref(),
            self.modified_column.as_deref(),
        ]
        .into_iter()
        .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> AppConfig {
        AppConfig {
            source_root: PathBuf::from("/backup"),
            original_root: Some("C:/ProgramData/Jellyfin".into()),
            target_root: PathBuf::from("/out"),
            path_rules: vec![],
            fs_rules: vec![],
            layout: None,
            log_no_warnings: false,
            workers: 1,
            identifiers: IdentifierSettings::default(),
            xml_skip_elements: default_xml_skip_elements(),
            jobs: vec![],
        }
    }

    #[test]
    fn test_layout_rules_follow_user_rules() {
        let mut config = minimal();
        config.path_rules = vec![PathRule::new("C:/ProgramData/Jellyfin", "/custom")];
        config.layout = Some(LayoutPreset {
            windows_root: "C:/ProgramData/Jellyfin".into(),
            linux_root: "/jf".into(),
            windows_ffmpeg: None,
            linux_ffmpeg: None,
        });
        let rules = config.effective_path_rules();
        assert_eq!(rules[0], PathRule::new("C:/ProgramData/Jellyfin", "/custom"));
        assert!(rules.contains(&PathRule::new("C:/ProgramData/Jellyfin/config", "/jf/config")));
        assert_eq!(
            rules.iter().filter(|r| r.from == "C:/ProgramData/Jellyfin").count(),
            1
        );
        assert!(config.effective_fs_rules().contains(&PathRule::new("/jf", "")));
    }

    #[test]
    fn test_original_root_falls_back_to_layout() {
        let mut config = minimal();
        config.original_root = None;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        config.layout = Some(LayoutPreset {
            windows_root: "C:/JF".into(),
            linux_root: "/jf".into(),
            windows_ffmpeg: None,
            linux_ffmpeg: None,
        });
        assert_eq!(config.original_root().as_deref(), Some("C:/JF"));
        config.validate().unwrap();
    }

    #[test]
    fn test_job_validation() {
        let mut job = JobSpec::new("data/*.db");
        job.target = "/elsewhere/x.db".into();
        assert!(matches!(job.validate(), Err(Error::Config(_))));

        let job = JobSpec::new("data/library.db").table(TableSpec {
            name: "T".into(),
            ids: vec![IdColumn {
                column: "c".into(),
                encodings: vec!["base64".into()],
            }],
            ..Default::default()
        });
        assert!(matches!(job.validate(), Err(Error::UnsupportedEncoding(_))));

        let job = JobSpec::new("a.xml")
            .kind(DocumentKind::Xml)
            .table(TableSpec::new("T"));
        assert!(matches!(job.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_table_spec_builder_groups_encodings() {
        let table = TableSpec::new("TypedBaseItems")
            .ids(Encoding::Bin, &["guid", "ParentId"])
            .ids(Encoding::AncestorStr, &["guid"]);
        assert_eq!(table.ids.len(), 2);
        assert_eq!(
            table.ids[0].encodings().unwrap(),
            vec![Encoding::Bin, Encoding::AncestorStr]
        );
        assert_eq!(table.columns().count(), 2);
    }

    #[test]
    fn test_template_serializes_to_toml() {
        let text = AppConfig::template().to_toml().unwrap();
        assert!(text.contains("source_root"));
        assert!(text.contains("[[jobs]]"));
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.jobs.len(), defaults::jellyfin_jobs().len());
    }
}
