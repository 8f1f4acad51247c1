use jellyfin_migrator_core::config::{load_configuration, AppConfig};
use jellyfin_migrator_core::formats::DocumentKind;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_load_toml_configuration() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Migrator.toml");
    fs::write(
        &path,
        r#"
source_root = "/backup/jellyfin"
target_root = "/srv/jellyfin"
workers = 4

[layout]
windows_root = 'C:\ProgramData\Jellyfin\Server'
linux_root = "/var/lib/jellyfin"

[[path_rules]]
from = 'F:\Movies'
to = "/data/movies"

[[fs_rules]]
from = "/data"
to = "/mnt/nas"

[[jobs]]
source = "config/*.xml"

[[jobs]]
source = "data/library.db"
kind = "table"

[[jobs.tables]]
name = "TypedBaseItems"
paths = ["Path"]
ids = [{ column = "guid", encodings = ["bin"] }]
"#,
    )
    .unwrap();

    let config = load_configuration(&path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.workers, 4);
    assert_eq!(config.original_root().unwrap(), "C:\\ProgramData\\Jellyfin\\Server");
    assert_eq!(config.jobs.len(), 2);
    assert_eq!(config.jobs[1].kind, Some(DocumentKind::Table));
    assert_eq!(config.jobs[1].tables[0].ids[0].column, "guid");
    assert_eq!(config.xml_skip_elements, vec!["biography", "outline"]);

    let path_rules = config.effective_path_rules();
    assert_eq!(path_rules[0].from, "F:\\Movies");
    assert!(path_rules.iter().any(|r| r.to == "/var/lib/jellyfin/config"));

    let rewritten = config.path_rule_set().unwrap().rewrite("C:/ProgramData/Jellyfin/Server/config/system.xml");
    assert_eq!(rewritten.path, "/var/lib/jellyfin/config/system.xml");
}

#[test]
fn test_unknown_encoding_is_a_config_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("Migrator.toml");
    fs::write(
        &path,
        r#"
source_root = "/backup"
original_root = "C:/Jellyfin"
target_root = "/srv"

[[jobs]]
source = "data/library.db"

[[jobs.tables]]
name = "TypedBaseItems"
ids = [{ column = "guid", encodings = ["guid-v2"] }]
"#,
    )
    .unwrap();

    let config = load_configuration(&path).unwrap();
    let err = config.validate().unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn test_missing_file_fails_to_load() {
    let dir = tempdir().unwrap();
    assert!(AppConfig::load(&dir.path().join("absent.toml")).is_err());
}

#[test]
fn test_template_round_trips_through_a_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("conf/Migrator.toml");
    AppConfig::write_template(&path).unwrap();
    assert!(AppConfig::write_template(&path).is_err());

    let config = load_configuration(&path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.jobs().len(), AppConfig::template().jobs.len());
}

#[test]
fn test_swap_order_defaults_to_guid_layout() {
    use jellyfin_migrator_core::identifier::GUID_SWAP_ORDER;

    let config = AppConfig::template();
    assert_eq!(config.identifiers.swap_order, GUID_SWAP_ORDER.to_vec());
    let identity: [u8; 16] = std::array::from_fn(|i| i as u8);
    let swapped = config.swap_rule().unwrap().apply(&identity);
    assert_eq!(swapped, [3, 2, 1, 0, 5, 4, 7, 6, 8, 9, 10, 11, 12, 13, 14, 15]);
}
