use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection};
use tempfile::{tempdir, TempDir};

use jellyfin_migrator_core::config::{EntitySpec, JobSpec, LayoutPreset, TableSpec};
use jellyfin_migrator_core::formats::DocumentKind;
use jellyfin_migrator_core::identifier::{EncodedId, Encoding, ItemId, SwapRule};
use jellyfin_migrator_core::paths::PathRule;
use jellyfin_migrator_core::report::WarningReason;
use jellyfin_migrator_core::timestamps::{FileTimes, FileTimestamps};
use jellyfin_migrator_core::{
    AcceptAll, AppConfig, Diagnostic, MigrationReport, MigrationState, Migrator, SilentReporter,
};

const MOVIE: &str = "MediaBrowser.Controller.Entities.Movies.Movie";
const FOLDER: &str = "MediaBrowser.Controller.Entities.Folder";
const PERSON: &str = "MediaBrowser.Controller.Entities.Person";

struct FixedTimes;

impl FileTimes for FixedTimes {
    fn read(&self, _path: &Path) -> io::Result<FileTimestamps> {
        Ok(FileTimestamps {
            created: created_time(),
            modified: Utc.with_ymd_and_hms(2021, 6, 7, 8, 9, 10).unwrap(),
        })
    }
}

fn created_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap() + Duration::nanoseconds(123_456_700)
}

struct Fixture {
    _dir: TempDir,
    source: PathBuf,
    target: PathBuf,
    media: PathBuf,
}

fn id(kind: &str, path: &str) -> ItemId {
    ItemId::derive(kind, path)
}

fn text(id: ItemId, encoding: Encoding) -> String {
    match id.encode(encoding, &SwapRule::default()) {
        EncodedId::Text(text) => text,
        EncodedId::Binary(_) => panic!("binary encoding"),
    }
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn create_library(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE TypedBaseItems (guid BLOB PRIMARY KEY NOT NULL, type TEXT NOT NULL, Path TEXT,
             ParentId BLOB, DateCreated TEXT, DateModified TEXT);
         CREATE TABLE AncestorIds (ItemId BLOB NOT NULL, AncestorId BLOB NOT NULL, AncestorIdText TEXT,
             PRIMARY KEY (ItemId, AncestorId));
         CREATE TABLE UserDatas (key TEXT NOT NULL, userId INTEGER NOT NULL, played INTEGER,
             PRIMARY KEY (key, userId));",
    )
    .unwrap();

    let folder = id(FOLDER, "F:\\Movies");
    let rows: [(ItemId, &str, &str, Option<ItemId>); 5] = [
        (id(MOVIE, "F:\\Movies\\a.mkv"), MOVIE, "F:\\Movies\\a.mkv", Some(folder)),
        (id(MOVIE, "F:\\Films\\a.mkv"), MOVIE, "F:\\Films\\a.mkv", Some(folder)),
        (folder, FOLDER, "F:\\Movies", None),
        (id(PERSON, "x"), PERSON, "%MetadataPath%/People/x", None),
        (id(MOVIE, "F:\\Movies\\gone.mkv"), MOVIE, "F:\\Movies\\gone.mkv", Some(folder)),
    ];
    for (guid, kind, item_path, parent) in &rows {
        conn.execute(
            "INSERT INTO TypedBaseItems (guid, type, Path, ParentId, DateCreated, DateModified)
             VALUES (?1, ?2, ?3, ?4, '2019-01-01 00:00:00Z', '2019-01-01 00:00:00Z')",
            params![
                guid.as_bytes().to_vec(),
                kind,
                item_path,
                parent.map(|p| p.as_bytes().to_vec())
            ],
        )
        .unwrap();
    }
    for (guid, ..) in &rows[..2] {
        conn.execute(
            "INSERT INTO AncestorIds (ItemId, AncestorId, AncestorIdText) VALUES (?1, ?2, ?3)",
            params![
                guid.as_bytes().to_vec(),
                folder.as_bytes().to_vec(),
                text(folder, Encoding::AncestorStr)
            ],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO UserDatas (key, userId, played) VALUES (?1, 1, 1)",
            params![text(*guid, Encoding::AncestorStrDash)],
        )
        .unwrap();
    }
}

fn fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let source = dir.path().join("backup");
    let target = dir.path().join("migrated");
    let media = dir.path().join("media");

    create_library(&source.join("data/library.db"));
    write(
        &source.join("config/system.xml"),
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<ServerConfiguration>\n  \
         <MetadataPath>C:\\ProgramData\\Jellyfin\\Server\\metadata</MetadataPath>\n  \
         <CachePath>C:\\ProgramData\\Jellyfin\\Server\\cache</CachePath>\n  \
         <Other>E:\\Elsewhere\\x</Other>\n</ServerConfiguration>\n",
    );
    write(&source.join("root/default/Movies/movies.mblink"), "F:\\Movies\n");

    let old = id(MOVIE, "F:\\Movies\\a.mkv").to_hex();
    write(
        &source.join(format!("metadata/library/{}/{}/poster.jpg", &old[..2], old)),
        "jpeg",
    );
    write(&source.join("metadata/People/x/folder.jpg"), "jpeg");
    write(&media.join("movies/a.mkv"), "video");

    Fixture {
        _dir: dir,
        source,
        target,
        media,
    }
}

fn library_job() -> JobSpec {
    JobSpec::new("data/library.db")
        .kind(DocumentKind::Table)
        .entity(EntitySpec {
            table: "TypedBaseItems".to_string(),
            id_column: "guid".to_string(),
            type_column: "type".to_string(),
            path_column: "Path".to_string(),
            created_column: Some("DateCreated".to_string()),
            modified_column: Some("DateModified".to_string()),
        })
        .table(
            TableSpec::new("TypedBaseItems")
                .paths(&["Path"])
                .ids(Encoding::Bin, &["guid", "ParentId"]),
        )
        .table(
            TableSpec::new("AncestorIds")
                .ids(Encoding::Bin, &["ItemId", "AncestorId"])
                .ids(Encoding::AncestorStr, &["AncestorIdText"]),
        )
        .table(TableSpec::new("UserDatas").ids(Encoding::AncestorStrDash, &["key"]))
}

fn config(fixture: &Fixture, workers: usize) -> AppConfig {
    AppConfig {
        source_root: fixture.source.clone(),
        original_root: None,
        target_root: fixture.target.clone(),
        path_rules: vec![
            PathRule::new("F:\\Movies", "/media/movies"),
            PathRule::new("F:\\Films", "/media/movies"),
        ],
        fs_rules: vec![PathRule::new("/media", fixture.media.to_string_lossy())],
        layout: Some(LayoutPreset {
            windows_root: "C:\\ProgramData\\Jellyfin\\Server".to_string(),
            linux_root: "/jellyfin".to_string(),
            windows_ffmpeg: None,
            linux_ffmpeg: None,
        }),
        log_no_warnings: false,
        workers,
        identifiers: Default::default(),
        xml_skip_elements: vec!["biography".to_string()],
        jobs: vec![
            library_job(),
            JobSpec::new("config/*.xml"),
            JobSpec::new("root/**/*.mblink"),
            JobSpec::new("**/*.*").kind(DocumentKind::Copy).quiet(),
        ],
    }
}

fn migrate(fixture: &Fixture, workers: usize) -> MigrationReport {
    let mut migrator = Migrator::new(config(fixture, workers)).with_file_times(FixedTimes);
    let report = migrator.run(&SilentReporter).unwrap();
    assert_eq!(migrator.state(), MigrationState::Done);
    report
}

fn guids(db: &Path) -> Vec<(Vec<u8>, String, Option<Vec<u8>>)> {
    let conn = Connection::open(db).unwrap();
    let mut stmt = conn
        .prepare("SELECT guid, Path, ParentId FROM TypedBaseItems ORDER BY rowid")
        .unwrap();
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    rows
}

#[test]
fn test_library_paths_and_identifiers_are_migrated() {
    let fixture = fixture();
    let report = migrate(&fixture, 1);
    let db = fixture.target.join("data/data/library.db");

    let new_movie = id(MOVIE, "/media/movies/a.mkv");
    let new_folder = id(FOLDER, "/media/movies");
    let person = id(PERSON, "x");

    let rows = guids(&db);
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].0, new_movie.as_bytes().to_vec());
    assert_eq!(rows[0].1, "/media/movies/a.mkv");
    assert_eq!(rows[0].2, Some(new_folder.as_bytes().to_vec()));
    assert_eq!(rows[1].0, new_folder.as_bytes().to_vec());
    assert_eq!(rows[2].0, person.as_bytes().to_vec());
    assert_eq!(rows[2].1, "%MetadataPath%/People/x");
    assert_eq!(rows[3].1, "/media/movies/gone.mkv");

    let conn = Connection::open(&db).unwrap();
    let ancestors: Vec<(Vec<u8>, Vec<u8>, String)> = conn
        .prepare("SELECT ItemId, AncestorId, AncestorIdText FROM AncestorIds")
        .unwrap()
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        ancestors,
        vec![(
            new_movie.as_bytes().to_vec(),
            new_folder.as_bytes().to_vec(),
            text(new_folder, Encoding::AncestorStr)
        )]
    );

    let keys: Vec<String> = conn
        .prepare("SELECT key FROM UserDatas")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(keys, vec![text(new_movie, Encoding::AncestorStrDash)]);

    assert_eq!(report.merges, 1);
    assert_eq!(report.rows_deleted, 3);
    assert_eq!(report.failed_jobs, 0);
    let deleted: Vec<_> = report
        .merge_notices()
        .filter_map(|d| match d {
            Diagnostic::MergeNotice {
                deleted_row: Some(row),
                ..
            } => Some(row.table.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(deleted.len(), 3);
    assert!(deleted.contains(&"TypedBaseItems".to_string()));
}

#[test]
fn test_source_tree_is_left_untouched() {
    let fixture = fixture();
    migrate(&fixture, 1);

    let rows = guids(&fixture.source.join("data/library.db"));
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0].1, "F:\\Movies\\a.mkv");
    let xml = fs::read_to_string(fixture.source.join("config/system.xml")).unwrap();
    assert!(xml.contains("C:\\ProgramData\\Jellyfin\\Server\\metadata"));
}

#[test]
fn test_documents_are_rewritten() {
    let fixture = fixture();
    let report = migrate(&fixture, 1);

    let xml = fs::read_to_string(fixture.target.join("config/system.xml")).unwrap();
    assert!(xml.contains("<MetadataPath>/jellyfin/data/metadata</MetadataPath>"));
    assert!(xml.contains("<CachePath>/jellyfin/cache</CachePath>"));
    assert!(xml.contains("<Other>E:\\Elsewhere\\x</Other>"));
    assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<ServerConfiguration>"));

    let link = fs::read_to_string(fixture.target.join("data/root/default/Movies/movies.mblink")).unwrap();
    assert_eq!(link, "/media/movies\n");

    let unmatched: Vec<_> = report
        .warnings()
        .filter(|d| {
            matches!(d, Diagnostic::FieldWarning { value, reason: WarningReason::UnmatchedPath, .. }
                if value == "E:\\Elsewhere\\x")
        })
        .collect();
    assert_eq!(unmatched.len(), 1);
    assert!(report.paths_rewritten >= 6);
}

#[test]
fn test_metadata_folders_follow_new_identifiers() {
    let fixture = fixture();
    let report = migrate(&fixture, 1);

    let old = id(MOVIE, "F:\\Movies\\a.mkv").to_hex();
    let new = id(MOVIE, "/media/movies/a.mkv").to_hex();
    let moved = fixture
        .target
        .join(format!("data/metadata/library/{}/{}/poster.jpg", &new[..2], new));
    let stale = fixture
        .target
        .join(format!("data/metadata/library/{}/{}/poster.jpg", &old[..2], old));

    assert_eq!(fs::read_to_string(moved).unwrap(), "jpeg");
    assert!(!stale.exists());
    assert!(fixture.target.join("data/metadata/People/x/folder.jpg").exists());
    assert_eq!(report.files_relocated, 1);
    assert_eq!(report.files_copied, 2);
}

#[test]
fn test_timestamps_follow_files_on_disk() {
    let fixture = fixture();
    let report = migrate(&fixture, 1);

    let conn = Connection::open(fixture.target.join("data/data/library.db")).unwrap();
    let dates: Vec<(String, String, String)> = conn
        .prepare("SELECT Path, DateCreated, DateModified FROM TypedBaseItems ORDER BY rowid")
        .unwrap()
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(dates[0].1, "2020-01-02 03:04:05.1234567Z");
    assert_eq!(dates[0].2, "2021-06-07 08:09:10Z");
    // folder and token path exist after the copy
    assert_eq!(dates[1].2, "2021-06-07 08:09:10Z");
    assert_eq!(dates[2].2, "2021-06-07 08:09:10Z");
    // missing file keeps its date
    assert_eq!(dates[3].0, "/media/movies/gone.mkv");
    assert_eq!(dates[3].1, "2019-01-01 00:00:00Z");

    assert_eq!(report.timestamps_updated, 3);
    assert_eq!(report.missing_files, 1);
    assert!(report.warnings().any(|d| matches!(
        d,
        Diagnostic::FieldWarning { reason: WarningReason::MissingFile, value, .. }
            if value == "/media/movies/gone.mkv"
    )));
}

#[test]
fn test_worker_pool_gives_the_same_result() {
    let sequential = fixture();
    let parallel = fixture();
    migrate(&sequential, 1);
    let report = migrate(&parallel, 4);

    assert_eq!(
        guids(&sequential.target.join("data/data/library.db")),
        guids(&parallel.target.join("data/data/library.db"))
    );
    assert_eq!(report.rows_deleted, 3);
}

#[test]
fn test_second_run_changes_nothing() {
    let fixture = fixture();
    migrate(&fixture, 1);

    let mut config = config(&fixture, 1);
    config.source_root = fixture.target.clone();
    let mut job = library_job();
    job.source = "data/data/library.db".to_string();
    job.target = fixture
        .target
        .join("data/data/library.db")
        .to_string_lossy()
        .into_owned();
    config.jobs = vec![job];

    let before = guids(&fixture.target.join("data/data/library.db"));
    let mut migrator = Migrator::new(config)
        .with_file_times(FixedTimes)
        .with_acknowledger(AcceptAll);
    let report = migrator.run(&SilentReporter).unwrap();

    assert_eq!(guids(&fixture.target.join("data/data/library.db")), before);
    assert_eq!(report.paths_rewritten, 0);
    assert_eq!(report.identifiers_rewritten, 0);
    assert_eq!(report.timestamps_updated, 0);
}

#[test]
fn test_in_place_jobs_need_acknowledgement() {
    let fixture = fixture();
    let xml = fixture.source.join("config/system.xml");
    let original = fs::read_to_string(&xml).unwrap();

    let mut config = config(&fixture, 1);
    let mut job = JobSpec::new("config/system.xml");
    job.target = xml.to_string_lossy().into_owned();
    config.jobs = vec![job];

    let report = Migrator::new(config.clone()).run(&SilentReporter).unwrap();
    assert_eq!(fs::read_to_string(&xml).unwrap(), original);
    assert!(report
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::SameSourceTarget { .. })));

    Migrator::new(config)
        .with_acknowledger(AcceptAll)
        .run(&SilentReporter)
        .unwrap();
    assert!(fs::read_to_string(&xml)
        .unwrap()
        .contains("<MetadataPath>/jellyfin/data/metadata</MetadataPath>"));
}

#[test]
fn test_missing_declared_column_aborts_before_writing() {
    let fixture = fixture();
    let mut config = config(&fixture, 1);
    config.jobs = vec![JobSpec::new("data/library.db")
        .table(TableSpec::new("TypedBaseItems").paths(&["NoSuchColumn"]))];

    let mut migrator = Migrator::new(config);
    let err = migrator.run(&SilentReporter).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(migrator.state(), MigrationState::Failed);
    assert!(!fixture.target.exists());
}

#[test]
fn test_broken_document_fails_only_its_job() {
    let fixture = fixture();
    write(&fixture.source.join("config/broken.xml"), "<a><b></a>");
    let report = migrate(&fixture, 1);

    assert_eq!(report.failed_jobs, 1);
    assert!(report.diagnostics.iter().any(|d| matches!(
        d,
        Diagnostic::JobFailed { path, .. } if path.ends_with("config/broken.xml")
    )));
    assert!(fixture.target.join("config/system.xml").exists());
}

fn create_chained_library(path: &Path, paths: &[&str]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE TypedBaseItems (guid BLOB PRIMARY KEY NOT NULL, type TEXT NOT NULL, Path TEXT,
             ParentId BLOB, DateCreated TEXT, DateModified TEXT);
         CREATE TABLE AncestorIds (ItemId BLOB NOT NULL, AncestorId BLOB NOT NULL, AncestorIdText TEXT,
             PRIMARY KEY (ItemId, AncestorId));
         CREATE TABLE UserDatas (key TEXT NOT NULL, userId INTEGER NOT NULL, played INTEGER,
             PRIMARY KEY (key, userId));",
    )
    .unwrap();
    for item_path in paths {
        let guid = id(MOVIE, item_path);
        conn.execute(
            "INSERT INTO TypedBaseItems (guid, type, Path) VALUES (?1, ?2, ?3)",
            params![guid.as_bytes().to_vec(), MOVIE, item_path],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO UserDatas (key, userId, played) VALUES (?1, 1, 1)",
            params![text(guid, Encoding::AncestorStrDash)],
        )
        .unwrap();
    }
}

#[test]
fn test_chained_rules_keep_every_entity() {
    let fixture = fixture();
    let db = fixture.source.join("data/chained.db");
    create_chained_library(&db, &["D:/M/a.mkv", "E:/M/a.mkv"]);

    let mut config = config(&fixture, 1);
    // the first entity moves onto the old location of the second
    config.path_rules = vec![PathRule::new("D:/M", "E:/M"), PathRule::new("E:/M", "F:/M")];
    let mut job = library_job();
    job.source = "data/chained.db".to_string();
    config.jobs = vec![job];

    let mut migrator = Migrator::new(config).with_file_times(FixedTimes);
    let report = migrator.run(&SilentReporter).unwrap();
    assert_eq!(migrator.state(), MigrationState::Done);

    let db = fixture.target.join("data/data/chained.db");
    let rows = guids(&db);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, id(MOVIE, "E:/M/a.mkv").as_bytes().to_vec());
    assert_eq!(rows[0].1, "E:/M/a.mkv");
    assert_eq!(rows[1].0, id(MOVIE, "F:/M/a.mkv").as_bytes().to_vec());
    assert_eq!(rows[1].1, "F:/M/a.mkv");

    let conn = Connection::open(&db).unwrap();
    let keys: Vec<String> = conn
        .prepare("SELECT key FROM UserDatas ORDER BY rowid")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        keys,
        vec![
            text(id(MOVIE, "E:/M/a.mkv"), Encoding::AncestorStrDash),
            text(id(MOVIE, "F:/M/a.mkv"), Encoding::AncestorStrDash),
        ]
    );

    assert_eq!(report.merges, 0);
    assert_eq!(report.rows_deleted, 0);
    assert_eq!(report.merge_notices().count(), 0);
}

#[test]
fn test_padded_paths_keep_their_whitespace() {
    let fixture = fixture();
    write(
        &fixture.source.join("config/padded.xml"),
        "<Item>\n  <Path> F:\\Movies\\x.mkv </Path>\n</Item>\n",
    );
    let report = migrate(&fixture, 1);

    let xml = fs::read_to_string(fixture.target.join("config/padded.xml")).unwrap();
    assert_eq!(xml, "<Item>\n  <Path> /media/movies/x.mkv </Path>\n</Item>\n");
    assert!(!report.warnings().any(|d| matches!(
        d,
        Diagnostic::FieldWarning { reason: WarningReason::UnmatchedPath, value, .. }
            if value.contains("x.mkv")
    )));
}

#[test]
fn test_acknowledged_in_place_jobs_are_reported_once() {
    let fixture = fixture();
    let other = fixture.source.join("config/other.xml");
    write(&other, "<Item><Path>F:\\Movies\\b.mkv</Path></Item>");
    let system = fixture.source.join("config/system.xml");

    let mut config = config(&fixture, 1);
    config.jobs = [&system, &other]
        .iter()
        .map(|path| {
            let mut job = JobSpec::new(
                path.strip_prefix(&fixture.source)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned(),
            );
            job.target = path.to_string_lossy().into_owned();
            job
        })
        .collect();

    let report = Migrator::new(config)
        .with_acknowledger(AcceptAll)
        .run(&SilentReporter)
        .unwrap();
    let notices = report
        .diagnostics
        .iter()
        .filter(|d| matches!(d, Diagnostic::SameSourceTarget { .. }))
        .count();
    assert_eq!(notices, 1);
    assert_eq!(
        fs::read_to_string(&other).unwrap(),
        "<Item><Path>/media/movies/b.mkv</Path></Item>"
    );
}
