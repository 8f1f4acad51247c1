//! Built-in job list for a stock Jellyfin data directory.

use super::{EntitySpec, JobSpec, TableSpec};
use crate::formats::DocumentKind;
use crate::identifier::Encoding;

/// `TypedBaseItems`: one row per library entity.
pub fn typed_base_items_entity() -> EntitySpec {
    EntitySpec {
        table: "TypedBaseItems".to_string(),
        id_column: "guid".to_string(),
        type_column: "type".to_string(),
        path_column: "Path".to_string(),
        created_column: Some("DateCreated".to_string()),
        modified_column: Some("DateModified".to_string()),
    }
}

/// Jobs in claim order: structured documents first, then plain copies of everything else.
pub fn jellyfin_jobs() -> Vec<JobSpec> {
    vec![
        library_db(),
        JobSpec::new("data/jellyfin.db").table(TableSpec::new("ImageInfos").paths(&["Path"])),
        JobSpec::new("data/playback_reporting.db")
            .table(TableSpec::new("PlaybackActivity").ids(Encoding::AncestorStr, &["ItemId"])),
        JobSpec::new("data/*.db").kind(DocumentKind::Copy).quiet(),
        JobSpec::new("plugins/**/*.json"),
        JobSpec::new("config/*.xml"),
        JobSpec::new("metadata/**/*.nfo"),
        // .xml, .mblink and .collection files
        JobSpec::new("root/**/*.*"),
        JobSpec::new("data/collections/**/collection.xml"),
        JobSpec::new("data/playlists/**/playlist.xml"),
        JobSpec::new("**/*.*").kind(DocumentKind::Copy).quiet(),
    ]
}

fn library_db() -> JobSpec {
    JobSpec::new("data/library.db")
        .kind(DocumentKind::Table)
        .entity(typed_base_items_entity())
        .table(
            TableSpec::new("TypedBaseItems")
                .paths(&["Path"])
                .images(&["Images"])
                .json(&["data"])
                .ids(Encoding::Bin, &["guid", "ParentId", "SeasonId", "SeriesId", "OwnerId"])
                .ids(
                    Encoding::AncestorStr,
                    &["TopParentId", "PresentationUniqueKey", "SeriesPresentationUniqueKey"],
                )
                .ids(Encoding::AncestorStrDash, &["UserDataKey", "ExtraIds"]),
        )
        .table(
            TableSpec::new("mediastreams")
                .paths(&["Path"])
                .ids(Encoding::Bin, &["ItemId"]),
        )
        .table(
            TableSpec::new("Chapters2")
                .images(&["ImagePath"])
                .ids(Encoding::Bin, &["ItemId"]),
        )
        .table(
            TableSpec::new("AncestorIds")
                .ids(Encoding::Bin, &["ItemId", "AncestorId"])
                .ids(Encoding::AncestorStr, &["AncestorIdText"]),
        )
        .table(TableSpec::new("ItemValues").ids(Encoding::Bin, &["ItemId"]))
        .table(TableSpec::new("People").ids(Encoding::Bin, &["ItemId"]))
        .table(TableSpec::new("UserDatas").ids(Encoding::AncestorStrDash, &["key"]))
        .table(TableSpec::new("mediaattachments").ids(Encoding::Bin, &["ItemId"]))
}
