//! The bundled step chain, one module per data change.

mod confidence_levels;
mod entry_note;
mod entry_refs;
mod guid_case;
mod scalar_defaults;
mod segments;
mod text_styles;
mod txt_para;
mod wordform_inventory;
mod ws_rename;

use super::DataMigration;

pub const OLDEST_SUPPORTED_VERSION: u32 = 7_000_000;

pub use segments::SEGMENT_ANNOTATION_TYPE;
pub use ws_rename::{NEW_WS_TAG, OLD_WS_TAG};

pub fn all() -> Vec<DataMigration> {
    vec![
        DataMigration::new(
            7_000_001,
            "fold the wordform inventory into the language project",
            wordform_inventory::migrate,
        ),
        DataMigration::new(
            7_000_002,
            "plain paragraphs become text paragraphs",
            txt_para::migrate,
        ),
        DataMigration::new(7_000_003, "lowercase guids", guid_case::migrate),
        DataMigration::bookkeeping(7_000_004, "model version bump without data change"),
        DataMigration::new(
            7_000_005,
            "backfill missing scalar properties",
            scalar_defaults::migrate,
        ),
        DataMigration::new(
            7_000_006,
            "merge the confidence list into confidence levels",
            confidence_levels::migrate,
        ),
        DataMigration::new(
            7_000_007,
            "move text styles to the language project",
            text_styles::migrate,
        ),
        DataMigration::new(
            7_000_008,
            "segment annotations become paragraph segments",
            segments::migrate,
        ),
        DataMigration::new(
            7_000_009,
            "rename LexEntry.Comment to Note",
            entry_note::migrate,
        ),
        DataMigration::new(
            7_000_010,
            "rename the x-kal writing system",
            ws_rename::migrate,
        ),
        DataMigration::new(
            7_000_011,
            "merge variant and complex form references into LexEntryRef",
            entry_refs::migrate,
        ),
    ]
}
