//! 7000009: `LexEntry.Comment` is renamed `LexEntry.Note`, in the data and in the
//! layout configuration files that display entries.

use tracing::info;

use crate::error::Result;
use crate::migration::services::{merge_alternatives, rename_property};
use crate::project::artifacts::rename_layout_field;
use crate::store::repository::ObjectRepository;

const OLD_FIELD: &str = "Comment";
const NEW_FIELD: &str = "Note";

pub(super) fn migrate(repo: &mut ObjectRepository) -> Result<()> {
    let mut renamed = 0usize;
    let mut merged = 0usize;
    for mut entry in repo.all_instances_with_subclasses("LexEntry")? {
        if !entry.has_property(OLD_FIELD) {
            continue;
        }
        if entry.has_property(NEW_FIELD) {
            if let (Some(comment), Some(note)) = (entry.take_property(OLD_FIELD), entry.property_mut(NEW_FIELD)) {
                merge_alternatives(note, &comment);
            }
            merged += 1;
        } else if rename_property(&mut entry, OLD_FIELD, NEW_FIELD) {
            renamed += 1;
        }
        repo.update(entry)?;
    }

    let mut layouts = 0usize;
    if let Some(folder) = repo.project_folder() {
        let classes = repo.metadata().all_subclasses("LexEntry")?;
        layouts = rename_layout_field(folder, &classes, OLD_FIELD, NEW_FIELD)?;
    }
    info!(renamed, merged, layouts, "entry comments renamed to notes");
    Ok(())
}
