//! 7000006: the legacy `LangProject.Confidence` list is merged into
//! `LangProject.ConfidenceLevels`.
//!
//! Items move over in their original order. An item sharing any name alternative
//! with an item already in the target list is a duplicate: references to it are
//! retargeted to the surviving item and it is deleted. When the project has no
//! target list yet the legacy list itself is moved. Runs delint.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::error::Result;
use crate::migration::services::{
    alternatives, move_owned, reparent, replace_references, single_instance,
};
use crate::store::delint::delint;
use crate::store::repository::ObjectRepository;
use crate::store::surrogate::Surrogate;
use crate::types::Guid;

const LEGACY_FIELD: &str = "Confidence";
const TARGET_FIELD: &str = "ConfidenceLevels";

pub(super) fn migrate(repo: &mut ObjectRepository) -> Result<()> {
    let Some(project) = single_instance(repo, "LangProject")? else {
        return Ok(());
    };
    let Some(legacy) = project
        .link_targets(LEGACY_FIELD)
        .first()
        .and_then(|g| repo.try_get(*g))
        .cloned()
    else {
        if project.has_property(LEGACY_FIELD) {
            let mut project = project;
            project.take_property(LEGACY_FIELD);
            repo.update(project)?;
        }
        return Ok(());
    };
    let target = project
        .link_targets(TARGET_FIELD)
        .first()
        .and_then(|g| repo.try_get(*g))
        .cloned();

    match target {
        None => adopt_legacy_list(repo, project, legacy)?,
        Some(target) => merge_into(repo, project.guid(), legacy, target)?,
    }
    delint(repo);
    Ok(())
}

fn adopt_legacy_list(
    repo: &mut ObjectRepository,
    mut project: Surrogate,
    mut legacy: Surrogate,
) -> Result<()> {
    project.take_property(TARGET_FIELD);
    if let Some(prop) = project.property_mut(LEGACY_FIELD) {
        prop.rename(TARGET_FIELD);
    }
    reparent(repo.metadata(), &mut legacy, &project, TARGET_FIELD, None)?;
    info!(list = %legacy.guid(), "confidence list renamed to confidence levels");
    repo.update(project)?;
    repo.update(legacy)
}

fn merge_into(
    repo: &mut ObjectRepository,
    project: Guid,
    legacy: Surrogate,
    target: Surrogate,
) -> Result<()> {
    let mut known: Vec<(Guid, Vec<(String, String)>)> = target
        .link_targets("Possibilities")
        .into_iter()
        .filter_map(|g| repo.try_get(g).map(|item| (g, name_keys(item))))
        .collect();

    let mut retarget = BTreeMap::new();
    let mut moved = 0usize;
    for item_guid in legacy.link_targets("Possibilities") {
        let Some(item) = repo.try_get(item_guid) else {
            continue;
        };
        let keys = name_keys(item);
        let survivor = known
            .iter()
            .find(|(_, existing)| keys.iter().any(|k| existing.contains(k)))
            .map(|(g, _)| *g);
        match survivor {
            Some(survivor) => {
                debug!(duplicate = %item_guid, survivor = %survivor, "duplicate confidence level");
                retarget.insert(item_guid, survivor);
            }
            None => {
                move_owned(repo, item_guid, target.guid(), "Possibilities")?;
                known.push((item_guid, keys));
                moved += 1;
            }
        }
    }

    let retargeted = replace_references(repo, &retarget)?;
    for duplicate in retarget.keys() {
        repo.remove_including_owned(*duplicate);
    }
    repo.remove_including_owned(legacy.guid());

    let mut project = repo.get(project)?.clone();
    project.take_property(LEGACY_FIELD);
    repo.update(project)?;
    info!(
        moved,
        duplicates = retarget.len(),
        retargeted,
        "confidence lists merged"
    );
    Ok(())
}

/// Non-empty `(ws, text)` name alternatives.
fn name_keys(item: &Surrogate) -> Vec<(String, String)> {
    item.property("Name")
        .map(alternatives)
        .unwrap_or_default()
        .into_iter()
        .map(|(ws, text)| (ws, text.trim().to_string()))
        .filter(|(_, text)| !text.is_empty())
        .collect()
}
