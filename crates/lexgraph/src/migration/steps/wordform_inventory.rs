//! 7000001: `WordformInventory` is retired. Its wordforms become owned directly by
//! `LangProject.Wordforms`, a collection, so they lose `owningord`. Runs delint.

use tracing::{info, warn};

use crate::error::Result;
use crate::migration::services::{append_link, reparent, single_instance};
use crate::store::delint::delint;
use crate::store::repository::ObjectRepository;
use crate::types::LinkKind;

pub(super) fn migrate(repo: &mut ObjectRepository) -> Result<()> {
    let inventories = repo.all_instances_sans_subclasses("WordformInventory")?;
    let Some(mut project) = single_instance(repo, "LangProject")? else {
        if !inventories.is_empty() {
            warn!("no LangProject to receive wordforms; dropping the inventories");
        }
        for inventory in &inventories {
            repo.remove_including_owned(inventory.guid());
        }
        delint(repo);
        return Ok(());
    };

    let mut moved = 0usize;
    for inventory in &inventories {
        for link in inventory.owning_links() {
            if link.field != "Wordforms" {
                continue;
            }
            // dangling links are left for delint
            let Some(wordform) = repo.try_get(link.target) else {
                continue;
            };
            let mut wordform = wordform.clone();
            reparent(repo.metadata(), &mut wordform, &project, "Wordforms", None)?;
            if !project.link_targets("Wordforms").contains(&link.target) {
                append_link(
                    repo.metadata(),
                    &mut project,
                    "Wordforms",
                    link.target,
                    LinkKind::Owning,
                );
            }
            repo.update(wordform)?;
            moved += 1;
        }
    }
    project.take_property("WordformInventory");
    repo.update(project)?;

    for inventory in &inventories {
        repo.remove(inventory.guid())?;
    }
    info!(inventories = inventories.len(), wordforms = moved, "wordform inventory folded");
    delint(repo);
    Ok(())
}
