//! 7000007: styles owned by individual texts move to `LangProject.Styles`; the
//! text keeps them as references. A moved style whose name the project already
//! has is folded into the existing one. Runs delint.

use std::collections::BTreeMap;

use tracing::info;

use crate::error::Result;
use crate::migration::services::{
    append_link, replace_references, reparent, set_link_kind, single_instance,
};
use crate::store::delint::delint;
use crate::store::repository::ObjectRepository;
use crate::store::surrogate::Surrogate;
use crate::types::{Guid, LinkKind};

pub(super) fn migrate(repo: &mut ObjectRepository) -> Result<()> {
    let Some(project) = single_instance(repo, "LangProject")? else {
        return Ok(());
    };
    let project_guid = project.guid();
    let mut by_name: BTreeMap<String, Guid> = project
        .link_targets("Styles")
        .into_iter()
        .filter_map(|g| repo.try_get(g).and_then(style_name).map(|n| (n, g)))
        .collect();

    let mut retarget = BTreeMap::new();
    let mut moved = 0usize;
    for text in repo.all_instances_with_subclasses("StText")? {
        let owned: Vec<Guid> = text
            .owning_links()
            .into_iter()
            .filter(|l| l.field == "Styles")
            .map(|l| l.target)
            .collect();
        if owned.is_empty() {
            continue;
        }

        for style_guid in owned {
            let Some(mut style) = repo.try_get(style_guid).cloned() else {
                continue;
            };
            let name = style_name(&style);
            if let Some(existing) = name.as_ref().and_then(|n| by_name.get(n)).copied() {
                retarget.insert(style_guid, existing);
                continue;
            }
            let mut project = repo.get(project_guid)?.clone();
            reparent(repo.metadata(), &mut style, &project, "Styles", None)?;
            append_link(repo.metadata(), &mut project, "Styles", style_guid, LinkKind::Owning);
            repo.update(project)?;
            repo.update(style)?;
            if let Some(name) = name {
                by_name.insert(name, style_guid);
            }
            moved += 1;
        }

        let mut text = repo.get(text.guid())?.clone();
        set_link_kind(&mut text, "Styles", LinkKind::Reference);
        repo.update(text)?;
    }

    let merged = retarget.len();
    replace_references(repo, &retarget)?;
    for duplicate in retarget.keys() {
        repo.remove_including_owned(*duplicate);
    }
    info!(moved, merged, "text styles moved to the project");
    delint(repo);
    Ok(())
}

fn style_name(style: &Surrogate) -> Option<String> {
    style
        .property("Name")
        .map(|p| p.deep_text().trim().to_string())
        .filter(|n| !n.is_empty())
}
