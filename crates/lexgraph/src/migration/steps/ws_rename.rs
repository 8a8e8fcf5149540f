//! 7000010: the private-use writing-system tag `x-kal` becomes `qaa-x-kal`.
//!
//! Every `ws` attribute in the data is rewritten, as are the project's
//! writing-system lists. In the project folder the ldml file is renamed and the
//! settings file patched.

use tracing::info;

use crate::error::Result;
use crate::migration::services::{rename_ws_attributes, rename_ws_in_list, single_instance};
use crate::project::artifacts::{rename_writing_system_file, rename_ws_in_settings};
use crate::store::repository::ObjectRepository;
use crate::xml::Element;

pub const OLD_WS_TAG: &str = "x-kal";
pub const NEW_WS_TAG: &str = "qaa-x-kal";

const WS_LIST_FIELDS: [&str; 2] = ["AnalysisWss", "VernWss"];

pub(super) fn migrate(repo: &mut ObjectRepository) -> Result<()> {
    let mut attributes = 0usize;
    for guid in repo.guids() {
        let mut surrogate = repo.get(guid)?.clone();
        let changed = rename_ws_attributes(surrogate.content_mut(), OLD_WS_TAG, NEW_WS_TAG);
        if changed > 0 {
            attributes += changed;
            repo.update(surrogate)?;
        }
    }

    if let Some(mut project) = single_instance(repo, "LangProject")? {
        let mut lists = 0usize;
        for field in WS_LIST_FIELDS {
            let Some(prop) = project.property_mut(field) else {
                continue;
            };
            let renamed = match prop.child_mut("Uni") {
                Some(uni) => rename_list_text(uni),
                None => rename_list_text(prop),
            };
            if renamed {
                lists += 1;
            }
        }
        if lists > 0 {
            repo.update(project)?;
        }
    }

    let (mut files, mut settings) = (false, 0usize);
    if let Some(folder) = repo.project_folder() {
        files = rename_writing_system_file(folder, OLD_WS_TAG, NEW_WS_TAG)?;
        settings = rename_ws_in_settings(folder, OLD_WS_TAG, NEW_WS_TAG)?;
    }
    info!(
        from = OLD_WS_TAG,
        to = NEW_WS_TAG,
        attributes,
        ldml_renamed = files,
        settings,
        "writing system renamed"
    );
    Ok(())
}

/// Tag lists are stored either as the property's text or inside a `Uni` child.
fn rename_list_text(holder: &mut Element) -> bool {
    match rename_ws_in_list(&holder.text(), OLD_WS_TAG, NEW_WS_TAG) {
        Some(renamed) => {
            holder.set_text(renamed);
            true
        }
        None => false,
    }
}
