//! Files kept next to the project document that some steps must patch along with
//! the data: writing-system definitions, layout configuration and project settings.
//! All paths are relative to the repository's project folder; a missing file or
//! directory means there is nothing to patch.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{LexError, Result};
use super::write_atomic;
use crate::migration::services::{rename_ws_attributes, rename_ws_in_list};
use crate::xml::{Element, parse_xml, to_xml_document, to_xml_string};

pub const WRITING_SYSTEM_DIR: &str = "WritingSystemStore";
pub const LAYOUT_DIR: &str = "ConfigurationSettings";
pub const SETTINGS_FILE: &str = "Settings/ProjectSettings.json";

const LDML_EXTENSION: &str = "ldml";
const LAYOUT_EXTENSION: &str = "fwlayout";

/// Renames `field` attributes equal to `from` inside every `<layout>` whose
/// `class` is one of `classes`. Returns the number of attributes rewritten.
pub fn rename_layout_field(folder: &Path, classes: &[String], from: &str, to: &str) -> Result<usize> {
    let mut total = 0usize;
    for path in files_with_extension(&folder.join(LAYOUT_DIR), LAYOUT_EXTENSION)? {
        let mut root = read_xml(&path)?;
        let mut changed = 0usize;
        root.visit_mut(&mut |e| {
            if e.name() != "layout" || !e.attr("class").is_some_and(|c| classes.iter().any(|k| k == c)) {
                return;
            }
            e.visit_mut(&mut |part| {
                if part.attr("field") == Some(from) {
                    part.set_attr("field", to);
                    changed += 1;
                }
            });
        });
        if changed > 0 {
            write_atomic(&path, to_xml_document(&root).as_bytes())?;
            debug!(path = %path.display(), changed, "patched layout file");
            total += changed;
        }
    }
    Ok(total)
}

/// Renames `WritingSystemStore/<from>.ldml` to `<to>.ldml` and rewrites the
/// identity attributes naming the old tag. Returns false when there is no file
/// for `from`.
pub fn rename_writing_system_file(folder: &Path, from: &str, to: &str) -> Result<bool> {
    let dir = folder.join(WRITING_SYSTEM_DIR);
    let old_path = dir.join(format!("{}.{}", from, LDML_EXTENSION));
    if !old_path.is_file() {
        return Ok(false);
    }
    let new_path = dir.join(format!("{}.{}", to, LDML_EXTENSION));
    if new_path.exists() {
        return Err(LexError::Artifact(format!(
            "cannot rename {}: {} already exists",
            old_path.display(),
            new_path.display()
        )));
    }

    let mut root = read_xml(&old_path)?;
    let mut rewritten = 0usize;
    if let Some(identity) = root.child_mut("identity") {
        identity.visit_mut(&mut |e| {
            for (_, value) in e.attributes_mut() {
                if value.as_str() == from {
                    *value = to.to_string();
                    rewritten += 1;
                }
            }
        });
    }
    write_atomic(&new_path, to_xml_document(&root).as_bytes())?;
    std::fs::remove_file(&old_path)?;
    info!(from, to, rewritten, "renamed writing system file");
    Ok(true)
}

/// Replaces writing-system tag `from` with `to` in the project settings values:
/// whole values, whitespace-separated tag lists, and `ws` or other attributes of
/// values holding serialized XML. Returns the number of values changed.
pub fn rename_ws_in_settings(folder: &Path, from: &str, to: &str) -> Result<usize> {
    let path = folder.join(SETTINGS_FILE);
    if !path.is_file() {
        return Ok(0);
    }
    let data = std::fs::read_to_string(&path)?;
    let mut settings: Value = serde_json::from_str(&data)?;
    let entries = settings.as_object_mut().ok_or_else(|| {
        LexError::Artifact(format!("{} is not a JSON object", path.display()))
    })?;

    let mut changed = 0usize;
    for (name, value) in entries.iter_mut() {
        let Some(text) = value.as_str() else {
            continue;
        };
        if let Some(patched) = patch_setting(text, from, to)? {
            debug!(setting = %name, "patched setting");
            *value = Value::String(patched);
            changed += 1;
        }
    }
    if changed > 0 {
        write_atomic(&path, serde_json::to_string_pretty(&settings)?.as_bytes())?;
    }
    Ok(changed)
}

fn patch_setting(text: &str, from: &str, to: &str) -> Result<Option<String>> {
    if text == from {
        return Ok(Some(to.to_string()));
    }
    if text.trim_start().starts_with('<') {
        let mut root = parse_xml(text)
            .map_err(|e| LexError::Artifact(format!("setting holds malformed XML: {}", e)))?;
        let changed = rename_ws_attributes(&mut root, from, to) + rename_attribute_values(&mut root, from, to);
        return Ok((changed > 0).then(|| to_xml_string(&root)));
    }
    Ok(rename_ws_in_list(text, from, to))
}

fn rename_attribute_values(root: &mut Element, from: &str, to: &str) -> usize {
    let mut changed = 0;
    root.visit_mut(&mut |e| {
        for (_, value) in e.attributes_mut() {
            if let Some(renamed) = rename_ws_in_list(value, from, to) {
                *value = renamed;
                changed += 1;
            }
        }
    });
    changed
}

fn read_xml(path: &Path) -> Result<Element> {
    let text = std::fs::read_to_string(path)?;
    parse_xml(&text).map_err(|e| LexError::Artifact(format!("{}: {}", path.display(), e)))
}

/// Files in `dir` with the given extension, sorted by path.
fn files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
