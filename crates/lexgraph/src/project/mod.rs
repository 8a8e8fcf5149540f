//! Project container files.
//!
//! A project is one XML document:
//! `<languageproject version="N"><AdditionalFields>…</AdditionalFields><rt …/>…</languageproject>`.
//! Custom fields are declared up front so the catalog knows them before any object
//! that carries a value for one is loaded.

pub mod artifacts;

use std::path::Path;

use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::error::{LexError, Result};
use crate::model::standard_catalog;
use crate::store::repository::ObjectRepository;
use crate::store::surrogate::{ROOT_ELEMENT, Surrogate};
use crate::types::FieldKind;
use crate::xml::writer::to_xml_document;
use crate::xml::{Element, parse_xml};

pub const CONTAINER_ELEMENT: &str = "languageproject";
const ADDITIONAL_FIELDS: &str = "AdditionalFields";
const CUSTOM_FIELD: &str = "CustomField";

/// Loads a project file against the bundled model. The file's directory becomes
/// the repository's project folder.
pub fn load_project(path: &Path) -> Result<ObjectRepository> {
    let text = std::fs::read_to_string(path)?;
    let mut repo = load_project_str(&text, standard_catalog()?)?;
    repo.set_project_folder(path.parent().map(Path::to_path_buf));
    info!(
        path = %path.display(),
        objects = repo.len(),
        version = repo.current_model_version(),
        "loaded project"
    );
    Ok(repo)
}

pub fn load_project_str(text: &str, mut catalog: Catalog) -> Result<ObjectRepository> {
    let root = parse_xml(text)?;
    if root.name() != CONTAINER_ELEMENT {
        return Err(LexError::Project(format!(
            "expected <{}> root element, found <{}>",
            CONTAINER_ELEMENT,
            root.name()
        )));
    }
    let version = root
        .attr("version")
        .ok_or_else(|| LexError::Project("missing version attribute".to_string()))?;
    let version: u32 = version
        .trim()
        .parse()
        .map_err(|_| LexError::Project(format!("invalid version '{}'", version)))?;

    for fields in root.elements_named(ADDITIONAL_FIELDS) {
        for decl in fields.elements_named(CUSTOM_FIELD) {
            register_custom_field(&mut catalog, decl)?;
        }
    }

    let mut repo = ObjectRepository::new(catalog, version);
    for element in root.elements() {
        match element.name() {
            ROOT_ELEMENT => repo.add(Surrogate::from_element(element.clone())?)?,
            ADDITIONAL_FIELDS => {}
            other => warn!(element = other, "ignoring unknown project element"),
        }
    }
    // Loading is not a change.
    repo.begin_step();
    Ok(repo)
}

fn register_custom_field(catalog: &mut Catalog, decl: &Element) -> Result<()> {
    let required = |key: &str| {
        decl.attr(key).ok_or_else(|| {
            LexError::Project(format!("custom field declaration missing '{}'", key))
        })
    };
    let name = required("name")?;
    let class = required("class")?;
    let type_name = required("type")?;
    let kind = FieldKind::from_str_name(type_name).ok_or_else(|| {
        LexError::Project(format!("custom field {}.{} has unknown type '{}'", class, name, type_name))
    })?;
    let id = catalog.add_custom_field(class, name, kind, decl.attr("destclass"))?;
    debug!(class, name, %kind, id, "registered custom field");
    Ok(())
}

/// Serializes the repository as a project document: version, custom field
/// declarations, then objects in guid order.
pub fn write_project_string(repo: &ObjectRepository) -> String {
    let mut root = Element::new(CONTAINER_ELEMENT)
        .with_attr("version", repo.current_model_version().to_string());

    let mut fields = Element::new(ADDITIONAL_FIELDS);
    for def in repo.metadata().custom_fields() {
        let mut decl = Element::new(CUSTOM_FIELD)
            .with_attr("name", def.name.as_str())
            .with_attr("class", def.class_name.as_str())
            .with_attr("type", def.kind.to_string());
        if let Some(dest) = &def.destination {
            decl.set_attr("destclass", dest.as_str());
        }
        fields.push_child(decl);
    }
    if fields.element_count() > 0 {
        root.push_child(fields);
    }

    for surrogate in repo.iter() {
        root.push_child(surrogate.to_element());
    }
    to_xml_document(&root)
}

/// Writes the project with [`write_atomic`].
pub fn save_project(repo: &ObjectRepository, path: &Path) -> Result<()> {
    write_atomic(path, write_project_string(repo).as_bytes())?;
    info!(path = %path.display(), objects = repo.len(), "saved project");
    Ok(())
}

/// Write atomically: write `<name>.tmp` → fsync → rename over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| LexError::Project(format!("not a file path: {}", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, contents)?;

    let file = std::fs::File::open(&tmp_path)?;
    file.sync_all()?;

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Guid;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<languageproject version="7000002">
  <AdditionalFields>
    <CustomField name="Tone" class="LexEntry" type="Integer"/>
    <CustomField name="SeeAlso" class="LexEntry" type="ReferenceAtomic" destclass="LexEntry"/>
  </AdditionalFields>
  <rt class="LexEntry" guid="00000000-0000-0000-0000-000000000001">
    <Custom name="Tone" val="3"/>
  </rt>
  <rt class="LexDb" guid="00000000-0000-0000-0000-000000000002"/>
</languageproject>
"#;

    #[test]
    fn test_loads_objects_and_custom_fields() {
        let repo = load_project_str(SAMPLE, standard_catalog().unwrap()).unwrap();
        assert_eq!(repo.current_model_version(), 7000002);
        assert_eq!(repo.len(), 2);
        assert!(repo.changes().is_empty());

        let tone = repo.metadata().field_id("LexEntry", "Tone", false).unwrap();
        assert!(repo.metadata().is_custom(tone).unwrap());
        let entry = repo.get(Guid::parse("00000000-0000-0000-0000-000000000001").unwrap()).unwrap();
        assert_eq!(entry.scalar("Tone"), Some("3"));
    }

    #[test]
    fn test_rejects_wrong_root_and_bad_version() {
        let err = load_project_str("<project version=\"1\"/>", standard_catalog().unwrap()).unwrap_err();
        assert!(matches!(err, LexError::Project(_)));
        let err =
            load_project_str("<languageproject version=\"x\"/>", standard_catalog().unwrap()).unwrap_err();
        assert!(matches!(err, LexError::Project(_)));
    }

    #[test]
    fn test_rejects_unknown_custom_field_type() {
        let text = r#"<languageproject version="7000000"><AdditionalFields>
            <CustomField name="X" class="LexEntry" type="Blob"/>
        </AdditionalFields></languageproject>"#;
        let err = load_project_str(text, standard_catalog().unwrap()).unwrap_err();
        assert!(err.to_string().contains("unknown type"));
    }

    #[test]
    fn test_written_project_loads_back() {
        let repo = load_project_str(SAMPLE, standard_catalog().unwrap()).unwrap();
        let text = write_project_string(&repo);
        assert!(text.starts_with("<?xml"));
        assert!(text.contains(r#"destclass="LexEntry""#));

        let again = load_project_str(&text, standard_catalog().unwrap()).unwrap();
        assert_eq!(again.guids(), repo.guids());
        assert_eq!(write_project_string(&again), text);
    }

    #[test]
    fn test_save_replaces_file_atomically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("project.lgp");
        std::fs::write(&path, SAMPLE).unwrap();

        let repo = load_project(&path).unwrap();
        assert_eq!(repo.project_folder(), Some(dir.path()));
        save_project(&repo, &path).unwrap();

        assert!(!dir.path().join("project.lgp.tmp").exists());
        let reloaded = load_project(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Entry.fwlayout");
        std::fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        assert!(!dir.path().join("Entry.fwlayout.tmp").exists());
    }
}
