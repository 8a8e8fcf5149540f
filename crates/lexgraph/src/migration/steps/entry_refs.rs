//! 7000011: `LexVariantRef` and `LexComplexRef` merge into `LexEntryRef`.
//!
//! Variant refs become entry refs with `RefType` 0, complex refs with `RefType` 1.
//! On the owning entry, `VariantRefs` then `ComplexRefs` are appended to
//! `EntryRefs`. Runs delint.

use tracing::{debug, info};

use crate::error::Result;
use crate::migration::services::{append_link, reparent, rename_property};
use crate::store::delint::delint;
use crate::store::repository::ObjectRepository;
use crate::store::surrogate::Surrogate;
use crate::types::LinkKind;
use crate::xml::Element;

const TARGET_CLASS: &str = "LexEntryRef";
const TARGET_FIELD: &str = "EntryRefs";

const VARIANT_REF_TYPE: u32 = 0;
const COMPLEX_REF_TYPE: u32 = 1;

struct Legacy {
    class_name: &'static str,
    owner_field: &'static str,
    ref_type: u32,
    renames: &'static [(&'static str, &'static str)],
}

const LEGACY: [Legacy; 2] = [
    Legacy {
        class_name: "LexVariantRef",
        owner_field: "VariantRefs",
        ref_type: VARIANT_REF_TYPE,
        renames: &[
            ("Components", "ComponentLexemes"),
            ("VariantType", "EntryTypes"),
            ("Comment", "Summary"),
        ],
    },
    Legacy {
        class_name: "LexComplexRef",
        owner_field: "ComplexRefs",
        ref_type: COMPLEX_REF_TYPE,
        renames: &[
            ("Components", "ComponentLexemes"),
            ("ComplexType", "EntryTypes"),
        ],
    },
];

pub(super) fn migrate(repo: &mut ObjectRepository) -> Result<()> {
    let mut converted = 0usize;
    for legacy in &LEGACY {
        for mut object in repo.all_instances_sans_subclasses(legacy.class_name)? {
            convert(&mut object, legacy);
            repo.update(object)?;
            converted += 1;
        }
    }

    let mut owners = 0usize;
    for entry in repo.all_instances_with_subclasses("LexEntry")? {
        if LEGACY.iter().all(|l| !entry.has_property(l.owner_field)) {
            continue;
        }
        merge_owner_fields(repo, entry)?;
        owners += 1;
    }

    info!(converted, owners, "entry refs merged");
    delint(repo);
    Ok(())
}

fn convert(object: &mut Surrogate, legacy: &Legacy) {
    object.set_class_name(TARGET_CLASS);
    for (from, to) in legacy.renames {
        rename_property(object, from, to);
    }
    object.take_property("RefType");
    object
        .content_mut()
        .insert_child(0, Element::new("RefType").with_attr("val", legacy.ref_type.to_string()));
    debug!(guid = %object.guid(), from = legacy.class_name, "converted to entry ref");
}

fn merge_owner_fields(repo: &mut ObjectRepository, mut entry: Surrogate) -> Result<()> {
    for legacy in &LEGACY {
        let links = entry.link_targets(legacy.owner_field);
        entry.take_property(legacy.owner_field);
        let present = entry.link_targets(TARGET_FIELD);
        for target in links.into_iter().filter(|t| !present.contains(t)) {
            append_link(repo.metadata(), &mut entry, TARGET_FIELD, target, LinkKind::Owning);
        }
    }

    for (ord, child_guid) in entry.link_targets(TARGET_FIELD).into_iter().enumerate() {
        let Some(child) = repo.try_get(child_guid) else {
            continue;
        };
        let mut child = child.clone();
        reparent(repo.metadata(), &mut child, &entry, TARGET_FIELD, Some(ord))?;
        repo.update(child)?;
    }
    repo.update(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Guid;

    #[test]
    fn test_variant_ref_fields_are_renamed() {
        let mut object = Surrogate::new(Guid::new_v4(), "LexVariantRef");
        object.content_mut().push_child(Element::new("Components"));
        object.content_mut().push_child(Element::new("Comment"));
        convert(&mut object, &LEGACY[0]);

        assert_eq!(object.class_name(), "LexEntryRef");
        assert_eq!(object.scalar("RefType"), Some("0"));
        assert!(object.has_property("ComponentLexemes"));
        assert!(object.has_property("Summary"));
        assert!(!object.has_property("Comment"));
    }

    #[test]
    fn test_complex_ref_keeps_primary_lexemes() {
        let mut object = Surrogate::new(Guid::new_v4(), "LexComplexRef");
        object.content_mut().push_child(Element::new("PrimaryLexemes"));
        object.content_mut().push_child(Element::new("ComplexType"));
        object.content_mut().push_child(Element::new("HideMinorEntry").with_attr("val", "1"));
        convert(&mut object, &LEGACY[1]);

        assert_eq!(object.scalar("RefType"), Some("1"));
        assert!(object.has_property("PrimaryLexemes"));
        assert!(object.has_property("EntryTypes"));
        assert_eq!(object.scalar("HideMinorEntry"), Some("1"));
    }
}
