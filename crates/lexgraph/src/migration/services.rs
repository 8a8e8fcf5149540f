//! Helpers shared by the migration steps.
//!
//! Everything here goes through the repository's public contract and the catalog;
//! field ids are always looked up by name.

use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::error::{LexError, Result};
use crate::store::repository::ObjectRepository;
use crate::store::surrogate::{
    ATTR_GUID, ATTR_OWNING_ORD, CUSTOM_ELEMENT, LINK_ELEMENT, Surrogate, link_kind, make_link,
};
use crate::types::{FieldId, FieldKind, FieldKindFilter, Guid, LinkKind};
use crate::xml::Element;

pub const DEFAULT_TIME: &str = "1970-1-1 0:0:0.000";

/// The value written for a basic scalar property that is missing.
pub fn default_value(kind: FieldKind) -> Result<String> {
    match kind {
        FieldKind::Boolean => Ok("False".to_string()),
        FieldKind::Integer | FieldKind::GenDate => Ok("0".to_string()),
        FieldKind::Guid => Ok(Guid::nil().to_string()),
        FieldKind::Time => Ok(DEFAULT_TIME.to_string()),
        other => Err(LexError::UnsupportedFieldKind(format!(
            "no default value for {} fields",
            other
        ))),
    }
}

/// Field id by name, including base classes. Unlike [`Catalog::field_id`] a miss is
/// an error, for steps that require the field to exist.
pub fn require_field(catalog: &Catalog, class_name: &str, field: &str) -> Result<FieldId> {
    catalog
        .field_id(class_name, field, true)
        .ok_or_else(|| LexError::Catalog(format!("unknown field {}.{}", class_name, field)))
}

/// The single instance of a class, if any. More than one is an error.
pub fn single_instance(repo: &ObjectRepository, class_name: &str) -> Result<Option<Surrogate>> {
    let mut all = repo.all_instances_sans_subclasses(class_name)?;
    match all.len() {
        0 => Ok(None),
        1 => Ok(all.pop()),
        n => Err(LexError::Migration(format!(
            "expected at most one {}, found {}",
            class_name, n
        ))),
    }
}

/// The property element for `field`, created empty when missing. Custom fields are
/// created as `<Custom name="…">`.
pub fn property_or_insert<'a>(
    catalog: &Catalog,
    surrogate: &'a mut Surrogate,
    field: &str,
) -> &'a mut Element {
    if !surrogate.has_property(field) {
        let element = if is_custom_field(catalog, surrogate.class_name(), field) {
            Element::new(CUSTOM_ELEMENT).with_attr("name", field)
        } else {
            Element::new(field)
        };
        surrogate.content_mut().push_child(element);
    }
    match surrogate.property_mut(field) {
        Some(prop) => prop,
        None => unreachable!("property inserted above"),
    }
}

fn is_custom_field(catalog: &Catalog, class_name: &str, field: &str) -> bool {
    catalog
        .field_id(class_name, field, true)
        .and_then(|id| catalog.is_custom(id).ok())
        .unwrap_or(false)
}

// ── links and ownership ─────────────────────────────────────────────────────

pub fn append_link(
    catalog: &Catalog,
    holder: &mut Surrogate,
    field: &str,
    target: Guid,
    kind: LinkKind,
) {
    property_or_insert(catalog, holder, field).push_child(make_link(target, kind));
}

/// Removes every link to `target` from `field`. Returns how many were removed.
pub fn remove_link(holder: &mut Surrogate, field: &str, target: Guid) -> usize {
    let Some(prop) = holder.property_mut(field) else {
        return 0;
    };
    prop.remove_elements_where(|e| e.name() == LINK_ELEMENT && link_target(e) == Some(target))
        .len()
}

pub fn link_target(link: &Element) -> Option<Guid> {
    link.attr(ATTR_GUID).and_then(|g| Guid::parse(g).ok())
}

/// Points `child` at its new owner. `ord` is written only for sequence fields;
/// otherwise any stale `owningord` is dropped.
pub fn reparent(
    catalog: &Catalog,
    child: &mut Surrogate,
    owner: &Surrogate,
    field: &str,
    ord: Option<usize>,
) -> Result<()> {
    let flid = require_field(catalog, owner.class_name(), field)?;
    let sequence = catalog.field_kind(flid)?.is_sequence();
    child.set_owner(owner.guid());
    child.set_owning_flid(flid);
    match ord {
        Some(ord) if sequence => child.set_owning_ord(ord),
        _ => {
            child.content_mut().remove_attr(ATTR_OWNING_ORD);
        }
    }
    Ok(())
}

/// Removes the owning links to `child` from its current owner, if that owner exists.
/// The child's own owner attributes are left as they are.
pub fn unlink_from_owner(repo: &mut ObjectRepository, child: Guid) -> Result<()> {
    let Some(owner) = repo.try_get(child).and_then(|c| repo.get_owning(c)) else {
        return Ok(());
    };
    let mut owner = owner.clone();
    let fields: Vec<String> = owner
        .owning_links()
        .into_iter()
        .filter(|l| l.target == child)
        .map(|l| l.field)
        .collect();
    if fields.is_empty() {
        return Ok(());
    }
    for field in fields {
        remove_link(&mut owner, &field, child);
    }
    repo.update(owner)
}

/// Moves `child` under `owner` in `field`: drops the owning link from the previous
/// owner, appends one to the new owner, and updates both in the repository.
pub fn move_owned(repo: &mut ObjectRepository, child: Guid, owner: Guid, field: &str) -> Result<()> {
    let mut moved = repo.get(child)?.clone();
    if moved.owner_guid().is_some_and(|p| p != owner) {
        unlink_from_owner(repo, child)?;
    }

    let mut new_owner = repo.get(owner)?.clone();
    let existing = new_owner.link_targets(field);
    let ord = match existing.iter().position(|g| *g == child) {
        Some(ord) => ord,
        None => {
            append_link(repo.metadata(), &mut new_owner, field, child, LinkKind::Owning);
            existing.len()
        }
    };
    reparent(repo.metadata(), &mut moved, &new_owner, field, Some(ord))?;
    repo.update(new_owner)?;
    repo.update(moved)
}

/// Rewrites every reference link whose target is a key of `retarget` to point at
/// the mapped guid instead. Owning links are left alone; ownership moves through
/// [`move_owned`]. Returns the number of links rewritten.
pub fn replace_references(repo: &mut ObjectRepository, retarget: &BTreeMap<Guid, Guid>) -> Result<usize> {
    if retarget.is_empty() {
        return Ok(0);
    }
    let mut rewritten = 0usize;
    for guid in repo.guids() {
        let mut surrogate = repo.get(guid)?.clone();
        let mut count = 0usize;
        for prop in surrogate.content_mut().elements_mut() {
            for link in prop.elements_mut() {
                if link.name() != LINK_ELEMENT || link_kind(link) != LinkKind::Reference {
                    continue;
                }
                if let Some(replacement) = link_target(link).and_then(|t| retarget.get(&t)) {
                    link.set_attr(ATTR_GUID, replacement.to_string());
                    count += 1;
                }
            }
        }
        if count > 0 {
            rewritten += count;
            repo.update(surrogate)?;
        }
    }
    Ok(rewritten)
}

/// Changes every link in `field` to the given kind. Returns the number changed.
pub fn set_link_kind(holder: &mut Surrogate, field: &str, kind: LinkKind) -> usize {
    let Some(prop) = holder.property_mut(field) else {
        return 0;
    };
    let mut changed = 0;
    for link in prop.elements_mut() {
        if link.name() == LINK_ELEMENT && link_kind(link) != kind {
            link.set_attr("t", kind.marker());
            changed += 1;
        }
    }
    changed
}

// ── properties ──────────────────────────────────────────────────────────────

/// Renames a property element in place, keeping its position and content.
/// Returns false when the surrogate has no such property.
pub fn rename_property(surrogate: &mut Surrogate, from: &str, to: &str) -> bool {
    match surrogate.property_mut(from) {
        Some(prop) if prop.name() == CUSTOM_ELEMENT => {
            prop.set_attr("name", to);
            true
        }
        Some(prop) => {
            prop.rename(to);
            true
        }
        None => false,
    }
}

/// Adds every basic scalar field of the surrogate's class (inherited and custom
/// included) that has no property element yet, with its default value.
/// Returns the names of the fields added.
pub fn backfill_basic_scalars(catalog: &Catalog, surrogate: &mut Surrogate) -> Result<Vec<String>> {
    let class_id = catalog.class_id(surrogate.class_name())?;
    let mut added = Vec::new();
    for field_id in catalog.fields(class_id, true, FieldKindFilter::BasicScalars)? {
        let def = catalog.field(field_id)?;
        if surrogate.has_property(&def.name) {
            continue;
        }
        let value = default_value(def.kind)?;
        let element = if def.is_custom {
            Element::new(CUSTOM_ELEMENT)
                .with_attr("name", def.name.as_str())
                .with_attr("val", value)
        } else {
            Element::new(def.name.as_str()).with_attr("val", value)
        };
        surrogate.content_mut().push_child(element);
        added.push(def.name.clone());
    }
    Ok(added)
}

/// `(ws, text)` for each alternative of a multi-alternative property.
pub fn alternatives(prop: &Element) -> Vec<(String, String)> {
    prop.elements()
        .filter_map(|alt| {
            alt.attr("ws")
                .map(|ws| (ws.to_string(), alt.deep_text()))
        })
        .collect()
}

/// Copies alternatives of `from` whose writing system `into` lacks.
/// Returns the number copied.
pub fn merge_alternatives(into: &mut Element, from: &Element) -> usize {
    let present: Vec<String> = alternatives(into).into_iter().map(|(ws, _)| ws).collect();
    let mut copied = 0;
    for alt in from.elements() {
        if alt.attr("ws").is_some_and(|ws| !present.iter().any(|p| p == ws)) {
            into.push_child(alt.clone());
            copied += 1;
        }
    }
    copied
}

/// Replaces writing-system tag `from` with `to` in every `ws` attribute of the
/// tree. Returns the number of attributes changed.
pub fn rename_ws_attributes(root: &mut Element, from: &str, to: &str) -> usize {
    let mut changed = 0;
    root.visit_mut(&mut |e| {
        if e.attr("ws") == Some(from) {
            e.set_attr("ws", to);
            changed += 1;
        }
    });
    changed
}

/// Replaces `from` with `to` in a whitespace-separated tag list.
pub fn rename_ws_in_list(list: &str, from: &str, to: &str) -> Option<String> {
    if !list.split_whitespace().any(|t| t == from) {
        return None;
    }
    Some(
        list.split_whitespace()
            .map(|t| if t == from { to } else { t })
            .collect::<Vec<_>>()
            .join(" "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::standard_catalog;

    fn guid(n: u8) -> Guid {
        Guid::parse(&format!("00000000-0000-0000-0000-0000000000{:02x}", n)).unwrap()
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_value(FieldKind::Boolean).unwrap(), "False");
        assert_eq!(default_value(FieldKind::Integer).unwrap(), "0");
        assert_eq!(default_value(FieldKind::GenDate).unwrap(), "0");
        assert_eq!(
            default_value(FieldKind::Guid).unwrap(),
            "00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(default_value(FieldKind::Time).unwrap(), DEFAULT_TIME);
        assert!(matches!(
            default_value(FieldKind::MultiUnicode),
            Err(LexError::UnsupportedFieldKind(_))
        ));
        assert!(default_value(FieldKind::OwningAtomic).is_err());
    }

    #[test]
    fn test_backfill_includes_inherited_and_custom_fields() {
        let mut catalog = standard_catalog().unwrap();
        catalog
            .add_custom_field("CmPossibility", "Rank", FieldKind::Integer, None)
            .unwrap();
        let mut item = Surrogate::new(guid(1), "CmAnnotationDefn");
        item.content_mut()
            .push_child(Element::new("Hidden").with_attr("val", "True"));

        let added = backfill_basic_scalars(&catalog, &mut item).unwrap();
        assert_eq!(added, vec!["DateCreated", "Rank", "AllowsComment"]);
        assert_eq!(item.scalar("Hidden"), Some("True"));
        assert_eq!(item.scalar("DateCreated"), Some(DEFAULT_TIME));
        assert_eq!(item.scalar("Rank"), Some("0"));
        assert_eq!(item.property("Rank").unwrap().name(), CUSTOM_ELEMENT);
        assert!(backfill_basic_scalars(&catalog, &mut item).unwrap().is_empty());
    }

    #[test]
    fn test_link_editing() {
        let catalog = standard_catalog().unwrap();
        let mut list = Surrogate::new(guid(1), "CmPossibilityList");
        append_link(&catalog, &mut list, "Possibilities", guid(2), LinkKind::Owning);
        append_link(&catalog, &mut list, "Possibilities", guid(3), LinkKind::Owning);
        assert_eq!(list.link_targets("Possibilities"), vec![guid(2), guid(3)]);
        assert_eq!(set_link_kind(&mut list, "Possibilities", LinkKind::Reference), 2);
        assert_eq!(remove_link(&mut list, "Possibilities", guid(2)), 1);
        assert_eq!(remove_link(&mut list, "Missing", guid(2)), 0);
        assert_eq!(list.link_targets("Possibilities"), vec![guid(3)]);
    }

    #[test]
    fn test_reparent_writes_ord_only_for_sequences() {
        let catalog = standard_catalog().unwrap();
        let project = Surrogate::new(guid(1), "LangProject");
        let mut wordform = Surrogate::new(guid(2), "WfiWordform");
        wordform.set_owning_ord(4);
        reparent(&catalog, &mut wordform, &project, "Wordforms", Some(0)).unwrap();
        assert_eq!(wordform.owner_guid(), Some(guid(1)));
        assert_eq!(wordform.owning_flid(), Some(6001006));
        assert_eq!(wordform.owning_ord(), None);

        let list = Surrogate::new(guid(3), "CmPossibilityList");
        let mut item = Surrogate::new(guid(4), "CmPossibility");
        reparent(&catalog, &mut item, &list, "Possibilities", Some(2)).unwrap();
        assert_eq!(item.owning_ord(), Some(2));
        assert!(reparent(&catalog, &mut item, &list, "Nope", None).is_err());
    }

    #[test]
    fn test_alternative_helpers() {
        let mut into = Element::new("Note")
            .with_child(Element::new("AStr").with_attr("ws", "en").with_text("a"));
        let from = Element::new("Comment")
            .with_child(Element::new("AStr").with_attr("ws", "en").with_text("b"))
            .with_child(Element::new("AStr").with_attr("ws", "fr").with_text("c"));
        assert_eq!(merge_alternatives(&mut into, &from), 1);
        assert_eq!(
            alternatives(&into),
            vec![("en".to_string(), "a".to_string()), ("fr".to_string(), "c".to_string())]
        );
    }

    #[test]
    fn test_ws_renames() {
        let mut e = Element::new("Name")
            .with_child(Element::new("AUni").with_attr("ws", "x-kal").with_text("k"))
            .with_child(Element::new("AUni").with_attr("ws", "en").with_text("e"));
        assert_eq!(rename_ws_attributes(&mut e, "x-kal", "qaa-x-kal"), 1);
        assert_eq!(rename_ws_in_list("en x-kal fr", "x-kal", "qaa-x-kal").as_deref(), Some("en qaa-x-kal fr"));
        assert_eq!(rename_ws_in_list("en fr", "x-kal", "qaa-x-kal"), None);
    }
}
