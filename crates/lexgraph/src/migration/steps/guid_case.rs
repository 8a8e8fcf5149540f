//! 7000003: guid strings inside content are rewritten in canonical lowercase form:
//! `ownerguid`, link targets, and the `val` of Guid-kind properties.

use tracing::info;

use crate::catalog::Catalog;
use crate::error::Result;
use crate::store::repository::ObjectRepository;
use crate::store::surrogate::{ATTR_GUID, ATTR_OWNER, LINK_ELEMENT, Surrogate, property_name};
use crate::types::{FieldKind, Guid};
use crate::xml::Element;

pub(super) fn migrate(repo: &mut ObjectRepository) -> Result<()> {
    let mut touched = 0usize;
    for guid in repo.guids() {
        let mut surrogate = repo.get(guid)?.clone();
        if normalize(repo.metadata(), &mut surrogate) > 0 {
            repo.update(surrogate)?;
            touched += 1;
        }
    }
    info!(touched, "normalized guid case");
    Ok(())
}

fn normalize(catalog: &Catalog, surrogate: &mut Surrogate) -> usize {
    let class_name = surrogate.class_name().to_string();
    let root = surrogate.content_mut();
    let mut changed = canonicalize_attr(root, ATTR_GUID) + canonicalize_attr(root, ATTR_OWNER);

    for prop in root.elements_mut() {
        let guid_valued = property_name(prop)
            .and_then(|f| catalog.field_id(&class_name, f, true))
            .and_then(|id| catalog.field_kind(id).ok())
            == Some(FieldKind::Guid);
        if guid_valued {
            changed += canonicalize_attr(prop, "val");
        }
        for link in prop.elements_mut() {
            if link.name() == LINK_ELEMENT {
                changed += canonicalize_attr(link, ATTR_GUID);
            }
        }
    }
    changed
}

fn canonicalize_attr(element: &mut Element, key: &str) -> usize {
    let Some(value) = element.attr(key) else {
        return 0;
    };
    if !Guid::is_non_canonical(value) {
        return 0;
    }
    match Guid::parse(value) {
        Ok(g) => {
            element.set_attr(key, g.to_string());
            1
        }
        Err(_) => 0,
    }
}
