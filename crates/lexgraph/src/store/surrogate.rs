use crate::error::{LexError, Result};
use crate::types::{FieldId, Guid, LinkKind};
use crate::xml::Element;

pub const ROOT_ELEMENT: &str = "rt";
pub const LINK_ELEMENT: &str = "objsur";
pub const CUSTOM_ELEMENT: &str = "Custom";

pub const ATTR_CLASS: &str = "class";
pub const ATTR_GUID: &str = "guid";
pub const ATTR_OWNER: &str = "ownerguid";
pub const ATTR_OWNING_FLID: &str = "owningflid";
pub const ATTR_OWNING_ORD: &str = "owningord";

/// One persisted object: identity, class, and its `<rt>` content tree.
///
/// The `class` and `guid` attributes of the content root always mirror the
/// surrogate's own fields; every other attribute and child is owned by the steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surrogate {
    guid: Guid,
    class_name: String,
    content: Element,
}

/// An `objsur` link found inside a property element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub field: String,
    pub kind: LinkKind,
    pub target: Guid,
}

impl Surrogate {
    pub fn new(guid: Guid, class_name: impl Into<String>) -> Self {
        let class_name = class_name.into();
        let content = Element::new(ROOT_ELEMENT)
            .with_attr(ATTR_CLASS, class_name.as_str())
            .with_attr(ATTR_GUID, guid.to_string());
        Self {
            guid,
            class_name,
            content,
        }
    }

    pub fn from_element(element: Element) -> Result<Self> {
        if element.name() != ROOT_ELEMENT {
            return Err(LexError::Project(format!(
                "expected <{}>, found <{}>",
                ROOT_ELEMENT,
                element.name()
            )));
        }
        let class_name = element
            .attr(ATTR_CLASS)
            .ok_or_else(|| LexError::Project("<rt> without a class attribute".to_string()))?
            .to_string();
        let guid = element
            .attr(ATTR_GUID)
            .ok_or_else(|| LexError::Project(format!("<rt class=\"{}\"> without a guid", class_name)))
            .and_then(Guid::parse)?;
        Ok(Self {
            guid,
            class_name,
            content: element,
        })
    }

    /// The content tree with canonical `class` and `guid` attributes.
    pub fn to_element(&self) -> Element {
        let mut element = self.content.clone();
        element.set_attr(ATTR_CLASS, self.class_name.as_str());
        element.set_attr(ATTR_GUID, self.guid.to_string());
        element
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn set_class_name(&mut self, class_name: impl Into<String>) {
        self.class_name = class_name.into();
        self.content.set_attr(ATTR_CLASS, self.class_name.as_str());
    }

    pub fn content(&self) -> &Element {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut Element {
        &mut self.content
    }

    // ── ownership attributes ────────────────────────────────────────────────

    /// The claimed owner. An unparseable `ownerguid` is treated as absent.
    pub fn owner_guid(&self) -> Option<Guid> {
        self.content.attr(ATTR_OWNER).and_then(|s| Guid::parse(s).ok())
    }

    pub fn has_owner_attr(&self) -> bool {
        self.content.attr(ATTR_OWNER).is_some()
    }

    pub fn owning_flid(&self) -> Option<FieldId> {
        self.content
            .attr(ATTR_OWNING_FLID)
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn owning_ord(&self) -> Option<usize> {
        self.content
            .attr(ATTR_OWNING_ORD)
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn set_owner(&mut self, owner: Guid) {
        self.content.set_attr(ATTR_OWNER, owner.to_string());
    }

    pub fn set_owning_flid(&mut self, flid: FieldId) {
        self.content.set_attr(ATTR_OWNING_FLID, flid.to_string());
    }

    pub fn set_owning_ord(&mut self, ord: usize) {
        self.content.set_attr(ATTR_OWNING_ORD, ord.to_string());
    }

    /// Drops `ownerguid`, `owningflid` and `owningord`.
    pub fn clear_owner(&mut self) {
        self.content.remove_attr(ATTR_OWNER);
        self.content.remove_attr(ATTR_OWNING_FLID);
        self.content.remove_attr(ATTR_OWNING_ORD);
    }

    // ── properties ──────────────────────────────────────────────────────────

    /// The property element for `field`, built-in (`<Field>`) or custom
    /// (`<Custom name="Field">`).
    pub fn property(&self, field: &str) -> Option<&Element> {
        self.content
            .elements()
            .find(|e| property_name(e) == Some(field))
    }

    pub fn property_mut(&mut self, field: &str) -> Option<&mut Element> {
        self.content
            .elements_mut()
            .find(|e| property_name(e) == Some(field))
    }

    pub fn has_property(&self, field: &str) -> bool {
        self.property(field).is_some()
    }

    pub fn take_property(&mut self, field: &str) -> Option<Element> {
        self.content
            .take_first_where(|e| property_name(e) == Some(field))
    }

    /// `val` attribute of a scalar property.
    pub fn scalar(&self, field: &str) -> Option<&str> {
        self.property(field).and_then(|e| e.attr("val"))
    }

    /// Every link in content order. Links with an unparseable guid are skipped.
    pub fn links(&self) -> Vec<Link> {
        let mut out = Vec::new();
        for prop in self.content.elements() {
            let Some(field) = property_name(prop) else {
                continue;
            };
            for link in prop.elements_named(LINK_ELEMENT) {
                let Some(target) = link.attr(ATTR_GUID).and_then(|g| Guid::parse(g).ok()) else {
                    continue;
                };
                out.push(Link {
                    field: field.to_string(),
                    kind: link_kind(link),
                    target,
                });
            }
        }
        out
    }

    pub fn owning_links(&self) -> Vec<Link> {
        self.links()
            .into_iter()
            .filter(|l| l.kind == LinkKind::Owning)
            .collect()
    }

    /// Guids this surrogate links to in `field`, in order.
    pub fn link_targets(&self, field: &str) -> Vec<Guid> {
        self.property(field)
            .map(|p| {
                p.elements_named(LINK_ELEMENT)
                    .filter_map(|l| l.attr(ATTR_GUID).and_then(|g| Guid::parse(g).ok()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// The field a property element stands for: its element name, or the `name`
/// attribute of a `<Custom>` element.
pub fn property_name(element: &Element) -> Option<&str> {
    if element.name() == CUSTOM_ELEMENT {
        element.attr("name")
    } else {
        Some(element.name())
    }
}

/// Missing or unknown markers read as reference links.
pub fn link_kind(link: &Element) -> LinkKind {
    link.attr("t")
        .and_then(LinkKind::from_marker)
        .unwrap_or(LinkKind::Reference)
}

pub fn make_link(target: Guid, kind: LinkKind) -> Element {
    Element::new(LINK_ELEMENT)
        .with_attr(ATTR_GUID, target.to_string())
        .with_attr("t", kind.marker())
}
