//! Consistency repair.
//!
//! Runs three passes over the whole repository until none of them changes anything:
//! link validation, owner reconciliation, and vacuous-element pruning. Removing one
//! object can dangle or orphan others, hence the fixed point. Delint never fails;
//! whatever it cannot repair it deletes, and whatever it cannot delete it leaves.

use ahash::{AHashMap, AHashSet};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::types::{FieldId, Guid, LinkKind};
use crate::xml::Element;

use super::repository::ObjectRepository;
use super::surrogate::{
    ATTR_GUID, ATTR_OWNING_ORD, CUSTOM_ELEMENT, LINK_ELEMENT, Surrogate, link_kind, property_name,
};

const ALTERNATIVE_ELEMENTS: [&str; 3] = ["AUni", "AStr", "Str"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DelintReport {
    pub passes: usize,
    /// Surrogates deleted as zombies or orphans, in removal order.
    pub removed: Vec<Guid>,
    pub links_removed: usize,
    pub owners_repaired: usize,
    pub vacuous_removed: usize,
}

impl DelintReport {
    pub fn is_clean(&self) -> bool {
        self.removed.is_empty()
            && self.links_removed == 0
            && self.owners_repaired == 0
            && self.vacuous_removed == 0
    }
}

pub fn delint(repo: &mut ObjectRepository) -> DelintReport {
    let mut report = DelintReport::default();
    let pass_limit = repo.len() * 2 + 8;
    loop {
        report.passes += 1;
        let mut changed = validate_links(repo, &mut report);
        changed |= reconcile_owners(repo, &mut report);
        changed |= prune_vacuous(repo, &mut report);
        if !changed {
            break;
        }
        if report.passes >= pass_limit {
            warn!(passes = report.passes, "delint stopped before reaching a fixed point");
            break;
        }
    }
    info!(
        passes = report.passes,
        removed = report.removed.len(),
        links_removed = report.links_removed,
        owners_repaired = report.owners_repaired,
        vacuous_removed = report.vacuous_removed,
        "delint complete"
    );
    report
}

/// Drops links that do not resolve to a compatible surrogate. Owning links also go
/// when the target claims a different owner or is already owned by an earlier link
/// of the same holder. A class-incompatible owning target is deleted with its subtree.
fn validate_links(repo: &mut ObjectRepository, report: &mut DelintReport) -> bool {
    let mut changed = false;
    for guid in repo.guids() {
        let Some(holder) = repo.try_get(guid) else {
            continue;
        };
        let class_name = holder.class_name().to_string();
        let mut edited = holder.clone();
        let mut zombies = Vec::new();
        let mut dropped = 0usize;
        let mut owned_here = AHashSet::new();

        for prop in edited.content_mut().elements_mut() {
            let destination = property_name(prop)
                .and_then(|field| destination_of(repo.metadata(), &class_name, field))
                .map(str::to_string);
            let removed = prop.remove_elements_where(|link| {
                if link.name() != LINK_ELEMENT {
                    return false;
                }
                let Some(target) = link.attr(ATTR_GUID).and_then(|g| Guid::parse(g).ok()) else {
                    return true;
                };
                let Some(found) = repo.try_get(target) else {
                    return true;
                };
                let owning = link_kind(link) == LinkKind::Owning;
                if let Some(dest) = &destination {
                    if !repo.metadata().is_same_or_subclass(found.class_name(), dest) {
                        if owning {
                            zombies.push(target);
                        }
                        return true;
                    }
                }
                if owning {
                    if found.owner_guid().is_some_and(|o| o != guid) {
                        return true;
                    }
                    if !owned_here.insert(target) {
                        return true;
                    }
                }
                false
            });
            dropped += removed.len();
        }

        if dropped > 0 {
            debug!(holder = %guid, dropped, "removed invalid links");
            report.links_removed += dropped;
            changed = true;
            if let Err(e) = repo.update(edited) {
                warn!(holder = %guid, error = %e, "could not store repaired holder");
            }
        }
        for zombie in zombies {
            let removed = repo.remove_including_owned(zombie);
            if !removed.is_empty() {
                debug!(root = %zombie, count = removed.len(), "removed incompatible owned subtree");
                report.removed.extend(removed);
                changed = true;
            }
        }
    }
    changed
}

fn destination_of<'a>(catalog: &'a Catalog, class_name: &str, field: &str) -> Option<&'a str> {
    let id = catalog.field_id(class_name, field, true)?;
    catalog.field_destination_class(id).ok().flatten()
}

/// Where the first owning link to an object puts it.
struct Placement {
    owner: Guid,
    flid: Option<FieldId>,
    ord: usize,
    /// `None` when the field is unknown to the catalog.
    sequence: Option<bool>,
}

/// Deletes orphans (claimed owner missing, or not listing them) with their subtrees,
/// and rewrites stale `owningflid`/`owningord` on objects the owner does list.
/// Objects with no owner attribute that are listed by an owning link are adopted.
fn reconcile_owners(repo: &mut ObjectRepository, report: &mut DelintReport) -> bool {
    let placements = collect_placements(repo);

    let mut orphans = Vec::new();
    let mut repaired = Vec::new();
    for s in repo.iter() {
        let placement = placements.get(&s.guid());
        if !s.has_owner_attr() {
            if let Some(p) = placement {
                let mut fixed = s.clone();
                fixed.set_owner(p.owner);
                repaired.push(fixed);
            }
            continue;
        }
        match (s.owner_guid(), placement) {
            (Some(owner), Some(p)) if p.owner == owner => {
                if let Some(fixed) = repair_position(s, p) {
                    repaired.push(fixed);
                }
            }
            _ => orphans.push(s.guid()),
        }
    }

    let changed = !orphans.is_empty() || !repaired.is_empty();
    for fixed in repaired {
        debug!(guid = %fixed.guid(), "repaired owner attributes");
        report.owners_repaired += 1;
        if let Err(e) = repo.update(fixed) {
            warn!(error = %e, "could not store repaired owner attributes");
        }
    }
    for orphan in orphans {
        let removed = repo.remove_including_owned(orphan);
        if !removed.is_empty() {
            debug!(root = %orphan, count = removed.len(), "removed orphan");
            report.removed.extend(removed);
        }
    }
    changed
}

fn collect_placements(repo: &ObjectRepository) -> AHashMap<Guid, Placement> {
    let catalog = repo.metadata();
    let mut placements = AHashMap::new();
    for holder in repo.iter() {
        let mut per_field: AHashMap<String, usize> = AHashMap::new();
        for link in holder.owning_links() {
            let ord = per_field.entry(link.field.clone()).or_insert(0);
            let flid = catalog.field_id(holder.class_name(), &link.field, true);
            let sequence = flid
                .and_then(|id| catalog.field_kind(id).ok())
                .map(|k| k.is_sequence());
            placements.entry(link.target).or_insert(Placement {
                owner: holder.guid(),
                flid,
                ord: *ord,
                sequence,
            });
            *ord += 1;
        }
    }
    placements
}

fn repair_position(s: &Surrogate, p: &Placement) -> Option<Surrogate> {
    let mut fixed = s.clone();
    let mut touched = false;

    if let (Some(current), Some(expected)) = (s.owning_flid(), p.flid) {
        if current != expected {
            fixed.set_owning_flid(expected);
            touched = true;
        }
    }
    if s.content().attr(ATTR_OWNING_ORD).is_some() {
        match p.sequence {
            Some(true) if s.owning_ord() != Some(p.ord) => {
                fixed.set_owning_ord(p.ord);
                touched = true;
            }
            Some(false) => {
                fixed.content_mut().remove_attr(ATTR_OWNING_ORD);
                touched = true;
            }
            _ => {}
        }
    }
    touched.then_some(fixed)
}

/// Removes empty multi-alternative entries, then property elements left with
/// nothing in them.
fn prune_vacuous(repo: &mut ObjectRepository, report: &mut DelintReport) -> bool {
    let mut changed = false;
    for guid in repo.guids() {
        let Some(s) = repo.try_get(guid) else {
            continue;
        };
        let mut edited = s.clone();
        let mut pruned = 0usize;
        for prop in edited.content_mut().elements_mut() {
            pruned += prop.remove_elements_where(is_empty_alternative).len();
        }
        pruned += edited
            .content_mut()
            .remove_elements_where(is_vacuous_property)
            .len();

        if pruned > 0 {
            report.vacuous_removed += pruned;
            changed = true;
            if let Err(e) = repo.update(edited) {
                warn!(guid = %guid, error = %e, "could not store pruned surrogate");
            }
        }
    }
    changed
}

fn is_empty_alternative(e: &Element) -> bool {
    ALTERNATIVE_ELEMENTS.contains(&e.name()) && e.element_count() == 0 && e.text().is_empty()
}

fn is_vacuous_property(e: &Element) -> bool {
    if e.name() == CUSTOM_ELEMENT {
        e.attributes().all(|(k, _)| k == "name") && e.element_count() == 0 && !e.has_text()
    } else {
        e.is_vacuous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::surrogate::make_link;

    const SCHEMA: &str = r#"
class CmObject @id(0) @abstract {}
class LangProject : CmObject @id(6001) {
    Lists: OwningCollection<CmPossibilityList>
    Texts: OwningSequence<StText>
}
class CmPossibilityList : CmObject @id(8) {
    Possibilities: OwningSequence<CmPossibility>
    Name: MultiUnicode
}
class CmPossibility : CmObject @id(7) {
    Name: MultiUnicode
    SubPossibilities: OwningSequence<CmPossibility>
    Restrictions: ReferenceCollection<CmPossibility>
}
class StText : CmObject @id(14) { Title: MultiString }
"#;

    fn guid(n: u8) -> Guid {
        Guid::parse(&format!("00000000-0000-0000-0000-0000000000{:02x}", n)).unwrap()
    }

    fn with_links(mut s: Surrogate, field: &str, links: &[(u8, LinkKind)]) -> Surrogate {
        let mut prop = Element::new(field);
        for (n, kind) in links {
            prop.push_child(make_link(guid(*n), *kind));
        }
        s.content_mut().push_child(prop);
        s
    }

    fn owned(n: u8, class: &str, owner: u8) -> Surrogate {
        let mut s = Surrogate::new(guid(n), class);
        s.set_owner(guid(owner));
        s
    }

    fn repo_with(objects: Vec<Surrogate>) -> ObjectRepository {
        let mut repo = ObjectRepository::new(Catalog::from_schema_source(SCHEMA).unwrap(), 7000000);
        for s in objects {
            repo.add(s).unwrap();
        }
        repo.begin_step();
        repo
    }

    fn clean_project() -> Vec<Surrogate> {
        vec![
            with_links(
                Surrogate::new(guid(1), "LangProject"),
                "Lists",
                &[(2, LinkKind::Owning)],
            ),
            with_links(
                owned(2, "CmPossibilityList", 1),
                "Possibilities",
                &[(3, LinkKind::Owning), (4, LinkKind::Owning)],
            ),
            with_links(owned(3, "CmPossibility", 2), "Restrictions", &[(4, LinkKind::Reference)]),
            owned(4, "CmPossibility", 2),
        ]
    }

    #[test]
    fn test_clean_graph_is_untouched() {
        let mut repo = repo_with(clean_project());
        let report = delint(&mut repo);
        assert!(report.is_clean());
        assert_eq!(report.passes, 1);
        assert!(repo.changes().is_empty());
    }

    #[test]
    fn test_dangling_reference_only_loses_the_link() {
        let mut objects = clean_project();
        objects[2] = with_links(
            owned(3, "CmPossibility", 2),
            "Restrictions",
            &[(4, LinkKind::Reference), (40, LinkKind::Reference)],
        );
        let mut repo = repo_with(objects);
        let report = delint(&mut repo);
        assert_eq!(report.links_removed, 1);
        assert!(report.removed.is_empty());
        assert_eq!(repo.get(guid(3)).unwrap().link_targets("Restrictions"), vec![guid(4)]);
    }

    #[test]
    fn test_incompatible_reference_target_is_kept() {
        let mut objects = clean_project();
        // the list itself is not a possibility
        objects[2] = with_links(
            owned(3, "CmPossibility", 2),
            "Restrictions",
            &[(2, LinkKind::Reference), (4, LinkKind::Reference)],
        );
        let mut repo = repo_with(objects);
        let report = delint(&mut repo);
        assert_eq!(report.links_removed, 1);
        assert!(report.removed.is_empty());
        assert_eq!(repo.get(guid(3)).unwrap().link_targets("Restrictions"), vec![guid(4)]);
        assert_eq!(repo.len(), 4);
        assert!(delint(&mut repo).is_clean());
    }

    #[test]
    fn test_incompatible_owning_target_takes_its_subtree() {
        let mut objects = clean_project();
        // a text listed where possibilities belong, owning a nested possibility
        objects[1] = with_links(
            owned(2, "CmPossibilityList", 1),
            "Possibilities",
            &[(3, LinkKind::Owning), (4, LinkKind::Owning), (5, LinkKind::Owning)],
        );
        objects.push(owned(5, "StText", 2));
        objects.push(owned(6, "CmPossibility", 5));
        let mut repo = repo_with(objects);
        let report = delint(&mut repo);
        assert!(repo.try_get(guid(5)).is_none());
        assert!(repo.try_get(guid(6)).is_none());
        assert_eq!(report.removed.len(), 2);
        assert_eq!(repo.len(), 4);
    }

    #[test]
    fn test_orphans_are_removed_with_what_they_own() {
        let mut objects = clean_project();
        // owner missing entirely
        objects.push(owned(7, "CmPossibility", 99));
        // owner exists but does not list it
        objects.push(owned(8, "CmPossibility", 2));
        objects.push(owned(9, "CmPossibility", 8));
        let mut repo = repo_with(objects);
        let report = delint(&mut repo);
        for n in [7, 8, 9] {
            assert!(repo.try_get(guid(n)).is_none());
        }
        assert_eq!(report.removed.len(), 3);
        assert_eq!(repo.len(), 4);
    }

    #[test]
    fn test_stale_position_is_rewritten_not_removed() {
        let mut objects = clean_project();
        let mut second = owned(4, "CmPossibility", 2);
        second.set_owning_flid(7003);
        second.set_owning_ord(5);
        objects[3] = second;
        let mut repo = repo_with(objects);
        let report = delint(&mut repo);
        assert_eq!(report.owners_repaired, 1);
        let fixed = repo.get(guid(4)).unwrap();
        assert_eq!(fixed.owning_flid(), Some(8001));
        assert_eq!(fixed.owning_ord(), Some(1));
    }

    #[test]
    fn test_owning_link_to_someone_elses_child_is_dropped() {
        let mut objects = clean_project();
        objects[2] = with_links(
            owned(3, "CmPossibility", 2),
            "SubPossibilities",
            &[(4, LinkKind::Owning), (4, LinkKind::Owning)],
        );
        let mut repo = repo_with(objects);
        let report = delint(&mut repo);
        assert_eq!(report.links_removed, 2);
        assert!(repo.get(guid(3)).unwrap().property("SubPossibilities").is_none());
        assert_eq!(repo.get(guid(4)).unwrap().owner_guid(), Some(guid(2)));
    }

    #[test]
    fn test_vacuous_elements_are_pruned() {
        let mut objects = clean_project();
        let mut item = owned(4, "CmPossibility", 2);
        item.content_mut().push_child(
            Element::new("Name")
                .with_child(Element::new("AUni").with_attr("ws", "en"))
                .with_child(Element::new("AUni").with_attr("ws", "fr").with_text("nom")),
        );
        item.content_mut()
            .push_child(Element::new("Description").with_child(Element::new("AStr").with_attr("ws", "en")));
        item.content_mut()
            .push_child(Element::new(CUSTOM_ELEMENT).with_attr("name", "Note"));
        objects[3] = item;
        let mut repo = repo_with(objects);
        let report = delint(&mut repo);
        assert_eq!(report.vacuous_removed, 4);
        let item = repo.get(guid(4)).unwrap();
        assert_eq!(item.property("Name").unwrap().element_count(), 1);
        assert!(item.property("Description").is_none());
        assert!(item.property("Note").is_none());
    }

    #[test]
    fn test_delint_is_idempotent() {
        let mut objects = clean_project();
        objects.push(owned(7, "CmPossibility", 99));
        objects[2] = with_links(
            owned(3, "CmPossibility", 2),
            "Restrictions",
            &[(7, LinkKind::Reference)],
        );
        let mut repo = repo_with(objects);
        let first = delint(&mut repo);
        assert!(!first.is_clean());
        // the dangling reference to 7 only appears after 7 is removed
        assert!(first.passes >= 2);
        let snapshot: Vec<Surrogate> = repo.iter().cloned().collect();

        let second = delint(&mut repo);
        assert!(second.is_clean());
        let after: Vec<Surrogate> = repo.iter().cloned().collect();
        assert_eq!(snapshot, after);
    }
}
