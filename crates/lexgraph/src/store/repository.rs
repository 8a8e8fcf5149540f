use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ahash::{AHashMap, AHashSet};
use serde::Serialize;
use tracing::debug;

use crate::catalog::Catalog;
use crate::error::{LexError, Result};
use crate::types::Guid;

use super::surrogate::Surrogate;

/// Surrogates touched by the step in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub new: BTreeSet<Guid>,
    pub goners: BTreeSet<Guid>,
    pub dirty: BTreeSet<Guid>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.goners.is_empty() && self.dirty.is_empty()
    }

    pub fn clear(&mut self) {
        self.new.clear();
        self.goners.clear();
        self.dirty.clear();
    }
}

/// In-memory index over every surrogate of one project at one model version.
///
/// Queries return owned copies ordered by guid, so a step can edit a copy and
/// hand it back through [`ObjectRepository::update`].
#[derive(Debug, Clone)]
pub struct ObjectRepository {
    catalog: Catalog,
    objects: AHashMap<Guid, Surrogate>,
    by_class: AHashMap<String, BTreeSet<Guid>>,
    by_owner: AHashMap<Guid, BTreeSet<Guid>>,
    changes: ChangeSet,
    current_model_version: u32,
    project_folder: Option<PathBuf>,
}

impl ObjectRepository {
    pub fn new(catalog: Catalog, current_model_version: u32) -> Self {
        Self {
            catalog,
            objects: AHashMap::new(),
            by_class: AHashMap::new(),
            by_owner: AHashMap::new(),
            changes: ChangeSet::default(),
            current_model_version,
            project_folder: None,
        }
    }

    pub fn with_project_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.project_folder = Some(folder.into());
        self
    }

    pub fn project_folder(&self) -> Option<&Path> {
        self.project_folder.as_deref()
    }

    pub fn set_project_folder(&mut self, folder: Option<PathBuf>) {
        self.project_folder = folder;
    }

    pub fn current_model_version(&self) -> u32 {
        self.current_model_version
    }

    pub(crate) fn set_current_model_version(&mut self, version: u32) {
        self.current_model_version = version;
    }

    pub fn metadata(&self) -> &Catalog {
        &self.catalog
    }

    pub fn metadata_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, guid: Guid) -> bool {
        self.objects.contains_key(&guid)
    }

    /// Every guid, ascending.
    pub fn guids(&self) -> Vec<Guid> {
        let mut guids: Vec<Guid> = self.objects.keys().copied().collect();
        guids.sort();
        guids
    }

    /// Every surrogate in guid order.
    pub fn iter(&self) -> impl Iterator<Item = &Surrogate> {
        self.guids()
            .into_iter()
            .filter_map(move |g| self.objects.get(&g))
    }

    // ── queries ─────────────────────────────────────────────────────────────

    pub fn get(&self, guid: Guid) -> Result<&Surrogate> {
        self.objects
            .get(&guid)
            .ok_or_else(|| LexError::NotFound(guid.to_string()))
    }

    pub fn try_get(&self, guid: Guid) -> Option<&Surrogate> {
        self.objects.get(&guid)
    }

    /// Instances whose class is exactly `class_name`.
    pub fn all_instances_sans_subclasses(&self, class_name: &str) -> Result<Vec<Surrogate>> {
        self.catalog.class(class_name)?;
        Ok(self
            .by_class
            .get(class_name)
            .map(|guids| self.snapshot(guids.iter().copied()))
            .unwrap_or_default())
    }

    /// Instances of `class_name` and of every class derived from it.
    pub fn all_instances_with_subclasses(&self, class_name: &str) -> Result<Vec<Surrogate>> {
        let mut guids = BTreeSet::new();
        for class in self.catalog.all_subclasses(class_name)? {
            if let Some(members) = self.by_class.get(&class) {
                guids.extend(members.iter().copied());
            }
        }
        Ok(self.snapshot(guids.into_iter()))
    }

    /// The surrogate's claimed owner, when it has one and that owner exists.
    pub fn get_owning(&self, surrogate: &Surrogate) -> Option<&Surrogate> {
        surrogate.owner_guid().and_then(|o| self.objects.get(&o))
    }

    pub fn try_get_owner(&self, guid: Guid) -> Option<&Surrogate> {
        self.objects.get(&guid).and_then(|s| self.get_owning(s))
    }

    /// Every surrogate whose `ownerguid` is `owner`, across all owning fields.
    pub fn get_directly_owned(&self, owner: Guid) -> Vec<Surrogate> {
        self.by_owner
            .get(&owner)
            .map(|guids| self.snapshot(guids.iter().copied()))
            .unwrap_or_default()
    }

    fn snapshot(&self, guids: impl Iterator<Item = Guid>) -> Vec<Surrogate> {
        guids.filter_map(|g| self.objects.get(&g).cloned()).collect()
    }

    // ── mutation ────────────────────────────────────────────────────────────

    pub fn add(&mut self, surrogate: Surrogate) -> Result<()> {
        let guid = surrogate.guid();
        if self.objects.contains_key(&guid) {
            return Err(LexError::Repository(format!("duplicate guid {}", guid)));
        }
        self.check_class(&surrogate)?;

        if self.changes.goners.remove(&guid) {
            self.changes.dirty.insert(guid);
        } else {
            self.changes.new.insert(guid);
        }
        self.index(&surrogate);
        self.objects.insert(guid, surrogate);
        Ok(())
    }

    pub fn remove(&mut self, guid: Guid) -> Result<Surrogate> {
        let surrogate = self
            .objects
            .remove(&guid)
            .ok_or_else(|| LexError::NotFound(guid.to_string()))?;
        self.unindex(&surrogate);

        if !self.changes.new.remove(&guid) {
            self.changes.dirty.remove(&guid);
            self.changes.goners.insert(guid);
        }
        Ok(surrogate)
    }

    /// Replaces the stored copy. Fails with `StaleSurrogate` when the guid is not
    /// in the repository, i.e. the caller edited a copy of something already gone.
    pub fn update(&mut self, surrogate: Surrogate) -> Result<()> {
        let guid = surrogate.guid();
        if !self.objects.contains_key(&guid) {
            return Err(LexError::StaleSurrogate(guid.to_string()));
        }
        self.check_class(&surrogate)?;

        if let Some(old) = self.objects.remove(&guid) {
            self.unindex(&old);
        }
        if !self.changes.new.contains(&guid) {
            self.changes.dirty.insert(guid);
        }
        self.index(&surrogate);
        self.objects.insert(guid, surrogate);
        Ok(())
    }

    /// Removes `guid` and everything it transitively owns. Returns the removed guids
    /// in removal order; an unknown guid removes nothing.
    pub fn remove_including_owned(&mut self, guid: Guid) -> Vec<Guid> {
        let mut worklist = vec![guid];
        let mut seen = AHashSet::new();
        let mut doomed = Vec::new();
        while let Some(current) = worklist.pop() {
            if !seen.insert(current) || !self.objects.contains_key(&current) {
                continue;
            }
            doomed.push(current);
            if let Some(owned) = self.by_owner.get(&current) {
                worklist.extend(owned.iter().rev().copied());
            }
        }

        for g in &doomed {
            let _ = self.remove(*g);
        }
        if doomed.len() > 1 {
            debug!(root = %guid, removed = doomed.len(), "removed owned subtree");
        }
        doomed
    }

    // ── change tracking ─────────────────────────────────────────────────────

    pub fn begin_step(&mut self) {
        self.changes.clear();
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    fn check_class(&self, surrogate: &Surrogate) -> Result<()> {
        if self.catalog.class_exists(surrogate.class_name()) {
            Ok(())
        } else {
            Err(LexError::Repository(format!(
                "{} has unknown class {}",
                surrogate.guid(),
                surrogate.class_name()
            )))
        }
    }

    fn index(&mut self, surrogate: &Surrogate) {
        self.by_class
            .entry(surrogate.class_name().to_string())
            .or_default()
            .insert(surrogate.guid());
        if let Some(owner) = surrogate.owner_guid() {
            self.by_owner
                .entry(owner)
                .or_default()
                .insert(surrogate.guid());
        }
    }

    fn unindex(&mut self, surrogate: &Surrogate) {
        if let Some(set) = self.by_class.get_mut(surrogate.class_name()) {
            set.remove(&surrogate.guid());
            if set.is_empty() {
                self.by_class.remove(surrogate.class_name());
            }
        }
        if let Some(owner) = surrogate.owner_guid() {
            if let Some(set) = self.by_owner.get_mut(&owner) {
                set.remove(&surrogate.guid());
                if set.is_empty() {
                    self.by_owner.remove(&owner);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"
class CmObject @id(0) @abstract {}
class StPara : CmObject @id(14) { Contents: String }
class StTxtPara : StPara @id(16) { Segments: OwningSequence<CmObject> }
class ScrTxtPara : StTxtPara @id(3008) {}
class StText : CmObject @id(14000) { Paragraphs: OwningSequence<StPara> }
"#;

    fn guid(n: u8) -> Guid {
        Guid::parse(&format!("00000000-0000-0000-0000-0000000000{:02x}", n)).unwrap()
    }

    fn owned(n: u8, class: &str, owner: u8) -> Surrogate {
        let mut s = Surrogate::new(guid(n), class);
        s.set_owner(guid(owner));
        s
    }

    fn repo() -> ObjectRepository {
        let mut repo = ObjectRepository::new(Catalog::from_schema_source(SCHEMA).unwrap(), 7000000);
        repo.add(Surrogate::new(guid(1), "StText")).unwrap();
        repo.add(owned(2, "StPara", 1)).unwrap();
        repo.add(owned(3, "StTxtPara", 1)).unwrap();
        repo.add(owned(4, "ScrTxtPara", 1)).unwrap();
        repo.add(owned(5, "StTxtPara", 3)).unwrap();
        repo.begin_step();
        repo
    }

    fn guids(list: &[Surrogate]) -> Vec<Guid> {
        list.iter().map(|s| s.guid()).collect()
    }

    #[test]
    fn test_sans_and_with_subclass_queries_differ() {
        let repo = repo();
        assert_eq!(guids(&repo.all_instances_sans_subclasses("StPara").unwrap()), vec![guid(2)]);
        assert_eq!(
            guids(&repo.all_instances_with_subclasses("StPara").unwrap()),
            vec![guid(2), guid(3), guid(4), guid(5)]
        );
        assert_eq!(
            guids(&repo.all_instances_sans_subclasses("StTxtPara").unwrap()),
            vec![guid(3), guid(5)]
        );
        assert!(repo.all_instances_sans_subclasses("ScrTxtPara").unwrap().len() == 1);
        assert!(repo.all_instances_sans_subclasses("Ghost").is_err());
    }

    #[test]
    fn test_ownership_queries() {
        let repo = repo();
        assert_eq!(guids(&repo.get_directly_owned(guid(1))), vec![guid(2), guid(3), guid(4)]);
        let para = repo.get(guid(5)).unwrap();
        assert_eq!(repo.get_owning(para).unwrap().guid(), guid(3));
        assert_eq!(repo.try_get_owner(guid(3)).unwrap().guid(), guid(1));
        assert!(repo.try_get_owner(guid(1)).is_none());
        assert!(repo.get_directly_owned(guid(9)).is_empty());
    }

    #[test]
    fn test_lookup_errors() {
        let repo = repo();
        assert!(matches!(repo.get(guid(9)), Err(LexError::NotFound(_))));
        assert!(repo.try_get(guid(9)).is_none());
    }

    #[test]
    fn test_change_sets() {
        let mut repo = repo();
        assert!(repo.changes().is_empty());

        let mut para = repo.get(guid(2)).unwrap().clone();
        para.set_class_name("StTxtPara");
        repo.update(para).unwrap();
        assert!(repo.changes().dirty.contains(&guid(2)));
        assert!(repo.all_instances_sans_subclasses("StPara").unwrap().is_empty());

        repo.add(owned(6, "StTxtPara", 1)).unwrap();
        repo.update(repo.get(guid(6)).unwrap().clone()).unwrap();
        assert!(repo.changes().new.contains(&guid(6)));
        assert!(!repo.changes().dirty.contains(&guid(6)));

        // created then removed in the same step leaves no trace
        repo.remove(guid(6)).unwrap();
        assert!(!repo.changes().new.contains(&guid(6)));
        assert!(!repo.changes().goners.contains(&guid(6)));

        // removed then re-added is a modification
        let old = repo.remove(guid(4)).unwrap();
        assert!(repo.changes().goners.contains(&guid(4)));
        repo.add(old).unwrap();
        assert!(repo.changes().dirty.contains(&guid(4)));
        assert!(!repo.changes().goners.contains(&guid(4)));

        repo.begin_step();
        assert!(repo.changes().is_empty());
    }

    #[test]
    fn test_update_of_unknown_guid_is_stale() {
        let mut repo = repo();
        let stale = repo.remove(guid(2)).unwrap();
        assert!(matches!(repo.update(stale), Err(LexError::StaleSurrogate(_))));
    }

    #[test]
    fn test_add_rejects_duplicates_and_unknown_classes() {
        let mut repo = repo();
        assert!(repo.add(Surrogate::new(guid(1), "StText")).is_err());
        assert!(repo.add(Surrogate::new(guid(7), "Ghost")).is_err());
    }

    #[test]
    fn test_remove_including_owned_handles_cycles() {
        let mut repo = repo();
        // 1 owns 3, 3 owns 5, and 5 claims to own 1
        let mut root = repo.get(guid(1)).unwrap().clone();
        root.set_owner(guid(5));
        repo.update(root).unwrap();

        let removed = repo.remove_including_owned(guid(3));
        assert_eq!(removed.len(), 5);
        assert!(repo.is_empty());
        assert!(repo.remove_including_owned(guid(3)).is_empty());
    }
}
