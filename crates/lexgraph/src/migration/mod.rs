//! Versioned data migration.
//!
//! Each [`DataMigration`] produces exactly one model version. The manager keeps
//! them in a version-ordered table and applies every step in `(current, target]`
//! in ascending order, advancing the repository's version after each one.
//! Steps that need consistency repair call [`crate::store::delint::delint`]
//! themselves; the manager never runs it implicitly.

pub mod services;
pub mod steps;

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{LexError, Result};
use crate::store::repository::ObjectRepository;

pub type StepFn = fn(&mut ObjectRepository) -> Result<()>;

/// One registered step.
#[derive(Clone, Copy)]
pub struct DataMigration {
    /// The model version this step produces.
    pub version: u32,
    pub description: &'static str,
    /// The version number changed without any data change.
    pub bookkeeping_only: bool,
    pub up: StepFn,
}

impl DataMigration {
    pub const fn new(version: u32, description: &'static str, up: StepFn) -> Self {
        Self {
            version,
            description,
            bookkeeping_only: false,
            up,
        }
    }

    pub const fn bookkeeping(version: u32, description: &'static str) -> Self {
        Self {
            version,
            description,
            bookkeeping_only: true,
            up: leave_untouched,
        }
    }
}

impl std::fmt::Debug for DataMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataMigration")
            .field("version", &self.version)
            .field("description", &self.description)
            .field("bookkeeping_only", &self.bookkeeping_only)
            .finish()
    }
}

fn leave_untouched(_repo: &mut ObjectRepository) -> Result<()> {
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started {
        from_version: u32,
        to_version: u32,
        steps: usize,
    },
    StepStarted {
        version: u32,
        index: usize,
        total: usize,
        description: &'static str,
    },
    StepFinished {
        version: u32,
        index: usize,
        total: usize,
    },
    Finished {
        version: u32,
    },
}

/// Receives advisory progress. Nothing a sink does can affect the migration.
pub trait ProgressSink {
    fn report(&mut self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: FnMut(ProgressEvent),
{
    fn report(&mut self, event: ProgressEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub version: u32,
    pub description: String,
    pub bookkeeping_only: bool,
    pub created: usize,
    pub removed: usize,
    pub modified: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub from_version: u32,
    pub to_version: u32,
    pub steps: Vec<StepReport>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct MigrationManager {
    oldest_supported: u32,
    steps: BTreeMap<u32, DataMigration>,
}

impl MigrationManager {
    /// An empty table. Data older than `oldest_supported` is rejected.
    pub fn new(oldest_supported: u32) -> Self {
        Self {
            oldest_supported,
            steps: BTreeMap::new(),
        }
    }

    /// The bundled step chain.
    pub fn standard() -> Self {
        let mut manager = Self::new(steps::OLDEST_SUPPORTED_VERSION);
        for step in steps::all() {
            manager.steps.insert(step.version, step);
        }
        manager
    }

    pub fn register(&mut self, step: DataMigration) -> Result<()> {
        if step.version <= self.oldest_supported {
            return Err(LexError::Migration(format!(
                "step {} does not produce a version newer than the oldest supported {}",
                step.version, self.oldest_supported
            )));
        }
        if self.steps.contains_key(&step.version) {
            return Err(LexError::Migration(format!(
                "a step producing version {} is already registered",
                step.version
            )));
        }
        self.steps.insert(step.version, step);
        Ok(())
    }

    pub fn oldest_supported_version(&self) -> u32 {
        self.oldest_supported
    }

    /// The version produced by the last registered step.
    pub fn newest_version(&self) -> u32 {
        self.steps
            .keys()
            .next_back()
            .copied()
            .unwrap_or(self.oldest_supported)
    }

    pub fn steps(&self) -> impl Iterator<Item = &DataMigration> {
        self.steps.values()
    }

    fn validate_range(&self, from: u32, to: u32) -> Result<()> {
        if from < self.oldest_supported {
            return Err(LexError::Migration(format!(
                "version {} is older than the oldest supported version {}",
                from, self.oldest_supported
            )));
        }
        if to > self.newest_version() {
            return Err(LexError::Migration(format!(
                "version {} is newer than the newest known version {}",
                to,
                self.newest_version()
            )));
        }
        if from > to {
            return Err(LexError::Migration(format!(
                "cannot migrate backwards from {} to {}",
                from, to
            )));
        }
        Ok(())
    }

    fn pending(&self, from: u32, to: u32) -> impl Iterator<Item = &DataMigration> {
        self.steps.range((Excluded(from), Included(to))).map(|(_, s)| s)
    }

    /// True when some step in `(from, to]` changes data. A range covered only by
    /// bookkeeping steps needs nothing beyond a new version number.
    pub fn needs_real_migration(&self, from: u32, to: u32) -> Result<bool> {
        self.validate_range(from, to)?;
        Ok(self.pending(from, to).any(|s| !s.bookkeeping_only))
    }

    /// Applies every step after the repository's current version up to `to`.
    ///
    /// On error the repository is left partially migrated and must be discarded;
    /// nothing is written to disk except by steps that edit sibling artifacts.
    #[instrument(skip(self, repo, progress), fields(from = repo.current_model_version()))]
    pub fn perform_migration(
        &self,
        repo: &mut ObjectRepository,
        to: u32,
        mut progress: Option<&mut dyn ProgressSink>,
    ) -> Result<MigrationReport> {
        let from = repo.current_model_version();
        self.validate_range(from, to)?;

        let pending: Vec<&DataMigration> = self.pending(from, to).collect();
        let total = pending.len();
        info!(steps = total, "starting migration");
        if let Some(sink) = progress.as_deref_mut() {
            sink.report(ProgressEvent::Started {
                from_version: from,
                to_version: to,
                steps: total,
            });
        }

        let mut report = MigrationReport {
            from_version: from,
            to_version: to,
            steps: Vec::with_capacity(total),
        };
        for (index, step) in pending.into_iter().enumerate() {
            if let Some(sink) = progress.as_deref_mut() {
                sink.report(ProgressEvent::StepStarted {
                    version: step.version,
                    index,
                    total,
                    description: step.description,
                });
            }

            repo.begin_step();
            if !step.bookkeeping_only {
                if let Err(e) = (step.up)(repo) {
                    warn!(version = step.version, error = %e, "migration step failed");
                    return Err(e);
                }
            }
            repo.set_current_model_version(step.version);

            let changes = repo.changes();
            let step_report = StepReport {
                version: step.version,
                description: step.description.to_string(),
                bookkeeping_only: step.bookkeeping_only,
                created: changes.new.len(),
                removed: changes.goners.len(),
                modified: changes.dirty.len(),
            };
            debug!(
                version = step.version,
                created = step_report.created,
                removed = step_report.removed,
                modified = step_report.modified,
                "applied migration step"
            );
            report.steps.push(step_report);

            if let Some(sink) = progress.as_deref_mut() {
                sink.report(ProgressEvent::StepFinished {
                    version: step.version,
                    index,
                    total,
                });
            }
        }

        if let Some(sink) = progress.as_deref_mut() {
            sink.report(ProgressEvent::Finished { version: to });
        }
        info!(version = to, "migration complete");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::store::surrogate::Surrogate;
    use crate::types::Guid;

    fn empty_repo(version: u32) -> ObjectRepository {
        let catalog = Catalog::from_schema_source("class Thing @id(1) { Count: Integer }").unwrap();
        ObjectRepository::new(catalog, version)
    }

    fn add_thing(repo: &mut ObjectRepository) -> Result<()> {
        repo.add(Surrogate::new(Guid::new_v4(), "Thing"))
    }

    fn fail(_repo: &mut ObjectRepository) -> Result<()> {
        Err(LexError::Migration("boom".to_string()))
    }

    fn manager() -> MigrationManager {
        let mut m = MigrationManager::new(100);
        m.register(DataMigration::new(101, "add a thing", add_thing)).unwrap();
        m.register(DataMigration::bookkeeping(102, "renumber")).unwrap();
        m.register(DataMigration::new(103, "add another", add_thing)).unwrap();
        m
    }

    #[test]
    fn test_registration_rules() {
        let mut m = manager();
        assert!(m.register(DataMigration::bookkeeping(102, "again")).is_err());
        assert!(m.register(DataMigration::bookkeeping(100, "too old")).is_err());
        assert_eq!(m.newest_version(), 103);
        assert_eq!(MigrationManager::new(5).newest_version(), 5);
    }

    #[test]
    fn test_needs_real_migration() {
        let m = manager();
        assert!(!m.needs_real_migration(101, 101).unwrap());
        assert!(!m.needs_real_migration(101, 102).unwrap());
        assert!(m.needs_real_migration(100, 101).unwrap());
        assert!(m.needs_real_migration(102, 103).unwrap());
        assert!(m.needs_real_migration(102, 101).is_err());
        assert!(m.needs_real_migration(99, 101).is_err());
        assert!(m.needs_real_migration(100, 104).is_err());
    }

    #[test]
    fn test_perform_migration_walks_the_chain() {
        let m = manager();
        let mut repo = empty_repo(100);
        let mut events = Vec::new();
        let mut sink = |e: ProgressEvent| events.push(e);
        let report = m.perform_migration(&mut repo, 103, Some(&mut sink)).unwrap();

        assert_eq!(repo.current_model_version(), 103);
        assert_eq!(repo.len(), 2);
        assert_eq!(report.steps.len(), 3);
        assert_eq!(report.steps[0].created, 1);
        assert!(report.steps[1].bookkeeping_only);
        assert_eq!(report.steps[1].created, 0);
        assert_eq!(events.len(), 8);
        assert_eq!(events.last(), Some(&ProgressEvent::Finished { version: 103 }));
    }

    #[test]
    fn test_same_version_is_a_noop() {
        let m = manager();
        let mut repo = empty_repo(102);
        let report = m.perform_migration(&mut repo, 102, None).unwrap();
        assert!(report.is_noop());
        assert!(repo.is_empty());
        assert_eq!(repo.current_model_version(), 102);
    }

    #[test]
    fn test_invalid_requests_are_rejected_before_any_change() {
        let m = manager();
        let mut repo = empty_repo(103);
        assert!(m.perform_migration(&mut repo, 101, None).is_err());
        let mut repo = empty_repo(99);
        assert!(m.perform_migration(&mut repo, 101, None).is_err());
        let mut repo = empty_repo(100);
        assert!(m.perform_migration(&mut repo, 104, None).is_err());
        assert!(repo.is_empty());
        assert_eq!(repo.current_model_version(), 100);
    }

    #[test]
    fn test_failed_step_stops_the_chain() {
        let mut m = manager();
        m.register(DataMigration::new(104, "explode", fail)).unwrap();
        m.register(DataMigration::new(105, "never runs", add_thing)).unwrap();
        let mut repo = empty_repo(100);
        assert!(m.perform_migration(&mut repo, 105, None).is_err());
        assert_eq!(repo.current_model_version(), 103);
    }
}
