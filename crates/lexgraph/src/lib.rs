pub mod catalog;
pub mod error;
pub mod migration;
pub mod model;
pub mod project;
pub mod schema;
pub mod store;
pub mod types;
pub mod xml;

pub use catalog::{Catalog, build_catalog};
pub use error::{LexError, Result};
pub use migration::{
    DataMigration, MigrationManager, MigrationReport, ProgressEvent, ProgressSink, StepReport,
};
pub use project::{load_project, load_project_str, save_project, write_project_string};
pub use store::delint::{DelintReport, delint};
pub use store::repository::{ChangeSet, ObjectRepository};
pub use store::surrogate::Surrogate;
pub use types::{ClassId, FieldId, FieldKind, FieldKindFilter, Guid, LinkKind};
