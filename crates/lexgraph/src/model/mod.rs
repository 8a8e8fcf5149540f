//! The bundled class model.

use crate::catalog::Catalog;
use crate::error::Result;

pub const STANDARD_MODEL: &str = include_str!("standard.lgs");

/// A fresh catalog for [`STANDARD_MODEL`]. Each project gets its own copy because
/// custom fields are registered per project.
pub fn standard_catalog() -> Result<Catalog> {
    Catalog::from_schema_source(STANDARD_MODEL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldKind, FieldKindFilter};

    #[test]
    fn test_standard_model_builds() {
        let catalog = standard_catalog().unwrap();
        assert!(catalog.class_exists("WordformInventory"));
        assert!(catalog.is_same_or_subclass("ScrTxtPara", "StPara"));
        assert!(catalog.is_same_or_subclass("CmAnnotationDefn", "CmPossibility"));
        let segments = catalog.field_id("ScrTxtPara", "Segments", true).unwrap();
        assert_eq!(catalog.field_kind(segments).unwrap(), FieldKind::OwningSequence);
        assert_eq!(catalog.field_destination_class(segments).unwrap(), Some("Segment"));
    }

    #[test]
    fn test_every_concrete_class_has_a_scalar_query() {
        let catalog = standard_catalog().unwrap();
        let names: Vec<String> = catalog.class_names().map(str::to_string).collect();
        for name in names {
            let id = catalog.class_id(&name).unwrap();
            assert!(catalog.fields(id, true, FieldKindFilter::BasicScalars).is_ok());
        }
    }
}
