//! 7000002: every object whose class is exactly `StPara` becomes `StTxtPara`.
//! Subclass instances already carry text-paragraph data and are left alone.

use tracing::info;

use crate::error::Result;
use crate::store::repository::ObjectRepository;

pub(super) fn migrate(repo: &mut ObjectRepository) -> Result<()> {
    let paragraphs = repo.all_instances_sans_subclasses("StPara")?;
    let count = paragraphs.len();
    for mut para in paragraphs {
        para.set_class_name("StTxtPara");
        repo.update(para)?;
    }
    info!(count, "converted plain paragraphs");
    Ok(())
}
