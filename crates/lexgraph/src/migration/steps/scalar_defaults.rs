//! 7000005: every object gets an explicit value for each Boolean, Integer, GenDate,
//! Guid and Time property its class declares, custom fields included.

use tracing::{debug, info};

use crate::error::Result;
use crate::migration::services::backfill_basic_scalars;
use crate::store::repository::ObjectRepository;

pub(super) fn migrate(repo: &mut ObjectRepository) -> Result<()> {
    let mut objects = 0usize;
    let mut values = 0usize;
    for guid in repo.guids() {
        let mut surrogate = repo.get(guid)?.clone();
        let added = backfill_basic_scalars(repo.metadata(), &mut surrogate)?;
        if added.is_empty() {
            continue;
        }
        debug!(guid = %guid, fields = ?added, "backfilled defaults");
        objects += 1;
        values += added.len();
        repo.update(surrogate)?;
    }
    info!(objects, values, "scalar defaults backfilled");
    Ok(())
}
