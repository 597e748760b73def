//! Whole-document change detection for raw snapshots.

use crate::files::error::StorageError;
use crate::files::locator::FileLocator;
use crate::files::storage::FileStore;
use crate::files::versions::{first_version, latest_by_version, next_version};
use log::info;
use serde_json::Value;

/// Whether `document` differs from the snapshot stored at `latest`.
///
/// No stored snapshot counts as changed. Comparison is structural and order
/// sensitive, so reordered records are a change too.
pub fn has_changed(
    store: &dyn FileStore,
    document: &[Value],
    latest: Option<&FileLocator>,
) -> Result<bool, StorageError> {
    match latest {
        None => Ok(true),
        Some(locator) => Ok(store.read_json(locator)?.as_slice() != document),
    }
}

/// Writes `document` as the next version of `lineage` when it differs from the latest
/// stored one. Returns the written locator, or `None` when nothing changed.
///
/// `lineage` names the lineage without a version, e.g. `kildedata/weather_stations.json`.
pub fn store_if_changed(
    store: &dyn FileStore,
    document: &[Value],
    lineage: &FileLocator,
) -> Result<Option<FileLocator>, StorageError> {
    let latest = latest_by_version(store, lineage)?;
    if !has_changed(store, document, latest.as_ref())? {
        info!("No changes since {}, nothing stored", lineage);
        return Ok(None);
    }

    let target = match &latest {
        Some(latest) => next_version(latest)?,
        None => first_version(lineage),
    };
    store.write_json(&target, document)?;
    info!("Stored {} records in {}", document.len(), target);
    Ok(Some(target))
}
