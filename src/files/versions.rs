//! Resolution of the latest stored revision of a lineage.
//!
//! Sibling lookups go through [`FileStore::siblings`], so the same code serves the
//! local filesystem and the object namespace.

use crate::files::error::StorageError;
use crate::files::locator::FileLocator;
use crate::files::name::{VersionedName, VERSION_MARKER};
use crate::files::storage::FileStore;
use log::debug;
use regex::Regex;

/// The sibling of `locator` with the numerically largest `_v<N>` suffix.
///
/// Siblings must share the directory, the extension and the version-less stem of
/// `locator`. Returns `None` when no sibling matches.
pub fn latest_by_version(
    store: &dyn FileStore,
    locator: &FileLocator,
) -> Result<Option<FileLocator>, StorageError> {
    let name = VersionedName::parse(locator);
    let pattern = Regex::new(&format!(
        r"^{}{VERSION_MARKER}(\d+)$",
        regex::escape(&name.versionless_stem())
    ))?;

    let mut latest: Option<(u64, FileLocator)> = None;
    for sibling in store.siblings(&locator.directory())? {
        if sibling.extension() != name.extension {
            continue;
        }
        let stem = sibling.stem();
        let Some(version) = pattern
            .captures(&stem)
            .and_then(|caps| caps[1].parse::<u64>().ok())
        else {
            continue;
        };
        match &latest {
            Some((best, _)) if *best >= version => {}
            _ => latest = Some((version, sibling)),
        }
    }

    debug!(
        "Latest version of {}: {:?}",
        locator,
        latest.as_ref().map(|(version, _)| version)
    );
    Ok(latest.map(|(_, sibling)| sibling))
}

/// The locator with its rightmost version incremented by one, in the same directory.
pub fn next_version(locator: &FileLocator) -> Result<FileLocator, StorageError> {
    let mut name = VersionedName::parse(locator);
    let version = name
        .version
        .ok_or_else(|| StorageError::MissingVersion(locator.clone()))?;
    name.version = Some(version + 1);
    Ok(locator.with_file_name(&name.file_name()))
}

/// The first version of a lineage: `<stem>_v1.<ext>` next to `locator`.
pub fn first_version(locator: &FileLocator) -> FileLocator {
    let mut name = VersionedName::parse(locator);
    name.version = Some(1);
    locator.with_file_name(&name.file_name())
}

/// The sibling with the most recent `_p<YYYY-MM-DD>` date stamp.
///
/// Any date stamp or version on `locator` itself is ignored when matching. Ties on the
/// date go to the file name that sorts last.
pub fn latest_by_date(
    store: &dyn FileStore,
    locator: &FileLocator,
) -> Result<Option<FileLocator>, StorageError> {
    let name = VersionedName::parse(locator);
    let pattern = Regex::new(&format!(
        r"^{}_p(\d{{4}}-\d{{2}}-\d{{2}})(?:_v\d+)?$",
        regex::escape(&name.base)
    ))?;

    let mut latest: Option<(String, String, FileLocator)> = None;
    for sibling in store.siblings(&locator.directory())? {
        if sibling.extension() != name.extension {
            continue;
        }
        let Some(date) = pattern
            .captures(&sibling.stem())
            .map(|caps| caps[1].to_string())
        else {
            continue;
        };
        let file_name = sibling.file_name();
        let newer = match &latest {
            None => true,
            Some((best_date, best_name, _)) => (&date, &file_name) > (best_date, best_name),
        };
        if newer {
            latest = Some((date, file_name, sibling));
        }
    }
    Ok(latest.map(|(_, _, sibling)| sibling))
}
