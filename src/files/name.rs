//! Decomposition of snapshot file names.
//!
//! Names follow `<base>[_p<YYYY-MM-DD>][_v<N>].<ext>`: the version marker is always the
//! outermost suffix, the date stamp sits directly in front of it.

use crate::files::locator::FileLocator;
use chrono::NaiveDate;

pub(crate) const VERSION_MARKER: &str = "_v";
pub(crate) const DATE_MARKER: &str = "_p";

/// A file name split into its lineage identity and its revision markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedName {
    /// Semantic identity, e.g. `observations`.
    pub base: String,
    /// The `YYYY-MM-DD` following the `_p` marker, if any.
    pub date_stamp: Option<String>,
    /// The integer following the `_v` marker, if any.
    pub version: Option<u64>,
    /// Extension including the leading dot, empty when there is none.
    pub extension: String,
}

impl VersionedName {
    /// Splits the file name of `locator`. Never fails: names without markers simply
    /// leave `date_stamp` and `version` empty.
    pub fn parse(locator: &FileLocator) -> Self {
        Self::parse_file_name(&locator.file_name())
    }

    pub fn parse_file_name(file_name: &str) -> Self {
        let (stem, extension) = match file_name.rfind('.') {
            Some(idx) => (&file_name[..idx], &file_name[idx..]),
            None => (file_name, ""),
        };
        let (stem, version) = split_version(stem);
        let (base, date_stamp) = split_date_stamp(stem);

        VersionedName {
            base: base.to_string(),
            date_stamp: date_stamp.map(str::to_string),
            version,
            extension: extension.to_string(),
        }
    }

    /// The stem with only the version marker removed. Version lookups anchor on this,
    /// so a date-stamped lineage keeps its date.
    pub fn versionless_stem(&self) -> String {
        match &self.date_stamp {
            Some(date) => format!("{}{DATE_MARKER}{date}", self.base),
            None => self.base.clone(),
        }
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.date_stamp
            .as_deref()
            .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
    }

    /// Reassembles the file name.
    pub fn file_name(&self) -> String {
        let mut name = self.versionless_stem();
        if let Some(version) = self.version {
            name.push_str(&format!("{VERSION_MARKER}{version}"));
        }
        name.push_str(&self.extension);
        name
    }
}

fn split_version(stem: &str) -> (&str, Option<u64>) {
    let Some(idx) = stem.rfind(VERSION_MARKER) else {
        return (stem, None);
    };
    let digits = &stem[idx + VERSION_MARKER.len()..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return (stem, None);
    }
    match digits.parse::<u64>() {
        Ok(version) => (&stem[..idx], Some(version)),
        Err(_) => (stem, None),
    }
}

fn split_date_stamp(stem: &str) -> (&str, Option<&str>) {
    // "_p" + "YYYY-MM-DD"
    const SUFFIX_LEN: usize = 12;
    if stem.len() < SUFFIX_LEN || !stem.is_char_boundary(stem.len() - SUFFIX_LEN) {
        return (stem, None);
    }
    let (head, suffix) = stem.split_at(stem.len() - SUFFIX_LEN);
    let Some(date) = suffix.strip_prefix(DATE_MARKER) else {
        return (stem, None);
    };
    if is_iso_date_shape(date) {
        (head, Some(date))
    } else {
        (stem, None)
    }
}

pub(crate) fn is_iso_date_shape(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        })
}
