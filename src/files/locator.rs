//! Addressing of stored documents.
//!
//! A [`FileLocator`] is either a path on a local filesystem or a key in a flat object
//! namespace (`gs://bucket/dir/file.json`). Object "directories" are only a naming
//! convention: a key ending in `/` names every object sharing that prefix.

use std::fmt;
use std::path::{Path, PathBuf};

/// Scheme prefix every object-namespace directory must carry.
pub const GS_URI_PREFIX: &str = "gs://";

/// The two addressing schemes a [`FileLocator`] can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocatorForm {
    Local,
    Remote,
}

impl fmt::Display for LocatorForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocatorForm::Local => write!(f, "local path"),
            LocatorForm::Remote => write!(f, "object key"),
        }
    }
}

/// Identifies one stored document or directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileLocator {
    /// A hierarchical filesystem path.
    Local(PathBuf),
    /// A `/`-separated key into an object namespace.
    Remote(String),
}

impl FileLocator {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        FileLocator::Local(path.into())
    }

    pub fn remote(key: impl Into<String>) -> Self {
        FileLocator::Remote(key.into())
    }

    /// Parses a configured location: `gs://` keys become [`FileLocator::Remote`],
    /// everything else a local path.
    pub fn parse(value: &str) -> Self {
        if value.starts_with(GS_URI_PREFIX) {
            FileLocator::Remote(value.to_string())
        } else {
            FileLocator::Local(PathBuf::from(value))
        }
    }

    pub fn form(&self) -> LocatorForm {
        match self {
            FileLocator::Local(_) => LocatorForm::Local,
            FileLocator::Remote(_) => LocatorForm::Remote,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, FileLocator::Remote(_))
    }

    /// The last path segment.
    pub fn file_name(&self) -> String {
        match self {
            FileLocator::Local(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            FileLocator::Remote(key) => key.rsplit('/').next().unwrap_or_default().to_string(),
        }
    }

    /// The containing directory. Object directories keep their trailing `/`.
    pub fn directory(&self) -> FileLocator {
        match self {
            FileLocator::Local(path) => FileLocator::Local(
                path.parent()
                    .filter(|parent| !parent.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(".")),
            ),
            FileLocator::Remote(key) => FileLocator::Remote(match key.rfind('/') {
                Some(idx) => key[..=idx].to_string(),
                None => String::new(),
            }),
        }
    }

    /// Everything after the final `.` of the file name, including the dot.
    /// Empty when the name has no dot.
    pub fn extension(&self) -> String {
        let name = self.file_name();
        match name.rfind('.') {
            Some(idx) => name[idx..].to_string(),
            None => String::new(),
        }
    }

    /// The file name without its extension.
    pub fn stem(&self) -> String {
        let name = self.file_name();
        match name.rfind('.') {
            Some(idx) => name[..idx].to_string(),
            None => name,
        }
    }

    /// Appends a file name to a directory locator.
    pub fn join(&self, name: &str) -> FileLocator {
        match self {
            FileLocator::Local(path) => FileLocator::Local(path.join(name)),
            FileLocator::Remote(key) if key.is_empty() || key.ends_with('/') => {
                FileLocator::Remote(format!("{key}{name}"))
            }
            FileLocator::Remote(key) => FileLocator::Remote(format!("{key}/{name}")),
        }
    }

    /// A sibling locator in the same directory.
    pub fn with_file_name(&self, name: &str) -> FileLocator {
        self.directory().join(name)
    }

    /// Keeps the file name and moves it into `directory`.
    pub fn replace_directory(&self, directory: &FileLocator) -> FileLocator {
        directory.join(&self.file_name())
    }
}

impl fmt::Display for FileLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileLocator::Local(path) => write!(f, "{}", path.display()),
            FileLocator::Remote(key) => write!(f, "{key}"),
        }
    }
}

impl From<PathBuf> for FileLocator {
    fn from(path: PathBuf) -> Self {
        FileLocator::Local(path)
    }
}

impl From<&Path> for FileLocator {
    fn from(path: &Path) -> Self {
        FileLocator::Local(path.to_path_buf())
    }
}
