use crate::error::FilesError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// How a file changed since the last observed snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    New,
    Changed,
    Removed,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::New => "NEW",
            FileStatus::Changed => "CHANGED",
            FileStatus::Removed => "REMOVED",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file identified by the base it was found under.
///
/// Two files with the same relative path under different bases are distinct.
/// For zip bases `file` is `base` joined with the entry name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelativeFile {
    base: PathBuf,
    file: PathBuf,
}

impl RelativeFile {
    pub fn new(base: impl Into<PathBuf>, file: impl Into<PathBuf>) -> Result<Self, FilesError> {
        let base = base.into();
        let file = file.into();
        match file.strip_prefix(&base) {
            Ok(rest) if rest.components().next().is_some() => Ok(Self { base, file }),
            _ => Err(FilesError::NotUnderBase { file, base }),
        }
    }

    /// Build from a `/`-separated path below `base` (a zip entry name or a
    /// relative path read back from persisted state).
    pub fn from_relative_path(base: impl Into<PathBuf>, relative_path: &str) -> Self {
        let base = base.into();
        let mut file = base.clone();
        for segment in relative_path.split('/').filter(|s| !s.is_empty()) {
            file.push(segment);
        }
        Self { base, file }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Path of `file` below `base`, always `/`-separated.
    pub fn relative_path(&self) -> String {
        let rest = self.file.strip_prefix(&self.base).unwrap_or(&self.file);
        let mut out = String::new();
        for component in rest.components() {
            if let Component::Normal(part) = component {
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str(&part.to_string_lossy());
            }
        }
        out
    }

    pub fn file_name(&self) -> Option<String> {
        self.file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }
}

impl fmt::Display for RelativeFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.base.display(), self.relative_path())
    }
}
