use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write package: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to update zip archive {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error(transparent)]
    Files(#[from] apkpack_files::FilesError),

    #[error(transparent)]
    Cache(#[from] apkpack_cache::CacheError),

    #[error(transparent)]
    InstantRun(#[from] apkpack_instant_run::InstantRunError),

    /// Persisted incremental state could not be understood. The incremental
    /// directory has to be cleared (a full build) to recover.
    #[error("invalid data stored in file '{path}' ({detail})")]
    CorruptState { path: PathBuf, detail: String },

    #[error("incremental update refers to dex file '{file}' as {action}, but this file is not known")]
    UnknownDex {
        file: apkpack_files::RelativeFile,
        action: &'static str,
    },

    #[error("'{path}' is a directory")]
    OutputIsDirectory { path: PathBuf },

    #[error("'{path}' is not writeable")]
    OutputNotWritable { path: PathBuf },

    #[error("failed to create '{path}': {source}")]
    OutputNotCreatable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("incremental directory {path} is not a directory")]
    IncrementalDirMissing { path: PathBuf },
}

impl PackageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn zip(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::Zip {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::CorruptState {
            path: path.into(),
            detail: detail.into(),
        }
    }
}
