use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read zip archive {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("failed to walk directory: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error(transparent)]
    Cache(#[from] apkpack_cache::CacheError),

    #[error("{path} is not a zip archive")]
    NotAZip { path: PathBuf },

    #[error("{file} is not located under {base}")]
    NotUnderBase { file: PathBuf, base: PathBuf },

    /// A file named by a change set disappeared before it could be read.
    #[error("source file {path} no longer exists")]
    MissingSource { path: PathBuf },
}

impl FilesError {
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
}
