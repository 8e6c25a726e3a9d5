use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum InstantRunError {
    #[error("failed to access {path}: {source}")]
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

    #[error("failed to parse class file {path}: {source}")]
    ClassFile {
        path: PathBuf,
        #[source]
        source: apkpack_classfile::Error,
    },

    #[error("failed to parse XML in {path}: {source}")]
    Xml {
        path: PathBuf,
        #[source]
        source: roxmltree::Error,
    },

    #[error("failed to write build info: {0}")]
    XmlWrite(#[from] quick_xml::Error),

    #[error("invalid build info in {path}: {detail}")]
    InvalidBuildInfo { path: PathBuf, detail: String },

    #[error("the target api level must be set before the build context is used")]
    ApiLevelNotSet,

    #[error("unknown cold swap mode '{0}' (expected auto, multidex or multiapk)")]
    UnknownColdswapMode(String),

    /// A full build finished without recording any artifact, and no previous
    /// build has a main artifact to fall back on.
    #[error("full build with no artifacts")]
    NoMainArtifact,
}

impl InstantRunError {
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

    pub(crate) fn class_file(path: impl Into<PathBuf>, source: apkpack_classfile::Error) -> Self {
        Self::ClassFile {
            path: path.into(),
            source,
        }
    }
}
