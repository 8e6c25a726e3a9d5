use std::path::PathBuf;

use apkpack_process::RunCommandError;

#[derive(Debug, thiserror::Error)]
pub enum NativeBuildError {
    /// Problems with the generator setup, reported before any ABI runs.
    #[error("external native build is misconfigured:\n{}", .0.join("\n"))]
    Configuration(Vec<String>),

    #[error("invalid ABI filter '{0}'")]
    InvalidAbiFilter(String),

    #[error("unknown native build system '{0}' (expected cmake or ndk-build)")]
    UnknownBuildSystem(String),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse native build JSON {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("executing external native build for {abi}: {source}")]
    Process {
        abi: String,
        #[source]
        source: Box<RunCommandError>,
    },

    #[error("Expected json generation to create '{}' but it didn't", .0.display())]
    JsonNotCreated(PathBuf),
}

impl NativeBuildError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}
