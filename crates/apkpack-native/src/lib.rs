//! Native build JSON generation for CMake and ndk-build projects.
//!
//! Each ABI of a variant gets `<json folder>/<abi>/android_gradle_build.json`
//! describing the libraries the native build produces. Generation is
//! expensive, so a JSON is only regenerated when it is missing, older than
//! one of the build files it lists, refers to a build file that no longer
//! exists, or was produced by a different command than the one about to run.
//! The previous command is kept next to the JSON in
//! `<build system>_build_command.txt`.

mod build_system;
mod config;
mod dry_run;
mod error;
mod generator;
mod model;
mod runner;

pub use build_system::{CmakeGenerator, JsonGenerator, NativeBuildSystem, NdkBuildGenerator};
pub use config::{resolve_abi_filters, GeneratorConfig, GeneratorConfigBuilder, KNOWN_ABIS};
pub use error::NativeBuildError;
pub use generator::{AbiOutcome, NativeJsonGenerator, RebuildReason};
pub use model::{
    NativeBuildConfigValue, NativeLibraryValue, NativeSourceFileValue, NativeToolchainValue,
};
pub use runner::{CommandRunner, ProcessCommandRunner};

pub type Result<T> = std::result::Result<T, NativeBuildError>;
