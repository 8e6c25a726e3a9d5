//! Instant Run change classification.
//!
//! Each build decides how much of an application has to be redeployed:
//! a hot/warm swap of method bodies, a cold restart, or a full reinstall.
//! The pieces:
//!
//! - [`BuildContext`]: per-build state (verifier status, build mode,
//!   artifacts) and the build-info history persisted between builds
//! - [`verify_classes`]: compares two versions of a class file
//! - [`ClassChangeVerifier`]: runs the class verifier over changed compiler
//!   outputs, keeping a backup of the previous versions
//! - [`NoChangesVerifier`]: inputs whose every change forces a restart
//! - [`check_manifest_crc`]: detects changes to the binary manifest

mod change_verifier;
mod context;
mod error;
mod manifest;
mod no_changes;
mod status;
mod verifier;

pub use change_verifier::{ClassChangeVerifier, JarChanges};
pub use context::{
    Artifact, Build, BuildContext, FileType, PersistenceMode, TaskType, CURRENT_FORMAT,
};
pub use error::InstantRunError;
pub use manifest::{
    check_manifest_crc, manifest_crc, ManifestCheck, ANDROID_MANIFEST_XML, MANIFEST_CRC_FILE,
};
pub use no_changes::NoChangesVerifier;
pub use status::{BuildMode, ColdswapMode, PatchingPolicy, VerifierStatus};
pub use verifier::{verify_class_bytes, verify_classes, DISABLE_ANNOTATION};

pub type Result<T> = std::result::Result<T, InstantRunError>;
