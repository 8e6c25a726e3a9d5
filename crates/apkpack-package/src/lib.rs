//! Incremental APK packaging.
//!
//! A [`PackagingSession`] turns the changes reported for the five input
//! categories ([`InputSet`]) into updates of an existing package. The
//! [`KnownFilesSaveData`] ledger remembers which category every packaged
//! file came from so that deletions can be routed even though the host only
//! reports the deleted path. Dex inputs are renamed onto the
//! `classes.dex`, `classes2.dex`, ... sequence by
//! [`DexIncrementalRenameManager`].

mod dex_renamer;
mod error;
mod input_set;
mod packager;
mod policy;
mod save_data;
mod session;

pub use dex_renamer::{dex_name, DexIncrementalRenameManager, PackagedFileUpdate, CLASSES_DEX};
pub use error::PackageError;
pub use input_set::InputSet;
pub use packager::{IncrementalPackager, NativeLibraryAbiPredicate, PackagerOptions};
pub use policy::{is_main_slice, partition_slices, DexPackagingPolicy, MAIN_SLICE_NAME};
pub use save_data::{KnownFilesSaveData, SaveDataRegistry, SharedSaveData, SAVE_DATA_FILE_NAME};
pub use session::{
    CategorizedChanges, PackagingJob, PackagingJobBuilder, PackagingReport, PackagingSession,
    INSTANT_RUN_ZIP, ZIP_CACHE_DIR,
};

pub type Result<T> = std::result::Result<T, PackageError>;
