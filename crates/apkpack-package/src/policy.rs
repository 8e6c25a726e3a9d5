use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Dex folders whose name contains this hold the main Instant Run slice.
pub const MAIN_SLICE_NAME: &str = "main_slice";

/// How dex inputs are laid out in the package.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DexPackagingPolicy {
    /// Every dex input is packaged as a dex entry.
    #[default]
    Standard,
    /// Main slice dex files are packaged as dex entries; every other slice
    /// is bundled into a single `instant-run.zip` Java resource.
    InstantRunShardsInSingleApk,
    /// Only the main slice is packaged; the other slices ship as splits.
    InstantRunMultiApk,
}

impl DexPackagingPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            DexPackagingPolicy::Standard => "standard",
            DexPackagingPolicy::InstantRunShardsInSingleApk => "instant-run-shards-in-single-apk",
            DexPackagingPolicy::InstantRunMultiApk => "instant-run-multi-apk",
        }
    }
}

/// Whether `folder` holds the main slice.
pub fn is_main_slice(folder: &Path) -> bool {
    folder
        .file_name()
        .is_some_and(|name| name.to_string_lossy().contains(MAIN_SLICE_NAME))
}

/// Split dex folders into main slice folders and the rest.
pub fn partition_slices(folders: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    folders.iter().cloned().partition(|folder| is_main_slice(folder))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_slice_is_detected_by_folder_name() {
        let folders = vec![
            PathBuf::from("/out/dex/main_slice"),
            PathBuf::from("/out/dex/slice_0"),
            PathBuf::from("/out/main_slice_parent/slice_1"),
        ];
        let (main, rest) = partition_slices(&folders);
        assert_eq!(main, vec![PathBuf::from("/out/dex/main_slice")]);
        assert_eq!(rest.len(), 2);
    }
}
