//! The JSON description a native build system produces for one ABI.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::NativeBuildError;

/// Contents of `android_gradle_build.json`.
///
/// Every field is optional; build systems only fill in what they know.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeBuildConfigValue {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "file_repr::option_vec"
    )]
    pub build_files: Option<Vec<PathBuf>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_commands: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub libraries: Option<BTreeMap<String, NativeLibraryValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolchains: Option<BTreeMap<String, NativeToolchainValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c_file_extensions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpp_file_extensions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeLibraryValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolchain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<NativeSourceFileValue>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "file_repr::option"
    )]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeSourceFileValue {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "file_repr::option"
    )]
    pub src: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeToolchainValue {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "file_repr::option"
    )]
    pub c_compiler_executable: Option<PathBuf>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "file_repr::option"
    )]
    pub cpp_compiler_executable: Option<PathBuf>,
}

impl NativeBuildConfigValue {
    /// Placeholder used when a build system has not produced any JSON yet.
    pub fn fallback(makefile: &Path) -> Self {
        Self {
            build_files: Some(vec![makefile.to_path_buf()]),
            ..Self::default()
        }
    }

    /// Parse `json`, tagging every library with `group_name`.
    pub fn read(json: &Path, group_name: &str) -> Result<Self, NativeBuildError> {
        let text = fs::read_to_string(json).map_err(|err| NativeBuildError::io(json, err))?;
        let mut value: Self =
            serde_json::from_str(&text).map_err(|err| NativeBuildError::json(json, err))?;
        for library in value.libraries.iter_mut().flat_map(|libs| libs.values_mut()) {
            library.group_name = Some(group_name.to_string());
        }
        Ok(value)
    }

    pub fn write(&self, json: &Path) -> Result<(), NativeBuildError> {
        let text =
            serde_json::to_string_pretty(self).map_err(|err| NativeBuildError::json(json, err))?;
        apkpack_cache::atomic_write(json, text.as_bytes())
            .map_err(|err| NativeBuildError::io(json, err))
    }
}

/// Files are written as plain path strings, but older tools emit
/// `{"path": "..."}` objects. Both are accepted on read.
mod file_repr {
    use std::path::PathBuf;

    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum FileRepr {
        Plain(PathBuf),
        Object { path: PathBuf },
    }

    impl From<FileRepr> for PathBuf {
        fn from(repr: FileRepr) -> Self {
            match repr {
                FileRepr::Plain(path) | FileRepr::Object { path } => path,
            }
        }
    }

    pub(super) fn option<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<FileRepr>::deserialize(deserializer)?.map(PathBuf::from))
    }

    pub(super) fn option_vec<'de, D>(deserializer: D) -> Result<Option<Vec<PathBuf>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Vec<FileRepr>>::deserialize(deserializer)?
            .map(|files| files.into_iter().map(PathBuf::from).collect()))
    }
}
