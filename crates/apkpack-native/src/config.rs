use std::path::{Path, PathBuf};

use crate::NativeBuildError;

/// ABIs an empty filter expands to.
pub const KNOWN_ABIS: &[&str] = &[
    "armeabi",
    "armeabi-v7a",
    "arm64-v8a",
    "x86",
    "x86_64",
    "mips",
    "mips64",
];

/// Expand user ABI filters.
///
/// An empty filter means every known ABI. `all` is not accepted; callers
/// must list ABIs explicitly. Duplicates are dropped, order is kept.
pub fn resolve_abi_filters<I, S>(filters: I) -> Result<Vec<String>, NativeBuildError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut abis: Vec<String> = Vec::new();
    for filter in filters {
        let filter = filter.into();
        if filter == "all" {
            return Err(NativeBuildError::InvalidAbiFilter(filter));
        }
        if !abis.contains(&filter) {
            abis.push(filter);
        }
    }
    if abis.is_empty() {
        abis = KNOWN_ABIS.iter().map(|abi| abi.to_string()).collect();
    }
    Ok(abis)
}

/// Immutable inputs of a native JSON generator for one variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratorConfig {
    variant_name: String,
    abis: Vec<String>,
    makefile: PathBuf,
    ndk_folder: PathBuf,
    sdk_folder: Option<PathBuf>,
    cmake_folder: Option<PathBuf>,
    json_folder: PathBuf,
    so_folder: PathBuf,
    obj_folder: PathBuf,
    debuggable: bool,
    platform_version: Option<u32>,
    build_arguments: Vec<String>,
    c_flags: Vec<String>,
    cpp_flags: Vec<String>,
}

impl GeneratorConfig {
    pub fn builder(
        variant_name: impl Into<String>,
        makefile: impl Into<PathBuf>,
        ndk_folder: impl Into<PathBuf>,
        json_folder: impl Into<PathBuf>,
    ) -> GeneratorConfigBuilder {
        let json_folder = json_folder.into();
        GeneratorConfigBuilder {
            abi_filters: Vec::new(),
            config: GeneratorConfig {
                variant_name: variant_name.into(),
                abis: Vec::new(),
                makefile: makefile.into(),
                ndk_folder: ndk_folder.into(),
                sdk_folder: None,
                cmake_folder: None,
                so_folder: json_folder.join("lib"),
                obj_folder: json_folder.join("obj"),
                json_folder,
                debuggable: false,
                platform_version: None,
                build_arguments: Vec::new(),
                c_flags: Vec::new(),
                cpp_flags: Vec::new(),
            },
        }
    }

    pub fn variant_name(&self) -> &str {
        &self.variant_name
    }

    pub fn abis(&self) -> &[String] {
        &self.abis
    }

    pub fn makefile(&self) -> &Path {
        &self.makefile
    }

    pub fn ndk_folder(&self) -> &Path {
        &self.ndk_folder
    }

    pub fn sdk_folder(&self) -> Option<&Path> {
        self.sdk_folder.as_deref()
    }

    /// Explicit CMake install, or `<sdk>/cmake` when only the SDK is known.
    pub fn cmake_folder(&self) -> Option<PathBuf> {
        self.cmake_folder
            .clone()
            .or_else(|| self.sdk_folder.as_ref().map(|sdk| sdk.join("cmake")))
    }

    pub fn json_folder(&self) -> &Path {
        &self.json_folder
    }

    pub fn so_folder(&self) -> &Path {
        &self.so_folder
    }

    pub fn obj_folder(&self) -> &Path {
        &self.obj_folder
    }

    pub fn debuggable(&self) -> bool {
        self.debuggable
    }

    pub fn platform_version(&self) -> Option<u32> {
        self.platform_version
    }

    pub fn build_arguments(&self) -> &[String] {
        &self.build_arguments
    }

    pub fn c_flags(&self) -> &[String] {
        &self.c_flags
    }

    pub fn cpp_flags(&self) -> &[String] {
        &self.cpp_flags
    }

    /// `<json folder>/<abi>`
    pub fn output_folder(&self, abi: &str) -> PathBuf {
        self.json_folder.join(abi)
    }

    /// `<json folder>/<abi>/android_gradle_build.json`
    pub fn output_json(&self, abi: &str) -> PathBuf {
        self.output_folder(abi).join("android_gradle_build.json")
    }

    /// One JSON per configured ABI, in ABI order.
    pub fn output_jsons(&self) -> Vec<PathBuf> {
        self.abis.iter().map(|abi| self.output_json(abi)).collect()
    }
}

#[derive(Clone, Debug)]
pub struct GeneratorConfigBuilder {
    abi_filters: Vec<String>,
    config: GeneratorConfig,
}

impl GeneratorConfigBuilder {
    pub fn abi_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.abi_filters = filters.into_iter().map(Into::into).collect();
        self
    }

    pub fn sdk_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.config.sdk_folder = Some(folder.into());
        self
    }

    pub fn cmake_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.config.cmake_folder = Some(folder.into());
        self
    }

    pub fn so_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.config.so_folder = folder.into();
        self
    }

    pub fn obj_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.config.obj_folder = folder.into();
        self
    }

    pub fn debuggable(mut self, debuggable: bool) -> Self {
        self.config.debuggable = debuggable;
        self
    }

    pub fn platform_version(mut self, api: u32) -> Self {
        self.config.platform_version = Some(api);
        self
    }

    pub fn build_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.build_arguments = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn c_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.c_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn cpp_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.cpp_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(mut self) -> Result<GeneratorConfig, NativeBuildError> {
        self.config.abis = resolve_abi_filters(self.abi_filters)?;
        Ok(self.config)
    }
}
