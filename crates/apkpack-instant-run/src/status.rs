use crate::error::InstantRunError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of comparing a build with the previous one.
///
/// Names are persisted in build-info files and read back by the deployment
/// client; they must not change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerifierStatus {
    Compatible,
    NotRun,
    InstantRunDisabled,
    InstantRunFailure,
    ClassAdded,
    ParentClassChanged,
    ImplementedInterfacesChange,
    ClassAnnotationChange,
    StaticInitializerChange,
    MethodAnnotationChange,
    MethodDeleted,
    MethodAdded,
    FieldAdded,
    FieldRemoved,
    FieldTypeChange,
    RClassChange,
    ReflectionUsed,
    JavaResourcesChanged,
    DependencyChanged,
    BinaryManifestFileChange,
    ManifestFileChange,
    ColdSwapRequested,
    FullBuildRequested,
    InitialBuild,
}

impl VerifierStatus {
    pub const ALL: [VerifierStatus; 24] = [
        VerifierStatus::Compatible,
        VerifierStatus::NotRun,
        VerifierStatus::InstantRunDisabled,
        VerifierStatus::InstantRunFailure,
        VerifierStatus::ClassAdded,
        VerifierStatus::ParentClassChanged,
        VerifierStatus::ImplementedInterfacesChange,
        VerifierStatus::ClassAnnotationChange,
        VerifierStatus::StaticInitializerChange,
        VerifierStatus::MethodAnnotationChange,
        VerifierStatus::MethodDeleted,
        VerifierStatus::MethodAdded,
        VerifierStatus::FieldAdded,
        VerifierStatus::FieldRemoved,
        VerifierStatus::FieldTypeChange,
        VerifierStatus::RClassChange,
        VerifierStatus::ReflectionUsed,
        VerifierStatus::JavaResourcesChanged,
        VerifierStatus::DependencyChanged,
        VerifierStatus::BinaryManifestFileChange,
        VerifierStatus::ManifestFileChange,
        VerifierStatus::ColdSwapRequested,
        VerifierStatus::FullBuildRequested,
        VerifierStatus::InitialBuild,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            VerifierStatus::Compatible => "COMPATIBLE",
            VerifierStatus::NotRun => "NOT_RUN",
            VerifierStatus::InstantRunDisabled => "INSTANT_RUN_DISABLED",
            VerifierStatus::InstantRunFailure => "INSTANT_RUN_FAILURE",
            VerifierStatus::ClassAdded => "CLASS_ADDED",
            VerifierStatus::ParentClassChanged => "PARENT_CLASS_CHANGED",
            VerifierStatus::ImplementedInterfacesChange => "IMPLEMENTED_INTERFACES_CHANGE",
            VerifierStatus::ClassAnnotationChange => "CLASS_ANNOTATION_CHANGE",
            VerifierStatus::StaticInitializerChange => "STATIC_INITIALIZER_CHANGE",
            VerifierStatus::MethodAnnotationChange => "METHOD_ANNOTATION_CHANGE",
            VerifierStatus::MethodDeleted => "METHOD_DELETED",
            VerifierStatus::MethodAdded => "METHOD_ADDED",
            VerifierStatus::FieldAdded => "FIELD_ADDED",
            VerifierStatus::FieldRemoved => "FIELD_REMOVED",
            VerifierStatus::FieldTypeChange => "FIELD_TYPE_CHANGE",
            VerifierStatus::RClassChange => "R_CLASS_CHANGE",
            VerifierStatus::ReflectionUsed => "REFLECTION_USED",
            VerifierStatus::JavaResourcesChanged => "JAVA_RESOURCES_CHANGED",
            VerifierStatus::DependencyChanged => "DEPENDENCY_CHANGED",
            VerifierStatus::BinaryManifestFileChange => "BINARY_MANIFEST_FILE_CHANGE",
            VerifierStatus::ManifestFileChange => "MANIFEST_FILE_CHANGE",
            VerifierStatus::ColdSwapRequested => "COLD_SWAP_REQUESTED",
            VerifierStatus::FullBuildRequested => "FULL_BUILD_REQUESTED",
            VerifierStatus::InitialBuild => "INITIAL_BUILD",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == name)
    }

    /// Build mode this status forces under `policy`.
    ///
    /// A device without the split/multidex loaders cannot cold swap, so every
    /// cold swap turns into a full build under
    /// [`PatchingPolicy::PreLollipop`].
    pub fn build_mode(self, policy: Option<PatchingPolicy>) -> BuildMode {
        match self {
            VerifierStatus::Compatible => BuildMode::HotWarm,
            VerifierStatus::InitialBuild
            | VerifierStatus::FullBuildRequested
            | VerifierStatus::ManifestFileChange => BuildMode::Full,
            _ if policy == Some(PatchingPolicy::PreLollipop) => BuildMode::Full,
            _ => BuildMode::Cold,
        }
    }
}

impl fmt::Display for VerifierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of the application has to be redeployed.
///
/// Ordered by severity; combining two modes keeps the more severe one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildMode {
    HotWarm,
    Cold,
    Full,
}

impl BuildMode {
    pub fn combine(self, other: BuildMode) -> BuildMode {
        self.max(other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BuildMode::HotWarm => "HOT_WARM",
            BuildMode::Cold => "COLD",
            BuildMode::Full => "FULL",
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How cold-swapped code reaches the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchingPolicy {
    /// Below API 21: no multidex support, a new APK is always installed.
    PreLollipop,
    /// Code shards are delivered as extra dex files inside the main APK.
    MultiDex,
    /// Code shards are delivered as split APKs.
    MultiApk,
}

/// First API level with native multidex support.
const LOLLIPOP: u32 = 21;
/// First API level where split APKs are the default delivery.
const MARSHMALLOW: u32 = 23;

impl PatchingPolicy {
    pub fn for_target(api_level: u32, coldswap_mode: Option<ColdswapMode>) -> Self {
        if api_level < LOLLIPOP {
            return PatchingPolicy::PreLollipop;
        }
        match coldswap_mode.unwrap_or(ColdswapMode::Auto) {
            ColdswapMode::Multidex => PatchingPolicy::MultiDex,
            ColdswapMode::Multiapk => PatchingPolicy::MultiApk,
            ColdswapMode::Auto if api_level >= MARSHMALLOW => PatchingPolicy::MultiApk,
            ColdswapMode::Auto => PatchingPolicy::MultiDex,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PatchingPolicy::PreLollipop => "PRE_LOLLIPOP",
            PatchingPolicy::MultiDex => "MULTI_DEX",
            PatchingPolicy::MultiApk => "MULTI_APK",
        }
    }
}

impl fmt::Display for PatchingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cold swap delivery requested by the user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColdswapMode {
    #[default]
    Auto,
    Multidex,
    Multiapk,
}

impl FromStr for ColdswapMode {
    type Err = InstantRunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" | "default" => Ok(ColdswapMode::Auto),
            "multidex" => Ok(ColdswapMode::Multidex),
            "multiapk" => Ok(ColdswapMode::Multiapk),
            _ => Err(InstantRunError::UnknownColdswapMode(s.to_string())),
        }
    }
}
