use serde::{Deserialize, Serialize};
use std::fmt;

/// The five disjoint categories of packaged content.
///
/// The persisted names are the `SCREAMING_SNAKE_CASE` variant names and must
/// not change: they are stored in the known-files ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InputSet {
    Dex,
    JavaResource,
    NativeResource,
    AndroidResource,
    Asset,
}

impl InputSet {
    pub const ALL: [InputSet; 5] = [
        InputSet::Dex,
        InputSet::JavaResource,
        InputSet::NativeResource,
        InputSet::AndroidResource,
        InputSet::Asset,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InputSet::Dex => "DEX",
            InputSet::JavaResource => "JAVA_RESOURCE",
            InputSet::NativeResource => "NATIVE_RESOURCE",
            InputSet::AndroidResource => "ANDROID_RESOURCE",
            InputSet::Asset => "ASSET",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|set| set.as_str() == name)
    }
}

impl fmt::Display for InputSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
