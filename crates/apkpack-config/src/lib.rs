//! `apkpack.toml` loading and tracing setup.
//!
//! ```toml
//! [logging]
//! level = "apkpack.native=debug,info"
//! json = false
//!
//! [packaging]
//! no_compress = [".png", ".ogg"]
//! abi_filters = ["arm64-v8a", "x86_64"]
//! jni_debug = false
//!
//! [instant_run]
//! plugin_version = "2.3.0"
//! ```
//!
//! Every section and key is optional.

mod logging;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

pub use logging::init_tracing;

/// File name looked up by [`ApkpackConfig::load_for_project`].
pub const CONFIG_FILE_NAME: &str = "apkpack.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApkpackConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub packaging: PackagingConfig,

    #[serde(default)]
    pub instant_run: InstantRunConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// A level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,

    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to this file. Unopenable files disable file logging only.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The configured filter with `RUST_LOG` merged in.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagingConfig {
    /// Entry name suffixes stored without compression.
    #[serde(default)]
    pub no_compress: Vec<String>,

    /// ABIs whose native libraries are packaged. Empty accepts every ABI.
    #[serde(default)]
    pub abi_filters: Vec<String>,

    /// Also package `gdbserver`/`gdb.setup` for native debugging.
    #[serde(default)]
    pub jni_debug: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantRunConfig {
    /// Version recorded in build-info; build info from another version is
    /// discarded. Defaults to the tool version.
    #[serde(default)]
    pub plugin_version: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` quotes the offending source line.
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

/// Redact quoted values from a TOML error message.
fn sanitize_toml_error_message(message: &str) -> String {
    static QUOTED_STRING_RE: OnceLock<Option<regex::Regex>> = OnceLock::new();

    let re = QUOTED_STRING_RE.get_or_init(|| regex::Regex::new(r#""(?:\\.|[^"\\])*""#).ok());
    match re {
        Some(re) => re.replace_all(message, r#""<redacted>""#).into_owned(),
        None => message.to_owned(),
    }
}

impl ApkpackConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Load `<dir>/apkpack.toml`, or the defaults when there is none.
    pub fn load_for_project(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = dir.as_ref().join(CONFIG_FILE_NAME);
        if !path.is_file() {
            tracing::debug!(
                target = "apkpack.config",
                path = %path.display(),
                "no config file; using defaults"
            );
            return Ok(Self::default());
        }
        Self::load_from_path(path)
    }

    /// Parse `text`, also returning keys that were not recognized
    /// (`section.key`, sorted).
    pub fn load_from_str_with_unknown_keys(text: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut unknown = Vec::<String>::new();
        let deserializer = toml::de::Deserializer::new(text);
        let config = serde_ignored::deserialize(deserializer, |path| {
            unknown.push(path.to_string().trim_start_matches('.').to_owned());
        })?;
        unknown.sort();
        unknown.dedup();
        Ok((config, unknown))
    }
}
