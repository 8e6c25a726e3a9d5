use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;

use crate::build_system::{JsonGenerator, NativeBuildSystem};
use crate::config::GeneratorConfig;
use crate::model::NativeBuildConfigValue;
use crate::runner::CommandRunner;
use crate::NativeBuildError;

/// Why a per-ABI JSON is regenerated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RebuildReason {
    Forced,
    MissingJson,
    /// The existing JSON could not be read back.
    UnreadableJson { error: String },
    BuildFileChanged { path: PathBuf },
    BuildFileMissing { path: PathBuf },
    MissingCommandFile,
    CommandChanged,
}

/// What happened to one ABI during [`NativeJsonGenerator::build`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AbiOutcome {
    pub abi: String,
    pub json: PathBuf,
    /// Empty when the JSON was up to date.
    pub reasons: Vec<RebuildReason>,
    /// Set when regeneration failed.
    pub error: Option<String>,
}

impl AbiOutcome {
    pub fn regenerated(&self) -> bool {
        !self.reasons.is_empty() && self.error.is_none()
    }
}

/// Keeps `<json folder>/<abi>/android_gradle_build.json` up to date for every
/// configured ABI.
#[derive(Debug)]
pub struct NativeJsonGenerator<R> {
    config: GeneratorConfig,
    generator: Box<dyn JsonGenerator>,
    runner: R,
}

impl<R: CommandRunner> NativeJsonGenerator<R> {
    pub fn new(config: GeneratorConfig, build_system: NativeBuildSystem, runner: R) -> Self {
        Self::with_generator(config, build_system.generator(), runner)
    }

    pub fn with_generator(
        config: GeneratorConfig,
        generator: Box<dyn JsonGenerator>,
        runner: R,
    ) -> Self {
        Self {
            config,
            generator,
            runner,
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn build_system(&self) -> NativeBuildSystem {
        self.generator.build_system()
    }

    /// `<json folder>/<abi>/<build system>_build_command.txt`
    pub fn command_file(&self, abi: &str) -> PathBuf {
        self.config
            .output_folder(abi)
            .join(format!("{}_build_command.txt", self.build_system().name()))
    }

    /// `<json folder>/<abi>/<build system>_build_output.txt`
    pub fn output_file(&self, abi: &str) -> PathBuf {
        self.config
            .output_folder(abi)
            .join(format!("{}_build_output.txt", self.build_system().name()))
    }

    pub fn configuration_errors(&self) -> Vec<String> {
        let mut messages = Vec::new();
        if !self.config.ndk_folder().is_dir() {
            messages.push(format!(
                "NDK not configured ({}). Add ndk.dir=path/to/ndk in local.properties.",
                self.config.ndk_folder().display()
            ));
        }
        if self.config.abis().is_empty() {
            messages.push("No ABIs specified".to_string());
        }
        messages.extend(self.generator.configuration_errors(&self.config));
        messages
    }

    /// Regenerate every stale JSON.
    ///
    /// Configuration errors stop the build before any ABI runs. A failing
    /// ABI does not stop the others; once all ABIs ran, the first failure
    /// is returned.
    pub fn build(&self, force: bool) -> Result<Vec<AbiOutcome>, NativeBuildError> {
        let errors = self.configuration_errors();
        if !errors.is_empty() {
            return Err(NativeBuildError::Configuration(errors));
        }

        tracing::info!(
            target = "apkpack.native",
            variant = %self.config.variant_name(),
            build_system = %self.build_system(),
            abis = ?self.config.abis(),
            force,
            "bringing native build JSONs up to date"
        );

        let mut outcomes = Vec::with_capacity(self.config.abis().len());
        let mut first_error = None;
        for abi in self.config.abis() {
            let json = self.config.output_json(abi);
            let (reasons, result) = match self.build_abi(abi, force) {
                Ok(reasons) => (reasons, Ok(())),
                Err((reasons, err)) => (reasons, Err(err)),
            };
            let error = match result {
                Ok(()) => None,
                Err(err) => {
                    tracing::info!(
                        target = "apkpack.native",
                        abi = %abi,
                        error = %err,
                        "native JSON generation failed"
                    );
                    let message = err.to_string();
                    first_error.get_or_insert(err);
                    Some(message)
                }
            };
            outcomes.push(AbiOutcome {
                abi: abi.clone(),
                json,
                reasons,
                error,
            });
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(outcomes),
        }
    }

    #[allow(clippy::type_complexity)]
    fn build_abi(
        &self,
        abi: &str,
        force: bool,
    ) -> Result<Vec<RebuildReason>, (Vec<RebuildReason>, NativeBuildError)> {
        let json = self.config.output_json(abi);
        let command = self.generator.command(&self.config, abi);
        let command_text = command.to_command_text();
        let command_file = self.command_file(abi);

        let reasons = self
            .rebuild_reasons(&json, &command_file, &command_text, force)
            .map_err(|err| (Vec::new(), err))?;
        if reasons.is_empty() {
            tracing::debug!(
                target = "apkpack.native",
                abi = %abi,
                json = %json.display(),
                "native JSON is up to date"
            );
            return Ok(reasons);
        }
        for reason in &reasons {
            log_reason(abi, &json, reason);
        }

        let result = self.regenerate(abi, &json, &command, &command_text, &command_file);
        match result {
            Ok(()) => Ok(reasons),
            Err(err) => Err((reasons, err)),
        }
    }

    fn regenerate(
        &self,
        abi: &str,
        json: &Path,
        command: &apkpack_process::CommandSpec,
        command_text: &str,
        command_file: &Path,
    ) -> Result<(), NativeBuildError> {
        let folder = self.config.output_folder(abi);
        fs::create_dir_all(&folder).map_err(|err| NativeBuildError::io(&folder, err))?;

        tracing::info!(
            target = "apkpack.native",
            abi = %abi,
            command = %command,
            "executing {}",
            self.build_system()
        );
        let output = self
            .runner
            .run(command)
            .map_err(|err| NativeBuildError::Process {
                abi: abi.to_string(),
                source: Box::new(err),
            })?;

        let output_file = self.output_file(abi);
        fs::write(&output_file, &output).map_err(|err| NativeBuildError::io(&output_file, err))?;

        self.generator
            .process_build_output(&self.config, abi, &output)?;

        if !json.exists() {
            return Err(NativeBuildError::JsonNotCreated(json.to_path_buf()));
        }

        fs::write(command_file, command_text)
            .map_err(|err| NativeBuildError::io(command_file, err))?;
        Ok(())
    }

    fn rebuild_reasons(
        &self,
        json: &Path,
        command_file: &Path,
        command_text: &str,
        force: bool,
    ) -> Result<Vec<RebuildReason>, NativeBuildError> {
        let mut reasons = Vec::new();
        if force {
            reasons.push(RebuildReason::Forced);
        }

        match fs::read(command_file) {
            Ok(previous) if previous == command_text.as_bytes() => {}
            Ok(_) => reasons.push(RebuildReason::CommandChanged),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                reasons.push(RebuildReason::MissingCommandFile)
            }
            Err(err) => return Err(NativeBuildError::io(command_file, err)),
        }

        reasons.extend(build_file_reasons(json, self.config.variant_name())?);
        Ok(reasons)
    }

    /// Parse every per-ABI JSON.
    ///
    /// ABIs whose JSON was never produced get a placeholder listing only
    /// the makefile. Existing JSONs come after the placeholders.
    pub fn read_existing_configurations(
        &self,
    ) -> Result<Vec<NativeBuildConfigValue>, NativeBuildError> {
        let mut result = Vec::new();
        let mut existing = Vec::new();
        for json in self.config.output_jsons() {
            if json.exists() {
                existing.push(json);
            } else {
                result.push(NativeBuildConfigValue::fallback(self.config.makefile()));
            }
        }
        for json in existing {
            result.push(NativeBuildConfigValue::read(
                &json,
                self.config.variant_name(),
            )?);
        }
        Ok(result)
    }
}

/// Staleness of `json` with respect to the build files it declares.
fn build_file_reasons(json: &Path, variant: &str) -> Result<Vec<RebuildReason>, NativeBuildError> {
    let json_modified = match fs::metadata(json) {
        Ok(meta) => modified(&meta),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(vec![RebuildReason::MissingJson])
        }
        Err(err) => return Err(NativeBuildError::io(json, err)),
    };

    let config = match NativeBuildConfigValue::read(json, variant) {
        Ok(config) => config,
        Err(err @ NativeBuildError::Json { .. }) => {
            return Ok(vec![RebuildReason::UnreadableJson {
                error: err.to_string(),
            }])
        }
        Err(err) => return Err(err),
    };

    let mut reasons = Vec::new();
    for build_file in config.build_files.iter().flatten() {
        match fs::metadata(build_file) {
            Ok(meta) if modified(&meta) > json_modified => {
                reasons.push(RebuildReason::BuildFileChanged {
                    path: build_file.clone(),
                });
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                reasons.push(RebuildReason::BuildFileMissing {
                    path: build_file.clone(),
                });
            }
            Err(err) => return Err(NativeBuildError::io(build_file, err)),
        }
    }
    Ok(reasons)
}

fn modified(meta: &fs::Metadata) -> SystemTime {
    meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)
}

fn log_reason(abi: &str, json: &Path, reason: &RebuildReason) {
    match reason {
        RebuildReason::Forced => tracing::debug!(
            target = "apkpack.native",
            abi = %abi,
            json = %json.display(),
            "regenerating: forced"
        ),
        RebuildReason::MissingJson => tracing::debug!(
            target = "apkpack.native",
            abi = %abi,
            json = %json.display(),
            "regenerating: JSON does not exist"
        ),
        RebuildReason::UnreadableJson { error } => tracing::debug!(
            target = "apkpack.native",
            abi = %abi,
            json = %json.display(),
            error = %error,
            "regenerating: JSON is unreadable"
        ),
        RebuildReason::BuildFileChanged { path } => tracing::debug!(
            target = "apkpack.native",
            abi = %abi,
            json = %json.display(),
            build_file = %path.display(),
            "regenerating: build file is newer than the JSON"
        ),
        RebuildReason::BuildFileMissing { path } => tracing::debug!(
            target = "apkpack.native",
            abi = %abi,
            json = %json.display(),
            build_file = %path.display(),
            "regenerating: build file no longer exists"
        ),
        RebuildReason::MissingCommandFile => tracing::debug!(
            target = "apkpack.native",
            abi = %abi,
            json = %json.display(),
            "regenerating: no previous command recorded"
        ),
        RebuildReason::CommandChanged => tracing::debug!(
            target = "apkpack.native",
            abi = %abi,
            json = %json.display(),
            "regenerating: command changed"
        ),
    }
}
