use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use apkpack_process::CommandSpec;

use crate::config::GeneratorConfig;
use crate::dry_run::build_config_from_dry_run;
use crate::NativeBuildError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NativeBuildSystem {
    Cmake,
    NdkBuild,
}

impl NativeBuildSystem {
    pub fn name(self) -> &'static str {
        match self {
            NativeBuildSystem::Cmake => "cmake",
            NativeBuildSystem::NdkBuild => "ndk-build",
        }
    }

    pub fn generator(self) -> Box<dyn JsonGenerator> {
        match self {
            NativeBuildSystem::Cmake => Box::new(CmakeGenerator),
            NativeBuildSystem::NdkBuild => Box::new(NdkBuildGenerator),
        }
    }
}

impl fmt::Display for NativeBuildSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NativeBuildSystem {
    type Err = NativeBuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cmake" => Ok(NativeBuildSystem::Cmake),
            "ndk-build" => Ok(NativeBuildSystem::NdkBuild),
            other => Err(NativeBuildError::UnknownBuildSystem(other.to_string())),
        }
    }
}

/// The per-build-system half of JSON generation.
///
/// Implementations decide which command produces the JSON for an ABI.
/// Staleness checks, bookkeeping files and error isolation live in
/// [`NativeJsonGenerator`](crate::NativeJsonGenerator).
pub trait JsonGenerator: Send + Sync + fmt::Debug {
    fn build_system(&self) -> NativeBuildSystem;

    /// The command that brings `config.output_json(abi)` up to date.
    fn command(&self, config: &GeneratorConfig, abi: &str) -> CommandSpec;

    /// Problems specific to this build system.
    fn configuration_errors(&self, _config: &GeneratorConfig) -> Vec<String> {
        Vec::new()
    }

    /// Called with the captured stdout after the command succeeded.
    fn process_build_output(
        &self,
        _config: &GeneratorConfig,
        _abi: &str,
        _output: &str,
    ) -> Result<(), NativeBuildError> {
        Ok(())
    }
}

fn working_dir(config: &GeneratorConfig) -> PathBuf {
    config
        .makefile()
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf()
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// CMake writes the JSON itself through the Android Gradle Ninja generator.
#[derive(Clone, Copy, Debug, Default)]
pub struct CmakeGenerator;

impl CmakeGenerator {
    fn executable(config: &GeneratorConfig) -> PathBuf {
        let bin = config
            .cmake_folder()
            .unwrap_or_else(|| PathBuf::from("cmake"))
            .join("bin");
        if cfg!(windows) {
            bin.join("cmake.exe")
        } else {
            bin.join("cmake")
        }
    }
}

impl JsonGenerator for CmakeGenerator {
    fn build_system(&self) -> NativeBuildSystem {
        NativeBuildSystem::Cmake
    }

    fn command(&self, config: &GeneratorConfig, abi: &str) -> CommandSpec {
        let ninja = config
            .cmake_folder()
            .unwrap_or_else(|| PathBuf::from("cmake"))
            .join("bin")
            .join(if cfg!(windows) { "ninja.exe" } else { "ninja" });
        let toolchain = config
            .ndk_folder()
            .join("build")
            .join("cmake")
            .join("android.toolchain.cmake");

        let mut command = CommandSpec::new(working_dir(config), Self::executable(config)).args([
            format!("-H{}", display(&working_dir(config))),
            format!("-B{}", display(&config.output_folder(abi))),
            "-GAndroid Gradle - Ninja".to_string(),
            format!("-DANDROID_ABI={abi}"),
            format!("-DANDROID_NDK={}", display(config.ndk_folder())),
            format!(
                "-DCMAKE_LIBRARY_OUTPUT_DIRECTORY={}",
                display(&config.so_folder().join(abi))
            ),
            format!(
                "-DCMAKE_BUILD_TYPE={}",
                if config.debuggable() { "Debug" } else { "Release" }
            ),
            format!("-DCMAKE_MAKE_PROGRAM={}", display(&ninja)),
            format!("-DCMAKE_TOOLCHAIN_FILE={}", display(&toolchain)),
        ]);
        if let Some(api) = config.platform_version() {
            command = command.arg(format!("-DANDROID_PLATFORM=android-{api}"));
        }
        if !config.c_flags().is_empty() {
            command = command.arg(format!("-DCMAKE_C_FLAGS={}", config.c_flags().join(" ")));
        }
        if !config.cpp_flags().is_empty() {
            command = command.arg(format!(
                "-DCMAKE_CXX_FLAGS={}",
                config.cpp_flags().join(" ")
            ));
        }
        command.args(config.build_arguments().iter().cloned())
    }

    fn configuration_errors(&self, config: &GeneratorConfig) -> Vec<String> {
        let mut messages = Vec::new();
        match config.cmake_folder() {
            None => messages.push(
                "CMake not configured: set the SDK folder or an explicit CMake folder".to_string(),
            ),
            Some(_) => {
                let executable = Self::executable(config);
                if !executable.is_file() {
                    messages.push(format!(
                        "CMake executable '{}' does not exist",
                        executable.display()
                    ));
                }
            }
        }
        if !config.makefile().is_file() {
            messages.push(format!(
                "CMake project '{}' does not exist",
                config.makefile().display()
            ));
        }
        messages
    }
}

/// ndk-build is run with `-n`; the printed commands are converted to JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct NdkBuildGenerator;

impl NdkBuildGenerator {
    fn executable(config: &GeneratorConfig) -> PathBuf {
        let tool = if cfg!(windows) {
            "ndk-build.cmd"
        } else {
            "ndk-build"
        };
        config.ndk_folder().join(tool)
    }

    fn base_args(config: &GeneratorConfig, abi: &str) -> Vec<String> {
        let makefile = display(config.makefile());
        let mut args = vec![
            format!("NDK_PROJECT_PATH={makefile}"),
            format!("APP_BUILD_SCRIPT={makefile}"),
            // NDK_ALL_ABIS limited to this ABI keeps ndk-build from erasing
            // the outputs of the other ABIs.
            format!("APP_ABI={abi}"),
            format!("NDK_ALL_ABIS={abi}"),
            format!("NDK_DEBUG={}", if config.debuggable() { 1 } else { 0 }),
        ];
        if let Some(api) = config.platform_version() {
            args.push(format!("APP_PLATFORM=android-{api}"));
        }
        args.push(format!("NDK_OUT={}", display(&absolute(config.obj_folder()))));
        args.push(format!(
            "NDK_LIBS_OUT={}",
            display(&absolute(config.so_folder()))
        ));
        if !config.c_flags().is_empty() {
            args.push(format!("APP_CFLAGS+={}", config.c_flags().join(" ")));
        }
        if !config.cpp_flags().is_empty() {
            args.push(format!("APP_CPPFLAGS+={}", config.cpp_flags().join(" ")));
        }
        args.extend(config.build_arguments().iter().cloned());
        args
    }

    /// The real (non dry-run) build command, recorded in the JSON.
    pub fn build_command(config: &GeneratorConfig, abi: &str) -> String {
        CommandSpec::new(working_dir(config), Self::executable(config))
            .args(Self::base_args(config, abi))
            .to_string()
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

impl JsonGenerator for NdkBuildGenerator {
    fn build_system(&self) -> NativeBuildSystem {
        NativeBuildSystem::NdkBuild
    }

    fn command(&self, config: &GeneratorConfig, abi: &str) -> CommandSpec {
        CommandSpec::new(working_dir(config), Self::executable(config))
            .args(Self::base_args(config, abi))
            .arg("-n")
    }

    fn configuration_errors(&self, config: &GeneratorConfig) -> Vec<String> {
        let mut messages = Vec::new();
        if !config.makefile().exists() {
            messages.push(format!(
                "ndk-build project '{}' does not exist",
                config.makefile().display()
            ));
        }
        messages
    }

    fn process_build_output(
        &self,
        config: &GeneratorConfig,
        abi: &str,
        output: &str,
    ) -> Result<(), NativeBuildError> {
        let value = build_config_from_dry_run(
            config.makefile(),
            &Self::build_command(config, abi),
            config.variant_name(),
            output,
        );
        value.write(&config.output_json(abi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config() -> GeneratorConfig {
        GeneratorConfig::builder("debug", "/p/jni/Android.mk", "/ndk", "/p/json")
            .abi_filters(["x86"])
            .sdk_folder("/sdk")
            .so_folder("/p/build/lib")
            .obj_folder("/p/build/obj")
            .debuggable(true)
            .platform_version(21)
            .c_flags(["-DA", "-DB"])
            .build_arguments(["V=1"])
            .build()
            .unwrap()
    }

    #[test]
    fn build_system_names() {
        assert_eq!(NativeBuildSystem::NdkBuild.to_string(), "ndk-build");
        assert_eq!(
            "cmake".parse::<NativeBuildSystem>().unwrap(),
            NativeBuildSystem::Cmake
        );
        assert!("gradle".parse::<NativeBuildSystem>().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn ndk_build_dry_run_command() {
        let command = NdkBuildGenerator.command(&config(), "x86");
        assert_eq!(command.program, PathBuf::from("/ndk/ndk-build"));
        assert_eq!(command.cwd, PathBuf::from("/p/jni"));
        assert_eq!(
            command.args,
            vec![
                "NDK_PROJECT_PATH=/p/jni/Android.mk",
                "APP_BUILD_SCRIPT=/p/jni/Android.mk",
                "APP_ABI=x86",
                "NDK_ALL_ABIS=x86",
                "NDK_DEBUG=1",
                "APP_PLATFORM=android-21",
                "NDK_OUT=/p/build/obj",
                "NDK_LIBS_OUT=/p/build/lib",
                "APP_CFLAGS+=-DA -DB",
                "V=1",
                "-n",
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn cmake_command() {
        let command = CmakeGenerator.command(&config(), "x86");
        assert_eq!(command.program, PathBuf::from("/sdk/cmake/bin/cmake"));
        assert_eq!(
            command.args,
            vec![
                "-H/p/jni",
                "-B/p/json/x86",
                "-GAndroid Gradle - Ninja",
                "-DANDROID_ABI=x86",
                "-DANDROID_NDK=/ndk",
                "-DCMAKE_LIBRARY_OUTPUT_DIRECTORY=/p/build/lib/x86",
                "-DCMAKE_BUILD_TYPE=Debug",
                "-DCMAKE_MAKE_PROGRAM=/sdk/cmake/bin/ninja",
                "-DCMAKE_TOOLCHAIN_FILE=/ndk/build/cmake/android.toolchain.cmake",
                "-DANDROID_PLATFORM=android-21",
                "-DCMAKE_C_FLAGS=-DA -DB",
                "V=1",
            ]
        );
    }

    #[test]
    fn missing_project_is_a_configuration_error() {
        let errors = NdkBuildGenerator.configuration_errors(&config());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("does not exist"), "{errors:?}");
    }
}
