//! Turns the command trace printed by `ndk-build -n` into a
//! [`NativeBuildConfigValue`].
//!
//! Every command with an `-o <output>` is a build step. Steps with `-c`
//! compile their positional source arguments; other steps combine their
//! positional inputs. Outputs that no later step consumes are the libraries.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::model::{
    NativeBuildConfigValue, NativeLibraryValue, NativeSourceFileValue, NativeToolchainValue,
};

const C_EXTENSIONS: &[&str] = &["c"];
const CPP_EXTENSIONS: &[&str] = &["cc", "cp", "cpp", "cxx", "c++"];

/// Compiler options whose value is the following token.
const OPTIONS_WITH_VALUE: &[&str] = &[
    "-o",
    "-MF",
    "-MT",
    "-MQ",
    "-target",
    "-isystem",
    "-include",
    "-x",
    "-Xlinker",
    "--sysroot",
    "--gcc-toolchain",
];

#[derive(Debug)]
struct Step {
    executable: String,
    output: String,
    compile: bool,
    inputs: Vec<String>,
    flags: Vec<String>,
}

pub(crate) fn build_config_from_dry_run(
    makefile: &Path,
    build_command: &str,
    variant_name: &str,
    dry_run: &str,
) -> NativeBuildConfigValue {
    let steps: Vec<Step> = dry_run.lines().filter_map(parse_step).collect();

    let mut by_output: HashMap<&str, &Step> = HashMap::new();
    let mut consumed: HashSet<&str> = HashSet::new();
    for step in &steps {
        by_output.insert(&step.output, step);
        consumed.extend(step.inputs.iter().map(String::as_str));
    }

    let mut libraries = BTreeMap::new();
    let mut toolchains: BTreeMap<String, NativeToolchainValue> = BTreeMap::new();
    let mut c_extensions = BTreeSet::new();
    let mut cpp_extensions = BTreeSet::new();
    let mut terminals = BTreeSet::new();

    for step in &steps {
        if consumed.contains(step.output.as_str()) || !terminals.insert(step.output.as_str()) {
            continue;
        }
        let output = Path::new(&step.output);
        let abi = output
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let artifact_name = output
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let toolchain_name = format!("toolchain-{abi}");

        let mut files = Vec::new();
        let mut visited = HashSet::new();
        for compile in compile_steps(step, &by_output, &mut visited) {
            for source in &compile.inputs {
                let extension = Path::new(source)
                    .extension()
                    .map(|ext| ext.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let toolchain = toolchains.entry(toolchain_name.clone()).or_default();
                if C_EXTENSIONS.contains(&extension.as_str()) {
                    toolchain.c_compiler_executable = Some(PathBuf::from(&compile.executable));
                    c_extensions.insert(extension);
                } else if CPP_EXTENSIONS.contains(&extension.as_str()) {
                    toolchain.cpp_compiler_executable = Some(PathBuf::from(&compile.executable));
                    cpp_extensions.insert(extension);
                }
                files.push(NativeSourceFileValue {
                    src: Some(PathBuf::from(source)),
                    flags: Some(quote_flags(&compile.flags)),
                });
            }
        }

        libraries.insert(
            format!("{artifact_name}-{variant_name}-{abi}"),
            NativeLibraryValue {
                build_command: Some(format!("{build_command} {}", step.output)),
                toolchain: Some(toolchain_name),
                abi: Some(abi),
                artifact_name: Some(artifact_name),
                files: Some(files),
                output: Some(PathBuf::from(&step.output)),
                ..NativeLibraryValue::default()
            },
        );
    }

    NativeBuildConfigValue {
        build_files: Some(vec![makefile.to_path_buf()]),
        clean_commands: Some(vec![format!("{build_command} clean")]),
        libraries: Some(libraries),
        toolchains: Some(toolchains),
        c_file_extensions: Some(c_extensions.into_iter().collect()),
        cpp_file_extensions: Some(cpp_extensions.into_iter().collect()),
    }
}

/// Compile steps that contribute to `step`, including `step` itself.
fn compile_steps<'a>(
    step: &'a Step,
    by_output: &HashMap<&str, &'a Step>,
    visited: &mut HashSet<&'a str>,
) -> Vec<&'a Step> {
    if !visited.insert(&step.output) {
        return Vec::new();
    }
    if step.compile {
        return vec![step];
    }
    let mut result = Vec::new();
    for input in &step.inputs {
        if let Some(producer) = by_output.get(input.as_str()) {
            result.extend(compile_steps(*producer, by_output, visited));
        }
    }
    result
}

fn parse_step(line: &str) -> Option<Step> {
    let mut tokens = tokenize(line).into_iter();
    let executable = tokens.next()?;
    let tokens: Vec<String> = tokens.collect();

    let mut output = None;
    let mut compile = false;
    let mut inputs = Vec::new();
    let mut flags = Vec::new();
    let mut iter = tokens.into_iter();
    while let Some(token) = iter.next() {
        if token == "-c" {
            compile = true;
        } else if token == "-o" {
            output = iter.next();
        } else if OPTIONS_WITH_VALUE.contains(&token.as_str()) {
            flags.push(token);
            flags.extend(iter.next());
        } else if token.starts_with('-') {
            flags.push(token);
        } else {
            inputs.push(token);
        }
    }

    Some(Step {
        executable,
        output: output?,
        compile,
        inputs,
        flags,
    })
}

/// Whitespace-separated words with single and double quotes grouping.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    for ch in line.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None if ch == '"' || ch == '\'' => {
                quote = Some(ch);
                in_token = true;
            }
            None if ch.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(ch);
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

fn quote_flags(flags: &[String]) -> String {
    flags
        .iter()
        .map(|flag| format!("\"{flag}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MAKEFILE: &str = "/projects/MyProject/jni/Android.mk";

    fn convert(dry_run: &str) -> NativeBuildConfigValue {
        build_config_from_dry_run(Path::new(MAKEFILE), "echo build command", "debug", dry_run)
    }

    #[test]
    fn one_library_per_abi() {
        let value = convert(
            "g++ -c a.c -o x86_64/a.o\n\
             g++ x86_64/a.o -o x86_64/a.so\n\
             g++ -c a.c -o x86/a.o\n\
             g++ x86/a.o -o x86/a.so",
        );

        assert_eq!(value.build_files, Some(vec![PathBuf::from(MAKEFILE)]));
        assert_eq!(
            value.clean_commands,
            Some(vec!["echo build command clean".to_string()])
        );
        let libraries = value.libraries.unwrap();
        assert_eq!(
            libraries.keys().collect::<Vec<_>>(),
            vec!["a-debug-x86", "a-debug-x86_64"]
        );
        assert_eq!(
            libraries["a-debug-x86_64"],
            NativeLibraryValue {
                build_command: Some("echo build command x86_64/a.so".into()),
                toolchain: Some("toolchain-x86_64".into()),
                abi: Some("x86_64".into()),
                artifact_name: Some("a".into()),
                files: Some(vec![NativeSourceFileValue {
                    src: Some(PathBuf::from("a.c")),
                    flags: Some(String::new()),
                }]),
                output: Some(PathBuf::from("x86_64/a.so")),
                ..NativeLibraryValue::default()
            }
        );
        assert_eq!(
            value.toolchains.unwrap()["toolchain-x86"].c_compiler_executable,
            Some(PathBuf::from("g++"))
        );
        assert_eq!(value.c_file_extensions, Some(vec!["c".to_string()]));
        assert_eq!(value.cpp_file_extensions, Some(Vec::new()));
    }

    #[test]
    fn unlinked_object_is_its_own_library() {
        let value = convert("g++ -c a.c -o x/aa.o -Isome-include-path\n");
        let libraries = value.libraries.unwrap();
        let library = &libraries["aa-debug-x"];
        assert_eq!(library.output, Some(PathBuf::from("x/aa.o")));
        assert_eq!(
            library.files.as_ref().unwrap()[0].flags.as_deref(),
            Some("\"-Isome-include-path\"")
        );
    }

    #[test]
    fn link_collects_every_compiled_source() {
        let value = convert(
            "mkdir -p obj/local/x86\n\
             clang++ -fPIC -c jni/main.cpp -o obj/x86/main.o\n\
             clang -c \"jni/util file.c\" -o obj/x86/util.o\n\
             clang++ obj/x86/main.o obj/x86/util.o -shared -o libs/x86/libhello.so\n",
        );
        let libraries = value.libraries.unwrap();
        assert_eq!(libraries.len(), 1);
        let library = &libraries["libhello-debug-x86"];
        let sources: Vec<_> = library
            .files
            .iter()
            .flatten()
            .filter_map(|file| file.src.clone())
            .collect();
        assert_eq!(
            sources,
            vec![PathBuf::from("jni/main.cpp"), PathBuf::from("jni/util file.c")]
        );
        let toolchain = &value.toolchains.unwrap()["toolchain-x86"];
        assert_eq!(toolchain.c_compiler_executable, Some(PathBuf::from("clang")));
        assert_eq!(
            toolchain.cpp_compiler_executable,
            Some(PathBuf::from("clang++"))
        );
        assert_eq!(value.cpp_file_extensions, Some(vec!["cpp".to_string()]));
    }

    #[test]
    fn tokenizer_groups_quotes() {
        assert_eq!(
            tokenize("gcc  -DNAME='a b' \"x y\".c ''"),
            vec!["gcc", "-DNAME=a b", "x y.c", ""]
        );
    }
}
