use anyhow::{Context, Result};
use apkpack_config::ApkpackConfig;
use apkpack_files::FileStatus;
use apkpack_instant_run::{
    check_manifest_crc, verify_class_bytes, BuildContext, ColdswapMode, VerifierStatus,
};
use apkpack_native::{
    GeneratorConfig, NativeBuildSystem, NativeJsonGenerator, ProcessCommandRunner,
};
use apkpack_package::{DexPackagingPolicy, PackagingJob, PackagingSession, SaveDataRegistry};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "apkpack",
    version,
    about = "Incremental APK packaging and Instant Run checks"
)]
struct Cli {
    /// Config file (defaults to ./apkpack.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write or update a package from dex, resource, asset and native inputs
    Package(PackageArgs),
    /// Bring the per-ABI native build JSON files up to date
    NativeJson(NativeJsonArgs),
    /// Print the build history stored in a build-info file
    BuildInfo(BuildInfoArgs),
    /// Check whether a class change can be hot swapped
    VerifyClass(VerifyClassArgs),
    /// Compare the manifest CRC of a resources archive with the previous build
    ManifestCrc(ManifestCrcArgs),
}

#[derive(Args)]
struct PackageArgs {
    /// Package to write
    #[arg(long)]
    output: PathBuf,
    /// Directory holding the incremental state
    #[arg(long)]
    incremental_dir: PathBuf,
    /// Folder of dex files (repeatable)
    #[arg(long = "dex")]
    dex_folders: Vec<PathBuf>,
    /// Java resource directory or jar (repeatable)
    #[arg(long = "java-resource")]
    java_resources: Vec<PathBuf>,
    /// Assets directory
    #[arg(long)]
    assets: Option<PathBuf>,
    /// Processed resources archive
    #[arg(long)]
    resources: Option<PathBuf>,
    /// Folder of native libraries laid out as `<abi>/<lib>.so` (repeatable)
    #[arg(long = "jni")]
    jni_folders: Vec<PathBuf>,
    #[arg(long, value_enum, default_value_t = Policy::Standard)]
    policy: Policy,
    /// Accepted ABI (repeatable); overrides `packaging.abi_filters`
    #[arg(long = "abi")]
    abis: Vec<String>,
    /// Package gdbserver for native debugging
    #[arg(long)]
    jni_debug: bool,
    /// Package everything from scratch
    #[arg(long)]
    full: bool,
    /// Input added since the previous run (repeatable)
    #[arg(long = "new")]
    new_files: Vec<PathBuf>,
    /// Input modified since the previous run (repeatable)
    #[arg(long = "changed")]
    changed_files: Vec<PathBuf>,
    /// Input deleted since the previous run (repeatable)
    #[arg(long = "removed")]
    removed_files: Vec<PathBuf>,
    /// Record the package in this build-info file
    #[arg(long, requires = "api_level")]
    build_info: Option<PathBuf>,
    /// API level of the deployment target
    #[arg(long)]
    api_level: Option<u32>,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Standard,
    InstantRunShardsInSingleApk,
    InstantRunMultiApk,
}

impl From<Policy> for DexPackagingPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Standard => DexPackagingPolicy::Standard,
            Policy::InstantRunShardsInSingleApk => DexPackagingPolicy::InstantRunShardsInSingleApk,
            Policy::InstantRunMultiApk => DexPackagingPolicy::InstantRunMultiApk,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildSystemArg {
    Cmake,
    NdkBuild,
}

impl From<BuildSystemArg> for NativeBuildSystem {
    fn from(arg: BuildSystemArg) -> Self {
        match arg {
            BuildSystemArg::Cmake => NativeBuildSystem::Cmake,
            BuildSystemArg::NdkBuild => NativeBuildSystem::NdkBuild,
        }
    }
}

#[derive(Args)]
struct NativeJsonArgs {
    #[arg(long, value_enum)]
    build_system: BuildSystemArg,
    /// CMakeLists.txt or Android.mk
    #[arg(long)]
    makefile: PathBuf,
    #[arg(long)]
    ndk: PathBuf,
    #[arg(long)]
    sdk: Option<PathBuf>,
    /// CMake install (defaults to `<sdk>/cmake`)
    #[arg(long)]
    cmake: Option<PathBuf>,
    /// Folder receiving `<abi>/android_gradle_build.json`
    #[arg(long)]
    json_folder: PathBuf,
    #[arg(long)]
    so_folder: Option<PathBuf>,
    #[arg(long)]
    obj_folder: Option<PathBuf>,
    #[arg(long, default_value = "debug")]
    variant: String,
    /// ABI to generate (repeatable); all known ABIs when omitted
    #[arg(long = "abi")]
    abis: Vec<String>,
    #[arg(long)]
    debuggable: bool,
    /// Minimum platform API level
    #[arg(long)]
    platform: Option<u32>,
    /// Extra build system argument (repeatable)
    #[arg(long = "arg", allow_hyphen_values = true)]
    arguments: Vec<String>,
    #[arg(long = "cflag", allow_hyphen_values = true)]
    c_flags: Vec<String>,
    #[arg(long = "cppflag", allow_hyphen_values = true)]
    cpp_flags: Vec<String>,
    /// Regenerate even when every JSON is up to date
    #[arg(long)]
    force: bool,
    /// Only print the existing configurations; run nothing
    #[arg(long, conflicts_with = "force")]
    read_existing: bool,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct BuildInfoArgs {
    /// build-info.xml to read
    path: PathBuf,
    /// API level the history must have been recorded for
    #[arg(long)]
    api_level: u32,
    #[arg(long)]
    coldswap_mode: Option<String>,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct VerifyClassArgs {
    /// Class file of the running version
    original: PathBuf,
    /// Class file of the new version
    updated: PathBuf,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ManifestCrcArgs {
    /// Processed resources archive containing AndroidManifest.xml
    resources: PathBuf,
    /// Instant Run support directory holding the previous CRC
    #[arg(long)]
    support_dir: PathBuf,
    #[arg(long, default_value_t = 21)]
    api_level: u32,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let config = match &cli.config {
        Some(path) => ApkpackConfig::load_from_path(path)?,
        None => ApkpackConfig::load_for_project(".")?,
    };
    apkpack_config::init_tracing(&config.logging);
    tracing::debug!(
        target = "apkpack.cli",
        config = ?cli.config,
        "configuration loaded"
    );

    match cli.command {
        Command::Package(args) => package(args, &config),
        Command::NativeJson(args) => native_json(args),
        Command::BuildInfo(args) => build_info(args, &config),
        Command::VerifyClass(args) => verify_class(args),
        Command::ManifestCrc(args) => manifest_crc(args, &config),
    }
}

fn new_context(config: &ApkpackConfig) -> BuildContext {
    match &config.instant_run.plugin_version {
        Some(version) => BuildContext::new().with_plugin_version(version.clone()),
        None => BuildContext::new(),
    }
}

fn package(args: PackageArgs, config: &ApkpackConfig) -> Result<i32> {
    let abis = if args.abis.is_empty() {
        config.packaging.abi_filters.clone()
    } else {
        args.abis.clone()
    };

    let mut builder = PackagingJob::builder(&args.output, &args.incremental_dir)
        .dex_packaging_policy(args.policy.into())
        .accepted_abis(abis)
        .jni_debug(args.jni_debug || config.packaging.jni_debug)
        .no_compress(config.packaging.no_compress.iter().cloned());
    for folder in &args.dex_folders {
        builder = builder.dex_folder(folder);
    }
    for base in &args.java_resources {
        builder = builder.java_resource(base);
    }
    for folder in &args.jni_folders {
        builder = builder.jni_folder(folder);
    }
    if let Some(assets) = &args.assets {
        builder = builder.assets(assets);
    }
    if let Some(resources) = &args.resources {
        builder = builder.resource_file(resources);
    }
    let job = builder.build();

    let mut context = match (&args.build_info, args.api_level) {
        (Some(path), Some(api_level)) => {
            let mut context = new_context(config);
            context.set_api_level(api_level, None, None);
            context
                .load_from_xml_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            Some(context)
        }
        _ => None,
    };

    let registry = SaveDataRegistry::new();
    let session = PackagingSession::new(&job, &registry);
    let report = if args.full {
        session.full(context.as_mut())?
    } else {
        let mut changed = BTreeMap::new();
        for (files, status) in [
            (&args.new_files, FileStatus::New),
            (&args.changed_files, FileStatus::Changed),
            (&args.removed_files, FileStatus::Removed),
        ] {
            for file in files {
                changed.insert(absolute(file), status);
            }
        }
        session.incremental(&changed, context.as_mut())?
    };

    if let (Some(path), Some(context)) = (&args.build_info, context.as_mut()) {
        context.close()?;
        std::fs::write(path, context.to_xml_for_build_mode()?)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    if args.json {
        print_json(&report)?;
    } else {
        println!(
            "{}: {}",
            if report.full { "full" } else { "incremental" },
            report.output.display()
        );
        for (set, count) in &report.changes {
            println!("  {set}: {count}");
        }
    }
    Ok(0)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn native_json(args: NativeJsonArgs) -> Result<i32> {
    let mut builder = GeneratorConfig::builder(
        args.variant.clone(),
        &args.makefile,
        &args.ndk,
        &args.json_folder,
    )
    .abi_filters(args.abis.iter().cloned())
    .debuggable(args.debuggable)
    .build_arguments(args.arguments.iter().cloned())
    .c_flags(args.c_flags.iter().cloned())
    .cpp_flags(args.cpp_flags.iter().cloned());
    if let Some(sdk) = &args.sdk {
        builder = builder.sdk_folder(sdk);
    }
    if let Some(cmake) = &args.cmake {
        builder = builder.cmake_folder(cmake);
    }
    if let Some(so) = &args.so_folder {
        builder = builder.so_folder(so);
    }
    if let Some(obj) = &args.obj_folder {
        builder = builder.obj_folder(obj);
    }
    if let Some(api) = args.platform {
        builder = builder.platform_version(api);
    }

    let generator = NativeJsonGenerator::new(
        builder.build()?,
        args.build_system.into(),
        ProcessCommandRunner::default(),
    );

    if args.read_existing {
        let configurations = generator.read_existing_configurations()?;
        print_json(&configurations)?;
        return Ok(0);
    }

    let outcomes = generator.build(args.force)?;
    if args.json {
        print_json(&outcomes)?;
    } else {
        for outcome in &outcomes {
            if outcome.reasons.is_empty() {
                println!("{}: up to date", outcome.abi);
            } else {
                println!("{}: regenerated {}", outcome.abi, outcome.json.display());
            }
        }
    }
    Ok(0)
}

#[derive(Serialize)]
struct BuildInfoReport<'a> {
    build_id: u64,
    verifier_status: Option<VerifierStatus>,
    builds: Vec<&'a apkpack_instant_run::Build>,
}

fn build_info(args: BuildInfoArgs, config: &ApkpackConfig) -> Result<i32> {
    let coldswap_mode = args
        .coldswap_mode
        .as_deref()
        .map(str::parse::<ColdswapMode>)
        .transpose()?;
    let mut context = new_context(config);
    context.set_api_level(args.api_level, coldswap_mode, None);
    context
        .load_from_xml_file(&args.path)
        .with_context(|| format!("failed to load {}", args.path.display()))?;

    let report = BuildInfoReport {
        build_id: context.build_id(),
        verifier_status: context.verifier_status(),
        builds: context.previous_builds().collect(),
    };
    if args.json {
        print_json(&report)?;
    } else {
        println!("next build: {}", report.build_id);
        if let Some(status) = report.verifier_status {
            println!("verifier: {status}");
        }
        for build in &report.builds {
            match build.verifier_status {
                Some(status) => println!("build {} ({status})", build.build_id),
                None => println!("build {}", build.build_id),
            }
            for artifact in &build.artifacts {
                println!(
                    "  {} {}",
                    artifact.file_type.as_str(),
                    artifact.location.display()
                );
            }
        }
    }
    Ok(0)
}

#[derive(Serialize)]
struct VerifyReport {
    status: VerifierStatus,
    compatible: bool,
}

fn verify_class(args: VerifyClassArgs) -> Result<i32> {
    let original = std::fs::read(&args.original)
        .with_context(|| format!("failed to read {}", args.original.display()))?;
    let updated = std::fs::read(&args.updated)
        .with_context(|| format!("failed to read {}", args.updated.display()))?;
    let status = verify_class_bytes(&original, &updated)
        .with_context(|| format!("failed to compare {}", args.updated.display()))?;

    let report = VerifyReport {
        status,
        compatible: status == VerifierStatus::Compatible,
    };
    if args.json {
        print_json(&report)?;
    } else {
        println!("{status}");
    }
    Ok(if report.compatible { 0 } else { 1 })
}

#[derive(Serialize)]
struct ManifestReport {
    previous: Option<u32>,
    current: Option<u32>,
    changed: bool,
    build_mode: String,
}

fn manifest_crc(args: ManifestCrcArgs, config: &ApkpackConfig) -> Result<i32> {
    let mut context = new_context(config);
    context.set_api_level(args.api_level, None, None);
    let check = check_manifest_crc(&args.resources, &args.support_dir, &mut context)?;

    let report = ManifestReport {
        previous: check.previous,
        current: check.current,
        changed: check.changed(),
        build_mode: context.build_mode().to_string(),
    };
    if args.json {
        print_json(&report)?;
    } else if report.current.is_none() {
        println!("no manifest in {}", args.resources.display());
    } else if report.changed {
        println!("manifest changed ({})", report.build_mode);
    } else {
        println!("manifest unchanged");
    }
    Ok(0)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}
