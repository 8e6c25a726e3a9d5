use crate::error::PackageError;
use crate::input_set::InputSet;
use crate::packager::{IncrementalPackager, PackagerOptions};
use crate::policy::{partition_slices, DexPackagingPolicy};
use crate::save_data::{KnownFilesSaveData, SaveDataRegistry};
use apkpack_cache::{atomic_write_with, FileCacheByPath};
use apkpack_files::{
    from_zips_and_directories, make_from_base_files, union, FileStatus, RelativeFile,
    RelativeFileChanges,
};
use apkpack_instant_run::{BuildContext, FileType};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Directory below the incremental directory holding zip snapshots.
pub const ZIP_CACHE_DIR: &str = "zip-cache";

/// Bundle of non-main dex slices packaged as a Java resource.
pub const INSTANT_RUN_ZIP: &str = "instant-run.zip";

const DEX_SUFFIX: &str = ".dex";

/// Immutable description of what to package and where.
#[derive(Clone, Debug)]
pub struct PackagingJob {
    output: PathBuf,
    incremental_dir: PathBuf,
    instant_run_support_dir: PathBuf,
    dex_folders: Vec<PathBuf>,
    java_resources: Vec<PathBuf>,
    assets: Option<PathBuf>,
    resource_file: Option<PathBuf>,
    jni_folders: Vec<PathBuf>,
    dex_packaging_policy: DexPackagingPolicy,
    options: PackagerOptions,
}

impl PackagingJob {
    pub fn builder(
        output: impl Into<PathBuf>,
        incremental_dir: impl Into<PathBuf>,
    ) -> PackagingJobBuilder {
        let incremental_dir = incremental_dir.into();
        PackagingJobBuilder {
            job: PackagingJob {
                output: output.into(),
                instant_run_support_dir: incremental_dir.join("instant-run"),
                incremental_dir,
                dex_folders: Vec::new(),
                java_resources: Vec::new(),
                assets: None,
                resource_file: None,
                jni_folders: Vec::new(),
                dex_packaging_policy: DexPackagingPolicy::Standard,
                options: PackagerOptions::default(),
            },
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn incremental_dir(&self) -> &Path {
        &self.incremental_dir
    }

    pub fn dex_packaging_policy(&self) -> DexPackagingPolicy {
        self.dex_packaging_policy
    }

    pub fn options(&self) -> &PackagerOptions {
        &self.options
    }

    /// The base files (directories or zips) feeding `set`.
    pub fn bases(&self, set: InputSet) -> Vec<PathBuf> {
        match set {
            InputSet::Dex => self.dex_folders.clone(),
            InputSet::JavaResource => self.java_resources.clone(),
            InputSet::NativeResource => self.jni_folders.clone(),
            InputSet::AndroidResource => self.resource_file.iter().cloned().collect(),
            InputSet::Asset => self.assets.iter().cloned().collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PackagingJobBuilder {
    job: PackagingJob,
}

impl PackagingJobBuilder {
    pub fn dex_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.job.dex_folders.push(folder.into());
        self
    }

    pub fn java_resource(mut self, base: impl Into<PathBuf>) -> Self {
        self.job.java_resources.push(base.into());
        self
    }

    pub fn assets(mut self, dir: impl Into<PathBuf>) -> Self {
        self.job.assets = Some(dir.into());
        self
    }

    /// The processed Android resources archive.
    pub fn resource_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.job.resource_file = Some(file.into());
        self
    }

    pub fn jni_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.job.jni_folders.push(folder.into());
        self
    }

    pub fn dex_packaging_policy(mut self, policy: DexPackagingPolicy) -> Self {
        self.job.dex_packaging_policy = policy;
        self
    }

    pub fn instant_run_support_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.job.instant_run_support_dir = dir.into();
        self
    }

    pub fn accepted_abis<I, S>(mut self, abis: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.job.options.accepted_abis = abis.into_iter().map(Into::into).collect();
        self
    }

    pub fn jni_debug(mut self, enabled: bool) -> Self {
        self.job.options.jni_debug = enabled;
        self
    }

    pub fn no_compress<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.job.options.no_compress = suffixes.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> PackagingJob {
        self.job
    }
}

/// Changes of one packaging pass, split by input category.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CategorizedChanges {
    pub dex: RelativeFileChanges,
    pub java_resources: RelativeFileChanges,
    pub assets: RelativeFileChanges,
    pub android_resources: RelativeFileChanges,
    pub native_libraries: RelativeFileChanges,
}

impl CategorizedChanges {
    pub fn get(&self, set: InputSet) -> &RelativeFileChanges {
        match set {
            InputSet::Dex => &self.dex,
            InputSet::JavaResource => &self.java_resources,
            InputSet::NativeResource => &self.native_libraries,
            InputSet::AndroidResource => &self.android_resources,
            InputSet::Asset => &self.assets,
        }
    }

    fn get_mut(&mut self, set: InputSet) -> &mut RelativeFileChanges {
        match set {
            InputSet::Dex => &mut self.dex,
            InputSet::JavaResource => &mut self.java_resources,
            InputSet::NativeResource => &mut self.native_libraries,
            InputSet::AndroidResource => &mut self.android_resources,
            InputSet::Asset => &mut self.assets,
        }
    }

    pub fn is_empty(&self) -> bool {
        InputSet::ALL.iter().all(|set| self.get(*set).is_empty())
    }
}

/// Summary of one packaging pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PackagingReport {
    pub output: PathBuf,
    pub full: bool,
    /// Number of input changes seen per category.
    pub changes: BTreeMap<InputSet, usize>,
}

impl PackagingReport {
    fn new(job: &PackagingJob, full: bool, changes: &CategorizedChanges) -> Self {
        Self {
            output: job.output.clone(),
            full,
            changes: InputSet::ALL
                .into_iter()
                .map(|set| (set, changes.get(set).len()))
                .collect(),
        }
    }
}

/// Runs full and incremental packaging passes for one [`PackagingJob`].
pub struct PackagingSession<'a> {
    job: &'a PackagingJob,
    registry: &'a SaveDataRegistry,
    zip_cache: FileCacheByPath,
}

impl<'a> PackagingSession<'a> {
    pub fn new(job: &'a PackagingJob, registry: &'a SaveDataRegistry) -> Self {
        Self {
            job,
            registry,
            zip_cache: FileCacheByPath::new(job.incremental_dir.join(ZIP_CACHE_DIR)),
        }
    }

    pub fn zip_cache(&self) -> &FileCacheByPath {
        &self.zip_cache
    }

    /// Package every input from scratch, discarding all incremental state.
    pub fn full(&self, context: Option<&mut BuildContext>) -> Result<PackagingReport, PackageError> {
        self.zip_cache.clear()?;
        clear_directory(&self.job.incremental_dir)?;
        match fs::remove_file(&self.job.output) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(PackageError::io(&self.job.output, err)),
        }

        let mut changes = CategorizedChanges::default();
        for set in InputSet::ALL {
            *changes.get_mut(set) = from_zips_and_directories(self.job.bases(set))?;
        }
        self.package(&changes, context)?;

        let shared = self.registry.make(&self.job.incremental_dir)?;
        let mut save_data = shared.lock();
        for set in InputSet::ALL {
            save_data.set_input_set(changes.get(set).keys(), set);
        }
        save_data.save_current_data()?;

        tracing::info!(
            target = "apkpack.package",
            output = %self.job.output.display(),
            files = save_data.len(),
            "full package written"
        );
        Ok(PackagingReport::new(self.job, true, &changes))
    }

    /// Package the inputs that changed since the previous pass.
    ///
    /// `changed_inputs` are absolute paths as reported by the host: either
    /// zip bases themselves or files below a base directory.
    pub fn incremental(
        &self,
        changed_inputs: &BTreeMap<PathBuf, FileStatus>,
        context: Option<&mut BuildContext>,
    ) -> Result<PackagingReport, PackageError> {
        fs::create_dir_all(&self.job.incremental_dir)
            .map_err(|err| PackageError::io(&self.job.incremental_dir, err))?;
        let shared = self.registry.make(&self.job.incremental_dir)?;
        let mut save_data = shared.lock();

        let mut changes = CategorizedChanges::default();
        for set in InputSet::ALL {
            *changes.get_mut(set) = self.changed_inputs(changed_inputs, &save_data, set)?;
        }
        if changes.is_empty() {
            tracing::debug!(
                target = "apkpack.package",
                output = %self.job.output.display(),
                "no input changes; package left as is"
            );
            return Ok(PackagingReport::new(self.job, false, &changes));
        }
        self.package(&changes, context)?;

        // Deleted zips no longer need a snapshot to diff against.
        for path in changed_inputs.keys().filter(|path| !path.exists()) {
            self.zip_cache.remove(path)?;
        }

        for set in InputSet::ALL {
            let all = from_zips_and_directories(self.job.bases(set))?;
            save_data.set_input_set(all.keys(), set);
        }
        save_data.save_current_data()?;

        tracing::info!(
            target = "apkpack.package",
            output = %self.job.output.display(),
            dex = changes.dex.len(),
            java_resources = changes.java_resources.len(),
            assets = changes.assets.len(),
            android_resources = changes.android_resources.len(),
            native_libraries = changes.native_libraries.len(),
            "incremental package written"
        );
        Ok(PackagingReport::new(self.job, false, &changes))
    }

    /// Changes of `set` derived from the host's change list.
    ///
    /// Deleted paths are routed through the ledger because they can no
    /// longer be attributed by looking at the filesystem. Deleted zip bases
    /// are the exception: their entries are known from the zip cache.
    fn changed_inputs(
        &self,
        changed_inputs: &BTreeMap<PathBuf, FileStatus>,
        save_data: &KnownFilesSaveData,
        set: InputSet,
    ) -> Result<RelativeFileChanges, PackageError> {
        let bases = self.job.bases(set);

        let deleted: BTreeSet<PathBuf> = changed_inputs
            .iter()
            .filter(|(_, status)| **status == FileStatus::Removed)
            .map(|(path, _)| path.clone())
            .collect();
        let mut changes: RelativeFileChanges = save_data
            .find(&deleted, set)
            .into_iter()
            .map(|file| (file, FileStatus::Removed))
            .collect();

        let updates: BTreeMap<PathBuf, FileStatus> = changed_inputs
            .iter()
            .filter(|(path, status)| **status != FileStatus::Removed || bases.contains(*path))
            .map(|(path, status)| (path.clone(), *status))
            .collect();
        changes.extend(make_from_base_files(&bases, &updates, &self.zip_cache)?);
        Ok(changes)
    }

    fn package(
        &self,
        changes: &CategorizedChanges,
        context: Option<&mut BuildContext>,
    ) -> Result<(), PackageError> {
        let mut dex = changes.dex.clone();
        let mut java_resources = changes.java_resources.clone();

        match self.job.dex_packaging_policy {
            DexPackagingPolicy::InstantRunShardsInSingleApk => {
                let (main, others) = partition_slices(&self.job.dex_folders);
                let bundle = self.make_instant_run_resources_from_dex(&others)?;
                java_resources = union([java_resources, bundle]);
                dex.retain(|file, _| main.iter().any(|base| base == file.base()));
            }
            DexPackagingPolicy::InstantRunMultiApk => {
                let (main, _) = partition_slices(&self.job.dex_folders);
                dex.retain(|file, _| main.iter().any(|base| base == file.base()));
            }
            DexPackagingPolicy::Standard => {}
        }

        let mut packager = IncrementalPackager::new(
            &self.job.output,
            &self.job.incremental_dir,
            self.job.options.clone(),
        )?;
        packager.update_dex(&dex)?;
        packager.update_java_resources(&java_resources)?;
        packager.update_assets(&changes.assets)?;
        packager.update_android_resources(&changes.android_resources)?;
        packager.update_native_libraries(&changes.native_libraries)?;
        packager.close()?;

        let zip_bases: BTreeSet<&Path> = [
            &dex,
            &java_resources,
            &changes.android_resources,
            &changes.native_libraries,
        ]
        .into_iter()
        .flat_map(|set| set.keys().map(RelativeFile::base))
        .filter(|base| base.is_file())
        .collect();
        for base in zip_bases {
            self.zip_cache.add(base)?;
        }

        if let Some(context) = context {
            context.add_changed_file(FileType::Main, &self.job.output)?;
        }
        Ok(())
    }

    /// Bundle every dex file of `dex_folders` into the Instant Run zip,
    /// named `<parent folder>-<file name>`.
    ///
    /// The bundle is always rebuilt from scratch and reported as a single
    /// Java resource change.
    fn make_instant_run_resources_from_dex(
        &self,
        dex_folders: &[PathBuf],
    ) -> Result<RelativeFileChanges, PackageError> {
        let support_dir = &self.job.instant_run_support_dir;
        let bundle = support_dir.join(INSTANT_RUN_ZIP);
        let existed_before = bundle.exists();

        atomic_write_with(&bundle, |file| -> Result<(), PackageError> {
            let mut writer = ZipWriter::new(file);
            for folder in dex_folders {
                for entry in walkdir::WalkDir::new(folder).sort_by_file_name() {
                    let entry = entry.map_err(apkpack_files::FilesError::from)?;
                    let path = entry.path();
                    let name = entry.file_name().to_string_lossy();
                    if !entry.file_type().is_file() || !name.ends_with(DEX_SUFFIX) {
                        continue;
                    }
                    let parent = path
                        .parent()
                        .and_then(Path::file_name)
                        .map(|parent| parent.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let bytes = fs::read(path).map_err(|err| PackageError::io(path, err))?;
                    writer
                        .start_file(
                            format!("{parent}-{name}"),
                            SimpleFileOptions::default()
                                .compression_method(CompressionMethod::Stored),
                        )
                        .map_err(|err| PackageError::zip(&bundle, err))?;
                    writer.write_all(&bytes)?;
                }
            }
            writer
                .finish()
                .map_err(|err| PackageError::zip(&bundle, err))?;
            Ok(())
        })?;

        let status = if existed_before {
            FileStatus::Changed
        } else {
            FileStatus::New
        };
        Ok(RelativeFileChanges::from([(
            RelativeFile::new(support_dir, &bundle)?,
            status,
        )]))
    }
}

/// Remove everything inside `dir`, creating it when missing.
fn clear_directory(dir: &Path) -> Result<(), PackageError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return fs::create_dir_all(dir).map_err(|err| PackageError::io(dir, err));
        }
        Err(err) => return Err(PackageError::io(dir, err)),
    };
    for entry in entries {
        let entry = entry.map_err(|err| PackageError::io(dir, err))?;
        let path = entry.path();
        let removed = match entry.file_type() {
            Ok(kind) if kind.is_dir() => fs::remove_dir_all(&path),
            _ => fs::remove_file(&path),
        };
        removed.map_err(|err| PackageError::io(&path, err))?;
    }
    Ok(())
}
