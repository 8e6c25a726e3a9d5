use crate::dex_renamer::{DexIncrementalRenameManager, PackagedFileUpdate};
use crate::error::PackageError;
use apkpack_cache::atomic_write_with;
use apkpack_files::{FileStatus, RelativeFileChanges, SourceReader};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const CLASS_SUFFIX: &str = ".class";
const ASSETS_PREFIX: &str = "assets/";
const GDBSERVER: &str = "gdbserver";
const GDB_SETUP: &str = "gdb.setup";

/// Decides which native library paths end up in the package.
///
/// Only paths shaped `lib/<abi>/<name>` qualify. The ABI must be accepted
/// (an empty set accepts every ABI) and the name must be a shared library,
/// or one of the gdb helpers when JNI debugging is enabled.
#[derive(Clone, Debug, Default)]
pub struct NativeLibraryAbiPredicate {
    accepted_abis: BTreeSet<String>,
    jni_debug: bool,
}

impl NativeLibraryAbiPredicate {
    pub fn new(accepted_abis: BTreeSet<String>, jni_debug: bool) -> Self {
        Self {
            accepted_abis,
            jni_debug,
        }
    }

    pub fn accepts(&self, path: &str) -> bool {
        let mut segments = path.split('/');
        let (Some("lib"), Some(abi), Some(name), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return false;
        };
        if abi.is_empty() || name.is_empty() {
            return false;
        }
        if !self.accepted_abis.is_empty() && !self.accepted_abis.contains(abi) {
            return false;
        }
        name.ends_with(".so") || (self.jni_debug && (name == GDBSERVER || name == GDB_SETUP))
    }
}

/// Knobs of an [`IncrementalPackager`].
#[derive(Clone, Debug, Default)]
pub struct PackagerOptions {
    pub accepted_abis: BTreeSet<String>,
    pub jni_debug: bool,
    /// Entries whose name ends with one of these are stored uncompressed.
    pub no_compress: Vec<String>,
}

enum Staged {
    Write(Vec<u8>),
    Delete,
}

/// Applies categorized input changes to an existing package.
///
/// Updates are staged in memory, reading each source when it is staged.
/// [`IncrementalPackager::close`] rewrites the archive through a temporary
/// file: untouched entries are copied without recompression, staged entries
/// are replaced or removed. Dropping the packager without closing it leaves
/// the previous package and the dex rename state untouched.
pub struct IncrementalPackager {
    output: PathBuf,
    renamer: DexIncrementalRenameManager,
    abi_filter: NativeLibraryAbiPredicate,
    no_compress: Vec<String>,
    reader: SourceReader,
    staged: BTreeMap<String, Staged>,
    closed: bool,
}

impl IncrementalPackager {
    pub fn new(
        output: &Path,
        incremental_dir: &Path,
        options: PackagerOptions,
    ) -> Result<Self, PackageError> {
        check_output_file(output)?;
        let renamer = DexIncrementalRenameManager::open(incremental_dir)?;
        Ok(Self {
            output: output.to_path_buf(),
            renamer,
            abi_filter: NativeLibraryAbiPredicate::new(options.accepted_abis, options.jni_debug),
            no_compress: options.no_compress,
            reader: SourceReader::new(),
            staged: BTreeMap::new(),
            closed: false,
        })
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn update_dex(&mut self, changes: &RelativeFileChanges) -> Result<(), PackageError> {
        let updates = self.renamer.update(changes)?;
        self.update_files(updates)
    }

    /// Java resources are packaged at their relative path; compiled classes
    /// are never packaged as resources.
    pub fn update_java_resources(
        &mut self,
        changes: &RelativeFileChanges,
    ) -> Result<(), PackageError> {
        let updates = PackagedFileUpdate::from_changes(changes)
            .into_iter()
            .filter(|update| !update.name.ends_with(CLASS_SUFFIX))
            .collect();
        self.update_files(updates)
    }

    pub fn update_assets(&mut self, changes: &RelativeFileChanges) -> Result<(), PackageError> {
        let updates = PackagedFileUpdate::from_changes(changes)
            .into_iter()
            .map(|update| PackagedFileUpdate {
                name: format!("{ASSETS_PREFIX}{}", update.name),
                ..update
            })
            .collect();
        self.update_files(updates)
    }

    pub fn update_android_resources(
        &mut self,
        changes: &RelativeFileChanges,
    ) -> Result<(), PackageError> {
        self.update_files(PackagedFileUpdate::from_changes(changes))
    }

    pub fn update_native_libraries(
        &mut self,
        changes: &RelativeFileChanges,
    ) -> Result<(), PackageError> {
        let updates = PackagedFileUpdate::from_changes(changes)
            .into_iter()
            .filter(|update| self.abi_filter.accepts(&update.name))
            .collect();
        self.update_files(updates)
    }

    fn update_files(&mut self, updates: Vec<PackagedFileUpdate>) -> Result<(), PackageError> {
        let (removed, written): (Vec<_>, Vec<_>) = updates
            .into_iter()
            .partition(|update| update.status == FileStatus::Removed);

        for update in removed {
            self.staged.insert(update.name, Staged::Delete);
        }
        for update in written {
            let bytes = self.reader.read(&update.source)?;
            self.staged.insert(update.name, Staged::Write(bytes));
        }
        Ok(())
    }

    /// Write the package and the dex rename state. Later calls do nothing.
    pub fn close(&mut self) -> Result<(), PackageError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let staged = std::mem::take(&mut self.staged);
        // The rename state is staged first and only replaces the previous
        // state once the new archive is in place.
        let state = self.renamer.stage()?;
        if let Err(err) = self.write_archive(&staged) {
            if let Some(state) = state {
                state.discard();
            }
            return Err(err);
        }
        if let Some(state) = state {
            state.commit()?;
        }

        let (written, deleted) = staged.values().fold((0, 0), |(w, d), change| match change {
            Staged::Write(_) => (w + 1, d),
            Staged::Delete => (w, d + 1),
        });
        tracing::debug!(
            target = "apkpack.package",
            path = %self.output.display(),
            written,
            deleted,
            "updated package"
        );
        Ok(())
    }

    fn write_archive(&self, staged: &BTreeMap<String, Staged>) -> Result<(), PackageError> {
        let output = &self.output;
        let existing = open_existing(output)?;

        atomic_write_with(output, |file| -> Result<(), PackageError> {
            let mut writer = ZipWriter::new(file);

            if let Some(mut archive) = existing {
                for index in 0..archive.len() {
                    let entry = archive
                        .by_index_raw(index)
                        .map_err(|err| PackageError::zip(output, err))?;
                    if staged.contains_key(entry.name()) {
                        continue;
                    }
                    writer
                        .raw_copy_file(entry)
                        .map_err(|err| PackageError::zip(output, err))?;
                }
            }

            for (name, change) in staged {
                let Staged::Write(bytes) = change else {
                    continue;
                };
                let method = if self.no_compress.iter().any(|suffix| name.ends_with(suffix)) {
                    CompressionMethod::Stored
                } else {
                    CompressionMethod::Deflated
                };
                writer
                    .start_file(name.as_str(), SimpleFileOptions::default().compression_method(method))
                    .map_err(|err| PackageError::zip(output, err))?;
                writer.write_all(bytes)?;
            }

            writer
                .finish()
                .map_err(|err| PackageError::zip(output, err))?;
            Ok(())
        })
    }
}

fn open_existing(output: &Path) -> Result<Option<ZipArchive<fs::File>>, PackageError> {
    let file = match fs::File::open(output) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(PackageError::io(output, err)),
    };
    let len = file
        .metadata()
        .map_err(|err| PackageError::io(output, err))?
        .len();
    if len == 0 {
        return Ok(None);
    }
    ZipArchive::new(file)
        .map(Some)
        .map_err(|err| PackageError::zip(output, err))
}

/// The output must be a writable file, or creatable when it does not exist.
fn check_output_file(path: &Path) -> Result<(), PackageError> {
    if path.is_dir() {
        return Err(PackageError::OutputIsDirectory {
            path: path.to_path_buf(),
        });
    }

    match fs::metadata(path) {
        Ok(meta) => {
            if meta.permissions().readonly() {
                return Err(PackageError::OutputNotWritable {
                    path: path.to_path_buf(),
                });
            }
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let not_creatable = |source| PackageError::OutputNotCreatable {
                path: path.to_path_buf(),
                source,
            };
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(not_creatable)?;
            }
            fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .map_err(not_creatable)?;
            fs::remove_file(path).map_err(not_creatable)
        }
        Err(err) => Err(PackageError::io(path, err)),
    }
}
