//! Runs the class verifier over the compiler outputs that changed since the
//! previous build.
//!
//! Every class seen is copied into a private backup directory so the next
//! build has something to compare against. Classes from directories are
//! backed up file by file below their path relative to the input root; jars
//! are backed up whole under their file name.

use crate::context::{BuildContext, TaskType};
use crate::error::InstantRunError;
use crate::status::VerifierStatus;
use crate::verifier::verify_class_bytes;
use apkpack_files::{FileStatus, RelativeFileChanges};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const CLASS_SUFFIX: &str = ".class";

/// Status of each jar input, keyed by the jar path.
pub type JarChanges = BTreeMap<PathBuf, FileStatus>;

#[derive(Debug, Clone)]
pub struct ClassChangeVerifier {
    backup_dir: PathBuf,
}

impl ClassChangeVerifier {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Replace the backup with a fresh copy of every input.
    ///
    /// Used for non-incremental builds, where nothing is verified.
    pub fn backup_all(
        &self,
        directories: &[PathBuf],
        jars: &[PathBuf],
    ) -> Result<(), InstantRunError> {
        match fs::remove_dir_all(&self.backup_dir) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(InstantRunError::io(&self.backup_dir, err)),
        }
        fs::create_dir_all(&self.backup_dir)
            .map_err(|err| InstantRunError::io(&self.backup_dir, err))?;

        for dir in directories {
            for entry in WalkDir::new(dir).min_depth(1) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
                copy_file(entry.path(), &self.backup_dir.join(relative))?;
            }
        }
        for jar in jars {
            copy_file(jar, &self.jar_backup(jar))?;
        }
        Ok(())
    }

    /// Verify the changed classes and refresh the backup.
    ///
    /// Once a change is found to be incompatible, later changed classes are
    /// only backed up. A new class always reports
    /// [`VerifierStatus::ClassAdded`].
    pub fn verify(
        &self,
        directory_changes: &RelativeFileChanges,
        jar_changes: &JarChanges,
    ) -> Result<VerifierStatus, InstantRunError> {
        fs::create_dir_all(&self.backup_dir)
            .map_err(|err| InstantRunError::io(&self.backup_dir, err))?;

        let mut result = VerifierStatus::Compatible;
        for (file, status) in directory_changes {
            if file.file().is_dir() {
                continue;
            }
            let backup = self.backup_dir.join(file.relative_path());
            match status {
                FileStatus::Removed => remove_backup(&backup),
                FileStatus::New => {
                    copy_file(file.file(), &backup)?;
                    result = VerifierStatus::ClassAdded;
                }
                FileStatus::Changed => {
                    if result == VerifierStatus::Compatible {
                        result = if backup.is_file() {
                            verify_files(&backup, file.file())?
                        } else {
                            tracing::debug!(
                                target = "apkpack.instant_run",
                                path = %file.file().display(),
                                "changed class has no backup"
                            );
                            VerifierStatus::InstantRunFailure
                        };
                    }
                    copy_file(file.file(), &backup)?;
                }
            }
        }

        for (jar, status) in jar_changes {
            let backup = self.jar_backup(jar);
            match status {
                FileStatus::Removed => remove_backup(&backup),
                FileStatus::New | FileStatus::Changed => {
                    if *status == FileStatus::Changed && result == VerifierStatus::Compatible {
                        if backup.is_dir() {
                            tracing::warn!(
                                target = "apkpack.instant_run",
                                path = %backup.display(),
                                jar = %jar.display(),
                                "unexpected directory in place of a jar backup"
                            );
                            if let Err(err) = fs::remove_dir_all(&backup) {
                                tracing::warn!(
                                    target = "apkpack.instant_run",
                                    path = %backup.display(),
                                    error = %err,
                                    "failed to delete backup directory"
                                );
                            }
                            result = VerifierStatus::InstantRunFailure;
                        } else if backup.is_file() {
                            result = verify_jars(&backup, jar)?;
                        }
                    }
                    if !jar.is_file() {
                        tracing::warn!(
                            target = "apkpack.instant_run",
                            path = %jar.display(),
                            "jar input does not exist or is a directory"
                        );
                        result = VerifierStatus::InstantRunFailure;
                        continue;
                    }
                    copy_file(jar, &backup)?;
                }
            }
        }
        Ok(result)
    }

    /// [`Self::verify`] timed as the verifier task, with the result recorded
    /// on `context`.
    pub fn verify_into(
        &self,
        context: &mut BuildContext,
        directory_changes: &RelativeFileChanges,
        jar_changes: &JarChanges,
    ) -> Result<VerifierStatus, InstantRunError> {
        context.start_recording(TaskType::Verifier);
        let result = self.verify(directory_changes, jar_changes);
        context.stop_recording(TaskType::Verifier);
        let status = result?;
        context.set_verifier_status(status);
        Ok(status)
    }

    fn jar_backup(&self, jar: &Path) -> PathBuf {
        match jar.file_name() {
            Some(name) => self.backup_dir.join(name),
            None => self.backup_dir.join(jar),
        }
    }
}

fn verify_files(original: &Path, updated: &Path) -> Result<VerifierStatus, InstantRunError> {
    if !has_class_suffix(updated.to_string_lossy().as_ref()) {
        return Ok(VerifierStatus::Compatible);
    }
    let original_bytes = fs::read(original).map_err(|err| InstantRunError::io(original, err))?;
    let updated_bytes = fs::read(updated).map_err(|err| InstantRunError::io(updated, err))?;
    let status = verify_class_bytes(&original_bytes, &updated_bytes)
        .map_err(|err| InstantRunError::class_file(updated, err))?;
    tracing::debug!(
        target = "apkpack.instant_run",
        path = %updated.display(),
        status = %status,
        "verified class"
    );
    Ok(status)
}

/// Compare every class present in both jars; the first incompatibility wins.
fn verify_jars(backup: &Path, updated: &Path) -> Result<VerifierStatus, InstantRunError> {
    let mut backup_archive = open_archive(backup)?;
    let mut updated_archive = open_archive(updated)?;
    let backup_names: HashSet<String> = backup_archive.file_names().map(str::to_string).collect();

    for index in 0..updated_archive.len() {
        let (name, updated_bytes) = {
            let mut entry = updated_archive
                .by_index(index)
                .map_err(|err| InstantRunError::zip(updated, err))?;
            let name = entry.name().to_string();
            if !has_class_suffix(&name) || !backup_names.contains(&name) {
                continue;
            }
            (name, read_entry(&mut entry, updated)?)
        };
        let original_bytes = {
            let mut entry = backup_archive
                .by_name(&name)
                .map_err(|err| InstantRunError::zip(backup, err))?;
            read_entry(&mut entry, backup)?
        };

        let status = verify_class_bytes(&original_bytes, &updated_bytes)
            .map_err(|err| InstantRunError::class_file(updated.join(&name), err))?;
        tracing::debug!(
            target = "apkpack.instant_run",
            path = %updated.display(),
            entry = %name,
            status = %status,
            "verified class"
        );
        if status != VerifierStatus::Compatible {
            return Ok(status);
        }
    }
    Ok(VerifierStatus::Compatible)
}

fn open_archive(path: &Path) -> Result<zip::ZipArchive<fs::File>, InstantRunError> {
    let file = fs::File::open(path).map_err(|err| InstantRunError::io(path, err))?;
    zip::ZipArchive::new(file).map_err(|err| InstantRunError::zip(path, err))
}

fn read_entry(entry: &mut impl Read, archive: &Path) -> Result<Vec<u8>, InstantRunError> {
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|err| InstantRunError::io(archive, err))?;
    Ok(bytes)
}

fn has_class_suffix(name: &str) -> bool {
    name.ends_with(CLASS_SUFFIX)
}

fn copy_file(from: &Path, to: &Path) -> Result<(), InstantRunError> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|err| InstantRunError::io(parent, err))?;
    }
    fs::copy(from, to).map_err(|err| InstantRunError::io(from, err))?;
    Ok(())
}

/// A backup that cannot be deleted is only stale, not fatal.
fn remove_backup(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(
            target = "apkpack.instant_run",
            path = %path.display(),
            error = %err,
            "failed to delete backup"
        ),
    }
}
