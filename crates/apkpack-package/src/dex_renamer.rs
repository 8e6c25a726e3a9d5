use crate::error::PackageError;
use apkpack_cache::atomic_write;
use apkpack_files::{FileStatus, RelativeFile, RelativeFileChanges};
use apkpack_properties::{PropertiesFile, PropertyEntry};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

pub const STATE_FILE_NAME: &str = "dex-renamer-state.txt";
pub const CLASSES_DEX: &str = "classes.dex";

const BASE_KEY_PREFIX: &str = "base.";
const FILE_KEY_PREFIX: &str = "file.";
const RENAMED_KEY_PREFIX: &str = "renamed.";
const STAGED_SUFFIX: &str = ".staged";

/// One archive entry to add, replace or delete.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackagedFileUpdate {
    pub source: RelativeFile,
    /// Path of the entry inside the archive.
    pub name: String,
    pub status: FileStatus,
}

impl PackagedFileUpdate {
    pub fn new(source: RelativeFile, name: impl Into<String>, status: FileStatus) -> Self {
        Self {
            source,
            name: name.into(),
            status,
        }
    }

    /// Updates that package every file at its own relative path.
    pub fn from_changes(changes: &RelativeFileChanges) -> Vec<Self> {
        changes
            .iter()
            .map(|(file, status)| Self::new(file.clone(), file.relative_path(), *status))
            .collect()
    }
}

/// `classes.dex`, `classes2.dex`, `classes3.dex`, ...
pub fn dex_name(index: usize) -> String {
    if index <= 1 {
        CLASSES_DEX.to_string()
    } else {
        format!("classes{index}.dex")
    }
}

/// Position of `name` in the [`dex_name`] sequence.
fn dex_index(name: &str) -> Option<usize> {
    if name == CLASSES_DEX {
        return Some(1);
    }
    let index: usize = name.strip_prefix("classes")?.strip_suffix(".dex")?.parse().ok()?;
    (index >= 2).then_some(index)
}

fn sort_by_dex_index(names: &mut VecDeque<String>) {
    names
        .make_contiguous()
        .sort_by_key(|name| (dex_index(name).unwrap_or(usize::MAX), name.clone()));
}

/// Assigns archive names to dex files so that the packaged dex entries are
/// always `classes.dex` through `classesN.dex` without gaps.
///
/// Names stay stable across builds: a file keeps its name until removals
/// force the highest names to be compacted into the freed slots. An input
/// literally named `classes.dex` always gets the `classes.dex` slot.
#[derive(Debug)]
pub struct DexIncrementalRenameManager {
    state_file: PathBuf,
    names: BTreeMap<RelativeFile, String>,
    closed: bool,
}

impl DexIncrementalRenameManager {
    /// Load the rename state kept in `incremental_dir`.
    pub fn open(incremental_dir: &Path) -> Result<Self, PackageError> {
        if !incremental_dir.is_dir() {
            return Err(PackageError::IncrementalDirMissing {
                path: incremental_dir.to_path_buf(),
            });
        }

        let state_file = incremental_dir.join(STATE_FILE_NAME);
        let mut names = BTreeMap::new();
        if state_file.is_file() {
            let text =
                fs::read_to_string(&state_file).map_err(|err| PackageError::io(&state_file, err))?;
            let properties = apkpack_properties::parse(&text);
            for idx in 0.. {
                let (Some(base), Some(file), Some(renamed)) = (
                    properties.get(&format!("{BASE_KEY_PREFIX}{idx}")),
                    properties.get(&format!("{FILE_KEY_PREFIX}{idx}")),
                    properties.get(&format!("{RENAMED_KEY_PREFIX}{idx}")),
                ) else {
                    break;
                };
                let relative = RelativeFile::new(base, file).map_err(|err| {
                    PackageError::corrupt(&state_file, format!("entry {idx} is inconsistent: {err}"))
                })?;
                names.insert(relative, renamed.to_string());
            }
        }

        Ok(Self {
            state_file,
            names,
            closed: false,
        })
    }

    /// Current mapping from input dex file to archive name.
    pub fn names(&self) -> &BTreeMap<RelativeFile, String> {
        &self.names
    }

    fn file_named(&self, name: &str) -> Option<RelativeFile> {
        self.names
            .iter()
            .find(|(_, current)| current.as_str() == name)
            .map(|(file, _)| file.clone())
    }

    fn expect_file_named(&self, name: &str) -> Result<RelativeFile, PackageError> {
        self.file_named(name).ok_or_else(|| {
            PackageError::corrupt(
                &self.state_file,
                format!("no dex file is mapped to '{name}'"),
            )
        })
    }

    /// Translate input dex changes into archive entry updates and record the
    /// new name assignment.
    pub fn update(
        &mut self,
        changes: &RelativeFileChanges,
    ) -> Result<Vec<PackagedFileUpdate>, PackageError> {
        // Every name up to the number of mapped files is in use.
        let mut name_list: VecDeque<String> = VecDeque::new();
        for idx in 1..=self.names.len() {
            let name = dex_name(idx);
            if self.file_named(&name).is_none() {
                return Err(PackageError::corrupt(
                    &self.state_file,
                    format!(
                        "name '{name}' is not assigned although {} dex files are known",
                        self.names.len()
                    ),
                ));
            }
            name_list.push_back(name);
        }

        let mut deleted_names: VecDeque<String> = VecDeque::new();
        let mut deleted_files: BTreeMap<String, RelativeFile> = BTreeMap::new();
        for (file, _) in changes.iter().filter(|(_, s)| **s == FileStatus::Removed) {
            let Some(name) = self.names.remove(file) else {
                return Err(PackageError::UnknownDex {
                    file: file.clone(),
                    action: "deleted",
                });
            };
            deleted_names.push_back(name.clone());
            deleted_files.insert(name, file.clone());
        }

        let mut added_files: Vec<RelativeFile> = changes
            .iter()
            .filter(|(_, s)| **s == FileStatus::New)
            .map(|(file, _)| file.clone())
            .collect();
        let adding_classes_dex = added_files
            .iter()
            .any(|file| file.file_name().as_deref() == Some(CLASSES_DEX));
        added_files.sort_by(|a, b| {
            let (a, b) = (a.relative_path(), b.relative_path());
            (a != CLASSES_DEX).cmp(&(b != CLASSES_DEX)).then(a.cmp(&b))
        });

        // A new `classes.dex` evicts whatever else holds that name.
        if adding_classes_dex {
            if let Some(holder) = self.file_named(CLASSES_DEX) {
                if holder.file_name().as_deref() != Some(CLASSES_DEX) {
                    self.names.remove(&holder);
                    added_files.push(holder);
                    deleted_names.push_back(CLASSES_DEX.to_string());
                }
            }
        }
        sort_by_dex_index(&mut deleted_names);

        let mut added_names: BTreeSet<String> = BTreeSet::new();
        let mut updated_names: BTreeSet<String> = BTreeSet::new();
        for file in added_files {
            if let Some(reused) = deleted_names.pop_front() {
                deleted_files.remove(&reused);
                updated_names.insert(reused.clone());
                self.names.insert(file, reused);
            } else {
                let name = dex_name(name_list.len() + 1);
                added_names.insert(name.clone());
                name_list.push_back(name.clone());
                self.names.insert(file, name);
            }
        }

        for (file, _) in changes.iter().filter(|(_, s)| **s == FileStatus::Changed) {
            let Some(name) = self.names.get(file) else {
                return Err(PackageError::UnknownDex {
                    file: file.clone(),
                    action: "updated",
                });
            };
            if !added_names.contains(name) {
                updated_names.insert(name.clone());
            }
        }

        // Close the gaps left by deletions by moving the highest names down.
        let mut finally_deleted: BTreeSet<String> = BTreeSet::new();
        while let Some(last_deleted) = deleted_names.back().cloned() {
            let Some(last_name) = name_list.pop_back() else {
                break;
            };
            if last_deleted == last_name {
                deleted_names.pop_back();
                finally_deleted.insert(last_name);
                continue;
            }

            let Some(first_deleted) = deleted_names.pop_front() else {
                break;
            };
            let moved = self.expect_file_named(&last_name)?;
            finally_deleted.insert(last_name.clone());
            updated_names.remove(&last_name);
            updated_names.insert(first_deleted.clone());
            self.names.insert(moved.clone(), first_deleted);
            deleted_files.insert(last_name, moved);
        }

        let mut updates = Vec::new();
        for name in added_names {
            let file = self.expect_file_named(&name)?;
            updates.push(PackagedFileUpdate::new(file, name, FileStatus::New));
        }
        for name in updated_names {
            let file = self.expect_file_named(&name)?;
            updates.push(PackagedFileUpdate::new(file, name, FileStatus::Changed));
        }
        for name in finally_deleted {
            let file = deleted_files.get(&name).cloned().ok_or_else(|| {
                PackageError::corrupt(
                    &self.state_file,
                    format!("no deleted dex file recorded for '{name}'"),
                )
            })?;
            updates.push(PackagedFileUpdate::new(file, name, FileStatus::Removed));
        }
        updates.sort_by_key(|update| dex_index(&update.name));
        Ok(updates)
    }

    /// Persist the name assignment. Later calls do nothing.
    pub fn close(&mut self) -> Result<(), PackageError> {
        match self.stage()? {
            Some(staged) => staged.commit(),
            None => Ok(()),
        }
    }

    /// Write the name assignment next to the state file without replacing
    /// it. Nothing is staged when the manager was already closed.
    pub(crate) fn stage(&mut self) -> Result<Option<StagedState>, PackageError> {
        if self.closed {
            return Ok(None);
        }
        self.closed = true;

        let mut properties = PropertiesFile::default();
        let mut by_name: Vec<(&RelativeFile, &String)> = self.names.iter().collect();
        by_name.sort_by_key(|(_, name)| dex_index(name));
        for (idx, (file, name)) in by_name.into_iter().enumerate() {
            for (prefix, value) in [
                (BASE_KEY_PREFIX, file.base().to_string_lossy().into_owned()),
                (FILE_KEY_PREFIX, file.file().to_string_lossy().into_owned()),
                (RENAMED_KEY_PREFIX, name.clone()),
            ] {
                properties.entries.push(PropertyEntry {
                    key: format!("{prefix}{idx}"),
                    value,
                });
            }
        }

        let mut staged = self.state_file.clone().into_os_string();
        staged.push(STAGED_SUFFIX);
        let staged = PathBuf::from(staged);
        let text = apkpack_properties::to_string(&properties, None);
        atomic_write(&staged, text.as_bytes()).map_err(|err| PackageError::io(&staged, err))?;
        Ok(Some(StagedState {
            staged,
            target: self.state_file.clone(),
        }))
    }
}

/// Rename state written beside the state file, waiting for the package it
/// describes to be in place.
#[derive(Debug)]
pub(crate) struct StagedState {
    staged: PathBuf,
    target: PathBuf,
}

impl StagedState {
    /// Replace the state file with the staged one.
    pub(crate) fn commit(self) -> Result<(), PackageError> {
        fs::rename(&self.staged, &self.target).map_err(|err| PackageError::io(&self.target, err))
    }

    /// Drop the staged state, keeping the previous state file.
    pub(crate) fn discard(self) {
        if let Err(err) = fs::remove_file(&self.staged) {
            tracing::debug!(
                target = "apkpack.package",
                path = %self.staged.display(),
                error = %err,
                "failed to remove staged dex rename state"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dex(base: &Path, path: &str) -> RelativeFile {
        RelativeFile::from_relative_path(base, path)
    }

    fn summary(updates: &[PackagedFileUpdate]) -> Vec<(String, String, FileStatus)> {
        updates
            .iter()
            .map(|u| (u.source.relative_path(), u.name.clone(), u.status))
            .collect()
    }

    #[test]
    fn dex_names_follow_the_multidex_sequence() {
        assert_eq!(dex_name(1), "classes.dex");
        assert_eq!(dex_name(2), "classes2.dex");
        assert_eq!(dex_index("classes12.dex"), Some(12));
        assert_eq!(dex_index("classes1.dex"), None);
        assert_eq!(dex_index("other.dex"), None);
    }

    #[test]
    fn new_files_get_consecutive_names_with_classes_dex_first() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("dex");
        let mut renamer = DexIncrementalRenameManager::open(tmp.path()).unwrap();

        let changes = RelativeFileChanges::from([
            (dex(&base, "a/x.dex"), FileStatus::New),
            (dex(&base, "classes.dex"), FileStatus::New),
            (dex(&base, "b/y.dex"), FileStatus::New),
        ]);
        let updates = renamer.update(&changes).unwrap();
        assert_eq!(
            summary(&updates),
            vec![
                ("classes.dex".into(), "classes.dex".into(), FileStatus::New),
                ("a/x.dex".into(), "classes2.dex".into(), FileStatus::New),
                ("b/y.dex".into(), "classes3.dex".into(), FileStatus::New),
            ]
        );
    }

    #[test]
    fn removing_a_middle_file_moves_the_last_name_down() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("dex");
        let mut renamer = DexIncrementalRenameManager::open(tmp.path()).unwrap();
        renamer
            .update(&RelativeFileChanges::from([
                (dex(&base, "1.dex"), FileStatus::New),
                (dex(&base, "2.dex"), FileStatus::New),
                (dex(&base, "3.dex"), FileStatus::New),
            ]))
            .unwrap();

        let updates = renamer
            .update(&RelativeFileChanges::from([(
                dex(&base, "2.dex"),
                FileStatus::Removed,
            )]))
            .unwrap();
        assert_eq!(
            summary(&updates),
            vec![
                ("3.dex".into(), "classes2.dex".into(), FileStatus::Changed),
                ("3.dex".into(), "classes3.dex".into(), FileStatus::Removed),
            ]
        );
        assert_eq!(renamer.names().get(&dex(&base, "3.dex")).unwrap(), "classes2.dex");
    }

    #[test]
    fn removing_the_last_file_just_deletes_its_name() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("dex");
        let mut renamer = DexIncrementalRenameManager::open(tmp.path()).unwrap();
        renamer
            .update(&RelativeFileChanges::from([
                (dex(&base, "1.dex"), FileStatus::New),
                (dex(&base, "2.dex"), FileStatus::New),
            ]))
            .unwrap();

        let updates = renamer
            .update(&RelativeFileChanges::from([
                (dex(&base, "2.dex"), FileStatus::Removed),
                (dex(&base, "1.dex"), FileStatus::Changed),
            ]))
            .unwrap();
        assert_eq!(
            summary(&updates),
            vec![
                ("1.dex".into(), "classes.dex".into(), FileStatus::Changed),
                ("2.dex".into(), "classes2.dex".into(), FileStatus::Removed),
            ]
        );
    }

    #[test]
    fn added_classes_dex_takes_over_the_first_slot() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("dex");
        let mut renamer = DexIncrementalRenameManager::open(tmp.path()).unwrap();
        renamer
            .update(&RelativeFileChanges::from([(
                dex(&base, "other.dex"),
                FileStatus::New,
            )]))
            .unwrap();

        let updates = renamer
            .update(&RelativeFileChanges::from([(
                dex(&base, "classes.dex"),
                FileStatus::New,
            )]))
            .unwrap();
        assert_eq!(
            summary(&updates),
            vec![
                ("classes.dex".into(), "classes.dex".into(), FileStatus::Changed),
                ("other.dex".into(), "classes2.dex".into(), FileStatus::New),
            ]
        );
    }

    #[test]
    fn unknown_files_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("dex");
        let mut renamer = DexIncrementalRenameManager::open(tmp.path()).unwrap();

        let err = renamer
            .update(&RelativeFileChanges::from([(
                dex(&base, "ghost.dex"),
                FileStatus::Changed,
            )]))
            .unwrap_err();
        assert!(matches!(err, PackageError::UnknownDex { action: "updated", .. }), "{err}");

        let err = renamer
            .update(&RelativeFileChanges::from([(
                dex(&base, "ghost.dex"),
                FileStatus::Removed,
            )]))
            .unwrap_err();
        assert!(matches!(err, PackageError::UnknownDex { action: "deleted", .. }), "{err}");
    }

    #[test]
    fn state_survives_close_and_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("dex");
        let mut renamer = DexIncrementalRenameManager::open(tmp.path()).unwrap();
        renamer
            .update(&RelativeFileChanges::from([
                (dex(&base, "a.dex"), FileStatus::New),
                (dex(&base, "b.dex"), FileStatus::New),
            ]))
            .unwrap();
        renamer.close().unwrap();

        let text = fs::read_to_string(tmp.path().join(STATE_FILE_NAME)).unwrap();
        assert!(text.contains("renamed.0=classes.dex"), "{text}");
        assert!(text.contains("renamed.1=classes2.dex"), "{text}");

        let reopened = DexIncrementalRenameManager::open(tmp.path()).unwrap();
        assert_eq!(reopened.names(), renamer.names());
    }

    #[test]
    fn open_requires_an_existing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let err = DexIncrementalRenameManager::open(&tmp.path().join("missing")).unwrap_err();
        assert!(matches!(err, PackageError::IncrementalDirMissing { .. }));
    }
}
