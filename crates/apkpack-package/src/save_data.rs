use crate::error::PackageError;
use crate::input_set::InputSet;
use apkpack_cache::{atomic_write, modified_millis};
use apkpack_files::RelativeFile;
use apkpack_properties::{PropertiesFile, PropertyEntry};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SAVE_DATA_FILE_NAME: &str = "file-input-save-data.txt";

const COUNT_PROPERTY: &str = "count";
const BASE_SUFFIX: &str = ".base";
const FILE_SUFFIX: &str = ".file";
const INPUT_SET_SUFFIX: &str = ".set";
const HEADER: &str = "Internal package file, do not edit.";

/// Size and mtime of the backing file as last read or written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified_millis: u64,
}

impl FileStamp {
    fn of(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok().filter(|meta| meta.is_file())?;
        Some(Self {
            len: meta.len(),
            modified_millis: modified_millis(&meta),
        })
    }
}

/// Ledger of every packaged file and the input set it came from.
///
/// The host only reports which absolute paths changed; once a file is gone
/// there is no way to tell which category it belonged to other than asking
/// the ledger written by the previous build.
#[derive(Debug)]
pub struct KnownFilesSaveData {
    path: PathBuf,
    files: BTreeMap<RelativeFile, InputSet>,
    dirty: bool,
    stamp: Option<FileStamp>,
}

impl KnownFilesSaveData {
    /// Path of the ledger kept in `incremental_dir`.
    pub fn save_file(incremental_dir: &Path) -> PathBuf {
        incremental_dir.join(SAVE_DATA_FILE_NAME)
    }

    /// Load the ledger stored at `path`. A missing file is an empty ledger.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PackageError> {
        let path = path.into();
        let stamp = FileStamp::of(&path);
        let files = match stamp {
            Some(_) => read_entries(&path)?,
            None => BTreeMap::new(),
        };
        Ok(Self {
            path,
            files,
            dirty: false,
            stamp,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn input_set_of(&self, file: &RelativeFile) -> Option<InputSet> {
        self.files.get(file).copied()
    }

    /// Make `files` the exact membership of `set`.
    ///
    /// Members of `set` not in `files` are dropped. Files already recorded
    /// under another set keep that set.
    pub fn set_input_set<'a>(
        &mut self,
        files: impl IntoIterator<Item = &'a RelativeFile>,
        set: InputSet,
    ) {
        let files: BTreeSet<&RelativeFile> = files.into_iter().collect();

        let before = self.files.len();
        self.files
            .retain(|file, current| *current != set || files.contains(file));
        if self.files.len() != before {
            self.dirty = true;
        }

        for file in files {
            if !self.files.contains_key(file) {
                self.files.insert(file.clone(), set);
                self.dirty = true;
            }
        }
    }

    /// Previously recorded members of `set` whose absolute file is one of
    /// `files`.
    pub fn find(&self, files: &BTreeSet<PathBuf>, set: InputSet) -> BTreeSet<RelativeFile> {
        self.files
            .iter()
            .filter(|(file, current)| **current == set && files.contains(file.file()))
            .map(|(file, _)| file.clone())
            .collect()
    }

    /// Write the ledger back if anything changed since it was loaded.
    pub fn save_current_data(&mut self) -> Result<(), PackageError> {
        if !self.dirty {
            return Ok(());
        }

        let mut properties = PropertiesFile::default();
        let mut push = |key: String, value: String| {
            properties.entries.push(PropertyEntry { key, value });
        };
        push(COUNT_PROPERTY.to_string(), self.files.len().to_string());
        for (idx, (file, set)) in self.files.iter().enumerate() {
            push(
                format!("{idx}{BASE_SUFFIX}"),
                file.base().to_string_lossy().into_owned(),
            );
            push(
                format!("{idx}{FILE_SUFFIX}"),
                file.file().to_string_lossy().into_owned(),
            );
            push(format!("{idx}{INPUT_SET_SUFFIX}"), set.as_str().to_string());
        }

        let text = apkpack_properties::to_string(&properties, Some(HEADER));
        atomic_write(&self.path, text.as_bytes())
            .map_err(|err| PackageError::io(&self.path, err))?;
        self.dirty = false;
        self.stamp = FileStamp::of(&self.path);
        tracing::debug!(
            target = "apkpack.package",
            path = %self.path.display(),
            files = self.files.len(),
            "saved known files"
        );
        Ok(())
    }

    /// Whether the backing file changed since this ledger last read or
    /// wrote it.
    fn is_stale(&self) -> bool {
        FileStamp::of(&self.path) != self.stamp
    }
}

fn read_entries(path: &Path) -> Result<BTreeMap<RelativeFile, InputSet>, PackageError> {
    let text = fs::read_to_string(path).map_err(|err| PackageError::io(path, err))?;
    let properties = apkpack_properties::parse(&text);

    let required = |key: &str| {
        properties
            .get(key)
            .ok_or_else(|| PackageError::corrupt(path, format!("property '{key}' has no value")))
    };

    let count_text = required(COUNT_PROPERTY)?;
    let count: i64 = count_text.trim().parse().map_err(|_| {
        PackageError::corrupt(
            path,
            format!("property '{COUNT_PROPERTY}' has value '{count_text}'"),
        )
    })?;
    if count < 0 {
        return Err(PackageError::corrupt(
            path,
            format!("property '{COUNT_PROPERTY}' has value {count}"),
        ));
    }

    let mut files = BTreeMap::new();
    for idx in 0..count {
        let base = required(&format!("{idx}{BASE_SUFFIX}"))?;
        let file = required(&format!("{idx}{FILE_SUFFIX}"))?;
        let set_key = format!("{idx}{INPUT_SET_SUFFIX}");
        let set_name = required(&set_key)?;
        let set = InputSet::from_name(set_name).ok_or_else(|| {
            PackageError::corrupt(
                path,
                format!("property '{set_key}' has invalid value '{set_name}'"),
            )
        })?;
        let relative = RelativeFile::new(base, file).map_err(|err| {
            PackageError::corrupt(path, format!("entry {idx} is inconsistent: {err}"))
        })?;
        files.insert(relative, set);
    }
    Ok(files)
}

pub type SharedSaveData = Arc<Mutex<KnownFilesSaveData>>;

/// Hands out one shared [`KnownFilesSaveData`] per backing file.
///
/// A ledger is reloaded from disk when the file was changed behind the
/// registry's back and the in-memory copy holds no unsaved changes.
#[derive(Debug, Default)]
pub struct SaveDataRegistry {
    inner: Mutex<HashMap<PathBuf, SharedSaveData>>,
}

impl SaveDataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The ledger kept in `incremental_dir`, loading it on first use.
    ///
    /// Ledgers are keyed by the absolute save file path, so every spelling of
    /// one directory shares a single instance.
    pub fn make(&self, incremental_dir: &Path) -> Result<SharedSaveData, PackageError> {
        let save_file = std::path::absolute(KnownFilesSaveData::save_file(incremental_dir))
            .map_err(|err| PackageError::io(incremental_dir, err))?;
        let mut inner = self.inner.lock();

        if let Some(shared) = inner.get(&save_file) {
            {
                let mut data = shared.lock();
                if !data.dirty && data.is_stale() {
                    tracing::debug!(
                        target = "apkpack.package",
                        path = %save_file.display(),
                        "known files changed on disk; reloading"
                    );
                    *data = KnownFilesSaveData::load(save_file.clone())?;
                }
            }
            return Ok(Arc::clone(shared));
        }

        let shared = Arc::new(Mutex::new(KnownFilesSaveData::load(save_file.clone())?));
        inner.insert(save_file, Arc::clone(&shared));
        Ok(shared)
    }

    /// Forget every cached ledger.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}
