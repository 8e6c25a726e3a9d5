use crate::error::CacheError;
use crate::fingerprint::Fingerprint;
use crate::util::{atomic_write, modified_millis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Header information of one zip entry, enough to detect content changes
/// without decompressing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZipEntrySnapshot {
    pub crc32: u32,
    pub size: u64,
}

/// What the cache knows about a path as of the last [`FileCacheByPath::add`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedFile {
    pub path: PathBuf,
    pub len: u64,
    pub modified_millis: u64,
    pub digest: Fingerprint,
    /// Entry index when the file is a zip archive, keyed by entry name.
    /// Directory entries are not recorded.
    #[serde(default)]
    pub zip_entries: Option<BTreeMap<String, ZipEntrySnapshot>>,
}

impl CachedFile {
    /// Whether this record still describes `meta`.
    pub fn is_current(&self, meta: &fs::Metadata) -> bool {
        self.len == meta.len() && self.modified_millis == modified_millis(meta)
    }
}

/// Durable cache of file snapshots keyed by absolute path.
///
/// A record is only trusted as a description of the file *as it is now* while
/// the file's size and mtime match what was recorded. The record itself is
/// kept until [`FileCacheByPath::remove`] so that a changed archive can still
/// be diffed against the snapshot of its previous version.
#[derive(Clone, Debug)]
pub struct FileCacheByPath {
    directory: PathBuf,
}

impl FileCacheByPath {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn record_path(&self, file: &Path) -> PathBuf {
        self.directory.join(format!("{}.json", Fingerprint::of_path(file)))
    }

    /// Record the current state of `file`.
    ///
    /// Re-hashing is skipped when the existing record is still current.
    pub fn add(&self, file: &Path) -> Result<CachedFile, CacheError> {
        let meta = fs::metadata(file).map_err(|err| CacheError::read(file, err))?;
        if let Some(existing) = self.get(file)? {
            if existing.is_current(&meta) {
                return Ok(existing);
            }
        }

        let record = CachedFile {
            path: file.to_path_buf(),
            len: meta.len(),
            modified_millis: modified_millis(&meta),
            digest: Fingerprint::from_file(file)?,
            zip_entries: read_zip_index(file)?,
        };

        let bytes = serde_json::to_vec_pretty(&record)?;
        atomic_write(&self.record_path(file), &bytes)?;
        tracing::debug!(
            target = "apkpack.cache",
            path = %file.display(),
            digest = %record.digest,
            "cached file snapshot"
        );
        Ok(record)
    }

    /// The last recorded snapshot of `file`, whether or not it is current.
    ///
    /// A corrupt record is treated as a miss; the next [`FileCacheByPath::add`]
    /// overwrites it.
    pub fn get(&self, file: &Path) -> Result<Option<CachedFile>, CacheError> {
        let record_path = self.record_path(file);
        let bytes = match fs::read(&record_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CacheError::read(record_path, err)),
        };

        match serde_json::from_slice::<CachedFile>(&bytes) {
            Ok(record) if record.path == file => Ok(Some(record)),
            Ok(_) => Ok(None),
            Err(err) => {
                tracing::debug!(
                    target = "apkpack.cache",
                    path = %record_path.display(),
                    error = %err,
                    "ignoring corrupt file cache record"
                );
                Ok(None)
            }
        }
    }

    /// Digest of the current contents of `file`, reusing the cached digest
    /// when the record is current.
    pub fn digest(&self, file: &Path) -> Result<Fingerprint, CacheError> {
        let meta = fs::metadata(file).map_err(|err| CacheError::read(file, err))?;
        match self.get(file)? {
            Some(record) if record.is_current(&meta) => Ok(record.digest),
            _ => Fingerprint::from_file(file),
        }
    }

    /// Forget `file`. Returns whether a record existed.
    pub fn remove(&self, file: &Path) -> Result<bool, CacheError> {
        match fs::remove_file(self.record_path(file)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Drop every record.
    pub fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_dir_all(&self.directory) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Entry index of `file` when it is a zip archive, `None` otherwise.
pub fn read_zip_index(
    file: &Path,
) -> Result<Option<BTreeMap<String, ZipEntrySnapshot>>, CacheError> {
    let handle = fs::File::open(file).map_err(|err| CacheError::read(file, err))?;
    let mut archive = match zip::ZipArchive::new(handle) {
        Ok(archive) => archive,
        Err(zip::result::ZipError::InvalidArchive(_))
        | Err(zip::result::ZipError::UnsupportedArchive(_)) => return Ok(None),
        Err(zip::result::ZipError::Io(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
            return Ok(None)
        }
        Err(zip::result::ZipError::Io(err)) => return Err(CacheError::read(file, err)),
        Err(source) => {
            return Err(CacheError::Zip {
                path: file.to_path_buf(),
                source,
            })
        }
    };

    let mut entries = BTreeMap::new();
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index).map_err(|source| CacheError::Zip {
            path: file.to_path_buf(),
            source,
        })?;
        if entry.is_dir() {
            continue;
        }
        entries.insert(
            entry.name().to_string(),
            ZipEntrySnapshot {
                crc32: entry.crc32(),
                size: entry.size(),
            },
        );
    }
    Ok(Some(entries))
}
