use crate::error::FilesError;
use crate::relative_file::{FileStatus, RelativeFile};
use apkpack_cache::{read_zip_index, FileCacheByPath};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Changes for one input category, ordered by base and then by file.
pub type RelativeFileChanges = BTreeMap<RelativeFile, FileStatus>;

/// Every file below `dir`, all marked [`FileStatus::New`].
pub fn from_directory(dir: &Path) -> Result<RelativeFileChanges, FilesError> {
    let mut changes = RelativeFileChanges::new();
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file = RelativeFile::new(dir, entry.path())?;
        changes.insert(file, FileStatus::New);
    }
    Ok(changes)
}

/// Every non-directory entry of `zip`, all marked with `status`.
pub fn from_zip(zip: &Path, status: FileStatus) -> Result<RelativeFileChanges, FilesError> {
    let handle = fs::File::open(zip).map_err(|err| FilesError::io(zip, err))?;
    let mut archive = zip::ZipArchive::new(handle).map_err(|err| FilesError::zip(zip, err))?;

    let mut changes = RelativeFileChanges::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|err| FilesError::zip(zip, err))?;
        if entry.is_dir() {
            continue;
        }
        changes.insert(RelativeFile::from_relative_path(zip, entry.name()), status);
    }
    Ok(changes)
}

/// Diff `zip` against the snapshot recorded for it in `cache`.
///
/// A zip that no longer exists reports every cached entry as removed; a zip
/// the cache has never seen reports every entry as new. Otherwise entries are
/// compared by CRC-32 and uncompressed size and unchanged ones are omitted.
/// The cache is not updated; callers [`FileCacheByPath::add`] the zip once
/// the changes have been applied.
pub fn from_zip_cached(
    zip: &Path,
    cache: &FileCacheByPath,
) -> Result<RelativeFileChanges, FilesError> {
    let record = cache.get(zip)?;
    let previous = record.as_ref().and_then(|r| r.zip_entries.as_ref());

    if !zip.is_file() {
        let removed = previous
            .into_iter()
            .flat_map(|entries| entries.keys())
            .map(|name| (RelativeFile::from_relative_path(zip, name), FileStatus::Removed))
            .collect();
        return Ok(removed);
    }

    let meta = fs::metadata(zip).map_err(|err| FilesError::io(zip, err))?;
    if let Some(record) = &record {
        if record.zip_entries.is_some() && record.is_current(&meta) {
            return Ok(RelativeFileChanges::new());
        }
    }

    let current = read_zip_index(zip)?.ok_or_else(|| FilesError::NotAZip {
        path: zip.to_path_buf(),
    })?;

    let Some(previous) = previous else {
        return Ok(current
            .keys()
            .map(|name| (RelativeFile::from_relative_path(zip, name), FileStatus::New))
            .collect());
    };

    let mut changes = RelativeFileChanges::new();
    for (name, snapshot) in &current {
        let status = match previous.get(name) {
            None => FileStatus::New,
            Some(old) if old != snapshot => FileStatus::Changed,
            Some(_) => continue,
        };
        changes.insert(RelativeFile::from_relative_path(zip, name), status);
    }
    for name in previous.keys().filter(|name| !current.contains_key(*name)) {
        changes.insert(
            RelativeFile::from_relative_path(zip, name),
            FileStatus::Removed,
        );
    }
    Ok(changes)
}

/// Everything found under `bases`, all marked new.
///
/// Bases that are files are read as zip archives, directories are walked,
/// and bases that do not exist are skipped.
pub fn from_zips_and_directories<I, P>(bases: I) -> Result<RelativeFileChanges, FilesError>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut sets = Vec::new();
    for base in bases {
        let base = base.as_ref();
        if base.is_file() {
            sets.push(from_zip(base, FileStatus::New)?);
        } else if base.is_dir() {
            sets.push(from_directory(base)?);
        }
    }
    Ok(union(sets))
}

/// Merge change sets.
///
/// # Panics
///
/// When the same file appears with two different statuses. Callers derive
/// every set from one consistent view of the inputs, so a conflict is a bug.
pub fn union(sets: impl IntoIterator<Item = RelativeFileChanges>) -> RelativeFileChanges {
    let mut out = RelativeFileChanges::new();
    for set in sets {
        for (file, status) in set {
            match out.entry(file) {
                Entry::Vacant(slot) => {
                    slot.insert(status);
                }
                Entry::Occupied(slot) => assert_eq!(
                    *slot.get(),
                    status,
                    "conflicting statuses for {}",
                    slot.key()
                ),
            }
        }
    }
    out
}

/// Number of distinct bases referenced by `changes`.
pub fn base_directory_count(changes: &RelativeFileChanges) -> usize {
    changes
        .keys()
        .map(RelativeFile::base)
        .collect::<BTreeSet<_>>()
        .len()
}

/// Turn a change set keyed by absolute path into one keyed by
/// [`RelativeFile`].
///
/// A changed path that is itself one of `bases` is a zip base and is diffed
/// entry-by-entry through `cache`. Any other path is attributed to the
/// innermost base directory containing it; paths outside every base are
/// ignored.
pub fn make_from_base_files(
    bases: &[PathBuf],
    updates: &BTreeMap<PathBuf, FileStatus>,
    cache: &FileCacheByPath,
) -> Result<RelativeFileChanges, FilesError> {
    let mut changes = RelativeFileChanges::new();
    for (file, status) in updates {
        if bases.iter().any(|base| base == file) {
            if file.is_dir() {
                continue;
            }
            changes.extend(from_zip_cached(file, cache)?);
            continue;
        }

        let base = bases
            .iter()
            .filter(|base| file.starts_with(base))
            .max_by_key(|base| base.components().count());
        match base {
            Some(base) => {
                changes.insert(RelativeFile::new(base, file)?, *status);
            }
            None => tracing::debug!(
                target = "apkpack.files",
                path = %file.display(),
                "ignoring change outside of every known base"
            ),
        }
    }
    Ok(changes)
}
