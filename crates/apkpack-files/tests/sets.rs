use apkpack_cache::FileCacheByPath;
use apkpack_files::{
    base_directory_count, from_directory, from_zip, from_zip_cached, from_zips_and_directories,
    make_from_base_files, union, FileStatus, RelativeFile, RelativeFileChanges,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, bytes) in entries {
        zip.start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
    // Make sure the rewrite is observable through the mtime check.
    let file = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(entries.len() as u64 + 1))
        .unwrap();
}

fn summarize(changes: &RelativeFileChanges) -> Vec<(String, FileStatus)> {
    changes
        .iter()
        .map(|(file, status)| (file.relative_path(), *status))
        .collect()
}

#[test]
fn directory_scan_marks_everything_new() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("assets");
    std::fs::create_dir_all(dir.join("fonts")).unwrap();
    std::fs::write(dir.join("b.txt"), b"b").unwrap();
    std::fs::write(dir.join("fonts/a.ttf"), b"a").unwrap();

    let changes = from_directory(&dir).unwrap();
    assert_eq!(
        summarize(&changes),
        vec![
            ("b.txt".to_string(), FileStatus::New),
            ("fonts/a.ttf".to_string(), FileStatus::New),
        ]
    );
}

#[test]
fn zip_scan_skips_directory_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let zip_path = tmp.path().join("lib.jar");
    {
        let file = std::fs::File::create(&zip_path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.add_directory("META-INF/", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.start_file("META-INF/x.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"x").unwrap();
        zip.finish().unwrap();
    }

    let changes = from_zip(&zip_path, FileStatus::Changed).unwrap();
    assert_eq!(
        summarize(&changes),
        vec![("META-INF/x.txt".to_string(), FileStatus::Changed)]
    );
}

#[test]
fn cached_zip_diff_reports_entry_level_changes() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = FileCacheByPath::new(tmp.path().join("zip-cache"));
    let zip_path = tmp.path().join("resources.ap_");

    write_zip(&zip_path, &[("keep", b"same"), ("edit", b"v1"), ("drop", b"gone")]);
    let first = from_zip_cached(&zip_path, &cache).unwrap();
    assert!(first.values().all(|status| *status == FileStatus::New));
    assert_eq!(first.len(), 3);
    cache.add(&zip_path).unwrap();

    // Unchanged zip: nothing to do.
    assert!(from_zip_cached(&zip_path, &cache).unwrap().is_empty());

    write_zip(&zip_path, &[("keep", b"same"), ("edit", b"v2!"), ("add", b"new")]);
    let second = from_zip_cached(&zip_path, &cache).unwrap();
    assert_eq!(
        summarize(&second),
        vec![
            ("add".to_string(), FileStatus::New),
            ("drop".to_string(), FileStatus::Removed),
            ("edit".to_string(), FileStatus::Changed),
        ]
    );
    cache.add(&zip_path).unwrap();

    std::fs::remove_file(&zip_path).unwrap();
    let third = from_zip_cached(&zip_path, &cache).unwrap();
    assert_eq!(third.len(), 3);
    assert!(third.values().all(|status| *status == FileStatus::Removed));
}

#[test]
fn zips_and_directories_are_merged_and_missing_bases_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("dex");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("classes.dex"), b"dex").unwrap();
    let zip_path = tmp.path().join("res.zip");
    write_zip(&zip_path, &[("classes.dex", b"other")]);

    let changes =
        from_zips_and_directories([dir.clone(), zip_path.clone(), tmp.path().join("missing")])
            .unwrap();
    assert_eq!(changes.len(), 2);
    assert_eq!(base_directory_count(&changes), 2);
    assert!(changes.contains_key(&RelativeFile::from_relative_path(&dir, "classes.dex")));
    assert!(changes.contains_key(&RelativeFile::from_relative_path(&zip_path, "classes.dex")));
}

#[test]
fn union_accepts_identical_duplicates() {
    let file = RelativeFile::from_relative_path("base", "a");
    let a = RelativeFileChanges::from([(file.clone(), FileStatus::New)]);
    let b = RelativeFileChanges::from([(file.clone(), FileStatus::New)]);
    assert_eq!(union([a, b]).len(), 1);
}

#[test]
#[should_panic(expected = "conflicting statuses")]
fn union_rejects_conflicting_statuses() {
    let file = RelativeFile::from_relative_path("base", "a");
    let a = RelativeFileChanges::from([(file.clone(), FileStatus::New)]);
    let b = RelativeFileChanges::from([(file, FileStatus::Removed)]);
    union([a, b]);
}

#[test]
fn base_file_updates_are_attributed_to_their_base() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = FileCacheByPath::new(tmp.path().join("zip-cache"));
    let dir = tmp.path().join("assets");
    std::fs::create_dir_all(dir.join("nested")).unwrap();
    std::fs::write(dir.join("nested/a.txt"), b"a").unwrap();
    let zip_path = tmp.path().join("lib.jar");
    write_zip(&zip_path, &[("r.txt", b"r")]);

    let bases: Vec<PathBuf> = vec![dir.clone(), zip_path.clone()];
    let updates = BTreeMap::from([
        (dir.join("nested/a.txt"), FileStatus::Changed),
        (dir.join("deleted.txt"), FileStatus::Removed),
        (zip_path.clone(), FileStatus::New),
        (tmp.path().join("elsewhere.txt"), FileStatus::New),
    ]);

    let changes = make_from_base_files(&bases, &updates, &cache).unwrap();
    assert_eq!(
        changes,
        RelativeFileChanges::from([
            (
                RelativeFile::from_relative_path(&dir, "deleted.txt"),
                FileStatus::Removed
            ),
            (
                RelativeFile::from_relative_path(&dir, "nested/a.txt"),
                FileStatus::Changed
            ),
            (
                RelativeFile::from_relative_path(&zip_path, "r.txt"),
                FileStatus::New
            ),
        ])
    );
}
