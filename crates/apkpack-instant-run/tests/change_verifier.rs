use apkpack_files::{FileStatus, RelativeFile, RelativeFileChanges};
use apkpack_instant_run::{
    BuildContext, ClassChangeVerifier, JarChanges, NoChangesVerifier, VerifierStatus,
};
use apkpack_test_utils::{write_zip, ClassBuilder, MethodSpec};
use std::fs;
use std::path::{Path, PathBuf};

fn class(name: &str, methods: &[&str]) -> Vec<u8> {
    methods
        .iter()
        .fold(ClassBuilder::new(name), |class, method| {
            class.method(MethodSpec::empty(method, "()V"))
        })
        .build()
}

fn write(path: &Path, bytes: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

fn changes(base: &Path, entries: &[(&Path, FileStatus)]) -> RelativeFileChanges {
    entries
        .iter()
        .map(|(file, status)| (RelativeFile::new(base, *file).unwrap(), *status))
        .collect()
}

struct Fixture {
    _dir: tempfile::TempDir,
    classes: PathBuf,
    backup: PathBuf,
    verifier: ClassChangeVerifier,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let classes = dir.path().join("classes");
        let backup = dir.path().join("verifier");
        fs::create_dir_all(&classes).unwrap();
        Self {
            verifier: ClassChangeVerifier::new(&backup),
            classes,
            backup,
            _dir: dir,
        }
    }

    fn class_file(&self, name: &str) -> PathBuf {
        self.classes.join(format!("com/example/{name}.class"))
    }

    fn verify_dir(&self, entries: &[(&Path, FileStatus)]) -> VerifierStatus {
        self.verifier
            .verify(&changes(&self.classes, entries), &JarChanges::new())
            .unwrap()
    }
}

#[test]
fn full_build_replaces_the_backup() {
    let fixture = Fixture::new();
    let foo = fixture.class_file("Foo");
    write(&foo, &class("com/example/Foo", &["run"]));
    write(&fixture.backup.join("stale.class"), b"old");

    fixture
        .verifier
        .backup_all(&[fixture.classes.clone()], &[])
        .unwrap();

    assert!(!fixture.backup.join("stale.class").exists());
    assert_eq!(
        fs::read(fixture.backup.join("com/example/Foo.class")).unwrap(),
        fs::read(&foo).unwrap()
    );
}

#[test]
fn changed_classes_are_verified_against_the_backup() {
    let fixture = Fixture::new();
    let foo = fixture.class_file("Foo");
    write(&foo, &class("com/example/Foo", &["run"]));
    fixture
        .verifier
        .backup_all(&[fixture.classes.clone()], &[])
        .unwrap();

    write(&foo, &class("com/example/Foo", &["run"]));
    assert_eq!(
        fixture.verify_dir(&[(&foo, FileStatus::Changed)]),
        VerifierStatus::Compatible
    );

    write(&foo, &class("com/example/Foo", &["run", "stop"]));
    assert_eq!(
        fixture.verify_dir(&[(&foo, FileStatus::Changed)]),
        VerifierStatus::MethodAdded
    );

    // The backup now holds the version with `stop`.
    assert_eq!(
        fixture.verify_dir(&[(&foo, FileStatus::Changed)]),
        VerifierStatus::Compatible
    );
}

#[test]
fn added_and_removed_classes() {
    let fixture = Fixture::new();
    let bar = fixture.class_file("Bar");
    write(&bar, &class("com/example/Bar", &[]));

    assert_eq!(
        fixture.verify_dir(&[(&bar, FileStatus::New)]),
        VerifierStatus::ClassAdded
    );
    let backup = fixture.backup.join("com/example/Bar.class");
    assert!(backup.is_file());

    fs::remove_file(&bar).unwrap();
    assert_eq!(
        fixture.verify_dir(&[(&bar, FileStatus::Removed)]),
        VerifierStatus::Compatible
    );
    assert!(!backup.exists());
}

#[test]
fn changed_class_without_backup_fails_verification() {
    let fixture = Fixture::new();
    let foo = fixture.class_file("Foo");
    write(&foo, &class("com/example/Foo", &[]));

    assert_eq!(
        fixture.verify_dir(&[(&foo, FileStatus::Changed)]),
        VerifierStatus::InstantRunFailure
    );
    assert!(fixture.backup.join("com/example/Foo.class").is_file());
}

#[test]
fn later_changes_are_backed_up_after_a_failure() {
    let fixture = Fixture::new();
    let a = fixture.class_file("A");
    let b = fixture.class_file("B");
    write(&a, &class("com/example/A", &["x"]));
    write(&b, &class("com/example/B", &["x"]));
    fixture
        .verifier
        .backup_all(&[fixture.classes.clone()], &[])
        .unwrap();

    write(&a, &class("com/example/A", &[]));
    write(&b, &class("com/example/B", &["x", "y"]));
    assert_eq!(
        fixture.verify_dir(&[(&a, FileStatus::Changed), (&b, FileStatus::Changed)]),
        VerifierStatus::MethodDeleted
    );
    assert_eq!(
        fs::read(fixture.backup.join("com/example/B.class")).unwrap(),
        fs::read(&b).unwrap()
    );
}

#[test]
fn jar_entries_are_verified_pairwise() {
    let fixture = Fixture::new();
    let jar = fixture.classes.join("lib.jar");
    let v1 = class("com/example/Foo", &["run"]);
    write_zip(
        &jar,
        &[("com/example/Foo.class", v1.as_slice()), ("META-INF/MANIFEST.MF", b"v1")],
    );
    let jar_changes = |status| JarChanges::from([(jar.clone(), status)]);

    assert_eq!(
        fixture
            .verifier
            .verify(&RelativeFileChanges::new(), &jar_changes(FileStatus::New))
            .unwrap(),
        VerifierStatus::Compatible
    );
    assert!(fixture.backup.join("lib.jar").is_file());

    let v2 = class("com/example/Foo", &["run", "stop"]);
    let other = class("com/example/Other", &[]);
    write_zip(
        &jar,
        &[
            ("com/example/Other.class", other.as_slice()),
            ("com/example/Foo.class", v2.as_slice()),
            ("META-INF/MANIFEST.MF", b"v2"),
        ],
    );
    assert_eq!(
        fixture
            .verifier
            .verify(&RelativeFileChanges::new(), &jar_changes(FileStatus::Changed))
            .unwrap(),
        VerifierStatus::MethodAdded
    );
    assert_eq!(
        fs::read(fixture.backup.join("lib.jar")).unwrap(),
        fs::read(&jar).unwrap()
    );

    fs::remove_file(&jar).unwrap();
    assert_eq!(
        fixture
            .verifier
            .verify(&RelativeFileChanges::new(), &jar_changes(FileStatus::Removed))
            .unwrap(),
        VerifierStatus::Compatible
    );
    assert!(!fixture.backup.join("lib.jar").exists());
}

#[test]
fn broken_jar_backups_fail_verification() {
    let fixture = Fixture::new();
    let jar = fixture.classes.join("lib.jar");
    write_zip(&jar, &[("com/example/Foo.class", class("com/example/Foo", &[]).as_slice())]);
    fs::create_dir_all(fixture.backup.join("lib.jar")).unwrap();

    let changed = JarChanges::from([(jar.clone(), FileStatus::Changed)]);
    assert_eq!(
        fixture
            .verifier
            .verify(&RelativeFileChanges::new(), &changed)
            .unwrap(),
        VerifierStatus::InstantRunFailure
    );
    assert!(fixture.backup.join("lib.jar").is_file());

    let missing = JarChanges::from([(fixture.classes.join("gone.jar"), FileStatus::New)]);
    assert_eq!(
        fixture
            .verifier
            .verify(&RelativeFileChanges::new(), &missing)
            .unwrap(),
        VerifierStatus::InstantRunFailure
    );
}

#[test]
fn verification_result_is_recorded_on_the_context() {
    let fixture = Fixture::new();
    let bar = fixture.class_file("Bar");
    write(&bar, &class("com/example/Bar", &[]));

    let mut context = BuildContext::with_build_id(1);
    context.set_api_level(23, None, None);
    let status = fixture
        .verifier
        .verify_into(
            &mut context,
            &changes(&fixture.classes, &[(&bar, FileStatus::New)]),
            &JarChanges::new(),
        )
        .unwrap();

    assert_eq!(status, VerifierStatus::ClassAdded);
    assert_eq!(context.verifier_status(), Some(VerifierStatus::ClassAdded));
}

#[test]
fn no_changes_verifier_flags_any_change() {
    let fixture = Fixture::new();
    let lib = fixture.classes.join("lib/x86/libfoo.so");
    write(&lib, b"elf");

    let mut context = BuildContext::with_build_id(1);
    context.set_api_level(23, None, None);
    let verifier = NoChangesVerifier::java_resources();

    let empty = RelativeFileChanges::new();
    assert!(!verifier.verify([&empty, &empty], &mut context));
    assert_eq!(context.verifier_status(), None);

    let native = changes(&fixture.classes, &[(&lib, FileStatus::Changed)]);
    assert!(verifier.verify([&empty, &native], &mut context));
    assert_eq!(
        context.verifier_status(),
        Some(VerifierStatus::JavaResourcesChanged)
    );

    assert!(NoChangesVerifier::dependencies().verify([&native], &mut context));
    assert_eq!(
        context.verifier_status(),
        Some(VerifierStatus::JavaResourcesChanged)
    );
}
