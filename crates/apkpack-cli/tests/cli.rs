use apkpack_test_utils::{write_zip, ClassBuilder, MethodSpec};
use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

fn apkpack() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("apkpack"))
}

fn class(methods: &[&str]) -> Vec<u8> {
    methods
        .iter()
        .fold(ClassBuilder::new("com/example/Foo"), |class, method| {
            class.method(MethodSpec::empty(method, "()V"))
        })
        .build()
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout is json")
}

#[test]
fn help_lists_subcommands() {
    apkpack()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("package")
                .and(predicate::str::contains("native-json"))
                .and(predicate::str::contains("build-info"))
                .and(predicate::str::contains("verify-class"))
                .and(predicate::str::contains("manifest-crc")),
        );
}

#[test]
fn verify_class_reports_compatible_change() {
    let temp = TempDir::new().unwrap();
    let original = temp.child("Foo.class");
    original.write_binary(&class(&["run"])).unwrap();
    let updated = temp.child("Foo2.class");
    updated.write_binary(&class(&["run"])).unwrap();

    let output = apkpack()
        .current_dir(temp.path())
        .args(["verify-class", "--json"])
        .arg(original.path())
        .arg(updated.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    let json = stdout_json(&output);
    assert_eq!(json["status"], "COMPATIBLE");
    assert_eq!(json["compatible"], true);
}

#[test]
fn verify_class_exits_one_when_a_restart_is_needed() {
    let temp = TempDir::new().unwrap();
    let original = temp.child("Foo.class");
    original.write_binary(&class(&["run"])).unwrap();
    let updated = temp.child("Foo2.class");
    updated.write_binary(&class(&["run", "stop"])).unwrap();

    apkpack()
        .current_dir(temp.path())
        .arg("verify-class")
        .arg(original.path())
        .arg(updated.path())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("METHOD_ADDED"));
}

#[test]
fn manifest_crc_detects_a_change() {
    let temp = TempDir::new().unwrap();
    let resources = temp.child("resources.ap_");
    let support = temp.child("support");
    write_zip(resources.path(), &[("AndroidManifest.xml", b"<manifest/>")]);

    let run = || {
        apkpack()
            .current_dir(temp.path())
            .arg("manifest-crc")
            .arg(resources.path())
            .arg("--support-dir")
            .arg(support.path())
            .arg("--json")
            .output()
            .unwrap()
    };

    let first = stdout_json(&run());
    assert_eq!(first["previous"], serde_json::Value::Null);
    assert_eq!(first["changed"], false);
    support.child("manifest.crc").assert(predicate::path::exists());

    write_zip(
        resources.path(),
        &[("AndroidManifest.xml", b"<manifest package=\"b\"/>")],
    );
    let second = stdout_json(&run());
    assert_eq!(second["changed"], true);
    assert_eq!(second["build_mode"], "COLD");
}

#[test]
fn full_package_writes_the_apk() {
    let temp = TempDir::new().unwrap();
    temp.child("dex/classes.dex").write_binary(b"dex").unwrap();
    temp.child("assets/a.txt").write_str("asset").unwrap();
    let apk = temp.child("out/app.apk");

    let output = apkpack()
        .current_dir(temp.path())
        .arg("package")
        .arg("--output")
        .arg(apk.path())
        .arg("--incremental-dir")
        .arg(temp.child("incremental").path())
        .arg("--dex")
        .arg(temp.child("dex").path())
        .arg("--assets")
        .arg(temp.child("assets").path())
        .args(["--full", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    let json = stdout_json(&output);
    assert_eq!(json["full"], true);
    apk.assert(predicate::path::is_file());
}

#[test]
fn config_file_is_applied() {
    let temp = TempDir::new().unwrap();
    temp.child("apkpack.toml")
        .write_str("[logging]\nlevel = \"warn\"\n")
        .unwrap();
    temp.child("bad.toml").write_str("[logging\n").unwrap();

    apkpack()
        .current_dir(temp.path())
        .args(["--config", "bad.toml", "build-info", "missing.xml", "--api-level", "23"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to parse toml config"));

    apkpack()
        .current_dir(temp.path())
        .args(["build-info", "missing.xml", "--api-level", "23", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("INITIAL_BUILD"));
}

#[test]
fn native_json_reports_configuration_errors() {
    let temp = TempDir::new().unwrap();
    temp.child("jni/Android.mk").write_str("").unwrap();

    apkpack()
        .current_dir(temp.path())
        .arg("native-json")
        .args(["--build-system", "ndk-build"])
        .arg("--makefile")
        .arg(temp.child("jni/Android.mk").path())
        .arg("--ndk")
        .arg(temp.child("no-ndk").path())
        .arg("--json-folder")
        .arg(temp.child("json").path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("NDK not configured"));
    temp.child("json").assert(predicate::path::missing());
}
