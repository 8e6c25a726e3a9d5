use apkpack_instant_run::{
    check_manifest_crc, manifest_crc, BuildContext, BuildMode, VerifierStatus, MANIFEST_CRC_FILE,
};
use apkpack_test_utils::write_zip;
use std::fs;

fn context() -> BuildContext {
    let mut context = BuildContext::with_build_id(1);
    context.set_api_level(23, None, None);
    context
}

#[test]
fn manifest_change_forces_a_cold_swap() {
    let dir = tempfile::tempdir().unwrap();
    let resources = dir.path().join("resources.ap_");
    let support = dir.path().join("instant-run-support");

    write_zip(
        &resources,
        &[("AndroidManifest.xml", b"<manifest/>"), ("res/a.png", b"png")],
    );
    let mut first = context();
    let check = check_manifest_crc(&resources, &support, &mut first).unwrap();
    assert_eq!(check.previous, None);
    assert!(!check.changed());
    assert_eq!(first.verifier_status(), None);
    let stored = fs::read_to_string(support.join(MANIFEST_CRC_FILE)).unwrap();
    assert_eq!(Some(stored.parse::<u32>().unwrap()), check.current);

    let mut unchanged = context();
    assert!(!check_manifest_crc(&resources, &support, &mut unchanged)
        .unwrap()
        .changed());
    assert!(unchanged.has_passed_verification());

    write_zip(
        &resources,
        &[("AndroidManifest.xml", b"<manifest package=\"b\"/>")],
    );
    let mut changed = context();
    let check = check_manifest_crc(&resources, &support, &mut changed).unwrap();
    assert!(check.changed());
    assert_eq!(
        changed.verifier_status(),
        Some(VerifierStatus::BinaryManifestFileChange)
    );
    assert_eq!(changed.build_mode(), BuildMode::Cold);
    let stored = fs::read_to_string(support.join(MANIFEST_CRC_FILE)).unwrap();
    assert_eq!(Some(stored.parse::<u32>().unwrap()), check.current);
}

#[test]
fn archive_without_manifest_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let resources = dir.path().join("resources.ap_");
    write_zip(&resources, &[("res/a.png", b"png")]);

    assert_eq!(manifest_crc(&resources).unwrap(), None);

    let mut context = context();
    let check = check_manifest_crc(&resources, dir.path(), &mut context).unwrap();
    assert!(!check.changed());
    assert!(!dir.path().join(MANIFEST_CRC_FILE).exists());
}
