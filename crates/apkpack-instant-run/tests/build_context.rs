use apkpack_instant_run::{
    BuildContext, BuildMode, FileType, InstantRunError, PersistenceMode, VerifierStatus,
};
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};

fn context(build_id: u64, api_level: u32) -> BuildContext {
    let mut context = BuildContext::with_build_id(build_id);
    context.set_api_level(api_level, None, None);
    context
}

fn types(context: &BuildContext) -> Vec<FileType> {
    context
        .current_build()
        .artifacts
        .iter()
        .map(|a| a.file_type)
        .collect()
}

fn build_ids(context: &BuildContext) -> Vec<u64> {
    context.previous_builds().map(|b| b.build_id).collect()
}

/// Run the first build of a history and return its build info.
fn initial_build(dir: &Path, api_level: u32, main: &Path) -> String {
    let mut first = context(100, api_level);
    first
        .load_from_xml_file(&dir.join("build-info.xml"))
        .unwrap();
    assert_eq!(first.verifier_status(), Some(VerifierStatus::InitialBuild));
    first.add_changed_file(FileType::Main, main).unwrap();
    first.close().unwrap();
    first.to_xml_for_build_mode().unwrap()
}

#[test]
fn temp_build_info_document() {
    let mut context = BuildContext::with_build_id(5).with_plugin_version("1.0");
    context.set_api_level(23, None, Some("x86".to_string()));
    context.set_density(Some("xxhdpi".to_string()));
    context.set_secret_token(7);
    context
        .add_changed_file(FileType::Split, Path::new("/out/split.apk"))
        .unwrap();

    assert_eq!(
        context.to_xml(PersistenceMode::TempBuild).unwrap(),
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <instant-run abi=\"x86\" api-level=\"23\" density=\"xxhdpi\" format=\"8\" plugin-version=\"1.0\" timestamp=\"5\" token=\"7\">\n\
         \x20   <task duration=\"0\" name=\"javac\"/>\n\
         \x20   <task duration=\"0\" name=\"instant-run-dex\"/>\n\
         \x20   <task duration=\"0\" name=\"instant-run-transform\"/>\n\
         \x20   <task duration=\"0\" name=\"verifier\"/>\n\
         \x20   <artifact location=\"/out/split.apk\" type=\"SPLIT\"/>\n\
         </instant-run>\n"
    );
}

#[test]
fn missing_or_foreign_build_info_starts_a_new_history() {
    let dir = tempfile::tempdir().unwrap();
    let main = dir.path().join("app.apk");
    let xml = initial_build(dir.path(), 23, &main);

    let mut other_device = context(200, 24);
    other_device.load_from_xml(&xml).unwrap();
    assert_eq!(other_device.verifier_status(), Some(VerifierStatus::InitialBuild));
    assert_eq!(other_device.build_mode(), BuildMode::Full);
    assert!(other_device.last_build().is_none());

    let mut other_version = BuildContext::with_build_id(200).with_plugin_version("0.0.1");
    other_version.set_api_level(23, None, None);
    other_version.load_from_xml(&xml).unwrap();
    assert_eq!(other_version.verifier_status(), Some(VerifierStatus::InitialBuild));

    let mut garbage = context(200, 23);
    garbage.load_from_xml("<instant-run").unwrap();
    assert_eq!(garbage.verifier_status(), Some(VerifierStatus::InitialBuild));

    let mut same = context(200, 23);
    same.load_from_xml(&xml).unwrap();
    assert_eq!(same.verifier_status(), None);
    assert_eq!(build_ids(&same), vec![100]);
}

#[test]
fn loading_requires_an_api_level() {
    let dir = tempfile::tempdir().unwrap();
    let mut context = BuildContext::with_build_id(1);
    assert!(matches!(
        context.load_from_xml_file(&dir.path().join("build-info.xml")),
        Err(InstantRunError::ApiLevelNotSet)
    ));
}

#[test]
fn build_ids_stay_ordered_after_load() {
    let dir = tempfile::tempdir().unwrap();
    let xml = initial_build(dir.path(), 23, &dir.path().join("app.apk"));

    let mut same_millisecond = context(100, 23);
    same_millisecond.load_from_xml(&xml).unwrap();
    assert_eq!(same_millisecond.build_id(), 101);
}

#[test]
fn hot_swaps_before_a_cold_restart_are_purged() {
    let dir = tempfile::tempdir().unwrap();
    let xml = initial_build(dir.path(), 23, &dir.path().join("app.apk"));

    let mut hot = context(200, 23);
    hot.load_from_xml(&xml).unwrap();
    hot.set_verifier_status(VerifierStatus::Compatible);
    hot.add_changed_file(FileType::ReloadDex, &dir.path().join("reload.dex"))
        .unwrap();
    hot.close().unwrap();
    assert_eq!(hot.build_mode(), BuildMode::HotWarm);
    let xml = hot.to_xml_for_build_mode().unwrap();
    assert_eq!(build_ids(&hot), vec![100, 200]);

    let mut cold = context(300, 23);
    cold.load_from_xml(&xml).unwrap();
    assert_eq!(build_ids(&cold), vec![100, 200]);
    cold.set_verifier_status(VerifierStatus::MethodAdded);
    cold.add_changed_file(FileType::Split, &dir.path().join("slice_1.apk"))
        .unwrap();
    cold.close().unwrap();

    assert_eq!(cold.build_mode(), BuildMode::Cold);
    assert_eq!(build_ids(&cold), vec![100, 300]);
}

#[test]
fn repeated_locations_keep_the_newest_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let split = dir.path().join("slice_1.apk");
    let mut xml = initial_build(dir.path(), 23, &dir.path().join("app.apk"));

    for build_id in [200, 300] {
        let mut cold = context(build_id, 23);
        cold.load_from_xml(&xml).unwrap();
        cold.set_verifier_status(VerifierStatus::FieldAdded);
        cold.add_changed_file(FileType::Split, &split).unwrap();
        cold.close().unwrap();
        xml = cold.to_xml_for_build_mode().unwrap();
    }

    let mut last = context(400, 23);
    last.load_from_xml(&xml).unwrap();
    assert_eq!(build_ids(&last), vec![100, 300]);
}

#[test]
fn artifacts_are_filtered_by_patching_policy() {
    let dir = tempfile::tempdir().unwrap();

    let mut unknown_target = BuildContext::with_build_id(1);
    unknown_target
        .add_changed_file(FileType::Main, &dir.path().join("app.apk"))
        .unwrap();
    assert!(unknown_target.current_build().artifacts.is_empty());

    let mut pre_lollipop = context(1, 19);
    pre_lollipop
        .add_changed_file(FileType::Dex, &dir.path().join("a.dex"))
        .unwrap();
    pre_lollipop
        .add_changed_file(FileType::Split, &dir.path().join("a.apk"))
        .unwrap();
    pre_lollipop
        .add_changed_file(FileType::RestartDex, &dir.path().join("restart.dex"))
        .unwrap();
    pre_lollipop
        .add_changed_file(FileType::ReloadDex, &dir.path().join("reload.dex"))
        .unwrap();
    assert_eq!(
        types(&pre_lollipop),
        vec![FileType::RestartDex, FileType::ReloadDex]
    );

    let mut multi_dex = context(1, 21);
    multi_dex
        .add_changed_file(FileType::Split, &dir.path().join("a.apk"))
        .unwrap();
    multi_dex
        .add_changed_file(FileType::Dex, &dir.path().join("a.dex"))
        .unwrap();
    multi_dex
        .add_changed_file(FileType::Dex, &dir.path().join("a.dex"))
        .unwrap();
    assert_eq!(types(&multi_dex), vec![FileType::Dex]);
}

#[test]
fn main_artifact_replaces_what_it_contains() {
    let dir = tempfile::tempdir().unwrap();

    let mut multi_dex = context(1, 21);
    multi_dex
        .add_changed_file(FileType::Dex, &dir.path().join("a.dex"))
        .unwrap();
    multi_dex
        .add_changed_file(FileType::Main, &dir.path().join("unsigned.apk"))
        .unwrap();
    multi_dex
        .add_changed_file(FileType::Main, &dir.path().join("app.apk"))
        .unwrap();
    assert_eq!(types(&multi_dex), vec![FileType::Main]);
    assert_eq!(
        multi_dex.current_build().artifacts[0].location,
        dir.path().join("app.apk")
    );

    let mut multi_apk = context(1, 23);
    multi_apk
        .add_changed_file(FileType::Resources, &dir.path().join("resources.ap_"))
        .unwrap();
    multi_apk
        .add_changed_file(FileType::Split, &dir.path().join("slice_0.apk"))
        .unwrap();
    multi_apk
        .add_changed_file(FileType::Main, &dir.path().join("app.apk"))
        .unwrap();
    assert_eq!(types(&multi_apk), vec![FileType::Split, FileType::SplitMain]);
}

#[test]
fn first_incompatibility_sticks() {
    let mut context = context(1, 23);
    assert!(context.has_passed_verification());

    context.set_verifier_status(VerifierStatus::Compatible);
    assert!(context.has_passed_verification());
    context.set_verifier_status(VerifierStatus::MethodAdded);
    context.set_verifier_status(VerifierStatus::FieldAdded);
    context.set_verifier_status(VerifierStatus::Compatible);

    assert!(!context.has_passed_verification());
    assert_eq!(context.verifier_status(), Some(VerifierStatus::MethodAdded));
    assert_eq!(context.build_mode(), BuildMode::Cold);

    context.set_verifier_status(VerifierStatus::ManifestFileChange);
    assert_eq!(context.verifier_status(), Some(VerifierStatus::MethodAdded));
    assert_eq!(context.build_mode(), BuildMode::Full);
}

#[test]
fn cold_swap_is_a_full_build_before_lollipop() {
    let mut context = context(1, 19);
    context.set_verifier_status(VerifierStatus::MethodAdded);
    assert_eq!(context.build_mode(), BuildMode::Full);
}

#[test]
fn temp_build_info_is_merged_into_a_retry() {
    let dir = tempfile::tempdir().unwrap();
    let tmp = dir.path().join("build-info.tmp.xml");
    let dex = dir.path().join("slice_3.dex");

    let mut failed = BuildContext::with_build_id(100).with_tmp_build_info(&tmp);
    failed.set_api_level(21, None, None);
    failed.add_changed_file(FileType::Dex, &dex).unwrap();
    assert!(tmp.is_file());

    let mut retry = context(100, 21);
    retry.merge_from_file(&tmp).unwrap();
    retry
        .add_changed_file(FileType::ReloadDex, &dir.path().join("reload.dex"))
        .unwrap();
    retry.merge_from_file(&tmp).unwrap();
    assert_eq!(types(&retry), vec![FileType::Dex, FileType::ReloadDex]);
    assert_eq!(retry.current_build().artifacts[0].location, dex);

    let mut nothing_stashed = context(100, 21);
    nothing_stashed
        .merge_from_file(&dir.path().join("missing.xml"))
        .unwrap();
    assert!(nothing_stashed.current_build().artifacts.is_empty());
}

#[test]
fn full_build_collapses_splits_into_the_current_build() {
    let dir = tempfile::tempdir().unwrap();
    let path = |name: &str| -> PathBuf { dir.path().join(name) };

    let mut first = context(100, 23);
    first.set_verifier_status(VerifierStatus::InitialBuild);
    first.add_changed_file(FileType::Main, &path("app.apk")).unwrap();
    first.add_changed_file(FileType::Split, &path("slice_1.apk")).unwrap();
    first.add_changed_file(FileType::Split, &path("slice_2.apk")).unwrap();
    first.close().unwrap();
    let xml = first.to_xml_for_build_mode().unwrap();

    let mut cold = context(200, 23);
    cold.load_from_xml(&xml).unwrap();
    cold.set_verifier_status(VerifierStatus::MethodAdded);
    cold.add_changed_file(FileType::Split, &path("slice_1.apk")).unwrap();
    cold.close().unwrap();
    let xml = cold.to_xml_for_build_mode().unwrap();

    let mut full = context(300, 23);
    full.load_from_xml(&xml).unwrap();
    full.set_verifier_status(VerifierStatus::FullBuildRequested);
    full.add_changed_file(FileType::Split, &path("slice_2.apk")).unwrap();
    full.close().unwrap();

    let collapsed: Vec<(FileType, PathBuf)> = full
        .current_build()
        .artifacts
        .iter()
        .map(|a| (a.file_type, a.location.clone()))
        .collect();
    assert_eq!(
        collapsed,
        vec![
            (FileType::Split, path("slice_2.apk")),
            (FileType::Split, path("slice_1.apk")),
            (FileType::SplitMain, path("app.apk")),
        ]
    );

    let xml = full.to_xml_for_build_mode().unwrap();
    assert_eq!(xml.matches("<build ").count(), 1);
    assert!(xml.contains("<build timestamp=\"300\" verifier=\"FULL_BUILD_REQUESTED\">"));
}

#[test]
fn full_build_without_artifacts_reuses_the_previous_main_apk() {
    let dir = tempfile::tempdir().unwrap();
    let main = dir.path().join("app.apk");
    let xml = initial_build(dir.path(), 21, &main);

    let mut full = context(200, 21);
    full.load_from_xml(&xml).unwrap();
    full.set_verifier_status(VerifierStatus::FullBuildRequested);
    full.close().unwrap();
    assert_eq!(types(&full), vec![FileType::Main]);
    assert_eq!(full.current_build().artifacts[0].location, main);

    let mut empty = context(100, 21);
    empty.set_verifier_status(VerifierStatus::InitialBuild);
    assert!(matches!(
        empty.close(),
        Err(InstantRunError::NoMainArtifact)
    ));
}

#[test]
fn no_changes_record_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let xml = initial_build(dir.path(), 23, &dir.path().join("app.apk"));

    let mut idle = context(200, 23);
    idle.load_from_xml(&xml).unwrap();
    idle.close().unwrap();

    assert_eq!(idle.verifier_status(), None);
    assert!(idle.current_build().artifacts.is_empty());
    assert_eq!(idle.build_mode(), BuildMode::HotWarm);
}
