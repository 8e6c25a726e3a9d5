use crate::error::InstantRunError;
use crate::status::{BuildMode, ColdswapMode, PatchingPolicy, VerifierStatus};
use apkpack_cache::{atomic_write, now_millis};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

type XmlWriter = Writer<Vec<u8>>;

const TAG_INSTANT_RUN: &str = "instant-run";
const TAG_BUILD: &str = "build";
const TAG_ARTIFACT: &str = "artifact";
const TAG_TASK: &str = "task";
const ATTR_ABI: &str = "abi";
const ATTR_API_LEVEL: &str = "api-level";
const ATTR_DENSITY: &str = "density";
const ATTR_DURATION: &str = "duration";
const ATTR_FORMAT: &str = "format";
const ATTR_LOCATION: &str = "location";
const ATTR_NAME: &str = "name";
const ATTR_PLUGIN_VERSION: &str = "plugin-version";
const ATTR_TIMESTAMP: &str = "timestamp";
const ATTR_TOKEN: &str = "token";
const ATTR_TYPE: &str = "type";
const ATTR_VERIFIER: &str = "verifier";

/// Version of the build-info document understood by the deployment client.
pub const CURRENT_FORMAT: &str = "8";

/// Kind of artifact produced by a build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    Main,
    SplitMain,
    ReloadDex,
    RestartDex,
    Dex,
    Split,
    Resources,
}

impl FileType {
    pub const ALL: [FileType; 7] = [
        FileType::Main,
        FileType::SplitMain,
        FileType::ReloadDex,
        FileType::RestartDex,
        FileType::Dex,
        FileType::Split,
        FileType::Resources,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Main => "MAIN",
            FileType::SplitMain => "SPLIT_MAIN",
            FileType::ReloadDex => "RELOAD_DEX",
            FileType::RestartDex => "RESTART_DEX",
            FileType::Dex => "DEX",
            FileType::Split => "SPLIT",
            FileType::Resources => "RESOURCES",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.as_str() == name)
    }
}

/// Build steps whose duration is reported in the build info.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskType {
    Javac,
    InstantRunDex,
    InstantRunTransform,
    Verifier,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::Javac,
        TaskType::InstantRunDex,
        TaskType::InstantRunTransform,
        TaskType::Verifier,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Javac => "javac",
            TaskType::InstantRunDex => "instant-run-dex",
            TaskType::InstantRunTransform => "instant-run-transform",
            TaskType::Verifier => "verifier",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Which builds [`BuildContext::to_xml`] writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistenceMode {
    /// Only the most recent build.
    FullBuild,
    /// Every build still in the history.
    IncrementalBuild,
    /// No build elements; the artifacts recorded so far sit on the root.
    TempBuild,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub file_type: FileType,
    pub location: PathBuf,
}

impl Artifact {
    pub fn new(file_type: FileType, location: impl Into<PathBuf>) -> Self {
        Self {
            file_type,
            location: location.into(),
        }
    }

    /// Every artifact except a reload dex replaces older artifacts at the
    /// same location.
    pub fn is_accumulative(&self) -> bool {
        self.file_type != FileType::ReloadDex
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Build {
    pub build_id: u64,
    pub verifier_status: Option<VerifierStatus>,
    pub artifacts: Vec<Artifact>,
}

impl Build {
    fn new(build_id: u64) -> Self {
        Self {
            build_id,
            verifier_status: None,
            artifacts: Vec::new(),
        }
    }

    pub fn artifact_for_type(&self, file_type: FileType) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.file_type == file_type)
    }

    fn has_code_artifact(&self) -> bool {
        self.artifacts.iter().any(|a| {
            matches!(
                a.file_type,
                FileType::Dex | FileType::Split | FileType::Main | FileType::RestartDex
            )
        })
    }

    fn push_attributes(&self, element: &mut BytesStart<'_>) {
        element.push_attribute((ATTR_TIMESTAMP, self.build_id.to_string().as_str()));
        if let Some(status) = self.verifier_status {
            element.push_attribute((ATTR_VERIFIER, status.as_str()));
        }
    }

    fn write_artifacts(&self, writer: &mut XmlWriter) -> quick_xml::Result<()> {
        for artifact in &self.artifacts {
            let mut element = BytesStart::new(TAG_ARTIFACT);
            element.push_attribute((ATTR_LOCATION, artifact.location.to_string_lossy().as_ref()));
            element.push_attribute((ATTR_TYPE, artifact.file_type.as_str()));
            writer.write_event(Event::Empty(element))?;
        }
        Ok(())
    }

    fn write_element(&self, writer: &mut XmlWriter) -> quick_xml::Result<()> {
        let mut element = BytesStart::new(TAG_BUILD);
        self.push_attributes(&mut element);
        if self.artifacts.is_empty() {
            return writer.write_event(Event::Empty(element));
        }
        writer.write_event(Event::Start(element))?;
        self.write_artifacts(writer)?;
        writer.write_event(Event::End(BytesEnd::new(TAG_BUILD)))
    }

    fn from_node(node: roxmltree::Node<'_, '_>) -> Result<Self, String> {
        let timestamp = node
            .attribute(ATTR_TIMESTAMP)
            .ok_or_else(|| format!("<{}> without {ATTR_TIMESTAMP}", node.tag_name().name()))?;
        let build_id = timestamp
            .parse::<u64>()
            .map_err(|_| format!("invalid {ATTR_TIMESTAMP} '{timestamp}'"))?;
        let verifier_status = match node.attribute(ATTR_VERIFIER) {
            Some(name) => Some(
                VerifierStatus::from_name(name)
                    .ok_or_else(|| format!("unknown verifier status '{name}'"))?,
            ),
            None => None,
        };

        let mut artifacts = Vec::new();
        for child in node
            .children()
            .filter(|n| n.is_element() && n.has_tag_name(TAG_ARTIFACT))
        {
            let type_name = child
                .attribute(ATTR_TYPE)
                .ok_or_else(|| "artifact without type".to_string())?;
            let file_type = FileType::from_name(type_name)
                .ok_or_else(|| format!("unknown artifact type '{type_name}'"))?;
            let location = child
                .attribute(ATTR_LOCATION)
                .ok_or_else(|| "artifact without location".to_string())?;
            artifacts.push(Artifact::new(file_type, location));
        }

        Ok(Self {
            build_id,
            verifier_status,
            artifacts,
        })
    }
}

/// State of one build, plus the history of previous builds that the
/// deployment client still needs.
///
/// A context is created per build, seeded from the previous build-info file
/// with [`BuildContext::load_from_xml_file`], fed with verifier results and
/// produced artifacts, then [`closed`](BuildContext::close) and written back
/// with [`BuildContext::to_xml`].
#[derive(Debug)]
pub struct BuildContext {
    current: Build,
    previous: BTreeMap<u64, Build>,
    api_level: Option<u32>,
    patching_policy: Option<PatchingPolicy>,
    density: Option<String>,
    abi: Option<String>,
    token: i64,
    build_mode: BuildMode,
    plugin_version: String,
    tmp_build_info: Option<PathBuf>,
    task_started: [Option<Instant>; 4],
    task_durations: [u64; 4],
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildContext {
    pub fn new() -> Self {
        Self::with_build_id(now_millis())
    }

    pub fn with_build_id(build_id: u64) -> Self {
        Self {
            current: Build::new(build_id),
            previous: BTreeMap::new(),
            api_level: None,
            patching_policy: None,
            density: None,
            abi: None,
            token: 0,
            build_mode: BuildMode::HotWarm,
            plugin_version: env!("CARGO_PKG_VERSION").to_string(),
            tmp_build_info: None,
            task_started: [None; 4],
            task_durations: [0; 4],
        }
    }

    /// Tool version recorded in, and required from, build-info files.
    pub fn with_plugin_version(mut self, version: impl Into<String>) -> Self {
        self.plugin_version = version.into();
        self
    }

    /// File that receives a temporary build-info document every time an
    /// artifact is recorded, so a failed build still reports what it
    /// produced.
    pub fn with_tmp_build_info(mut self, path: impl Into<PathBuf>) -> Self {
        self.tmp_build_info = Some(path.into());
        self
    }

    pub fn build_id(&self) -> u64 {
        self.current.build_id
    }

    pub fn plugin_version(&self) -> &str {
        &self.plugin_version
    }

    pub fn set_api_level(
        &mut self,
        api_level: u32,
        coldswap_mode: Option<ColdswapMode>,
        abi: Option<String>,
    ) {
        self.api_level = Some(api_level);
        self.patching_policy = Some(PatchingPolicy::for_target(api_level, coldswap_mode));
        self.abi = abi;
    }

    pub fn api_level(&self) -> Result<u32, InstantRunError> {
        self.api_level.ok_or(InstantRunError::ApiLevelNotSet)
    }

    pub fn patching_policy(&self) -> Option<PatchingPolicy> {
        self.patching_policy
    }

    pub fn set_density(&mut self, density: Option<String>) {
        self.density = density;
    }

    pub fn density(&self) -> Option<&str> {
        self.density.as_deref()
    }

    pub fn abi(&self) -> Option<&str> {
        self.abi.as_deref()
    }

    pub fn secret_token(&self) -> i64 {
        self.token
    }

    pub fn set_secret_token(&mut self, token: i64) {
        self.token = token;
    }

    pub fn build_mode(&self) -> BuildMode {
        self.build_mode
    }

    pub fn start_recording(&mut self, task: TaskType) {
        self.task_started[task.index()] = Some(Instant::now());
    }

    /// Stop timing `task` and return its duration in milliseconds.
    pub fn stop_recording(&mut self, task: TaskType) -> u64 {
        let duration = self.task_started[task.index()]
            .take()
            .map_or(0, |started| started.elapsed().as_millis() as u64);
        self.task_durations[task.index()] = duration;
        duration
    }

    /// Record a verifier result.
    ///
    /// The first incompatibility sticks: a later status only replaces an
    /// unset or [`VerifierStatus::Compatible`] one. The build mode always
    /// escalates to the most severe mode seen.
    pub fn set_verifier_status(&mut self, status: VerifierStatus) {
        if matches!(
            self.current.verifier_status,
            None | Some(VerifierStatus::Compatible)
        ) {
            self.current.verifier_status = Some(status);
        }
        self.build_mode = self
            .build_mode
            .combine(status.build_mode(self.patching_policy));
        tracing::info!(
            target = "apkpack.instant_run",
            status = %status,
            build_mode = %self.build_mode,
            "verifier result recorded"
        );
    }

    pub fn verifier_status(&self) -> Option<VerifierStatus> {
        self.current.verifier_status
    }

    pub fn has_passed_verification(&self) -> bool {
        matches!(
            self.current.verifier_status,
            None | Some(VerifierStatus::Compatible)
        )
    }

    /// Record an artifact produced by this build.
    ///
    /// Ignored until the patching policy is known, for duplicates, and for
    /// code artifacts the patching policy does not deliver.
    pub fn add_changed_file(
        &mut self,
        file_type: FileType,
        file: &Path,
    ) -> Result<(), InstantRunError> {
        let Some(policy) = self.patching_policy else {
            return Ok(());
        };
        let location = absolute(file);
        if self
            .current
            .artifacts
            .iter()
            .any(|a| a.file_type == file_type && a.location == location)
        {
            return Ok(());
        }

        let delivered = match file_type {
            FileType::ReloadDex | FileType::Main | FileType::Resources => true,
            _ => match policy {
                PatchingPolicy::PreLollipop => file_type == FileType::RestartDex,
                PatchingPolicy::MultiDex => file_type == FileType::Dex,
                PatchingPolicy::MultiApk => file_type == FileType::Split,
            },
        };
        if !delivered {
            tracing::debug!(
                target = "apkpack.instant_run",
                file_type = file_type.as_str(),
                policy = %policy,
                "artifact not delivered under patching policy"
            );
            return Ok(());
        }

        let mut file_type = file_type;
        if file_type == FileType::Main {
            if policy == PatchingPolicy::MultiApk {
                file_type = FileType::SplitMain;
            }
            // Signing and aligning report the main APK several times; the
            // last one wins.
            if let Some(pos) = self
                .current
                .artifacts
                .iter()
                .position(|a| a.file_type == file_type)
            {
                self.current.artifacts.remove(pos);
            }
            // Under multidex the dex shards ship inside the main APK.
            if policy == PatchingPolicy::MultiDex {
                self.current.artifacts.clear();
            }
            // The main APK carries the resources.
            self.current
                .artifacts
                .retain(|a| a.file_type != FileType::Resources);
        }

        self.current.artifacts.push(Artifact::new(file_type, location));
        self.write_tmp_build_info()
    }

    pub fn current_build(&self) -> &Build {
        &self.current
    }

    pub fn previous_builds(&self) -> impl Iterator<Item = &Build> + '_ {
        self.previous.values()
    }

    pub fn last_build(&self) -> Option<&Build> {
        self.previous.values().next_back()
    }

    /// Oldest artifact of `file_type` still in the history.
    pub fn past_builds_artifact_for_type(&self, file_type: FileType) -> Option<&Artifact> {
        self.previous
            .values()
            .find_map(|build| build.artifact_for_type(file_type))
    }

    /// Read the history from a build-info file.
    ///
    /// A missing or unreadable file, or one written for another API level or
    /// tool version, makes this the first build of a new history
    /// ([`VerifierStatus::InitialBuild`]).
    pub fn load_from_xml_file(&mut self, path: &Path) -> Result<(), InstantRunError> {
        let api_level = self.api_level()?;
        match std::fs::read_to_string(path) {
            Ok(contents) => self.load_document(&contents, api_level, path),
            Err(err) => {
                tracing::debug!(
                    target = "apkpack.instant_run",
                    path = %path.display(),
                    error = %err,
                    "no previous build info"
                );
                self.set_verifier_status(VerifierStatus::InitialBuild);
                Ok(())
            }
        }
    }

    pub fn load_from_xml(&mut self, xml: &str) -> Result<(), InstantRunError> {
        let api_level = self.api_level()?;
        self.load_document(xml, api_level, Path::new("<memory>"))
    }

    fn load_document(
        &mut self,
        xml: &str,
        api_level: u32,
        origin: &Path,
    ) -> Result<(), InstantRunError> {
        match self.parse_history(xml, api_level) {
            Ok((token, builds)) => {
                if let Some(token) = token {
                    self.token = token;
                }
                self.previous = builds;
                // Build ids are millisecond timestamps; keep the current
                // build strictly newest even when builds follow each other
                // within the same millisecond.
                if let Some(last) = self.previous.keys().next_back() {
                    if self.current.build_id <= *last {
                        self.current.build_id = last + 1;
                    }
                }
            }
            Err(reason) => {
                tracing::debug!(
                    target = "apkpack.instant_run",
                    path = %origin.display(),
                    reason = %reason,
                    "previous build info not reusable"
                );
                self.set_verifier_status(VerifierStatus::InitialBuild);
            }
        }
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn parse_history(
        &self,
        xml: &str,
        api_level: u32,
    ) -> Result<(Option<i64>, BTreeMap<u64, Build>), String> {
        let doc = roxmltree::Document::parse(xml).map_err(|err| err.to_string())?;
        let root = doc.root_element();
        if !root.has_tag_name(TAG_INSTANT_RUN) {
            return Err(format!("unexpected root <{}>", root.tag_name().name()));
        }
        if root.attribute(ATTR_API_LEVEL) != Some(api_level.to_string().as_str()) {
            return Err("target device api level has changed".to_string());
        }
        if root.attribute(ATTR_PLUGIN_VERSION) != Some(self.plugin_version.as_str()) {
            return Err("plugin version has changed".to_string());
        }

        let token = match root.attribute(ATTR_TOKEN).filter(|t| !t.is_empty()) {
            Some(token) => Some(
                token
                    .parse::<i64>()
                    .map_err(|_| format!("invalid {ATTR_TOKEN} '{token}'"))?,
            ),
            None => None,
        };

        let mut builds = BTreeMap::new();
        let last = Build::from_node(root)?;
        builds.insert(last.build_id, last);
        for node in root
            .children()
            .filter(|n| n.is_element() && n.has_tag_name(TAG_BUILD))
        {
            let build = Build::from_node(node)?;
            builds.insert(build.build_id, build);
        }
        Ok((token, builds))
    }

    /// Merge the artifacts of a temporary build-info file left by an earlier
    /// attempt of this build.
    pub fn merge_from_file(&mut self, tmp_build_info: &Path) -> Result<(), InstantRunError> {
        let contents = match std::fs::read_to_string(tmp_build_info) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(InstantRunError::io(tmp_build_info, err)),
        };
        self.merge_from(&contents, tmp_build_info)
    }

    pub fn merge_from(&mut self, xml: &str, origin: &Path) -> Result<(), InstantRunError> {
        let doc = roxmltree::Document::parse(xml).map_err(|source| InstantRunError::Xml {
            path: origin.to_path_buf(),
            source,
        })?;
        let stashed = Build::from_node(doc.root_element()).map_err(|detail| {
            InstantRunError::InvalidBuildInfo {
                path: origin.to_path_buf(),
                detail,
            }
        })?;
        for artifact in stashed.artifacts {
            if !self.current.artifacts.contains(&artifact) {
                self.current.artifacts.push(artifact);
            }
        }
        Ok(())
    }

    /// Finish the build: add it to the history and drop what the client no
    /// longer needs.
    pub fn close(&mut self) -> Result<(), InstantRunError> {
        let current_id = self.current.build_id;
        self.previous.insert(current_id, self.current.clone());
        self.purge()?;
        if let Some(current) = self.previous.get(&current_id) {
            self.current = current.clone();
        }
        Ok(())
    }

    fn purge(&mut self) -> Result<(), InstantRunError> {
        let current_id = self.current.build_id;
        let Some(initial_id) = self.previous.keys().next().copied() else {
            return Ok(());
        };

        let mut found_cold_restart = false;
        let mut seen_locations = HashSet::new();
        let ids: Vec<u64> = self.previous.keys().rev().copied().collect();
        for id in ids {
            // The oldest build is the full build everything else patches.
            if id == initial_id {
                continue;
            }
            let Some((status, has_code)) = self
                .previous
                .get(&id)
                .map(|build| (build.verifier_status, build.has_code_artifact()))
            else {
                continue;
            };
            match status {
                Some(VerifierStatus::Compatible) => {
                    // Hot swaps before a cold restart are already contained
                    // in the restarted application.
                    if found_cold_restart {
                        self.previous.remove(&id);
                        continue;
                    }
                }
                Some(_) => found_cold_restart = true,
                // No verifier status: either a full build or no code change.
                None => found_cold_restart = has_code,
            }

            let Some(build) = self.previous.get_mut(&id) else {
                continue;
            };
            if found_cold_restart && self.patching_policy == Some(PatchingPolicy::MultiApk) {
                if let Some(pos) = build
                    .artifacts
                    .iter()
                    .position(|a| a.file_type == FileType::Resources)
                {
                    build.artifacts.remove(pos);
                }
            }

            build.artifacts.retain(|artifact| {
                !artifact.is_accumulative() || seen_locations.insert(artifact.location.clone())
            });
        }

        self.previous
            .retain(|id, build| *id == current_id || !build.artifacts.is_empty());

        if self.build_mode == BuildMode::Full {
            self.collapse_main_artifacts(current_id)?;
        }
        Ok(())
    }

    /// After a full build the history is discarded by the client, so the
    /// current build has to list every split and the main APK.
    fn collapse_main_artifacts(&mut self, current_id: u64) -> Result<(), InstantRunError> {
        let mut additions = Vec::new();
        if self.patching_policy == Some(PatchingPolicy::MultiApk) {
            let mut split_locations = BTreeSet::new();
            let mut main = None;
            for build in self.previous.values() {
                for artifact in &build.artifacts {
                    match artifact.file_type {
                        FileType::Split => {
                            split_locations.insert(artifact.location.clone());
                        }
                        FileType::SplitMain => main = Some(artifact.clone()),
                        _ => {}
                    }
                }
            }
            if let Some(current) = self.previous.get(&current_id) {
                for artifact in &current.artifacts {
                    match artifact.file_type {
                        FileType::Split => {
                            split_locations.remove(&artifact.location);
                        }
                        FileType::SplitMain => main = None,
                        _ => {}
                    }
                }
            }
            additions.extend(
                split_locations
                    .into_iter()
                    .map(|location| Artifact::new(FileType::Split, location)),
            );
            additions.extend(main);
        } else if self
            .previous
            .get(&current_id)
            .is_some_and(|current| current.artifacts.is_empty())
        {
            let main = self
                .previous
                .values()
                .flat_map(|build| build.artifacts.iter())
                .filter(|a| a.file_type == FileType::Main)
                .last()
                .cloned()
                .ok_or(InstantRunError::NoMainArtifact)?;
            additions.push(main);
        }

        let current = self
            .previous
            .entry(current_id)
            .or_insert_with(|| Build::new(current_id));
        current.artifacts.extend(additions);
        if current.artifacts.is_empty() {
            return Err(InstantRunError::NoMainArtifact);
        }
        Ok(())
    }

    /// Serialize with the persistence mode matching the build mode.
    pub fn to_xml_for_build_mode(&self) -> Result<String, InstantRunError> {
        self.to_xml(if self.build_mode == BuildMode::Full {
            PersistenceMode::FullBuild
        } else {
            PersistenceMode::IncrementalBuild
        })
    }

    pub fn to_xml(&self, mode: PersistenceMode) -> Result<String, InstantRunError> {
        let api_level = self.api_level()?;
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
        self.write_document(&mut writer, api_level, mode)?;
        let mut xml = String::from_utf8(writer.into_inner())
            .map_err(|err| quick_xml::Error::NonDecodable(Some(err.utf8_error())))?;
        xml.push('\n');
        Ok(xml)
    }

    fn write_document(
        &self,
        writer: &mut XmlWriter,
        api_level: u32,
        mode: PersistenceMode,
    ) -> quick_xml::Result<()> {
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

        let mut root = BytesStart::new(TAG_INSTANT_RUN);
        if let Some(abi) = &self.abi {
            root.push_attribute((ATTR_ABI, abi.as_str()));
        }
        root.push_attribute((ATTR_API_LEVEL, api_level.to_string().as_str()));
        if let Some(density) = &self.density {
            root.push_attribute((ATTR_DENSITY, density.as_str()));
        }
        root.push_attribute((ATTR_FORMAT, CURRENT_FORMAT));
        root.push_attribute((ATTR_PLUGIN_VERSION, self.plugin_version.as_str()));
        self.current.push_attributes(&mut root);
        root.push_attribute((ATTR_TOKEN, self.token.to_string().as_str()));
        writer.write_event(Event::Start(root))?;

        for task in TaskType::ALL {
            let mut element = BytesStart::new(TAG_TASK);
            element.push_attribute((
                ATTR_DURATION,
                self.task_durations[task.index()].to_string().as_str(),
            ));
            element.push_attribute((ATTR_NAME, task.as_str()));
            writer.write_event(Event::Empty(element))?;
        }
        self.current.write_artifacts(writer)?;

        match mode {
            PersistenceMode::FullBuild => {
                if let Some(last) = self.previous.values().next_back() {
                    last.write_element(writer)?;
                }
            }
            PersistenceMode::IncrementalBuild => {
                for build in self.previous.values() {
                    build.write_element(writer)?;
                }
            }
            PersistenceMode::TempBuild => {}
        }
        writer.write_event(Event::End(BytesEnd::new(TAG_INSTANT_RUN)))
    }

    fn write_tmp_build_info(&self) -> Result<(), InstantRunError> {
        let Some(path) = &self.tmp_build_info else {
            return Ok(());
        };
        let xml = self.to_xml(PersistenceMode::TempBuild)?;
        atomic_write(path, xml.as_bytes()).map_err(|err| InstantRunError::io(path, err))
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_values_are_escaped() {
        let mut context = BuildContext::with_build_id(1).with_plugin_version("1.0 \"beta\"");
        context.set_api_level(23, None, None);
        context
            .add_changed_file(FileType::Main, Path::new("/out/a&b<c>.apk"))
            .unwrap();

        let xml = context.to_xml(PersistenceMode::TempBuild).unwrap();
        assert!(xml.contains("plugin-version=\"1.0 &quot;beta&quot;\""), "{xml}");
        assert!(xml.contains("location=\"/out/a&amp;b&lt;c&gt;.apk\""), "{xml}");
        let document = roxmltree::Document::parse(&xml).unwrap();
        let artifact = document
            .descendants()
            .find(|node| node.has_tag_name(TAG_ARTIFACT))
            .unwrap();
        assert_eq!(artifact.attribute(ATTR_LOCATION), Some("/out/a&b<c>.apk"));
    }

    #[test]
    fn task_durations_are_reported() {
        let mut context = BuildContext::with_build_id(1);
        context.set_api_level(23, None, None);
        context.start_recording(TaskType::Verifier);
        let duration = context.stop_recording(TaskType::Verifier);
        assert_eq!(context.stop_recording(TaskType::Javac), 0);

        let xml = context.to_xml(PersistenceMode::TempBuild).unwrap();
        assert!(xml.contains(&format!(
            "<task duration=\"{duration}\" name=\"verifier\"/>"
        )));
        assert!(xml.contains("<task duration=\"0\" name=\"instant-run-transform\"/>"));
    }

    #[test]
    fn to_xml_requires_an_api_level() {
        let context = BuildContext::with_build_id(1);
        assert!(matches!(
            context.to_xml(PersistenceMode::FullBuild),
            Err(InstantRunError::ApiLevelNotSet)
        ));
    }
}
