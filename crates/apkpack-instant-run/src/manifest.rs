use crate::context::BuildContext;
use crate::error::InstantRunError;
use crate::status::VerifierStatus;
use apkpack_cache::atomic_write;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;

pub const ANDROID_MANIFEST_XML: &str = "AndroidManifest.xml";

/// Name of the file below the Instant Run support directory that remembers
/// the manifest CRC of the previous build.
pub const MANIFEST_CRC_FILE: &str = "manifest.crc";

/// What [`check_manifest_crc`] found.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ManifestCheck {
    pub previous: Option<u32>,
    pub current: Option<u32>,
}

impl ManifestCheck {
    /// Both CRCs are known and differ.
    pub fn changed(&self) -> bool {
        matches!((self.previous, self.current), (Some(a), Some(b)) if a != b)
    }
}

/// CRC-32 of `AndroidManifest.xml` inside a resources archive, taken from
/// the zip directory.
pub fn manifest_crc(resources: &Path) -> Result<Option<u32>, InstantRunError> {
    let file = fs::File::open(resources).map_err(|err| InstantRunError::io(resources, err))?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|err| InstantRunError::zip(resources, err))?;
    let crc = match archive.by_name(ANDROID_MANIFEST_XML) {
        Ok(entry) => Some(entry.crc32()),
        Err(zip::result::ZipError::FileNotFound) => None,
        Err(err) => return Err(InstantRunError::zip(resources, err)),
    };
    Ok(crc)
}

/// Compare the binary manifest of `resources` with the one seen by the
/// previous build.
///
/// A changed manifest cannot be patched into a running application, so the
/// build is marked [`VerifierStatus::BinaryManifestFileChange`]. The new CRC
/// is stored for the next build whenever the archive has a manifest.
pub fn check_manifest_crc(
    resources: &Path,
    support_dir: &Path,
    context: &mut BuildContext,
) -> Result<ManifestCheck, InstantRunError> {
    let current = manifest_crc(resources)?;
    let crc_file = support_dir.join(MANIFEST_CRC_FILE);
    let previous = match fs::read_to_string(&crc_file) {
        Ok(contents) => contents.lines().next().and_then(|l| l.trim().parse::<u32>().ok()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => return Err(InstantRunError::io(&crc_file, err)),
    };

    let check = ManifestCheck { previous, current };
    if check.changed() {
        tracing::info!(
            target = "apkpack.instant_run",
            path = %resources.display(),
            "binary manifest changed"
        );
        context.set_verifier_status(VerifierStatus::BinaryManifestFileChange);
    }

    if let Some(crc) = current {
        atomic_write(&crc_file, crc.to_string().as_bytes())
            .map_err(|err| InstantRunError::io(&crc_file, err))?;
    }
    Ok(check)
}
