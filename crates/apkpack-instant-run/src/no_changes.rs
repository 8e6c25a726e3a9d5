use crate::context::BuildContext;
use crate::status::VerifierStatus;
use apkpack_files::RelativeFileChanges;

/// Flags inputs that cannot be hot swapped at all: any change to them
/// records a fixed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoChangesVerifier {
    status: VerifierStatus,
}

impl NoChangesVerifier {
    /// Java resources and native libraries.
    pub fn java_resources() -> Self {
        Self::new(VerifierStatus::JavaResourcesChanged)
    }

    /// Classes coming from library dependencies.
    pub fn dependencies() -> Self {
        Self::new(VerifierStatus::DependencyChanged)
    }

    pub fn new(status: VerifierStatus) -> Self {
        Self { status }
    }

    pub fn status(&self) -> VerifierStatus {
        self.status
    }

    /// Record the status on `context` if any of `change_sets` is non-empty.
    /// Returns whether it was recorded.
    pub fn verify<'a>(
        &self,
        change_sets: impl IntoIterator<Item = &'a RelativeFileChanges>,
        context: &mut BuildContext,
    ) -> bool {
        let changed = change_sets.into_iter().find_map(|set| set.keys().next());
        match changed {
            Some(file) => {
                tracing::debug!(
                    target = "apkpack.instant_run",
                    file = %file,
                    status = %self.status,
                    "input changed"
                );
                context.set_verifier_status(self.status);
                true
            }
            None => false,
        }
    }
}
