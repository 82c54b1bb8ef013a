//! Maps run outcomes to installation status and persists it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::{EngineError, Result};
use crate::model::{InstallationKey, InstallationStatus};
use crate::sandbox::executor::RunOutcome;

/// Shown to administrators when a guest failed without a usable message.
pub const FALLBACK_DESCRIPTION: &str = "An unknown error occurred while running the extension.";

/// Longest description stored on an installation, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 1024;

/// Persists installation status documents.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn save_status(&self, key: &InstallationKey, status: &InstallationStatus)
        -> Result<()>;
}

/// Status store backed by a map; for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    statuses: RwLock<HashMap<InstallationKey, InstallationStatus>>,
    writes: RwLock<usize>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &InstallationKey) -> Option<InstallationStatus> {
        let statuses = self.statuses.read().unwrap_or_else(PoisonError::into_inner);
        statuses.get(key).cloned()
    }

    /// Number of writes since creation.
    pub fn writes(&self) -> usize {
        *self.writes.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn save_status(
        &self,
        key: &InstallationKey,
        status: &InstallationStatus,
    ) -> Result<()> {
        let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);
        statuses.insert(key.clone(), status.clone());
        *self.writes.write().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

/// The status an outcome produces: `{0, null}` on success, `{2, description}`
/// on failure.
pub fn status_for(outcome: &RunOutcome) -> InstallationStatus {
    match outcome {
        RunOutcome::Success => InstallationStatus::ok(),
        RunOutcome::Failure(err) => {
            let description = err
                .message
                .as_deref()
                .filter(|message| !message.trim().is_empty())
                .map(truncate)
                .unwrap_or_else(|| FALLBACK_DESCRIPTION.to_string());
            InstallationStatus::error(description)
        }
    }
}

fn truncate(message: &str) -> String {
    message.chars().take(MAX_DESCRIPTION_CHARS).collect()
}

/// Writes the status of every completed run.
#[derive(Clone)]
pub struct ResultReporter {
    store: Arc<dyn StatusStore>,
}

impl ResultReporter {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    /// Persist the status for `outcome` under `key` and return it.
    pub async fn report(
        &self,
        key: &InstallationKey,
        outcome: &RunOutcome,
    ) -> Result<InstallationStatus> {
        let status = status_for(outcome);
        self.store.save_status(key, &status).await.map_err(|err| match err {
            EngineError::Store(_) => err,
            other => EngineError::Store(other.to_string()),
        })?;
        tracing::debug!(
            guild_id = %key.guild_id,
            extension_id = %key.extension_id,
            code = u8::from(status.code),
            "installation status updated"
        );
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, GuestError};
    use crate::model::StatusCode;

    struct FailingStore;

    #[async_trait]
    impl StatusStore for FailingStore {
        async fn save_status(&self, _: &InstallationKey, _: &InstallationStatus) -> Result<()> {
            Err(EngineError::Store("database offline".to_string()))
        }
    }

    fn failure(message: Option<&str>) -> RunOutcome {
        RunOutcome::Failure(GuestError {
            kind: FailureKind::Thrown,
            message: message.map(str::to_string),
        })
    }

    #[test]
    fn test_success_status() {
        assert_eq!(status_for(&RunOutcome::Success), InstallationStatus::ok());
    }

    #[test]
    fn test_failure_uses_guest_message() {
        let status = status_for(&failure(Some("bad input")));
        assert_eq!(status.code, StatusCode::Error);
        assert_eq!(status.description.as_deref(), Some("bad input"));
    }

    #[test]
    fn test_failure_without_message_uses_fallback() {
        for outcome in [failure(None), failure(Some("")), failure(Some("   "))] {
            let status = status_for(&outcome);
            assert_eq!(status.description.as_deref(), Some(FALLBACK_DESCRIPTION));
        }
    }

    #[test]
    fn test_long_descriptions_are_truncated() {
        let long = "é".repeat(MAX_DESCRIPTION_CHARS + 10);
        let status = status_for(&failure(Some(&long)));
        assert_eq!(
            status.description.unwrap().chars().count(),
            MAX_DESCRIPTION_CHARS
        );
    }

    #[tokio::test]
    async fn test_report_persists_last_write() {
        let store = Arc::new(InMemoryStatusStore::new());
        let reporter = ResultReporter::new(store.clone());
        let key = InstallationKey::new("g1", "ext");

        reporter.report(&key, &failure(Some("boom"))).await.unwrap();
        assert_eq!(store.get(&key).unwrap().code, StatusCode::Error);

        reporter.report(&key, &RunOutcome::Success).await.unwrap();
        assert_eq!(store.get(&key), Some(InstallationStatus::ok()));
        assert_eq!(store.writes(), 2);
    }

    #[test]
    fn test_store_failure_propagates() {
        let reporter = ResultReporter::new(Arc::new(FailingStore));
        let key = InstallationKey::new("g1", "ext");
        let err = tokio_test::block_on(reporter.report(&key, &RunOutcome::Success)).unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));
    }
}
