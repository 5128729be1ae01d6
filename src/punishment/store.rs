//! Punishment store
//!
//! This module defines the storage capability the manager talks to and the
//! durable implementation backed by one JSON file per identity.

use crate::punishment::{PunishedIdentity, PunishmentError, PunishmentResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Directory under the data directory holding punishment documents
pub const PUNISHMENTS_DIR: &str = "punishments";

/// Identity-keyed storage for punishment aggregates
///
/// Writes replace the whole document. Callers serialize writers of the same
/// identity; implementations only guarantee that a reader never observes a
/// partially written document.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PunishmentStore: Send + Sync {
    /// Load the aggregate for an identity, `None` if nothing was ever stored
    async fn read(&self, identity: Uuid) -> PunishmentResult<Option<PunishedIdentity>>;

    /// Replace the stored aggregate for an identity
    async fn write(&self, punished: &PunishedIdentity) -> PunishmentResult<()>;

    /// Every identity with a stored aggregate
    async fn identities(&self) -> PunishmentResult<Vec<Uuid>>;
}

/// Durable store keeping one pretty-printed JSON document per identity
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `<data_dir>/punishments`
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().join(PUNISHMENTS_DIR),
        }
    }

    /// Directory holding the documents
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document for an identity
    #[must_use]
    pub fn path_for(&self, identity: Uuid) -> PathBuf {
        self.dir.join(format!("{identity}.json"))
    }

    fn staging_path_for(&self, identity: Uuid) -> PathBuf {
        self.dir.join(format!(".{identity}.json.tmp"))
    }
}

#[async_trait]
impl PunishmentStore for FileStore {
    async fn read(&self, identity: Uuid) -> PunishmentResult<Option<PunishedIdentity>> {
        let path = self.path_for(identity);
        match tokio::fs::read_to_string(&path).await {
            // An empty file is left behind by a crash before the first write
            Ok(text) if text.trim().is_empty() => {
                debug!(identity = %identity, path = %path.display(), "Empty punishment document");
                Ok(None)
            }
            Ok(text) => PunishedIdentity::from_document(identity, &text).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PunishmentError::StorageFailure { identity, source }),
        }
    }

    async fn write(&self, punished: &PunishedIdentity) -> PunishmentResult<()> {
        let identity = punished.identity;
        let storage_failure = |source| PunishmentError::StorageFailure { identity, source };

        let document = punished.to_document()?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(storage_failure)?;

        // Stage then rename so lock-free readers see the old or the new document
        let staging = self.staging_path_for(identity);
        tokio::fs::write(&staging, document)
            .await
            .map_err(storage_failure)?;
        tokio::fs::rename(&staging, self.path_for(identity))
            .await
            .map_err(storage_failure)?;

        debug!(
            identity = %identity,
            punishments = punished.punishments.len(),
            "Punishment document written"
        );
        Ok(())
    }

    async fn identities(&self) -> PunishmentResult<Vec<Uuid>> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || scan_documents(&dir))
            .await
            .map_err(|e| PunishmentError::ScanFailure(e.to_string()))?
    }
}

/// List identities with a document under `dir`
fn scan_documents(dir: &Path) -> PunishmentResult<Vec<Uuid>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let dir = dir
        .to_str()
        .ok_or_else(|| PunishmentError::ScanFailure(format!("non UTF-8 path {}", dir.display())))?;
    let pattern = format!("{}/*.json", glob::Pattern::escape(dir));
    let paths = glob::glob(&pattern).map_err(|e| PunishmentError::ScanFailure(e.to_string()))?;

    let mut identities = Vec::new();
    for entry in paths {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable punishment document");
                continue;
            }
        };

        match path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(Uuid::parse_str)
        {
            Some(Ok(identity)) => identities.push(identity),
            _ => warn!(path = %path.display(), "Skipping file not named after an identity"),
        }
    }

    identities.sort();
    Ok(identities)
}
