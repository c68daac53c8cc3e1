//! Versioned model artifacts on disk
//!
//! Artifacts live at `{models_dir}/{model_id}_model_{version}.json` inside a
//! checksummed envelope. A version file, once written, is never replaced:
//! content goes to a temp file first and is hard-linked into place, which
//! fails instead of clobbering an existing file.

use super::registry::ProductionRegistry;
use super::TrainedModel;
use crate::error::{ForecastError, Result};
use crate::models::{ModelId, ModelVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Upper bound on versions skipped past orphaned files in one save
const MAX_VERSION_PROBES: u64 = 1_000;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// On-disk envelope of one artifact
#[derive(Debug, Clone, Deserialize)]
pub struct StoredArtifact {
    pub model_id: ModelId,
    pub version: ModelVersion,
    /// SHA256 hex of the serialized payload
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub payload: TrainedModel,
}

#[derive(Serialize)]
struct StoredArtifactRef<'a> {
    model_id: &'a ModelId,
    version: &'a ModelVersion,
    checksum: &'a str,
    created_at: DateTime<Utc>,
    payload: &'a TrainedModel,
}

/// Compute SHA256 checksum of data
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Artifact store rooted at one directory
pub struct ModelStore {
    models_dir: PathBuf,
    registry: Arc<dyn ProductionRegistry>,
}

impl ModelStore {
    /// Open the store, creating the directory when needed
    pub fn new(models_dir: impl Into<PathBuf>, registry: Arc<dyn ProductionRegistry>) -> Result<Self> {
        let models_dir = models_dir.into();
        fs::create_dir_all(&models_dir)?;
        Ok(Self {
            models_dir,
            registry,
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn artifact_path(&self, model_id: &ModelId, version: &ModelVersion) -> PathBuf {
        self.models_dir
            .join(format!("{}_model_{}.json", model_id, version))
    }

    /// True when the models directory exists and is a directory
    pub fn is_available(&self) -> bool {
        self.models_dir.is_dir()
    }

    /// Persist a trained model under the next free version
    ///
    /// The version follows the registry's current production entry. An
    /// existing file for that version is left untouched and the next number
    /// is tried. The registry itself is not modified.
    pub async fn save(
        &self,
        model: &TrainedModel,
        model_id: &ModelId,
    ) -> Result<(ModelVersion, PathBuf)> {
        let current = self.registry.get(model_id).await?.map(|e| e.version);
        let mut version = ModelVersion::next_after(current.as_ref())?;

        let payload = serde_json::to_vec(model)?;
        let checksum = compute_checksum(&payload);

        for _ in 0..MAX_VERSION_PROBES {
            let path = self.artifact_path(model_id, &version);
            let envelope = StoredArtifactRef {
                model_id,
                version: &version,
                checksum: &checksum,
                created_at: Utc::now(),
                payload: model,
            };
            let bytes = serde_json::to_vec(&envelope)?;

            if write_new(&path, &bytes)? {
                info!(
                    model_id = %model_id,
                    version = %version,
                    path = %path.display(),
                    checksum = %checksum,
                    "Model artifact saved"
                );
                return Ok((version, path));
            }

            warn!(
                model_id = %model_id,
                version = %version,
                path = %path.display(),
                "Artifact for version already exists, trying the next version"
            );
            version = ModelVersion::next_after(Some(&version))?;
        }

        Err(ForecastError::Internal(format!(
            "no free version found for model '{}' after {} attempts",
            model_id, MAX_VERSION_PROBES
        )))
    }

    /// Load and verify one artifact
    pub async fn load(&self, model_id: &ModelId, version: &ModelVersion) -> Result<TrainedModel> {
        let path = self.artifact_path(model_id, version);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ForecastError::NotFound(format!(
                    "artifact for model '{}' version {} not found at {}",
                    model_id,
                    version,
                    path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let corrupt = |reason: String| ForecastError::CorruptArtifact {
            path: path.display().to_string(),
            reason,
        };

        let artifact: StoredArtifact =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
        if &artifact.model_id != model_id || &artifact.version != version {
            return Err(corrupt(format!(
                "envelope names {} {}",
                artifact.model_id, artifact.version
            )));
        }

        let payload = serde_json::to_vec(&artifact.payload)?;
        let computed = compute_checksum(&payload);
        if computed != artifact.checksum {
            return Err(corrupt(format!(
                "checksum mismatch: expected {}, got {}",
                artifact.checksum, computed
            )));
        }

        debug!(model_id = %model_id, version = %version, "Model artifact loaded");
        Ok(artifact.payload)
    }
}

/// Write `bytes` to `path` only if nothing exists there yet
///
/// Returns `false` when the path is already taken.
fn write_new(path: &Path, bytes: &[u8]) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    let linked = match fs::hard_link(&temp_path, path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::Unsupported => write_exclusive(path, bytes),
        Err(e) => Err(e.into()),
    };

    if let Err(e) = fs::remove_file(&temp_path) {
        debug!(path = %temp_path.display(), error = %e, "Failed to remove temp artifact");
    }
    linked
}

/// Fallback for filesystems without hard links
fn write_exclusive(path: &Path, bytes: &[u8]) -> Result<bool> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(true)
}
