//! Production registry: which stored version serves each model id
//!
//! `JsonFileRegistry` keeps every entry in one JSON document. Reads tolerate
//! a missing or damaged file (the model is reported as absent). Writes are a
//! read-modify-write of that document, serialized by one writer mutex and
//! published with temp file + rename so readers never see a partial file.

use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::models::{ModelId, ModelVersion, ProductionEntry};
use crate::observability::ServiceMetrics;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Store of production pointers
#[async_trait]
pub trait ProductionRegistry: Send + Sync {
    /// Current production entry; `None` when absent or unreadable
    async fn get(&self, model_id: &ModelId) -> Result<Option<ProductionEntry>>;

    /// Replace the entry for one model id, keeping all others
    async fn set(&self, model_id: &ModelId, entry: ProductionEntry) -> Result<()>;

    /// Replace the entry only if its current version equals `expected`
    ///
    /// `expected = None` means "no entry yet". Returns whether the write
    /// happened.
    async fn compare_and_set(
        &self,
        model_id: &ModelId,
        expected: Option<&ModelVersion>,
        entry: ProductionEntry,
    ) -> Result<bool>;

    /// Every readable entry
    async fn list(&self) -> Result<BTreeMap<ModelId, ProductionEntry>>;
}

/// Outcome of reading the registry document
enum Document {
    Missing,
    Corrupt(String),
    Loaded(Map<String, Value>),
}

/// Registry backed by a single JSON file
pub struct JsonFileRegistry {
    path: PathBuf,
    writer: Mutex<()>,
    health: Option<HealthRegistry>,
    metrics: ServiceMetrics,
}

impl JsonFileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
            health: None,
            metrics: ServiceMetrics::new(),
        }
    }

    /// Report unreadable content to the `registry` health component
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Document {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Document::Missing,
            Err(e) => return Document::Corrupt(e.to_string()),
        };
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Document::Loaded(map),
            Ok(other) => Document::Corrupt(format!("expected a JSON object, found {}", kind_of(&other))),
            Err(e) => Document::Corrupt(e.to_string()),
        }
    }

    async fn report_corruption(&self, reason: &str) {
        warn!(
            path = %self.path.display(),
            reason = %reason,
            "Production registry is unreadable; treating it as empty"
        );
        self.metrics.inc_registry_read_failures();
        if let Some(health) = &self.health {
            health
                .set_degraded(
                    components::REGISTRY,
                    format!("registry file unreadable: {}", reason),
                )
                .await;
        }
    }

    /// Document for a write; damaged content is discarded
    async fn document_for_write(&self) -> Map<String, Value> {
        match self.read_document() {
            Document::Missing => Map::new(),
            Document::Loaded(map) => map,
            Document::Corrupt(reason) => {
                self.report_corruption(&reason).await;
                warn!(path = %self.path.display(), "Resetting production registry");
                Map::new()
            }
        }
    }

    fn write_document(&self, document: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(document)?;

        let temp_path = self.path.with_extension(format!("tmp.{}", std::process::id()));
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    async fn mark_healthy(&self) {
        if let Some(health) = &self.health {
            health.set_healthy(components::REGISTRY).await;
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Decode one entry; a malformed entry counts as absent
fn decode_entry(model_id: &str, value: &Value) -> Option<ProductionEntry> {
    match serde_json::from_value::<ProductionEntry>(value.clone()) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(model_id = %model_id, error = %e, "Ignoring malformed production entry");
            None
        }
    }
}

#[async_trait]
impl ProductionRegistry for JsonFileRegistry {
    async fn get(&self, model_id: &ModelId) -> Result<Option<ProductionEntry>> {
        match self.read_document() {
            Document::Missing => Ok(None),
            Document::Corrupt(reason) => {
                self.report_corruption(&reason).await;
                Ok(None)
            }
            Document::Loaded(map) => Ok(map
                .get(model_id.as_str())
                .and_then(|value| decode_entry(model_id.as_str(), value))),
        }
    }

    async fn set(&self, model_id: &ModelId, entry: ProductionEntry) -> Result<()> {
        let _guard = self.writer.lock().await;
        let mut document = self.document_for_write().await;
        document.insert(model_id.to_string(), serde_json::to_value(&entry)?);
        self.write_document(&document)?;
        self.mark_healthy().await;

        info!(
            model_id = %model_id,
            version = %entry.version,
            "Production registry updated"
        );
        Ok(())
    }

    async fn compare_and_set(
        &self,
        model_id: &ModelId,
        expected: Option<&ModelVersion>,
        entry: ProductionEntry,
    ) -> Result<bool> {
        let _guard = self.writer.lock().await;
        let mut document = self.document_for_write().await;

        let current = document
            .get(model_id.as_str())
            .and_then(|value| decode_entry(model_id.as_str(), value))
            .map(|e| e.version);
        if current.as_ref() != expected {
            debug!(
                model_id = %model_id,
                expected = ?expected,
                current = ?current,
                "Production entry changed concurrently"
            );
            return Ok(false);
        }

        document.insert(model_id.to_string(), serde_json::to_value(&entry)?);
        self.write_document(&document)?;
        self.mark_healthy().await;

        info!(
            model_id = %model_id,
            version = %entry.version,
            previous = ?expected,
            "Production registry updated"
        );
        Ok(true)
    }

    async fn list(&self) -> Result<BTreeMap<ModelId, ProductionEntry>> {
        let map = match self.read_document() {
            Document::Missing => return Ok(BTreeMap::new()),
            Document::Corrupt(reason) => {
                self.report_corruption(&reason).await;
                return Ok(BTreeMap::new());
            }
            Document::Loaded(map) => map,
        };

        Ok(map
            .iter()
            .filter_map(|(key, value)| {
                let id = ModelId::new(key.as_str()).ok()?;
                decode_entry(key, value).map(|entry| (id, entry))
            })
            .collect())
    }
}

/// Registry kept in process memory
#[derive(Default)]
pub struct InMemoryRegistry {
    entries: RwLock<BTreeMap<ModelId, ProductionEntry>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProductionRegistry for InMemoryRegistry {
    async fn get(&self, model_id: &ModelId) -> Result<Option<ProductionEntry>> {
        Ok(self.entries.read().await.get(model_id).cloned())
    }

    async fn set(&self, model_id: &ModelId, entry: ProductionEntry) -> Result<()> {
        self.entries.write().await.insert(model_id.clone(), entry);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        model_id: &ModelId,
        expected: Option<&ModelVersion>,
        entry: ProductionEntry,
    ) -> Result<bool> {
        let mut entries = self.entries.write().await;
        if entries.get(model_id).map(|e| &e.version) != expected {
            return Ok(false);
        }
        entries.insert(model_id.clone(), entry);
        Ok(true)
    }

    async fn list(&self) -> Result<BTreeMap<ModelId, ProductionEntry>> {
        Ok(self.entries.read().await.clone())
    }
}
