//! Inventory persistence
//!
//! The finalizer hands the merged aggregate of a synchronized round to an
//! [`InventoryStore`]. Three stores are provided:
//!
//! - [`JsonFileStore`]: writes the record as pretty-printed JSON
//! - [`memory::MemoryStore`]: keeps records in memory, optionally failing
//! - [`LogStore`]: logs the record and keeps nothing

pub mod memory;

use crate::aggregate::ItemMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// The merged result of one synchronized round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    /// Barrier generation that produced this record
    pub generation: u64,
    pub completed_at: DateTime<Utc>,
    pub items: ItemMap,
}

impl InventoryRecord {
    pub fn new(generation: u64, items: ItemMap) -> Self {
        Self {
            generation,
            completed_at: Utc::now(),
            items,
        }
    }

    /// Sum of all quantities
    pub fn total_quantity(&self) -> u128 {
        self.items.values().map(|&q| q as u128).sum()
    }
}

/// Downstream write failure
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to write inventory to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize inventory record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("store rejected inventory record: {0}")]
    Rejected(String),
}

/// Persistence collaborator
pub trait InventoryStore: Send + Sync {
    fn persist(&self, record: &InventoryRecord) -> Result<(), PersistError>;
}

/// Writes each record to a JSON file, replacing the previous one
///
/// The record is written to a sibling temp file first and then renamed over
/// the target, so readers never observe a half-written file.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back the last persisted record
    pub fn load(&self) -> crate::Result<InventoryRecord> {
        use anyhow::Context;

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read inventory file: {}", self.path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse inventory file: {}", self.path.display()))
    }

    fn io_error(&self, source: std::io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl InventoryStore for JsonFileStore {
    fn persist(&self, record: &InventoryRecord) -> Result<(), PersistError> {
        let json = serde_json::to_string_pretty(record)?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp_path).map_err(|e| self.io_error(e))?;
        file.write_all(json.as_bytes()).map_err(|e| self.io_error(e))?;
        file.write_all(b"\n").map_err(|e| self.io_error(e))?;
        file.sync_all().map_err(|e| self.io_error(e))?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(|e| self.io_error(e))?;

        info!(
            path = %self.path.display(),
            generation = record.generation,
            items = record.items.len(),
            "inventory persisted"
        );
        Ok(())
    }
}

/// Logs every item of the record
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStore;

impl InventoryStore for LogStore {
    fn persist(&self, record: &InventoryRecord) -> Result<(), PersistError> {
        info!(generation = record.generation, items = record.items.len(), "final SKU quantities");
        for (sku, quantity) in &record.items {
            info!(sku = %sku, quantity, "final quantity");
        }
        Ok(())
    }
}
