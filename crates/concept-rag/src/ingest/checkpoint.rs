//! Resumable ingestion checkpoint.
//!
//! One JSON file per database directory records which content hashes have
//! been committed, the last stage reached, and per-file failure counts.
//! Processed hashes are skipped on restart; failed files are retried once,
//! then quarantined.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const MAX_FILE_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub processed_hashes: HashSet<String>,
    pub stage: Option<String>,
    pub last_file: Option<String>,
    /// Source path → failed attempt count. At `MAX_FILE_ATTEMPTS` the file
    /// is quarantined and no longer picked up.
    pub failed_files: HashMap<String, u32>,
    /// Sources whose extraction fell below the character-density threshold.
    /// OCR is attempted at most once per source.
    #[serde(default)]
    pub ocr_attempted: HashSet<String>,
    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Checkpoint {
    pub fn is_processed(&self, hash: &str) -> bool {
        self.processed_hashes.contains(hash)
    }

    pub fn mark_processed(&mut self, hash: String, source: &str) {
        self.processed_hashes.insert(hash);
        self.last_file = Some(source.to_string());
        self.failed_files.remove(source);
    }

    pub fn record_failure(&mut self, source: &str) -> u32 {
        let attempts = self.failed_files.entry(source.to_string()).or_insert(0);
        *attempts += 1;
        *attempts
    }

    pub fn is_quarantined(&self, source: &str) -> bool {
        self.failed_files
            .get(source)
            .is_some_and(|attempts| *attempts >= MAX_FILE_ATTEMPTS)
    }
}

pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(data_dir: &Path) -> Self {
        Self { path: data_dir.join("ingest_checkpoint.json") }
    }

    pub fn load(&self) -> Result<Checkpoint> {
        if !self.path.exists() {
            return Ok(Checkpoint::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read checkpoint: {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Corrupt checkpoint file: {}", self.path.display()))
    }

    /// Write-then-rename so a crash mid-save never truncates the checkpoint.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let mut checkpoint = checkpoint.clone();
        checkpoint.updated_at = Some(chrono::Utc::now());
        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&checkpoint)?;
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write checkpoint: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace checkpoint: {}", self.path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove checkpoint: {}", self.path.display()))?;
        }
        Ok(())
    }
}
