use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ledger::ingest::analysis::DEFAULT_TOP_N;
use crate::ledger::ingest::error::Result;
use crate::ledger::ingest::matcher::DEFAULT_MAX_SCAN_ROWS;

/// Runtime knobs of the engine. Every field has a default, so a JSON file only
/// needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Leading rows inspected when looking for a header row.
    pub max_scan_rows: usize,
    /// Size of the worker pool that normalizes files.
    pub workers: usize,
    /// Processing deadline per file, in seconds.
    pub file_timeout_secs: u64,
    pub max_files_per_batch: usize,
    pub max_file_size_mb: u64,
    /// Partner counts used for concentration shares.
    pub top_n: Vec<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_scan_rows: DEFAULT_MAX_SCAN_ROWS,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            file_timeout_secs: 300,
            max_files_per_batch: 10,
            max_file_size_mb: 50,
            top_n: DEFAULT_TOP_N.to_vec(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn file_timeout(&self) -> Duration {
        Duration::from_secs(self.file_timeout_secs)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}
