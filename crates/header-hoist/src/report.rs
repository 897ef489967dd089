use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Error, ErrorKind, Result};
use crate::target::Target;
use crate::util;

/// A second cluster of agreement at a path that lost the vote.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MissedOpportunity {
    pub path: String,
    pub hit_count: usize,
    pub size: u64,
    pub wasted_bytes: u64,
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerReport {
    pub layer: String,
    pub output: Target,
    pub members: Vec<Target>,
    pub files_scanned: usize,
    pub bytes_scanned: u64,
    /// Bytes left on disk after hoisting (generic plus per-target).
    pub bytes_after: u64,
    pub bytes_reclaimed: u64,
    pub generic_files: usize,
    pub target_files: usize,
    pub skipped_entries: usize,
    /// Files already in the output directory, which is not an input of the
    /// layer and gets replaced.
    pub discarded_output_files: usize,
    pub missed: Vec<MissedOpportunity>,
}

impl LayerReport {
    pub fn new(layer: &str, output: Target, members: &[Target]) -> Self {
        Self {
            layer: layer.to_string(),
            output,
            members: members.to_vec(),
            files_scanned: 0,
            bytes_scanned: 0,
            bytes_after: 0,
            bytes_reclaimed: 0,
            generic_files: 0,
            target_files: 0,
            skipped_entries: 0,
            discarded_output_files: 0,
            missed: Vec::new(),
        }
    }

    pub fn wasted_bytes(&self) -> u64 {
        self.missed.iter().map(|m| m.wasted_bytes).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: String,
    pub root: PathBuf,
    pub dry_run: bool,
    pub layers: Vec<LayerReport>,
}

impl RunReport {
    pub fn new(root: &Path, dry_run: bool) -> Self {
        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            root: root.to_path_buf(),
            dry_run,
            layers: Vec::new(),
        }
    }

    pub fn bytes_scanned(&self) -> u64 {
        self.layers.iter().map(|l| l.bytes_scanned).sum()
    }

    pub fn bytes_reclaimed(&self) -> u64 {
        self.layers.iter().map(|l| l.bytes_reclaimed).sum()
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let v = serde_json::to_value(self)
            .map_err(|e| Error::new(ErrorKind::Io, format!("failed to encode run report: {e}")))?;
        util::write_json_pretty(path, &v)
    }
}
