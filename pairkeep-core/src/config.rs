use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::ledger::LedgerGeometry;

/// Which way data may flow between the two locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    FirstToSecond,
    Bidirectional,
}

/// On-disk layout used when writing ledgers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LedgerFormat {
    #[default]
    Current,
    Legacy,
}

/// Settings shared by every pair processed in one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub direction: Direction,
    /// Never write to the first location (files or ledgers).
    pub first_read_only: bool,
    /// Newer file wins; with `false`, first→second overwrites whenever the
    /// two copies differ.
    pub sync_mode: bool,
    /// In first→second mode, delete second-only files and their ledgers.
    pub delete_orphans: bool,
    pub create_ledgers: bool,
    pub test_files: bool,
    pub repair_files: bool,
    /// Allow the randomized skip of files that were confirmed good long ago.
    pub skip_recently_tested: bool,
    /// Bump the tested marker after a successful test.
    pub mark_tested: bool,
    /// Apply ledger reconstructions even to blocks both copies agree on.
    pub override_equal_blocks: bool,
    /// Stop a scan at the first bad block.
    pub fail_fast: bool,
    /// Sub-directory (next to the data file) that holds ledgers.
    pub ledger_dir: String,
    pub ledger_ext: String,
    pub ledger_format: LedgerFormat,
    /// Files with this name are never processed, so orphan deletion cannot
    /// reach them.
    pub guard_file_name: String,
    pub geometry: LedgerGeometry,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            direction: Direction::FirstToSecond,
            first_read_only: false,
            sync_mode: true,
            delete_orphans: false,
            create_ledgers: true,
            test_files: true,
            repair_files: true,
            skip_recently_tested: true,
            mark_tested: true,
            override_equal_blocks: false,
            fail_fast: false,
            ledger_dir: "RestoreInfo".to_owned(),
            ledger_ext: ".chk".to_owned(),
            ledger_format: LedgerFormat::Current,
            guard_file_name: "PairKeep-Don't-Delete.txt".to_owned(),
            geometry: LedgerGeometry::default(),
        }
    }
}

impl SyncSettings {
    /// Read settings from a JSON file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let f = File::open(path).map_err(|e| SyncError::io(path, e))?;
        let settings: SyncSettings = serde_json::from_reader(f).map_err(|e| {
            SyncError::InvalidConfig { field: path.display().to_string(), reason: e.to_string() }
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, reason: &str| {
            Err(SyncError::InvalidConfig { field: field.to_owned(), reason: reason.to_owned() })
        };
        if self.ledger_dir.is_empty() || self.ledger_dir.contains(['/', '\\']) {
            return invalid("ledger_dir", "must be a single non-empty path component");
        }
        if !self.ledger_ext.starts_with('.') || self.ledger_ext.len() < 2 {
            return invalid("ledger_ext", "must start with '.' and name an extension");
        }
        if self.guard_file_name.is_empty() {
            return invalid("guard_file_name", "must not be empty");
        }
        let g = self.geometry;
        if g.stripe_blocks == 0 {
            return invalid("geometry.stripe_blocks", "must be greater than zero");
        }
        if g.stripe_blocks as usize + g.parity_blocks as usize > 256 {
            return invalid("geometry", "stripe_blocks + parity_blocks must not exceed 256");
        }
        Ok(())
    }

    /// Whether writes to the first location are allowed.
    pub fn first_writable(&self) -> bool {
        !self.first_read_only
    }
}
