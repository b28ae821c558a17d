//! Persisted set of files changed since the last completed sync round

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::Result;
use crate::persist::{read_json, state_path, write_json_atomic};

pub const DIRTY_FILE: &str = "dirty.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DirtyRecord {
    last_sync: Option<DateTime<Utc>>,
    dirty_relative_paths: BTreeSet<String>,
}

/// Dirty queue bound to one project. Every mutation is written through to
/// disk so a crash between sync phases keeps the owed paths.
#[derive(Debug, Clone)]
pub struct DirtyQueue {
    path: PathBuf,
    record: DirtyRecord,
}

impl DirtyQueue {
    /// Load the queue of a project, starting empty when none was saved
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = state_path(project_root, DIRTY_FILE);
        let record = read_json(&path)?.unwrap_or_default();
        Ok(Self { path, record })
    }

    pub fn mark(&mut self, relative_path: impl Into<String>) -> Result<()> {
        self.mark_many([relative_path.into()])
    }

    pub fn mark_many(&mut self, relative_paths: impl IntoIterator<Item = String>) -> Result<()> {
        let before = self.record.dirty_relative_paths.len();
        self.record.dirty_relative_paths.extend(relative_paths);
        if self.record.dirty_relative_paths.len() != before {
            debug!(dirty = self.record.dirty_relative_paths.len(), "Marked paths dirty");
            self.save()?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.record.dirty_relative_paths.is_empty()
    }

    pub fn len(&self) -> usize {
        self.record.dirty_relative_paths.len()
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.record.dirty_relative_paths.contains(relative_path)
    }

    /// Dirty paths in sorted order
    pub fn paths(&self) -> Vec<String> {
        self.record.dirty_relative_paths.iter().cloned().collect()
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.record.last_sync
    }

    /// Clear the queue after a fully acknowledged round
    pub fn complete_round(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.record.dirty_relative_paths.clear();
        self.record.last_sync = Some(now);
        self.save()
    }

    /// Keep only the given paths, for rounds that completed partially
    pub fn retain(&mut self, still_owed: &BTreeSet<String>) -> Result<()> {
        self.record
            .dirty_relative_paths
            .retain(|path| still_owed.contains(path));
        self.save()
    }

    fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.record)
    }
}
