//! Per-volume cursor state, optionally persisted across process restarts.
//!
//! Persistence is opt-in. Without it, cursors live only in process memory and
//! a fresh process tails each volume from its current journal start instead
//! of replaying the retained window.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::Usn;
use crate::errors::CollectorError;

/// In-memory cursor map: volume identifier to the last processed USN.
///
/// Within a volume the cursor is non-decreasing across cycles, except
/// immediately after a rotation recovery, when it jumps to the journal's
/// oldest retained position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorState {
    positions: HashMap<String, Usn>,
}

impl CollectorState {
    pub fn position(&self, volume: &str) -> Option<Usn> {
        self.positions.get(volume).copied()
    }

    pub fn set_position(&mut self, volume: &str, usn: Usn) {
        self.positions.insert(volume.to_string(), usn);
    }

    pub fn positions(&self) -> &HashMap<String, Usn> {
        &self.positions
    }

    pub fn clear(&mut self) {
        self.positions.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// On-disk shape of the state file.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    last_usn_positions: HashMap<String, Usn>,
    timestamp: DateTime<Utc>,
    provider_id: String,
}

/// Loads and saves [`CollectorState`] as a small JSON file.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    provider_id: String,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, provider_id: impl Into<String>) -> Self {
        StateStore {
            path: path.into(),
            provider_id: provider_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted state. A missing or unreadable file is a cold
    /// start, not a failure: the collector can always fall back to tailing
    /// from the journals' current positions.
    pub fn load(&self) -> CollectorState {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("no state file at {}, starting cold", self.path.display());
                return CollectorState::default();
            }
            Err(err) => {
                warn!(
                    "failed to read state file {}: {}, starting cold",
                    self.path.display(),
                    err
                );
                return CollectorState::default();
            }
        };

        match serde_json::from_str::<PersistedState>(&text) {
            Ok(persisted) => {
                debug!(
                    "loaded {} cursor(s) from {} (written {})",
                    persisted.last_usn_positions.len(),
                    self.path.display(),
                    persisted.timestamp
                );
                CollectorState {
                    positions: persisted.last_usn_positions,
                }
            }
            Err(err) => {
                warn!(
                    "state file {} is corrupt: {}, starting cold",
                    self.path.display(),
                    err
                );
                CollectorState::default()
            }
        }
    }

    /// Writes the state file, creating parent directories as needed.
    pub fn save(&self, state: &CollectorState) -> Result<(), CollectorError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let persisted = PersistedState {
            last_usn_positions: state.positions.clone(),
            timestamp: Utc::now(),
            provider_id: self.provider_id.clone(),
        };

        let mut file = fs::File::create(&self.path)?;
        serde_json::to_writer_pretty(&mut file, &persisted)
            .map_err(|err| CollectorError::State(err.to_string()))?;
        file.flush()?;
        Ok(())
    }

    /// Clears the in-memory cursors and replaces the state file with an empty
    /// one. For use after unrecoverable rotation storms or by operator
    /// command.
    pub fn reset(&self, state: &mut CollectorState) -> Result<(), CollectorError> {
        state.clear();
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        self.save(state)
    }
}
