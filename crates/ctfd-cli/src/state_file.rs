//! On-disk record of the last applied state.
//!
//! The state file is the only memory the tool has between runs: it carries
//! the ids CTFd assigned and the fingerprints of uploaded files. It is
//! rewritten atomically (temp file + rename) so an interrupted write never
//! leaves a truncated file behind.

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use ctfd_converge::ChallengeState;
use serde::{Deserialize, Serialize};

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    pub applied_at: DateTime<Utc>,
    pub challenge: ChallengeState,
}

impl StateFile {
    pub fn new(challenge: ChallengeState) -> Self {
        StateFile {
            version: STATE_VERSION,
            applied_at: Utc::now(),
            challenge,
        }
    }

    /// Load the state file, or `None` if it does not exist yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read state file {}", path.display()))
            }
        };
        let file: StateFile = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse state file {}", path.display()))?;
        if file.version != STATE_VERSION {
            bail!(
                "state file {} has version {}, expected {}",
                path.display(),
                file.version,
                STATE_VERSION
            );
        }
        Ok(Some(file))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        serde_json::to_writer_pretty(&mut tmp, self).context("Failed to serialize state")?;
        tmp.write_all(b"\n")?;
        tmp.persist(path)
            .with_context(|| format!("Failed to write state file {}", path.display()))?;
        Ok(())
    }
}
