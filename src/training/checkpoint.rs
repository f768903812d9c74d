//! Checkpoint directory layout, rotation, and training-state persistence.
//!
//! Each checkpoint is a directory `checkpoint-<epoch>/` under the run's
//! checkpoint root, holding the model and optimizer records plus a
//! `state.json` with the resume bookkeeping. At most [`MAX_CHECKPOINTS`]
//! checkpoints are retained; the oldest is dropped before a new one is saved.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LayoutDiffusionError, Result};

/// Maximum number of retained checkpoint directories.
pub const MAX_CHECKPOINTS: usize = 20;

/// Resume bookkeeping stored as `state.json` inside every checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainState {
    /// Epoch the checkpoint was taken at.
    pub epoch: usize,
    /// Optimizer steps completed so far.
    pub global_step: usize,
}

/// Directory for the checkpoint of the given epoch.
pub fn checkpoint_dir(root: &Path, epoch: usize) -> PathBuf {
    root.join(format!("checkpoint-{epoch}"))
}

fn epoch_of(path: &Path) -> Option<usize> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("checkpoint-"))
        .and_then(|n| n.parse().ok())
}

/// All checkpoint directories under `root`, sorted by epoch.
///
/// Entries that do not match the `checkpoint-<epoch>` naming are ignored. A
/// missing root is treated as an empty run, not an error.
pub fn list_checkpoints(root: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let mut found = Vec::new();
    if !root.exists() {
        return Ok(found);
    }
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            if let Some(epoch) = epoch_of(&path) {
                found.push((epoch, path));
            }
        }
    }
    found.sort_by_key(|(epoch, _)| *epoch);
    Ok(found)
}

/// The checkpoint with the highest epoch, if any.
pub fn find_latest_checkpoint(root: &Path) -> Result<Option<PathBuf>> {
    Ok(list_checkpoints(root)?.pop().map(|(_, path)| path))
}

/// Delete the oldest checkpoint when the retention limit is exceeded.
///
/// Called before saving a new checkpoint; removes at most one directory.
pub fn prune_oldest(root: &Path) -> Result<()> {
    let checkpoints = list_checkpoints(root)?;
    if checkpoints.len() > MAX_CHECKPOINTS {
        let (epoch, path) = &checkpoints[0];
        log::info!("deleting checkpoint {path:?} (epoch {epoch})");
        fs::remove_dir_all(path)?;
    }
    Ok(())
}

/// Write `state.json` into a checkpoint directory, creating it if needed.
pub fn save_state(dir: &Path, state: &TrainState) -> Result<()> {
    fs::create_dir_all(dir)?;
    let file = BufWriter::new(File::create(dir.join("state.json"))?);
    serde_json::to_writer_pretty(file, state)?;
    Ok(())
}

/// Read `state.json` back from a checkpoint directory.
pub fn load_state(dir: &Path) -> Result<TrainState> {
    let path = dir.join("state.json");
    if !path.exists() {
        return Err(LayoutDiffusionError::Checkpoint {
            path: dir.to_path_buf(),
            message: "missing state.json".to_string(),
        });
    }
    let file = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(file)?)
}
