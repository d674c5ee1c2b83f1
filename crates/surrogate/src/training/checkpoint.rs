//! Trainer checkpoints.
//!
//! A checkpoint is a directory holding `meta.json` plus one `member_{i}/`
//! subdirectory of burn record bytes per trainer:
//!
//! ```text
//! {dir}/ckpt/
//!   meta.json
//!   member_0/{model,model_optim,multiplier,multiplier_optim}.bin
//!   member_1/...
//! ```
//!
//! Saves are atomic: the new checkpoint is written into a temporary sibling
//! directory and renamed into place, so a crash leaves either the previous
//! checkpoint or the new one, never a mix.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::forward_model::{Activation, ForwardModelConfig};

const CURRENT: &str = "ckpt";
const PREVIOUS: &str = "ckpt.old";
const META_FILE: &str = "meta.json";
const RECORD_FILES: [&str; 4] = ["model", "model_optim", "multiplier", "multiplier_optim"];

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode {0}")]
    Encode(String),
    #[error("corrupt checkpoint: {0}")]
    Corrupt(String),
    /// The checkpoint was written for a different model architecture or
    /// ensemble size.
    #[error("incompatible checkpoint: {0}")]
    Incompatible(String),
}

/// Architecture fields that must match for records to be loadable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchSignature {
    pub input_dim: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub activation: Activation,
}

impl From<&ForwardModelConfig> for ArchSignature {
    fn from(config: &ForwardModelConfig) -> Self {
        Self {
            input_dim: config.input_dim,
            hidden_size: config.hidden_size,
            num_layers: config.num_layers,
            activation: config.activation,
        }
    }
}

/// Metadata saved alongside each trainer's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub arch: ArchSignature,
    /// Total optimizer steps taken.
    pub step: u64,
    /// Completed training epochs.
    pub epoch: usize,
    /// Multiplier value at save time, for inspection.
    pub alpha: f64,
}

/// Serialized state of one trainer: metadata plus burn record bytes.
#[derive(Debug, Clone)]
pub struct TrainerState {
    pub meta: CheckpointMeta,
    pub model: Vec<u8>,
    pub model_optim: Vec<u8>,
    pub multiplier: Vec<u8>,
    pub multiplier_optim: Vec<u8>,
}

impl TrainerState {
    fn records(&self) -> [&[u8]; 4] {
        [
            &self.model,
            &self.model_optim,
            &self.multiplier,
            &self.multiplier_optim,
        ]
    }
}

/// Anything whose full training state can be exported and re-imported.
pub trait Checkpointable {
    fn export_state(&self) -> Result<Vec<TrainerState>, CheckpointError>;

    /// Replace the current state. Implementations decode every record before
    /// applying any of them, so a failed import leaves the state untouched.
    fn import_state(&mut self, states: Vec<TrainerState>) -> Result<(), CheckpointError>;
}

/// Saves and restores checkpoints under a fixed directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the live checkpoint directory.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.dir.join(CURRENT)
    }

    /// Atomically replace the checkpoint with `states`.
    pub fn save(&self, states: &[TrainerState]) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.dir)?;
        let staging = tempfile::Builder::new()
            .prefix(".ckpt-")
            .tempdir_in(&self.dir)?;

        let metas: Vec<&CheckpointMeta> = states.iter().map(|s| &s.meta).collect();
        let meta_json = serde_json::to_vec_pretty(&metas)
            .map_err(|e| CheckpointError::Encode(format!("checkpoint metadata: {e}")))?;
        fs::write(staging.path().join(META_FILE), meta_json)?;

        for (i, state) in states.iter().enumerate() {
            let member_dir = staging.path().join(format!("member_{i}"));
            fs::create_dir(&member_dir)?;
            for (name, bytes) in RECORD_FILES.iter().zip(state.records()) {
                fs::write(member_dir.join(format!("{name}.bin")), bytes)?;
            }
        }

        let current = self.dir.join(CURRENT);
        let previous = self.dir.join(PREVIOUS);
        if previous.exists() {
            fs::remove_dir_all(&previous)?;
        }
        if current.exists() {
            fs::rename(&current, &previous)?;
        }
        fs::rename(staging.into_path(), &current)?;
        if previous.exists() {
            fs::remove_dir_all(&previous)?;
        }

        tracing::debug!(dir = %current.display(), members = states.len(), "Saved checkpoint");
        Ok(())
    }

    /// Load the checkpoint if one exists and matches `arch` and `members`.
    ///
    /// Returns `Ok(None)` when there is nothing to restore, including when
    /// the checkpoint is unreadable (logged as a warning). An architecture or
    /// member-count mismatch is an error.
    pub fn restore_or_initialize(
        &self,
        arch: &ArchSignature,
        members: usize,
    ) -> Result<Option<Vec<TrainerState>>, CheckpointError> {
        let current = self.dir.join(CURRENT);
        let previous = self.dir.join(PREVIOUS);
        // A crash between the two renames in save() leaves only the old copy
        let path = if current.is_dir() {
            current
        } else if previous.is_dir() {
            previous
        } else {
            tracing::info!(dir = %self.dir.display(), "No checkpoint found, starting fresh");
            return Ok(None);
        };

        let states = match read_states(&path) {
            Ok(states) => states,
            Err(e) => {
                tracing::warn!(dir = %path.display(), "Ignoring unreadable checkpoint: {e}");
                return Ok(None);
            }
        };

        if states.len() != members {
            return Err(CheckpointError::Incompatible(format!(
                "checkpoint has {} members, expected {members}",
                states.len()
            )));
        }
        if let Some(state) = states.iter().find(|s| &s.meta.arch != arch) {
            return Err(CheckpointError::Incompatible(format!(
                "checkpoint architecture {:?} does not match {arch:?}",
                state.meta.arch
            )));
        }

        tracing::info!(
            dir = %path.display(),
            members,
            step = states[0].meta.step,
            epoch = states[0].meta.epoch,
            "Restored checkpoint"
        );
        Ok(Some(states))
    }
}

fn read_states(path: &Path) -> Result<Vec<TrainerState>, CheckpointError> {
    let meta_bytes = fs::read(path.join(META_FILE))?;
    let metas: Vec<CheckpointMeta> = serde_json::from_slice(&meta_bytes)
        .map_err(|e| CheckpointError::Corrupt(format!("{META_FILE}: {e}")))?;

    metas
        .into_iter()
        .enumerate()
        .map(|(i, meta)| {
            let member_dir = path.join(format!("member_{i}"));
            let read = |name: &str| fs::read(member_dir.join(format!("{name}.bin")));
            Ok(TrainerState {
                meta,
                model: read(RECORD_FILES[0])?,
                model_optim: read(RECORD_FILES[1])?,
                multiplier: read(RECORD_FILES[2])?,
                multiplier_optim: read(RECORD_FILES[3])?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arch() -> ArchSignature {
        ArchSignature {
            input_dim: 4,
            hidden_size: 8,
            num_layers: 2,
            activation: Activation::LeakyRelu,
        }
    }

    fn state(tag: u8) -> TrainerState {
        TrainerState {
            meta: CheckpointMeta {
                arch: arch(),
                step: tag as u64,
                epoch: 1,
                alpha: 0.5,
            },
            model: vec![tag, 1],
            model_optim: vec![tag, 2],
            multiplier: vec![tag, 3],
            multiplier_optim: vec![tag, 4],
        }
    }

    #[test]
    fn test_missing_checkpoint_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(tmp.path().join("run"));
        assert!(manager.restore_or_initialize(&arch(), 1).unwrap().is_none());
    }

    #[test]
    fn test_save_and_restore() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(tmp.path());
        manager.save(&[state(1), state(2)]).unwrap();
        // Overwrite: the second save replaces the first
        manager.save(&[state(3), state(4)]).unwrap();

        let restored = manager.restore_or_initialize(&arch(), 2).unwrap().unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0].meta.step, 3);
        assert_eq!(restored[1].multiplier_optim, vec![4, 4]);
        assert!(!tmp.path().join(PREVIOUS).exists());

        // No staging directories left behind
        let leftovers = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".ckpt-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_corrupt_checkpoint_falls_back() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(tmp.path());
        manager.save(&[state(1)]).unwrap();
        fs::write(manager.checkpoint_path().join(META_FILE), b"{not json").unwrap();
        assert!(manager.restore_or_initialize(&arch(), 1).unwrap().is_none());
    }

    #[test]
    fn test_incompatible_checkpoint_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(tmp.path());
        manager.save(&[state(1)]).unwrap();

        let mut other = arch();
        other.hidden_size = 16;
        let err = manager.restore_or_initialize(&other, 1).unwrap_err();
        assert!(matches!(err, CheckpointError::Incompatible(_)));

        let err = manager.restore_or_initialize(&arch(), 3).unwrap_err();
        assert!(matches!(err, CheckpointError::Incompatible(_)));
    }

    #[test]
    fn test_restores_previous_after_interrupted_save() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = CheckpointManager::new(tmp.path());
        manager.save(&[state(7)]).unwrap();
        fs::rename(tmp.path().join(CURRENT), tmp.path().join(PREVIOUS)).unwrap();

        let restored = manager.restore_or_initialize(&arch(), 1).unwrap().unwrap();
        assert_eq!(restored[0].meta.step, 7);
    }
}
