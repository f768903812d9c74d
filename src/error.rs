//! Error types for layout_diffusion.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during layout diffusion training and sampling.
#[derive(Error, Debug)]
pub enum LayoutDiffusionError {
    /// A loss was requested over a mask with no valid positions.
    #[error("empty padding mask: sample {sample_index} has zero valid components")]
    EmptyMask {
        /// Batch index of the offending sample.
        sample_index: usize,
    },

    /// Timestep outside the scheduler's range.
    #[error("timestep {timestep} out of range for {num_cont_steps} continuous steps")]
    TimestepOutOfRange {
        /// The requested timestep.
        timestep: usize,
        /// Number of continuous timesteps in the schedule.
        num_cont_steps: usize,
    },

    /// Tensor shape mismatch.
    #[error("tensor shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        got: Vec<usize>,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// A checkpoint directory was missing or malformed.
    #[error("checkpoint error at {path:?}: {message}")]
    Checkpoint {
        /// Checkpoint path involved.
        path: PathBuf,
        /// Description of the error.
        message: String,
    },

    /// Dataset was empty or a sample was malformed.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Failure from a burn recorder (model/optimizer records).
    #[error("record error: {0}")]
    Record(#[from] burn::record::RecorderError),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error for persisted trainer state.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type for layout_diffusion operations.
pub type Result<T> = std::result::Result<T, LayoutDiffusionError>;
