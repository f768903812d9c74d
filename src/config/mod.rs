//! Configuration types for layout_diffusion.
//!
//! Burn-style configuration structs for the denoiser network, the diffusion
//! schedule, the optimizer, and the overall training run.

mod diffusion;
mod model;
mod training;

pub use diffusion::{BetaSchedule, DiffusionConfig, DiffusionMode};
pub use model::{Activation, DenoiserConfig};
pub use training::{OptimConfig, TrainingConfig};
