//! Forward and reverse diffusion over layout geometry.

mod scheduler;

pub use scheduler::{GeometryDiffusionScheduler, GeometryScale, InferenceOutput};
