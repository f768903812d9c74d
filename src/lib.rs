//! # layout_diffusion
//!
//! Conditional diffusion training for content-aware layout generation.
//!
//! Layouts are sets of up to `max_num_comp` components, each described by six
//! geometry channels (center x, center y, width, height, rotation, depth),
//! plus a category id and a shared image feature vector. A transformer
//! denoiser is trained with a DDPM-style scheduler to predict either the
//! clean geometry or the injected noise, with classifier-free-guidance
//! conditional dropout.
//!
//! ## Quick Start
//!
//! ```ignore
//! use layout_diffusion::prelude::*;
//! use burn::backend::{Autodiff, NdArray};
//!
//! type B = Autodiff<NdArray>;
//!
//! let config = TrainingConfig::default();
//! let device = Default::default();
//! let mut sink = LogSink::default();
//! let model = train::<B>(&config, &train_set, &val_set, device, &mut sink)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `ndarray` (default): CPU backend
//! - `wgpu`: GPU acceleration via WebGPU

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod data;
pub mod diffusion;
pub mod error;
pub mod iou;
pub mod loss;
pub mod nn;
pub mod sampling;
pub mod training;

// Re-export key types for convenience
pub use config::{BetaSchedule, DiffusionConfig, DiffusionMode, DenoiserConfig, TrainingConfig};
pub use diffusion::{GeometryDiffusionScheduler, GeometryScale};
pub use error::{LayoutDiffusionError, Result};
pub use nn::{CondLayoutTransformer, LayoutDenoiser};
pub use sampling::sample_from_model;
pub use training::train;

/// Number of geometry channels per layout component.
pub const GEOMETRY_CHANNELS: usize = 6;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{
        Activation, BetaSchedule, DenoiserConfig, DiffusionConfig, DiffusionMode, OptimConfig,
        TrainingConfig,
    };
    pub use crate::data::{collate, conditional_dropout, LayoutBatch, LayoutSample, NoisyBatch};
    pub use crate::diffusion::{GeometryDiffusionScheduler, GeometryScale, InferenceOutput};
    pub use crate::error::{LayoutDiffusionError, Result};
    pub use crate::iou::mean_iou;
    pub use crate::loss::{masked_l2, masked_l2_rz};
    pub use crate::nn::{CondLayoutTransformer, LayoutDenoiser};
    pub use crate::sampling::sample_from_model;
    pub use crate::training::{
        checkpoint_dir, find_latest_checkpoint, train, LogSink, MetricsSink, TrainState,
        WarmupCosineLr,
    };
    pub use crate::GEOMETRY_CHANNELS;
}
