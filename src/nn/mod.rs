//! Denoiser networks.

mod denoiser;

pub use denoiser::{CondLayoutTransformer, LayoutDenoiser};
