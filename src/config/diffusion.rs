//! Diffusion schedule configuration.

use burn::config::Config;

/// How beta ranges from its minimum to its maximum value over the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, clap::ValueEnum)]
pub enum BetaSchedule {
    /// Linear interpolation.
    Linear,
    /// Linear interpolation of the square root of beta.
    ScaledLinear,
    /// Glide cosine schedule with betas capped at 0.999.
    SquaredcosCapV2,
}

/// What the denoiser is trained to predict.
///
/// Fixed once per run; dispatched as a tagged variant, never re-parsed from
/// strings inside the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, clap::ValueEnum)]
pub enum DiffusionMode {
    /// The model predicts the clean geometry directly.
    Sample,
    /// The model predicts the injected noise.
    Epsilon,
}

/// Configuration for the geometry diffusion scheduler.
#[derive(Config, Debug)]
pub struct DiffusionConfig {
    /// Number of continuous diffusion timesteps.
    #[config(default = 100)]
    pub num_cont_timesteps: usize,

    /// Number of discrete steps (category corruption; reserved for the joint
    /// scheduler variant).
    #[config(default = 10)]
    pub num_discrete_steps: usize,

    /// Beta schedule shape.
    #[config(default = "BetaSchedule::SquaredcosCapV2")]
    pub beta_schedule: BetaSchedule,

    /// Beta at the first timestep (linear/scaled-linear schedules).
    #[config(default = 1e-4)]
    pub beta_start: f64,

    /// Beta at the last timestep (linear/scaled-linear schedules).
    #[config(default = 0.02)]
    pub beta_end: f64,
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffusionConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_cont_timesteps == 0 {
            return Err("num_cont_timesteps must be positive".to_string());
        }
        if self.beta_start <= 0.0 || self.beta_end <= self.beta_start {
            return Err("betas must satisfy 0 < beta_start < beta_end".to_string());
        }
        Ok(())
    }
}
