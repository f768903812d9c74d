//! Training run configuration.

use burn::config::Config;

use super::{DenoiserConfig, DiffusionConfig, DiffusionMode};

/// Optimizer and schedule hyperparameters.
#[derive(Config, Debug)]
pub struct OptimConfig {
    /// Base learning rate.
    #[config(default = 1e-4)]
    pub lr: f64,

    /// AdamW beta_1.
    #[config(default = 0.95)]
    pub beta1: f32,

    /// AdamW beta_2.
    #[config(default = 0.999)]
    pub beta2: f32,

    /// AdamW epsilon.
    #[config(default = 1e-8)]
    pub epsilon: f32,

    /// Weight decay.
    #[config(default = 1e-6)]
    pub weight_decay: f32,

    /// Batch size per device.
    #[config(default = 64)]
    pub batch_size: usize,

    /// Number of training epochs.
    #[config(default = 800)]
    pub num_epochs: usize,

    /// Linear warmup length in optimizer steps.
    #[config(default = 10000)]
    pub num_warmup_steps: usize,

    /// Micro-batches accumulated per optimizer step.
    #[config(default = 1)]
    pub gradient_accumulation_steps: usize,

    /// Data-loading worker count (reserved for an out-of-process loader).
    #[config(default = 4)]
    pub num_workers: usize,
}

impl Default for OptimConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Top-level configuration for a training run.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Denoiser network configuration.
    pub model: DenoiserConfig,

    /// Diffusion schedule configuration.
    pub diffusion: DiffusionConfig,

    /// Optimizer configuration.
    pub optimizer: OptimConfig,

    /// Directory that receives `checkpoint-<epoch>/` subdirectories.
    #[config(default = "String::from(\"checkpoints\")")]
    pub ckpt_dir: String,

    /// Checkpoint directory to resume from, if any.
    pub resume_from_checkpoint: Option<String>,

    /// RNG seed for shuffling, noise, and dropout.
    #[config(default = 42)]
    pub seed: u64,

    /// What the model predicts.
    #[config(default = "DiffusionMode::Sample")]
    pub diffusion_mode: DiffusionMode,

    /// Noise scale for the four box channels.
    #[config(default = 5.0)]
    pub scaling_size: f32,

    /// Noise scale for the depth channel.
    #[config(default = 0.01)]
    pub z_scaling_size: f32,

    /// Whether box coordinates are normalized to [-1, 1] instead of [0, 1].
    #[config(default = true)]
    pub mean_0: bool,

    /// Loss weights for the bbox, rotation, and depth components.
    #[config(default = "[1.0, 0.1, 0.1]")]
    pub loss_weight: [f32; 3],

    /// Whether to train with classifier-free-guidance conditional dropout.
    #[config(default = true)]
    pub is_cond: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::new(
            DenoiserConfig::default(),
            DiffusionConfig::default(),
            OptimConfig::default(),
        )
    }
}

impl TrainingConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.model.validate()?;
        self.diffusion.validate()?;

        if self.optimizer.lr <= 0.0 {
            return Err("lr must be positive".to_string());
        }
        if self.optimizer.batch_size == 0 {
            return Err("batch_size must be positive".to_string());
        }
        if self.optimizer.gradient_accumulation_steps == 0 {
            return Err("gradient_accumulation_steps must be positive".to_string());
        }
        if self.scaling_size <= 0.0 || self.z_scaling_size <= 0.0 {
            return Err("geometry scales must be positive".to_string());
        }
        Ok(())
    }
}
