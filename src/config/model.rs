//! Denoiser network configuration.

use burn::config::Config;

/// Activation used in the prediction head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, clap::ValueEnum)]
pub enum Activation {
    /// Gaussian error linear unit.
    Gelu,
    /// Rectified linear unit.
    Relu,
}

/// Configuration for the conditional layout denoiser.
#[derive(Config, Debug)]
pub struct DenoiserConfig {
    /// Dimension of the per-layout image feature vector.
    #[config(default = 512)]
    pub feature_dim: usize,

    /// Transformer latent dimension.
    #[config(default = 512)]
    pub latent_dim: usize,

    /// Number of transformer encoder layers.
    #[config(default = 4)]
    pub num_layers: usize,

    /// Number of attention heads.
    #[config(default = 8)]
    pub num_heads: usize,

    /// Dropout rate applied throughout the network.
    #[config(default = 0.0)]
    pub dropout_r: f64,

    /// Activation for the prediction head.
    #[config(default = "Activation::Gelu")]
    pub activation: Activation,

    /// Projected size of the conditioning image features.
    #[config(default = 224)]
    pub cond_emb_size: usize,

    /// Size of the category embedding.
    #[config(default = 64)]
    pub cls_emb_size: usize,

    /// Number of layout categories, including the null category 0.
    #[config(default = 7)]
    pub categories_num: usize,

    /// Maximum number of layout components per sample.
    #[config(default = 9)]
    pub max_num_comp: usize,
}

impl Default for DenoiserConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DenoiserConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.latent_dim == 0 || self.latent_dim % self.num_heads != 0 {
            return Err("latent_dim must be a positive multiple of num_heads".to_string());
        }
        if self.categories_num == 0 {
            return Err("categories_num must be positive".to_string());
        }
        if self.max_num_comp == 0 {
            return Err("max_num_comp must be positive".to_string());
        }
        Ok(())
    }
}
