//! Conditional transformer denoiser.
//!
//! Predicts either the clean geometry or the injected noise for each layout
//! component, conditioned on image features, component categories, and the
//! diffusion timestep.

use burn::module::Ignored;
use burn::nn::transformer::{TransformerEncoder, TransformerEncoderConfig, TransformerEncoderInput};
use burn::nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation;

use crate::config::{Activation, DenoiserConfig};
use crate::data::{LayoutBatch, NoisyBatch};
use crate::GEOMETRY_CHANNELS;

/// A network that denoises layout geometry.
///
/// The output has the same `[batch, components, 6]` shape as the noisy
/// geometry; its interpretation (clean sample vs. noise) is decided by the
/// diffusion mode of the caller.
pub trait LayoutDenoiser<B: Backend> {
    /// Run the denoiser on a noisy batch at the given per-sample timesteps.
    fn forward(
        &self,
        cond: &LayoutBatch<B>,
        noisy: &NoisyBatch<B>,
        timesteps: Tensor<B, 1, Int>,
    ) -> Tensor<B, 3>;
}

/// Transformer-based conditional layout denoiser.
#[derive(Module, Debug)]
pub struct CondLayoutTransformer<B: Backend> {
    geometry_proj: Linear<B>,
    feature_proj: Linear<B>,
    category_embed: Embedding<B>,
    cond_proj: Linear<B>,
    timestep_embed: Embedding<B>,
    encoder: TransformerEncoder<B>,
    head_hidden: Linear<B>,
    head_dropout: Dropout,
    head_out: Linear<B>,
    activation: Ignored<Activation>,
}

impl DenoiserConfig {
    /// Initialize the denoiser for the given number of continuous timesteps.
    pub fn init<B: Backend>(
        &self,
        num_cont_timesteps: usize,
        device: &B::Device,
    ) -> CondLayoutTransformer<B> {
        let encoder = TransformerEncoderConfig::new(
            self.latent_dim,
            self.latent_dim * 4,
            self.num_heads,
            self.num_layers,
        )
        .with_dropout(self.dropout_r)
        .init(device);

        CondLayoutTransformer {
            geometry_proj: LinearConfig::new(GEOMETRY_CHANNELS, self.latent_dim).init(device),
            feature_proj: LinearConfig::new(self.feature_dim, self.cond_emb_size).init(device),
            category_embed: EmbeddingConfig::new(self.categories_num, self.cls_emb_size)
                .init(device),
            cond_proj: LinearConfig::new(self.cls_emb_size + self.cond_emb_size, self.latent_dim)
                .init(device),
            timestep_embed: EmbeddingConfig::new(num_cont_timesteps, self.latent_dim).init(device),
            encoder,
            head_hidden: LinearConfig::new(self.latent_dim, self.latent_dim).init(device),
            head_dropout: DropoutConfig::new(self.dropout_r).init(),
            head_out: LinearConfig::new(self.latent_dim, GEOMETRY_CHANNELS).init(device),
            activation: Ignored(self.activation),
        }
    }
}

impl<B: Backend> LayoutDenoiser<B> for CondLayoutTransformer<B> {
    fn forward(
        &self,
        cond: &LayoutBatch<B>,
        noisy: &NoisyBatch<B>,
        timesteps: Tensor<B, 1, Int>,
    ) -> Tensor<B, 3> {
        let [batch, num_comp, _] = noisy.geometry.dims();

        let geometry = self.geometry_proj.forward(noisy.geometry.clone());

        // Broadcast the per-layout image features over every component.
        let features = self.feature_proj.forward(noisy.image_features.clone());
        let [_, cond_emb] = features.dims();
        let features = features.reshape([batch, 1, cond_emb]).repeat_dim(1, num_comp);
        let categories = self.category_embed.forward(cond.cat.clone());
        let conditioning = self
            .cond_proj
            .forward(Tensor::cat(vec![categories, features], 2));

        let timestep = self
            .timestep_embed
            .forward(timesteps.reshape([batch, 1]));

        let hidden = geometry + conditioning + timestep;

        // Padded components must not attend nor be attended to.
        let mask_pad = cond
            .padding_mask
            .clone()
            .reshape([batch, num_comp])
            .equal_elem(0.0);

        let encoded = self
            .encoder
            .forward(TransformerEncoderInput::new(hidden).mask_pad(mask_pad));

        let hidden = self.head_hidden.forward(encoded);
        let hidden = match self.activation.0 {
            Activation::Gelu => activation::gelu(hidden),
            Activation::Relu => activation::relu(hidden),
        };
        self.head_out.forward(self.head_dropout.forward(hidden))
    }
}
