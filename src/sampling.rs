//! Full reverse-diffusion sampling of layout geometry.

use burn::prelude::*;
use burn::tensor::Distribution;

use crate::config::DiffusionMode;
use crate::data::{LayoutBatch, NoisyBatch};
use crate::diffusion::{GeometryDiffusionScheduler, GeometryScale};
use crate::error::{LayoutDiffusionError, Result};
use crate::nn::LayoutDenoiser;

/// Generate layouts for a batch by running the full reverse chain.
///
/// Starts from scaled Gaussian noise and walks the timesteps from
/// `num_cont_steps - 1` down to 0, re-masking padded components after every
/// step so padding never leaks into attention. Returns the final clean-sample
/// estimate, not the last noisy iterate.
pub fn sample_from_model<B: Backend, M: LayoutDenoiser<B>>(
    batch: &LayoutBatch<B>,
    model: &M,
    scheduler: &GeometryDiffusionScheduler,
    scale: &GeometryScale,
    mode: DiffusionMode,
) -> Result<Tensor<B, 3>> {
    let device = batch.device();
    let dims = batch.geometry.dims();
    let [batch_size, _, _] = dims;

    let noise: Tensor<B, 3> = Tensor::random(dims, Distribution::Normal(0.0, 1.0), &device);
    let mut sample = noise * scale.to_tensor::<B>(&device) * batch.padding_mask.clone();

    let mut pred_original = None;
    for t in (0..scheduler.num_cont_steps()).rev() {
        let timesteps = Tensor::<B, 1, Int>::full([batch_size], t as i64, &device);
        let noisy = NoisyBatch {
            geometry: sample.clone(),
            image_features: batch.image_features.clone(),
        };
        let model_output = model.forward(batch, &noisy, timesteps);
        let step = scheduler.inference_step(model_output, t, sample, mode)?;
        sample = step.prev_sample * batch.padding_mask.clone();
        pred_original = Some(step.pred_original_sample);
    }

    pred_original.ok_or_else(|| LayoutDiffusionError::InvalidConfig {
        message: "cannot sample with zero diffusion timesteps".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiffusionConfig;
    use crate::data::{collate, LayoutSample};
    use crate::GEOMETRY_CHANNELS;
    use burn::backend::NdArray;
    use std::cell::Cell;

    type TestBackend = NdArray;

    /// Echoes the noisy geometry back and counts invocations.
    struct EchoDenoiser {
        calls: Cell<usize>,
    }

    impl LayoutDenoiser<TestBackend> for EchoDenoiser {
        fn forward(
            &self,
            _cond: &LayoutBatch<TestBackend>,
            noisy: &NoisyBatch<TestBackend>,
            _timesteps: Tensor<TestBackend, 1, Int>,
        ) -> Tensor<TestBackend, 3> {
            self.calls.set(self.calls.get() + 1);
            noisy.geometry.clone()
        }
    }

    fn make_batch() -> LayoutBatch<TestBackend> {
        let device = Default::default();
        let samples = vec![
            LayoutSample {
                geometry: vec![[0.5; GEOMETRY_CHANNELS]; 3],
                categories: vec![1; 3],
                image_features: vec![0.2; 4],
            },
            LayoutSample {
                geometry: vec![[0.5; GEOMETRY_CHANNELS]; 2],
                categories: vec![2; 2],
                image_features: vec![0.2; 4],
            },
        ];
        collate(&samples, 3, 4, &device).unwrap()
    }

    #[test]
    fn test_chain_invokes_model_once_per_timestep() {
        let batch = make_batch();
        let config = DiffusionConfig::new().with_num_cont_timesteps(12);
        let scheduler = GeometryDiffusionScheduler::new(&config).unwrap();
        let scale = GeometryScale::new(5.0, 0.01);
        let model = EchoDenoiser { calls: Cell::new(0) };

        let out =
            sample_from_model(&batch, &model, &scheduler, &scale, DiffusionMode::Sample).unwrap();

        assert_eq!(model.calls.get(), 12);
        assert_eq!(out.dims(), [2, 3, GEOMETRY_CHANNELS]);
    }

    #[test]
    fn test_padded_components_stay_zero_in_sample_mode() {
        // In sample mode the returned estimate is the model output on the
        // re-masked iterate, so padded rows must be exactly zero.
        let batch = make_batch();
        let config = DiffusionConfig::new().with_num_cont_timesteps(5);
        let scheduler = GeometryDiffusionScheduler::new(&config).unwrap();
        let scale = GeometryScale::new(5.0, 0.01);
        let model = EchoDenoiser { calls: Cell::new(0) };

        let out =
            sample_from_model(&batch, &model, &scheduler, &scale, DiffusionMode::Sample).unwrap();
        let values: Vec<f32> = out.to_data().to_vec().unwrap();

        // Sample 1 has its third component padded.
        let padded = &values[(1 * 3 + 2) * GEOMETRY_CHANNELS..(1 * 3 + 3) * GEOMETRY_CHANNELS];
        assert!(padded.iter().all(|&v| v == 0.0));
    }
}
