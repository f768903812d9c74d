//! DDPM-style noise scheduler for 6-channel layout geometry.

use burn::prelude::*;
use burn::tensor::Distribution;

use crate::config::{BetaSchedule, DiffusionConfig, DiffusionMode};
use crate::error::{LayoutDiffusionError, Result};
use crate::GEOMETRY_CHANNELS;

/// Per-channel noise scale factors, fixed for a training run.
///
/// Box coordinates are scaled by `scaling_size`, rotation by 1, depth by
/// `z_scaling_size`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryScale {
    values: [f32; GEOMETRY_CHANNELS],
}

impl GeometryScale {
    /// Build the scale vector from the run's box and depth scales.
    pub fn new(scaling_size: f32, z_scaling_size: f32) -> Self {
        Self {
            values: [
                scaling_size,
                scaling_size,
                scaling_size,
                scaling_size,
                1.0,
                z_scaling_size,
            ],
        }
    }

    /// Raw per-channel factors.
    pub fn values(&self) -> [f32; GEOMETRY_CHANNELS] {
        self.values
    }

    /// A `[1, 1, 6]` tensor for broadcasting over `[batch, comp, 6]` geometry.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        Tensor::<B, 1>::from_floats(self.values.as_slice(), device).reshape([1, 1, GEOMETRY_CHANNELS])
    }
}

/// Output of a single reverse-diffusion update.
#[derive(Debug, Clone)]
pub struct InferenceOutput<B: Backend> {
    /// The noisy sample for the next (earlier) timestep.
    pub prev_sample: Tensor<B, 3>,
    /// The scheduler's current best estimate of the clean geometry.
    pub pred_original_sample: Tensor<B, 3>,
}

/// Maintains the noise schedule and performs forward noising and reverse
/// denoising steps on geometry tensors.
///
/// Immutable after construction.
#[derive(Debug, Clone)]
pub struct GeometryDiffusionScheduler {
    num_cont_steps: usize,
    betas: Vec<f32>,
    alphas: Vec<f32>,
    alphas_cumprod: Vec<f32>,
}

impl GeometryDiffusionScheduler {
    /// Build the schedule from configuration.
    pub fn new(config: &DiffusionConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|message| LayoutDiffusionError::InvalidConfig { message })?;

        let n = config.num_cont_timesteps;
        let betas: Vec<f32> = match config.beta_schedule {
            BetaSchedule::Linear => (0..n)
                .map(|i| {
                    let t = i as f64 / (n - 1).max(1) as f64;
                    (config.beta_start + t * (config.beta_end - config.beta_start)) as f32
                })
                .collect(),
            BetaSchedule::ScaledLinear => {
                let start = config.beta_start.sqrt();
                let end = config.beta_end.sqrt();
                (0..n)
                    .map(|i| {
                        let t = i as f64 / (n - 1).max(1) as f64;
                        let b = start + t * (end - start);
                        (b * b) as f32
                    })
                    .collect()
            }
            BetaSchedule::SquaredcosCapV2 => betas_for_alpha_bar(n, 0.999),
        };

        let alphas: Vec<f32> = betas.iter().map(|b| 1.0 - b).collect();
        let mut alphas_cumprod = Vec::with_capacity(n);
        let mut prod = 1.0f32;
        for a in &alphas {
            prod *= a;
            alphas_cumprod.push(prod);
        }

        Ok(Self {
            num_cont_steps: n,
            betas,
            alphas,
            alphas_cumprod,
        })
    }

    /// Number of continuous timesteps in the schedule.
    pub fn num_cont_steps(&self) -> usize {
        self.num_cont_steps
    }

    /// Cumulative signal coefficient at a timestep.
    pub fn alpha_cumprod_at(&self, timestep: usize) -> Result<f32> {
        self.check_timestep(timestep)?;
        Ok(self.alphas_cumprod[timestep])
    }

    fn check_timestep(&self, timestep: usize) -> Result<()> {
        if timestep >= self.num_cont_steps {
            return Err(LayoutDiffusionError::TimestepOutOfRange {
                timestep,
                num_cont_steps: self.num_cont_steps,
            });
        }
        Ok(())
    }

    /// Apply the forward diffusion process with a per-sample timestep vector.
    ///
    /// For each sample `i`: `x_t = sqrt(a_bar[t_i]) * x_0 + sqrt(1 - a_bar[t_i]) * noise`.
    /// Output shape equals the input geometry shape.
    pub fn add_noise<B: Backend>(
        &self,
        geometry: Tensor<B, 3>,
        timesteps: &Tensor<B, 1, Int>,
        noise: Tensor<B, 3>,
    ) -> Result<Tensor<B, 3>> {
        let [batch, _, _] = geometry.dims();
        let device = geometry.device();

        // iter() converts from whatever Int element the backend uses.
        let steps: Vec<i64> = timesteps.to_data().iter::<i64>().collect();
        if steps.len() != batch {
            return Err(LayoutDiffusionError::ShapeMismatch {
                expected: vec![batch],
                got: vec![steps.len()],
            });
        }

        let mut sqrt_alpha = Vec::with_capacity(batch);
        let mut sqrt_one_minus = Vec::with_capacity(batch);
        for &t in &steps {
            self.check_timestep(t as usize)?;
            let a_bar = self.alphas_cumprod[t as usize];
            sqrt_alpha.push(a_bar.sqrt());
            sqrt_one_minus.push((1.0 - a_bar).sqrt());
        }

        let signal =
            Tensor::<B, 1>::from_floats(sqrt_alpha.as_slice(), &device).reshape([batch, 1, 1]);
        let spread =
            Tensor::<B, 1>::from_floats(sqrt_one_minus.as_slice(), &device).reshape([batch, 1, 1]);

        Ok(geometry * signal + noise * spread)
    }

    /// Apply one reverse-diffusion update for the whole batch at `timestep`.
    ///
    /// `model_output` is a direct sample prediction or a noise prediction,
    /// selected by `mode`; the mode is run-level configuration passed in by
    /// the caller, not scheduler state. Fixed-small variance noise is added
    /// for every timestep except the last.
    pub fn inference_step<B: Backend>(
        &self,
        model_output: Tensor<B, 3>,
        timestep: usize,
        sample: Tensor<B, 3>,
        mode: DiffusionMode,
    ) -> Result<InferenceOutput<B>> {
        self.check_timestep(timestep)?;
        let t = timestep;

        let alpha_prod_t = self.alphas_cumprod[t];
        let alpha_prod_t_prev = if t > 0 { self.alphas_cumprod[t - 1] } else { 1.0 };
        let beta_prod_t = 1.0 - alpha_prod_t;
        let beta_prod_t_prev = 1.0 - alpha_prod_t_prev;

        let pred_original_sample = match mode {
            DiffusionMode::Sample => model_output,
            DiffusionMode::Epsilon => {
                (sample.clone() - model_output * beta_prod_t.sqrt()) / alpha_prod_t.sqrt()
            }
        };

        // Posterior mean coefficients, as in DDPM eq. 7.
        let coeff_orig = (alpha_prod_t_prev.sqrt() * self.betas[t]) / beta_prod_t;
        let coeff_curr = (self.alphas[t].sqrt() * beta_prod_t_prev) / beta_prod_t;

        let mut prev_sample = pred_original_sample.clone() * coeff_orig + sample * coeff_curr;

        if t > 0 {
            let variance =
                ((1.0 - alpha_prod_t_prev) / (1.0 - alpha_prod_t) * self.betas[t]).max(1e-20);
            let device = prev_sample.device();
            let noise: Tensor<B, 3> = Tensor::random(
                prev_sample.dims(),
                Distribution::Normal(0.0, 1.0),
                &device,
            );
            prev_sample = prev_sample + noise * variance.sqrt();
        }

        Ok(InferenceOutput {
            prev_sample,
            pred_original_sample,
        })
    }
}

/// Betas discretizing the Glide cosine alpha-bar curve, capped at `max_beta`.
fn betas_for_alpha_bar(num_timesteps: usize, max_beta: f32) -> Vec<f32> {
    let alpha_bar = |t: f64| ((t + 0.008) / 1.008 * std::f64::consts::FRAC_PI_2).cos().powi(2);
    (0..num_timesteps)
        .map(|i| {
            let t1 = i as f64 / num_timesteps as f64;
            let t2 = (i + 1) as f64 / num_timesteps as f64;
            ((1.0 - alpha_bar(t2) / alpha_bar(t1)) as f32).min(max_beta)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn scheduler(n: usize) -> GeometryDiffusionScheduler {
        GeometryDiffusionScheduler::new(&DiffusionConfig::new().with_num_cont_timesteps(n)).unwrap()
    }

    #[test]
    fn test_schedule_is_monotone() {
        let s = scheduler(100);
        for w in s.alphas_cumprod.windows(2) {
            assert!(w[1] < w[0]);
        }
        assert!(s.alphas_cumprod[0] > 0.99);
        assert!(*s.alphas_cumprod.last().unwrap() < 0.05);
    }

    #[test]
    fn test_add_noise_preserves_shape() {
        let device = Default::default();
        let s = scheduler(100);

        let geometry = Tensor::<TestBackend, 3>::random(
            [4, 9, GEOMETRY_CHANNELS],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let noise = Tensor::<TestBackend, 3>::random(
            [4, 9, GEOMETRY_CHANNELS],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let t = Tensor::<TestBackend, 1, Int>::from_ints([0, 25, 50, 99], &device);

        let noisy = s.add_noise(geometry.clone(), &t, noise).unwrap();
        assert_eq!(noisy.dims(), geometry.dims());
    }

    #[test]
    fn test_add_noise_near_identity_at_t0() {
        let device = Default::default();
        let s = scheduler(100);
        let signal = s.alphas_cumprod[0].sqrt();

        let geometry = Tensor::<TestBackend, 3>::full([2, 3, GEOMETRY_CHANNELS], 1.0, &device);
        let noise = Tensor::<TestBackend, 3>::zeros([2, 3, GEOMETRY_CHANNELS], &device);
        let t = Tensor::<TestBackend, 1, Int>::from_ints([0, 0], &device);

        let noisy = s.add_noise(geometry, &t, noise).unwrap();
        let values: Vec<f32> = noisy.to_data().to_vec().unwrap();
        for v in values {
            assert!((v - signal).abs() < 1e-6);
        }
    }

    #[test]
    fn test_add_noise_applies_per_sample_coefficients() {
        // Timesteps arrive as whatever Int width the backend uses; build them
        // from i32 data and check each sample gets its own schedule entry.
        let device = Default::default();
        let s = scheduler(100);

        let geometry = Tensor::<TestBackend, 3>::full([4, 1, GEOMETRY_CHANNELS], 1.0, &device);
        let noise = Tensor::<TestBackend, 3>::zeros([4, 1, GEOMETRY_CHANNELS], &device);
        let steps = [3usize, 40, 77, 99];
        let t: Tensor<TestBackend, 1, Int> = Tensor::from_data(
            TensorData::new(steps.iter().map(|&v| v as i32).collect::<Vec<_>>(), [4]),
            &device,
        );

        let noisy = s.add_noise(geometry, &t, noise).unwrap();
        let values: Vec<f32> = noisy.to_data().to_vec().unwrap();
        for (sample, &step) in steps.iter().enumerate() {
            let want = s.alpha_cumprod_at(step).unwrap().sqrt();
            for channel in 0..GEOMETRY_CHANNELS {
                let got = values[sample * GEOMETRY_CHANNELS + channel];
                assert!((got - want).abs() < 1e-6, "sample {sample}: {got} vs {want}");
            }
        }
    }

    #[test]
    fn test_alpha_cumprod_at_rejects_out_of_range_timestep() {
        let s = scheduler(10);
        assert!(s.alpha_cumprod_at(9).is_ok());
        assert!(s.alpha_cumprod_at(10).is_err());
    }

    #[test]
    fn test_add_noise_rejects_out_of_range_timestep() {
        let device = Default::default();
        let s = scheduler(10);

        let geometry = Tensor::<TestBackend, 3>::zeros([1, 2, GEOMETRY_CHANNELS], &device);
        let noise = Tensor::<TestBackend, 3>::zeros([1, 2, GEOMETRY_CHANNELS], &device);
        let t = Tensor::<TestBackend, 1, Int>::from_ints([10], &device);

        assert!(s.add_noise(geometry, &t, noise).is_err());
    }

    #[test]
    fn test_epsilon_step_recovers_clean_signal() {
        // If the model reports the exact noise used in the forward pass, the
        // x0 estimate must match the clean geometry.
        let device = Default::default();
        let s = scheduler(100);
        let t = 40usize;

        let clean = Tensor::<TestBackend, 3>::random(
            [2, 4, GEOMETRY_CHANNELS],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let noise = Tensor::<TestBackend, 3>::random(
            [2, 4, GEOMETRY_CHANNELS],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let ts = Tensor::<TestBackend, 1, Int>::from_ints([t as i32, t as i32], &device);
        let noisy = s.add_noise(clean.clone(), &ts, noise.clone()).unwrap();

        let out = s
            .inference_step(noise, t, noisy, DiffusionMode::Epsilon)
            .unwrap();

        let recovered: Vec<f32> = out.pred_original_sample.to_data().to_vec().unwrap();
        let expected: Vec<f32> = clean.to_data().to_vec().unwrap();
        for (r, e) in recovered.iter().zip(expected.iter()) {
            assert!((r - e).abs() < 1e-3, "recovered {r} vs clean {e}");
        }
    }

    #[test]
    fn test_sample_step_passes_prediction_through() {
        let device = Default::default();
        let s = scheduler(100);

        let pred = Tensor::<TestBackend, 3>::full([1, 2, GEOMETRY_CHANNELS], 0.5, &device);
        let sample = Tensor::<TestBackend, 3>::zeros([1, 2, GEOMETRY_CHANNELS], &device);

        let out = s
            .inference_step(pred.clone(), 0, sample, DiffusionMode::Sample)
            .unwrap();
        let got: Vec<f32> = out.pred_original_sample.to_data().to_vec().unwrap();
        let want: Vec<f32> = pred.to_data().to_vec().unwrap();
        assert_eq!(got, want);
    }

    #[test]
    fn test_geometry_scale_layout() {
        let scale = GeometryScale::new(5.0, 0.01);
        assert_eq!(scale.values(), [5.0, 5.0, 5.0, 5.0, 1.0, 0.01]);

        let device = Default::default();
        let t = scale.to_tensor::<TestBackend>(&device);
        assert_eq!(t.dims(), [1, 1, GEOMETRY_CHANNELS]);
    }
}
