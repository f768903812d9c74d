//! Training entry point for the conditional layout denoiser.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use burn::backend::Autodiff;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use layout_diffusion::prelude::*;

#[cfg(feature = "wgpu")]
type Backend = burn::backend::Wgpu;
#[cfg(not(feature = "wgpu"))]
type Backend = burn::backend::NdArray;
type ADBackend = Autodiff<Backend>;

#[derive(Parser, Debug)]
#[command(name = "train", about = "Conditional layout diffusion training")]
struct TrainArgs {
    /// Training layouts (JSON array of samples).
    #[arg(long)]
    train_data: Option<String>,
    /// Validation layouts (JSON array of samples).
    #[arg(long)]
    val_data: Option<String>,
    /// Number of epochs to run.
    #[arg(long, default_value_t = 800)]
    epochs: usize,
    /// Training batch size.
    #[arg(long, default_value_t = 64)]
    batch_size: usize,
    /// Base learning rate.
    #[arg(long, default_value_t = 1e-4)]
    lr: f64,
    /// Linear warmup steps before cosine decay.
    #[arg(long, default_value_t = 10000)]
    warmup_steps: usize,
    /// What the denoiser predicts.
    #[arg(long, value_enum, default_value_t = DiffusionMode::Sample)]
    mode: DiffusionMode,
    /// Beta schedule for the diffusion process.
    #[arg(long, value_enum, default_value_t = BetaSchedule::SquaredcosCapV2)]
    beta_schedule: BetaSchedule,
    /// Continuous diffusion timesteps.
    #[arg(long, default_value_t = 100)]
    timesteps: usize,
    /// Box coordinate scale.
    #[arg(long, default_value_t = 5.0)]
    scaling_size: f32,
    /// Depth channel scale.
    #[arg(long, default_value_t = 0.01)]
    z_scaling_size: f32,
    /// Disable classifier-free-guidance conditional dropout.
    #[arg(long, default_value_t = false)]
    no_cond: bool,
    /// Checkpoint directory.
    #[arg(long, default_value = "checkpoints")]
    ckpt_dir: String,
    /// Resume from this checkpoint directory.
    #[arg(long)]
    resume: Option<String>,
    /// Shuffle and noise seed.
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Without data files, train on this many synthetic layouts.
    #[arg(long, default_value_t = 256)]
    synthetic_samples: usize,
}

fn load_samples(path: &str) -> Result<Vec<LayoutSample>> {
    let file = File::open(Path::new(path)).with_context(|| format!("failed to open {path}"))?;
    let samples = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse {path}"))?;
    Ok(samples)
}

/// Random layouts for smoke-testing the pipeline without a dataset.
fn synthetic_samples(count: usize, config: &TrainingConfig, seed: u64) -> Vec<LayoutSample> {
    let mut rng = StdRng::seed_from_u64(seed);
    let max_comp = config.model.max_num_comp;
    let categories = config.model.categories_num as i64;
    (0..count)
        .map(|_| {
            let n = rng.gen_range(1..=max_comp);
            LayoutSample {
                geometry: (0..n)
                    .map(|_| {
                        let w = rng.gen_range(0.05f32..0.5);
                        let h = rng.gen_range(0.05f32..0.5);
                        let x = rng.gen_range(w / 2.0..1.0 - w / 2.0);
                        let y = rng.gen_range(h / 2.0..1.0 - h / 2.0);
                        let s = config.scaling_size;
                        [
                            (x * 2.0 - 1.0) * s,
                            (y * 2.0 - 1.0) * s,
                            (w * 2.0 - 1.0) * s,
                            (h * 2.0 - 1.0) * s,
                            0.0,
                            rng.gen_range(0.0..1.0) * config.z_scaling_size,
                        ]
                    })
                    .collect(),
                categories: (0..n).map(|_| rng.gen_range(1..categories)).collect(),
                image_features: (0..config.model.feature_dim)
                    .map(|_| rng.gen_range(-1.0f32..1.0))
                    .collect(),
            }
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = TrainArgs::parse();

    let mut config = TrainingConfig::default()
        .with_ckpt_dir(args.ckpt_dir)
        .with_resume_from_checkpoint(args.resume)
        .with_seed(args.seed)
        .with_diffusion_mode(args.mode)
        .with_scaling_size(args.scaling_size)
        .with_z_scaling_size(args.z_scaling_size)
        .with_is_cond(!args.no_cond);
    config.optimizer.num_epochs = args.epochs;
    config.optimizer.batch_size = args.batch_size;
    config.optimizer.lr = args.lr;
    config.optimizer.num_warmup_steps = args.warmup_steps;
    config.diffusion.beta_schedule = args.beta_schedule;
    config.diffusion.num_cont_timesteps = args.timesteps;

    let train_set = match &args.train_data {
        Some(path) => load_samples(path)?,
        None => {
            log::warn!(
                "no --train-data given, using {} synthetic layouts",
                args.synthetic_samples
            );
            synthetic_samples(args.synthetic_samples, &config, args.seed)
        }
    };
    let val_set = match &args.val_data {
        Some(path) => load_samples(path)?,
        None => synthetic_samples(args.synthetic_samples / 8, &config, args.seed.wrapping_add(1)),
    };

    let device = <ADBackend as burn::tensor::backend::Backend>::Device::default();
    let mut sink = LogSink::default();
    train::<ADBackend>(&config, &train_set, &val_set, device, &mut sink)?;

    Ok(())
}
