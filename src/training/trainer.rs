//! The training loop for the conditional layout denoiser.

use std::path::Path;

use burn::module::AutodiffModule;
use burn::optim::{AdamWConfig, GradientsAccumulator, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{Distribution, ElementConversion};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::{DiffusionMode, TrainingConfig};
use crate::data::{collate, conditional_dropout, LayoutBatch, LayoutSample, NoisyBatch};
use crate::diffusion::{GeometryDiffusionScheduler, GeometryScale};
use crate::error::{LayoutDiffusionError, Result};
use crate::iou::mean_iou;
use crate::loss::{masked_l2, masked_l2_rz};
use crate::nn::{CondLayoutTransformer, LayoutDenoiser};
use crate::sampling::sample_from_model;
use crate::training::checkpoint::{
    checkpoint_dir, load_state, prune_oldest, save_state, TrainState,
};
use crate::training::metrics::{MetricsSink, RunningMean};
use crate::training::schedule::WarmupCosineLr;

const GRAD_CLIP_NORM: f32 = 1.0;
const SAMPLE_EVERY_EPOCHS: usize = 30;
const CHECKPOINT_EVERY_EPOCHS: usize = 100;

/// Train the denoiser on the given layouts and return the final model.
///
/// Runs the full schedule of epochs: noising and denoising on shuffled
/// training batches, a validation pass per epoch, periodic full-chain
/// sampling, and rotated checkpoints. Resumes from
/// `config.resume_from_checkpoint` when set.
pub fn train<B: AutodiffBackend>(
    config: &TrainingConfig,
    train_data: &[LayoutSample],
    val_data: &[LayoutSample],
    device: B::Device,
    sink: &mut dyn MetricsSink,
) -> Result<CondLayoutTransformer<B>> {
    config
        .validate()
        .map_err(|message| LayoutDiffusionError::InvalidConfig { message })?;
    if train_data.is_empty() {
        return Err(LayoutDiffusionError::InvalidData(
            "no training layouts".to_string(),
        ));
    }

    B::seed(config.seed);
    let mut rng = StdRng::seed_from_u64(config.seed);

    let opt = &config.optimizer;
    let scheduler = GeometryDiffusionScheduler::new(&config.diffusion)?;
    let scale = GeometryScale::new(config.scaling_size, config.z_scaling_size);
    let scale_tensor = scale.to_tensor::<B>(&device);
    let mode = config.diffusion_mode;

    let mut model = config
        .model
        .init::<B>(config.diffusion.num_cont_timesteps, &device);
    let mut optim = AdamWConfig::new()
        .with_beta_1(opt.beta1)
        .with_beta_2(opt.beta2)
        .with_epsilon(opt.epsilon)
        .with_weight_decay(opt.weight_decay)
        .with_grad_clipping(Some(burn::grad_clipping::GradientClippingConfig::Norm(
            GRAD_CLIP_NORM,
        )))
        .init();

    let num_batches = train_data.len().div_ceil(opt.batch_size);
    let steps_per_epoch = num_batches.div_ceil(opt.gradient_accumulation_steps);
    let max_train_steps = steps_per_epoch * opt.num_epochs;
    let schedule = WarmupCosineLr::new(opt.lr, opt.num_warmup_steps, max_train_steps);

    log::info!("running training");
    log::info!("  num examples = {}", train_data.len());
    log::info!("  num epochs = {}", opt.num_epochs);
    log::info!("  batch size = {}", opt.batch_size);
    log::info!(
        "  gradient accumulation steps = {}",
        opt.gradient_accumulation_steps
    );
    log::info!("  total optimization steps = {max_train_steps}");

    let mut global_step = 0usize;
    let mut first_epoch = 0usize;
    let mut resume_step = 0usize;
    let resuming = config.resume_from_checkpoint.is_some();
    if let Some(path) = &config.resume_from_checkpoint {
        let dir = Path::new(path);
        let state = load_state(dir)?;
        let recorder = CompactRecorder::new();
        let record = recorder.load(dir.join("model"), &device)?;
        model = model.load_record(record);
        let record = recorder.load(dir.join("optimizer"), &device)?;
        optim = optim.load_record(record);

        global_step = state.global_step;
        first_epoch = state.epoch;
        resume_step = global_step
            .saturating_sub(first_epoch * steps_per_epoch)
            .min(steps_per_epoch);
        log::info!(
            "resumed from {dir:?} at epoch {first_epoch}, step {global_step}"
        );
    }

    let feature_dim = config.model.feature_dim;
    let max_num_comp = config.model.max_num_comp;
    let mut order: Vec<usize> = (0..train_data.len()).collect();
    let mut accumulator = GradientsAccumulator::new();
    let mut accumulated = 0usize;
    let mut last_lr = 0.0f64;

    for epoch in first_epoch..opt.num_epochs {
        order.shuffle(&mut rng);

        let mut train_loss = RunningMean::default();
        let mut train_iou = RunningMean::default();
        let mut bbox_loss_mean = RunningMean::default();
        let mut r_loss_mean = RunningMean::default();
        let mut z_loss_mean = RunningMean::default();
        let mut last_train_batch: Option<LayoutBatch<B>> = None;

        for (step, chunk) in order.chunks(opt.batch_size).enumerate() {
            let update_index = step / opt.gradient_accumulation_steps;
            if resuming && epoch == first_epoch && update_index < resume_step {
                continue;
            }

            let samples: Vec<LayoutSample> =
                chunk.iter().map(|&i| train_data[i].clone()).collect();
            let batch = collate::<B>(&samples, max_num_comp, feature_dim, &device)?;
            let bsz = batch.batch_size();
            let mask = batch.padding_mask.clone();

            let noise: Tensor<B, 3> = Tensor::random(
                batch.geometry.dims(),
                Distribution::Normal(0.0, 1.0),
                &device,
            ) * scale_tensor.clone();
            let steps: Vec<i64> = (0..bsz)
                .map(|_| rng.gen_range(0..config.diffusion.num_cont_timesteps) as i64)
                .collect();
            let timesteps =
                Tensor::<B, 1, Int>::from_data(TensorData::new(steps, [bsz]), &device);

            let noisy_geometry = scheduler
                .add_noise(batch.geometry.clone(), &timesteps, noise.clone())?
                * mask.clone();

            let cond_batch = if config.is_cond {
                conditional_dropout(&batch, &mut rng).0
            } else {
                batch.clone()
            };
            let noisy = NoisyBatch {
                geometry: noisy_geometry.clone(),
                image_features: cond_batch.image_features.clone(),
            };

            let prediction = model.forward(&cond_batch, &noisy, timesteps.clone());

            let loss = match mode {
                DiffusionMode::Sample => {
                    masked_l2(&batch.geometry, &prediction, &mask)?.mean()
                }
                DiffusionMode::Epsilon => {
                    let (bbox, r, z) = masked_l2_rz(&noise, &prediction, &mask)?;
                    let [w_bbox, w_r, w_z] = config.loss_weight;
                    bbox_loss_mean
                        .update(bbox.clone().mean().into_scalar().elem::<f64>() * w_bbox as f64);
                    r_loss_mean
                        .update(r.clone().mean().into_scalar().elem::<f64>() * w_r as f64);
                    z_loss_mean
                        .update(z.clone().mean().into_scalar().elem::<f64>() * w_z as f64);
                    (bbox * w_bbox + r * w_r + z * w_z).mean()
                }
            };
            train_loss.update(loss.clone().into_scalar().elem::<f64>());

            let batch_iou = match mode {
                DiffusionMode::Sample => mean_iou(
                    &batch.geometry,
                    &(prediction.clone() * mask.clone()),
                    &mask,
                    config.scaling_size,
                    config.mean_0,
                ),
                DiffusionMode::Epsilon => {
                    // Compare the re-noised prediction against the noisy target.
                    let renoised = scheduler.add_noise(
                        batch.geometry.clone(),
                        &timesteps,
                        prediction.clone(),
                    )? * mask.clone();
                    mean_iou(
                        &noisy_geometry,
                        &renoised,
                        &mask,
                        config.scaling_size,
                        config.mean_0,
                    )
                }
            };
            train_iou.update(batch_iou as f64);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            accumulator.accumulate(&model, grads);
            accumulated += 1;

            let last_of_epoch = (step + 1) * opt.batch_size >= train_data.len();
            if accumulated == opt.gradient_accumulation_steps || last_of_epoch {
                let grads = accumulator.grads();
                last_lr = schedule.at(global_step);
                model = optim.step(last_lr, model, grads);
                global_step += 1;
                accumulated = 0;
                log::debug!(
                    "epoch {epoch} step {global_step}: loss {:.6} lr {last_lr:.6e}",
                    train_loss.value()
                );
            }

            last_train_batch = Some(batch);
        }

        let (val_loss, val_iou) = evaluate(
            config,
            &model.valid(),
            val_data,
            &scheduler,
            &scale,
            &mut rng,
            &device,
        )?;

        let mut metrics: Vec<(&str, f64)> = vec![
            ("train_loss", train_loss.value()),
            ("train_iou", train_iou.value()),
            ("val_loss", val_loss),
            ("val_iou", val_iou),
            ("lr", last_lr),
        ];
        if mode == DiffusionMode::Epsilon {
            metrics.push(("bbox", bbox_loss_mean.value()));
            metrics.push(("rotation", r_loss_mean.value()));
            metrics.push(("z", z_loss_mean.value()));
        }

        if epoch % SAMPLE_EVERY_EPOCHS == 0 {
            let valid_model = model.valid();
            let mut train_iou_chain = RunningMean::default();
            if let Some(batch) = &last_train_batch {
                let inner_batch = valid_batch(batch);
                train_iou_chain
                    .update(chain_iou(config, &valid_model, &inner_batch, &scheduler, &scale)? as f64);
            }

            let mut val_iou_chain = RunningMean::default();
            for chunk in val_data.chunks(opt.batch_size) {
                let batch =
                    collate::<B::InnerBackend>(chunk, max_num_comp, feature_dim, &device)?;
                val_iou_chain
                    .update(chain_iou(config, &valid_model, &batch, &scheduler, &scale)? as f64);
            }

            metrics.push(("iou_train_1000", train_iou_chain.value()));
            metrics.push(("iou_val_1000", val_iou_chain.value()));
        }

        sink.log(epoch, &metrics);
        log::info!(
            "epoch {epoch}: train loss {:.6}, val loss {val_loss:.6}, val iou {val_iou:.4}",
            train_loss.value()
        );

        if epoch % CHECKPOINT_EVERY_EPOCHS == CHECKPOINT_EVERY_EPOCHS - 1 {
            let root = Path::new(&config.ckpt_dir);
            prune_oldest(root)?;
            let dir = checkpoint_dir(root, epoch);
            save_state(
                &dir,
                &TrainState {
                    epoch,
                    global_step,
                },
            )?;
            let recorder = CompactRecorder::new();
            recorder.record(model.clone().into_record(), dir.join("model"))?;
            recorder.record(optim.to_record(), dir.join("optimizer"))?;
            log::info!("saved checkpoint to {dir:?}");
        }
    }

    Ok(model)
}

/// One validation pass with fresh noise; no gradients are taken.
#[allow(clippy::too_many_arguments)]
fn evaluate<B: Backend>(
    config: &TrainingConfig,
    model: &CondLayoutTransformer<B>,
    val_data: &[LayoutSample],
    scheduler: &GeometryDiffusionScheduler,
    scale: &GeometryScale,
    rng: &mut StdRng,
    device: &B::Device,
) -> Result<(f64, f64)> {
    let mut val_loss = RunningMean::default();
    let mut val_iou = RunningMean::default();

    for chunk in val_data.chunks(config.optimizer.batch_size) {
        let batch = collate::<B>(
            chunk,
            config.model.max_num_comp,
            config.model.feature_dim,
            device,
        )?;
        let bsz = batch.batch_size();
        let mask = batch.padding_mask.clone();

        let noise: Tensor<B, 3> = Tensor::random(
            batch.geometry.dims(),
            Distribution::Normal(0.0, 1.0),
            device,
        ) * scale.to_tensor::<B>(device);
        let steps: Vec<i64> = (0..bsz)
            .map(|_| rng.gen_range(0..config.diffusion.num_cont_timesteps) as i64)
            .collect();
        let timesteps =
            Tensor::<B, 1, Int>::from_data(TensorData::new(steps, [bsz]), device);

        let noisy_geometry =
            scheduler.add_noise(batch.geometry.clone(), &timesteps, noise.clone())? * mask.clone();
        let noisy = NoisyBatch {
            geometry: noisy_geometry.clone(),
            image_features: batch.image_features.clone(),
        };
        let prediction = model.forward(&batch, &noisy, timesteps.clone());

        match config.diffusion_mode {
            DiffusionMode::Sample => {
                let loss = masked_l2(&batch.geometry, &prediction, &mask)?.mean();
                val_loss.update(loss.into_scalar().elem::<f64>());
                val_iou.update(mean_iou(
                    &batch.geometry,
                    &(prediction * mask.clone()),
                    &mask,
                    config.scaling_size,
                    config.mean_0,
                ) as f64);
            }
            DiffusionMode::Epsilon => {
                let (bbox, r, z) = masked_l2_rz(&noise, &prediction, &mask)?;
                let [w_bbox, w_r, w_z] = config.loss_weight;
                let loss = (bbox * w_bbox + r * w_r + z * w_z).mean();
                val_loss.update(loss.into_scalar().elem::<f64>());

                let renoised = scheduler.add_noise(
                    batch.geometry.clone(),
                    &timesteps,
                    prediction,
                )? * mask.clone();
                val_iou.update(mean_iou(
                    &noisy_geometry,
                    &renoised,
                    &mask,
                    config.scaling_size,
                    config.mean_0,
                ) as f64);
            }
        }
    }

    Ok((val_loss.value(), val_iou.value()))
}

/// Mean IoU of layouts generated by running the full reverse chain.
fn chain_iou<B: Backend>(
    config: &TrainingConfig,
    model: &CondLayoutTransformer<B>,
    batch: &LayoutBatch<B>,
    scheduler: &GeometryDiffusionScheduler,
    scale: &GeometryScale,
) -> Result<f32> {
    let generated = sample_from_model(batch, model, scheduler, scale, config.diffusion_mode)?
        * batch.padding_mask.clone();
    Ok(mean_iou(
        &batch.geometry,
        &generated,
        &batch.padding_mask,
        config.scaling_size,
        config.mean_0,
    ))
}

/// Detach a batch onto the inner (inference) backend.
fn valid_batch<B: AutodiffBackend>(batch: &LayoutBatch<B>) -> LayoutBatch<B::InnerBackend> {
    LayoutBatch {
        geometry: batch.geometry.clone().inner(),
        padding_mask: batch.padding_mask.clone().inner(),
        image_features: batch.image_features.clone().inner(),
        cat: batch.cat.clone().inner(),
    }
}
