//! Masked squared-error losses over padded layout batches.
//!
//! All losses restrict value and gradient to valid (non-padding) components.
//! Component losses share one denominator (6 channels times the per-sample
//! valid count) so that the `[1, 1, 1]`-weighted sum of `masked_l2_rz` equals
//! `masked_l2` on the full tensor.

use burn::prelude::*;

use crate::error::{LayoutDiffusionError, Result};
use crate::GEOMETRY_CHANNELS;

/// Per-sample valid-position counts, shared by both losses.
///
/// Fails when any sample in the batch has an all-zero mask; the mean would be
/// undefined there and the run must abort.
fn valid_denominator<B: Backend>(mask: &Tensor<B, 3>) -> Result<Tensor<B, 1>> {
    let [batch, _, _] = mask.dims();
    let valid = mask.clone().sum_dim(1).reshape([batch]);

    let counts: Vec<f32> = valid.to_data().iter::<f32>().collect();
    for (sample_index, count) in counts.iter().enumerate() {
        if *count <= 0.0 {
            return Err(LayoutDiffusionError::EmptyMask { sample_index });
        }
    }

    Ok(valid * GEOMETRY_CHANNELS as f32)
}

/// Masked squared error and reduce to one loss per sample.
fn reduce_masked<B: Backend>(
    target: &Tensor<B, 3>,
    prediction: &Tensor<B, 3>,
    mask: &Tensor<B, 3>,
    denominator: &Tensor<B, 1>,
) -> Tensor<B, 1> {
    let [batch, _, _] = target.dims();
    let diff = target.clone() - prediction.clone();
    let masked = diff.clone() * diff * mask.clone();
    let total = masked.sum_dim(2).sum_dim(1).reshape([batch]);
    total / denominator.clone()
}

/// Per-sample masked L2 loss over all 6 geometry channels.
///
/// Elementwise squared error multiplied by the mask and averaged over valid
/// positions only; padded positions contribute neither value nor gradient.
pub fn masked_l2<B: Backend>(
    target: &Tensor<B, 3>,
    prediction: &Tensor<B, 3>,
    mask: &Tensor<B, 3>,
) -> Result<Tensor<B, 1>> {
    let denominator = valid_denominator(mask)?;
    Ok(reduce_masked(target, prediction, mask, &denominator))
}

/// Per-sample masked L2 split into bbox (4 channels), rotation, and depth.
///
/// Returns `(bbox_loss, rotation_loss, depth_loss)` for independently
/// weighted combination.
pub fn masked_l2_rz<B: Backend>(
    target: &Tensor<B, 3>,
    prediction: &Tensor<B, 3>,
    mask: &Tensor<B, 3>,
) -> Result<(Tensor<B, 1>, Tensor<B, 1>, Tensor<B, 1>)> {
    let [batch, comp, _] = target.dims();
    let denominator = valid_denominator(mask)?;

    let slice_loss = |from: usize, to: usize| {
        let t = target.clone().slice([0..batch, 0..comp, from..to]);
        let p = prediction.clone().slice([0..batch, 0..comp, from..to]);
        reduce_masked(&t, &p, mask, &denominator)
    };

    let bbox = slice_loss(0, 4);
    let rotation = slice_loss(4, 5);
    let depth = slice_loss(5, 6);
    Ok((bbox, rotation, depth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray;

    fn scalar(t: Tensor<TestBackend, 1>) -> f32 {
        t.mean().into_scalar()
    }

    #[test]
    fn test_masked_l2_zero_for_equal_tensors() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::random(
            [3, 5, GEOMETRY_CHANNELS],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let mask = Tensor::<TestBackend, 3>::ones([3, 5, 1], &device);

        let loss = masked_l2(&x, &x.clone(), &mask).unwrap();
        assert!(scalar(loss).abs() < 1e-7);
    }

    #[test]
    fn test_masked_l2_ignores_padded_positions() {
        let device = Default::default();
        let target = Tensor::<TestBackend, 3>::zeros([1, 4, GEOMETRY_CHANNELS], &device);

        // Valid rows match the target; padded rows are garbage.
        let mut data = vec![0.0f32; 4 * GEOMETRY_CHANNELS];
        for v in data.iter_mut().skip(2 * GEOMETRY_CHANNELS) {
            *v = 1000.0;
        }
        let prediction = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(data, [1, 4, GEOMETRY_CHANNELS]),
            &device,
        );
        let mask = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(vec![1.0f32, 1.0, 0.0, 0.0], [1, 4, 1]),
            &device,
        );

        let loss = masked_l2(&target, &prediction, &mask).unwrap();
        assert!(scalar(loss).abs() < 1e-7);
    }

    #[test]
    fn test_component_losses_sum_to_full_loss() {
        let device = Default::default();
        let target = Tensor::<TestBackend, 3>::random(
            [4, 9, GEOMETRY_CHANNELS],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let prediction = Tensor::<TestBackend, 3>::random(
            [4, 9, GEOMETRY_CHANNELS],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let mask = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(
                (0..4 * 9).map(|i| if i % 3 == 0 { 0.0 } else { 1.0 }).collect::<Vec<f32>>(),
                [4, 9, 1],
            ),
            &device,
        );

        let full = scalar(masked_l2(&target, &prediction, &mask).unwrap());
        let (bbox, r, z) = masked_l2_rz(&target, &prediction, &mask).unwrap();
        let combined = scalar(bbox) + scalar(r) + scalar(z);

        assert!((full - combined).abs() < 1e-5, "{full} vs {combined}");
    }

    #[test]
    fn test_empty_mask_is_fatal() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::zeros([2, 3, GEOMETRY_CHANNELS], &device);
        let mask = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(vec![1.0f32, 1.0, 1.0, 0.0, 0.0, 0.0], [2, 3, 1]),
            &device,
        );

        let err = masked_l2(&x, &x.clone(), &mask).unwrap_err();
        match err {
            LayoutDiffusionError::EmptyMask { sample_index } => assert_eq!(sample_index, 1),
            other => panic!("unexpected error: {other}"),
        }
    }
}
