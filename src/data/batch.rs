//! Padded layout batches and their collation from raw samples.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{LayoutDiffusionError, Result};
use crate::GEOMETRY_CHANNELS;

/// One raw layout: a variable number of components plus one image feature
/// vector for the whole layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutSample {
    /// Per-component geometry: `[x, y, w, h, rotation, depth]`.
    pub geometry: Vec<[f32; GEOMETRY_CHANNELS]>,
    /// Per-component category id; 0 is the null category.
    pub categories: Vec<i64>,
    /// Image feature vector for the layout.
    pub image_features: Vec<f32>,
}

/// A collated, padded batch of layouts.
#[derive(Debug, Clone)]
pub struct LayoutBatch<B: Backend> {
    /// Geometry: `[batch, comp, 6]`.
    pub geometry: Tensor<B, 3>,
    /// Validity mask: `[batch, comp, 1]`, 1 for real components, 0 for padding.
    pub padding_mask: Tensor<B, 3>,
    /// Image features: `[batch, feature_dim]`.
    pub image_features: Tensor<B, 2>,
    /// Category ids: `[batch, comp]`.
    pub cat: Tensor<B, 2, Int>,
}

impl<B: Backend> LayoutBatch<B> {
    /// Number of layouts in the batch.
    pub fn batch_size(&self) -> usize {
        self.geometry.dims()[0]
    }

    /// Device the batch lives on.
    pub fn device(&self) -> B::Device {
        self.geometry.device()
    }
}

/// A batch whose geometry has been replaced by a noised version.
///
/// Ephemeral; recomputed every step.
#[derive(Debug, Clone)]
pub struct NoisyBatch<B: Backend> {
    /// Noised geometry: `[batch, comp, 6]`.
    pub geometry: Tensor<B, 3>,
    /// Image features passed through from the source batch.
    pub image_features: Tensor<B, 2>,
}

/// Collate raw samples into a padded batch.
///
/// Components beyond `max_num_comp` are truncated; shorter layouts are padded
/// with zeros and masked out.
pub fn collate<B: Backend>(
    samples: &[LayoutSample],
    max_num_comp: usize,
    feature_dim: usize,
    device: &B::Device,
) -> Result<LayoutBatch<B>> {
    if samples.is_empty() {
        return Err(LayoutDiffusionError::InvalidData(
            "cannot collate an empty sample slice".to_string(),
        ));
    }

    let batch = samples.len();
    let mut geometry = vec![0.0f32; batch * max_num_comp * GEOMETRY_CHANNELS];
    let mut mask = vec![0.0f32; batch * max_num_comp];
    let mut cat = vec![0i64; batch * max_num_comp];
    let mut features = vec![0.0f32; batch * feature_dim];

    for (i, sample) in samples.iter().enumerate() {
        if sample.geometry.len() != sample.categories.len() {
            return Err(LayoutDiffusionError::InvalidData(format!(
                "sample {i}: {} geometry rows but {} categories",
                sample.geometry.len(),
                sample.categories.len()
            )));
        }
        if sample.image_features.len() != feature_dim {
            return Err(LayoutDiffusionError::InvalidData(format!(
                "sample {i}: expected {feature_dim} image features, got {}",
                sample.image_features.len()
            )));
        }

        let n = sample.geometry.len().min(max_num_comp);
        for c in 0..n {
            let base = (i * max_num_comp + c) * GEOMETRY_CHANNELS;
            geometry[base..base + GEOMETRY_CHANNELS].copy_from_slice(&sample.geometry[c]);
            mask[i * max_num_comp + c] = 1.0;
            cat[i * max_num_comp + c] = sample.categories[c];
        }
        features[i * feature_dim..(i + 1) * feature_dim].copy_from_slice(&sample.image_features);
    }

    Ok(LayoutBatch {
        geometry: Tensor::from_data(
            TensorData::new(geometry, [batch, max_num_comp, GEOMETRY_CHANNELS]),
            device,
        ),
        padding_mask: Tensor::from_data(TensorData::new(mask, [batch, max_num_comp, 1]), device),
        image_features: Tensor::from_data(TensorData::new(features, [batch, feature_dim]), device),
        cat: Tensor::from_data(TensorData::new(cat, [batch, max_num_comp]), device),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    pub(crate) fn sample_with(n: usize, feature_dim: usize, fill: f32) -> LayoutSample {
        LayoutSample {
            geometry: vec![[fill; GEOMETRY_CHANNELS]; n],
            categories: vec![1; n],
            image_features: vec![fill; feature_dim],
        }
    }

    #[test]
    fn test_collate_pads_and_masks() {
        let device = Default::default();
        let samples = vec![sample_with(2, 4, 0.5), sample_with(3, 4, -0.5)];

        let batch = collate::<TestBackend>(&samples, 5, 4, &device).unwrap();
        assert_eq!(batch.geometry.dims(), [2, 5, GEOMETRY_CHANNELS]);
        assert_eq!(batch.padding_mask.dims(), [2, 5, 1]);
        assert_eq!(batch.image_features.dims(), [2, 4]);
        assert_eq!(batch.cat.dims(), [2, 5]);

        let mask: Vec<f32> = batch.padding_mask.to_data().to_vec().unwrap();
        assert_eq!(mask, vec![1.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_collate_truncates_overlong_layouts() {
        let device = Default::default();
        let samples = vec![sample_with(7, 2, 1.0)];

        let batch = collate::<TestBackend>(&samples, 4, 2, &device).unwrap();
        assert_eq!(batch.geometry.dims()[1], 4);
        let mask: Vec<f32> = batch.padding_mask.to_data().to_vec().unwrap();
        assert!(mask.iter().all(|&m| m == 1.0));
    }

    #[test]
    fn test_collate_rejects_bad_feature_dim() {
        let device = Default::default();
        let samples = vec![sample_with(1, 3, 0.0)];
        assert!(collate::<TestBackend>(&samples, 4, 8, &device).is_err());
    }
}
