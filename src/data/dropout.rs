//! Classifier-free-guidance conditional dropout.

use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::Rng;

use super::LayoutBatch;

/// Zero the conditioning of exactly `floor(0.5 * batch_size)` layouts.
///
/// Selects that many distinct indices without replacement and returns a new
/// batch whose `image_features`, `geometry`, and `cat` rows are zeroed at the
/// selected indices, together with the indices themselves. The input batch is
/// left untouched; the unconditional view never aliases the conditional one.
/// `padding_mask` is preserved so losses still see the real component layout.
pub fn conditional_dropout<B: Backend, R: Rng>(
    batch: &LayoutBatch<B>,
    rng: &mut R,
) -> (LayoutBatch<B>, Vec<usize>) {
    let bsz = batch.batch_size();
    let mask_num = bsz / 2;
    let device = batch.device();

    let mut indices: Vec<usize> = (0..bsz).collect();
    indices.shuffle(rng);
    indices.truncate(mask_num);

    let mut keep = vec![1.0f32; bsz];
    let mut keep_int = vec![1i64; bsz];
    for &i in &indices {
        keep[i] = 0.0;
        keep_int[i] = 0;
    }

    let keep_rows =
        Tensor::<B, 1>::from_floats(keep.as_slice(), &device).reshape([bsz, 1, 1]);
    let keep_features = keep_rows.clone().reshape([bsz, 1]);
    let keep_cat =
        Tensor::<B, 1, Int>::from_data(TensorData::new(keep_int, [bsz]), &device).reshape([bsz, 1]);

    let dropped = LayoutBatch {
        geometry: batch.geometry.clone() * keep_rows,
        padding_mask: batch.padding_mask.clone(),
        image_features: batch.image_features.clone() * keep_features,
        cat: batch.cat.clone() * keep_cat,
    };

    (dropped, indices)
}
