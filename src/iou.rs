//! Mean intersection-over-union between true and predicted layouts.
//!
//! Geometry tensors hold scaled, center-format boxes; this module undoes the
//! scaling, converts to corner format, and averages the per-component IoU
//! over valid (unmasked) components. Extraction runs on the CPU since the
//! tensors involved are tiny.

use burn::prelude::*;

/// IoU of two corner-format boxes `[x0, y0, x1, y1]`.
pub fn iou_xyxy(a: [f32; 4], b: [f32; 4]) -> f32 {
    let ix0 = a[0].max(b[0]);
    let iy0 = a[1].max(b[1]);
    let ix1 = a[2].min(b[2]);
    let iy1 = a[3].min(b[3]);

    let iw = (ix1 - ix0).max(0.0);
    let ih = (iy1 - iy0).max(0.0);
    let inter = iw * ih;

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;

    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Undo geometry scaling and convert a center-format box to corner format.
///
/// Only the first four channels (center x, center y, width, height) matter
/// for IoU; rotation and depth are ignored. With `mean_0` the coordinates are
/// mapped from `[-1, 1]` back to `[0, 1]` after unscaling.
fn to_corner(component: &[f32], scaling_size: f32, mean_0: bool) -> [f32; 4] {
    let unscale = |v: f32| {
        let v = v / scaling_size;
        if mean_0 {
            (v + 1.0) / 2.0
        } else {
            v
        }
    };
    let cx = unscale(component[0]);
    let cy = unscale(component[1]);
    let w = unscale(component[2]);
    let h = unscale(component[3]);
    [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
}

/// Mean IoU between corresponding valid components of two geometry tensors.
///
/// Both tensors are `[batch, components, 6]`; `mask` is `[batch, components, 1]`
/// with ones at valid components. Returns 0 when no component is valid.
pub fn mean_iou<B: Backend>(
    true_geometry: &Tensor<B, 3>,
    pred_geometry: &Tensor<B, 3>,
    mask: &Tensor<B, 3>,
    scaling_size: f32,
    mean_0: bool,
) -> f32 {
    let [batch, num_comp, channels] = true_geometry.dims();

    // iter() converts from the backend's float element width.
    let truth: Vec<f32> = true_geometry.to_data().iter::<f32>().collect();
    let pred: Vec<f32> = pred_geometry.to_data().iter::<f32>().collect();
    let mask: Vec<f32> = mask.to_data().iter::<f32>().collect();

    let mut total = 0.0f32;
    let mut count = 0usize;
    for b in 0..batch {
        for c in 0..num_comp {
            if mask[b * num_comp + c] <= 0.5 {
                continue;
            }
            let offset = (b * num_comp + c) * channels;
            let t = to_corner(&truth[offset..offset + 4], scaling_size, mean_0);
            let p = to_corner(&pred[offset..offset + 4], scaling_size, mean_0);
            total += iou_xyxy(t, p);
            count += 1;
        }
    }

    if count == 0 {
        0.0
    } else {
        total / count as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GEOMETRY_CHANNELS;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn geometry_tensor(
        values: Vec<f32>,
        batch: usize,
        num_comp: usize,
    ) -> Tensor<TestBackend, 3> {
        let device = Default::default();
        Tensor::from_data(
            TensorData::new(values, [batch, num_comp, GEOMETRY_CHANNELS]),
            &device,
        )
    }

    fn mask_tensor(values: Vec<f32>, batch: usize, num_comp: usize) -> Tensor<TestBackend, 3> {
        let device = Default::default();
        Tensor::from_data(TensorData::new(values, [batch, num_comp, 1]), &device)
    }

    #[test]
    fn test_identical_boxes_have_iou_one() {
        assert_eq!(iou_xyxy([0.0, 0.0, 1.0, 1.0], [0.0, 0.0, 1.0, 1.0]), 1.0);
    }

    #[test]
    fn test_disjoint_boxes_have_iou_zero() {
        assert_eq!(iou_xyxy([0.0, 0.0, 0.4, 0.4], [0.6, 0.6, 1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_half_overlap() {
        let iou = iou_xyxy([0.0, 0.0, 1.0, 1.0], [0.5, 0.0, 1.5, 1.0]);
        assert!((iou - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean_iou_perfect_prediction() {
        // One valid component, one padded one whose garbage must be ignored.
        let truth = geometry_tensor(
            vec![
                1.0, 1.0, 2.0, 2.0, 0.0, 0.0, //
                9.0, 9.0, 9.0, 9.0, 0.0, 0.0,
            ],
            1,
            2,
        );
        let pred = geometry_tensor(
            vec![
                1.0, 1.0, 2.0, 2.0, 0.3, 0.1, //
                0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            ],
            1,
            2,
        );
        let mask = mask_tensor(vec![1.0, 0.0], 1, 2);

        let iou = mean_iou(&truth, &pred, &mask, 5.0, true);
        assert!((iou - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean_iou_averages_over_batches() {
        // Batch 0 predicts perfectly, batch 1 predicts a disjoint box; the
        // mean over the two valid components is 0.5.
        let truth = geometry_tensor(
            vec![
                -2.5, -2.5, 1.0, 1.0, 0.0, 0.0, //
                -2.5, -2.5, 1.0, 1.0, 0.0, 0.0,
            ],
            2,
            1,
        );
        let pred = geometry_tensor(
            vec![
                -2.5, -2.5, 1.0, 1.0, 0.0, 0.0, //
                2.5, 2.5, 1.0, 1.0, 0.0, 0.0,
            ],
            2,
            1,
        );
        let mask = mask_tensor(vec![1.0, 1.0], 2, 1);

        let iou = mean_iou(&truth, &pred, &mask, 5.0, true);
        assert!((iou - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mean_iou_empty_mask_is_zero() {
        let truth = geometry_tensor(vec![0.0; GEOMETRY_CHANNELS], 1, 1);
        let pred = geometry_tensor(vec![0.0; GEOMETRY_CHANNELS], 1, 1);
        let mask = mask_tensor(vec![0.0], 1, 1);
        assert_eq!(mean_iou(&truth, &pred, &mask, 5.0, true), 0.0);
    }
}
