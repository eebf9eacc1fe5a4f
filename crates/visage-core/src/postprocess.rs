//! Post-processor: flat planar f32 output tensor → interleaved 8-bit batch.
//!
//! Inverse of the pre-processor, minus the resize: output resolution is
//! whatever the plan produces, never the caller's original resolution.

use ndarray::Array4;

use crate::bindings::BindingTable;
use crate::error::{EngineError, Result};
use crate::types::{ChannelOrder, ImageBatch};

/// Map a model output value back to an 8-bit pixel.
///
/// `clamp(v*0.5 + 0.5, 0, 1) * 255`, rounded to nearest so that
/// `denormalize(normalize(v)) == v` for every 8-bit value.
#[inline]
pub fn denormalize(v: f32) -> u8 {
    ((v * 0.5 + 0.5).clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Reconstruct one image per batch slot from the plan's output tensor.
pub fn batch_from_blob(
    src: &[f32],
    order: ChannelOrder,
    bindings: &BindingTable,
) -> Result<ImageBatch> {
    if src.len() != bindings.output().len() {
        return Err(EngineError::ShapeMismatch(format!(
            "output tensor has {} elements, binding expects {}",
            src.len(),
            bindings.output().len()
        )));
    }

    let n = bindings.batch_size();
    let (h, w) = bindings.output_hw();
    let plane = h * w;

    let mut pixels = Array4::<u8>::zeros((n, h, w, 3));
    for index in 0..n {
        let base = index * 3 * plane;
        for y in 0..h {
            for x in 0..w {
                for c in 0..3 {
                    let p = order.tensor_plane(c);
                    pixels[[index, y, x, c]] = denormalize(src[base + p * plane + y * w + x]);
                }
            }
        }
    }

    ImageBatch::new(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::{BindingTable, DType, TensorBinding};
    use crate::preprocess::normalize;

    fn table(batch: usize, h: usize, w: usize) -> BindingTable {
        let dims = [batch as i64, 3, h as i64, w as i64];
        BindingTable::validate(
            vec![TensorBinding::from_dims("input", DType::F32, &dims).unwrap()],
            vec![TensorBinding::from_dims("output", DType::F32, &dims).unwrap()],
        )
        .unwrap()
    }

    #[test]
    fn denormalize_clamps_out_of_range_values() {
        assert_eq!(denormalize(-3.0), 0);
        assert_eq!(denormalize(3.0), 255);
        assert_eq!(denormalize(-1.0), 0);
        assert_eq!(denormalize(1.0), 255);
    }

    #[test]
    fn normalization_round_trips_every_pixel_value() {
        for v in 0..=255u8 {
            let back = denormalize(normalize(v));
            assert!(
                (back as i16 - v as i16).abs() <= 1,
                "value {v} round-tripped to {back}"
            );
        }
    }

    #[test]
    fn rejects_wrong_tensor_length() {
        let bindings = table(1, 2, 2);
        let err = batch_from_blob(&[0.0; 11], ChannelOrder::Bgr, &bindings)
            .expect_err("11 elements against a 12-element binding");
        assert!(matches!(err, EngineError::ShapeMismatch(_)));
    }

    #[test]
    fn output_shape_matches_plan_resolution() {
        let bindings = table(2, 3, 5);
        let src = vec![0.0f32; bindings.output().len()];
        let batch = batch_from_blob(&src, ChannelOrder::Bgr, &bindings).expect("postprocess");
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.height(), 3);
        assert_eq!(batch.width(), 5);
    }

    #[test]
    fn reverses_channel_reorder() {
        let bindings = table(1, 1, 1);
        // R plane saturated, G and B at -1.
        let src = [1.0f32, -1.0, -1.0];
        let bgr = batch_from_blob(&src, ChannelOrder::Bgr, &bindings).expect("postprocess");
        assert_eq!(bgr.pixels()[[0, 0, 0, 0]], 0); // B
        assert_eq!(bgr.pixels()[[0, 0, 0, 2]], 255); // R

        let rgb = batch_from_blob(&src, ChannelOrder::Rgb, &bindings).expect("postprocess");
        assert_eq!(rgb.pixels()[[0, 0, 0, 0]], 255); // R
        assert_eq!(rgb.pixels()[[0, 0, 0, 2]], 0); // B
    }
}
