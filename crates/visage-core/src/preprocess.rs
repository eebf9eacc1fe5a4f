//! Pre-processor: interleaved 8-bit images → normalized planar f32 tensor.
//!
//! For each image in the batch: reorder channels from the caller's order to
//! the model's RGB planes, bilinear-resize to the plan's input resolution,
//! and write `(v/255 - 0.5)/0.5` values in `(batch, channel, height, width)`
//! layout into the caller-supplied slice.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Axis;

use crate::bindings::BindingTable;
use crate::error::{EngineError, Result};
use crate::types::{ChannelOrder, ImageBatch};

/// Map an 8-bit pixel value into the model's ~[-1, 1] range.
#[inline]
pub fn normalize(v: u8) -> f32 {
    (v as f32 / 255.0 - 0.5) / 0.5
}

/// Fill `dst` with the normalized planar tensor for `batch`.
///
/// `dst` is the engine's input scratch buffer; it is overwritten in full.
/// The batch size must equal the plan's compiled batch size; anything else
/// is a typed error, never an out-of-bounds write.
pub fn blob_from_batch(
    batch: &ImageBatch,
    order: ChannelOrder,
    bindings: &BindingTable,
    dst: &mut [f32],
) -> Result<()> {
    if batch.batch_size() != bindings.batch_size() {
        return Err(EngineError::BatchSizeMismatch {
            expected: bindings.batch_size(),
            got: batch.batch_size(),
        });
    }
    if dst.len() != bindings.input().len() {
        return Err(EngineError::ShapeMismatch(format!(
            "input scratch has {} elements, binding expects {}",
            dst.len(),
            bindings.input().len()
        )));
    }

    let (th, tw) = bindings.input_hw();
    let plane = th * tw;

    for (index, image) in batch.pixels().axis_iter(Axis(0)).enumerate() {
        let (h, w, _) = image.dim();
        let raw = image
            .as_slice()
            .map(<[u8]>::to_vec)
            .unwrap_or_else(|| image.iter().copied().collect());
        // The buffer type is nominal; the bytes stay in the caller's
        // channel order until the planar write below.
        let buffer = RgbImage::from_raw(w as u32, h as u32, raw).ok_or_else(|| {
            EngineError::ShapeMismatch(format!("image {index} is not a contiguous {h}x{w}x3 view"))
        })?;
        let resized = if (h, w) == (th, tw) {
            buffer
        } else {
            imageops::resize(&buffer, tw as u32, th as u32, FilterType::Triangle)
        };

        let base = index * 3 * plane;
        for (y, row) in resized.rows().enumerate() {
            for (x, px) in row.enumerate() {
                for c in 0..3 {
                    let p = order.tensor_plane(c);
                    dst[base + p * plane + y * tw + x] = normalize(px.0[c]);
                }
            }
        }
    }

    Ok(())
}
