//! Host-side image batch types shared across crate boundaries.

use ndarray::Array4;

use crate::error::{EngineError, Result};

/// Interleaved channel order of a caller-supplied image batch.
///
/// The model tensor is always RGB planar; this type records what order the
/// caller's interleaved bytes are in so the pre/post-processors can reorder
/// at the tensor boundary.  The order is preserved end-to-end: a BGR caller
/// gets BGR pixels back.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelOrder {
    /// OpenCV-style blue/green/red interleaving (the trained model's
    /// original host convention).
    #[default]
    Bgr,
    /// Natural red/green/blue interleaving.
    Rgb,
}

impl ChannelOrder {
    /// Map an interleaved channel index to the RGB tensor plane it feeds.
    ///
    /// The mapping is its own inverse, so the post-processor uses it
    /// unchanged to go from tensor plane back to interleaved channel.
    #[inline]
    pub fn tensor_plane(self, channel: usize) -> usize {
        match self {
            Self::Rgb => channel,
            Self::Bgr => 2 - channel,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bgr => "bgr",
            Self::Rgb => "rgb",
        }
    }
}

/// An ordered batch of fixed-resolution color images.
///
/// Layout is `(batch, height, width, channel)`, 8 bits per channel,
/// interleaved, always 3 channels.  Validated once at construction so the
/// marshalling code can index without per-pixel checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageBatch {
    pixels: Array4<u8>,
}

impl ImageBatch {
    /// Wrap a `(batch, height, width, 3)` array, rejecting malformed shapes.
    pub fn new(pixels: Array4<u8>) -> Result<Self> {
        let (n, h, w, c) = pixels.dim();
        if c != 3 {
            return Err(EngineError::InvalidBatch(format!(
                "expected 3 interleaved channels, got {c}"
            )));
        }
        if n == 0 || h == 0 || w == 0 {
            return Err(EngineError::InvalidBatch(format!(
                "degenerate batch shape ({n}, {h}, {w}, {c})"
            )));
        }
        Ok(Self { pixels })
    }

    /// Build a batch from a flat interleaved pixel vector.
    pub fn from_vec(batch: usize, height: usize, width: usize, data: Vec<u8>) -> Result<Self> {
        let pixels = Array4::from_shape_vec((batch, height, width, 3), data).map_err(|e| {
            EngineError::InvalidBatch(format!(
                "flat buffer does not match ({batch}, {height}, {width}, 3): {e}"
            ))
        })?;
        Self::new(pixels)
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.pixels.dim().0
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.pixels.dim().1
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.pixels.dim().2
    }

    #[inline]
    pub fn pixels(&self) -> &Array4<u8> {
        &self.pixels
    }

    pub fn into_pixels(self) -> Array4<u8> {
        self.pixels
    }
}
