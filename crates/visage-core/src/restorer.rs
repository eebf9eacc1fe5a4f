//! `FaceRestorer` — the long-lived execution context.
//!
//! Bundles a loaded backend, its validated binding table, and the two host
//! scratch tensors.  `restore` takes `&mut self`, so the scratch buffers can
//! never be shared by overlapping calls; the borrow checker enforces the
//! "not designed for concurrent reentrant use" caveat of the host buffers.

use std::time::Instant;

use tracing::{debug, info};

use crate::backend::RestoreBackend;
use crate::bindings::BindingTable;
use crate::error::Result;
use crate::postprocess::batch_from_blob;
use crate::preprocess::blob_from_batch;
use crate::types::{ChannelOrder, ImageBatch};

/// Batch-in / batch-out face restoration over a compiled plan.
pub struct FaceRestorer {
    backend: Box<dyn RestoreBackend>,
    bindings: BindingTable,
    caller_order: ChannelOrder,
    input_scratch: Vec<f32>,
    output_scratch: Vec<f32>,
}

impl FaceRestorer {
    /// Wrap a loaded backend.  Scratch tensors are sized once from the
    /// binding table and reused for every call.
    pub fn new(backend: Box<dyn RestoreBackend>, caller_order: ChannelOrder) -> Self {
        let bindings = backend.bindings().clone();
        let input_scratch = vec![0.0f32; bindings.input().len()];
        let output_scratch = vec![0.0f32; bindings.output().len()];
        info!(
            batch = bindings.batch_size(),
            input_hw = ?bindings.input_hw(),
            output_hw = ?bindings.output_hw(),
            order = caller_order.as_str(),
            "face restorer ready"
        );
        Self {
            backend,
            bindings,
            caller_order,
            input_scratch,
            output_scratch,
        }
    }

    /// The binding table of the loaded plan.
    #[inline]
    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    /// Restore one batch of faces.
    ///
    /// The batch size must equal the compiled batch size; images of any
    /// resolution are accepted and resized on the way in.  Output images are
    /// always at the plan's output resolution, in the caller's channel
    /// order.  A fatal device error leaves the restorer unusable; callers
    /// must not retry it.
    pub fn restore(&mut self, batch: &ImageBatch) -> Result<ImageBatch> {
        let started = Instant::now();

        blob_from_batch(
            batch,
            self.caller_order,
            &self.bindings,
            &mut self.input_scratch,
        )?;
        self.backend
            .execute(&self.input_scratch, &mut self.output_scratch)?;
        let restored = batch_from_blob(&self.output_scratch, self.caller_order, &self.bindings)?;

        debug!(
            batch = batch.batch_size(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "batch restored"
        );
        Ok(restored)
    }
}
