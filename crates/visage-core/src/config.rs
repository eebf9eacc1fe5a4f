//! Restorer configuration shared by the backend loaders and the CLI.

use std::path::PathBuf;

use crate::types::ChannelOrder;

/// Configuration for loading a compiled plan and wiring the restorer.
#[derive(Clone, Debug)]
pub struct RestorerConfig {
    /// Path to the serialized engine file.  Its binary layout is owned by
    /// the inference runtime and is read once at load.
    pub model_path: PathBuf,
    /// Device ordinal the plan executes on.
    pub device_id: u32,
    /// Interleaved channel order of the caller's image batches.  The order
    /// is preserved end-to-end; internally the tensor is always RGB.
    pub channel_order: ChannelOrder,
}

impl RestorerConfig {
    /// Configuration with the source's defaults: device 0, BGR batches.
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            device_id: 0,
            channel_order: ChannelOrder::Bgr,
        }
    }
}
