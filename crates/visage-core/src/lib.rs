#![doc = include_str!("../README.md")]

pub mod backend;
pub mod bindings;
pub mod config;
pub mod error;
pub mod postprocess;
pub mod preprocess;
pub mod restorer;
pub mod types;

pub use backend::{IdentityBackend, RestoreBackend};
pub use bindings::{BindingTable, DType, TensorBinding};
pub use config::RestorerConfig;
pub use error::{EngineError, Result};
pub use restorer::FaceRestorer;
pub use types::{ChannelOrder, ImageBatch};
