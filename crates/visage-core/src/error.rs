//! Typed error hierarchy for the restoration engine.
//!
//! Uses `thiserror` for library-grade errors.  Application code should wrap
//! these in `anyhow::Result` at call sites.
//!
//! # Error codes
//!
//! Each variant maps to a stable integer code via [`EngineError::error_code`]
//! for structured telemetry without string parsing.

use std::path::PathBuf;

use crate::bindings::DType;

/// All errors originating from the restoration engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ── Engine load ───────────────────────────────────────────────────
    #[error("engine file {path}: {source}")]
    EngineFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engine blob rejected by inference runtime: {0}")]
    Deserialize(String),

    #[error("expected exactly {expected} tensor bindings, engine exposes {got}")]
    BindingCount { expected: usize, got: usize },

    #[error("binding `{name}`: expected {expected:?} tensor, got {got:?}")]
    BindingType {
        name: String,
        expected: DType,
        got: DType,
    },

    #[error("binding `{name}`: {reason}")]
    BindingShape { name: String, reason: String },

    // ── Batch validation ──────────────────────────────────────────────
    #[error("batch size mismatch: engine is compiled for {expected}, batch has {got}")]
    BatchSizeMismatch { expected: usize, got: usize },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("invalid image batch: {0}")]
    InvalidBatch(String),

    // ── Device / runtime (fatal) ──────────────────────────────────────
    #[error("{call} failed with CUDA error code {code}")]
    Device { call: &'static str, code: i32 },

    #[error("inference runtime error: {0}")]
    Inference(String),

    // ── Availability ──────────────────────────────────────────────────
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl EngineError {
    /// Stable integer error code for structured telemetry.
    ///
    /// Codes are grouped by category:
    /// - 1xx: engine load
    /// - 2xx: batch validation
    /// - 3xx: device/runtime
    /// - 4xx: availability
    pub fn error_code(&self) -> u32 {
        match self {
            Self::EngineFile { .. } => 100,
            Self::Deserialize(_) => 101,
            Self::BindingCount { .. } => 102,
            Self::BindingType { .. } => 103,
            Self::BindingShape { .. } => 104,
            Self::BatchSizeMismatch { .. } => 200,
            Self::ShapeMismatch(_) => 201,
            Self::InvalidBatch(_) => 202,
            Self::Device { .. } => 300,
            Self::Inference(_) => 301,
            Self::BackendUnavailable(_) => 400,
        }
    }

    /// Whether this error is a fatal device/runtime condition.
    ///
    /// Fatal errors mean the device or runtime is in an unknown state: no
    /// partial output exists and the call must not be retried.  Everything
    /// else (load and validation errors) is recoverable: the caller keeps a
    /// usable process and can correct its input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Device { .. } | Self::Inference(_))
    }
}

/// Convenience alias used throughout the engine crates.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_errors_are_fatal() {
        let err = EngineError::Device {
            call: "cudaMemcpyAsync",
            code: 700,
        };
        assert!(err.is_fatal());
        assert_eq!(err.error_code(), 300);
    }

    #[test]
    fn validation_errors_are_recoverable() {
        let err = EngineError::BatchSizeMismatch {
            expected: 4,
            got: 1,
        };
        assert!(!err.is_fatal());
        assert_eq!(err.error_code(), 200);
    }
}
