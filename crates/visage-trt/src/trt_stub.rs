//! Stub engine compiled when the `trt-runtime` feature is off.
//!
//! Keeps the workspace building and testing on hosts with no NVIDIA runtime.
//! `load` always fails with a recoverable availability error, so the struct
//! is unconstructible and the trait impl below can never actually run.

use visage_core::backend::RestoreBackend;
use visage_core::bindings::BindingTable;
use visage_core::config::RestorerConfig;
use visage_core::error::{EngineError, Result};

/// Placeholder for the GPU engine on builds without the runtime feature.
pub struct TrtEngine {
    bindings: BindingTable,
}

impl TrtEngine {
    /// Always fails: this build carries no TensorRT execution path.
    pub fn load(_config: &RestorerConfig) -> Result<Self> {
        Err(EngineError::BackendUnavailable(
            "visage-trt was built without the `trt-runtime` feature; \
rebuild with `--features trt-runtime` on a host with the NVIDIA runtime installed"
                .into(),
        ))
    }
}

impl RestoreBackend for TrtEngine {
    fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    fn execute(&mut self, _input: &[f32], _output: &mut [f32]) -> Result<()> {
        Err(EngineError::BackendUnavailable(
            "no TensorRT execution path in this build".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_reports_backend_unavailable() {
        let config = RestorerConfig::new("model.engine");
        // The success value has no Debug impl, so unwrap the error by hand.
        let err = match TrtEngine::load(&config) {
            Ok(_) => panic!("stub must refuse to load"),
            Err(err) => err,
        };
        assert!(matches!(err, EngineError::BackendUnavailable(_)));
        assert_eq!(err.error_code(), 400);
        assert!(!err.is_fatal());
    }
}
