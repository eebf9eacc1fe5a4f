//! Restore backend trait — the inference execution contract.

use crate::bindings::{BindingTable, DType, TensorBinding};
use crate::error::{EngineError, Result};

/// Executes one compiled plan over flat planar f32 tensors.
///
/// `execute` is synchronous and blocking: it returns only after the output
/// slice holds the complete result.  Implementations are not required to be
/// reentrant; [`FaceRestorer`](crate::restorer::FaceRestorer) serializes
/// calls through `&mut self`.
pub trait RestoreBackend: Send {
    /// The validated binding table extracted at load time.
    fn bindings(&self) -> &BindingTable;

    /// Run one inference pass.  `input` and `output` must match the binding
    /// table's element counts exactly.
    fn execute(&mut self, input: &[f32], output: &mut [f32]) -> Result<()>;
}

/// Pass-through backend: copies the input tensor to the output unchanged.
///
/// Stands in for the compiled plan when exercising the marshalling pipeline
/// without a device: the output resolution equals the input resolution, so
/// input and output bindings share one shape.
pub struct IdentityBackend {
    bindings: BindingTable,
}

impl IdentityBackend {
    /// Build an identity plan for `batch` images at `height`×`width`.
    pub fn new(batch: usize, height: usize, width: usize) -> Result<Self> {
        let dims = [batch as i64, 3, height as i64, width as i64];
        let input = TensorBinding::from_dims("input", DType::F32, &dims)?;
        let output = TensorBinding::from_dims("output", DType::F32, &dims)?;
        let bindings = BindingTable::validate(vec![input], vec![output])?;
        Ok(Self { bindings })
    }
}

impl RestoreBackend for IdentityBackend {
    fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    fn execute(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        if input.len() != self.bindings.input().len() {
            return Err(EngineError::ShapeMismatch(format!(
                "input tensor has {} elements, binding expects {}",
                input.len(),
                self.bindings.input().len()
            )));
        }
        if output.len() != self.bindings.output().len() {
            return Err(EngineError::ShapeMismatch(format!(
                "output tensor has {} elements, binding expects {}",
                output.len(),
                self.bindings.output().len()
            )));
        }
        output.copy_from_slice(input);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_copies_tensor_through() {
        let mut backend = IdentityBackend::new(1, 2, 2).expect("identity backend");
        let input: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let mut output = vec![0.0f32; 12];
        backend.execute(&input, &mut output).expect("execute");
        assert_eq!(input, output);
    }

    #[test]
    fn identity_rejects_mismatched_scratch() {
        let mut backend = IdentityBackend::new(1, 2, 2).expect("identity backend");
        let input = vec![0.0f32; 11];
        let mut output = vec![0.0f32; 12];
        let err = backend
            .execute(&input, &mut output)
            .expect_err("short input must be rejected");
        assert!(matches!(err, EngineError::ShapeMismatch(_)));
    }
}
