//! Named tensor bindings — the engine's two-slot I/O contract.
//!
//! The serialized engine exposes its tensors as named binding slots.  This
//! module validates them once at load time into a [`BindingTable`] so the
//! marshalling and invocation code can rely on shapes without re-checking.

use crate::error::{EngineError, Result};

/// Element type of a tensor binding slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DType {
    F32,
    F16,
    I64,
    I32,
    U8,
}

/// One named binding slot: name, element type, and `(batch, channel,
/// height, width)` dimensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorBinding {
    pub name: String,
    pub dtype: DType,
    dims: [usize; 4],
}

impl TensorBinding {
    /// Build a binding from runtime-reported dimensions.
    ///
    /// Rejects anything that is not a fully-specified rank-4 tensor;
    /// dynamic axes (reported as non-positive) are not supported because
    /// every shape is baked into the compiled plan.
    pub fn from_dims(name: impl Into<String>, dtype: DType, dims: &[i64]) -> Result<Self> {
        let name = name.into();
        if dims.len() != 4 {
            return Err(EngineError::BindingShape {
                name,
                reason: format!("expected rank-4 NCHW tensor, got rank {}", dims.len()),
            });
        }
        let mut fixed = [0usize; 4];
        for (slot, &d) in fixed.iter_mut().zip(dims) {
            if d <= 0 {
                return Err(EngineError::BindingShape {
                    name,
                    reason: format!("dynamic or zero axis in {dims:?}; plans must be fully shaped"),
                });
            }
            *slot = d as usize;
        }
        Ok(Self {
            name,
            dtype,
            dims: fixed,
        })
    }

    #[inline]
    pub fn dims(&self) -> [usize; 4] {
        self.dims
    }

    /// Total element count of the tensor.
    #[inline]
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the tensor in bytes (f32 elements).
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.len() * std::mem::size_of::<f32>()
    }
}

/// The validated pair of binding slots the compiled plan exposes.
///
/// Invariants established at construction: exactly one input and one output
/// slot, both f32, both rank-4 with 3 channels, identical batch size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingTable {
    input: TensorBinding,
    output: TensorBinding,
}

impl BindingTable {
    /// Validate the binding slots reported by the runtime.
    ///
    /// `inputs` and `outputs` are everything the engine exposes; any count
    /// other than one of each is a configuration error, as is a non-f32 or
    /// non-3-channel tensor.
    pub fn validate(inputs: Vec<TensorBinding>, outputs: Vec<TensorBinding>) -> Result<Self> {
        if inputs.len() != 1 || outputs.len() != 1 {
            return Err(EngineError::BindingCount {
                expected: 2,
                got: inputs.len() + outputs.len(),
            });
        }
        let input = inputs.into_iter().next().unwrap();
        let output = outputs.into_iter().next().unwrap();

        for binding in [&input, &output] {
            if binding.dtype != DType::F32 {
                return Err(EngineError::BindingType {
                    name: binding.name.clone(),
                    expected: DType::F32,
                    got: binding.dtype,
                });
            }
            if binding.dims[1] != 3 {
                return Err(EngineError::BindingShape {
                    name: binding.name.clone(),
                    reason: format!("expected 3 channel planes, got {}", binding.dims[1]),
                });
            }
        }

        if input.dims[0] != output.dims[0] {
            return Err(EngineError::BindingShape {
                name: output.name.clone(),
                reason: format!(
                    "output batch {} differs from input batch {}",
                    output.dims[0], input.dims[0]
                ),
            });
        }

        Ok(Self { input, output })
    }

    #[inline]
    pub fn input(&self) -> &TensorBinding {
        &self.input
    }

    #[inline]
    pub fn output(&self) -> &TensorBinding {
        &self.output
    }

    /// Batch size the plan was compiled for.
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.input.dims[0]
    }

    /// Model input resolution as `(height, width)`.
    #[inline]
    pub fn input_hw(&self) -> (usize, usize) {
        (self.input.dims[2], self.input.dims[3])
    }

    /// Model output resolution as `(height, width)`.
    #[inline]
    pub fn output_hw(&self) -> (usize, usize) {
        (self.output.dims[2], self.output.dims[3])
    }
}
