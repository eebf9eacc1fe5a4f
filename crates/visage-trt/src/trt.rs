//! TensorRT execution backend — ORT + TensorRTExecutionProvider + IO binding.
//!
//! # Device choreography
//!
//! `execute` reproduces the per-call sequence of the serialized-plan runner:
//! create a stream, allocate one device buffer per binding slot, copy the
//! input tensor host-to-device asynchronously, run the plan with both slots
//! bound to raw device pointers, copy the output device-to-host
//! asynchronously, then synchronize the stream once.  Buffers and the stream
//! are RAII guards, so a failure at any step releases everything already
//! acquired.
//!
//! # CUDA stream ordering
//!
//! ORT executes the plan on its own internal stream, which is unordered
//! with the invoker's copy stream.  Two fences keep the call correct: a
//! stream synchronize after the host-to-device copy (the input must be
//! resident before any plan kernel can read it), and one after the
//! device-to-host copy before the host reads the output slice.
//! `session.run_binding()` itself is synchronous and does not return until
//! every kernel it enqueued has completed.

use std::ffi::{c_void, CString};
use std::path::Path;

use tracing::{debug, info, warn};

use ort::execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider};
use ort::session::Session;
use ort::sys as ort_sys;
use ort::value::Value as OrtValue;

use visage_core::backend::RestoreBackend;
use visage_core::bindings::{BindingTable, DType, TensorBinding};
use visage_core::config::RestorerConfig;
use visage_core::error::{EngineError, Result};

use crate::sys;

// ─── RAII device resources ──────────────────────────────────────────────────

/// Owned CUDA stream, destroyed on drop.
struct CudaStream {
    raw: sys::CudaStreamT,
}

impl CudaStream {
    fn create() -> Result<Self> {
        let mut raw: sys::CudaStreamT = std::ptr::null_mut();
        // SAFETY: `raw` is valid storage for one stream handle.
        let rc = unsafe { sys::cuda_stream_create(&mut raw)? };
        sys::check_cuda(rc, "cudaStreamCreate")?;
        Ok(Self { raw })
    }

    #[inline]
    fn raw(&self) -> sys::CudaStreamT {
        self.raw
    }

    fn synchronize(&self) -> Result<()> {
        // SAFETY: `self.raw` is a live stream created by this guard.
        let rc = unsafe { sys::cuda_stream_synchronize(self.raw)? };
        sys::check_cuda(rc, "cudaStreamSynchronize")
    }
}

impl Drop for CudaStream {
    fn drop(&mut self) {
        // SAFETY: `self.raw` is a live stream; destroying it invalidates the
        // handle, which is exactly what drop means here.  Nothing useful can
        // be done with a failure during teardown.
        let _ = unsafe { sys::cuda_stream_destroy(self.raw) };
    }
}

/// Owned device allocation, freed on drop.
struct DeviceBuffer {
    ptr: *mut c_void,
    bytes: usize,
}

impl DeviceBuffer {
    fn alloc(bytes: usize) -> Result<Self> {
        let mut ptr: *mut c_void = std::ptr::null_mut();
        // SAFETY: `ptr` is valid storage for one device pointer.
        let rc = unsafe { sys::cuda_malloc(&mut ptr, bytes)? };
        sys::check_cuda(rc, "cudaMalloc")?;
        Ok(Self { ptr, bytes })
    }

    #[inline]
    fn ptr(&self) -> *mut c_void {
        self.ptr
    }

    /// Asynchronous host-to-device copy of `src` into this buffer.
    fn upload(&self, src: &[f32], stream: &CudaStream) -> Result<()> {
        let count = std::mem::size_of_val(src);
        debug_assert_eq!(count, self.bytes);
        // SAFETY: `src` is valid host memory for `count` bytes, `self.ptr`
        // is a device allocation of at least `count` bytes, and the stream
        // outlives the synchronize that fences this copy.
        let rc = unsafe {
            sys::cuda_memcpy_async(
                self.ptr,
                src.as_ptr().cast(),
                count,
                sys::MEMCPY_HOST_TO_DEVICE,
                stream.raw(),
            )?
        };
        sys::check_cuda(rc, "cudaMemcpyAsync")
    }

    /// Asynchronous device-to-host copy of this buffer into `dst`.
    fn download(&self, dst: &mut [f32], stream: &CudaStream) -> Result<()> {
        let count = std::mem::size_of_val(dst);
        debug_assert_eq!(count, self.bytes);
        // SAFETY: symmetric to `upload`; `dst` is writable host memory for
        // `count` bytes and must not be read before the stream synchronize.
        let rc = unsafe {
            sys::cuda_memcpy_async(
                dst.as_mut_ptr().cast(),
                self.ptr,
                count,
                sys::MEMCPY_DEVICE_TO_HOST,
                stream.raw(),
            )?
        };
        sys::check_cuda(rc, "cudaMemcpyAsync")
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        // SAFETY: `self.ptr` came from cudaMalloc and is freed exactly once.
        let _ = unsafe { sys::cuda_free(self.ptr) };
    }
}

// ─── ORT glue ───────────────────────────────────────────────────────────────

/// Wrap a raw device pointer in an ORT tensor value without copying.
unsafe fn tensor_from_device_memory(
    ptr: *mut c_void,
    bytes: usize,
    shape: &[i64],
    device_id: i32,
) -> Result<OrtValue> {
    let api = ort::api();

    let mut mem_info_ptr: *mut ort_sys::OrtMemoryInfo = std::ptr::null_mut();
    let name = CString::new("Cuda").map_err(|_| EngineError::Inference("bad allocator name".into()))?;
    // SAFETY: all pointers are valid for the duration of the call.
    let status = unsafe {
        (api.CreateMemoryInfo)(
            name.as_ptr(),
            ort_sys::OrtAllocatorType::OrtArenaAllocator,
            device_id,
            ort_sys::OrtMemType::OrtMemTypeDefault,
            &mut mem_info_ptr,
        )
    };
    if !status.0.is_null() {
        // SAFETY: non-null status came from the same API table.
        unsafe { (api.ReleaseStatus)(status.0) };
        return Err(EngineError::Inference("CreateMemoryInfo failed".into()));
    }

    let mut ort_value_ptr: *mut ort_sys::OrtValue = std::ptr::null_mut();
    // SAFETY: `ptr` is a live device allocation of `bytes` bytes and `shape`
    // describes exactly that many f32 elements.
    let status = unsafe {
        (api.CreateTensorWithDataAsOrtValue)(
            mem_info_ptr,
            ptr,
            bytes as _,
            shape.as_ptr(),
            shape.len() as _,
            ort::tensor::TensorElementType::Float32.into(),
            &mut ort_value_ptr,
        )
    };

    // The tensor does not take ownership of the memory info.
    // SAFETY: mem_info_ptr was created above and is released exactly once.
    unsafe { (api.ReleaseMemoryInfo)(mem_info_ptr) };

    if !status.0.is_null() {
        // SAFETY: non-null status came from the same API table.
        unsafe { (api.ReleaseStatus)(status.0) };
        return Err(EngineError::Inference("CreateTensorWithDataAsOrtValue failed".into()));
    }

    let raw = std::ptr::NonNull::new(ort_value_ptr)
        .ok_or_else(|| EngineError::Inference("ORT returned a null tensor value".into()))?;
    // SAFETY: `raw` is a freshly created OrtValue we own.
    Ok(unsafe { ort::value::Value::<ort::value::DynValueTypeMarker>::from_ptr(raw, None) })
}

fn dtype_of(name: &str, ty: ort::tensor::TensorElementType) -> Result<DType> {
    use ort::tensor::TensorElementType as T;
    match ty {
        T::Float32 => Ok(DType::F32),
        T::Float16 => Ok(DType::F16),
        T::Int64 => Ok(DType::I64),
        T::Int32 => Ok(DType::I32),
        T::Uint8 => Ok(DType::U8),
        other => Err(EngineError::BindingShape {
            name: name.to_string(),
            reason: format!("unsupported element type {other:?}"),
        }),
    }
}

// ─── Engine ─────────────────────────────────────────────────────────────────

/// A deserialized plan executing on the GPU through ORT's TensorRT provider.
pub struct TrtEngine {
    session: Session,
    bindings: BindingTable,
    device_id: i32,
}

impl TrtEngine {
    /// Read the serialized model, deserialize it on the selected device, and
    /// validate its binding slots.
    ///
    /// Tries the TensorRT execution provider first and falls back to the
    /// plain CUDA provider when TensorRT registration fails on this host.
    pub fn load(config: &RestorerConfig) -> Result<Self> {
        let blob = std::fs::read(&config.model_path).map_err(|source| EngineError::EngineFile {
            path: config.model_path.clone(),
            source,
        })?;
        info!(
            path = %config.model_path.display(),
            bytes = blob.len(),
            device = config.device_id,
            "deserializing engine"
        );

        let session = match Self::build_trt_session(&blob, config) {
            Ok(session) => {
                info!(provider = "TensorrtExecutionProvider", "execution provider selected");
                session
            }
            Err(err) => {
                warn!(
                    error = %err,
                    "TensorRT provider registration failed; falling back to CUDA provider"
                );
                let session = Self::build_cuda_session(&blob, config)?;
                info!(provider = "CUDAExecutionProvider", "execution provider selected");
                session
            }
        };

        let bindings = Self::extract_bindings(&session)?;
        info!(
            input = %bindings.input().name,
            output = %bindings.output().name,
            batch = bindings.batch_size(),
            input_hw = ?bindings.input_hw(),
            output_hw = ?bindings.output_hw(),
            "engine ready"
        );

        Ok(Self {
            session,
            bindings,
            device_id: config.device_id as i32,
        })
    }

    fn engine_cache_dir(model_path: &Path) -> String {
        model_path
            .parent()
            .unwrap_or(model_path)
            .join("trt_cache")
            .to_string_lossy()
            .to_string()
    }

    fn build_trt_session(blob: &[u8], config: &RestorerConfig) -> Result<Session> {
        let trt_ep = TensorRTExecutionProvider::default()
            .with_device_id(config.device_id as i32)
            .with_engine_cache(true)
            .with_engine_cache_path(Self::engine_cache_dir(&config.model_path));

        Session::builder()
            .and_then(|b| b.with_execution_providers([trt_ep.build().error_on_failure()]))
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_memory(blob))
            .map_err(|e| EngineError::Deserialize(e.to_string()))
    }

    fn build_cuda_session(blob: &[u8], config: &RestorerConfig) -> Result<Session> {
        let cuda_ep = CUDAExecutionProvider::default().with_device_id(config.device_id as i32);
        Session::builder()
            .and_then(|b| b.with_execution_providers([cuda_ep.build().error_on_failure()]))
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_memory(blob))
            .map_err(|e| EngineError::Deserialize(e.to_string()))
    }

    fn extract_bindings(session: &Session) -> Result<BindingTable> {
        let inputs = Self::collect_slots(session.inputs().iter().map(|i| (i.name(), i.dtype())))?;
        let outputs = Self::collect_slots(session.outputs().iter().map(|o| (o.name(), o.dtype())))?;
        BindingTable::validate(inputs, outputs)
    }

    fn collect_slots<'a>(
        slots: impl Iterator<Item = (&'a str, &'a ort::value::ValueType)>,
    ) -> Result<Vec<TensorBinding>> {
        slots
            .map(|(name, value_type)| match value_type {
                ort::value::ValueType::Tensor { ty, shape, .. } => {
                    let dims: Vec<i64> = shape.iter().copied().collect();
                    TensorBinding::from_dims(name, dtype_of(name, *ty)?, &dims)
                }
                other => Err(EngineError::BindingShape {
                    name: name.to_string(),
                    reason: format!("expected a tensor slot, got {other:?}"),
                }),
            })
            .collect()
    }
}

impl RestoreBackend for TrtEngine {
    fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    fn execute(&mut self, input: &[f32], output: &mut [f32]) -> Result<()> {
        let in_binding = self.bindings.input().clone();
        let out_binding = self.bindings.output().clone();
        if input.len() != in_binding.len() {
            return Err(EngineError::ShapeMismatch(format!(
                "input tensor has {} elements, binding `{}` wants {}",
                input.len(),
                in_binding.name,
                in_binding.len()
            )));
        }
        if output.len() != out_binding.len() {
            return Err(EngineError::ShapeMismatch(format!(
                "output tensor has {} elements, binding `{}` wants {}",
                output.len(),
                out_binding.name,
                out_binding.len()
            )));
        }

        let stream = CudaStream::create()?;
        let d_in = DeviceBuffer::alloc(in_binding.byte_len())?;
        let d_out = DeviceBuffer::alloc(out_binding.byte_len())?;

        d_in.upload(input, &stream)?;
        // The plan runs on ORT's internal stream; fence the upload so the
        // input bytes are resident before the first kernel reads them.
        stream.synchronize()?;

        let in_shape: Vec<i64> = in_binding.dims().iter().map(|&d| d as i64).collect();
        let out_shape: Vec<i64> = out_binding.dims().iter().map(|&d| d as i64).collect();

        let mut io_binding = self
            .session
            .create_binding()
            .map_err(|e| EngineError::Inference(e.to_string()))?;

        // SAFETY: both device buffers stay alive past run_binding, and the
        // shapes describe exactly the allocated byte counts.
        unsafe {
            let input_tensor =
                tensor_from_device_memory(d_in.ptr(), in_binding.byte_len(), &in_shape, self.device_id)?;
            io_binding
                .bind_input(&in_binding.name, &input_tensor)
                .map_err(|e| EngineError::Inference(e.to_string()))?;

            let output_tensor =
                tensor_from_device_memory(d_out.ptr(), out_binding.byte_len(), &out_shape, self.device_id)?;
            io_binding
                .bind_output(&out_binding.name, output_tensor)
                .map_err(|e| EngineError::Inference(e.to_string()))?;
        }

        // Blocks until every kernel the plan enqueued has completed.
        self.session
            .run_binding(&io_binding)
            .map_err(|e| EngineError::Inference(e.to_string()))?;

        d_out.download(output, &stream)?;
        stream.synchronize()?;

        debug!(
            input_bytes = in_binding.byte_len(),
            output_bytes = out_binding.byte_len(),
            "plan executed"
        );
        Ok(())
    }
}
