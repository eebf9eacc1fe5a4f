//! Minimal CUDA runtime FFI used by the per-call copy/execute choreography.
//!
//! On Linux the symbols are resolved from `libcudart` at first use via
//! `dlopen`, so the crate carries no link-time dependency on the CUDA
//! toolkit.  Elsewhere the symbols are declared and resolved at link time.

use visage_core::error::{EngineError, Result};

use std::ffi::c_void;
#[cfg(target_os = "linux")]
use std::ffi::{c_char, CStr, CString};
#[cfg(target_os = "linux")]
use std::sync::OnceLock;

/// CUDA runtime status code.  Zero is success.
pub type CudaError = i32;
pub const CUDA_SUCCESS: CudaError = 0;

/// Opaque CUDA stream handle.
pub type CudaStreamT = *mut c_void;

/// `cudaMemcpyKind` values used by the invoker.
pub const MEMCPY_HOST_TO_DEVICE: i32 = 1;
pub const MEMCPY_DEVICE_TO_HOST: i32 = 2;

#[cfg(not(target_os = "linux"))]
extern "C" {
    fn cudaMalloc(dev_ptr: *mut *mut c_void, size: usize) -> CudaError;
    fn cudaFree(dev_ptr: *mut c_void) -> CudaError;
    fn cudaMemcpyAsync(
        dst: *mut c_void,
        src: *const c_void,
        count: usize,
        kind: i32,
        stream: CudaStreamT,
    ) -> CudaError;
    fn cudaStreamCreate(stream: *mut CudaStreamT) -> CudaError;
    fn cudaStreamSynchronize(stream: CudaStreamT) -> CudaError;
    fn cudaStreamDestroy(stream: CudaStreamT) -> CudaError;
}

#[cfg(target_os = "linux")]
extern "C" {
    fn dlopen(filename: *const c_char, flags: i32) -> *mut c_void;
    fn dlerror() -> *const c_char;
    fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void;
}

#[cfg(target_os = "linux")]
const RTLD_NOW: i32 = 2;
#[cfg(target_os = "linux")]
const RTLD_GLOBAL: i32 = 0x100;

#[cfg(target_os = "linux")]
struct CudartApi {
    cuda_malloc: unsafe extern "C" fn(*mut *mut c_void, usize) -> CudaError,
    cuda_free: unsafe extern "C" fn(*mut c_void) -> CudaError,
    cuda_memcpy_async:
        unsafe extern "C" fn(*mut c_void, *const c_void, usize, i32, CudaStreamT) -> CudaError,
    cuda_stream_create: unsafe extern "C" fn(*mut CudaStreamT) -> CudaError,
    cuda_stream_synchronize: unsafe extern "C" fn(CudaStreamT) -> CudaError,
    cuda_stream_destroy: unsafe extern "C" fn(CudaStreamT) -> CudaError,
}

#[cfg(target_os = "linux")]
static CUDART_API: OnceLock<std::result::Result<CudartApi, String>> = OnceLock::new();

#[cfg(target_os = "linux")]
fn last_dl_error() -> String {
    // SAFETY: dlerror returns a thread-local C string or null.
    unsafe {
        let p = dlerror();
        if p.is_null() {
            "unknown dl error".to_string()
        } else {
            CStr::from_ptr(p).to_string_lossy().to_string()
        }
    }
}

#[cfg(target_os = "linux")]
fn load_cudart_symbol<T>(handle: *mut c_void, name: &'static str) -> std::result::Result<T, String> {
    let cname = CString::new(name).map_err(|_| format!("invalid CUDA symbol name: {name}"))?;
    // SAFETY: handle is a valid dlopen handle and cname is NUL-terminated.
    let ptr = unsafe { dlsym(handle, cname.as_ptr()) };
    if ptr.is_null() {
        Err(format!("dlsym({name}) failed: {}", last_dl_error()))
    } else {
        // SAFETY: ptr points to a function with signature T.
        Ok(unsafe { std::mem::transmute_copy(&ptr) })
    }
}

#[cfg(target_os = "linux")]
fn init_cudart_api() -> std::result::Result<CudartApi, String> {
    let mut handle = std::ptr::null_mut();
    let mut last_err = "unknown dlopen error".to_string();
    for candidate in ["libcudart.so.12", "libcudart.so.11.0", "libcudart.so"] {
        let soname =
            CString::new(candidate).map_err(|_| format!("invalid cudart soname: {candidate}"))?;
        // SAFETY: static soname and valid dlopen flags.
        handle = unsafe { dlopen(soname.as_ptr(), RTLD_NOW | RTLD_GLOBAL) };
        if !handle.is_null() {
            break;
        }
        last_err = last_dl_error();
    }

    if handle.is_null() {
        return Err(format!("dlopen(libcudart) failed: {last_err}"));
    }

    Ok(CudartApi {
        cuda_malloc: load_cudart_symbol(handle, "cudaMalloc")?,
        cuda_free: load_cudart_symbol(handle, "cudaFree")?,
        cuda_memcpy_async: load_cudart_symbol(handle, "cudaMemcpyAsync")?,
        cuda_stream_create: load_cudart_symbol(handle, "cudaStreamCreate")?,
        cuda_stream_synchronize: load_cudart_symbol(handle, "cudaStreamSynchronize")?,
        cuda_stream_destroy: load_cudart_symbol(handle, "cudaStreamDestroy")?,
    })
}

#[cfg(target_os = "linux")]
fn cudart_api() -> Result<&'static CudartApi> {
    let api = CUDART_API.get_or_init(init_cudart_api);
    api.as_ref().map_err(|err| {
        EngineError::BackendUnavailable(format!(
            "failed to load CUDA runtime: {err}. \
Ensure the NVIDIA runtime libraries are installed and visible via LD_LIBRARY_PATH."
        ))
    })
}

/// Call `cudaMalloc`.
///
/// # Safety
/// `dev_ptr` must be a valid, writable pointer to device-pointer storage.
pub unsafe fn cuda_malloc(dev_ptr: *mut *mut c_void, size: usize) -> Result<CudaError> {
    #[cfg(target_os = "linux")]
    {
        let api = cudart_api()?;
        // SAFETY: function pointer was resolved from libcudart with matching signature.
        Ok(unsafe { (api.cuda_malloc)(dev_ptr, size) })
    }
    #[cfg(not(target_os = "linux"))]
    {
        // SAFETY: FFI call into the CUDA runtime API.
        Ok(unsafe { cudaMalloc(dev_ptr, size) })
    }
}

/// Call `cudaFree`.
///
/// # Safety
/// `dev_ptr` must be a pointer previously returned by `cudaMalloc` (or null).
pub unsafe fn cuda_free(dev_ptr: *mut c_void) -> Result<CudaError> {
    #[cfg(target_os = "linux")]
    {
        let api = cudart_api()?;
        // SAFETY: function pointer was resolved from libcudart with matching signature.
        Ok(unsafe { (api.cuda_free)(dev_ptr) })
    }
    #[cfg(not(target_os = "linux"))]
    {
        // SAFETY: FFI call into the CUDA runtime API.
        Ok(unsafe { cudaFree(dev_ptr) })
    }
}

/// Call `cudaMemcpyAsync`.
///
/// # Safety
/// `dst` and `src` must be valid for `count` bytes on the sides named by
/// `kind`, and `stream` must be a live stream handle.
pub unsafe fn cuda_memcpy_async(
    dst: *mut c_void,
    src: *const c_void,
    count: usize,
    kind: i32,
    stream: CudaStreamT,
) -> Result<CudaError> {
    #[cfg(target_os = "linux")]
    {
        let api = cudart_api()?;
        // SAFETY: function pointer was resolved from libcudart with matching signature.
        Ok(unsafe { (api.cuda_memcpy_async)(dst, src, count, kind, stream) })
    }
    #[cfg(not(target_os = "linux"))]
    {
        // SAFETY: FFI call into the CUDA runtime API.
        Ok(unsafe { cudaMemcpyAsync(dst, src, count, kind, stream) })
    }
}

/// Call `cudaStreamCreate`.
///
/// # Safety
/// `stream` must be a valid, writable pointer to stream-handle storage.
pub unsafe fn cuda_stream_create(stream: *mut CudaStreamT) -> Result<CudaError> {
    #[cfg(target_os = "linux")]
    {
        let api = cudart_api()?;
        // SAFETY: function pointer was resolved from libcudart with matching signature.
        Ok(unsafe { (api.cuda_stream_create)(stream) })
    }
    #[cfg(not(target_os = "linux"))]
    {
        // SAFETY: FFI call into the CUDA runtime API.
        Ok(unsafe { cudaStreamCreate(stream) })
    }
}

/// Call `cudaStreamSynchronize`.
///
/// # Safety
/// `stream` must be a live stream handle.
pub unsafe fn cuda_stream_synchronize(stream: CudaStreamT) -> Result<CudaError> {
    #[cfg(target_os = "linux")]
    {
        let api = cudart_api()?;
        // SAFETY: function pointer was resolved from libcudart with matching signature.
        Ok(unsafe { (api.cuda_stream_synchronize)(stream) })
    }
    #[cfg(not(target_os = "linux"))]
    {
        // SAFETY: FFI call into the CUDA runtime API.
        Ok(unsafe { cudaStreamSynchronize(stream) })
    }
}

/// Call `cudaStreamDestroy`.
///
/// # Safety
/// `stream` must be a live stream handle; it is invalid afterwards.
pub unsafe fn cuda_stream_destroy(stream: CudaStreamT) -> Result<CudaError> {
    #[cfg(target_os = "linux")]
    {
        let api = cudart_api()?;
        // SAFETY: function pointer was resolved from libcudart with matching signature.
        Ok(unsafe { (api.cuda_stream_destroy)(stream) })
    }
    #[cfg(not(target_os = "linux"))]
    {
        // SAFETY: FFI call into the CUDA runtime API.
        Ok(unsafe { cudaStreamDestroy(stream) })
    }
}

/// Map a non-zero CUDA status to the fatal device error class.
#[inline]
pub fn check_cuda(result: CudaError, call: &'static str) -> Result<()> {
    if result == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(EngineError::Device { call, code: result })
    }
}
