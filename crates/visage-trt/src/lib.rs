#![doc = include_str!("../README.md")]

pub mod sys;

#[cfg(feature = "trt-runtime")]
#[path = "trt.rs"]
mod engine;

#[cfg(not(feature = "trt-runtime"))]
#[path = "trt_stub.rs"]
mod engine;

pub use engine::TrtEngine;
