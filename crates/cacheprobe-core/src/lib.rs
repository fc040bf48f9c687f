//! # Cacheprobe Core
//!
//! Shared types for measuring how well neural network tensors compress at
//! cache-line granularity.
//!
//! - [`Tensor`] - raw native-layout tensor buffer, the unit that gets dumped
//! - [`Trace`] / [`TraceSet`] - ordered, first-match-wins identifier filters
//! - [`OutputNamer`] - `<base>_output<N>` disambiguation for captured outputs
//! - [`Device`] - explicit compute device selection
//! - [`Error`] - error type shared by every cacheprobe crate

pub mod device;
pub mod error;
pub mod naming;
pub mod tensor;
pub mod trace;

pub use device::Device;
pub use error::{Error, Result};
pub use naming::{auto_hook_name, param_artifact_name, OutputNamer};
pub use tensor::{DType, QuantParams, Tensor};
pub use trace::{Trace, TracePredicate, TraceSet};
