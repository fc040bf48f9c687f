//! # Cacheprobe
//!
//! Measures how well neural-network tensors compress at cache-line
//! granularity. Parameters and activations are dumped as raw artifacts with a
//! `filelist.txt` manifest, a native benchmark computes per-algorithm
//! compression ratios for each model, and the result tables are summarized.
//!
//! ## Crates
//!
//! - `cacheprobe-core`: tensors, traces, naming, device selection, errors
//! - `cacheprobe-extract`: eager and graph capture engines, artifact writer
//! - `cacheprobe-bench`: benchmark build, orchestration, result tables

pub mod config;
pub mod pipeline;

pub use cacheprobe_core::{Error, Result};
pub use config::ProbeConfig;
