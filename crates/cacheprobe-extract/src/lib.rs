//! # Cacheprobe Extract
//!
//! Pulls tensors out of a model and dumps them as raw byte artifacts for the
//! native cache-line compression benchmark.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ Parameter     │──▶│                  │   │              │
//! │ tree + traces │   │ ExtractionSession│──▶│  Artifacts + │
//! ├───────────────┤   │  params (ordered)│   │ filelist.txt │
//! │ Eager hooks / │──▶│  activations     │   │              │
//! │ Graph interp. │   │                  │   │              │
//! └───────────────┘   └──────────────────┘   └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use cacheprobe_core::Trace;
//! use cacheprobe_extract::{EagerExtractor, ExtractionConfig, Extractor};
//!
//! let mut extractor = EagerExtractor::new(&mut model, ExtractionConfig::for_model("resnet"));
//! extractor.add_trace(Trace::Weight);
//! extractor.add_trace(Trace::Bias);
//! extractor.extract_params();
//! let report = extractor.save_params(None)?;
//! println!("manifest at {}", report.manifest.display());
//! ```

pub mod artifact;
pub mod eager;
pub mod extractor;
pub mod graph;
pub mod hooks;
pub mod model;
pub mod safetensors;
pub mod session;

pub use artifact::{read_artifact, save_artifacts, ArtifactKind, Manifest, SaveReport, MANIFEST_FILE};
pub use eager::EagerExtractor;
pub use extractor::Extractor;
pub use graph::{Graph, GraphExtractor, GraphModel, Node, NodeOp};
pub use hooks::{HookName, HookRegistry, HookTarget, Registration};
pub use model::{Batch, EagerModel, ForwardObserver, NoopObserver, ParameterSource};
pub use safetensors::{write_safetensors, SafetensorsModel, TensorEntry};
pub use session::{ExtractionConfig, ExtractionSession};
