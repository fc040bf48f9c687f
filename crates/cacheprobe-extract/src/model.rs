//! Model collaborator interfaces.
//!
//! Cacheprobe never owns a model. Drivers hand in anything that can list and
//! fetch its persisted parameters, and optionally run forward passes either
//! eagerly ([`EagerModel`]) or as an interpreted node sequence
//! ([`GraphModel`](crate::graph::GraphModel)).

use cacheprobe_core::{Result, Tensor};

/// Enumerable, deterministically ordered parameter tree.
pub trait ParameterSource {
    /// Dotted parameter identifiers in tree order.
    fn parameter_names(&self) -> Vec<String>;

    /// Fetches one parameter. May fail for tensors that are not materialized.
    fn parameter(&self, name: &str) -> Result<Tensor>;
}

/// Receives every submodule output produced during an eager forward pass.
pub trait ForwardObserver {
    /// Called after `submodule` produced `output`.
    fn on_output(&mut self, submodule: &str, output: &Tensor);
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ForwardObserver for NoopObserver {
    fn on_output(&mut self, _submodule: &str, _output: &Tensor) {}
}

/// Model evaluated by direct calls into its submodules.
pub trait EagerModel: ParameterSource {
    /// Dotted paths of submodules that report outputs.
    fn submodules(&self) -> Vec<String>;

    /// Runs a forward pass, reporting each submodule output to `observer`
    /// in evaluation order.
    fn forward(&mut self, input: &Tensor, observer: &mut dyn ForwardObserver) -> Result<Tensor>;
}

/// One input/label pair from a data source.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Model input.
    pub input: Tensor,
    /// Target label; carried along but unused by capture.
    pub label: Tensor,
}

impl Batch {
    /// Creates a batch.
    pub fn new(input: Tensor, label: Tensor) -> Self {
        Self { input, label }
    }
}

impl From<(Tensor, Tensor)> for Batch {
    fn from((input, label): (Tensor, Tensor)) -> Self {
        Self { input, label }
    }
}
