//! Capability surface shared by the eager and graph-interpreted engines.

use std::path::Path;

use cacheprobe_core::{Result, Trace};

use crate::artifact::SaveReport;
use crate::model::Batch;
use crate::session::ExtractionSession;

/// An extraction engine bound to one model.
///
/// Pick [`EagerExtractor`](crate::EagerExtractor) for models evaluated by
/// direct submodule calls and [`GraphExtractor`](crate::GraphExtractor) for
/// traced/quantized node sequences.
pub trait Extractor {
    /// Session state.
    fn session(&self) -> &ExtractionSession;

    /// Mutable session state.
    fn session_mut(&mut self) -> &mut ExtractionSession;

    /// Collects parameters selected by the session's traces.
    fn extract_params(&mut self) -> usize;

    /// Drives at most `max_iterations + 1` batches through the model for
    /// their capture side effects. Returns the number of batches consumed.
    fn drive(
        &mut self,
        batches: &mut dyn Iterator<Item = Batch>,
        max_iterations: usize,
    ) -> Result<usize>;

    /// [`drive`](Self::drive) with the configured iteration bound.
    fn extract_activation<I>(&mut self, batches: I) -> Result<usize>
    where
        I: IntoIterator<Item = Batch>,
        Self: Sized,
    {
        let max_iterations = self.session().config().max_iterations;
        self.drive(&mut batches.into_iter(), max_iterations)
    }

    /// Adds a parameter trace.
    fn add_trace(&mut self, trace: Trace) -> bool {
        self.session_mut().add_trace(trace)
    }

    /// Removes a parameter trace.
    fn remove_trace(&mut self, trace: &Trace) -> bool {
        self.session_mut().remove_trace(trace)
    }

    /// Clears extracted state; see [`ExtractionSession::reset`].
    fn reset(&mut self) {
        self.session_mut().reset();
    }

    /// Dumps extracted parameters.
    fn save_params(&self, path: Option<&Path>) -> Result<SaveReport> {
        self.session().save_params(path)
    }

    /// Dumps captured activations.
    fn save_activations(&self, path: Option<&Path>) -> Result<SaveReport> {
        self.session().save_activations(path)
    }
}
