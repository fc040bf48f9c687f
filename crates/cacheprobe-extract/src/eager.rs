//! Activation capture for eagerly evaluated models.
//!
//! Hooks are bound to submodule paths. While a forward pass runs, the model
//! reports each submodule output; every hook bound to that submodule stores a
//! channel-truncated, detached copy under `<hook>_output<N>`.

use tracing::{debug, info};

use cacheprobe_core::{Error, Result, Tensor};

use crate::extractor::Extractor;
use crate::hooks::{HookName, HookRegistry, HookTarget, Registration};
use crate::model::{Batch, EagerModel, ForwardObserver};
use crate::session::{ExtractionConfig, ExtractionSession};

/// Extraction engine over an [`EagerModel`].
pub struct EagerExtractor<'m, M> {
    model: &'m mut M,
    session: ExtractionSession,
    hooks: HookRegistry,
}

impl<'m, M: EagerModel> EagerExtractor<'m, M> {
    /// Binds a model with a fresh session.
    pub fn new(model: &'m mut M, config: ExtractionConfig) -> Self {
        Self {
            model,
            session: ExtractionSession::new(config),
            hooks: HookRegistry::new(),
        }
    }

    /// Swaps in another model, dropping hooks bound to the previous one.
    ///
    /// Session state is kept; call [`Extractor::reset`] for a clean slate.
    pub fn bind(&mut self, model: &'m mut M) {
        if !self.hooks.is_empty() {
            info!("rebinding model, dropping {} hooks", self.hooks.len());
        }
        self.hooks = HookRegistry::new();
        self.model = model;
    }

    /// Live interception registrations.
    #[must_use]
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Bound model.
    #[must_use]
    pub fn model(&self) -> &M {
        &*self.model
    }

    /// Registers a capture point on `submodule`.
    ///
    /// A name that is already registered is logged and ignored, leaving the
    /// earlier registration active.
    pub fn register(&mut self, submodule: &str, name: impl Into<HookName>) -> Result<Registration> {
        if !self.model.submodules().iter().any(|m| m == submodule) {
            return Err(Error::UnknownSubmodule(submodule.to_string()));
        }
        Ok(self.hooks.register(submodule, name.into()))
    }

    /// Registers a capture point with an automatic `hook<N>` name.
    pub fn register_auto(&mut self, submodule: &str) -> Result<Registration> {
        self.register(submodule, HookName::Auto)
    }

    /// Tears down one or all registrations.
    pub fn remove(&mut self, target: impl Into<HookTarget>) -> Result<usize> {
        self.hooks.remove(target.into())
    }

    /// Runs one forward pass with capture enabled.
    pub fn forward(&mut self, input: &Tensor) -> Result<Tensor> {
        let mut observer = CaptureObserver {
            hooks: &self.hooks,
            session: &mut self.session,
        };
        self.model.forward(input, &mut observer)
    }
}

impl<M: EagerModel> Extractor for EagerExtractor<'_, M> {
    fn session(&self) -> &ExtractionSession {
        &self.session
    }

    fn session_mut(&mut self) -> &mut ExtractionSession {
        &mut self.session
    }

    fn extract_params(&mut self) -> usize {
        self.session.extract_params(&*self.model)
    }

    fn drive(
        &mut self,
        batches: &mut dyn Iterator<Item = Batch>,
        max_iterations: usize,
    ) -> Result<usize> {
        let device = self.session.device();
        let mut driven = 0;

        for batch in batches.take(max_iterations + 1) {
            let input = batch.input.to(device);
            self.forward(&input)?;
            driven += 1;
        }

        debug!(
            batches = driven,
            captured = self.session.activations().len(),
            "activation pass finished"
        );
        Ok(driven)
    }
}

struct CaptureObserver<'a> {
    hooks: &'a HookRegistry,
    session: &'a mut ExtractionSession,
}

impl ForwardObserver for CaptureObserver<'_> {
    fn on_output(&mut self, submodule: &str, output: &Tensor) {
        let max_channels = self.session.config().max_channels;
        for hook in self.hooks.hooks_for(submodule) {
            self.session
                .record_activation(hook, output.narrow_channels(max_channels));
        }
    }
}
