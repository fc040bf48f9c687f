//! Extraction session state.
//!
//! A session holds what has been extracted for one output model: the
//! parameter and activation mappings (insertion ordered), the active trace
//! list and the per-base-name output counters. It never holds the model.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cacheprobe_core::{
    param_artifact_name, Device, OutputNamer, Result, Tensor, Trace, TraceSet,
};

use crate::artifact::{save_artifacts, ArtifactKind, SaveReport};
use crate::model::ParameterSource;

/// Extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Name prefixed to parameter artifacts and used for default directories.
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Root under which `<model>/params` and `<model>/activations` are created.
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,

    /// Device batches are moved to. `None` auto-detects.
    #[serde(default)]
    pub device: Option<Device>,

    /// Leading channels kept from each captured eager activation.
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,

    /// Activation capture drives at most `max_iterations + 1` batches.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            output_root: default_output_root(),
            device: None,
            max_channels: default_max_channels(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl ExtractionConfig {
    /// Config for a named output model with defaults elsewhere.
    pub fn for_model(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Default::default()
        }
    }
}

fn default_model_name() -> String {
    "model".to_string()
}

fn default_output_root() -> PathBuf {
    PathBuf::from("./extracted_output")
}

fn default_max_channels() -> usize {
    9
}

fn default_max_iterations() -> usize {
    5
}

/// Mutable extraction state for one output model.
#[derive(Debug, Clone)]
pub struct ExtractionSession {
    config: ExtractionConfig,
    device: Device,
    params: IndexMap<String, Tensor>,
    activations: IndexMap<String, Tensor>,
    traces: TraceSet,
    namer: OutputNamer,
}

impl ExtractionSession {
    /// Creates an empty session, resolving the configured device.
    pub fn new(config: ExtractionConfig) -> Self {
        let device = Device::resolve(config.device);
        info!(model = %config.model_name, %device, "extraction session created");
        Self {
            config,
            device,
            params: IndexMap::new(),
            activations: IndexMap::new(),
            traces: TraceSet::new(),
            namer: OutputNamer::new(),
        }
    }

    /// Session configuration.
    #[must_use]
    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Output model name.
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.config.model_name
    }

    /// Renames the output model for subsequent extractions.
    pub fn set_model_name(&mut self, name: impl Into<String>) {
        self.config.model_name = name.into();
    }

    /// Resolved device.
    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Adds a trace. Duplicates are ignored.
    pub fn add_trace(&mut self, trace: Trace) -> bool {
        self.traces.add(trace)
    }

    /// Removes a trace.
    pub fn remove_trace(&mut self, trace: &Trace) -> bool {
        self.traces.remove(trace)
    }

    /// Active traces in evaluation order.
    #[must_use]
    pub fn traces(&self) -> &TraceSet {
        &self.traces
    }

    /// Extracted parameters in insertion order.
    #[must_use]
    pub fn params(&self) -> &IndexMap<String, Tensor> {
        &self.params
    }

    /// Captured activations in insertion order.
    #[must_use]
    pub fn activations(&self) -> &IndexMap<String, Tensor> {
        &self.activations
    }

    /// Number of outputs captured under `base`.
    #[must_use]
    pub fn captures_for(&self, base: &str) -> usize {
        self.namer.issued(base)
    }

    /// Walks `source` in tree order and collects every parameter selected by
    /// the trace list.
    ///
    /// The first matching trace decides; each identifier is extracted at most
    /// once. Tensors that fail to fetch are logged and skipped, as is an
    /// identifier whose artifact name an earlier identifier of the same pass
    /// already took. Returns the number of parameters extracted by this pass.
    pub fn extract_params<S>(&mut self, source: &S) -> usize
    where
        S: ParameterSource + ?Sized,
    {
        let mut extracted = 0;
        let mut claimed = HashSet::new();

        for ident in source.parameter_names() {
            let Some(trace_idx) = self.traces.first_match(&ident) else {
                continue;
            };
            let name = param_artifact_name(&self.config.model_name, &ident);
            if !claimed.insert(name.clone()) {
                warn!(artifact = %name, ident = %ident, "artifact name collides with an earlier parameter, skipped");
                continue;
            }

            match source.parameter(&ident) {
                Ok(tensor) => {
                    debug!(artifact = %name, trace = trace_idx, dtype = tensor.dtype().name(), "extracting");
                    if self.params.insert(name.clone(), tensor.detach()).is_some() {
                        debug!(artifact = %name, "replaced artifact from an earlier pass");
                    }
                    extracted += 1;
                }
                Err(e) => {
                    warn!(artifact = %name, error = %e, "error occurred on extracting parameter");
                }
            }
        }

        info!(
            model = %self.config.model_name,
            "extracted {} parameters ({} total)",
            extracted,
            self.params.len()
        );
        extracted
    }

    /// Stores a captured output under the next `<base>_output<N>` name.
    pub fn record_activation(&mut self, base: &str, tensor: Tensor) -> String {
        let name = self.namer.next_name(base);
        debug!(artifact = %name, shape = ?tensor.shape(), dtype = tensor.dtype().name(), "captured activation");
        self.activations.insert(name.clone(), tensor);
        name
    }

    /// Clears both mappings, the output counters and the trace list.
    ///
    /// Interception registrations live with the capture engine and are left
    /// untouched; remove them explicitly to stop capture.
    pub fn reset(&mut self) {
        self.params.clear();
        self.activations.clear();
        self.namer.clear();
        self.traces.clear();
        debug!(model = %self.config.model_name, "session reset");
    }

    /// `<output_root>/<model>/<kind>`.
    #[must_use]
    pub fn default_dir(&self, kind: ArtifactKind) -> PathBuf {
        self.config
            .output_root
            .join(&self.config.model_name)
            .join(kind.dir_name())
    }

    /// Dumps parameters and their manifest to `path` or the default directory.
    pub fn save_params(&self, path: Option<&Path>) -> Result<SaveReport> {
        let dir = path.map_or_else(|| self.default_dir(ArtifactKind::Params), Path::to_path_buf);
        save_artifacts(&dir, &self.params)
    }

    /// Dumps activations and their manifest to `path` or the default directory.
    pub fn save_activations(&self, path: Option<&Path>) -> Result<SaveReport> {
        let dir = path.map_or_else(
            || self.default_dir(ArtifactKind::Activations),
            Path::to_path_buf,
        );
        save_artifacts(&dir, &self.activations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cacheprobe_core::Error;

    struct Tree {
        names: Vec<&'static str>,
        broken: HashSet<&'static str>,
    }

    impl ParameterSource for Tree {
        fn parameter_names(&self) -> Vec<String> {
            self.names.iter().map(|s| s.to_string()).collect()
        }

        fn parameter(&self, name: &str) -> Result<Tensor> {
            if self.broken.contains(name) {
                return Err(Error::unavailable(name, "not materialized"));
            }
            let idx = self.names.iter().position(|n| *n == name).unwrap_or(0);
            Tensor::from_f32(vec![2], &[idx as f32, -(idx as f32)])
        }
    }

    fn cpu_session(model: &str) -> ExtractionSession {
        ExtractionSession::new(ExtractionConfig {
            device: Some(Device::Cpu),
            ..ExtractionConfig::for_model(model)
        })
    }

    #[test]
    fn test_first_match_extracts_once() {
        let tree = Tree {
            names: vec!["layer.weight_bias"],
            broken: HashSet::new(),
        };
        let mut session = cpu_session("m");
        session.add_trace(Trace::Weight);
        session.add_trace(Trace::Bias);

        assert_eq!(session.extract_params(&tree), 1);
        assert_eq!(
            session.params().keys().collect::<Vec<_>>(),
            vec!["m_layer_weight_bias"]
        );
    }

    #[test]
    fn test_tree_order_is_preserved() {
        let tree = Tree {
            names: vec!["a.weight", "a.bias", "a.running_mean", "b.weight"],
            broken: HashSet::new(),
        };
        let mut session = cpu_session("m");
        session.add_trace(Trace::Weight);
        session.add_trace(Trace::Bias);
        session.extract_params(&tree);

        assert_eq!(
            session.params().keys().collect::<Vec<_>>(),
            vec!["m_a_weight", "m_a_bias", "m_b_weight"]
        );
    }

    #[test]
    fn test_fetch_failure_is_skipped() {
        let tree = Tree {
            names: vec!["a.weight", "b.weight", "c.weight"],
            broken: ["b.weight"].into_iter().collect(),
        };
        let mut session = cpu_session("m");
        session.add_trace(Trace::Weight);

        assert_eq!(session.extract_params(&tree), 2);
        assert!(session.params().contains_key("m_a_weight"));
        assert!(!session.params().contains_key("m_b_weight"));
        assert!(session.params().contains_key("m_c_weight"));
    }

    #[test]
    fn test_colliding_names_keep_first() {
        let tree = Tree {
            names: vec!["a.weight", "a_weight", "b.weight"],
            broken: HashSet::new(),
        };
        let mut session = cpu_session("m");
        session.add_trace(Trace::Weight);

        assert_eq!(session.extract_params(&tree), 2);
        assert_eq!(
            session.params().keys().collect::<Vec<_>>(),
            vec!["m_a_weight", "m_b_weight"]
        );
        // "a.weight" is index 0 in the tree
        assert_eq!(
            session.params()["m_a_weight"].to_f32_vec().unwrap(),
            vec![0.0, -0.0]
        );

        // A later pass refreshes values without reordering.
        assert_eq!(session.extract_params(&tree), 2);
        assert_eq!(session.params().len(), 2);
    }

    #[test]
    fn test_no_traces_extracts_nothing() {
        let tree = Tree {
            names: vec!["a.weight"],
            broken: HashSet::new(),
        };
        let mut session = cpu_session("m");
        assert_eq!(session.extract_params(&tree), 0);
        assert!(session.params().is_empty());
    }

    #[test]
    fn test_reset_clears_state() {
        let tree = Tree {
            names: vec!["a.weight"],
            broken: HashSet::new(),
        };
        let mut session = cpu_session("m");
        session.add_trace(Trace::Weight);
        session.extract_params(&tree);
        let zero = Tensor::zeros(cacheprobe_core::DType::F32, vec![1]).unwrap();
        session.record_activation("hook0", zero.clone());

        session.reset();

        assert!(session.params().is_empty());
        assert!(session.activations().is_empty());
        assert!(session.traces().is_empty());
        assert_eq!(session.captures_for("hook0"), 0);
        assert_eq!(
            session.record_activation("hook0", zero),
            "hook0_output0"
        );
    }

    #[test]
    fn test_default_dirs() {
        let session = ExtractionSession::new(ExtractionConfig {
            output_root: PathBuf::from("/tmp/out"),
            device: Some(Device::Cpu),
            ..ExtractionConfig::for_model("AlexNet_Imagenet")
        });
        assert_eq!(
            session.default_dir(ArtifactKind::Params),
            PathBuf::from("/tmp/out/AlexNet_Imagenet/params")
        );
        assert_eq!(
            session.default_dir(ArtifactKind::Activations),
            PathBuf::from("/tmp/out/AlexNet_Imagenet/activations")
        );
    }
}
