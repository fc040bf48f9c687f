//! Activation capture for graph-interpreted (traced, quantized) models.
//!
//! Such models cannot be hooked per submodule: evaluation replays a flat node
//! sequence. [`GraphExtractor`] is the interpreter. Every `call_module` node
//! whose target has a dotted segment equal to one of the capture keywords is
//! executed once and its integer representation stored under
//! `<model>_<target>_output<N>`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cacheprobe_core::{Device, Error, Result, Tensor};

use crate::extractor::Extractor;
use crate::model::{Batch, ParameterSource};
use crate::session::{ExtractionConfig, ExtractionSession};

/// Operation of one graph node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum NodeOp {
    /// Takes the next graph input.
    Placeholder,
    /// Invokes a submodule by dotted path.
    CallModule { target: String },
    /// Invokes a free function by name.
    CallFunction { function: String },
    /// Returns its single argument.
    Output,
}

/// One instruction in the flattened graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique value name.
    pub name: String,
    /// Operation.
    #[serde(flatten)]
    pub op: NodeOp,
    /// Names of earlier nodes whose values are passed as arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Flattened instruction sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a placeholder.
    pub fn placeholder(&mut self, name: &str) -> &mut Self {
        self.push(name, NodeOp::Placeholder, &[])
    }

    /// Appends a submodule call.
    pub fn call_module(&mut self, name: &str, target: &str, args: &[&str]) -> &mut Self {
        self.push(
            name,
            NodeOp::CallModule {
                target: target.to_string(),
            },
            args,
        )
    }

    /// Appends a function call.
    pub fn call_function(&mut self, name: &str, function: &str, args: &[&str]) -> &mut Self {
        self.push(
            name,
            NodeOp::CallFunction {
                function: function.to_string(),
            },
            args,
        )
    }

    /// Appends the output node.
    pub fn output(&mut self, arg: &str) -> &mut Self {
        self.push("output", NodeOp::Output, &[arg])
    }

    fn push(&mut self, name: &str, op: NodeOp, args: &[&str]) -> &mut Self {
        self.nodes.push(Node {
            name: name.to_string(),
            op,
            args: args.iter().map(|a| a.to_string()).collect(),
        });
        self
    }

    /// Nodes in execution order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Targets of every `call_module` node, in order.
    pub fn module_targets(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().filter_map(|n| match &n.op {
            NodeOp::CallModule { target } => Some(target.as_str()),
            _ => None,
        })
    }
}

/// Model evaluated by replaying a [`Graph`].
pub trait GraphModel: ParameterSource {
    /// The traced instruction sequence.
    fn graph(&self) -> &Graph;

    /// Evaluates the submodule at `target`.
    fn call_module(&mut self, target: &str, args: &[&Tensor]) -> Result<Tensor>;

    /// Evaluates a free function.
    fn call_function(&mut self, function: &str, args: &[&Tensor]) -> Result<Tensor>;
}

/// Extraction engine and interpreter over a [`GraphModel`].
pub struct GraphExtractor<'m, M> {
    model: &'m mut M,
    graph: Graph,
    session: ExtractionSession,
    keywords: Vec<String>,
}

impl<'m, M: GraphModel> GraphExtractor<'m, M> {
    /// Binds a model. Quantized graphs run on the host regardless of the
    /// configured device.
    pub fn new(model: &'m mut M, config: ExtractionConfig) -> Self {
        let config = ExtractionConfig {
            device: Some(Device::Cpu),
            ..config
        };
        let graph = model.graph().clone();
        Self {
            model,
            graph,
            session: ExtractionSession::new(config),
            keywords: Vec::new(),
        }
    }

    /// Adds a capture keyword. Duplicates are ignored.
    pub fn add_keyword(&mut self, keyword: impl Into<String>) -> bool {
        let keyword = keyword.into();
        if self.keywords.contains(&keyword) {
            return false;
        }
        self.keywords.push(keyword);
        true
    }

    /// Removes a capture keyword.
    pub fn remove_keyword(&mut self, keyword: &str) -> bool {
        let before = self.keywords.len();
        self.keywords.retain(|k| k != keyword);
        self.keywords.len() != before
    }

    /// Capture keywords in registration order.
    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Returns true if any dotted segment of `target` equals a keyword.
    #[must_use]
    pub fn captures(&self, target: &str) -> bool {
        target
            .split('.')
            .any(|segment| self.keywords.iter().any(|k| k == segment))
    }

    /// Interprets the graph once over `inputs`, capturing matching modules.
    pub fn run(&mut self, inputs: &[Tensor]) -> Result<Tensor> {
        let mut env: HashMap<&str, Tensor> = HashMap::with_capacity(self.graph.nodes().len());
        let mut next_input = inputs.iter();

        for node in self.graph.nodes() {
            let args = node
                .args
                .iter()
                .map(|a| {
                    env.get(a.as_str())
                        .ok_or_else(|| Error::graph(&node.name, format!("undefined value '{a}'")))
                })
                .collect::<Result<Vec<&Tensor>>>()?;

            let value = match &node.op {
                NodeOp::Placeholder => next_input
                    .next()
                    .cloned()
                    .ok_or_else(|| Error::graph(&node.name, "not enough graph inputs"))?,
                NodeOp::CallModule { target } => {
                    let out = self.model.call_module(target, &args)?;
                    if self.captures(target) {
                        Self::capture(&mut self.session, target, &out);
                    }
                    out
                }
                NodeOp::CallFunction { function } => self.model.call_function(function, &args)?,
                NodeOp::Output => {
                    let result = args
                        .first()
                        .map(|t| (*t).clone())
                        .ok_or_else(|| Error::graph(&node.name, "output node has no argument"))?;
                    return Ok(result);
                }
            };

            env.insert(node.name.as_str(), value);
        }

        Err(Error::graph("<end>", "graph has no output node"))
    }

    fn capture(session: &mut ExtractionSession, target: &str, out: &Tensor) {
        let base = format!("{}_{}", session.model_name(), target);
        match out.int_repr() {
            Ok(repr) => {
                session.record_activation(&base, repr);
            }
            Err(e) => {
                warn!(module = %target, error = %e, "cannot capture integer representation, skipping");
            }
        }
    }
}

impl<M: GraphModel> Extractor for GraphExtractor<'_, M> {
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
        let mut driven = 0;

        for batch in batches.take(max_iterations + 1) {
            self.run(&[batch.input.to(Device::Cpu)])?;
            driven += 1;
        }

        debug!(
            batches = driven,
            captured = self.session.activations().len(),
            "graph activation pass finished"
        );
        Ok(driven)
    }
}
