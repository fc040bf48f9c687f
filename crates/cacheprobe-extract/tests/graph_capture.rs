//! Graph-interpreted capture over a small quantized model.

use std::collections::HashMap;

use cacheprobe_core::{DType, Device, Error, QuantParams, Result, Tensor, Trace};
use cacheprobe_extract::{
    Batch, ExtractionConfig, Extractor, Graph, GraphExtractor, GraphModel, ParameterSource,
};
use tempfile::tempdir;

const SCALE: f32 = 0.5;

/// quant -> layer1.0.conv1 -> layer1.0.relu -> dequant -> fc
struct QuantNet {
    graph: Graph,
    calls: HashMap<String, usize>,
}

impl QuantNet {
    fn new() -> Self {
        let mut graph = Graph::new();
        graph
            .placeholder("x")
            .call_module("quant", "quant", &["x"])
            .call_module("conv1", "layer1.0.conv1", &["quant"])
            .call_module("relu", "layer1.0.relu", &["conv1"])
            .call_module("dequant", "dequant", &["relu"])
            .call_function("flat", "flatten", &["dequant"])
            .call_module("fc", "fc", &["flat"])
            .output("fc");
        Self {
            graph,
            calls: HashMap::new(),
        }
    }

    fn requantize(t: &Tensor, f: impl Fn(f32) -> f32) -> Result<Tensor> {
        let values: Vec<f32> = t.to_f32_vec()?.into_iter().map(f).collect();
        Tensor::from_f32(t.shape().to_vec(), &values)?.quantize_per_tensor(
            QuantParams {
                scale: SCALE,
                zero_point: 0,
            },
            DType::U8,
        )
    }
}

impl ParameterSource for QuantNet {
    fn parameter_names(&self) -> Vec<String> {
        vec!["layer1.0.conv1.weight".to_string(), "fc.bias".to_string()]
    }

    fn parameter(&self, name: &str) -> Result<Tensor> {
        match name {
            "layer1.0.conv1.weight" => Tensor::from_f32(vec![2], &[2.0, 2.0]),
            "fc.bias" => Tensor::from_f32(vec![1], &[0.0]),
            other => Err(Error::unavailable(other, "no such parameter")),
        }
    }
}

impl GraphModel for QuantNet {
    fn graph(&self) -> &Graph {
        &self.graph
    }

    fn call_module(&mut self, target: &str, args: &[&Tensor]) -> Result<Tensor> {
        *self.calls.entry(target.to_string()).or_default() += 1;
        let x = args[0];
        match target {
            "quant" => Self::requantize(x, |v| v),
            "layer1.0.conv1" => Self::requantize(x, |v| v * 2.0),
            "layer1.0.relu" => Self::requantize(x, |v| v.max(0.0)),
            "dequant" => Tensor::from_f32(x.shape().to_vec(), &x.to_f32_vec()?),
            "fc" => {
                let sum: f32 = x.to_f32_vec()?.iter().sum();
                Tensor::from_f32(vec![1], &[sum])
            }
            other => Err(Error::Forward(format!("unknown module {other}"))),
        }
    }

    fn call_function(&mut self, function: &str, args: &[&Tensor]) -> Result<Tensor> {
        match function {
            "flatten" => {
                let x = args[0];
                Tensor::from_f32(vec![x.num_elements()], &x.to_f32_vec()?)
            }
            other => Err(Error::Forward(format!("unknown function {other}"))),
        }
    }
}

fn config(root: &std::path::Path) -> ExtractionConfig {
    ExtractionConfig {
        output_root: root.to_path_buf(),
        device: Some(Device::Cpu),
        ..ExtractionConfig::for_model("q")
    }
}

fn batch(values: [f32; 4]) -> Batch {
    let input = Tensor::from_f32(vec![1, 4], &values).unwrap();
    let label = Tensor::from_raw(DType::I64, vec![1], 0i64.to_le_bytes().to_vec()).unwrap();
    Batch::new(input, label)
}

#[test]
fn test_keyword_captures_integer_representation() {
    let dir = tempdir().unwrap();
    let mut net = QuantNet::new();
    let mut extractor = GraphExtractor::new(&mut net, config(dir.path()));
    extractor.add_keyword("conv1");

    let out = extractor.run(&[batch([1.0, 2.0, 0.5, 3.0]).input]).unwrap();
    // (1 + 2 + 0.5 + 3) * 2
    assert_eq!(out.to_f32_vec().unwrap(), vec![13.0]);

    let acts = extractor.session().activations();
    assert_eq!(acts.keys().collect::<Vec<_>>(), vec!["q_layer1.0.conv1_output0"]);
    let captured = &acts["q_layer1.0.conv1_output0"];
    assert_eq!(captured.dtype(), DType::U8);
    assert!(captured.quant().is_none());
    // value / scale
    assert_eq!(captured.as_bytes(), &[4, 8, 2, 12]);
}

#[test]
fn test_each_module_executes_once_per_pass() {
    let dir = tempdir().unwrap();
    let mut net = QuantNet::new();
    {
        let mut extractor = GraphExtractor::new(&mut net, config(dir.path()));
        extractor.add_keyword("layer1");
        extractor.run(&[batch([1.0, 1.0, 1.0, 1.0]).input]).unwrap();
    }
    for target in ["quant", "layer1.0.conv1", "layer1.0.relu", "dequant", "fc"] {
        assert_eq!(net.calls[target], 1, "{target}");
    }
}

#[test]
fn test_keyword_matches_whole_segments_only() {
    let dir = tempdir().unwrap();
    let mut net = QuantNet::new();
    let mut extractor = GraphExtractor::new(&mut net, config(dir.path()));
    extractor.add_keyword("conv");
    extractor.add_keyword("relu");

    assert!(!extractor.captures("layer1.0.conv1"));
    assert!(extractor.captures("layer1.0.relu"));

    extractor.run(&[batch([1.0, -1.0, 2.0, -2.0]).input]).unwrap();
    assert_eq!(
        extractor.session().activations().keys().collect::<Vec<_>>(),
        vec!["q_layer1.0.relu_output0"]
    );
}

#[test]
fn test_float_output_is_skipped() {
    let dir = tempdir().unwrap();
    let mut net = QuantNet::new();
    let mut extractor = GraphExtractor::new(&mut net, config(dir.path()));
    extractor.add_keyword("fc");
    extractor.add_keyword("dequant");

    extractor.run(&[batch([1.0, 2.0, 3.0, 4.0]).input]).unwrap();
    assert!(extractor.session().activations().is_empty());
}

#[test]
fn test_repeated_passes_get_distinct_names() {
    let dir = tempdir().unwrap();
    let mut net = QuantNet::new();
    let mut extractor = GraphExtractor::new(&mut net, config(dir.path()));
    extractor.add_keyword("conv1");

    let batches: Vec<Batch> = (0..10).map(|i| batch([i as f32; 4])).collect();
    let driven = extractor.drive(&mut batches.into_iter(), 3).unwrap();
    assert_eq!(driven, 4);

    let names: Vec<&String> = extractor.session().activations().keys().collect();
    assert_eq!(
        names,
        vec![
            "q_layer1.0.conv1_output0",
            "q_layer1.0.conv1_output1",
            "q_layer1.0.conv1_output2",
            "q_layer1.0.conv1_output3",
        ]
    );
}

#[test]
fn test_graph_engine_forces_host_device() {
    let dir = tempdir().unwrap();
    let mut net = QuantNet::new();
    let cfg = ExtractionConfig {
        device: Some(Device::Cuda { device_id: 0 }),
        ..config(dir.path())
    };
    let extractor = GraphExtractor::new(&mut net, cfg);
    assert_eq!(extractor.session().device(), Device::Cpu);
}

#[test]
fn test_params_and_save_through_graph_engine() {
    let dir = tempdir().unwrap();
    let mut net = QuantNet::new();
    let mut extractor = GraphExtractor::new(&mut net, config(dir.path()));
    extractor.add_trace(Trace::Weight);
    assert_eq!(extractor.extract_params(), 1);
    extractor.add_keyword("conv1");
    extractor
        .extract_activation(vec![batch([1.0, 2.0, 3.0, 4.0])])
        .unwrap();

    let params = extractor.save_params(None).unwrap();
    let acts = extractor.save_activations(None).unwrap();

    assert!(params.is_complete());
    assert_eq!(params.written, vec![dir.path().join("q/params/q_layer1_0_conv1_weight")]);
    assert_eq!(
        acts.written,
        vec![dir.path().join("q/activations/q_layer1.0.conv1_output0")]
    );
}

#[test]
fn test_missing_output_node_is_an_error() {
    struct NoOutput {
        graph: Graph,
    }
    impl ParameterSource for NoOutput {
        fn parameter_names(&self) -> Vec<String> {
            Vec::new()
        }
        fn parameter(&self, name: &str) -> Result<Tensor> {
            Err(Error::unavailable(name, "empty"))
        }
    }
    impl GraphModel for NoOutput {
        fn graph(&self) -> &Graph {
            &self.graph
        }
        fn call_module(&mut self, _: &str, args: &[&Tensor]) -> Result<Tensor> {
            Ok(args[0].clone())
        }
        fn call_function(&mut self, _: &str, args: &[&Tensor]) -> Result<Tensor> {
            Ok(args[0].clone())
        }
    }

    let mut graph = Graph::new();
    graph.placeholder("x").call_module("id", "id", &["x"]);
    let mut model = NoOutput { graph };
    let dir = tempdir().unwrap();
    let mut extractor = GraphExtractor::new(&mut model, config(dir.path()));

    assert!(matches!(
        extractor.run(&[batch([0.0; 4]).input]),
        Err(Error::Graph { .. })
    ));
}
