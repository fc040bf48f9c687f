//! Study pipeline: dump checkpoint parameters, benchmark every model
//! directory, summarize the result tables.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::info;

use cacheprobe_bench::{
    algorithm_columns, discover_jobs, summarize_dir, BenchmarkOrchestrator, ModelSummary,
    NativeBenchmark, RunSummary,
};
use cacheprobe_core::{Error, Result, Trace};
use cacheprobe_extract::{ExtractionConfig, ExtractionSession, SafetensorsModel, SaveReport};

use crate::config::ProbeConfig;

/// Traces used when none are requested: every weight, then every bias.
#[must_use]
pub fn default_traces() -> Vec<Trace> {
    vec![Trace::Weight, Trace::Bias]
}

/// Model name derived from a checkpoint path (its file stem).
pub fn model_name_for(checkpoint: &Path) -> Result<String> {
    checkpoint
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            Error::Config(format!(
                "cannot derive a model name from {}",
                checkpoint.display()
            ))
        })
}

/// Dumps the parameters of a `.safetensors` checkpoint selected by `traces`
/// into `out_dir`, followed by its manifest.
pub fn extract_checkpoint(
    checkpoint: &Path,
    traces: &[Trace],
    config: &ExtractionConfig,
    out_dir: &Path,
) -> Result<SaveReport> {
    let model = SafetensorsModel::open(checkpoint)?;

    let mut session = ExtractionSession::new(config.clone());
    for trace in traces {
        session.add_trace(trace.clone());
    }
    let extracted = session.extract_params(&model);
    info!(
        checkpoint = %checkpoint.display(),
        model = %config.model_name,
        extracted,
        available = model.tensor_count(),
        "checkpoint parameters extracted"
    );

    session.save_params(Some(out_dir))
}

/// Builds (or adopts) the benchmark executable.
pub fn prepare_benchmark(config: &ProbeConfig, executable: Option<&Path>) -> Result<NativeBenchmark> {
    match executable {
        Some(path) => NativeBenchmark::from_executable(path),
        None => NativeBenchmark::build(&config.build),
    }
}

/// Benchmarks every model directory under the extractions root.
pub fn benchmark_all(config: &ProbeConfig, benchmark: NativeBenchmark) -> Result<RunSummary> {
    let jobs = discover_jobs(&config.extractions_root, &config.bench)?;
    Ok(BenchmarkOrchestrator::new(benchmark, config.bench.clone()).run(&jobs))
}

/// Reads every model's result table under the extractions root.
pub fn summarize(config: &ProbeConfig) -> Result<Vec<ModelSummary>> {
    summarize_dir(&config.extractions_root, &config.bench.result_file)
}

/// Renders summaries as an aligned text table, one row per model.
#[must_use]
pub fn render_report(summaries: &[ModelSummary]) -> String {
    let columns = algorithm_columns(summaries);
    let name_width = summaries
        .iter()
        .map(|s| s.model.len())
        .chain(std::iter::once("Model".len()))
        .max()
        .unwrap_or(5);

    let mut out = String::new();
    let _ = write!(out, "{:<name_width$}  {:>5}", "Model", "Files");
    for col in &columns {
        let _ = write!(out, "  {:>8}", col);
    }
    out.push('\n');

    for summary in summaries {
        let _ = write!(out, "{:<name_width$}  {:>5}", summary.model, summary.files);
        for col in &columns {
            match summary.averages.get(col) {
                Some(v) => {
                    let _ = write!(out, "  {:>8.4}", v);
                }
                None => {
                    let _ = write!(out, "  {:>8}", "-");
                }
            }
        }
        out.push('\n');
    }
    out
}

/// Directory for a model's artifacts: `--output` when given, otherwise
/// `<extractions_root>/<model>`.
#[must_use]
pub fn output_dir(config: &ProbeConfig, model: &str, output: Option<&Path>) -> PathBuf {
    output.map_or_else(|| config.model_dir(model), Path::to_path_buf)
}
