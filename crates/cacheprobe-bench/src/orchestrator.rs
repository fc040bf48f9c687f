//! Per-model benchmark orchestration.
//!
//! Runs a built [`NativeBenchmark`] once per model. A failed invocation is
//! logged and recorded and the run moves on to the next model.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use indexmap::IndexSet;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cacheprobe_core::{Error, Result};

use crate::native::{
    BenchmarkInvocation, InvocationOutcome, NativeBenchmark, DEFAULT_CACHE_LINE_SIZE,
    DEFAULT_MAX_ITERATIONS,
};

fn default_cache_line_size() -> usize {
    DEFAULT_CACHE_LINE_SIZE
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_manifest_file() -> String {
    "filelist.txt".to_string()
}

fn default_result_file() -> String {
    "comparison_results.csv".to_string()
}

/// Benchmark run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Cache-line size in bytes.
    #[serde(default = "default_cache_line_size")]
    pub cache_line_size: usize,

    /// Cap on files fetched from each manifest.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Manifest file name inside a model directory.
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,

    /// Result CSV name inside a model directory.
    #[serde(default = "default_result_file")]
    pub result_file: String,

    /// Draw a progress bar on stderr.
    #[serde(default)]
    pub progress: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            cache_line_size: default_cache_line_size(),
            max_iterations: default_max_iterations(),
            manifest_file: default_manifest_file(),
            result_file: default_result_file(),
            progress: false,
        }
    }
}

/// One model to benchmark.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct BenchmarkJob {
    /// Model name.
    pub model: String,
    /// Manifest listing its artifacts.
    pub manifest: PathBuf,
    /// Result CSV to produce.
    pub output: PathBuf,
}

impl BenchmarkJob {
    pub fn new(
        model: impl Into<String>,
        manifest: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            model: model.into(),
            manifest: manifest.into(),
            output: output.into(),
        }
    }

    /// Job for a model directory holding a manifest; the result lands next
    /// to it.
    pub fn in_dir(model: impl Into<String>, dir: &Path, config: &BenchConfig) -> Self {
        Self::new(
            model,
            dir.join(&config.manifest_file),
            dir.join(&config.result_file),
        )
    }
}

/// Finds every `<root>/<model>/<manifest_file>`, sorted by model name.
pub fn discover_jobs(root: &Path, config: &BenchConfig) -> Result<Vec<BenchmarkJob>> {
    let entries = fs::read_dir(root)
        .map_err(|e| Error::io(format!("failed to read {}: {}", root.display(), e)))?;

    let mut jobs = Vec::new();
    for entry in entries {
        let entry = entry?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let model = entry.file_name().to_string_lossy().into_owned();
        let job = BenchmarkJob::in_dir(model, &dir, config);
        if job.manifest.is_file() {
            jobs.push(job);
        } else {
            debug!(dir = %dir.display(), "no manifest, skipping");
        }
    }
    jobs.sort();

    info!(root = %root.display(), models = jobs.len(), "discovered benchmark jobs");
    Ok(jobs)
}

/// Outcome for one model.
#[derive(Debug, Clone)]
pub struct BenchmarkResult {
    pub model: String,
    pub outcome: InvocationOutcome,
}

impl BenchmarkResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// One entry per attempted model, in run order.
    pub results: Vec<BenchmarkResult>,
    /// Models skipped because they appeared more than once.
    pub duplicates: Vec<String>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn succeeded(&self) -> impl Iterator<Item = &BenchmarkResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &BenchmarkResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(BenchmarkResult::is_success)
    }
}

/// Runs the benchmark over many models.
pub struct BenchmarkOrchestrator {
    benchmark: NativeBenchmark,
    config: BenchConfig,
}

impl BenchmarkOrchestrator {
    pub fn new(benchmark: NativeBenchmark, config: BenchConfig) -> Self {
        Self { benchmark, config }
    }

    #[must_use]
    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    #[must_use]
    pub fn benchmark(&self) -> &NativeBenchmark {
        &self.benchmark
    }

    /// Invocation for one job under this run's settings.
    #[must_use]
    pub fn invocation(&self, job: &BenchmarkJob) -> BenchmarkInvocation {
        BenchmarkInvocation {
            manifest: job.manifest.clone(),
            cache_line_size: self.config.cache_line_size,
            max_iterations: self.config.max_iterations,
            output: job.output.clone(),
        }
    }

    /// Benchmarks each job once, in order. Each model runs at most once;
    /// repeats are skipped with a warning. Never fails.
    pub fn run(&self, jobs: &[BenchmarkJob]) -> RunSummary {
        let start = Instant::now();
        let progress = self.progress_bar(jobs.len());
        let mut seen: IndexSet<&str> = IndexSet::with_capacity(jobs.len());
        let mut summary = RunSummary::default();

        for job in jobs {
            if !seen.insert(job.model.as_str()) {
                warn!(model = %job.model, "model listed twice, skipping repeat");
                summary.duplicates.push(job.model.clone());
                if let Some(pb) = &progress {
                    pb.inc(1);
                }
                continue;
            }

            if let Some(pb) = &progress {
                pb.set_message(job.model.clone());
            }
            info!(
                model = %job.model,
                manifest = %job.manifest.display(),
                output = %job.output.display(),
                "benchmarking"
            );

            let outcome = self.benchmark.invoke(&self.invocation(job));
            if outcome.is_success() {
                info!(
                    model = %job.model,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "benchmark finished"
                );
            } else {
                warn!(model = %job.model, status = %outcome.status, "benchmark failed, continuing");
            }

            summary.results.push(BenchmarkResult {
                model: job.model.clone(),
                outcome,
            });
            if let Some(pb) = &progress {
                pb.inc(1);
            }
        }

        if let Some(pb) = &progress {
            pb.finish_with_message("done");
        }

        summary.elapsed = start.elapsed();
        info!(
            succeeded = summary.succeeded().count(),
            failed = summary.failed().count(),
            elapsed_s = summary.elapsed.as_secs_f64(),
            "benchmark run complete"
        );
        summary
    }

    fn progress_bar(&self, len: usize) -> Option<ProgressBar> {
        if !self.config.progress {
            return None;
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Some(pb)
    }
}
