//! Cacheprobe command line.
//!
//! ## Usage
//!
//! ```bash
//! # Dump weights and biases of a checkpoint into ./extractions/resnet18/
//! cacheprobe extract resnet18.safetensors
//!
//! # Build the native benchmark and run it over every model directory
//! cacheprobe bench --csize 64 --maxiter 5000
//!
//! # Average compression ratio per algorithm and model
//! cacheprobe report
//!
//! # All of the above
//! cacheprobe pipeline alexnet.safetensors resnet18.safetensors
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use cacheprobe::pipeline::{
    benchmark_all, default_traces, extract_checkpoint, model_name_for, output_dir,
    prepare_benchmark, render_report, summarize,
};
use cacheprobe::{ProbeConfig, Result};
use cacheprobe_bench::RunSummary;
use cacheprobe_core::Trace;
use cacheprobe_extract::ExtractionConfig;

#[derive(Parser, Debug)]
#[command(name = "cacheprobe")]
#[command(version)]
#[command(about = "Cache-line compressibility study of neural network tensors", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file path (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding one sub-directory per model
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump checkpoint parameters and write the manifest
    Extract {
        /// Path to a .safetensors checkpoint
        checkpoint: PathBuf,

        /// Output model name (defaults to the checkpoint file stem)
        #[arg(short, long)]
        model: Option<String>,

        #[command(flatten)]
        traces: TraceArgs,

        /// Output directory (defaults to <root>/<model>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build the native benchmark and run it for every model directory
    Bench {
        #[command(flatten)]
        bench: BenchArgs,
    },

    /// Summarize result tables
    Report,

    /// Extract each checkpoint, benchmark, then report
    Pipeline {
        /// Paths to .safetensors checkpoints
        #[arg(required = true)]
        checkpoints: Vec<PathBuf>,

        #[command(flatten)]
        traces: TraceArgs,

        #[command(flatten)]
        bench: BenchArgs,
    },
}

#[derive(Args, Debug)]
struct TraceArgs {
    /// Parameter trace: weight, bias, or any identifier substring (repeatable)
    #[arg(short, long = "trace")]
    traces: Vec<String>,
}

impl TraceArgs {
    fn resolve(&self) -> Vec<Trace> {
        if self.traces.is_empty() {
            default_traces()
        } else {
            self.traces.iter().map(|t| Trace::parse(t)).collect()
        }
    }
}

#[derive(Args, Debug)]
struct BenchArgs {
    /// Use a prebuilt benchmark executable instead of compiling one
    #[arg(long)]
    executable: Option<PathBuf>,

    /// Cache line size in bytes
    #[arg(long = "csize")]
    cache_line_size: Option<usize>,

    /// Max iteration of the file fetch
    #[arg(long = "maxiter")]
    max_iterations: Option<usize>,

    /// Show a progress bar
    #[arg(long)]
    progress: bool,
}

impl BenchArgs {
    fn apply(&self, config: &mut ProbeConfig) {
        if let Some(csize) = self.cache_line_size {
            config.bench.cache_line_size = csize;
        }
        if let Some(maxiter) = self.max_iterations {
            config.bench.max_iterations = maxiter;
        }
        if self.progress {
            config.bench.progress = true;
        }
    }
}

fn init_logging(level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to set tracing subscriber: {e}");
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match ProbeConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(root) = &cli.root {
        config.extractions_root = root.clone();
    }
    init_logging(&config.log_level);

    let result = match &cli.command {
        Command::Extract {
            checkpoint,
            model,
            traces,
            output,
        } => extract_command(
            &config,
            checkpoint,
            model.as_deref(),
            &traces.resolve(),
            output.as_deref(),
        ),
        Command::Bench { bench } => {
            bench.apply(&mut config);
            config
                .validate()
                .and_then(|()| bench_command(&config, bench.executable.as_deref()).map(|_| ()))
        }
        Command::Report => report_command(&config),
        Command::Pipeline {
            checkpoints,
            traces,
            bench,
        } => {
            bench.apply(&mut config);
            config.validate().and_then(|()| {
                pipeline_command(&config, checkpoints, &traces.resolve(), bench.executable.as_deref())
            })
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(category = e.category(), "{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn extract_command(
    config: &ProbeConfig,
    checkpoint: &Path,
    model: Option<&str>,
    traces: &[Trace],
    output: Option<&Path>,
) -> Result<()> {
    let model = match model {
        Some(name) => name.to_string(),
        None => model_name_for(checkpoint)?,
    };
    let extraction = ExtractionConfig {
        model_name: model.clone(),
        ..config.extraction.clone()
    };
    let out_dir = output_dir(config, &model, output);

    let report = extract_checkpoint(checkpoint, traces, &extraction, &out_dir)?;
    println!(
        "{}: {} artifacts ({} bytes), manifest {}",
        model,
        report.written.len(),
        report.bytes_written,
        report.manifest.display()
    );
    for (name, reason) in &report.failed {
        println!("  failed {name}: {reason}");
    }
    Ok(())
}

fn bench_command(config: &ProbeConfig, executable: Option<&Path>) -> Result<RunSummary> {
    let benchmark = prepare_benchmark(config, executable)?;
    info!(executable = %benchmark.executable().display(), "benchmark ready");

    let summary = benchmark_all(config, benchmark)?;
    for result in &summary.results {
        println!("{:<32} {}", result.model, result.outcome.status);
    }
    for model in &summary.duplicates {
        println!("{model:<32} skipped (duplicate)");
    }
    Ok(summary)
}

fn report_command(config: &ProbeConfig) -> Result<()> {
    let summaries = summarize(config)?;
    if summaries.is_empty() {
        println!(
            "no result tables under {}",
            config.extractions_root.display()
        );
        return Ok(());
    }
    print!("{}", render_report(&summaries));
    Ok(())
}

fn pipeline_command(
    config: &ProbeConfig,
    checkpoints: &[PathBuf],
    traces: &[Trace],
    executable: Option<&Path>,
) -> Result<()> {
    // Build before extracting; a build failure aborts the whole run.
    let benchmark = prepare_benchmark(config, executable)?;

    let mut skipped = Vec::new();
    for checkpoint in checkpoints {
        let extracted = model_name_for(checkpoint)
            .and_then(|model| extract_command(config, checkpoint, Some(&model), traces, None));
        if let Err(e) = extracted {
            warn!(
                checkpoint = %checkpoint.display(),
                category = e.category(),
                error = %e,
                "extraction failed, continuing with the next checkpoint"
            );
            skipped.push((checkpoint, e));
        }
    }

    let summary = benchmark_all(config, benchmark)?;
    for result in summary.failed() {
        println!("{:<32} {}", result.model, result.outcome.status);
    }
    for (checkpoint, e) in &skipped {
        println!("{:<32} extraction failed: {e}", checkpoint.display());
    }
    report_command(config)
}
