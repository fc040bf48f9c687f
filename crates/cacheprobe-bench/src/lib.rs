//! # Cacheprobe Bench
//!
//! Builds the native cache-line compression benchmark, runs it over each
//! model's artifact manifest and reads back the result tables.
//!
//! ```text
//! BuildConfig ──build──▶ NativeBenchmark ──▶ BenchmarkOrchestrator::run(jobs)
//!                                                  │
//!                    <model>/filelist.txt ──▶ <model>/comparison_results.csv
//!                                                  │
//!                                            ResultTable / ModelSummary
//! ```

pub mod native;
pub mod orchestrator;
pub mod results;

pub use native::{
    BenchmarkInvocation, BuildConfig, InvocationOutcome, InvocationStatus, NativeBenchmark,
    DEFAULT_CACHE_LINE_SIZE, DEFAULT_MAX_ITERATIONS,
};
pub use orchestrator::{
    discover_jobs, BenchConfig, BenchmarkJob, BenchmarkOrchestrator, BenchmarkResult, RunSummary,
};
pub use results::{
    algorithm_columns, summarize_dir, ModelSummary, ResultRow, ResultTable, LABEL_COLUMN,
};
