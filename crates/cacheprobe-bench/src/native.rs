//! Native benchmark executable: one-time build and per-model invocation.
//!
//! [`NativeBenchmark`] only exists once an executable is available, either
//! compiled from the C sources or adopted from disk. Compiling is the only
//! fatal step; invocations report their outcome and never fail.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use cacheprobe_core::{Error, Result};

/// Default cache-line size in bytes.
pub const DEFAULT_CACHE_LINE_SIZE: usize = 64;

/// Default cap on files fetched from the manifest.
pub const DEFAULT_MAX_ITERATIONS: usize = 5000;

fn default_compiler() -> String {
    "gcc".to_string()
}

fn default_source_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_sources() -> Vec<String> {
    ["tb_csv.c", "compression.c", "bdi_zerovec.c"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_flags() -> Vec<String> {
    vec!["-lm".to_string(), "-Wformat=0".to_string()]
}

fn default_executable() -> String {
    "tb_csv".to_string()
}

fn default_build_dir() -> PathBuf {
    PathBuf::from(".")
}

/// How to compile the benchmark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// C compiler driver.
    #[serde(default = "default_compiler")]
    pub compiler: String,

    /// Directory holding the C sources.
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// Translation units, relative to `source_dir`.
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,

    /// Trailing compiler and linker flags.
    #[serde(default = "default_flags")]
    pub flags: Vec<String>,

    /// Executable stem; the platform suffix is appended.
    #[serde(default = "default_executable")]
    pub executable: String,

    /// Output directory for the executable.
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            compiler: default_compiler(),
            source_dir: default_source_dir(),
            sources: default_sources(),
            flags: default_flags(),
            executable: default_executable(),
            build_dir: default_build_dir(),
        }
    }
}

impl BuildConfig {
    /// Where the executable lands: `tb_csv` on Unix, `tb_csv.exe` on Windows.
    #[must_use]
    pub fn executable_path(&self) -> PathBuf {
        self.build_dir.join(format!(
            "{}{}",
            self.executable,
            std::env::consts::EXE_SUFFIX
        ))
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.compiler);
        cmd.arg("-o").arg(self.executable_path());
        cmd.args(self.sources.iter().map(|s| self.source_dir.join(s)));
        cmd.args(&self.flags);
        cmd
    }

    /// The compile command as a shell-like string, for logs and errors.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut parts = vec![
            self.compiler.clone(),
            "-o".to_string(),
            self.executable_path().display().to_string(),
        ];
        parts.extend(
            self.sources
                .iter()
                .map(|s| self.source_dir.join(s).display().to_string()),
        );
        parts.extend(self.flags.iter().cloned());
        parts.join(" ")
    }
}

/// One benchmark run over a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkInvocation {
    /// Manifest listing the artifact files.
    pub manifest: PathBuf,
    /// Cache-line size in bytes.
    pub cache_line_size: usize,
    /// Cap on files fetched from the manifest.
    pub max_iterations: usize,
    /// Result CSV to produce.
    pub output: PathBuf,
}

impl BenchmarkInvocation {
    /// Invocation with the default cache-line size and iteration cap.
    pub fn new(manifest: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            manifest: manifest.into(),
            cache_line_size: DEFAULT_CACHE_LINE_SIZE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            output: output.into(),
        }
    }

    /// Positional arguments: manifest, cache-line size, max iterations, output.
    #[must_use]
    pub fn args(&self) -> [OsString; 4] {
        [
            self.manifest.clone().into_os_string(),
            self.cache_line_size.to_string().into(),
            self.max_iterations.to_string().into(),
            self.output.clone().into_os_string(),
        ]
    }
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationStatus {
    /// Exit code 0; the result CSV should exist.
    Succeeded,
    /// Nonzero exit, or killed by a signal when `code` is `None`.
    Failed {
        code: Option<i32>,
        stderr: String,
    },
    /// The process could not be started.
    SpawnFailed(String),
}

impl InvocationStatus {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationStatus::Succeeded)
    }
}

impl fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationStatus::Succeeded => write!(f, "ok"),
            InvocationStatus::Failed { code: Some(code), .. } => write!(f, "exit code {code}"),
            InvocationStatus::Failed { code: None, .. } => write!(f, "terminated by signal"),
            InvocationStatus::SpawnFailed(reason) => write!(f, "failed to start: {reason}"),
        }
    }
}

/// Outcome of one invocation.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub invocation: BenchmarkInvocation,
    pub status: InvocationStatus,
    pub elapsed: Duration,
}

impl InvocationOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// A benchmark executable ready to run.
#[derive(Debug, Clone)]
pub struct NativeBenchmark {
    executable: PathBuf,
}

impl NativeBenchmark {
    /// Compiles the benchmark. Any failure here is fatal to the run.
    pub fn build(config: &BuildConfig) -> Result<Self> {
        let command_line = config.command_line();
        let build_err = |message: String| Error::Build {
            command: command_line.clone(),
            message,
        };

        std::fs::create_dir_all(&config.build_dir).map_err(|e| {
            build_err(format!(
                "failed to create build dir {}: {}",
                config.build_dir.display(),
                e
            ))
        })?;

        info!(command = %command_line, "building native benchmark");
        let start = Instant::now();
        let output = config
            .command()
            .output()
            .map_err(|e| build_err(format!("failed to execute {}: {}", config.compiler, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(status = %output.status, "native benchmark build failed");
            return Err(build_err(format!("{}: {}", output.status, stderr)));
        }

        let executable = config.executable_path();
        if !executable.is_file() {
            return Err(build_err(format!(
                "compiler succeeded but {} is missing",
                executable.display()
            )));
        }

        info!(
            executable = %executable.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "native benchmark built"
        );
        Ok(Self { executable })
    }

    /// Adopts an already built executable.
    pub fn from_executable(path: impl Into<PathBuf>) -> Result<Self> {
        let executable = path.into();
        if !executable.is_file() {
            return Err(Error::Build {
                command: executable.display().to_string(),
                message: "executable not found".to_string(),
            });
        }
        Ok(Self { executable })
    }

    /// Path of the executable.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Runs the executable once and waits for it. Never fails: spawn errors
    /// and nonzero exits are reported in the outcome.
    pub fn invoke(&self, invocation: &BenchmarkInvocation) -> InvocationOutcome {
        debug!(
            executable = %self.executable.display(),
            manifest = %invocation.manifest.display(),
            cache_line_size = invocation.cache_line_size,
            max_iterations = invocation.max_iterations,
            output = %invocation.output.display(),
            "invoking benchmark"
        );

        let start = Instant::now();
        let status = match Command::new(&self.executable)
            .args(invocation.args())
            .output()
        {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                if !stdout.trim().is_empty() {
                    debug!(output = %stdout.trim_end(), "benchmark stdout");
                }
                InvocationStatus::Succeeded
            }
            Ok(output) => InvocationStatus::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            },
            Err(e) => InvocationStatus::SpawnFailed(e.to_string()),
        };

        if !status.is_success() {
            warn!(
                manifest = %invocation.manifest.display(),
                status = %status,
                "benchmark invocation failed"
            );
        }

        InvocationOutcome {
            invocation: invocation.clone(),
            status,
            elapsed: start.elapsed(),
        }
    }
}
