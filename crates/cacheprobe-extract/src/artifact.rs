//! Raw artifact dumps and the `filelist.txt` manifest.
//!
//! Each tensor is written as its native byte layout to a file named exactly
//! after the artifact, with no header or extension. The manifest lists the
//! written paths one per line in insertion order; the native benchmark reads
//! it line by line.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use cacheprobe_core::{DType, Error, Result, Tensor};

/// Manifest file name inside every artifact directory.
pub const MANIFEST_FILE: &str = "filelist.txt";

/// Which session mapping an artifact directory holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Persisted parameters.
    Params,
    /// Captured activations.
    Activations,
}

impl ArtifactKind {
    /// Directory name under `<output_root>/<model>/`.
    #[must_use]
    pub const fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::Params => "params",
            ArtifactKind::Activations => "activations",
        }
    }
}

/// Outcome of one save pass.
#[derive(Debug, Clone, Default)]
pub struct SaveReport {
    /// Directory the artifacts were written to.
    pub dir: PathBuf,
    /// Manifest path.
    pub manifest: PathBuf,
    /// Artifact paths, in manifest order.
    pub written: Vec<PathBuf>,
    /// Artifacts that could not be written, with the reason.
    pub failed: Vec<(String, String)>,
    /// Total artifact bytes written.
    pub bytes_written: u64,
}

impl SaveReport {
    /// Returns true if every artifact was written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ordered list of artifact paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<PathBuf>,
}

impl Manifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an artifact path.
    pub fn push(&mut self, path: impl Into<PathBuf>) {
        self.entries.push(path.into());
    }

    /// Artifact paths in order.
    #[must_use]
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the manifest lists nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newline-joined file contents, no trailing newline.
    #[must_use]
    pub fn contents(&self) -> String {
        self.entries
            .iter()
            .map(|p| p.to_string_lossy())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Writes the manifest atomically.
    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.contents().as_bytes())
            .map_err(|e| Error::io(format!("failed to write manifest {}: {}", path.display(), e)))
    }

    /// Reads a manifest, ignoring blank lines.
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::io(format!("failed to read manifest {}: {}", path.display(), e)))?;
        Ok(Self {
            entries: text
                .lines()
                .map(str::trim_end)
                .filter(|l| !l.is_empty())
                .map(PathBuf::from)
                .collect(),
        })
    }
}

/// Writes every artifact into `dir` followed by the manifest.
///
/// A failure on one artifact is logged and recorded in the report; the
/// artifact is left out of the manifest and the remaining artifacts are still
/// attempted. Failing to create `dir` or to write the manifest is an error.
pub fn save_artifacts(dir: &Path, artifacts: &IndexMap<String, Tensor>) -> Result<SaveReport> {
    fs::create_dir_all(dir)
        .map_err(|e| Error::io(format!("failed to create {}: {}", dir.display(), e)))?;

    let mut report = SaveReport {
        dir: dir.to_path_buf(),
        manifest: dir.join(MANIFEST_FILE),
        ..Default::default()
    };
    let mut manifest = Manifest::new();

    for (name, tensor) in artifacts {
        if !is_plain_file_name(name) {
            warn!(artifact = %name, "artifact name is not a plain file name, skipping");
            report
                .failed
                .push((name.clone(), "not a plain file name".to_string()));
            continue;
        }
        let path = dir.join(name);
        match write_atomic(&path, tensor.as_bytes()) {
            Ok(()) => {
                debug!(artifact = %name, bytes = tensor.as_bytes().len(), "wrote artifact");
                report.bytes_written += tensor.as_bytes().len() as u64;
                manifest.push(&path);
                report.written.push(path);
            }
            Err(e) => {
                warn!(artifact = %name, error = %e, "failed to write artifact, skipping");
                report.failed.push((name.clone(), e.to_string()));
            }
        }
    }

    manifest.write(&report.manifest)?;
    info!(
        "saved {} artifacts ({} bytes) to {}",
        report.written.len(),
        report.bytes_written,
        dir.display()
    );

    Ok(report)
}

/// Reads an artifact back with a known dtype and shape.
pub fn read_artifact(path: &Path, dtype: DType, shape: Vec<usize>) -> Result<Tensor> {
    let data = fs::read(path)
        .map_err(|e| Error::io(format!("failed to read artifact {}: {}", path.display(), e)))?;
    Tensor::from_raw(dtype, shape, data)
}

/// True when `name` is exactly one normal path component.
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

/// Write-to-temp + rename so a reader never sees a partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    // Artifact names may contain dots, so append rather than swap an extension.
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let result = (|| -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        writer.write_all(bytes)?;
        writer.flush()?;
        drop(writer);
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
