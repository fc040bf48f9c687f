//! Error types for extraction, serialization and benchmarking.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for cacheprobe operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Cacheprobe error types.
#[derive(Debug, Error)]
pub enum Error {
    /// A tensor could not be fetched from its source.
    #[error("tensor '{name}' unavailable: {reason}")]
    TensorUnavailable { name: String, reason: String },

    /// Tensor bytes do not agree with the declared dtype and shape.
    #[error("shape mismatch: {dtype} {shape:?} needs {expected} bytes, got {actual}")]
    ShapeMismatch {
        dtype: &'static str,
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    /// A tensor cannot be converted to the requested representation.
    #[error("unconvertible tensor: {0}")]
    Unconvertible(String),

    /// No submodule with this path exists on the model.
    #[error("unknown submodule: {0}")]
    UnknownSubmodule(String),

    /// No interception point is registered under this name.
    #[error("no hook registered under '{0}'")]
    UnknownHook(String),

    /// The model failed while evaluating a forward pass.
    #[error("forward pass failed: {0}")]
    Forward(String),

    /// Graph interpretation failed.
    #[error("graph error at node '{node}': {message}")]
    Graph { node: String, message: String },

    /// Input file is malformed.
    #[error("corrupted {what}: {message}")]
    Corrupted { what: &'static str, message: String },

    /// The native benchmark could not be built.
    #[error("benchmark build failed ({command}): {message}")]
    Build { command: String, message: String },

    /// A benchmark result table could not be parsed.
    #[error("invalid result table {}: {}", .path.display(), .message)]
    InvalidResult { path: PathBuf, message: String },

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error from the filesystem or a child process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a tensor-unavailable error.
    pub fn unavailable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::TensorUnavailable {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a corrupted-input error.
    pub fn corrupted(what: &'static str, message: impl Into<String>) -> Self {
        Error::Corrupted {
            what,
            message: message.into(),
        }
    }

    /// Create a graph interpretation error.
    pub fn graph(node: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Graph {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Create an I/O error with a custom message.
    pub fn io(message: impl Into<String>) -> Self {
        Error::Io(std::io::Error::other(message.into()))
    }

    /// Whether the pipeline should abort the whole run on this error.
    ///
    /// Only a failed benchmark build is fatal; everything else is scoped to
    /// one artifact or one model.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Build { .. })
    }

    /// Get error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Error::TensorUnavailable { .. } => "tensor_unavailable",
            Error::ShapeMismatch { .. } => "shape_mismatch",
            Error::Unconvertible(_) => "unconvertible",
            Error::UnknownSubmodule(_) => "unknown_submodule",
            Error::UnknownHook(_) => "unknown_hook",
            Error::Forward(_) => "forward",
            Error::Graph { .. } => "graph",
            Error::Corrupted { .. } => "corrupted",
            Error::Build { .. } => "build",
            Error::InvalidResult { .. } => "invalid_result",
            Error::Config(_) => "config",
            Error::Io(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_build_is_fatal() {
        let build = Error::Build {
            command: "gcc".into(),
            message: "exit status 1".into(),
        };
        assert!(build.is_fatal());
        assert!(!Error::unavailable("fc.weight", "meta tensor").is_fatal());
        assert!(!Error::io("disk full").is_fatal());
    }

    #[test]
    fn test_display_includes_name() {
        let err = Error::unavailable("model_fc_weight", "not materialized");
        assert_eq!(
            err.to_string(),
            "tensor 'model_fc_weight' unavailable: not materialized"
        );
        assert_eq!(err.category(), "tensor_unavailable");
    }
}
