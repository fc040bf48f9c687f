//! Run configuration.
//!
//! Groups the extraction, build and benchmark settings so a whole study can
//! be described in one JSON file. Every field has a default; command-line
//! flags override whatever the file sets.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use cacheprobe_bench::{BenchConfig, BuildConfig};
use cacheprobe_core::{Error, Result};
use cacheprobe_extract::ExtractionConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Directory holding one sub-directory per model.
    #[serde(default = "default_extractions_root")]
    pub extractions_root: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub bench: BenchConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            extractions_root: default_extractions_root(),
            log_level: default_log_level(),
            extraction: ExtractionConfig::default(),
            build: BuildConfig::default(),
            bench: BenchConfig::default(),
        }
    }
}

impl ProbeConfig {
    /// Loads a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Rejects settings the benchmark cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.bench.cache_line_size == 0 {
            return Err(Error::Config("cache_line_size must be positive".to_string()));
        }
        if self.extraction.max_channels == 0 {
            return Err(Error::Config("max_channels must be positive".to_string()));
        }
        if self.build.sources.is_empty() {
            return Err(Error::Config("build.sources is empty".to_string()));
        }
        Ok(())
    }

    /// Model directory under the extractions root.
    #[must_use]
    pub fn model_dir(&self, model: &str) -> PathBuf {
        self.extractions_root.join(model)
    }
}

fn default_extractions_root() -> PathBuf {
    PathBuf::from("./extractions")
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("probe.json");
        fs::write(
            &path,
            r#"{
                "extractions_root": "/data/extractions",
                "bench": { "cache_line_size": 32 },
                "extraction": { "model_name": "resnet18", "device": "cpu" }
            }"#,
        )
        .unwrap();

        let config = ProbeConfig::load(&path).unwrap();
        assert_eq!(config.extractions_root, PathBuf::from("/data/extractions"));
        assert_eq!(config.bench.cache_line_size, 32);
        assert_eq!(config.bench.max_iterations, 5000);
        assert_eq!(config.extraction.model_name, "resnet18");
        assert_eq!(config.extraction.max_channels, 9);
        assert_eq!(config.build.compiler, "gcc");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("probe.json");
        fs::write(&path, r#"{ "bench": { "cache_line_size": 0 } }"#).unwrap();
        assert!(matches!(ProbeConfig::load(&path), Err(Error::Config(_))));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ProbeConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_path_uses_defaults() {
        let config = ProbeConfig::load_or_default(None).unwrap();
        assert_eq!(config.model_dir("alexnet"), PathBuf::from("./extractions/alexnet"));
    }
}
