//! Safetensors checkpoints as a parameter source.
//!
//! The file is memory-mapped; tensor bytes are copied out only when a
//! parameter is fetched. Identifiers are listed in data-offset order, which
//! is the order the writer laid the tensors out in.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::Deserialize;
use tracing::debug;

use cacheprobe_core::{DType, Error, Result, Tensor};

use crate::model::ParameterSource;

/// Metadata for a single tensor in the file.
#[derive(Debug, Clone)]
pub struct TensorEntry {
    /// Tensor name.
    pub name: String,
    /// Raw dtype tag as written.
    pub dtype_tag: String,
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Offset in data section (relative to data start).
    pub offset: usize,
    /// Size in bytes.
    pub size: usize,
}

impl TensorEntry {
    /// Parsed dtype, if supported.
    #[must_use]
    pub fn dtype(&self) -> Option<DType> {
        DType::from_tag(&self.dtype_tag)
    }
}

/// Raw tensor info from the JSON header.
#[derive(Debug, Deserialize)]
struct RawTensorInfo {
    dtype: Option<String>,
    shape: Option<Vec<usize>>,
    data_offsets: Option<(usize, usize)>,
}

/// Memory-mapped safetensors checkpoint.
pub struct SafetensorsModel {
    path: PathBuf,
    mmap: Mmap,
    tensors: Vec<TensorEntry>,
    name_index: HashMap<String, usize>,
    data_offset: usize,
}

impl SafetensorsModel {
    /// Opens and indexes a `.safetensors` file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let file = File::open(path)
            .map_err(|e| Error::io(format!("failed to open {}: {}", path.display(), e)))?;

        // SAFETY: the mapping is read-only and the file is not modified while mapped.
        let mmap = unsafe {
            Mmap::map(&file)
                .map_err(|e| Error::io(format!("failed to mmap {}: {}", path.display(), e)))?
        };

        if mmap.len() < 8 {
            return Err(Error::corrupted("safetensors", "file too small for header"));
        }

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&mmap[0..8]);
        let header_len = u64::from_le_bytes(len_bytes) as usize;
        let header_end = 8usize
            .checked_add(header_len)
            .filter(|&end| end <= mmap.len())
            .ok_or_else(|| Error::corrupted("safetensors", "truncated before header end"))?;

        let header_json = std::str::from_utf8(&mmap[8..header_end])
            .map_err(|e| Error::corrupted("safetensors", format!("invalid UTF-8 in header: {e}")))?;

        let raw_tensors: HashMap<String, serde_json::Value> = serde_json::from_str(header_json)
            .map_err(|e| Error::corrupted("safetensors", format!("invalid JSON header: {e}")))?;

        let mut tensors: Vec<TensorEntry> = raw_tensors
            .into_iter()
            .filter(|(name, _)| name != "__metadata__")
            .filter_map(|(name, value)| {
                let info: RawTensorInfo = serde_json::from_value(value).ok()?;
                let (start, end) = info.data_offsets?;
                Some(TensorEntry {
                    name,
                    dtype_tag: info.dtype?,
                    shape: info.shape?,
                    offset: start,
                    size: end.checked_sub(start)?,
                })
            })
            .collect();

        // Layout order; name breaks ties between zero-sized tensors.
        tensors.sort_by(|a, b| a.offset.cmp(&b.offset).then_with(|| a.name.cmp(&b.name)));

        let name_index = tensors
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();

        debug!(path = %path.display(), tensors = tensors.len(), "opened safetensors");

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            tensors,
            name_index,
            data_offset: header_end,
        })
    }

    /// Path of the mapped file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tensor entries in layout order.
    pub fn tensors(&self) -> impl Iterator<Item = &TensorEntry> {
        self.tensors.iter()
    }

    /// Number of tensors in the file.
    #[must_use]
    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    /// Gets a tensor entry by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TensorEntry> {
        self.name_index.get(name).map(|&i| &self.tensors[i])
    }

    /// Raw tensor bytes, borrowed from the mapping.
    pub fn tensor_bytes(&self, name: &str) -> Result<&[u8]> {
        let entry = self
            .get(name)
            .ok_or_else(|| Error::unavailable(name, "not present in file"))?;

        let range = self
            .data_offset
            .checked_add(entry.offset)
            .and_then(|start| Some((start, start.checked_add(entry.size)?)))
            .filter(|&(_, end)| end <= self.mmap.len());
        match range {
            Some((start, end)) => Ok(&self.mmap[start..end]),
            None => Err(Error::unavailable(name, "extends past end of file")),
        }
    }
}

impl ParameterSource for SafetensorsModel {
    fn parameter_names(&self) -> Vec<String> {
        self.tensors.iter().map(|t| t.name.clone()).collect()
    }

    fn parameter(&self, name: &str) -> Result<Tensor> {
        let entry = self
            .get(name)
            .ok_or_else(|| Error::unavailable(name, "not present in file"))?;
        let dtype = entry
            .dtype()
            .ok_or_else(|| Error::unavailable(name, format!("unsupported dtype {}", entry.dtype_tag)))?;

        let bytes = self.tensor_bytes(name)?;
        Tensor::from_raw(dtype, entry.shape.clone(), bytes.to_vec())
            .map_err(|e| Error::unavailable(name, e.to_string()))
    }
}

/// Writes tensors to a `.safetensors` file in the given order.
pub fn write_safetensors(path: &Path, tensors: &[(&str, &Tensor)]) -> Result<()> {
    let mut header = serde_json::Map::new();
    let mut offset = 0usize;
    for (name, tensor) in tensors {
        let len = tensor.as_bytes().len();
        header.insert(
            (*name).to_string(),
            serde_json::json!({
                "dtype": tensor.dtype().name(),
                "shape": tensor.shape(),
                "data_offsets": [offset, offset + len],
            }),
        );
        offset += len;
    }

    let mut header_bytes = serde_json::to_vec(&serde_json::Value::Object(header))
        .map_err(|e| Error::io(format!("failed to encode header: {e}")))?;
    // Pad so the data section starts 8-byte aligned.
    while header_bytes.len() % 8 != 0 {
        header_bytes.push(b' ');
    }

    let mut out = Vec::with_capacity(8 + header_bytes.len() + offset);
    out.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(&header_bytes);
    for (_, tensor) in tensors {
        out.extend_from_slice(tensor.as_bytes());
    }

    fs::write(path, out)
        .map_err(|e| Error::io(format!("failed to write {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout_order_not_name_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.safetensors");
        let w = Tensor::from_f32(vec![2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = Tensor::from_f32(vec![2], &[0.5, -0.5]).unwrap();
        write_safetensors(&path, &[("z.weight", &w), ("a.bias", &b)]).unwrap();

        let model = SafetensorsModel::open(&path).unwrap();
        assert_eq!(model.parameter_names(), vec!["z.weight", "a.bias"]);
        assert_eq!(model.parameter("z.weight").unwrap(), w);
        assert_eq!(model.parameter("a.bias").unwrap(), b);
    }

    #[test]
    fn test_unsupported_dtype_is_unavailable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.safetensors");
        let header = br#"{"x":{"dtype":"F8_E4M3","shape":[2],"data_offsets":[0,2]}}"#;
        let mut data = (header.len() as u64).to_le_bytes().to_vec();
        data.extend_from_slice(header);
        data.extend_from_slice(&[0, 0]);
        fs::write(&path, data).unwrap();

        let model = SafetensorsModel::open(&path).unwrap();
        assert!(matches!(
            model.parameter("x"),
            Err(Error::TensorUnavailable { .. })
        ));
    }

    #[test]
    fn test_truncated_header_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.safetensors");
        let mut data = 1000u64.to_le_bytes().to_vec();
        data.extend_from_slice(b"{}");
        fs::write(&path, data).unwrap();

        assert!(matches!(
            SafetensorsModel::open(&path),
            Err(Error::Corrupted { .. })
        ));
    }

    #[test]
    fn test_overflowing_entries_are_skipped() {
        use crate::session::{ExtractionConfig, ExtractionSession};
        use cacheprobe_core::{Device, Trace};

        let dir = tempdir().unwrap();
        let path = dir.path().join("hostile.safetensors");
        let header = format!(
            r#"{{"a.weight":{{"dtype":"U8","shape":[1],"data_offsets":[{},{}]}},"b.weight":{{"dtype":"F32","shape":[{},4],"data_offsets":[0,16]}},"c.weight":{{"dtype":"U8","shape":[2],"data_offsets":[16,18]}}}}"#,
            u64::MAX - 1,
            u64::MAX,
            u64::MAX
        );
        let mut data = (header.len() as u64).to_le_bytes().to_vec();
        data.extend_from_slice(header.as_bytes());
        data.extend_from_slice(&[0u8; 16]);
        data.extend_from_slice(&[7, 9]);
        fs::write(&path, data).unwrap();

        let model = SafetensorsModel::open(&path).unwrap();
        assert!(matches!(
            model.tensor_bytes("a.weight"),
            Err(Error::TensorUnavailable { .. })
        ));
        assert!(matches!(
            model.parameter("b.weight"),
            Err(Error::TensorUnavailable { .. })
        ));

        let mut session = ExtractionSession::new(ExtractionConfig {
            device: Some(Device::Cpu),
            ..ExtractionConfig::for_model("h")
        });
        session.add_trace(Trace::Weight);
        assert_eq!(session.extract_params(&model), 1);
        assert_eq!(session.params()["h_c_weight"].as_bytes(), &[7, 9]);
    }
}
