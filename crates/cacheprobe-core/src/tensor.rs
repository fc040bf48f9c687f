//! Host-side tensor buffers.
//!
//! A [`Tensor`] is an owned byte buffer in native element layout (little-endian,
//! row-major) with its dtype and shape. This is exactly what gets dumped to an
//! artifact file: no header, no padding.

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::error::{Error, Result};

/// Element data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 64-bit float.
    F64,
    /// 32-bit float.
    F32,
    /// 16-bit float.
    F16,
    /// BFloat16.
    BF16,
    /// 64-bit signed integer.
    I64,
    /// 32-bit signed integer.
    I32,
    /// 8-bit signed integer.
    I8,
    /// 8-bit unsigned integer.
    U8,
    /// Boolean, one byte per element.
    Bool,
}

impl DType {
    /// Returns the size of one element in bytes.
    #[must_use]
    pub const fn element_size(&self) -> usize {
        match self {
            DType::F64 | DType::I64 => 8,
            DType::F32 | DType::I32 => 4,
            DType::F16 | DType::BF16 => 2,
            DType::I8 | DType::U8 | DType::Bool => 1,
        }
    }

    /// Safetensors dtype tag.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            DType::F64 => "F64",
            DType::F32 => "F32",
            DType::F16 => "F16",
            DType::BF16 => "BF16",
            DType::I64 => "I64",
            DType::I32 => "I32",
            DType::I8 => "I8",
            DType::U8 => "U8",
            DType::Bool => "BOOL",
        }
    }

    /// Parses a safetensors dtype tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "F64" => DType::F64,
            "F32" => DType::F32,
            "F16" => DType::F16,
            "BF16" => DType::BF16,
            "I64" => DType::I64,
            "I32" => DType::I32,
            "I8" => DType::I8,
            "U8" => DType::U8,
            "BOOL" => DType::Bool,
            _ => return None,
        })
    }

    /// Returns true for 8-bit integer types usable as quantized storage.
    #[must_use]
    pub const fn is_quantizable(&self) -> bool {
        matches!(self, DType::I8 | DType::U8)
    }
}

/// Per-tensor affine quantization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    /// Step between adjacent integer levels.
    pub scale: f32,
    /// Integer value that represents real zero.
    pub zero_point: i32,
}

/// Owned tensor buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<u8>,
    quant: Option<QuantParams>,
    device: Device,
}

impl Tensor {
    /// Wraps raw native-layout bytes, validating the length against the shape.
    pub fn from_raw(dtype: DType, shape: Vec<usize>, data: Vec<u8>) -> Result<Self> {
        let Some(expected) = byte_len(dtype, &shape) else {
            return Err(Error::ShapeMismatch {
                dtype: dtype.name(),
                shape,
                expected: usize::MAX,
                actual: data.len(),
            });
        };
        if data.len() != expected {
            return Err(Error::ShapeMismatch {
                dtype: dtype.name(),
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            dtype,
            shape,
            data,
            quant: None,
            device: Device::Cpu,
        })
    }

    /// Builds an F32 tensor from values.
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Result<Self> {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::from_raw(DType::F32, shape, data)
    }

    /// Builds a zero-filled tensor.
    pub fn zeros(dtype: DType, shape: Vec<usize>) -> Result<Self> {
        let Some(len) = byte_len(dtype, &shape) else {
            return Err(Error::ShapeMismatch {
                dtype: dtype.name(),
                shape,
                expected: usize::MAX,
                actual: 0,
            });
        };
        Ok(Self {
            dtype,
            shape,
            data: vec![0; len],
            quant: None,
            device: Device::Cpu,
        })
    }

    /// Element data type.
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Dimensions, outermost first.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements.
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Raw native-layout bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the tensor, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Device the tensor is placed on.
    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Quantization parameters, if this is a quantized tensor.
    #[must_use]
    pub fn quant(&self) -> Option<QuantParams> {
        self.quant
    }

    /// Returns true if the tensor carries quantization parameters.
    #[must_use]
    pub fn is_quantized(&self) -> bool {
        self.quant.is_some()
    }

    /// Returns an independent copy, sharing no storage with `self`.
    #[must_use]
    pub fn detach(&self) -> Self {
        self.clone()
    }

    /// Returns the tensor tagged for `device`.
    #[must_use]
    pub fn to(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Quantizes an F32 tensor to 8-bit storage with per-tensor parameters.
    pub fn quantize_per_tensor(&self, params: QuantParams, dtype: DType) -> Result<Self> {
        if self.dtype != DType::F32 {
            return Err(Error::Unconvertible(format!(
                "can only quantize F32 tensors, got {}",
                self.dtype.name()
            )));
        }
        if !dtype.is_quantizable() {
            return Err(Error::Unconvertible(format!(
                "{} is not a quantized storage type",
                dtype.name()
            )));
        }
        if params.scale <= 0.0 || !params.scale.is_finite() {
            return Err(Error::Unconvertible(format!(
                "invalid quantization scale {}",
                params.scale
            )));
        }

        let (lo, hi) = match dtype {
            DType::I8 => (i8::MIN as i32, i8::MAX as i32),
            _ => (u8::MIN as i32, u8::MAX as i32),
        };
        let data = self
            .to_f32_vec()?
            .into_iter()
            .map(|v| {
                let q = ((v / params.scale).round() as i32 + params.zero_point).clamp(lo, hi);
                match dtype {
                    DType::I8 => (q as i8) as u8,
                    _ => q as u8,
                }
            })
            .collect();

        Ok(Self {
            dtype,
            shape: self.shape.clone(),
            data,
            quant: Some(params),
            device: self.device,
        })
    }

    /// Integer storage of a quantized tensor, without its parameters.
    pub fn int_repr(&self) -> Result<Self> {
        if self.quant.is_none() {
            return Err(Error::Unconvertible(format!(
                "int_repr of non-quantized {} tensor",
                self.dtype.name()
            )));
        }
        Ok(Self {
            dtype: self.dtype,
            shape: self.shape.clone(),
            data: self.data.clone(),
            quant: None,
            device: self.device,
        })
    }

    /// Keeps only the leading `max_channels` entries of dimension 1.
    ///
    /// Tensors of rank < 2, or with no more than `max_channels` channels,
    /// come back as a plain copy.
    #[must_use]
    pub fn narrow_channels(&self, max_channels: usize) -> Self {
        if self.shape.len() < 2 || self.shape[1] <= max_channels {
            return self.detach();
        }

        let channels = self.shape[1];
        let block = self.shape[2..].iter().product::<usize>() * self.dtype.element_size();
        let mut data = Vec::with_capacity(self.shape[0] * max_channels * block);
        for outer in 0..self.shape[0] {
            let start = outer * channels * block;
            data.extend_from_slice(&self.data[start..start + max_channels * block]);
        }

        let mut shape = self.shape.clone();
        shape[1] = max_channels;
        Self {
            dtype: self.dtype,
            shape,
            data,
            quant: self.quant,
            device: self.device,
        }
    }

    /// Converts elements to f32, dequantizing quantized tensors.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        let d = &self.data;
        let values: Vec<f32> = match self.dtype {
            DType::F32 => d
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            DType::F64 => d
                .chunks_exact(8)
                .map(|c| {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(c);
                    f64::from_le_bytes(b) as f32
                })
                .collect(),
            DType::F16 => d
                .chunks_exact(2)
                .map(|c| f16::from_bits(u16::from_le_bytes([c[0], c[1]])).to_f32())
                .collect(),
            DType::BF16 => d
                .chunks_exact(2)
                .map(|c| bf16::from_bits(u16::from_le_bytes([c[0], c[1]])).to_f32())
                .collect(),
            DType::I64 => d
                .chunks_exact(8)
                .map(|c| {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(c);
                    i64::from_le_bytes(b) as f32
                })
                .collect(),
            DType::I32 => d
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32)
                .collect(),
            DType::I8 => d.iter().map(|&b| (b as i8) as f32).collect(),
            DType::U8 | DType::Bool => d.iter().map(|&b| b as f32).collect(),
        };

        Ok(match self.quant {
            Some(q) => values
                .into_iter()
                .map(|v| (v - q.zero_point as f32) * q.scale)
                .collect(),
            None => values,
        })
    }
}

/// Byte length of a `dtype` buffer with `shape`, `None` on overflow.
fn byte_len(dtype: DType, shape: &[usize]) -> Option<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))?
        .checked_mul(dtype.element_size())
}
