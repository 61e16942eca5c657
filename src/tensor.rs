use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CorrelationError, Result};
use crate::storage::Storage;

/// Dense channel-last feature tensor indexed by (batch, height, width, channel).
#[derive(Clone, PartialEq)]
pub struct Tensor {
    storage: Storage,
    shape: [usize; 4],
}

#[derive(Serialize, Deserialize)]
struct TensorSerde {
    data: Vec<f32>,
    shape: Vec<usize>,
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("numel", &self.numel())
            .finish()
    }
}

impl Serialize for Tensor {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let payload = TensorSerde {
            data: self.storage.data.clone(),
            shape: self.shape.to_vec(),
        };
        payload.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Tensor {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let payload = TensorSerde::deserialize(deserializer)?;
        let shape: [usize; 4] = payload.shape.as_slice().try_into().map_err(|_| {
            D::Error::custom(format!(
                "expected a rank-4 NHWC shape, got {:?}",
                payload.shape
            ))
        })?;
        Tensor::try_from_vec(payload.data, shape).map_err(|err| D::Error::custom(err.to_string()))
    }
}

impl Tensor {
    pub fn from_vec(v: Vec<f32>, shape: [usize; 4]) -> Self {
        Self::try_from_vec(v, shape).expect("from_vec: data length must match shape")
    }

    pub fn try_from_vec(v: Vec<f32>, shape: [usize; 4]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if v.len() != numel {
            return Err(CorrelationError::InvalidShape {
                op: "tensor.from_vec",
                shape: shape.to_vec(),
                msg: format!("data length {} does not match numel {}", v.len(), numel),
            });
        }
        Ok(Self {
            storage: Storage { data: v },
            shape,
        })
    }

    pub fn zeros(shape: [usize; 4]) -> Self {
        Self {
            storage: Storage::zeros(shape.iter().product()),
            shape,
        }
    }

    pub fn full(shape: [usize; 4], value: f32) -> Self {
        Self {
            storage: Storage {
                data: vec![value; shape.iter().product()],
            },
            shape,
        }
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn batch(&self) -> usize {
        self.shape[0]
    }

    pub fn height(&self) -> usize {
        self.shape[1]
    }

    pub fn width(&self) -> usize {
        self.shape[2]
    }

    pub fn channels(&self) -> usize {
        self.shape[3]
    }

    pub fn numel(&self) -> usize {
        self.storage.len()
    }

    pub fn data(&self) -> &[f32] {
        self.storage.as_slice()
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        self.storage.as_mut_slice()
    }

    /// Flat offset of element (n, y, x, c).
    #[inline]
    pub fn offset(&self, n: usize, y: usize, x: usize, c: usize) -> usize {
        nhwc_offset(self.shape, n, y, x, c)
    }

    pub fn get(&self, n: usize, y: usize, x: usize, c: usize) -> f32 {
        self.storage.data[self.offset(n, y, x, c)]
    }

    pub fn ensure_shape(&self, expected: [usize; 4], op: &'static str) -> Result<()> {
        if self.shape != expected {
            return Err(CorrelationError::ShapeMismatch {
                op,
                lhs: self.shape.to_vec(),
                rhs: expected.to_vec(),
            });
        }
        Ok(())
    }
}

#[inline]
pub(crate) fn nhwc_offset(shape: [usize; 4], n: usize, y: usize, x: usize, c: usize) -> usize {
    ((n * shape[1] + y) * shape[2] + x) * shape[3] + c
}
