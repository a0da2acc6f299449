use crate::error::{ProtocolError, Result};

/// Maximum number of tensor dimensions accepted from the wire.
pub const MAX_NDIMS: usize = 32;

/// A dense `f32` tensor in row-major order.
///
/// Tensors decoded from the wire are not checked on construction; the server
/// validates them against the classifier's input shape before any query is
/// charged, so an inconsistent probe is reported as a shape mismatch rather
/// than as a codec failure.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Build a tensor, checking that `data` fills `shape` exactly.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let tensor = Self { shape, data };
        if !tensor.is_consistent() {
            return Err(ProtocolError::ShapeMismatch {
                expected: tensor.shape,
                actual: vec![tensor.data.len()],
            });
        }
        Ok(tensor)
    }

    /// One-dimensional tensor over `data`.
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Zero-filled tensor. Shapes whose element count overflows yield an empty buffer.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let count = element_count(&shape).unwrap_or(0);
        Self {
            shape,
            data: vec![0.0; count],
        }
    }

    /// Unchecked constructor used by the message decoder.
    pub(crate) fn from_raw_parts(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Same shape, new contents. Fails if `data` does not fill the shape.
    pub fn with_data(&self, data: Vec<f32>) -> Result<Self> {
        Self::new(self.shape.clone(), data)
    }

    /// Whether the buffer length matches the product of the shape.
    pub fn is_consistent(&self) -> bool {
        self.shape.len() <= MAX_NDIMS && element_count(&self.shape) == Some(self.data.len())
    }

    /// Reject tensors that do not have exactly the `expected` shape.
    pub fn check_shape(&self, expected: &[usize]) -> Result<()> {
        if self.shape != expected {
            return Err(ProtocolError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: self.shape.clone(),
            });
        }
        if !self.is_consistent() {
            return Err(ProtocolError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: vec![self.data.len()],
            });
        }
        Ok(())
    }
}

/// Checked product of the dimensions.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}
