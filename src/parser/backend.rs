// src/parser/backend.rs
//
// Destination capability for decoded fields. The parser only allocates and
// writes through `TensorBackend`; `CpuBackend` is the host-memory target.

use bytes::Bytes;
use ndarray::{ArrayD, IxDyn};
use std::collections::BTreeMap;
use std::fmt;

use super::feature::{DType, FeatureValue};

/// Where decoded tensors live.
pub trait TensorBackend: Send + Sync + 'static {
    type Tensor: Send + fmt::Debug + 'static;

    /// Allocate an uninitialised-equivalent tensor of `dtype` with `shape`.
    fn allocate(&self, dtype: DType, shape: &[usize]) -> Self::Tensor;

    /// Fill `tensor` row-major. The caller guarantees `values` has the tensor's
    /// dtype and exactly as many elements as its shape holds.
    fn write(&self, tensor: &mut Self::Tensor, values: FeatureValue);
}

/// Host tensor produced by [`CpuBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum HostTensor {
    Bytes(ArrayD<Bytes>),
    Int64(ArrayD<i64>),
    Float32(ArrayD<f32>),
}

impl HostTensor {
    pub fn dtype(&self) -> DType {
        match self {
            HostTensor::Bytes(_) => DType::Bytes,
            HostTensor::Int64(_) => DType::Int64,
            HostTensor::Float32(_) => DType::Float32,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            HostTensor::Bytes(a) => a.shape(),
            HostTensor::Int64(a) => a.shape(),
            HostTensor::Float32(a) => a.shape(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            HostTensor::Bytes(a) => a.len(),
            HostTensor::Int64(a) => a.len(),
            HostTensor::Float32(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> Option<&ArrayD<Bytes>> {
        match self {
            HostTensor::Bytes(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&ArrayD<i64>> {
        match self {
            HostTensor::Int64(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            HostTensor::Float32(a) => Some(a),
            _ => None,
        }
    }
}

/// Allocates plain host memory through `ndarray`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

fn fill<T>(dst: &mut ArrayD<T>, src: Vec<T>) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter_mut().zip(src) {
        *d = s;
    }
}

impl TensorBackend for CpuBackend {
    type Tensor = HostTensor;

    fn allocate(&self, dtype: DType, shape: &[usize]) -> HostTensor {
        let dim = IxDyn(shape);
        match dtype {
            DType::Bytes => HostTensor::Bytes(ArrayD::from_elem(dim, Bytes::new())),
            DType::Int64 => HostTensor::Int64(ArrayD::zeros(dim)),
            DType::Float32 => HostTensor::Float32(ArrayD::zeros(dim)),
        }
    }

    fn write(&self, tensor: &mut HostTensor, values: FeatureValue) {
        match (tensor, values) {
            (HostTensor::Bytes(dst), FeatureValue::Bytes(src)) => fill(dst, src),
            (HostTensor::Int64(dst), FeatureValue::Int64(src)) => fill(dst, src),
            (HostTensor::Float32(dst), FeatureValue::Float32(src)) => fill(dst, src),
            (t, v) => debug_assert!(
                false,
                "write of {} values into {} tensor",
                v.dtype().name(),
                t.dtype().name()
            ),
        }
    }
}

/// One decoded record: named tensors plus the index position it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample<T = HostTensor> {
    /// Position of the source record in the canonical index order.
    pub record: usize,
    fields: BTreeMap<String, T>,
}

impl<T> Sample<T> {
    pub fn new(record: usize) -> Self {
        Self { record, fields: BTreeMap::new() }
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: T) {
        self.fields.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_fields(self) -> BTreeMap<String, T> {
        self.fields
    }
}
