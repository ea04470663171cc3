// src/parser/feature.rs
//
// Declared schema for decoding records: one `FieldSpec` per named field,
// collected into an immutable `FeatureSpec`.

use bytes::Bytes;
use std::collections::HashMap;

use crate::error::{ReaderError, Result};

/// Element type of a decoded field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bytes,
    Int64,
    Float32,
}

impl DType {
    pub fn name(self) -> &'static str {
        match self {
            DType::Bytes => "bytes",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
        }
    }
}

impl std::str::FromStr for DType {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bytes" | "string" | "byte-string" => Ok(DType::Bytes),
            "int64" | "i64" => Ok(DType::Int64),
            "float32" | "f32" | "float" => Ok(DType::Float32),
            other => Err(ReaderError::InvalidConfig(format!("unknown dtype '{}'", other))),
        }
    }
}

/// Shape of a decoded field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// Exactly one value; produces a 0-d tensor.
    Scalar,
    /// Exactly `product(dims)` values laid out row-major.
    Fixed(Vec<usize>),
    /// Any number of values up to `max_len`; produces a 1-d tensor.
    Variable { max_len: Option<usize> },
}

impl Shape {
    /// Number of values a fixed shape holds; `None` for variable length.
    pub fn fixed_len(&self) -> Option<usize> {
        match self {
            Shape::Scalar => Some(1),
            Shape::Fixed(dims) => Some(dims.iter().product()),
            Shape::Variable { .. } => None,
        }
    }
}

/// A list of values of one dtype, as encoded in a record or given as a default.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Bytes(Vec<Bytes>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
}

impl FeatureValue {
    pub fn dtype(&self) -> DType {
        match self {
            FeatureValue::Bytes(_) => DType::Bytes,
            FeatureValue::Int64(_) => DType::Int64,
            FeatureValue::Float32(_) => DType::Float32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FeatureValue::Bytes(v) => v.len(),
            FeatureValue::Int64(v) => v.len(),
            FeatureValue::Float32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn empty(dtype: DType) -> Self {
        match dtype {
            DType::Bytes => FeatureValue::Bytes(Vec::new()),
            DType::Int64 => FeatureValue::Int64(Vec::new()),
            DType::Float32 => FeatureValue::Float32(Vec::new()),
        }
    }

    /// Repeat a single value `n` times.
    pub(crate) fn broadcast(&self, n: usize) -> Self {
        match self {
            FeatureValue::Bytes(v) => FeatureValue::Bytes(vec![v[0].clone(); n]),
            FeatureValue::Int64(v) => FeatureValue::Int64(vec![v[0]; n]),
            FeatureValue::Float32(v) => FeatureValue::Float32(vec![v[0]; n]),
        }
    }
}

impl From<Vec<i64>> for FeatureValue {
    fn from(v: Vec<i64>) -> Self {
        FeatureValue::Int64(v)
    }
}

impl From<Vec<f32>> for FeatureValue {
    fn from(v: Vec<f32>) -> Self {
        FeatureValue::Float32(v)
    }
}

impl From<Vec<Bytes>> for FeatureValue {
    fn from(v: Vec<Bytes>) -> Self {
        FeatureValue::Bytes(v)
    }
}

/// How one named field is decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub dtype: DType,
    pub shape: Shape,
    pub default: Option<FeatureValue>,
    pub required: bool,
}

impl FieldSpec {
    /// Scalar byte-string field.
    pub fn bytes(name: impl Into<String>) -> Self {
        Self::new(name, DType::Bytes, Shape::Scalar)
    }

    /// Scalar int64 field.
    pub fn int64(name: impl Into<String>) -> Self {
        Self::new(name, DType::Int64, Shape::Scalar)
    }

    /// Scalar float32 field.
    pub fn float32(name: impl Into<String>) -> Self {
        Self::new(name, DType::Float32, Shape::Scalar)
    }

    /// Scalar field of any dtype.
    pub fn scalar(name: impl Into<String>, dtype: DType) -> Self {
        Self::new(name, dtype, Shape::Scalar)
    }

    /// Fixed-shape array field.
    pub fn fixed(name: impl Into<String>, dtype: DType, dims: Vec<usize>) -> Self {
        Self::new(name, dtype, Shape::Fixed(dims))
    }

    /// Variable-length array field.
    pub fn var_len(name: impl Into<String>, dtype: DType) -> Self {
        Self::new(name, dtype, Shape::Variable { max_len: None })
    }

    fn new(name: impl Into<String>, dtype: DType, shape: Shape) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape,
            default: None,
            required: true,
        }
    }

    /// Value used when the record does not carry this field.
    pub fn with_default(mut self, value: impl Into<FeatureValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Absent fields without a default are left out of the sample instead of failing.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Upper bound on the number of values of a variable-length field.
    pub fn max_len(mut self, max: usize) -> Self {
        if let Shape::Variable { max_len } = &mut self.shape {
            *max_len = Some(max);
        }
        self
    }

    fn validate(&self) -> Result<()> {
        let Some(default) = &self.default else {
            return Ok(());
        };
        if default.dtype() != self.dtype {
            return Err(ReaderError::InvalidConfig(format!(
                "field '{}': default is {} but field is {}",
                self.name,
                default.dtype().name(),
                self.dtype.name()
            )));
        }
        let ok = match (&self.shape, self.shape.fixed_len()) {
            (_, Some(n)) => default.len() == n || (default.len() == 1 && n > 0),
            (Shape::Variable { max_len: Some(max) }, None) => default.len() <= *max,
            _ => true,
        };
        if !ok {
            return Err(ReaderError::InvalidConfig(format!(
                "field '{}': default with {} values does not fit shape {:?}",
                self.name,
                default.len(),
                self.shape
            )));
        }
        Ok(())
    }
}

/// Immutable mapping from field name to its decoding rules.
#[derive(Debug, Clone, Default)]
pub struct FeatureSpec {
    fields: Vec<FieldSpec>,
    by_name: HashMap<String, usize>,
}

impl FeatureSpec {
    /// Validate and freeze a set of fields. Names must be unique.
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(fields.len());
        for (i, f) in fields.iter().enumerate() {
            f.validate()?;
            if by_name.insert(f.name.clone(), i).is_some() {
                return Err(ReaderError::InvalidConfig(format!("duplicate field '{}'", f.name)));
            }
        }
        Ok(Self { fields, by_name })
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
