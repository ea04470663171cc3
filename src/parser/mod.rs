// src/parser/mod.rs

//! Record parsers: turn a [`RawRecord`] payload into a typed sample.
//!
//! [`TfExampleParser`] decodes tf.train.Example payloads against a
//! [`FeatureSpec`]. Parsing is pure, so one parser instance is shared by all
//! reader workers.

pub mod backend;
pub mod feature;
pub mod wire;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ParseError;
use crate::loader::RawRecord;

pub use backend::{CpuBackend, HostTensor, Sample, TensorBackend};
pub use feature::{DType, FeatureSpec, FeatureValue, FieldSpec, Shape};
pub use wire::ExampleBuilder;

/// Decodes one raw record. Must be callable from several threads at once.
pub trait RecordParser: Send + Sync + 'static {
    type Output: Send + 'static;

    fn parse(&self, raw: RawRecord) -> Result<Self::Output, ParseError>;
}

/// tf.train.Example decoder writing through a [`TensorBackend`].
pub struct TfExampleParser<B: TensorBackend = CpuBackend> {
    spec: Arc<FeatureSpec>,
    backend: B,
}

impl TfExampleParser<CpuBackend> {
    pub fn new(spec: FeatureSpec) -> Self {
        Self::with_backend(spec, CpuBackend)
    }
}

impl<B: TensorBackend> TfExampleParser<B> {
    pub fn with_backend(spec: FeatureSpec, backend: B) -> Self {
        Self { spec: Arc::new(spec), backend }
    }

    pub fn spec(&self) -> &FeatureSpec {
        &self.spec
    }

    /// Resolve the value and tensor shape of one declared field.
    ///
    /// `None` means the field is optional, absent and has no default.
    fn resolve(
        &self,
        record: usize,
        field: &FieldSpec,
        encoded: Option<Option<FeatureValue>>,
    ) -> Result<Option<(FeatureValue, Vec<usize>)>, ParseError> {
        let (value, from_default) = match encoded {
            Some(decoded) => {
                let value = decoded.unwrap_or_else(|| FeatureValue::empty(field.dtype));
                if value.dtype() != field.dtype {
                    return Err(ParseError::TypeMismatch {
                        record,
                        field: field.name.clone(),
                        expected: field.dtype.name(),
                        found: value.dtype().name(),
                    });
                }
                (value, false)
            }
            None => match (&field.default, field.required) {
                (Some(default), _) => (default.clone(), true),
                (None, true) => {
                    return Err(ParseError::MissingRequiredField {
                        record,
                        field: field.name.clone(),
                    });
                }
                (None, false) => return Ok(None),
            },
        };

        let len = value.len();
        match &field.shape {
            Shape::Variable { max_len } => {
                if let Some(max) = *max_len {
                    if len > max {
                        return Err(ParseError::LengthExceeded {
                            record,
                            field: field.name.clone(),
                            len,
                            max,
                        });
                    }
                }
                Ok(Some((value, vec![len])))
            }
            fixed => {
                let dims = match fixed {
                    Shape::Fixed(dims) => dims.clone(),
                    _ => Vec::new(),
                };
                let expected: usize = dims.iter().product();
                if from_default && len == 1 && expected != 1 {
                    return Ok(Some((value.broadcast(expected), dims)));
                }
                if len > expected {
                    return Err(ParseError::LengthExceeded {
                        record,
                        field: field.name.clone(),
                        len,
                        max: expected,
                    });
                }
                if len < expected {
                    return Err(ParseError::ShapeMismatch {
                        record,
                        field: field.name.clone(),
                        shape: dims,
                        len,
                        expected,
                    });
                }
                Ok(Some((value, dims)))
            }
        }
    }
}

impl<B: TensorBackend> RecordParser for TfExampleParser<B> {
    type Output = Sample<B::Tensor>;

    fn parse(&self, raw: RawRecord) -> Result<Self::Output, ParseError> {
        let record = raw.index;
        let malformed = |e: wire::WireError| ParseError::Malformed { record, reason: e.0 };

        // last occurrence of a name wins
        let present: HashMap<&str, &[u8]> = wire::feature_entries(raw.data())
            .map_err(malformed)?
            .into_iter()
            .filter(|(name, _)| self.spec.contains(name))
            .collect();

        let mut sample = Sample::new(record);
        for field in self.spec.fields() {
            let encoded = match present.get(field.name.as_str()) {
                Some(bytes) => Some(wire::decode_feature(bytes).map_err(malformed)?),
                None => None,
            };
            let Some((values, shape)) = self.resolve(record, field, encoded)? else {
                continue;
            };
            let mut tensor = self.backend.allocate(field.dtype, &shape);
            self.backend.write(&mut tensor, values);
            sample.insert(field.name.clone(), tensor);
        }
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn parser(fields: Vec<FieldSpec>) -> TfExampleParser {
        TfExampleParser::new(FeatureSpec::new(fields).unwrap())
    }

    fn raw(index: usize, builder: ExampleBuilder) -> RawRecord {
        RawRecord::new(index, builder.build())
    }

    #[test]
    fn scalars_and_fixed_arrays_roundtrip() {
        let p = parser(vec![
            FieldSpec::bytes("image"),
            FieldSpec::int64("label"),
            FieldSpec::float32("weight"),
            FieldSpec::fixed("bbox", DType::Float32, vec![2, 2]),
        ]);
        let rec = raw(
            7,
            ExampleBuilder::new()
                .bytes("image", [[0u8, 255, 7].as_slice()])
                .int64("label", &[-42])
                .float32("weight", &[f32::MIN_POSITIVE])
                .float32("bbox", &[0.1, 0.2, 0.3, 0.4]),
        );

        let s = p.parse(rec).unwrap();
        assert_eq!(s.record, 7);
        let image = s.get("image").unwrap().as_bytes().unwrap();
        assert_eq!(image.iter().next().unwrap(), &Bytes::from_static(&[0, 255, 7]));
        assert_eq!(s.get("label").unwrap().as_i64().unwrap().iter().copied().collect::<Vec<_>>(), vec![-42]);
        let w = s.get("weight").unwrap().as_f32().unwrap();
        assert_eq!(w.iter().next().unwrap().to_bits(), f32::MIN_POSITIVE.to_bits());
        let bbox = s.get("bbox").unwrap();
        assert_eq!(bbox.shape(), &[2, 2]);
        assert_eq!(bbox.as_f32().unwrap().iter().copied().collect::<Vec<_>>(), vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn undeclared_fields_are_ignored() {
        let p = parser(vec![FieldSpec::int64("id")]);
        let s = p
            .parse(raw(0, ExampleBuilder::new().int64("id", &[1]).bytes("extra", [b"zz".as_slice()])))
            .unwrap();
        assert_eq!(s.len(), 1);
        assert!(!s.contains("extra"));
    }

    #[test]
    fn missing_required_field_does_not_poison_later_records() {
        let p = parser(vec![FieldSpec::int64("label")]);
        let err = p.parse(raw(3, ExampleBuilder::new().int64("other", &[1]))).unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingRequiredField { record: 3, field: "label".into() }
        );

        let ok = p.parse(raw(4, ExampleBuilder::new().int64("label", &[9]))).unwrap();
        assert_eq!(ok.get("label").unwrap().as_i64().unwrap().iter().next(), Some(&9));
    }

    #[test]
    fn defaults_fill_absent_fields() {
        let p = parser(vec![
            FieldSpec::fixed("mask", DType::Int64, vec![3]).with_default(vec![1i64]),
            FieldSpec::float32("score").with_default(vec![0.5f32]),
            FieldSpec::bytes("caption").optional(),
        ]);
        let s = p.parse(raw(0, ExampleBuilder::new())).unwrap();
        assert_eq!(s.get("mask").unwrap().as_i64().unwrap().iter().copied().collect::<Vec<_>>(), vec![1, 1, 1]);
        assert_eq!(s.get("score").unwrap().as_f32().unwrap().iter().next(), Some(&0.5));
        assert!(!s.contains("caption"));
    }

    #[test]
    fn type_mismatch_is_reported() {
        let p = parser(vec![FieldSpec::int64("label")]);
        let err = p.parse(raw(1, ExampleBuilder::new().float32("label", &[1.0]))).unwrap_err();
        assert!(matches!(
            err,
            ParseError::TypeMismatch { expected: "int64", found: "float32", .. }
        ));
    }

    #[test]
    fn variable_length_respects_max() {
        let p = parser(vec![FieldSpec::var_len("tokens", DType::Int64).max_len(3)]);
        let s = p.parse(raw(0, ExampleBuilder::new().int64("tokens", &[5, 6]))).unwrap();
        assert_eq!(s.get("tokens").unwrap().shape(), &[2]);

        let err = p.parse(raw(1, ExampleBuilder::new().int64("tokens", &[1, 2, 3, 4]))).unwrap_err();
        assert!(matches!(err, ParseError::LengthExceeded { len: 4, max: 3, .. }));
    }

    #[test]
    fn fixed_shape_count_is_enforced() {
        let p = parser(vec![FieldSpec::fixed("xy", DType::Float32, vec![2])]);
        let short = p.parse(raw(0, ExampleBuilder::new().float32("xy", &[1.0]))).unwrap_err();
        assert!(matches!(short, ParseError::ShapeMismatch { len: 1, expected: 2, .. }));
        let long = p.parse(raw(0, ExampleBuilder::new().float32("xy", &[1.0, 2.0, 3.0]))).unwrap_err();
        assert!(matches!(long, ParseError::LengthExceeded { len: 3, max: 2, .. }));
    }

    #[test]
    fn garbage_payload_is_malformed() {
        let p = parser(vec![FieldSpec::int64("x")]);
        let err = p.parse(RawRecord::new(2, vec![0x0a, 0x7f, 0x01])).unwrap_err();
        assert!(matches!(err, ParseError::Malformed { record: 2, .. }));
    }
}
