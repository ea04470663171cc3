// src/parser/wire.rs
//
// Minimal protocol-buffer wire codec for the tf.train.Example message family:
//
//   Example   { 1: Features }
//   Features  { 1: repeated MapEntry { 1: string key, 2: Feature value } }
//   Feature   { oneof { 1: BytesList, 2: FloatList, 3: Int64List } }
//   *List     { 1: repeated value }            (numeric lists packed or not)
//
// Only what those messages need is implemented: varints, length-delimited
// fields, fixed32/fixed64 skipping. Groups are rejected.

use bytes::Bytes;

use super::feature::FeatureValue;

const EXAMPLE_FEATURES: u32 = 1;
const FEATURES_ENTRY: u32 = 1;
const ENTRY_KEY: u32 = 1;
const ENTRY_VALUE: u32 = 2;
const FEATURE_BYTES_LIST: u32 = 1;
const FEATURE_FLOAT_LIST: u32 = 2;
const FEATURE_INT64_LIST: u32 = 3;
const LIST_VALUE: u32 = 1;

const MAX_VARINT_LEN: usize = 10;

/// Reason a payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireError(pub String);

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

type WireResult<T> = std::result::Result<T, WireError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireType {
    Varint,
    Fixed64,
    Len,
    Fixed32,
}

impl WireType {
    fn from_raw(raw: u64) -> WireResult<Self> {
        match raw {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::Len),
            5 => Ok(WireType::Fixed32),
            3 | 4 => Err(WireError("group wire types are not supported".into())),
            other => Err(WireError(format!("invalid wire type {}", other))),
        }
    }
}

struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn varint(&mut self) -> WireResult<u64> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_LEN {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| WireError(format!("truncated varint at byte {}", self.pos)))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(WireError(format!("varint longer than {} bytes", MAX_VARINT_LEN)))
    }

    fn key(&mut self) -> WireResult<(u32, WireType)> {
        let raw = self.varint()?;
        let field = u32::try_from(raw >> 3).map_err(|_| WireError("field number overflow".into()))?;
        if field == 0 {
            return Err(WireError("field number 0".into()));
        }
        Ok((field, WireType::from_raw(raw & 0x7)?))
    }

    fn take(&mut self, n: usize) -> WireResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                WireError(format!(
                    "length {} at byte {} runs past end of {}-byte message",
                    n,
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn len_delimited(&mut self) -> WireResult<&'a [u8]> {
        let n = self.varint()?;
        let n = usize::try_from(n).map_err(|_| WireError("length overflow".into()))?;
        self.take(n)
    }

    fn fixed32(&mut self) -> WireResult<[u8; 4]> {
        let b = self.take(4)?;
        Ok([b[0], b[1], b[2], b[3]])
    }

    fn skip(&mut self, wt: WireType) -> WireResult<()> {
        match wt {
            WireType::Varint => self.varint().map(|_| ()),
            WireType::Fixed64 => self.take(8).map(|_| ()),
            WireType::Len => self.len_delimited().map(|_| ()),
            WireType::Fixed32 => self.take(4).map(|_| ()),
        }
    }

    /// Demand a length-delimited field, naming `what` in the error.
    fn expect_len(&mut self, wt: WireType, what: &str) -> WireResult<&'a [u8]> {
        if wt != WireType::Len {
            return Err(WireError(format!("{} must be length-delimited, got {:?}", what, wt)));
        }
        self.len_delimited()
    }
}

/// Split a serialized Example into `(feature name, serialized Feature)` pairs.
///
/// Entries appear in encoding order; when a name repeats, the later entry wins
/// for callers that collect into a map.
pub fn feature_entries(payload: &[u8]) -> WireResult<Vec<(&str, &[u8])>> {
    let mut out = Vec::new();
    let mut example = WireReader::new(payload);
    while !example.is_done() {
        let (field, wt) = example.key()?;
        if field != EXAMPLE_FEATURES {
            example.skip(wt)?;
            continue;
        }
        let features = example.expect_len(wt, "Example.features")?;
        let mut fr = WireReader::new(features);
        while !fr.is_done() {
            let (field, wt) = fr.key()?;
            if field != FEATURES_ENTRY {
                fr.skip(wt)?;
                continue;
            }
            let entry = fr.expect_len(wt, "Features.feature")?;
            out.push(map_entry(entry)?);
        }
    }
    Ok(out)
}

fn map_entry(entry: &[u8]) -> WireResult<(&str, &[u8])> {
    let mut key: &str = "";
    let mut value: &[u8] = &[];
    let mut r = WireReader::new(entry);
    while !r.is_done() {
        let (field, wt) = r.key()?;
        match field {
            ENTRY_KEY => {
                let raw = r.expect_len(wt, "feature key")?;
                key = std::str::from_utf8(raw)
                    .map_err(|_| WireError("feature key is not valid UTF-8".into()))?;
            }
            ENTRY_VALUE => value = r.expect_len(wt, "feature value")?,
            _ => r.skip(wt)?,
        }
    }
    Ok((key, value))
}

/// Decode one serialized Feature. `None` means no list kind was set.
pub fn decode_feature(feature: &[u8]) -> WireResult<Option<FeatureValue>> {
    let mut decoded = None;
    let mut r = WireReader::new(feature);
    while !r.is_done() {
        let (field, wt) = r.key()?;
        match field {
            FEATURE_BYTES_LIST => {
                decoded = Some(bytes_list(r.expect_len(wt, "BytesList")?)?);
            }
            FEATURE_FLOAT_LIST => {
                decoded = Some(float_list(r.expect_len(wt, "FloatList")?)?);
            }
            FEATURE_INT64_LIST => {
                decoded = Some(int64_list(r.expect_len(wt, "Int64List")?)?);
            }
            _ => r.skip(wt)?,
        }
    }
    Ok(decoded)
}

fn bytes_list(buf: &[u8]) -> WireResult<FeatureValue> {
    let mut values = Vec::new();
    let mut r = WireReader::new(buf);
    while !r.is_done() {
        let (field, wt) = r.key()?;
        if field == LIST_VALUE {
            values.push(Bytes::copy_from_slice(r.expect_len(wt, "bytes value")?));
        } else {
            r.skip(wt)?;
        }
    }
    Ok(FeatureValue::Bytes(values))
}

fn float_list(buf: &[u8]) -> WireResult<FeatureValue> {
    let mut values = Vec::new();
    let mut r = WireReader::new(buf);
    while !r.is_done() {
        let (field, wt) = r.key()?;
        if field != LIST_VALUE {
            r.skip(wt)?;
            continue;
        }
        match wt {
            WireType::Len => {
                let packed = r.len_delimited()?;
                if packed.len() % 4 != 0 {
                    return Err(WireError(format!("packed float list of {} bytes", packed.len())));
                }
                values.extend(
                    packed
                        .chunks_exact(4)
                        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
                );
            }
            WireType::Fixed32 => values.push(f32::from_le_bytes(r.fixed32()?)),
            other => return Err(WireError(format!("float value with wire type {:?}", other))),
        }
    }
    Ok(FeatureValue::Float32(values))
}

fn int64_list(buf: &[u8]) -> WireResult<FeatureValue> {
    let mut values = Vec::new();
    let mut r = WireReader::new(buf);
    while !r.is_done() {
        let (field, wt) = r.key()?;
        if field != LIST_VALUE {
            r.skip(wt)?;
            continue;
        }
        match wt {
            WireType::Len => {
                let mut packed = WireReader::new(r.len_delimited()?);
                while !packed.is_done() {
                    values.push(packed.varint()? as i64);
                }
            }
            WireType::Varint => values.push(r.varint()? as i64),
            other => return Err(WireError(format!("int64 value with wire type {:?}", other))),
        }
    }
    Ok(FeatureValue::Int64(values))
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn put_varint(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

fn put_key(out: &mut Vec<u8>, field: u32, wt: u8) {
    put_varint(out, (u64::from(field) << 3) | u64::from(wt));
}

fn put_len(out: &mut Vec<u8>, field: u32, body: &[u8]) {
    put_key(out, field, 2);
    put_varint(out, body.len() as u64);
    out.extend_from_slice(body);
}

fn encode_feature(value: &FeatureValue) -> Vec<u8> {
    let mut list = Vec::new();
    let kind = match value {
        FeatureValue::Bytes(vals) => {
            for v in vals {
                put_len(&mut list, LIST_VALUE, v);
            }
            FEATURE_BYTES_LIST
        }
        FeatureValue::Float32(vals) => {
            if !vals.is_empty() {
                let packed: Vec<u8> = vals.iter().flat_map(|f| f.to_le_bytes()).collect();
                put_len(&mut list, LIST_VALUE, &packed);
            }
            FEATURE_FLOAT_LIST
        }
        FeatureValue::Int64(vals) => {
            if !vals.is_empty() {
                let mut packed = Vec::new();
                for &v in vals {
                    put_varint(&mut packed, v as u64);
                }
                put_len(&mut list, LIST_VALUE, &packed);
            }
            FEATURE_INT64_LIST
        }
    };
    let mut feature = Vec::new();
    put_len(&mut feature, kind, &list);
    feature
}

/// Builds serialized Example payloads; numeric lists are written packed.
#[derive(Debug, Clone, Default)]
pub struct ExampleBuilder {
    features: Vec<(String, FeatureValue)>,
}

impl ExampleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feature(mut self, name: impl Into<String>, value: FeatureValue) -> Self {
        self.features.push((name.into(), value));
        self
    }

    pub fn bytes<I, B>(self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let values = values
            .into_iter()
            .map(|b| Bytes::copy_from_slice(b.as_ref()))
            .collect();
        self.feature(name, FeatureValue::Bytes(values))
    }

    pub fn int64(self, name: impl Into<String>, values: &[i64]) -> Self {
        self.feature(name, FeatureValue::Int64(values.to_vec()))
    }

    pub fn float32(self, name: impl Into<String>, values: &[f32]) -> Self {
        self.feature(name, FeatureValue::Float32(values.to_vec()))
    }

    pub fn build(&self) -> Vec<u8> {
        let mut features = Vec::new();
        for (name, value) in &self.features {
            let mut entry = Vec::new();
            put_len(&mut entry, ENTRY_KEY, name.as_bytes());
            put_len(&mut entry, ENTRY_VALUE, &encode_feature(value));
            put_len(&mut features, FEATURES_ENTRY, &entry);
        }
        let mut example = Vec::new();
        put_len(&mut example, EXAMPLE_FEATURES, &features);
        example
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(payload: &[u8]) -> Vec<(String, Option<FeatureValue>)> {
        feature_entries(payload)
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k.to_string(), decode_feature(v).unwrap()))
            .collect()
    }

    #[test]
    fn builder_output_decodes() {
        let payload = ExampleBuilder::new()
            .bytes("name", [b"cat".as_slice()])
            .int64("label", &[-3, 0, i64::MAX])
            .float32("score", &[0.25, -1.5])
            .build();

        let got = decode_all(&payload);
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].1, Some(FeatureValue::Bytes(vec![Bytes::from_static(b"cat")])));
        assert_eq!(got[1].1, Some(FeatureValue::Int64(vec![-3, 0, i64::MAX])));
        assert_eq!(got[2].1, Some(FeatureValue::Float32(vec![0.25, -1.5])));
    }

    #[test]
    fn unpacked_numeric_lists_decode() {
        // Int64List { value: 5, value: 7 } written one varint at a time
        let mut ints = Vec::new();
        put_key(&mut ints, LIST_VALUE, 0);
        put_varint(&mut ints, 5);
        put_key(&mut ints, LIST_VALUE, 0);
        put_varint(&mut ints, 7);
        let mut feature = Vec::new();
        put_len(&mut feature, FEATURE_INT64_LIST, &ints);
        assert_eq!(decode_feature(&feature).unwrap(), Some(FeatureValue::Int64(vec![5, 7])));

        let mut floats = Vec::new();
        put_key(&mut floats, LIST_VALUE, 5);
        floats.extend_from_slice(&2.5f32.to_le_bytes());
        let mut feature = Vec::new();
        put_len(&mut feature, FEATURE_FLOAT_LIST, &floats);
        assert_eq!(decode_feature(&feature).unwrap(), Some(FeatureValue::Float32(vec![2.5])));
    }

    #[test]
    fn empty_feature_has_no_kind() {
        assert_eq!(decode_feature(&[]).unwrap(), None);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let payload = ExampleBuilder::new().int64("x", &[1, 2, 3]).build();
        assert!(feature_entries(&payload[..payload.len() - 2]).is_err());
    }

    #[test]
    fn group_wire_type_is_rejected() {
        // field 1, wire type 3 (start group)
        assert!(feature_entries(&[0x0b]).is_err());
    }

    #[test]
    fn unknown_top_level_fields_are_skipped() {
        let mut payload = Vec::new();
        put_key(&mut payload, 9, 0);
        put_varint(&mut payload, 300);
        payload.extend(ExampleBuilder::new().int64("id", &[4]).build());
        let got = decode_all(&payload);
        assert_eq!(got, vec![("id".to_string(), Some(FeatureValue::Int64(vec![4])))]);
    }
}
