//! # Binary Documents
//!
//! Self-describing binary documents, laid out the way BSON lays them out so
//! that any BSON reader can walk them:
//!
//! ```text
//! document := total_len(i32 LE) element* 0x00
//! element  := tag(u8) name(cstring) value
//! ```
//!
//! ## Supported values
//! | tag    | value                                             |
//! |--------|---------------------------------------------------|
//! | `0x01` | double (f64 LE)                                   |
//! | `0x02` | string (i32 LE length incl. NUL, UTF-8, `0x00`)   |
//! | `0x03` | embedded document                                 |
//! | `0x05` | binary (i32 LE length, subtype, bytes)            |
//! | `0x08` | bool (`0x00` / `0x01`)                            |
//! | `0x10` | int32 (LE)                                        |
//! | `0x12` | int64 (LE)                                        |
//!
//! Numeric arrays travel as binary elements with user-defined subtypes
//! (`0x80` f32, `0x81` f64, `0x82` i32, `0x83` i64, all little-endian), so a
//! 28x28 image costs 3136 payload bytes instead of 784 tagged elements.
//!
//! Encoding is deterministic: fields are written in insertion order and floats
//! are written by bit pattern, so NaN payloads and infinities survive a round
//! trip untouched.

use std::collections::HashSet;

use bytes::{Buf, BufMut, BytesMut};

use crate::config::MAX_PAYLOAD_SIZE;
use crate::error::{constants, ProtocolError, Result};

/// Largest encoded document accepted in either direction.
pub const MAX_DOCUMENT_SIZE: usize = MAX_PAYLOAD_SIZE;

/// Deepest embedded-document nesting accepted in either direction.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Smallest possible document: length prefix plus terminator.
const MIN_DOCUMENT_SIZE: usize = 5;

mod tag {
    pub const DOUBLE: u8 = 0x01;
    pub const STRING: u8 = 0x02;
    pub const DOCUMENT: u8 = 0x03;
    pub const BINARY: u8 = 0x05;
    pub const BOOL: u8 = 0x08;
    pub const INT32: u8 = 0x10;
    pub const INT64: u8 = 0x12;
}

mod subtype {
    pub const GENERIC: u8 = 0x00;
    pub const F32_ARRAY: u8 = 0x80;
    pub const F64_ARRAY: u8 = 0x81;
    pub const I32_ARRAY: u8 = 0x82;
    pub const I64_ARRAY: u8 = 0x83;
}

/// A single field value.
#[derive(Debug, Clone)]
pub enum Value {
    Double(f64),
    String(String),
    Document(Document),
    Binary(Vec<u8>),
    F32Array(Vec<f32>),
    F64Array(Vec<f64>),
    I32Array(Vec<i32>),
    I64Array(Vec<i64>),
    Bool(bool),
    Int32(i32),
    Int64(i64),
}

/// Floats compare by bit pattern so that `decode(encode(v)) == v` holds for NaN.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Document(a), Value::Document(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::F32Array(a), Value::F32Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Value::F64Array(a), Value::F64Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Value::I32Array(a), Value::I32Array(b)) => a == b,
            (Value::I64Array(a), Value::I64Array(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Human-readable type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Document(_) => "document",
            Value::Binary(_) => "binary",
            Value::F32Array(_) => "f32-array",
            Value::F64Array(_) => "f64-array",
            Value::I32Array(_) => "i32-array",
            Value::I64Array(_) => "i64-array",
            Value::Bool(_) => "bool",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; int32 widens.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32_array(&self) -> Option<&[f32]> {
        match self {
            Value::F32Array(v) => Some(v),
            _ => None,
        }
    }

    /// Integer-array view; i32 arrays widen.
    pub fn to_i64_array(&self) -> Option<Vec<i64>> {
        match self {
            Value::I64Array(v) => Some(v.clone()),
            Value::I32Array(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }
}

macro_rules! impl_from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_value! {
    f64 => Double,
    String => String,
    Document => Document,
    Vec<u8> => Binary,
    Vec<f32> => F32Array,
    Vec<f64> => F64Array,
    Vec<i32> => I32Array,
    Vec<i64> => I64Array,
    bool => Bool,
    i32 => Int32,
    i64 => Int64,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

/// An ordered mapping from field name to value.
///
/// Field order is insertion order and is preserved on the wire. Keys are
/// unique; inserting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Vec<(String, Value)>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field, returning the previous value.
    pub fn insert<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((key, value));
                None
            }
        }
    }

    /// Builder-style insert.
    pub fn with<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }
}

/// Encode a document.
///
/// # Errors
/// `MalformedDocument` for field names containing NUL or nesting deeper than
/// [`MAX_NESTING_DEPTH`]; `OversizedPacket` when the result would exceed
/// [`MAX_DOCUMENT_SIZE`].
pub fn encode(doc: &Document) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(64);
    encode_into(&mut buf, doc, 0)?;
    Ok(buf.to_vec())
}

/// Decode exactly one document occupying all of `bytes`.
///
/// # Errors
/// `MalformedDocument` when the input is truncated, carries an unsupported tag
/// or subtype, or otherwise breaks the layout described in the module docs.
pub fn decode(bytes: &[u8]) -> Result<Document> {
    let mut cur = bytes;
    let doc = decode_document(&mut cur, 0)?;
    if !cur.is_empty() {
        return Err(malformed(constants::ERR_TRAILING_BYTES));
    }
    Ok(doc)
}

fn malformed<S: Into<String>>(msg: S) -> ProtocolError {
    ProtocolError::MalformedDocument(msg.into())
}

fn encode_into(buf: &mut BytesMut, doc: &Document, depth: usize) -> Result<()> {
    if depth > MAX_NESTING_DEPTH {
        return Err(malformed(constants::ERR_NESTING_TOO_DEEP));
    }

    let start = buf.len();
    buf.put_i32_le(0);

    for (key, value) in &doc.fields {
        if key.as_bytes().contains(&0) {
            return Err(malformed(constants::ERR_NUL_IN_KEY));
        }
        buf.put_u8(value_tag(value));
        buf.extend_from_slice(key.as_bytes());
        buf.put_u8(0);
        encode_value(buf, value, depth)?;
    }
    buf.put_u8(0);

    let len = buf.len() - start;
    if len > MAX_DOCUMENT_SIZE {
        return Err(ProtocolError::OversizedPacket(len));
    }
    buf[start..start + 4].copy_from_slice(&(len as i32).to_le_bytes());
    Ok(())
}

fn value_tag(value: &Value) -> u8 {
    match value {
        Value::Double(_) => tag::DOUBLE,
        Value::String(_) => tag::STRING,
        Value::Document(_) => tag::DOCUMENT,
        Value::Binary(_)
        | Value::F32Array(_)
        | Value::F64Array(_)
        | Value::I32Array(_)
        | Value::I64Array(_) => tag::BINARY,
        Value::Bool(_) => tag::BOOL,
        Value::Int32(_) => tag::INT32,
        Value::Int64(_) => tag::INT64,
    }
}

fn encode_value(buf: &mut BytesMut, value: &Value, depth: usize) -> Result<()> {
    match value {
        Value::Double(v) => buf.put_u64_le(v.to_bits()),
        Value::String(s) => {
            put_len(buf, s.len() + 1)?;
            buf.extend_from_slice(s.as_bytes());
            buf.put_u8(0);
        }
        Value::Document(d) => encode_into(buf, d, depth + 1)?,
        Value::Binary(bytes) => {
            put_len(buf, bytes.len())?;
            buf.put_u8(subtype::GENERIC);
            buf.extend_from_slice(bytes);
        }
        Value::F32Array(v) => {
            put_len(buf, v.len() * 4)?;
            buf.put_u8(subtype::F32_ARRAY);
            for x in v {
                buf.put_u32_le(x.to_bits());
            }
        }
        Value::F64Array(v) => {
            put_len(buf, v.len() * 8)?;
            buf.put_u8(subtype::F64_ARRAY);
            for x in v {
                buf.put_u64_le(x.to_bits());
            }
        }
        Value::I32Array(v) => {
            put_len(buf, v.len() * 4)?;
            buf.put_u8(subtype::I32_ARRAY);
            for x in v {
                buf.put_i32_le(*x);
            }
        }
        Value::I64Array(v) => {
            put_len(buf, v.len() * 8)?;
            buf.put_u8(subtype::I64_ARRAY);
            for x in v {
                buf.put_i64_le(*x);
            }
        }
        Value::Bool(b) => buf.put_u8(u8::from(*b)),
        Value::Int32(v) => buf.put_i32_le(*v),
        Value::Int64(v) => buf.put_i64_le(*v),
    }
    Ok(())
}

fn put_len(buf: &mut BytesMut, len: usize) -> Result<()> {
    if len > MAX_DOCUMENT_SIZE {
        return Err(ProtocolError::OversizedPacket(len));
    }
    buf.put_i32_le(len as i32);
    Ok(())
}

fn need(cur: &[u8], n: usize) -> Result<()> {
    if cur.len() < n {
        return Err(malformed(constants::ERR_TRUNCATED));
    }
    Ok(())
}

/// Read a non-negative i32 length prefix.
fn read_len(cur: &mut &[u8]) -> Result<usize> {
    need(cur, 4)?;
    let len = cur.get_i32_le();
    if len < 0 {
        return Err(malformed(format!("negative length {len}")));
    }
    let len = len as usize;
    if len > MAX_DOCUMENT_SIZE {
        return Err(malformed(format!("length {len} exceeds maximum")));
    }
    Ok(len)
}

fn decode_document(cur: &mut &[u8], depth: usize) -> Result<Document> {
    if depth > MAX_NESTING_DEPTH {
        return Err(malformed(constants::ERR_NESTING_TOO_DEEP));
    }

    let total = read_len(cur)?;
    if total < MIN_DOCUMENT_SIZE {
        return Err(malformed(format!("document length {total} too small")));
    }
    let body_len = total - 4;
    need(cur, body_len)?;
    let data: &[u8] = *cur;
    let (body, rest) = data.split_at(body_len);
    *cur = rest;

    let (terminator, mut elements) = match body.split_last() {
        Some((last, elements)) => (*last, elements),
        None => return Err(malformed(constants::ERR_MISSING_TERMINATOR)),
    };
    if terminator != 0 {
        return Err(malformed(constants::ERR_MISSING_TERMINATOR));
    }

    let mut doc = Document::new();
    let mut seen = HashSet::new();
    while !elements.is_empty() {
        let tag = elements.get_u8();
        let key = read_cstring(&mut elements)?;
        if !seen.insert(key) {
            return Err(malformed(format!("duplicate field '{key}'")));
        }
        let value = decode_value(&mut elements, tag, depth)?;
        doc.fields.push((key.to_string(), value));
    }
    Ok(doc)
}

/// Field name borrowed from the input, which outlives the decoded document.
fn read_cstring<'a>(cur: &mut &'a [u8]) -> Result<&'a str> {
    let data: &'a [u8] = *cur;
    let end = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| malformed("unterminated field name"))?;
    let name = std::str::from_utf8(&data[..end])
        .map_err(|e| malformed(format!("field name is not UTF-8: {e}")))?;
    *cur = &data[end + 1..];
    Ok(name)
}

fn decode_value(cur: &mut &[u8], tag: u8, depth: usize) -> Result<Value> {
    match tag {
        tag::DOUBLE => {
            need(cur, 8)?;
            Ok(Value::Double(f64::from_bits(cur.get_u64_le())))
        }
        tag::STRING => {
            let len = read_len(cur)?;
            if len == 0 {
                return Err(malformed("string length must include terminator"));
            }
            need(cur, len)?;
            let data: &[u8] = cur;
            let (raw, rest) = data.split_at(len);
            *cur = rest;
            if raw[len - 1] != 0 {
                return Err(malformed("unterminated string"));
            }
            let s = std::str::from_utf8(&raw[..len - 1])
                .map_err(|e| malformed(format!("string is not UTF-8: {e}")))?;
            Ok(Value::String(s.to_string()))
        }
        tag::DOCUMENT => Ok(Value::Document(decode_document(cur, depth + 1)?)),
        tag::BINARY => {
            let len = read_len(cur)?;
            need(cur, 1)?;
            let sub = cur.get_u8();
            need(cur, len)?;
            let data: &[u8] = cur;
            let (raw, rest) = data.split_at(len);
            *cur = rest;
            decode_binary(sub, raw)
        }
        tag::BOOL => {
            need(cur, 1)?;
            match cur.get_u8() {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                other => Err(malformed(format!("invalid bool byte 0x{other:02x}"))),
            }
        }
        tag::INT32 => {
            need(cur, 4)?;
            Ok(Value::Int32(cur.get_i32_le()))
        }
        tag::INT64 => {
            need(cur, 8)?;
            Ok(Value::Int64(cur.get_i64_le()))
        }
        other => Err(malformed(format!("unsupported type tag 0x{other:02x}"))),
    }
}

fn decode_binary(sub: u8, raw: &[u8]) -> Result<Value> {
    let width = match sub {
        subtype::GENERIC => return Ok(Value::Binary(raw.to_vec())),
        subtype::F32_ARRAY | subtype::I32_ARRAY => 4,
        subtype::F64_ARRAY | subtype::I64_ARRAY => 8,
        other => return Err(malformed(format!("unsupported binary subtype 0x{other:02x}"))),
    };
    if raw.len() % width != 0 {
        return Err(malformed(format!(
            "array payload of {} bytes is not a multiple of {width}",
            raw.len()
        )));
    }

    let mut cur = raw;
    let count = raw.len() / width;
    let value = match sub {
        subtype::F32_ARRAY => {
            Value::F32Array((0..count).map(|_| f32::from_bits(cur.get_u32_le())).collect())
        }
        subtype::F64_ARRAY => {
            Value::F64Array((0..count).map(|_| f64::from_bits(cur.get_u64_le())).collect())
        }
        subtype::I32_ARRAY => Value::I32Array((0..count).map(|_| cur.get_i32_le()).collect()),
        _ => Value::I64Array((0..count).map(|_| cur.get_i64_le()).collect()),
    };
    Ok(value)
}
