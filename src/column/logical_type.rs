//! Logical type registry (spec §9 "Dynamic dispatch over pages").
//!
//! The repository this crate is grounded on reaches for a ladder of
//! `instanceof`-style type tests when choosing how to read or write a
//! column value; here that collapses into one closed [`LogicalType`]
//! discriminant plus a [`Serializer`] chosen once at column open time.

use crate::common::{Error, Result};

/// Every scalar column type HARE can store, plus a fixed-length vector of
/// any scalar (the logical size in that case is the vector's element
/// count).
#[derive(Debug, Clone, PartialEq)]
pub enum LogicalType {
    Bool,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Complex32,
    Complex64,
    Str,
    Vector(Box<LogicalType>, u32),
}

const ORD_BOOL: u32 = 0;
const ORD_BYTE: u32 = 1;
const ORD_SHORT: u32 = 2;
const ORD_INT: u32 = 3;
const ORD_LONG: u32 = 4;
const ORD_FLOAT: u32 = 5;
const ORD_DOUBLE: u32 = 6;
const ORD_COMPLEX32: u32 = 7;
const ORD_COMPLEX64: u32 = 8;
const ORD_STR: u32 = 9;

impl LogicalType {
    fn scalar_ordinal(&self) -> Result<u32> {
        Ok(match self {
            LogicalType::Bool => ORD_BOOL,
            LogicalType::Byte => ORD_BYTE,
            LogicalType::Short => ORD_SHORT,
            LogicalType::Int => ORD_INT,
            LogicalType::Long => ORD_LONG,
            LogicalType::Float => ORD_FLOAT,
            LogicalType::Double => ORD_DOUBLE,
            LogicalType::Complex32 => ORD_COMPLEX32,
            LogicalType::Complex64 => ORD_COMPLEX64,
            LogicalType::Str => ORD_STR,
            LogicalType::Vector(_, _) => {
                return Err(Error::DataCorruption(
                    "nested vector types are not supported".to_string(),
                ))
            }
        })
    }

    fn scalar_from_ordinal(ordinal: u32) -> Result<LogicalType> {
        Ok(match ordinal {
            ORD_BOOL => LogicalType::Bool,
            ORD_BYTE => LogicalType::Byte,
            ORD_SHORT => LogicalType::Short,
            ORD_INT => LogicalType::Int,
            ORD_LONG => LogicalType::Long,
            ORD_FLOAT => LogicalType::Float,
            ORD_DOUBLE => LogicalType::Double,
            ORD_COMPLEX32 => LogicalType::Complex32,
            ORD_COMPLEX64 => LogicalType::Complex64,
            ORD_STR => LogicalType::Str,
            other => {
                return Err(Error::DataCorruption(format!(
                    "unknown logical type ordinal {other}"
                )))
            }
        })
    }

    /// Decompose into the header's `(type ordinal, is_vector, logical_size)`
    /// triple (spec §6's column header fields).
    pub fn to_header_parts(&self) -> Result<(u32, bool, u32)> {
        match self {
            LogicalType::Vector(inner, len) => Ok((inner.scalar_ordinal()?, true, *len)),
            other => Ok((other.scalar_ordinal()?, false, 1)),
        }
    }

    /// Inverse of [`to_header_parts`](Self::to_header_parts).
    pub fn from_header_parts(ordinal: u32, is_vector: bool, logical_size: u32) -> Result<Self> {
        let scalar = Self::scalar_from_ordinal(ordinal)?;
        if is_vector {
            Ok(LogicalType::Vector(Box::new(scalar), logical_size))
        } else {
            Ok(scalar)
        }
    }

    /// Physical size in bytes per entry, or `None` for variable-length
    /// types (only `Str`, per the GLOSSARY).
    pub fn physical_size(&self) -> Option<usize> {
        match self {
            LogicalType::Bool | LogicalType::Byte => Some(1),
            LogicalType::Short => Some(2),
            LogicalType::Int | LogicalType::Float => Some(4),
            LogicalType::Long | LogicalType::Double | LogicalType::Complex32 => Some(8),
            LogicalType::Complex64 => Some(16),
            LogicalType::Str => None,
            LogicalType::Vector(inner, len) => inner.physical_size().map(|s| s * (*len as usize)),
        }
    }
}

/// A type-erased column value, one variant per [`LogicalType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Complex32(f32, f32),
    Complex64(f64, f64),
    Str(String),
    Vector(Vec<Value>),
}

/// Encodes/decodes [`Value`]s of one [`LogicalType`] to/from raw bytes.
///
/// Chosen once at column open time from the column's logical type tag
/// (spec §9). Fixed columns require `physical_size().is_some()`; variable
/// columns accept either, since a fixed-size type may still be stored in
/// a variable column.
pub trait Serializer: Send + Sync {
    fn logical_type(&self) -> LogicalType;

    fn physical_size(&self) -> Option<usize> {
        self.logical_type().physical_size()
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

macro_rules! scalar_serializer {
    ($name:ident, $logical:expr, $variant:ident, $ty:ty, $width:expr) => {
        struct $name;

        impl Serializer for $name {
            fn logical_type(&self) -> LogicalType {
                $logical
            }

            fn encode(&self, value: &Value) -> Result<Vec<u8>> {
                match value {
                    Value::$variant(v) => Ok(v.to_le_bytes().to_vec()),
                    _ => Err(Error::DataCorruption(
                        "value does not match column logical type".to_string(),
                    )),
                }
            }

            fn decode(&self, bytes: &[u8]) -> Result<Value> {
                let arr: [u8; $width] = bytes.try_into().map_err(|_| {
                    Error::DataCorruption(format!(
                        "expected {} bytes, got {}",
                        $width,
                        bytes.len()
                    ))
                })?;
                Ok(Value::$variant(<$ty>::from_le_bytes(arr)))
            }
        }
    };
}

scalar_serializer!(ByteSerializer, LogicalType::Byte, Byte, u8, 1);
scalar_serializer!(ShortSerializer, LogicalType::Short, Short, i16, 2);
scalar_serializer!(IntSerializer, LogicalType::Int, Int, i32, 4);
scalar_serializer!(LongSerializer, LogicalType::Long, Long, i64, 8);
scalar_serializer!(FloatSerializer, LogicalType::Float, Float, f32, 4);
scalar_serializer!(DoubleSerializer, LogicalType::Double, Double, f64, 8);

struct BoolSerializer;

impl Serializer for BoolSerializer {
    fn logical_type(&self) -> LogicalType {
        LogicalType::Bool
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::Bool(b) => Ok(vec![if *b { 1 } else { 0 }]),
            _ => Err(Error::DataCorruption(
                "value does not match column logical type".to_string(),
            )),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        if bytes.len() != 1 {
            return Err(Error::DataCorruption(format!(
                "expected 1 byte, got {}",
                bytes.len()
            )));
        }
        Ok(Value::Bool(bytes[0] != 0))
    }
}

struct Complex32Serializer;

impl Serializer for Complex32Serializer {
    fn logical_type(&self) -> LogicalType {
        LogicalType::Complex32
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::Complex32(re, im) => {
                let mut out = Vec::with_capacity(8);
                out.extend_from_slice(&re.to_le_bytes());
                out.extend_from_slice(&im.to_le_bytes());
                Ok(out)
            }
            _ => Err(Error::DataCorruption(
                "value does not match column logical type".to_string(),
            )),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        if bytes.len() != 8 {
            return Err(Error::DataCorruption(format!(
                "expected 8 bytes, got {}",
                bytes.len()
            )));
        }
        let re = f32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let im = f32::from_le_bytes(bytes[4..8].try_into().unwrap());
        Ok(Value::Complex32(re, im))
    }
}

struct Complex64Serializer;

impl Serializer for Complex64Serializer {
    fn logical_type(&self) -> LogicalType {
        LogicalType::Complex64
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::Complex64(re, im) => {
                let mut out = Vec::with_capacity(16);
                out.extend_from_slice(&re.to_le_bytes());
                out.extend_from_slice(&im.to_le_bytes());
                Ok(out)
            }
            _ => Err(Error::DataCorruption(
                "value does not match column logical type".to_string(),
            )),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        if bytes.len() != 16 {
            return Err(Error::DataCorruption(format!(
                "expected 16 bytes, got {}",
                bytes.len()
            )));
        }
        let re = f64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let im = f64::from_le_bytes(bytes[8..16].try_into().unwrap());
        Ok(Value::Complex64(re, im))
    }
}

struct StrSerializer;

impl Serializer for StrSerializer {
    fn logical_type(&self) -> LogicalType {
        LogicalType::Str
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::Str(s) => Ok(s.as_bytes().to_vec()),
            _ => Err(Error::DataCorruption(
                "value does not match column logical type".to_string(),
            )),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        String::from_utf8(bytes.to_vec())
            .map(Value::Str)
            .map_err(|e| Error::DataCorruption(format!("invalid UTF-8 in column value: {e}")))
    }
}

struct VectorSerializer {
    logical_type: LogicalType,
    element: Box<dyn Serializer>,
    len: u32,
}

impl Serializer for VectorSerializer {
    fn logical_type(&self) -> LogicalType {
        self.logical_type.clone()
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::Vector(values) => {
                if values.len() as u32 != self.len {
                    return Err(Error::DataCorruption(format!(
                        "vector length mismatch: column expects {}, got {}",
                        self.len,
                        values.len()
                    )));
                }
                let mut out = Vec::new();
                for v in values {
                    out.extend_from_slice(&self.element.encode(v)?);
                }
                Ok(out)
            }
            _ => Err(Error::DataCorruption(
                "value does not match column logical type".to_string(),
            )),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let elem_width = self.element.physical_size().ok_or_else(|| {
            Error::DataCorruption("vector element type has no fixed width".to_string())
        })?;
        if bytes.len() != elem_width * self.len as usize {
            return Err(Error::DataCorruption(format!(
                "expected {} bytes for vector, got {}",
                elem_width * self.len as usize,
                bytes.len()
            )));
        }
        let mut values = Vec::with_capacity(self.len as usize);
        for chunk in bytes.chunks_exact(elem_width) {
            values.push(self.element.decode(chunk)?);
        }
        Ok(Value::Vector(values))
    }
}

/// Build the `Serializer` for a `LogicalType`, chosen once at column open
/// time (spec §9).
pub fn serializer_for(logical_type: &LogicalType) -> Result<Box<dyn Serializer>> {
    Ok(match logical_type {
        LogicalType::Bool => Box::new(BoolSerializer),
        LogicalType::Byte => Box::new(ByteSerializer),
        LogicalType::Short => Box::new(ShortSerializer),
        LogicalType::Int => Box::new(IntSerializer),
        LogicalType::Long => Box::new(LongSerializer),
        LogicalType::Float => Box::new(FloatSerializer),
        LogicalType::Double => Box::new(DoubleSerializer),
        LogicalType::Complex32 => Box::new(Complex32Serializer),
        LogicalType::Complex64 => Box::new(Complex64Serializer),
        LogicalType::Str => Box::new(StrSerializer),
        LogicalType::Vector(inner, len) => Box::new(VectorSerializer {
            logical_type: logical_type.clone(),
            element: serializer_for(inner)?,
            len: *len,
        }),
    })
}
