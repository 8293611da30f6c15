//! Value serializers.
//!
//! A [`ValueSerializer`] converts a member's in-memory [`Value`] to and
//! from its wire representation. Most serializers are identity conversions
//! with type checking; the representation variants cover the cases where a
//! member is stored under a different element type than its natural one
//! (an integer stored as a string, a decimal stored as a double, an enum
//! ordinal stored under its variant name).

mod registry;

pub use registry::SerializerRegistry;

use std::any::TypeId;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use crate::error::{BsonError, BsonResult};
use crate::oid::ObjectId;
use crate::value::{ElementType, Value};

/// The shape of a member's type, used as the serializer lookup key.
///
/// Container shapes play the role open-generic registrations play in
/// runtimes with reflection: a `Sequence` or `Optional` resolves by
/// recursing on its item shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeShape {
    /// A scalar type, keyed by its `TypeId`.
    Scalar {
        /// Type identity.
        id: TypeId,
        /// Type name, for diagnostics.
        name: &'static str,
    },
    /// An optional wrapper around an inner shape.
    Optional(Box<TypeShape>),
    /// A sequence of an inner shape.
    Sequence(Box<TypeShape>),
    /// A class-map-backed document type.
    Mapped {
        /// Type identity.
        id: TypeId,
        /// Type name, for diagnostics.
        name: &'static str,
    },
}

impl TypeShape {
    /// The shape of a scalar type.
    pub fn scalar<T: 'static>() -> Self {
        Self::Scalar {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The shape of a class-mapped type.
    pub fn mapped<T: 'static>() -> Self {
        Self::Mapped {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Wrap this shape in an optional.
    pub fn optional(self) -> Self {
        Self::Optional(Box::new(self))
    }

    /// Wrap this shape in a sequence.
    pub fn sequence(self) -> Self {
        Self::Sequence(Box::new(self))
    }

    /// A readable description for error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::Scalar { name, .. } => (*name).to_string(),
            Self::Optional(inner) => format!("Option<{}>", inner.describe()),
            Self::Sequence(inner) => format!("Vec<{}>", inner.describe()),
            Self::Mapped { name, .. } => (*name).to_string(),
        }
    }
}

/// Converts member values to and from their wire representation.
pub trait ValueSerializer: Send + Sync {
    /// The element type this serializer writes.
    fn wire_type(&self) -> ElementType;

    /// Convert an in-memory value to its wire form.
    fn to_wire(&self, value: &Value) -> BsonResult<Value>;

    /// Convert a wire value back to its in-memory form.
    fn from_wire(&self, value: Value) -> BsonResult<Value>;
}

/// Identity serializer for doubles.
#[derive(Debug, Default)]
pub struct DoubleSerializer;

impl ValueSerializer for DoubleSerializer {
    fn wire_type(&self) -> ElementType {
        ElementType::Double
    }

    fn to_wire(&self, value: &Value) -> BsonResult<Value> {
        value.as_f64().map(Value::Double)
    }

    fn from_wire(&self, value: Value) -> BsonResult<Value> {
        value.as_f64().map(Value::Double)
    }
}

/// Identity serializer for strings.
#[derive(Debug, Default)]
pub struct StringSerializer;

impl ValueSerializer for StringSerializer {
    fn wire_type(&self) -> ElementType {
        ElementType::String
    }

    fn to_wire(&self, value: &Value) -> BsonResult<Value> {
        value.as_str().map(|s| Value::String(s.to_string()))
    }

    fn from_wire(&self, value: Value) -> BsonResult<Value> {
        value.as_str()?;
        Ok(value)
    }
}

/// Identity serializer for booleans.
#[derive(Debug, Default)]
pub struct BooleanSerializer;

impl ValueSerializer for BooleanSerializer {
    fn wire_type(&self) -> ElementType {
        ElementType::Boolean
    }

    fn to_wire(&self, value: &Value) -> BsonResult<Value> {
        value.as_bool().map(Value::Boolean)
    }

    fn from_wire(&self, value: Value) -> BsonResult<Value> {
        value.as_bool().map(Value::Boolean)
    }
}

/// Identity serializer for binary blobs.
#[derive(Debug, Default)]
pub struct BinarySerializer;

impl ValueSerializer for BinarySerializer {
    fn wire_type(&self) -> ElementType {
        ElementType::Binary
    }

    fn to_wire(&self, value: &Value) -> BsonResult<Value> {
        match value {
            Value::Binary { .. } => Ok(value.clone()),
            other => Err(BsonError::type_mismatch("binary", other.kind().to_string())),
        }
    }

    fn from_wire(&self, value: Value) -> BsonResult<Value> {
        match value {
            Value::Binary { .. } => Ok(value),
            other => Err(BsonError::type_mismatch("binary", other.kind().to_string())),
        }
    }
}

/// Identity serializer for raw document members.
#[derive(Debug, Default)]
pub struct RawDocumentSerializer;

impl ValueSerializer for RawDocumentSerializer {
    fn wire_type(&self) -> ElementType {
        ElementType::Document
    }

    fn to_wire(&self, value: &Value) -> BsonResult<Value> {
        value.as_document()?;
        Ok(value.clone())
    }

    fn from_wire(&self, value: Value) -> BsonResult<Value> {
        value.as_document()?;
        Ok(value)
    }
}

/// Wire representation for integer members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntRepresentation {
    /// Native 32-bit integer.
    #[default]
    Int32,
    /// Widened to a 64-bit integer.
    Int64,
    /// Decimal string.
    String,
}

/// Serializer for `i32` members.
#[derive(Debug, Default)]
pub struct Int32Serializer {
    representation: IntRepresentation,
}

impl Int32Serializer {
    /// Use a non-default wire representation.
    pub fn with_representation(representation: IntRepresentation) -> Self {
        Self { representation }
    }
}

impl ValueSerializer for Int32Serializer {
    fn wire_type(&self) -> ElementType {
        match self.representation {
            IntRepresentation::Int32 => ElementType::Int32,
            IntRepresentation::Int64 => ElementType::Int64,
            IntRepresentation::String => ElementType::String,
        }
    }

    fn to_wire(&self, value: &Value) -> BsonResult<Value> {
        let v = value.as_i32()?;
        Ok(match self.representation {
            IntRepresentation::Int32 => Value::Int32(v),
            IntRepresentation::Int64 => Value::Int64(i64::from(v)),
            IntRepresentation::String => Value::String(v.to_string()),
        })
    }

    fn from_wire(&self, value: Value) -> BsonResult<Value> {
        match value {
            Value::Int32(v) => Ok(Value::Int32(v)),
            Value::Int64(v) => i32::try_from(v).map(Value::Int32).map_err(|_| {
                BsonError::serialization(format!("int64 value {v} does not fit in an int32"))
            }),
            Value::String(s) if self.representation == IntRepresentation::String => s
                .parse::<i32>()
                .map(Value::Int32)
                .map_err(|_| BsonError::serialization(format!("invalid int32 string '{s}'"))),
            other => Err(BsonError::type_mismatch("int32", other.kind().to_string())),
        }
    }
}

/// Serializer for `i64` members.
#[derive(Debug)]
pub struct Int64Serializer {
    representation: IntRepresentation,
}

impl Default for Int64Serializer {
    fn default() -> Self {
        Self {
            representation: IntRepresentation::Int64,
        }
    }
}

impl Int64Serializer {
    /// Use a non-default wire representation.
    pub fn with_representation(representation: IntRepresentation) -> Self {
        Self { representation }
    }
}

impl ValueSerializer for Int64Serializer {
    fn wire_type(&self) -> ElementType {
        match self.representation {
            IntRepresentation::Int32 => ElementType::Int32,
            IntRepresentation::Int64 => ElementType::Int64,
            IntRepresentation::String => ElementType::String,
        }
    }

    fn to_wire(&self, value: &Value) -> BsonResult<Value> {
        let v = value.as_i64()?;
        Ok(match self.representation {
            IntRepresentation::Int32 => Value::Int32(i32::try_from(v).map_err(|_| {
                BsonError::serialization(format!("int64 value {v} does not fit in an int32"))
            })?),
            IntRepresentation::Int64 => Value::Int64(v),
            IntRepresentation::String => Value::String(v.to_string()),
        })
    }

    fn from_wire(&self, value: Value) -> BsonResult<Value> {
        match value {
            Value::Int32(v) => Ok(Value::Int64(i64::from(v))),
            Value::Int64(v) => Ok(Value::Int64(v)),
            Value::String(s) if self.representation == IntRepresentation::String => s
                .parse::<i64>()
                .map(Value::Int64)
                .map_err(|_| BsonError::serialization(format!("invalid int64 string '{s}'"))),
            other => Err(BsonError::type_mismatch("int64", other.kind().to_string())),
        }
    }
}

/// Wire representation for date-time members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateTimeRepresentation {
    /// Native date-time element (epoch milliseconds).
    #[default]
    DateTime,
    /// Plain 64-bit integer of epoch milliseconds.
    Int64Millis,
    /// RFC 3339 string.
    Rfc3339String,
}

/// Serializer for date-time members.
#[derive(Debug, Default)]
pub struct DateTimeSerializer {
    representation: DateTimeRepresentation,
}

impl DateTimeSerializer {
    /// Use a non-default wire representation.
    pub fn with_representation(representation: DateTimeRepresentation) -> Self {
        Self { representation }
    }
}

impl ValueSerializer for DateTimeSerializer {
    fn wire_type(&self) -> ElementType {
        match self.representation {
            DateTimeRepresentation::DateTime => ElementType::DateTime,
            DateTimeRepresentation::Int64Millis => ElementType::Int64,
            DateTimeRepresentation::Rfc3339String => ElementType::String,
        }
    }

    fn to_wire(&self, value: &Value) -> BsonResult<Value> {
        let millis = value.as_datetime_millis()?;
        Ok(match self.representation {
            DateTimeRepresentation::DateTime => Value::DateTime(millis),
            DateTimeRepresentation::Int64Millis => Value::Int64(millis),
            DateTimeRepresentation::Rfc3339String => {
                let dt = DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
                    BsonError::serialization(format!("timestamp out of range: {millis}"))
                })?;
                Value::String(dt.to_rfc3339())
            }
        })
    }

    fn from_wire(&self, value: Value) -> BsonResult<Value> {
        match value {
            Value::DateTime(millis) => Ok(Value::DateTime(millis)),
            Value::Int64(millis) => Ok(Value::DateTime(millis)),
            Value::String(s) => {
                let dt = DateTime::parse_from_rfc3339(&s).map_err(|e| {
                    BsonError::serialization(format!("invalid date-time string '{s}': {e}"))
                })?;
                Ok(Value::DateTime(dt.timestamp_millis()))
            }
            other => Err(BsonError::type_mismatch(
                "dateTime",
                other.kind().to_string(),
            )),
        }
    }
}

/// Wire representation for object id members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectIdRepresentation {
    /// Native 12-byte object id element.
    #[default]
    ObjectId,
    /// 24-character hex string.
    HexString,
}

/// Serializer for object id members.
#[derive(Debug, Default)]
pub struct ObjectIdSerializer {
    representation: ObjectIdRepresentation,
}

impl ObjectIdSerializer {
    /// Use a non-default wire representation.
    pub fn with_representation(representation: ObjectIdRepresentation) -> Self {
        Self { representation }
    }
}

impl ValueSerializer for ObjectIdSerializer {
    fn wire_type(&self) -> ElementType {
        match self.representation {
            ObjectIdRepresentation::ObjectId => ElementType::ObjectId,
            ObjectIdRepresentation::HexString => ElementType::String,
        }
    }

    fn to_wire(&self, value: &Value) -> BsonResult<Value> {
        let oid = value.as_object_id()?;
        Ok(match self.representation {
            ObjectIdRepresentation::ObjectId => Value::ObjectId(oid),
            ObjectIdRepresentation::HexString => Value::String(oid.to_hex()),
        })
    }

    fn from_wire(&self, value: Value) -> BsonResult<Value> {
        match value {
            Value::ObjectId(oid) => Ok(Value::ObjectId(oid)),
            Value::String(s) => ObjectId::parse_str(&s).map(Value::ObjectId),
            other => Err(BsonError::type_mismatch(
                "objectId",
                other.kind().to_string(),
            )),
        }
    }
}

/// Wire representation for decimal members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecimalRepresentation {
    /// Native decimal element.
    #[default]
    Decimal,
    /// Decimal string.
    String,
    /// Lossy 64-bit float.
    Double,
}

/// Serializer for decimal members.
#[derive(Debug, Default)]
pub struct DecimalSerializer {
    representation: DecimalRepresentation,
}

impl DecimalSerializer {
    /// Use a non-default wire representation.
    pub fn with_representation(representation: DecimalRepresentation) -> Self {
        Self { representation }
    }
}

impl ValueSerializer for DecimalSerializer {
    fn wire_type(&self) -> ElementType {
        match self.representation {
            DecimalRepresentation::Decimal => ElementType::Decimal,
            DecimalRepresentation::String => ElementType::String,
            DecimalRepresentation::Double => ElementType::Double,
        }
    }

    fn to_wire(&self, value: &Value) -> BsonResult<Value> {
        let v = value.as_decimal()?;
        Ok(match self.representation {
            DecimalRepresentation::Decimal => Value::Decimal(v),
            DecimalRepresentation::String => Value::String(v.to_string()),
            DecimalRepresentation::Double => Value::Double(v.to_f64().ok_or_else(|| {
                BsonError::serialization(format!("decimal {v} is not representable as a double"))
            })?),
        })
    }

    fn from_wire(&self, value: Value) -> BsonResult<Value> {
        match value {
            Value::Decimal(v) => Ok(Value::Decimal(v)),
            Value::String(s) => Decimal::from_str(&s)
                .map(Value::Decimal)
                .map_err(|e| BsonError::serialization(format!("invalid decimal '{s}': {e}"))),
            Value::Double(d) => Decimal::from_f64(d).map(Value::Decimal).ok_or_else(|| {
                BsonError::serialization(format!("double {d} is not representable as a decimal"))
            }),
            other => Err(BsonError::type_mismatch("decimal", other.kind().to_string())),
        }
    }
}

/// Serializer for C-like enum members stored under their variant names.
///
/// The in-memory value is the variant ordinal as an `Int32`; the wire value
/// is the variant name.
#[derive(Debug)]
pub struct EnumStringSerializer {
    variants: Vec<(i32, String)>,
}

impl EnumStringSerializer {
    /// Create a serializer from `(ordinal, name)` pairs.
    pub fn new(variants: &[(i32, &str)]) -> Self {
        Self {
            variants: variants
                .iter()
                .map(|(ord, name)| (*ord, (*name).to_string()))
                .collect(),
        }
    }
}

impl ValueSerializer for EnumStringSerializer {
    fn wire_type(&self) -> ElementType {
        ElementType::String
    }

    fn to_wire(&self, value: &Value) -> BsonResult<Value> {
        let ordinal = value.as_i32()?;
        self.variants
            .iter()
            .find(|(ord, _)| *ord == ordinal)
            .map(|(_, name)| Value::String(name.clone()))
            .ok_or_else(|| {
                BsonError::serialization(format!("no enum variant with ordinal {ordinal}"))
            })
    }

    fn from_wire(&self, value: Value) -> BsonResult<Value> {
        match value {
            Value::String(s) => self
                .variants
                .iter()
                .find(|(_, name)| *name == s)
                .map(|(ord, _)| Value::Int32(*ord))
                .ok_or_else(|| BsonError::serialization(format!("no enum variant named '{s}'"))),
            Value::Int32(v) => Ok(Value::Int32(v)),
            other => Err(BsonError::type_mismatch("string", other.kind().to_string())),
        }
    }
}

/// Serializer for sequence members, delegating per item.
pub struct ArraySerializer {
    item: Arc<dyn ValueSerializer>,
}

impl ArraySerializer {
    /// Create an array serializer over an item serializer.
    pub fn new(item: Arc<dyn ValueSerializer>) -> Self {
        Self { item }
    }

    /// The item serializer.
    pub fn item(&self) -> &Arc<dyn ValueSerializer> {
        &self.item
    }
}

impl ValueSerializer for ArraySerializer {
    fn wire_type(&self) -> ElementType {
        ElementType::Array
    }

    fn to_wire(&self, value: &Value) -> BsonResult<Value> {
        let items = value.as_array()?;
        let converted: BsonResult<Vec<Value>> =
            items.iter().map(|v| self.item.to_wire(v)).collect();
        Ok(Value::Array(converted?))
    }

    fn from_wire(&self, value: Value) -> BsonResult<Value> {
        let items = value.into_array()?;
        let converted: BsonResult<Vec<Value>> =
            items.into_iter().map(|v| self.item.from_wire(v)).collect();
        Ok(Value::Array(converted?))
    }
}

/// Serializer for optional members: null passes through, anything else
/// delegates to the inner serializer.
pub struct OptionalSerializer {
    inner: Arc<dyn ValueSerializer>,
}

impl OptionalSerializer {
    /// Create an optional serializer over an inner serializer.
    pub fn new(inner: Arc<dyn ValueSerializer>) -> Self {
        Self { inner }
    }
}

impl ValueSerializer for OptionalSerializer {
    fn wire_type(&self) -> ElementType {
        self.inner.wire_type()
    }

    fn to_wire(&self, value: &Value) -> BsonResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        self.inner.to_wire(value)
    }

    fn from_wire(&self, value: Value) -> BsonResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        self.inner.from_wire(value)
    }
}

/// Pass-through serializer for class-mapped members; the class map's
/// accessors perform the actual conversion.
#[derive(Debug)]
pub struct MappedStructSerializer {
    type_name: String,
}

impl MappedStructSerializer {
    /// Create a pass-through serializer for a mapped type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }
}

impl ValueSerializer for MappedStructSerializer {
    fn wire_type(&self) -> ElementType {
        ElementType::Document
    }

    fn to_wire(&self, value: &Value) -> BsonResult<Value> {
        match value {
            Value::Document(_) => Ok(value.clone()),
            other => Err(BsonError::type_mismatch(
                self.type_name.clone(),
                other.kind().to_string(),
            )),
        }
    }

    fn from_wire(&self, value: Value) -> BsonResult<Value> {
        match value {
            Value::Document(_) => Ok(value),
            other => Err(BsonError::type_mismatch(
                self.type_name.clone(),
                other.kind().to_string(),
            )),
        }
    }
}
