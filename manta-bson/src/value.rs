//! Dynamic document values.
//!
//! `Value` is the document AST exchanged between the codec, the class-map
//! serializers, and the query translators: ordered name/value documents,
//! arrays, and a fixed set of typed scalars.
//!
//! # Example
//!
//! ```rust
//! use manta_bson::{doc, Value};
//!
//! let filter = doc! {
//!     "status": "active",
//!     "age": doc! { "$gte": 18 },
//! };
//!
//! assert_eq!(filter.get_str("status").unwrap(), "active");
//! assert!(matches!(filter.get("age"), Some(Value::Document(_))));
//! ```

use std::fmt;

use indexmap::IndexMap;
use rust_decimal::Decimal;

use crate::error::{BsonError, BsonResult};
use crate::oid::ObjectId;

/// Wire-level element type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ElementType {
    /// 64-bit IEEE 754 float.
    Double = 0x01,
    /// UTF-8 string.
    String = 0x02,
    /// Embedded document.
    Document = 0x03,
    /// Array (encoded as a document with index keys).
    Array = 0x04,
    /// Binary blob with subtype.
    Binary = 0x05,
    /// 12-byte object identifier.
    ObjectId = 0x07,
    /// Boolean.
    Boolean = 0x08,
    /// Date-time as epoch milliseconds.
    DateTime = 0x09,
    /// Null.
    Null = 0x0A,
    /// 32-bit signed integer.
    Int32 = 0x10,
    /// 64-bit signed integer.
    Int64 = 0x12,
    /// Arbitrary-precision decimal.
    Decimal = 0x13,
}

impl ElementType {
    /// Decode a wire type byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Double),
            0x02 => Some(Self::String),
            0x03 => Some(Self::Document),
            0x04 => Some(Self::Array),
            0x05 => Some(Self::Binary),
            0x07 => Some(Self::ObjectId),
            0x08 => Some(Self::Boolean),
            0x09 => Some(Self::DateTime),
            0x0A => Some(Self::Null),
            0x10 => Some(Self::Int32),
            0x12 => Some(Self::Int64),
            0x13 => Some(Self::Decimal),
            _ => None,
        }
    }

    /// The wire byte for this element type.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Double => "double",
            Self::String => "string",
            Self::Document => "document",
            Self::Array => "array",
            Self::Binary => "binary",
            Self::ObjectId => "objectId",
            Self::Boolean => "boolean",
            Self::DateTime => "dateTime",
            Self::Null => "null",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Decimal => "decimal",
        };
        f.write_str(name)
    }
}

/// A dynamically typed document value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Embedded document.
    Document(Document),
    /// Array of values.
    Array(Vec<Value>),
    /// Binary blob with subtype.
    Binary {
        /// Application-defined subtype tag.
        subtype: u8,
        /// The raw bytes.
        bytes: Vec<u8>,
    },
    /// 12-byte object identifier.
    ObjectId(ObjectId),
    /// Boolean.
    Boolean(bool),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    /// Null.
    Null,
    /// 32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// Arbitrary-precision decimal.
    Decimal(Decimal),
}

impl Value {
    /// Create a binary value.
    pub fn binary(subtype: u8, bytes: Vec<u8>) -> Self {
        Self::Binary { subtype, bytes }
    }

    /// The element type of this value.
    pub fn kind(&self) -> ElementType {
        match self {
            Self::Double(_) => ElementType::Double,
            Self::String(_) => ElementType::String,
            Self::Document(_) => ElementType::Document,
            Self::Array(_) => ElementType::Array,
            Self::Binary { .. } => ElementType::Binary,
            Self::ObjectId(_) => ElementType::ObjectId,
            Self::Boolean(_) => ElementType::Boolean,
            Self::DateTime(_) => ElementType::DateTime,
            Self::Null => ElementType::Null,
            Self::Int32(_) => ElementType::Int32,
            Self::Int64(_) => ElementType::Int64,
            Self::Decimal(_) => ElementType::Decimal,
        }
    }

    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get as an `i32`.
    pub fn as_i32(&self) -> BsonResult<i32> {
        match self {
            Self::Int32(v) => Ok(*v),
            other => Err(BsonError::type_mismatch("int32", other.kind().to_string())),
        }
    }

    /// Get as an `i64`, widening from `Int32`.
    pub fn as_i64(&self) -> BsonResult<i64> {
        match self {
            Self::Int32(v) => Ok(i64::from(*v)),
            Self::Int64(v) => Ok(*v),
            other => Err(BsonError::type_mismatch("int64", other.kind().to_string())),
        }
    }

    /// Get as an `f64`.
    pub fn as_f64(&self) -> BsonResult<f64> {
        match self {
            Self::Double(v) => Ok(*v),
            other => Err(BsonError::type_mismatch("double", other.kind().to_string())),
        }
    }

    /// Get as a string slice.
    pub fn as_str(&self) -> BsonResult<&str> {
        match self {
            Self::String(v) => Ok(v),
            other => Err(BsonError::type_mismatch("string", other.kind().to_string())),
        }
    }

    /// Get as a `bool`.
    pub fn as_bool(&self) -> BsonResult<bool> {
        match self {
            Self::Boolean(v) => Ok(*v),
            other => Err(BsonError::type_mismatch("boolean", other.kind().to_string())),
        }
    }

    /// Get as a document reference.
    pub fn as_document(&self) -> BsonResult<&Document> {
        match self {
            Self::Document(v) => Ok(v),
            other => Err(BsonError::type_mismatch(
                "document",
                other.kind().to_string(),
            )),
        }
    }

    /// Consume into a document.
    pub fn into_document(self) -> BsonResult<Document> {
        match self {
            Self::Document(v) => Ok(v),
            other => Err(BsonError::type_mismatch(
                "document",
                other.kind().to_string(),
            )),
        }
    }

    /// Get as an array slice.
    pub fn as_array(&self) -> BsonResult<&[Value]> {
        match self {
            Self::Array(v) => Ok(v),
            other => Err(BsonError::type_mismatch("array", other.kind().to_string())),
        }
    }

    /// Consume into an array.
    pub fn into_array(self) -> BsonResult<Vec<Value>> {
        match self {
            Self::Array(v) => Ok(v),
            other => Err(BsonError::type_mismatch("array", other.kind().to_string())),
        }
    }

    /// Get as an `ObjectId`.
    pub fn as_object_id(&self) -> BsonResult<ObjectId> {
        match self {
            Self::ObjectId(v) => Ok(*v),
            other => Err(BsonError::type_mismatch(
                "objectId",
                other.kind().to_string(),
            )),
        }
    }

    /// Get as epoch milliseconds.
    pub fn as_datetime_millis(&self) -> BsonResult<i64> {
        match self {
            Self::DateTime(v) => Ok(*v),
            other => Err(BsonError::type_mismatch(
                "dateTime",
                other.kind().to_string(),
            )),
        }
    }

    /// Get as a decimal.
    pub fn as_decimal(&self) -> BsonResult<Decimal> {
        match self {
            Self::Decimal(v) => Ok(*v),
            other => Err(BsonError::type_mismatch("decimal", other.kind().to_string())),
        }
    }

    /// Get as a UTC date-time.
    pub fn as_datetime(&self) -> BsonResult<chrono::DateTime<chrono::Utc>> {
        let millis = self.as_datetime_millis()?;
        chrono::DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| BsonError::serialization(format!("timestamp out of range: {millis}")))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Self::ObjectId(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Self::Document(v)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Value {
    fn from(v: chrono::DateTime<chrono::Utc>) -> Self {
        Self::DateTime(v.timestamp_millis())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Self::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => {
                // serde_json handles escaping
                write!(f, "{}", serde_json::to_string(v).unwrap_or_default())
            }
            Self::Document(v) => write!(f, "{v}"),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Binary { subtype, bytes } => {
                write!(f, "Binary(0x{subtype:02x}, {} bytes)", bytes.len())
            }
            Self::ObjectId(v) => write!(f, "ObjectId(\"{v}\")"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::DateTime(v) => write!(f, "DateTime({v})"),
            Self::Null => f.write_str("null"),
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Decimal(v) => write!(f, "Decimal(\"{v}\")"),
        }
    }
}

/// An insertion-ordered document of name/value elements.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    elements: IndexMap<String, Value>,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an element, replacing any existing element with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.elements.insert(name.into(), value.into())
    }

    /// Get an element by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.elements.get(name)
    }

    /// Remove an element by name, preserving the order of the rest.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.elements.shift_remove(name)
    }

    /// Check whether an element exists.
    pub fn contains_key(&self, name: &str) -> bool {
        self.elements.contains_key(name)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Check whether the document has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Iterate elements in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.elements.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate element names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.elements.keys().map(String::as_str)
    }

    /// Get a string element.
    pub fn get_str(&self, name: &str) -> BsonResult<&str> {
        self.try_get(name)?.as_str()
    }

    /// Get an `i32` element.
    pub fn get_i32(&self, name: &str) -> BsonResult<i32> {
        self.try_get(name)?.as_i32()
    }

    /// Get an `i64` element.
    pub fn get_i64(&self, name: &str) -> BsonResult<i64> {
        self.try_get(name)?.as_i64()
    }

    /// Get an `f64` element.
    pub fn get_f64(&self, name: &str) -> BsonResult<f64> {
        self.try_get(name)?.as_f64()
    }

    /// Get a boolean element.
    pub fn get_bool(&self, name: &str) -> BsonResult<bool> {
        self.try_get(name)?.as_bool()
    }

    /// Get an embedded document element.
    pub fn get_document(&self, name: &str) -> BsonResult<&Document> {
        self.try_get(name)?.as_document()
    }

    /// Get an array element.
    pub fn get_array(&self, name: &str) -> BsonResult<&[Value]> {
        self.try_get(name)?.as_array()
    }

    /// Get an `ObjectId` element.
    pub fn get_object_id(&self, name: &str) -> BsonResult<ObjectId> {
        self.try_get(name)?.as_object_id()
    }

    fn try_get(&self, name: &str) -> BsonResult<&Value> {
        self.get(name)
            .ok_or_else(|| BsonError::serialization(format!("element '{name}' not found")))
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{ ")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(
                f,
                "{}: {value}",
                serde_json::to_string(name).unwrap_or_default()
            )?;
        }
        f.write_str(" }")
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            elements: iter.into_iter().collect(),
        }
    }
}

/// Construct a [`Document`] from `name: value` pairs.
///
/// ```rust
/// use manta_bson::doc;
///
/// let d = doc! { "name": "Jack", "age": 30 };
/// assert_eq!(d.get_i32("age").unwrap(), 30);
/// ```
#[macro_export]
macro_rules! doc {
    () => { $crate::Document::new() };
    ($($name:literal : $value:expr),+ $(,)?) => {{
        let mut document = $crate::Document::new();
        $(document.insert($name, $crate::Value::from($value));)+
        document
    }};
}
