//! Forward-only binary document encoder.

use rust_decimal::Decimal;

use crate::error::{BsonError, BsonResult};
use crate::oid::ObjectId;
use crate::value::{Document, ElementType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Document,
    Array,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    len_offset: usize,
    next_index: u32,
}

/// A forward-only encoder for binary documents.
///
/// Length prefixes are reserved when a document or array is opened and
/// backpatched when it is closed. Inside a document, each value write must
/// be preceded by [`write_name`](Self::write_name); inside an array,
/// element names are generated from the running index.
///
/// # Example
///
/// ```rust
/// use manta_bson::codec::DocumentWriter;
///
/// let mut writer = DocumentWriter::new();
/// writer.write_start_document().unwrap();
/// writer.write_name("name").unwrap();
/// writer.write_string("Jack").unwrap();
/// writer.write_name("age").unwrap();
/// writer.write_int32(30).unwrap();
/// writer.write_end_document().unwrap();
/// let bytes = writer.into_bytes().unwrap();
/// assert!(!bytes.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct DocumentWriter {
    buf: Vec<u8>,
    frames: Vec<Frame>,
    pending_name: Option<String>,
}

impl DocumentWriter {
    /// Create a new writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Set the name of the next element.
    pub fn write_name(&mut self, name: &str) -> BsonResult<()> {
        match self.frames.last() {
            None => Err(BsonError::codec("cannot write a name outside a document")),
            Some(f) if f.kind == FrameKind::Array => {
                Err(BsonError::codec("array elements are named automatically"))
            }
            Some(_) => {
                if self.pending_name.is_some() {
                    return Err(BsonError::codec(format!(
                        "element name '{name}' written while a name was already pending"
                    )));
                }
                if name.as_bytes().contains(&0) {
                    return Err(BsonError::codec("element name contains a NUL byte"));
                }
                self.pending_name = Some(name.to_string());
                Ok(())
            }
        }
    }

    /// Open a document: the top-level one, or an embedded document element.
    pub fn write_start_document(&mut self) -> BsonResult<()> {
        if self.frames.is_empty() {
            if !self.buf.is_empty() {
                return Err(BsonError::codec("top-level document already written"));
            }
        } else {
            self.begin_element(ElementType::Document)?;
        }
        self.open_frame(FrameKind::Document);
        Ok(())
    }

    /// Close the current document and backpatch its length prefix.
    pub fn write_end_document(&mut self) -> BsonResult<()> {
        self.close_frame(FrameKind::Document)
    }

    /// Open an array element.
    pub fn write_start_array(&mut self) -> BsonResult<()> {
        if self.frames.is_empty() {
            return Err(BsonError::codec("an array cannot be the top-level value"));
        }
        self.begin_element(ElementType::Array)?;
        self.open_frame(FrameKind::Array);
        Ok(())
    }

    /// Close the current array and backpatch its length prefix.
    pub fn write_end_array(&mut self) -> BsonResult<()> {
        self.close_frame(FrameKind::Array)
    }

    /// Write a double element.
    pub fn write_double(&mut self, value: f64) -> BsonResult<()> {
        self.begin_element(ElementType::Double)?;
        self.buf.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Write a string element.
    pub fn write_string(&mut self, value: &str) -> BsonResult<()> {
        self.begin_element(ElementType::String)?;
        let len = value.len() as i32 + 1;
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    /// Write a binary element.
    pub fn write_binary(&mut self, subtype: u8, bytes: &[u8]) -> BsonResult<()> {
        self.begin_element(ElementType::Binary)?;
        let len = bytes.len() as i32;
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.push(subtype);
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Write an object id element.
    pub fn write_object_id(&mut self, value: ObjectId) -> BsonResult<()> {
        self.begin_element(ElementType::ObjectId)?;
        self.buf.extend_from_slice(&value.bytes());
        Ok(())
    }

    /// Write a boolean element.
    pub fn write_boolean(&mut self, value: bool) -> BsonResult<()> {
        self.begin_element(ElementType::Boolean)?;
        self.buf.push(u8::from(value));
        Ok(())
    }

    /// Write a date-time element (epoch milliseconds).
    pub fn write_datetime(&mut self, millis: i64) -> BsonResult<()> {
        self.begin_element(ElementType::DateTime)?;
        self.buf.extend_from_slice(&millis.to_le_bytes());
        Ok(())
    }

    /// Write a null element.
    pub fn write_null(&mut self) -> BsonResult<()> {
        self.begin_element(ElementType::Null)?;
        Ok(())
    }

    /// Write an int32 element.
    pub fn write_int32(&mut self, value: i32) -> BsonResult<()> {
        self.begin_element(ElementType::Int32)?;
        self.buf.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Write an int64 element.
    pub fn write_int64(&mut self, value: i64) -> BsonResult<()> {
        self.begin_element(ElementType::Int64)?;
        self.buf.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Write a decimal element.
    pub fn write_decimal(&mut self, value: Decimal) -> BsonResult<()> {
        self.begin_element(ElementType::Decimal)?;
        self.buf.extend_from_slice(&value.serialize());
        Ok(())
    }

    /// Write any value, recursing into documents and arrays.
    pub fn write_value(&mut self, value: &Value) -> BsonResult<()> {
        match value {
            Value::Double(v) => self.write_double(*v),
            Value::String(v) => self.write_string(v),
            Value::Document(doc) => {
                self.write_start_document()?;
                for (name, v) in doc.iter() {
                    self.write_name(name)?;
                    self.write_value(v)?;
                }
                self.write_end_document()
            }
            Value::Array(items) => {
                self.write_start_array()?;
                for v in items {
                    self.write_value(v)?;
                }
                self.write_end_array()
            }
            Value::Binary { subtype, bytes } => self.write_binary(*subtype, bytes),
            Value::ObjectId(v) => self.write_object_id(*v),
            Value::Boolean(v) => self.write_boolean(*v),
            Value::DateTime(v) => self.write_datetime(*v),
            Value::Null => self.write_null(),
            Value::Int32(v) => self.write_int32(*v),
            Value::Int64(v) => self.write_int64(*v),
            Value::Decimal(v) => self.write_decimal(*v),
        }
    }

    /// Write a named element.
    pub fn write_element(&mut self, name: &str, value: &Value) -> BsonResult<()> {
        self.write_name(name)?;
        self.write_value(value)
    }

    /// Finish encoding, failing if any document or array is still open.
    pub fn into_bytes(self) -> BsonResult<Vec<u8>> {
        if !self.frames.is_empty() {
            return Err(BsonError::codec(format!(
                "{} unclosed document(s)",
                self.frames.len()
            )));
        }
        Ok(self.buf)
    }

    fn open_frame(&mut self, kind: FrameKind) {
        self.frames.push(Frame {
            kind,
            len_offset: self.buf.len(),
            next_index: 0,
        });
        self.buf.extend_from_slice(&[0, 0, 0, 0]);
    }

    fn close_frame(&mut self, kind: FrameKind) -> BsonResult<()> {
        if self.pending_name.is_some() {
            return Err(BsonError::codec("element name written but no value"));
        }
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| BsonError::codec("no open document to close"))?;
        if frame.kind != kind {
            self.frames.push(frame);
            return Err(BsonError::codec("mismatched document/array close"));
        }
        self.buf.push(0);
        let len = (self.buf.len() - frame.len_offset) as i32;
        self.buf[frame.len_offset..frame.len_offset + 4].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }

    // Writes the element header (type byte + name) for the next value.
    fn begin_element(&mut self, ty: ElementType) -> BsonResult<()> {
        let frame = self
            .frames
            .last_mut()
            .ok_or_else(|| BsonError::codec("cannot write a value outside a document"))?;
        match frame.kind {
            FrameKind::Document => {
                let name = self.pending_name.take().ok_or_else(|| {
                    BsonError::codec(format!("{ty} value written without an element name"))
                })?;
                self.buf.push(ty.as_byte());
                self.buf.extend_from_slice(name.as_bytes());
                self.buf.push(0);
            }
            FrameKind::Array => {
                let index = frame.next_index.to_string();
                frame.next_index += 1;
                self.buf.push(ty.as_byte());
                self.buf.extend_from_slice(index.as_bytes());
                self.buf.push(0);
            }
        }
        Ok(())
    }
}

/// Encode a [`Document`] as bytes.
pub fn encode_document(doc: &Document) -> BsonResult<Vec<u8>> {
    let mut writer = DocumentWriter::new();
    writer.write_start_document()?;
    for (name, value) in doc.iter() {
        writer.write_element(name, value)?;
    }
    writer.write_end_document()?;
    writer.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;

    #[test]
    fn test_writer_requires_name_in_document() {
        let mut w = DocumentWriter::new();
        w.write_start_document().unwrap();
        let err = w.write_int32(1).unwrap_err();
        assert!(err.to_string().contains("without an element name"));
    }

    #[test]
    fn test_writer_rejects_unclosed_document() {
        let mut w = DocumentWriter::new();
        w.write_start_document().unwrap();
        assert!(w.into_bytes().is_err());
    }

    #[test]
    fn test_writer_rejects_nul_in_name() {
        let mut w = DocumentWriter::new();
        w.write_start_document().unwrap();
        assert!(w.write_name("bad\0name").is_err());
    }

    #[test]
    fn test_writer_rejects_mismatched_close() {
        let mut w = DocumentWriter::new();
        w.write_start_document().unwrap();
        assert!(w.write_end_array().is_err());
    }

    #[test]
    fn test_length_prefix_backpatched() {
        let bytes = encode_document(&doc! { "a": 1 }).unwrap();
        let len = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(len as usize, bytes.len());
        // terminator
        assert_eq!(*bytes.last().unwrap(), 0);
    }

    #[test]
    fn test_array_elements_are_index_named() {
        let bytes = encode_document(&doc! { "xs": vec![10i32, 20] }).unwrap();
        // element names "0" and "1" appear in the embedded array document
        let raw = bytes.as_slice();
        assert!(raw.windows(2).any(|w| w == [b'0', 0]));
        assert!(raw.windows(2).any(|w| w == [b'1', 0]));
    }
}
