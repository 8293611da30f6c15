//! Forward-only binary document cursor with bookmark support.

use rust_decimal::Decimal;

use crate::error::{BsonError, BsonResult};
use crate::oid::ObjectId;
use crate::value::{Document, ElementType, Value};

#[derive(Debug, Clone, Copy)]
struct Frame {
    // offset just past the document's last byte (the terminator is at end - 1)
    end: usize,
}

/// A saved reader position.
///
/// The cursor state is a plain value: restoring a bookmark rewinds the
/// reader exactly, including the open-document stack.
#[derive(Debug, Clone)]
pub struct ReaderBookmark {
    pos: usize,
    frames: Vec<Frame>,
}

/// A forward-only cursor over an encoded document.
///
/// # Example
///
/// ```rust
/// use manta_bson::codec::{DocumentReader, encode_document};
/// use manta_bson::doc;
///
/// let bytes = encode_document(&doc! { "age": 30 }).unwrap();
/// let mut reader = DocumentReader::new(&bytes);
/// reader.read_start_document().unwrap();
/// assert!(reader.has_element().unwrap());
/// reader.read_element_type().unwrap();
/// assert_eq!(reader.read_name().unwrap(), "age");
/// assert_eq!(reader.read_int32().unwrap(), 30);
/// ```
#[derive(Debug)]
pub struct DocumentReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    frames: Vec<Frame>,
}

impl<'a> DocumentReader<'a> {
    /// Create a reader over encoded bytes.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            frames: Vec::new(),
        }
    }

    /// Save the current cursor position.
    pub fn bookmark(&self) -> ReaderBookmark {
        ReaderBookmark {
            pos: self.pos,
            frames: self.frames.clone(),
        }
    }

    /// Restore the cursor to a previously saved position.
    pub fn return_to_bookmark(&mut self, bookmark: ReaderBookmark) {
        self.pos = bookmark.pos;
        self.frames = bookmark.frames;
    }

    /// Open a document: the top-level one, or an embedded document whose
    /// element header was already consumed.
    pub fn read_start_document(&mut self) -> BsonResult<()> {
        let start = self.pos;
        let len = self.read_len_prefix()?;
        let end = start + len;
        if let Some(parent) = self.frames.last() {
            if end > parent.end {
                return Err(BsonError::codec(
                    "embedded document overruns its enclosing document",
                ));
            }
        }
        if end > self.bytes.len() {
            return Err(BsonError::codec("document length exceeds available bytes"));
        }
        self.frames.push(Frame { end });
        Ok(())
    }

    /// Open an array (arrays use the document encoding).
    pub fn read_start_array(&mut self) -> BsonResult<()> {
        self.read_start_document()
    }

    /// Check whether another element follows in the current document.
    pub fn has_element(&self) -> BsonResult<bool> {
        let frame = self.current_frame()?;
        if self.pos >= frame.end {
            return Err(BsonError::codec("cursor ran past the end of the document"));
        }
        Ok(self.bytes[self.pos] != 0)
    }

    /// Read the next element's type tag.
    pub fn read_element_type(&mut self) -> BsonResult<ElementType> {
        let byte = self.take(1)?[0];
        ElementType::from_byte(byte)
            .ok_or_else(|| BsonError::codec(format!("unknown element type byte 0x{byte:02x}")))
    }

    /// Read the next element's name.
    pub fn read_name(&mut self) -> BsonResult<String> {
        let frame = self.current_frame()?;
        let end = frame.end;
        let nul = self.bytes[self.pos..end]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| BsonError::codec("unterminated element name"))?;
        let raw = &self.bytes[self.pos..self.pos + nul];
        let name = std::str::from_utf8(raw)
            .map_err(|_| BsonError::codec("element name is not valid UTF-8"))?
            .to_string();
        self.pos += nul + 1;
        Ok(name)
    }

    /// Consume the document terminator and close the current document.
    pub fn read_end_document(&mut self) -> BsonResult<()> {
        let frame = self.current_frame()?;
        if self.pos + 1 != frame.end {
            return Err(BsonError::codec(
                "read_end_document called before the end of the document",
            ));
        }
        if self.bytes[self.pos] != 0 {
            return Err(BsonError::codec("missing document terminator"));
        }
        self.pos += 1;
        self.frames.pop();
        Ok(())
    }

    /// Close the current array.
    pub fn read_end_array(&mut self) -> BsonResult<()> {
        self.read_end_document()
    }

    /// Read a double payload.
    pub fn read_double(&mut self) -> BsonResult<f64> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// Read a string payload.
    pub fn read_string(&mut self) -> BsonResult<String> {
        let len = self.read_len_i32()?;
        if len < 1 {
            return Err(BsonError::codec(format!("invalid string length {len}")));
        }
        let raw = self.take(len as usize)?;
        let (body, terminator) = raw.split_at(raw.len() - 1);
        if terminator != [0] {
            return Err(BsonError::codec("string is missing its NUL terminator"));
        }
        String::from_utf8(body.to_vec())
            .map_err(|_| BsonError::codec("string is not valid UTF-8"))
    }

    /// Read a binary payload.
    pub fn read_binary(&mut self) -> BsonResult<(u8, Vec<u8>)> {
        let len = self.read_len_i32()?;
        if len < 0 {
            return Err(BsonError::codec(format!("invalid binary length {len}")));
        }
        let subtype = self.take(1)?[0];
        let bytes = self.take(len as usize)?.to_vec();
        Ok((subtype, bytes))
    }

    /// Read an object id payload.
    pub fn read_object_id(&mut self) -> BsonResult<ObjectId> {
        Ok(ObjectId::from_bytes(self.take_array()?))
    }

    /// Read a boolean payload.
    pub fn read_boolean(&mut self) -> BsonResult<bool> {
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(BsonError::codec(format!(
                "invalid boolean byte 0x{other:02x}"
            ))),
        }
    }

    /// Read a date-time payload (epoch milliseconds).
    pub fn read_datetime(&mut self) -> BsonResult<i64> {
        self.read_int64()
    }

    /// Read an int32 payload.
    pub fn read_int32(&mut self) -> BsonResult<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    /// Read an int64 payload.
    pub fn read_int64(&mut self) -> BsonResult<i64> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    /// Read a decimal payload.
    pub fn read_decimal(&mut self) -> BsonResult<Decimal> {
        Ok(Decimal::deserialize(self.take_array()?))
    }

    /// Skip over the payload of an element of the given type.
    pub fn skip_value(&mut self, ty: ElementType) -> BsonResult<()> {
        match ty {
            ElementType::Double | ElementType::DateTime | ElementType::Int64 => {
                self.take(8).map(|_| ())
            }
            ElementType::String => {
                let len = self.read_len_i32()?;
                if len < 1 {
                    return Err(BsonError::codec(format!("invalid string length {len}")));
                }
                self.take(len as usize).map(|_| ())
            }
            ElementType::Document | ElementType::Array => {
                let start = self.pos;
                let len = self.read_len_prefix()?;
                self.pos = start;
                self.take(len).map(|_| ())
            }
            ElementType::Binary => {
                let len = self.read_len_i32()?;
                if len < 0 {
                    return Err(BsonError::codec(format!("invalid binary length {len}")));
                }
                self.take(1 + len as usize).map(|_| ())
            }
            ElementType::ObjectId => self.take(12).map(|_| ()),
            ElementType::Boolean => self.take(1).map(|_| ()),
            ElementType::Null => Ok(()),
            ElementType::Int32 => self.take(4).map(|_| ()),
            ElementType::Decimal => self.take(16).map(|_| ()),
        }
    }

    /// Read the payload of an element of the given type as a [`Value`],
    /// recursing into documents and arrays.
    pub fn read_value(&mut self, ty: ElementType) -> BsonResult<Value> {
        match ty {
            ElementType::Double => self.read_double().map(Value::Double),
            ElementType::String => self.read_string().map(Value::String),
            ElementType::Document => {
                self.read_start_document()?;
                let mut doc = Document::new();
                while self.has_element()? {
                    let ty = self.read_element_type()?;
                    let name = self.read_name()?;
                    let value = self.read_value(ty)?;
                    doc.insert(name, value);
                }
                self.read_end_document()?;
                Ok(Value::Document(doc))
            }
            ElementType::Array => {
                self.read_start_array()?;
                let mut items = Vec::new();
                while self.has_element()? {
                    let ty = self.read_element_type()?;
                    self.read_name()?; // index name, ignored
                    items.push(self.read_value(ty)?);
                }
                self.read_end_array()?;
                Ok(Value::Array(items))
            }
            ElementType::Binary => {
                let (subtype, bytes) = self.read_binary()?;
                Ok(Value::Binary { subtype, bytes })
            }
            ElementType::ObjectId => self.read_object_id().map(Value::ObjectId),
            ElementType::Boolean => self.read_boolean().map(Value::Boolean),
            ElementType::DateTime => self.read_datetime().map(Value::DateTime),
            ElementType::Null => Ok(Value::Null),
            ElementType::Int32 => self.read_int32().map(Value::Int32),
            ElementType::Int64 => self.read_int64().map(Value::Int64),
            ElementType::Decimal => self.read_decimal().map(Value::Decimal),
        }
    }

    /// Scan the current document for a named element and return its value,
    /// leaving the cursor where it was.
    pub fn find_element(&mut self, name: &str) -> BsonResult<Option<Value>> {
        let bookmark = self.bookmark();
        let result = self.scan_for(name);
        self.return_to_bookmark(bookmark);
        result
    }

    fn scan_for(&mut self, name: &str) -> BsonResult<Option<Value>> {
        while self.has_element()? {
            let ty = self.read_element_type()?;
            let element_name = self.read_name()?;
            if element_name == name {
                return Ok(Some(self.read_value(ty)?));
            }
            self.skip_value(ty)?;
        }
        Ok(None)
    }

    fn current_frame(&self) -> BsonResult<Frame> {
        self.frames
            .last()
            .copied()
            .ok_or_else(|| BsonError::codec("no document is open"))
    }

    // Reads an i32 length prefix and validates it as a document length.
    fn read_len_prefix(&mut self) -> BsonResult<usize> {
        let len = self.read_len_i32()?;
        if len < 5 {
            return Err(BsonError::codec(format!("invalid document length {len}")));
        }
        Ok(len as usize)
    }

    fn read_len_i32(&mut self) -> BsonResult<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    fn take_array<const N: usize>(&mut self) -> BsonResult<[u8; N]> {
        let bytes = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn take(&mut self, n: usize) -> BsonResult<&'a [u8]> {
        let limit = self
            .frames
            .last()
            .map_or(self.bytes.len(), |frame| frame.end);
        if self.pos + n > limit {
            return Err(BsonError::codec("unexpected end of document"));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

/// Decode a full top-level [`Document`] from bytes.
pub fn decode_document(bytes: &[u8]) -> BsonResult<Document> {
    let mut reader = DocumentReader::new(bytes);
    let value = reader.read_value(ElementType::Document)?;
    if reader.pos != bytes.len() {
        return Err(BsonError::codec(format!(
            "{} trailing byte(s) after document",
            bytes.len() - reader.pos
        )));
    }
    value.into_document()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_document;
    use crate::doc;
    use crate::value::Value;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    fn sample() -> Document {
        doc! {
            "double": 1.5,
            "string": "hello",
            "nested": doc! { "inner": 7 },
            "array": vec![1i32, 2, 3],
            "binary": Value::binary(0x02, vec![0xDE, 0xAD]),
            "oid": ObjectId::new(),
            "flag": true,
            "when": Value::DateTime(1_700_000_000_000),
            "nothing": Value::Null,
            "small": 42i32,
            "big": 42i64,
            "money": Decimal::new(12345, 2),
        }
    }

    #[test]
    fn test_roundtrip_all_types() {
        let doc = sample();
        let bytes = encode_document(&doc).unwrap();
        let decoded = decode_document(&bytes).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn test_bookmark_and_rewind() {
        let bytes = encode_document(&doc! { "a": 1, "b": 2 }).unwrap();
        let mut reader = DocumentReader::new(&bytes);
        reader.read_start_document().unwrap();

        let bookmark = reader.bookmark();
        let ty = reader.read_element_type().unwrap();
        assert_eq!(reader.read_name().unwrap(), "a");
        reader.skip_value(ty).unwrap();
        let ty = reader.read_element_type().unwrap();
        assert_eq!(reader.read_name().unwrap(), "b");
        reader.skip_value(ty).unwrap();

        reader.return_to_bookmark(bookmark);
        reader.read_element_type().unwrap();
        assert_eq!(reader.read_name().unwrap(), "a");
    }

    #[test]
    fn test_find_element_does_not_move_cursor() {
        let bytes = encode_document(&doc! { "a": 1, "_t": "Leaf", "b": 2 }).unwrap();
        let mut reader = DocumentReader::new(&bytes);
        reader.read_start_document().unwrap();

        let found = reader.find_element("_t").unwrap();
        assert_eq!(found, Some(Value::String("Leaf".to_string())));

        // cursor is still at the first element
        reader.read_element_type().unwrap();
        assert_eq!(reader.read_name().unwrap(), "a");
    }

    #[test]
    fn test_find_element_missing() {
        let bytes = encode_document(&doc! { "a": 1 }).unwrap();
        let mut reader = DocumentReader::new(&bytes);
        reader.read_start_document().unwrap();
        assert_eq!(reader.find_element("zzz").unwrap(), None);
    }

    #[test]
    fn test_truncated_input_is_an_error() {
        let bytes = encode_document(&doc! { "a": 1, "b": "text" }).unwrap();
        for cut in 1..bytes.len() {
            let decoded = decode_document(&bytes[..cut]);
            assert!(decoded.is_err(), "truncation at {cut} should fail");
        }
    }

    #[test]
    fn test_unknown_type_byte_is_an_error() {
        let mut bytes = encode_document(&doc! { "a": 1 }).unwrap();
        // corrupt the element type byte
        bytes[4] = 0x7F;
        assert!(decode_document(&bytes).is_err());
    }

    #[test]
    fn test_trailing_bytes_are_an_error() {
        let mut bytes = encode_document(&doc! { "a": 1 }).unwrap();
        bytes.push(0xFF);
        let err = decode_document(&bytes).unwrap_err();
        assert!(err.to_string().contains("trailing"));
    }

    #[test]
    fn test_empty_document_roundtrip() {
        let bytes = encode_document(&Document::new()).unwrap();
        assert_eq!(bytes.len(), 5);
        assert_eq!(decode_document(&bytes).unwrap(), Document::new());
    }
}
