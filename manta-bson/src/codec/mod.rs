//! Binary document codec.
//!
//! Documents are encoded as a length-prefixed, element-typed byte stream:
//!
//! ```text
//! document := i32 total_len, element*, 0x00
//! element  := type_byte, cstring name, payload
//! ```
//!
//! Arrays use the document encoding with ascending index strings as
//! element names. String payloads are `i32 len (incl. NUL), utf8, 0x00`;
//! numeric payloads are little-endian; the decimal payload is the 16-byte
//! `rust_decimal` representation.
//!
//! [`DocumentWriter`] is a forward-only encoder that backpatches length
//! prefixes when a document or array is closed. [`DocumentReader`] is a
//! forward-only cursor whose full position is a copyable value: saving a
//! [`ReaderBookmark`] and returning to it later lets callers peek ahead
//! (e.g. at a discriminator element) without disturbing the cursor.

mod reader;
mod writer;

pub use reader::{DocumentReader, ReaderBookmark, decode_document};
pub use writer::{DocumentWriter, encode_document};
