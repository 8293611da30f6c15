//! # manta-bson
//!
//! Document value model, binary codec, and class-map serialization for the
//! Manta driver core.
//!
//! This crate provides:
//! - A dynamic [`Value`]/[`Document`] model with ordered elements
//! - A length-prefixed binary codec with a bookmarkable reader cursor
//! - Class maps: per-type metadata built from declarations plus conventions
//! - Discriminators for polymorphic hierarchies (scalar and hierarchical)
//! - A serializer registry with representation overrides and memoization
//!
//! ## Example
//!
//! ```rust
//! use manta_bson::prelude::*;
//!
//! #[derive(Debug, Default, PartialEq)]
//! struct Person {
//!     id: i32,
//!     name: String,
//! }
//!
//! impl MappedDocument for Person {
//!     fn type_name() -> &'static str {
//!         "Person"
//!     }
//!
//!     fn configure(builder: &mut ClassMapBuilder<Self>) {
//!         builder.member(
//!             "id",
//!             TypeShape::scalar::<i32>(),
//!             |p, _| Ok(Value::Int32(p.id)),
//!             |p, v, _| {
//!                 p.id = v.as_i32()?;
//!                 Ok(())
//!             },
//!         );
//!         builder.member(
//!             "name",
//!             TypeShape::scalar::<String>(),
//!             |p, _| Ok(Value::String(p.name.clone())),
//!             |p, v, _| {
//!                 p.name = v.as_str()?.to_string();
//!                 Ok(())
//!             },
//!         );
//!     }
//! }
//!
//! let mapper = DocumentMapper::new();
//! let person = Person { id: 1, name: "Jack".into() };
//! let bytes = mapper.serialize(&person).unwrap();
//! let back: Person = mapper.deserialize(&bytes).unwrap();
//! assert_eq!(back, person);
//! ```

pub mod classmap;
pub mod codec;
pub mod conventions;
pub mod error;
pub mod mapper;
pub mod oid;
pub mod serializer;
pub mod value;

pub use classmap::{ClassMap, ClassMapBuilder, ClassMapRegistry, MappedDocument, MemberMap};
pub use codec::{DocumentReader, DocumentWriter, ReaderBookmark, decode_document, encode_document};
pub use conventions::{
    ConventionPack, ConventionRegistry, DiscriminatorStyle, NamingStyle, ResolvedConventions,
};
pub use error::{BsonError, BsonResult};
pub use mapper::{DocumentMapper, MapperOptions};
pub use oid::ObjectId;
pub use serializer::{SerializerRegistry, TypeShape, ValueSerializer};
pub use value::{Document, ElementType, Value};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::classmap::{ClassMapBuilder, MappedDocument};
    pub use crate::conventions::{ConventionPack, DiscriminatorStyle, NamingStyle};
    pub use crate::error::{BsonError, BsonResult};
    pub use crate::mapper::{DocumentMapper, MapperOptions};
    pub use crate::oid::ObjectId;
    pub use crate::serializer::{TypeShape, ValueSerializer};
    pub use crate::value::{Document, ElementType, Value};
    pub use crate::{doc, decode_document, encode_document};
}
