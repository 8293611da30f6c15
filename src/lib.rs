//! # Manta
//!
//! A document database driver core: class-map serialization over a binary
//! document format, query-expression-to-pipeline translation, and cluster
//! topology and connection management.
//!
//! Manta provides:
//! - A dynamic document model and binary codec with a bookmarkable cursor
//! - Class maps built from declarations plus pluggable conventions, with
//!   scalar and hierarchical discriminators for polymorphic hierarchies
//! - A serializer registry with per-member representation overrides
//! - A recursive-descent filter translator and a pipeline builder that
//!   threads the result shape through every stage
//! - Connection pooling with request pinning, and heartbeat-driven server
//!   selection over immutable topology snapshots
//!
//! ## Quick Start
//!
//! ```rust
//! use manta::prelude::*;
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
//! let bytes = mapper.serialize(&Person { id: 1, name: "Jack".into() }).unwrap();
//! let person: Person = mapper.deserialize(&bytes).unwrap();
//! assert_eq!(person.name, "Jack");
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Document values, the binary codec, class maps, and serializers.
pub mod bson {
    pub use manta_bson::*;
}

/// Query expressions, filter translation, and pipeline building.
pub mod query {
    pub use manta_query::*;
}

/// Connections, pooling, and cluster topology.
pub mod cluster {
    pub use manta_cluster::*;
}

// Re-export key types at the crate root
pub use manta_bson::{
    BsonError, BsonResult, ClassMapBuilder, Document, DocumentMapper, MappedDocument, ObjectId,
    TypeShape, Value, doc,
};
pub use manta_cluster::{Cluster, ClusterError, ClusterResult, ConnectionPool, Credential};
pub use manta_query::{Expr, FilterNode, Lambda, Pipeline, PipelineTranslator, TranslationError};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use manta_bson::prelude::*;
    pub use manta_cluster::prelude::*;
    pub use manta_query::prelude::*;
}
