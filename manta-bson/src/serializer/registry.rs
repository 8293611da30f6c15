//! Serializer resolution and caching.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::classmap::ClassMapRegistry;
use crate::error::{BsonError, BsonResult};
use crate::oid::ObjectId;
use crate::value::Document;

use super::{
    ArraySerializer, BinarySerializer, BooleanSerializer, DateTimeSerializer, DecimalSerializer,
    DoubleSerializer, Int32Serializer, Int64Serializer, MappedStructSerializer,
    ObjectIdSerializer, OptionalSerializer, RawDocumentSerializer, StringSerializer, TypeShape,
    ValueSerializer,
};

/// Maps type shapes to serializers.
///
/// Resolution order: memo cache, explicit registration, container recursion
/// (optionals and sequences resolve through their item shape), class-map
/// default for mapped types. Results are memoized; registering a serializer
/// clears the whole memo cache, since cached container and mapped lookups
/// may embed the replaced serializer.
pub struct SerializerRegistry {
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    explicit: HashMap<TypeShape, Arc<dyn ValueSerializer>>,
    cache: HashMap<TypeShape, Arc<dyn ValueSerializer>>,
}

impl SerializerRegistry {
    /// Create a registry with the built-in scalar serializers registered.
    pub fn new() -> Self {
        let mut explicit: HashMap<TypeShape, Arc<dyn ValueSerializer>> = HashMap::new();
        explicit.insert(TypeShape::scalar::<f64>(), Arc::new(DoubleSerializer));
        explicit.insert(TypeShape::scalar::<String>(), Arc::new(StringSerializer));
        explicit.insert(TypeShape::scalar::<bool>(), Arc::new(BooleanSerializer));
        explicit.insert(TypeShape::scalar::<i32>(), Arc::new(Int32Serializer::default()));
        explicit.insert(TypeShape::scalar::<i64>(), Arc::new(Int64Serializer::default()));
        explicit.insert(
            TypeShape::scalar::<ObjectId>(),
            Arc::new(ObjectIdSerializer::default()),
        );
        explicit.insert(
            TypeShape::scalar::<rust_decimal::Decimal>(),
            Arc::new(DecimalSerializer::default()),
        );
        explicit.insert(
            TypeShape::scalar::<chrono::DateTime<chrono::Utc>>(),
            Arc::new(DateTimeSerializer::default()),
        );
        explicit.insert(TypeShape::scalar::<Vec<u8>>(), Arc::new(BinarySerializer));
        explicit.insert(
            TypeShape::scalar::<Document>(),
            Arc::new(RawDocumentSerializer),
        );

        Self {
            inner: Mutex::new(RegistryInner {
                explicit,
                cache: HashMap::new(),
            }),
        }
    }

    /// Register a serializer for a type shape, replacing any existing
    /// registration and invalidating the memo cache.
    pub fn register(&self, shape: TypeShape, serializer: Arc<dyn ValueSerializer>) {
        let mut inner = self.inner.lock();
        debug!(shape = %shape.describe(), "serializer registered, memo cache cleared");
        inner.explicit.insert(shape, serializer);
        inner.cache.clear();
    }

    /// Resolve the serializer for a type shape.
    pub fn lookup(
        &self,
        shape: &TypeShape,
        class_maps: &ClassMapRegistry,
    ) -> BsonResult<Arc<dyn ValueSerializer>> {
        let mut inner = self.inner.lock();
        if let Some(found) = inner.cache.get(shape) {
            return Ok(found.clone());
        }
        let resolved = Self::resolve(&inner, shape, class_maps)?;
        inner.cache.insert(shape.clone(), resolved.clone());
        Ok(resolved)
    }

    fn resolve(
        inner: &RegistryInner,
        shape: &TypeShape,
        class_maps: &ClassMapRegistry,
    ) -> BsonResult<Arc<dyn ValueSerializer>> {
        if let Some(found) = inner.explicit.get(shape) {
            return Ok(found.clone());
        }
        match shape {
            TypeShape::Optional(item) => {
                let item = Self::resolve(inner, item, class_maps)?;
                Ok(Arc::new(OptionalSerializer::new(item)))
            }
            TypeShape::Sequence(item) => {
                let item = Self::resolve(inner, item, class_maps)?;
                Ok(Arc::new(ArraySerializer::new(item)))
            }
            TypeShape::Mapped { id, name } => {
                if class_maps.contains(*id) {
                    Ok(Arc::new(MappedStructSerializer::new(*name)))
                } else {
                    Err(BsonError::NoSerializer(format!(
                        "{name} (no class map registered)"
                    )))
                }
            }
            TypeShape::Scalar { .. } => Err(BsonError::NoSerializer(shape.describe())),
        }
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
