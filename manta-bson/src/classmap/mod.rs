//! Class maps: per-type metadata describing how instances serialize to and
//! from documents.
//!
//! A [`ClassMap`] is built lazily on first lookup from a type's
//! [`MappedDocument::configure`] declaration, with conventions filling in
//! whatever the declaration left unspecified, and is immutable once
//! published. The [`ClassMapRegistry`] memoizes maps per type and owns the
//! discriminator table used to resolve the concrete type when a document's
//! declared (nominal) type differs from the one it was serialized from.

mod builder;

pub use builder::{ClassMapBuilder, MemberDecl};

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::debug;

use crate::conventions::{ConventionRegistry, DiscriminatorStyle};
use crate::error::{BsonError, BsonResult};
use crate::mapper::DocumentMapper;
use crate::serializer::{SerializerRegistry, TypeShape, ValueSerializer};
use crate::value::Value;

/// A type that declares a class map.
pub trait MappedDocument: Default + Send + Sync + 'static {
    /// The short type name; also the default discriminator value.
    fn type_name() -> &'static str;

    /// Declare members and mapping settings.
    fn configure(builder: &mut ClassMapBuilder<Self>);
}

/// Reads one member from a type-erased instance.
pub type Getter = Arc<dyn Fn(&dyn Any, &DocumentMapper) -> BsonResult<Value> + Send + Sync>;

/// Writes one member on a type-erased instance.
pub type Setter = Arc<dyn Fn(&mut dyn Any, Value, &DocumentMapper) -> BsonResult<()> + Send + Sync>;

/// Creates a fresh instance for deserialization.
pub type Factory = Arc<dyn Fn() -> Box<dyn Any> + Send + Sync>;

pub(crate) type BaseInit = Box<
    dyn Fn(&ClassMapRegistry, &ConventionRegistry, &mut Vec<TypeId>) -> BsonResult<Arc<ClassMap>>
        + Send
        + Sync,
>;

/// Metadata for one serialized member.
pub struct MemberMap {
    member_name: String,
    element_name: String,
    shape: TypeShape,
    getter: Getter,
    setter: Setter,
    explicit_serializer: Option<Arc<dyn ValueSerializer>>,
    resolved_serializer: OnceLock<Arc<dyn ValueSerializer>>,
    default_value: Option<Value>,
    is_required: bool,
    ignore_if_null: bool,
    ignore_if_default: bool,
    order: Option<u32>,
}

impl MemberMap {
    /// The declared member name.
    pub fn member_name(&self) -> &str {
        &self.member_name
    }

    /// The element name used in documents.
    pub fn element_name(&self) -> &str {
        &self.element_name
    }

    /// The member's type shape.
    pub fn shape(&self) -> &TypeShape {
        &self.shape
    }

    /// Whether the member must be present when deserializing.
    pub fn is_required(&self) -> bool {
        self.is_required
    }

    /// Whether null values are skipped during serialization.
    pub fn ignore_if_null(&self) -> bool {
        self.ignore_if_null
    }

    /// Whether values equal to the declared default are skipped.
    pub fn ignore_if_default(&self) -> bool {
        self.ignore_if_default
    }

    /// The declared default value, if any.
    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    /// Explicit serialization order, if declared.
    pub fn order(&self) -> Option<u32> {
        self.order
    }

    /// Resolve the member's serializer, memoizing the result.
    pub fn serializer(
        &self,
        serializers: &SerializerRegistry,
        class_maps: &ClassMapRegistry,
    ) -> BsonResult<Arc<dyn ValueSerializer>> {
        if let Some(found) = self.resolved_serializer.get() {
            return Ok(found.clone());
        }
        let resolved = match &self.explicit_serializer {
            Some(explicit) => explicit.clone(),
            None => serializers.lookup(&self.shape, class_maps)?,
        };
        let _ = self.resolved_serializer.set(resolved.clone());
        Ok(resolved)
    }

    /// Read this member's value from an instance.
    pub fn get_value(&self, obj: &dyn Any, mapper: &DocumentMapper) -> BsonResult<Value> {
        (self.getter)(obj, mapper)
    }

    /// Write this member's value on an instance.
    pub fn set_value(
        &self,
        obj: &mut dyn Any,
        value: Value,
        mapper: &DocumentMapper,
    ) -> BsonResult<()> {
        (self.setter)(obj, value, mapper)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        member_name: String,
        element_name: String,
        shape: TypeShape,
        getter: Getter,
        setter: Setter,
        explicit_serializer: Option<Arc<dyn ValueSerializer>>,
        default_value: Option<Value>,
        is_required: bool,
        ignore_if_null: bool,
        ignore_if_default: bool,
        order: Option<u32>,
    ) -> Self {
        Self {
            member_name,
            element_name,
            shape,
            getter,
            setter,
            explicit_serializer,
            resolved_serializer: OnceLock::new(),
            default_value,
            is_required,
            ignore_if_null,
            ignore_if_default,
            order,
        }
    }
}

impl fmt::Debug for MemberMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberMap")
            .field("member_name", &self.member_name)
            .field("element_name", &self.element_name)
            .field("shape", &self.shape)
            .field("is_required", &self.is_required)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

/// Immutable per-type serialization metadata.
pub struct ClassMap {
    type_id: TypeId,
    type_name: String,
    discriminator: String,
    discriminator_element: String,
    discriminator_style: DiscriminatorStyle,
    is_root_class: bool,
    has_root_class: bool,
    base: Option<Arc<ClassMap>>,
    id_member: Option<usize>,
    members: Vec<MemberMap>,
    ignore_extra_elements: bool,
    factory: Factory,
}

impl ClassMap {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        type_id: TypeId,
        type_name: String,
        discriminator: String,
        discriminator_element: String,
        discriminator_style: DiscriminatorStyle,
        is_root_class: bool,
        has_root_class: bool,
        base: Option<Arc<ClassMap>>,
        id_member: Option<usize>,
        members: Vec<MemberMap>,
        ignore_extra_elements: bool,
        factory: Factory,
    ) -> Self {
        Self {
            type_id,
            type_name,
            discriminator,
            discriminator_element,
            discriminator_style,
            is_root_class,
            has_root_class,
            base,
            id_member,
            members,
            ignore_extra_elements,
            factory,
        }
    }

    /// The mapped type's identity.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The mapped type's name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// This type's own discriminator value.
    pub fn discriminator(&self) -> &str {
        &self.discriminator
    }

    /// The element name the discriminator is stored under.
    pub fn discriminator_element(&self) -> &str {
        &self.discriminator_element
    }

    /// Whether this type is declared as the root of a hierarchy.
    pub fn is_root_class(&self) -> bool {
        self.is_root_class
    }

    /// Whether this type is, or descends from, a hierarchy root.
    pub fn has_root_class(&self) -> bool {
        self.has_root_class
    }

    /// The base type's class map, if any.
    pub fn base(&self) -> Option<&Arc<ClassMap>> {
        self.base.as_ref()
    }

    /// Members in serialization order.
    pub fn members(&self) -> &[MemberMap] {
        &self.members
    }

    /// The identifier member, if one was declared or detected.
    pub fn id_member(&self) -> Option<&MemberMap> {
        self.id_member.map(|i| &self.members[i])
    }

    /// Index of the identifier member.
    pub fn id_member_index(&self) -> Option<usize> {
        self.id_member
    }

    /// Whether unknown elements are skipped rather than rejected.
    pub fn ignore_extra_elements(&self) -> bool {
        self.ignore_extra_elements
    }

    /// Find a member by element name.
    pub fn member(&self, element_name: &str) -> Option<&MemberMap> {
        self.member_index(element_name).map(|i| &self.members[i])
    }

    /// Find a member's index by element name.
    pub fn member_index(&self, element_name: &str) -> Option<usize> {
        self.members
            .iter()
            .position(|m| m.element_name == element_name)
    }

    /// Whether documents of this type carry a discriminator even when the
    /// nominal and actual types coincide.
    pub fn requires_discriminator(&self) -> bool {
        self.has_root_class
    }

    /// The discriminator chain from the root type down to this type.
    pub fn discriminator_chain(&self) -> Vec<String> {
        let mut values = vec![self.discriminator.clone()];
        let mut current = self.base.clone();
        while let Some(map) = current {
            values.push(map.discriminator.clone());
            current = map.base.clone();
        }
        // collected leaf-to-root; the root must come first
        values.reverse();
        values
    }

    /// The discriminator value written into documents: the scalar leaf
    /// value, or the root-to-leaf array for hierarchical discriminators.
    pub fn discriminator_value(&self) -> Value {
        match self.discriminator_style {
            DiscriminatorStyle::Scalar => Value::String(self.discriminator.clone()),
            DiscriminatorStyle::Hierarchical => Value::Array(
                self.discriminator_chain()
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            ),
        }
    }

    /// Whether instances of this type can stand in for the nominal type.
    pub fn is_assignable_to(&self, nominal: TypeId) -> bool {
        if self.type_id == nominal {
            return true;
        }
        let mut current = self.base.clone();
        while let Some(map) = current {
            if map.type_id == nominal {
                return true;
            }
            current = map.base.clone();
        }
        false
    }

    /// Create a fresh instance for deserialization.
    pub fn new_instance(&self) -> Box<dyn Any> {
        (self.factory)()
    }
}

impl fmt::Debug for ClassMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassMap")
            .field("type_name", &self.type_name)
            .field("discriminator", &self.discriminator)
            .field("is_root_class", &self.is_root_class)
            .field("members", &self.members)
            .finish_non_exhaustive()
    }
}

/// Memoizing registry of class maps and the discriminator table.
pub struct ClassMapRegistry {
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    maps: HashMap<TypeId, Arc<ClassMap>>,
    discriminators: HashMap<String, HashSet<TypeId>>,
}

impl ClassMapRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                maps: HashMap::new(),
                discriminators: HashMap::new(),
            }),
        }
    }

    /// Check whether a map has been published for a type.
    pub fn contains(&self, type_id: TypeId) -> bool {
        self.inner.lock().maps.contains_key(&type_id)
    }

    /// Get a published map by type identity.
    pub fn get_by_id(&self, type_id: TypeId) -> Option<Arc<ClassMap>> {
        self.inner.lock().maps.get(&type_id).cloned()
    }

    /// Look up the map for a type, building and publishing it on first use.
    pub fn lookup<T: MappedDocument>(
        &self,
        conventions: &ConventionRegistry,
    ) -> BsonResult<Arc<ClassMap>> {
        let mut resolving = Vec::new();
        self.lookup_chain::<T>(conventions, &mut resolving)
    }

    /// Explicitly register a type's map; rejects re-registration.
    pub fn register<T: MappedDocument>(
        &self,
        conventions: &ConventionRegistry,
    ) -> BsonResult<Arc<ClassMap>> {
        if self.contains(TypeId::of::<T>()) {
            return Err(BsonError::DuplicateRegistration(T::type_name().to_string()));
        }
        self.lookup::<T>(conventions)
    }

    /// Remove a type's map and its discriminator entries. Intended for test
    /// isolation; maps normally live for the life of the process.
    pub fn unregister(&self, type_id: TypeId) {
        let mut inner = self.inner.lock();
        if let Some(map) = inner.maps.remove(&type_id) {
            debug!(ty = %map.type_name(), "class map unregistered");
            let now_empty = match inner.discriminators.get_mut(map.discriminator()) {
                Some(set) => {
                    set.remove(&type_id);
                    set.is_empty()
                }
                None => false,
            };
            if now_empty {
                inner.discriminators.remove(map.discriminator());
            }
        }
    }

    /// Resolve the concrete type to deserialize from a discriminator value.
    ///
    /// Array discriminators resolve by their last (most specific) element.
    /// Candidates are filtered to types assignable to the nominal type; a
    /// second assignable candidate is an ambiguity error.
    pub fn lookup_actual_type(
        &self,
        nominal: TypeId,
        discriminator: &Value,
    ) -> BsonResult<Arc<ClassMap>> {
        let leaf = match discriminator {
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .last()
                .ok_or_else(|| BsonError::serialization("empty discriminator array"))?
                .as_str()?
                .to_string(),
            other => {
                return Err(BsonError::serialization(format!(
                    "discriminator must be a string or array, found {}",
                    other.kind()
                )));
            }
        };

        let inner = self.inner.lock();
        let mut found: Option<Arc<ClassMap>> = None;
        if let Some(candidates) = inner.discriminators.get(&leaf) {
            for type_id in candidates {
                let Some(map) = inner.maps.get(type_id) else {
                    continue;
                };
                if map.is_assignable_to(nominal) {
                    if found.is_some() {
                        return Err(BsonError::AmbiguousDiscriminator(leaf));
                    }
                    found = Some(map.clone());
                }
            }
        }
        found.ok_or(BsonError::UnknownDiscriminator(leaf))
    }

    pub(crate) fn lookup_chain<T: MappedDocument>(
        &self,
        conventions: &ConventionRegistry,
        resolving: &mut Vec<TypeId>,
    ) -> BsonResult<Arc<ClassMap>> {
        let type_id = TypeId::of::<T>();
        if let Some(existing) = self.get_by_id(type_id) {
            return Ok(existing);
        }
        if resolving.contains(&type_id) {
            return Err(BsonError::mapping(format!(
                "cyclic base class configuration involving '{}'",
                T::type_name()
            )));
        }
        resolving.push(type_id);
        let built = self.build::<T>(conventions, resolving);
        resolving.pop();
        Ok(self.publish(built?))
    }

    fn build<T: MappedDocument>(
        &self,
        conventions: &ConventionRegistry,
        resolving: &mut Vec<TypeId>,
    ) -> BsonResult<ClassMap> {
        let mut builder = ClassMapBuilder::<T>::new(T::type_name());
        T::configure(&mut builder);
        let base = match builder.take_base_init() {
            Some(init) => Some(init(self, conventions, resolving)?),
            None => None,
        };
        let resolved = conventions.resolve_for(T::type_name());
        builder.build(base, &resolved)
    }

    // First publication wins; a concurrent builder of the same type gets the
    // already-published map back.
    fn publish(&self, map: ClassMap) -> Arc<ClassMap> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.maps.get(&map.type_id()) {
            return existing.clone();
        }
        debug!(
            ty = %map.type_name(),
            discriminator = %map.discriminator(),
            members = map.members().len(),
            "class map published"
        );
        let map = Arc::new(map);
        inner
            .discriminators
            .entry(map.discriminator().to_string())
            .or_default()
            .insert(map.type_id());
        inner.maps.insert(map.type_id(), map.clone());
        map
    }
}

impl Default for ClassMapRegistry {
    fn default() -> Self {
        Self::new()
    }
}
