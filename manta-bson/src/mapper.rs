//! The document mapper: serialization facade over the registries.
//!
//! A [`DocumentMapper`] owns the class-map, serializer, and convention
//! registries (one mapper per process is typical, but tests create their
//! own for isolation) and drives class-map-backed serialization through
//! the binary codec.

use std::any::{Any, TypeId};
use std::sync::Arc;

use tracing::debug;

use crate::classmap::{ClassMap, ClassMapRegistry, MappedDocument, MemberMap};
use crate::codec::{DocumentReader, encode_document};
use crate::conventions::ConventionRegistry;
use crate::error::{BsonError, BsonResult};
use crate::serializer::SerializerRegistry;
use crate::value::{Document, Value};

/// Mapper-wide serialization options.
#[derive(Debug, Clone)]
pub struct MapperOptions {
    /// Serialize the identifier element first, regardless of member order.
    pub serialize_id_first: bool,
}

impl Default for MapperOptions {
    fn default() -> Self {
        Self {
            serialize_id_first: true,
        }
    }
}

/// Serializes and deserializes class-mapped types.
pub struct DocumentMapper {
    class_maps: ClassMapRegistry,
    serializers: SerializerRegistry,
    conventions: ConventionRegistry,
    options: MapperOptions,
}

impl DocumentMapper {
    /// Create a mapper with default options.
    pub fn new() -> Self {
        Self::with_options(MapperOptions::default())
    }

    /// Create a mapper with explicit options.
    pub fn with_options(options: MapperOptions) -> Self {
        Self {
            class_maps: ClassMapRegistry::new(),
            serializers: SerializerRegistry::new(),
            conventions: ConventionRegistry::new(),
            options,
        }
    }

    /// The convention registry.
    pub fn conventions(&self) -> &ConventionRegistry {
        &self.conventions
    }

    /// The serializer registry.
    pub fn serializers(&self) -> &SerializerRegistry {
        &self.serializers
    }

    /// The class map registry.
    pub fn class_maps(&self) -> &ClassMapRegistry {
        &self.class_maps
    }

    /// Explicitly register a type's class map; rejects re-registration.
    pub fn register_class<T: MappedDocument>(&self) -> BsonResult<Arc<ClassMap>> {
        self.class_maps.register::<T>(&self.conventions)
    }

    /// Look up a type's class map, building it on first use.
    pub fn class_map<T: MappedDocument>(&self) -> BsonResult<Arc<ClassMap>> {
        self.class_maps.lookup::<T>(&self.conventions)
    }

    /// Remove a type's class map. Intended for test isolation.
    pub fn unregister_class<T: 'static>(&self) {
        self.class_maps.unregister(TypeId::of::<T>());
    }

    /// Serialize an instance to a document value.
    pub fn to_document<T: MappedDocument>(&self, obj: &T) -> BsonResult<Document> {
        let map = self.class_map::<T>()?;
        self.serialize_with_map(&map, TypeId::of::<T>(), obj)
    }

    /// Serialize an instance to a document [`Value`], for nested members.
    pub fn to_value<T: MappedDocument>(&self, obj: &T) -> BsonResult<Value> {
        self.to_document(obj).map(Value::Document)
    }

    /// Serialize an instance whose concrete type may differ from the
    /// nominal type; a discriminator element is written when they differ.
    ///
    /// The concrete type's class map must already be registered.
    pub fn to_document_polymorphic<TNominal: MappedDocument>(
        &self,
        obj: &dyn Any,
    ) -> BsonResult<Document> {
        let nominal_map = self.class_map::<TNominal>()?;
        let actual_map = self
            .class_maps
            .get_by_id(obj.type_id())
            .ok_or_else(|| {
                BsonError::mapping(format!(
                    "no class map registered for the concrete type of a '{}' value",
                    nominal_map.type_name()
                ))
            })?;
        if !actual_map.is_assignable_to(nominal_map.type_id()) {
            return Err(BsonError::serialization(format!(
                "'{}' is not assignable to '{}'",
                actual_map.type_name(),
                nominal_map.type_name()
            )));
        }
        self.serialize_with_map(&actual_map, nominal_map.type_id(), obj)
    }

    /// Serialize an instance to bytes.
    pub fn serialize<T: MappedDocument>(&self, obj: &T) -> BsonResult<Vec<u8>> {
        encode_document(&self.to_document(obj)?)
    }

    /// Serialize a possibly-derived instance to bytes.
    pub fn serialize_polymorphic<TNominal: MappedDocument>(
        &self,
        obj: &dyn Any,
    ) -> BsonResult<Vec<u8>> {
        encode_document(&self.to_document_polymorphic::<TNominal>(obj)?)
    }

    /// Deserialize bytes into a concrete type.
    pub fn deserialize<T: MappedDocument>(&self, bytes: &[u8]) -> BsonResult<T> {
        let obj = self.deserialize_polymorphic::<T>(bytes)?;
        obj.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
            BsonError::serialization(format!(
                "document deserialized to a type derived from '{}'; use deserialize_polymorphic",
                T::type_name()
            ))
        })
    }

    /// Deserialize bytes with a nominal type, resolving the concrete type
    /// through the document's discriminator.
    ///
    /// The reader bookmarks its position, scans for the discriminator
    /// element, resolves the concrete class map, then rewinds so the real
    /// deserialization pass starts clean.
    pub fn deserialize_polymorphic<TNominal: MappedDocument>(
        &self,
        bytes: &[u8],
    ) -> BsonResult<Box<dyn Any>> {
        let nominal_map = self.class_map::<TNominal>()?;
        let mut reader = DocumentReader::new(bytes);
        reader.read_start_document()?;

        let actual_map = match reader.find_element(nominal_map.discriminator_element())? {
            Some(discriminator) => {
                let map = self
                    .class_maps
                    .lookup_actual_type(nominal_map.type_id(), &discriminator)?;
                debug!(
                    nominal = %nominal_map.type_name(),
                    actual = %map.type_name(),
                    "discriminator resolved concrete type"
                );
                map
            }
            None => nominal_map,
        };

        let mut obj = actual_map.new_instance();
        let mut seen = vec![false; actual_map.members().len()];

        while reader.has_element()? {
            let ty = reader.read_element_type()?;
            let name = reader.read_name()?;
            if name == actual_map.discriminator_element() {
                reader.skip_value(ty)?;
                continue;
            }
            match actual_map.member_index(&name) {
                Some(index) => {
                    let member = &actual_map.members()[index];
                    let raw = reader.read_value(ty)?;
                    self.apply_member(member, &mut *obj, raw)?;
                    seen[index] = true;
                }
                None if actual_map.ignore_extra_elements() => reader.skip_value(ty)?,
                None => {
                    return Err(BsonError::serialization(format!(
                        "unexpected element '{}' for type '{}'",
                        name,
                        actual_map.type_name()
                    )));
                }
            }
        }
        reader.read_end_document()?;

        self.finalize_members(&actual_map, &mut *obj, &seen)?;
        Ok(obj)
    }

    /// Deserialize a document value into a concrete type, for nested
    /// members.
    pub fn from_document<T: MappedDocument>(&self, doc: &Document) -> BsonResult<T> {
        let obj = self.from_document_polymorphic::<T>(doc)?;
        obj.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
            BsonError::serialization(format!(
                "document deserialized to a type derived from '{}'",
                T::type_name()
            ))
        })
    }

    /// Deserialize a [`Value`] into a concrete type, for nested members.
    pub fn from_value<T: MappedDocument>(&self, value: Value) -> BsonResult<T> {
        self.from_document(&value.into_document()?)
    }

    /// Deserialize a document value with a nominal type.
    pub fn from_document_polymorphic<TNominal: MappedDocument>(
        &self,
        doc: &Document,
    ) -> BsonResult<Box<dyn Any>> {
        let nominal_map = self.class_map::<TNominal>()?;
        let actual_map = match doc.get(nominal_map.discriminator_element()) {
            Some(discriminator) => self
                .class_maps
                .lookup_actual_type(nominal_map.type_id(), discriminator)?,
            None => nominal_map,
        };

        let mut obj = actual_map.new_instance();
        let mut seen = vec![false; actual_map.members().len()];

        for (name, value) in doc.iter() {
            if name == actual_map.discriminator_element() {
                continue;
            }
            match actual_map.member_index(name) {
                Some(index) => {
                    let member = &actual_map.members()[index];
                    self.apply_member(member, &mut *obj, value.clone())?;
                    seen[index] = true;
                }
                None if actual_map.ignore_extra_elements() => {}
                None => {
                    return Err(BsonError::serialization(format!(
                        "unexpected element '{}' for type '{}'",
                        name,
                        actual_map.type_name()
                    )));
                }
            }
        }

        self.finalize_members(&actual_map, &mut *obj, &seen)?;
        Ok(obj)
    }

    fn serialize_with_map(
        &self,
        map: &ClassMap,
        nominal: TypeId,
        obj: &dyn Any,
    ) -> BsonResult<Document> {
        let mut doc = Document::new();

        let id_first = self.options.serialize_id_first && map.id_member().is_some();
        if id_first {
            if let Some(id) = map.id_member() {
                let value = id.get_value(obj, self)?;
                let serializer = id.serializer(&self.serializers, &self.class_maps)?;
                doc.insert(id.element_name(), serializer.to_wire(&value)?);
            }
        }

        if map.type_id() != nominal || map.requires_discriminator() {
            doc.insert(map.discriminator_element(), map.discriminator_value());
        }

        for (index, member) in map.members().iter().enumerate() {
            if id_first && Some(index) == map.id_member_index() {
                continue;
            }
            let value = member.get_value(obj, self)?;
            if value.is_null() && member.ignore_if_null() {
                continue;
            }
            if member.ignore_if_default() {
                if let Some(default) = member.default_value() {
                    if *default == value {
                        continue;
                    }
                }
            }
            let serializer = member.serializer(&self.serializers, &self.class_maps)?;
            doc.insert(member.element_name(), serializer.to_wire(&value)?);
        }

        Ok(doc)
    }

    fn apply_member(
        &self,
        member: &MemberMap,
        obj: &mut dyn Any,
        raw: Value,
    ) -> BsonResult<()> {
        let serializer = member.serializer(&self.serializers, &self.class_maps)?;
        let value = serializer.from_wire(raw)?;
        member.set_value(obj, value, self)
    }

    // Applies defaults and required checks for members absent from the
    // document; members with neither keep their initial value.
    fn finalize_members(
        &self,
        map: &ClassMap,
        obj: &mut dyn Any,
        seen: &[bool],
    ) -> BsonResult<()> {
        for (index, member) in map.members().iter().enumerate() {
            if seen[index] {
                continue;
            }
            if member.is_required() {
                return Err(BsonError::MissingRequiredElement(
                    member.element_name().to_string(),
                ));
            }
            if let Some(default) = member.default_value() {
                member.set_value(obj, default.clone(), self)?;
            }
        }
        Ok(())
    }
}

impl Default for DocumentMapper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classmap::ClassMapBuilder;
    use crate::conventions::{ConventionPack, NamingStyle};
    use crate::serializer::{EnumStringSerializer, TypeShape};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Person {
        id: i32,
        name: String,
    }

    impl MappedDocument for Person {
        fn type_name() -> &'static str {
            "Person"
        }

        fn configure(builder: &mut ClassMapBuilder<Self>) {
            builder.member(
                "id",
                TypeShape::scalar::<i32>(),
                |p, _| Ok(Value::Int32(p.id)),
                |p, v, _| {
                    p.id = v.as_i32()?;
                    Ok(())
                },
            );
            builder.member(
                "name",
                TypeShape::scalar::<String>(),
                |p, _| Ok(Value::String(p.name.clone())),
                |p, v, _| {
                    p.name = v.as_str()?.to_string();
                    Ok(())
                },
            );
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Account {
        id: i32,
        owner: String,
        nickname: Option<String>,
        status: i32, // enum ordinal, stored as a string
        balance: i64,
    }

    impl MappedDocument for Account {
        fn type_name() -> &'static str {
            "Account"
        }

        fn configure(builder: &mut ClassMapBuilder<Self>) {
            builder.member(
                "id",
                TypeShape::scalar::<i32>(),
                |a, _| Ok(Value::Int32(a.id)),
                |a, v, _| {
                    a.id = v.as_i32()?;
                    Ok(())
                },
            );
            builder
                .member(
                    "owner",
                    TypeShape::scalar::<String>(),
                    |a, _| Ok(Value::String(a.owner.clone())),
                    |a, v, _| {
                        a.owner = v.as_str()?.to_string();
                        Ok(())
                    },
                )
                .required();
            builder
                .member(
                    "nickname",
                    TypeShape::scalar::<String>().optional(),
                    |a, _| Ok(Value::from(a.nickname.clone())),
                    |a, v, _| {
                        a.nickname = match v {
                            Value::Null => None,
                            other => Some(other.as_str()?.to_string()),
                        };
                        Ok(())
                    },
                )
                .ignore_if_null(true);
            builder
                .member(
                    "status",
                    TypeShape::scalar::<i32>(),
                    |a, _| Ok(Value::Int32(a.status)),
                    |a, v, _| {
                        a.status = v.as_i32()?;
                        Ok(())
                    },
                )
                .serializer(Arc::new(EnumStringSerializer::new(&[
                    (0, "Pending"),
                    (1, "Active"),
                    (2, "Closed"),
                ])));
            builder
                .member(
                    "balance",
                    TypeShape::scalar::<i64>(),
                    |a, _| Ok(Value::Int64(a.balance)),
                    |a, v, _| {
                        a.balance = v.as_i64()?;
                        Ok(())
                    },
                )
                .default_value(0i64);
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Address {
        city: String,
        zip: String,
    }

    impl MappedDocument for Address {
        fn type_name() -> &'static str {
            "Address"
        }

        fn configure(builder: &mut ClassMapBuilder<Self>) {
            builder.member(
                "city",
                TypeShape::scalar::<String>(),
                |a, _| Ok(Value::String(a.city.clone())),
                |a, v, _| {
                    a.city = v.as_str()?.to_string();
                    Ok(())
                },
            );
            builder.member(
                "zip",
                TypeShape::scalar::<String>(),
                |a, _| Ok(Value::String(a.zip.clone())),
                |a, v, _| {
                    a.zip = v.as_str()?.to_string();
                    Ok(())
                },
            );
        }
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Order {
        id: i32,
        shipping: Address,
        tags: Vec<String>,
    }

    impl MappedDocument for Order {
        fn type_name() -> &'static str {
            "Order"
        }

        fn configure(builder: &mut ClassMapBuilder<Self>) {
            builder.member(
                "id",
                TypeShape::scalar::<i32>(),
                |o, _| Ok(Value::Int32(o.id)),
                |o, v, _| {
                    o.id = v.as_i32()?;
                    Ok(())
                },
            );
            builder.member(
                "shipping",
                TypeShape::mapped::<Address>(),
                |o, m| m.to_value(&o.shipping),
                |o, v, m| {
                    o.shipping = m.from_value(v)?;
                    Ok(())
                },
            );
            builder.member(
                "tags",
                TypeShape::scalar::<String>().sequence(),
                |o, _| Ok(Value::from(o.tags.clone())),
                |o, v, _| {
                    o.tags = v
                        .into_array()?
                        .into_iter()
                        .map(|item| item.as_str().map(str::to_string))
                        .collect::<BsonResult<Vec<_>>>()?;
                    Ok(())
                },
            );
        }
    }

    // three-level hierarchy: Animal -> Dog -> Puppy
    #[derive(Debug, Default, Clone, PartialEq)]
    struct Animal {
        name: String,
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Dog {
        name: String,
        breed: String,
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Puppy {
        name: String,
        breed: String,
        age_weeks: i32,
    }

    impl MappedDocument for Animal {
        fn type_name() -> &'static str {
            "Animal"
        }

        fn configure(builder: &mut ClassMapBuilder<Self>) {
            builder.set_is_root_class();
            builder.member(
                "name",
                TypeShape::scalar::<String>(),
                |a, _| Ok(Value::String(a.name.clone())),
                |a, v, _| {
                    a.name = v.as_str()?.to_string();
                    Ok(())
                },
            );
        }
    }

    impl MappedDocument for Dog {
        fn type_name() -> &'static str {
            "Dog"
        }

        fn configure(builder: &mut ClassMapBuilder<Self>) {
            builder.set_base::<Animal>();
            builder.member(
                "name",
                TypeShape::scalar::<String>(),
                |d, _| Ok(Value::String(d.name.clone())),
                |d, v, _| {
                    d.name = v.as_str()?.to_string();
                    Ok(())
                },
            );
            builder.member(
                "breed",
                TypeShape::scalar::<String>(),
                |d, _| Ok(Value::String(d.breed.clone())),
                |d, v, _| {
                    d.breed = v.as_str()?.to_string();
                    Ok(())
                },
            );
        }
    }

    impl MappedDocument for Puppy {
        fn type_name() -> &'static str {
            "Puppy"
        }

        fn configure(builder: &mut ClassMapBuilder<Self>) {
            builder.set_base::<Dog>();
            builder.member(
                "name",
                TypeShape::scalar::<String>(),
                |p, _| Ok(Value::String(p.name.clone())),
                |p, v, _| {
                    p.name = v.as_str()?.to_string();
                    Ok(())
                },
            );
            builder.member(
                "breed",
                TypeShape::scalar::<String>(),
                |p, _| Ok(Value::String(p.breed.clone())),
                |p, v, _| {
                    p.breed = v.as_str()?.to_string();
                    Ok(())
                },
            );
            builder.member(
                "age_weeks",
                TypeShape::scalar::<i32>(),
                |p, _| Ok(Value::Int32(p.age_weeks)),
                |p, v, _| {
                    p.age_weeks = v.as_i32()?;
                    Ok(())
                },
            );
        }
    }

    #[test]
    fn test_person_id_member_detected_and_first() {
        let mapper = DocumentMapper::new();
        let map = mapper.class_map::<Person>().unwrap();
        assert_eq!(map.id_member().unwrap().element_name(), "_id");

        let doc = mapper
            .to_document(&Person {
                id: 1,
                name: "Jack".into(),
            })
            .unwrap();
        let keys: Vec<_> = doc.keys().collect();
        assert_eq!(keys, vec!["_id", "name"]);
        assert_eq!(doc.get_i32("_id").unwrap(), 1);
        assert_eq!(doc.get_str("name").unwrap(), "Jack");
    }

    #[test]
    fn test_person_roundtrip() {
        let mapper = DocumentMapper::new();
        let person = Person {
            id: 7,
            name: "Ada".into(),
        };
        let bytes = mapper.serialize(&person).unwrap();
        let back: Person = mapper.deserialize(&bytes).unwrap();
        assert_eq!(back, person);
    }

    #[test]
    fn test_id_not_first_when_disabled() {
        let mapper = DocumentMapper::with_options(MapperOptions {
            serialize_id_first: false,
        });

        #[derive(Debug, Default, PartialEq)]
        struct Late {
            name: String,
            id: i32,
        }
        impl MappedDocument for Late {
            fn type_name() -> &'static str {
                "Late"
            }
            fn configure(builder: &mut ClassMapBuilder<Self>) {
                builder.member(
                    "name",
                    TypeShape::scalar::<String>(),
                    |t, _| Ok(Value::String(t.name.clone())),
                    |t, v, _| {
                        t.name = v.as_str()?.to_string();
                        Ok(())
                    },
                );
                builder.member(
                    "id",
                    TypeShape::scalar::<i32>(),
                    |t, _| Ok(Value::Int32(t.id)),
                    |t, v, _| {
                        t.id = v.as_i32()?;
                        Ok(())
                    },
                );
            }
        }

        let doc = mapper
            .to_document(&Late {
                name: "x".into(),
                id: 9,
            })
            .unwrap();
        let keys: Vec<_> = doc.keys().collect();
        assert_eq!(keys, vec!["name", "_id"]);
    }

    #[test]
    fn test_account_roundtrip_with_representations() {
        let mapper = DocumentMapper::new();
        let account = Account {
            id: 3,
            owner: "Grace".into(),
            nickname: Some("g".into()),
            status: 1,
            balance: 250,
        };
        let doc = mapper.to_document(&account).unwrap();
        // the enum ordinal is stored under its variant name
        assert_eq!(doc.get_str("status").unwrap(), "Active");

        let bytes = mapper.serialize(&account).unwrap();
        let back: Account = mapper.deserialize(&bytes).unwrap();
        assert_eq!(back, account);
    }

    #[test]
    fn test_null_member_skipped_and_restored_as_none() {
        let mapper = DocumentMapper::new();
        let account = Account {
            id: 4,
            owner: "Ada".into(),
            nickname: None,
            status: 0,
            balance: 1,
        };
        let doc = mapper.to_document(&account).unwrap();
        assert!(!doc.contains_key("nickname"));

        let back: Account = mapper
            .deserialize(&mapper.serialize(&account).unwrap())
            .unwrap();
        assert_eq!(back.nickname, None);
    }

    #[test]
    fn test_missing_required_member_is_an_error() {
        let mapper = DocumentMapper::new();
        mapper.class_map::<Account>().unwrap();

        let doc = crate::doc! { "_id": 1, "status": "Pending", "balance": 5i64 };
        let bytes = encode_document(&doc).unwrap();
        let err = mapper.deserialize::<Account>(&bytes).unwrap_err();
        assert!(matches!(err, BsonError::MissingRequiredElement(ref e) if e == "owner"));
    }

    #[test]
    fn test_absent_member_with_default_applied() {
        let mapper = DocumentMapper::new();
        mapper.class_map::<Account>().unwrap();

        let doc = crate::doc! { "_id": 1, "owner": "Ada", "status": "Pending" };
        let bytes = encode_document(&doc).unwrap();
        let account: Account = mapper.deserialize(&bytes).unwrap();
        assert_eq!(account.balance, 0);
    }

    #[test]
    fn test_unknown_element_rejected_unless_ignored() {
        let mapper = DocumentMapper::new();
        mapper.class_map::<Person>().unwrap();

        let doc = crate::doc! { "_id": 1, "name": "Jack", "extra": true };
        let bytes = encode_document(&doc).unwrap();
        let err = mapper.deserialize::<Person>(&bytes).unwrap_err();
        assert!(err.to_string().contains("unexpected element 'extra'"));
    }

    #[test]
    fn test_nested_mapped_member_roundtrip() {
        let mapper = DocumentMapper::new();
        let order = Order {
            id: 11,
            shipping: Address {
                city: "Lisbon".into(),
                zip: "1000".into(),
            },
            tags: vec!["fragile".into(), "gift".into()],
        };
        let bytes = mapper.serialize(&order).unwrap();
        let back: Order = mapper.deserialize(&bytes).unwrap();
        assert_eq!(back, order);
    }

    #[test]
    fn test_hierarchical_discriminator_ordering() {
        let mapper = DocumentMapper::new();
        mapper.register_class::<Animal>().unwrap();
        mapper.register_class::<Dog>().unwrap();
        let puppy_map = mapper.class_map::<Puppy>().unwrap();

        assert_eq!(puppy_map.discriminator_chain(), vec!["Animal", "Dog", "Puppy"]);
        assert_eq!(
            puppy_map.discriminator_value(),
            Value::Array(vec![
                Value::String("Animal".into()),
                Value::String("Dog".into()),
                Value::String("Puppy".into()),
            ])
        );
    }

    #[test]
    fn test_polymorphic_roundtrip_via_discriminator() {
        let mapper = DocumentMapper::new();
        mapper.register_class::<Animal>().unwrap();
        mapper.register_class::<Dog>().unwrap();
        mapper.register_class::<Puppy>().unwrap();

        let puppy = Puppy {
            name: "Rex".into(),
            breed: "Beagle".into(),
            age_weeks: 9,
        };
        let bytes = mapper.serialize_polymorphic::<Animal>(&puppy).unwrap();

        let restored = mapper.deserialize_polymorphic::<Animal>(&bytes).unwrap();
        let restored = restored.downcast::<Puppy>().expect("should be a Puppy");
        assert_eq!(*restored, puppy);
    }

    #[test]
    fn test_lookup_actual_type_by_array_discriminator() {
        let mapper = DocumentMapper::new();
        mapper.register_class::<Animal>().unwrap();
        mapper.register_class::<Dog>().unwrap();
        let puppy_map = mapper.class_map::<Puppy>().unwrap();

        let resolved = mapper
            .class_maps()
            .lookup_actual_type(
                mapper.class_map::<Animal>().unwrap().type_id(),
                &puppy_map.discriminator_value(),
            )
            .unwrap();
        assert_eq!(resolved.type_name(), "Puppy");
    }

    #[test]
    fn test_unknown_discriminator_is_an_error() {
        let mapper = DocumentMapper::new();
        let animal_map = mapper.class_map::<Animal>().unwrap();
        let err = mapper
            .class_maps()
            .lookup_actual_type(animal_map.type_id(), &Value::String("Ghost".into()))
            .unwrap_err();
        assert!(matches!(err, BsonError::UnknownDiscriminator(_)));
    }

    #[test]
    fn test_ambiguous_discriminator_is_an_error() {
        #[derive(Debug, Default)]
        struct DogA;
        #[derive(Debug, Default)]
        struct DogB;
        impl MappedDocument for DogA {
            fn type_name() -> &'static str {
                "DogA"
            }
            fn configure(builder: &mut ClassMapBuilder<Self>) {
                builder.set_base::<Animal>();
                builder.set_discriminator("GoodBoy");
            }
        }
        impl MappedDocument for DogB {
            fn type_name() -> &'static str {
                "DogB"
            }
            fn configure(builder: &mut ClassMapBuilder<Self>) {
                builder.set_base::<Animal>();
                builder.set_discriminator("GoodBoy");
            }
        }

        let mapper = DocumentMapper::new();
        let animal_map = mapper.class_map::<Animal>().unwrap();
        mapper.class_map::<DogA>().unwrap();
        mapper.class_map::<DogB>().unwrap();

        let err = mapper
            .class_maps()
            .lookup_actual_type(animal_map.type_id(), &Value::String("GoodBoy".into()))
            .unwrap_err();
        assert!(matches!(err, BsonError::AmbiguousDiscriminator(_)));
    }

    #[test]
    fn test_shared_discriminator_disambiguated_by_nominal_type() {
        // the same discriminator string on unrelated hierarchies is fine:
        // assignability to the nominal type filters the candidates
        #[derive(Debug, Default)]
        struct Crane;
        impl MappedDocument for Crane {
            fn type_name() -> &'static str {
                "CraneMachine"
            }
            fn configure(builder: &mut ClassMapBuilder<Self>) {
                builder.set_discriminator("Crane");
            }
        }
        #[derive(Debug, Default)]
        struct CraneBird;
        impl MappedDocument for CraneBird {
            fn type_name() -> &'static str {
                "CraneBird"
            }
            fn configure(builder: &mut ClassMapBuilder<Self>) {
                builder.set_base::<Animal>();
                builder.set_discriminator("Crane");
            }
        }

        let mapper = DocumentMapper::new();
        let animal_map = mapper.class_map::<Animal>().unwrap();
        mapper.class_map::<Crane>().unwrap();
        mapper.class_map::<CraneBird>().unwrap();

        let resolved = mapper
            .class_maps()
            .lookup_actual_type(animal_map.type_id(), &Value::String("Crane".into()))
            .unwrap();
        assert_eq!(resolved.type_name(), "CraneBird");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mapper = DocumentMapper::new();
        mapper.register_class::<Person>().unwrap();
        let err = mapper.register_class::<Person>().unwrap_err();
        assert!(matches!(err, BsonError::DuplicateRegistration(_)));
    }

    #[test]
    fn test_unregister_allows_rebuild() {
        let mapper = DocumentMapper::new();
        mapper.register_class::<Person>().unwrap();
        mapper.unregister_class::<Person>();
        mapper.register_class::<Person>().unwrap();
    }

    #[test]
    fn test_cyclic_base_configuration_rejected() {
        #[derive(Debug, Default)]
        struct CycleA;
        #[derive(Debug, Default)]
        struct CycleB;
        impl MappedDocument for CycleA {
            fn type_name() -> &'static str {
                "CycleA"
            }
            fn configure(builder: &mut ClassMapBuilder<Self>) {
                builder.set_base::<CycleB>();
            }
        }
        impl MappedDocument for CycleB {
            fn type_name() -> &'static str {
                "CycleB"
            }
            fn configure(builder: &mut ClassMapBuilder<Self>) {
                builder.set_base::<CycleA>();
            }
        }

        let mapper = DocumentMapper::new();
        let err = mapper.class_map::<CycleA>().unwrap_err();
        assert!(err.to_string().contains("cyclic"));
    }

    #[test]
    fn test_bad_creator_argument_fails_at_first_use() {
        #[derive(Debug, Default)]
        struct BadCreator {
            name: String,
        }
        impl MappedDocument for BadCreator {
            fn type_name() -> &'static str {
                "BadCreator"
            }
            fn configure(builder: &mut ClassMapBuilder<Self>) {
                builder.member(
                    "name",
                    TypeShape::scalar::<String>(),
                    |t, _| Ok(Value::String(t.name.clone())),
                    |t, v, _| {
                        t.name = v.as_str()?.to_string();
                        Ok(())
                    },
                );
                builder.set_creator_args(&["name", "nope"]);
            }
        }

        let mapper = DocumentMapper::new();
        let err = mapper.class_map::<BadCreator>().unwrap_err();
        assert!(err.to_string().contains("'nope'"));
    }

    #[test]
    fn test_convention_pack_applies_camel_case_by_prefix() {
        #[derive(Debug, Default)]
        struct AuditRecord {
            created_by: String,
        }
        impl MappedDocument for AuditRecord {
            fn type_name() -> &'static str {
                "AuditRecord"
            }
            fn configure(builder: &mut ClassMapBuilder<Self>) {
                builder.member(
                    "created_by",
                    TypeShape::scalar::<String>(),
                    |t, _| Ok(Value::String(t.created_by.clone())),
                    |t, v, _| {
                        t.created_by = v.as_str()?.to_string();
                        Ok(())
                    },
                );
            }
        }

        let mapper = DocumentMapper::new();
        mapper.conventions().register(
            "audit",
            "Audit",
            ConventionPack::new().element_naming(NamingStyle::CamelCase),
        );

        let map = mapper.class_map::<AuditRecord>().unwrap();
        assert_eq!(map.members()[0].element_name(), "createdBy");
    }

    #[test]
    fn test_explicit_order_precedes_declaration_order() {
        #[derive(Debug, Default)]
        struct Ordered {
            a: i32,
            z: i32,
        }
        impl MappedDocument for Ordered {
            fn type_name() -> &'static str {
                "Ordered"
            }
            fn configure(builder: &mut ClassMapBuilder<Self>) {
                builder.member(
                    "a",
                    TypeShape::scalar::<i32>(),
                    |t, _| Ok(Value::Int32(t.a)),
                    |t, v, _| {
                        t.a = v.as_i32()?;
                        Ok(())
                    },
                );
                builder
                    .member(
                        "z",
                        TypeShape::scalar::<i32>(),
                        |t, _| Ok(Value::Int32(t.z)),
                        |t, v, _| {
                            t.z = v.as_i32()?;
                            Ok(())
                        },
                    )
                    .order(1);
            }
        }

        let mapper = DocumentMapper::new();
        let map = mapper.class_map::<Ordered>().unwrap();
        let names: Vec<_> = map.members().iter().map(|m| m.member_name()).collect();
        assert_eq!(names, vec!["z", "a"]);
    }

    #[test]
    fn test_duplicate_element_names_rejected() {
        #[derive(Debug, Default)]
        struct Clashing {
            a: i32,
            b: i32,
        }
        impl MappedDocument for Clashing {
            fn type_name() -> &'static str {
                "Clashing"
            }
            fn configure(builder: &mut ClassMapBuilder<Self>) {
                builder
                    .member(
                        "a",
                        TypeShape::scalar::<i32>(),
                        |t, _| Ok(Value::Int32(t.a)),
                        |t, v, _| {
                            t.a = v.as_i32()?;
                            Ok(())
                        },
                    )
                    .element_name("same");
                builder
                    .member(
                        "b",
                        TypeShape::scalar::<i32>(),
                        |t, _| Ok(Value::Int32(t.b)),
                        |t, v, _| {
                            t.b = v.as_i32()?;
                            Ok(())
                        },
                    )
                    .element_name("same");
            }
        }

        let mapper = DocumentMapper::new();
        let err = mapper.class_map::<Clashing>().unwrap_err();
        assert!(err.to_string().contains("duplicate element name"));
    }
}
