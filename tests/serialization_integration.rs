//! End-to-end class-map serialization scenarios.

use manta::prelude::*;
use pretty_assertions::assert_eq;

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
struct Shape2d {
    label: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Polygon {
    label: String,
    sides: i32,
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Rectangle {
    label: String,
    sides: i32,
    width: f64,
    height: f64,
}

impl MappedDocument for Shape2d {
    fn type_name() -> &'static str {
        "Shape2d"
    }

    fn configure(builder: &mut ClassMapBuilder<Self>) {
        builder.set_is_root_class();
        builder.member(
            "label",
            TypeShape::scalar::<String>(),
            |s, _| Ok(Value::String(s.label.clone())),
            |s, v, _| {
                s.label = v.as_str()?.to_string();
                Ok(())
            },
        );
    }
}

impl MappedDocument for Polygon {
    fn type_name() -> &'static str {
        "Polygon"
    }

    fn configure(builder: &mut ClassMapBuilder<Self>) {
        builder.set_base::<Shape2d>();
        builder.member(
            "label",
            TypeShape::scalar::<String>(),
            |s, _| Ok(Value::String(s.label.clone())),
            |s, v, _| {
                s.label = v.as_str()?.to_string();
                Ok(())
            },
        );
        builder.member(
            "sides",
            TypeShape::scalar::<i32>(),
            |s, _| Ok(Value::Int32(s.sides)),
            |s, v, _| {
                s.sides = v.as_i32()?;
                Ok(())
            },
        );
    }
}

impl MappedDocument for Rectangle {
    fn type_name() -> &'static str {
        "Rectangle"
    }

    fn configure(builder: &mut ClassMapBuilder<Self>) {
        builder.set_base::<Polygon>();
        builder.member(
            "label",
            TypeShape::scalar::<String>(),
            |s, _| Ok(Value::String(s.label.clone())),
            |s, v, _| {
                s.label = v.as_str()?.to_string();
                Ok(())
            },
        );
        builder.member(
            "sides",
            TypeShape::scalar::<i32>(),
            |s, _| Ok(Value::Int32(s.sides)),
            |s, v, _| {
                s.sides = v.as_i32()?;
                Ok(())
            },
        );
        builder.member(
            "width",
            TypeShape::scalar::<f64>(),
            |s, _| Ok(Value::Double(s.width)),
            |s, v, _| {
                s.width = v.as_f64()?;
                Ok(())
            },
        );
        builder.member(
            "height",
            TypeShape::scalar::<f64>(),
            |s, _| Ok(Value::Double(s.height)),
            |s, v, _| {
                s.height = v.as_f64()?;
                Ok(())
            },
        );
    }
}

#[test]
fn person_with_default_conventions_maps_id_and_serializes_id_first() {
    let mapper = DocumentMapper::new();

    let map = mapper.class_map::<Person>().unwrap();
    assert_eq!(map.id_member().unwrap().element_name(), "_id");

    let doc = mapper
        .to_document(&Person {
            id: 1,
            name: "Jack".into(),
        })
        .unwrap();
    assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["_id", "name"]);
    assert_eq!(doc.get_i32("_id").unwrap(), 1);
    assert_eq!(doc.get_str("name").unwrap(), "Jack");
}

#[test]
fn round_trip_preserves_every_mapped_member() {
    let mapper = DocumentMapper::new();
    let person = Person {
        id: 42,
        name: "Ada".into(),
    };
    let bytes = mapper.serialize(&person).unwrap();
    let restored: Person = mapper.deserialize(&bytes).unwrap();
    assert_eq!(restored, person);
}

#[test]
fn hierarchical_discriminator_is_root_to_leaf() {
    let mapper = DocumentMapper::new();
    mapper.register_class::<Shape2d>().unwrap();
    mapper.register_class::<Polygon>().unwrap();
    let rectangle_map = mapper.class_map::<Rectangle>().unwrap();

    assert_eq!(
        rectangle_map.discriminator_chain(),
        vec!["Shape2d", "Polygon", "Rectangle"]
    );

    // the array resolves back to the leaf type under the root nominal type
    let resolved = mapper
        .class_maps()
        .lookup_actual_type(
            mapper.class_map::<Shape2d>().unwrap().type_id(),
            &rectangle_map.discriminator_value(),
        )
        .unwrap();
    assert_eq!(resolved.type_name(), "Rectangle");
}

#[test]
fn polymorphic_bytes_round_trip_through_discriminator_peek() {
    let mapper = DocumentMapper::new();
    mapper.register_class::<Shape2d>().unwrap();
    mapper.register_class::<Polygon>().unwrap();
    mapper.register_class::<Rectangle>().unwrap();

    let rectangle = Rectangle {
        label: "r1".into(),
        sides: 4,
        width: 3.0,
        height: 2.0,
    };
    let bytes = mapper.serialize_polymorphic::<Shape2d>(&rectangle).unwrap();

    // the document carries the full root-to-leaf discriminator
    let doc = manta_bson::decode_document(&bytes).unwrap();
    assert_eq!(
        doc.get("_t").unwrap(),
        &Value::Array(vec![
            Value::String("Shape2d".into()),
            Value::String("Polygon".into()),
            Value::String("Rectangle".into()),
        ])
    );

    let restored = mapper.deserialize_polymorphic::<Shape2d>(&bytes).unwrap();
    let restored = restored.downcast::<Rectangle>().expect("leaf type");
    assert_eq!(*restored, rectangle);
}

#[test]
fn deserializing_base_documents_keeps_the_base_type() {
    let mapper = DocumentMapper::new();
    mapper.register_class::<Shape2d>().unwrap();
    mapper.register_class::<Polygon>().unwrap();

    let shape = Shape2d { label: "s".into() };
    let bytes = mapper.serialize_polymorphic::<Shape2d>(&shape).unwrap();
    let restored = mapper.deserialize_polymorphic::<Shape2d>(&bytes).unwrap();
    assert!(restored.downcast::<Shape2d>().is_ok());
}
