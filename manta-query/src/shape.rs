//! Result shapes: the "output serializer" threaded through translation.
//!
//! Every pipeline stage knows the shape of the elements flowing out of it.
//! Field paths in the next stage's expressions resolve against that shape,
//! which is how each field reference ends up carrying the serializer for
//! its operands.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use manta_bson::classmap::ClassMap;
use manta_bson::mapper::DocumentMapper;
use manta_bson::serializer::{ArraySerializer, MappedStructSerializer, TypeShape, ValueSerializer};

use crate::error::{TranslationError, TranslationResult};
use crate::filter::FieldRef;

/// The shape of one result element at some point in a pipeline.
#[derive(Clone)]
pub enum Shape {
    /// A class-mapped document type.
    Mapped(Arc<ClassMap>),
    /// A scalar with a known serializer.
    Scalar(Arc<dyn ValueSerializer>),
    /// A sequence of elements.
    Sequence(Box<Shape>),
    /// A synthetic document: member name → (element name, member shape).
    ///
    /// Synthetic shapes are produced by projections, grouping, and joins;
    /// the member name is what expressions reference, the element name is
    /// what the server document carries.
    Synthetic(IndexMap<String, (String, Shape)>),
}

impl Shape {
    /// A synthetic single-field wrapper shape (`{_v: inner}`), produced by
    /// scalar projections and unwinds; result materialization unwraps it.
    pub fn wrapped(inner: Shape) -> Self {
        let mut fields = IndexMap::new();
        fields.insert("_v".to_string(), ("_v".to_string(), inner));
        Self::Synthetic(fields)
    }

    /// Whether this is the single-field wrapper shape.
    pub fn is_wrapped(&self) -> bool {
        match self {
            Self::Synthetic(fields) => fields.len() == 1 && fields.contains_key("_v"),
            _ => false,
        }
    }

    /// Resolve one member by name to its element name and shape.
    pub fn resolve_member(
        &self,
        name: &str,
        mapper: &DocumentMapper,
    ) -> TranslationResult<(String, Shape)> {
        match self {
            Self::Mapped(map) => {
                let member = map
                    .members()
                    .iter()
                    .find(|m| m.member_name() == name)
                    .ok_or_else(|| TranslationError::UnresolvedField {
                        path: format!("{}.{}", map.type_name(), name),
                    })?;
                let shape = Self::of_member(member.shape(), member, mapper)?;
                Ok((member.element_name().to_string(), shape))
            }
            Self::Synthetic(fields) => fields
                .get(name)
                .map(|(element, shape)| (element.clone(), shape.clone()))
                .ok_or_else(|| TranslationError::UnresolvedField {
                    path: name.to_string(),
                }),
            // dotted paths reach through arrays into their elements
            Self::Sequence(inner) => inner.resolve_member(name, mapper),
            Self::Scalar(_) => Err(TranslationError::UnresolvedField {
                path: name.to_string(),
            }),
        }
    }

    /// The serializer for values of this shape.
    pub fn serializer(&self) -> TranslationResult<Arc<dyn ValueSerializer>> {
        match self {
            Self::Mapped(map) => Ok(Arc::new(MappedStructSerializer::new(map.type_name()))),
            Self::Scalar(serializer) => Ok(serializer.clone()),
            Self::Sequence(inner) => Ok(Arc::new(ArraySerializer::new(inner.serializer()?))),
            Self::Synthetic(_) => Ok(Arc::new(MappedStructSerializer::new("<synthetic>"))),
        }
    }

    /// The element shape, if this is a sequence.
    pub fn element_shape(&self) -> Option<&Shape> {
        match self {
            Self::Sequence(inner) => Some(inner),
            _ => None,
        }
    }

    /// Build a field reference at a path with this shape's serializer.
    pub fn field_ref(&self, path: impl Into<String>) -> TranslationResult<FieldRef> {
        Ok(FieldRef::new(path, self.serializer()?))
    }

    // Converts a member's declared TypeShape into a result Shape, honoring
    // the member's (possibly explicit) serializer for scalar members.
    fn of_member(
        type_shape: &TypeShape,
        member: &manta_bson::classmap::MemberMap,
        mapper: &DocumentMapper,
    ) -> TranslationResult<Shape> {
        match type_shape {
            TypeShape::Optional(inner) => Self::of_member(inner, member, mapper),
            TypeShape::Sequence(inner) => Ok(Shape::Sequence(Box::new(Self::of_type_shape(
                inner, mapper,
            )?))),
            TypeShape::Mapped { id, name } => {
                let map = mapper.class_maps().get_by_id(*id).ok_or_else(|| {
                    TranslationError::UnresolvedField {
                        path: format!("{name} (class map not registered)"),
                    }
                })?;
                Ok(Shape::Mapped(map))
            }
            TypeShape::Scalar { .. } => Ok(Shape::Scalar(
                member.serializer(mapper.serializers(), mapper.class_maps())?,
            )),
        }
    }

    fn of_type_shape(type_shape: &TypeShape, mapper: &DocumentMapper) -> TranslationResult<Shape> {
        match type_shape {
            TypeShape::Optional(inner) => Self::of_type_shape(inner, mapper),
            TypeShape::Sequence(inner) => Ok(Shape::Sequence(Box::new(Self::of_type_shape(
                inner, mapper,
            )?))),
            TypeShape::Mapped { id, name } => {
                let map = mapper.class_maps().get_by_id(*id).ok_or_else(|| {
                    TranslationError::UnresolvedField {
                        path: format!("{name} (class map not registered)"),
                    }
                })?;
                Ok(Shape::Mapped(map))
            }
            scalar @ TypeShape::Scalar { .. } => Ok(Shape::Scalar(
                mapper
                    .serializers()
                    .lookup(scalar, mapper.class_maps())?,
            )),
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mapped(map) => write!(f, "Mapped({})", map.type_name()),
            Self::Scalar(serializer) => write!(f, "Scalar({})", serializer.wire_type()),
            Self::Sequence(inner) => write!(f, "Sequence({inner:?})"),
            Self::Synthetic(fields) => {
                f.write_str("Synthetic{")?;
                for (i, (name, (element, shape))) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}->{element}: {shape:?}")?;
                }
                f.write_str("}")
            }
        }
    }
}
