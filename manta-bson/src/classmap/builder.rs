//! Class map construction.

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::conventions::{DiscriminatorStyle, ResolvedConventions};
use crate::error::{BsonError, BsonResult};
use crate::mapper::DocumentMapper;
use crate::serializer::{TypeShape, ValueSerializer};
use crate::value::Value;

use super::{BaseInit, ClassMap, Factory, Getter, MappedDocument, MemberMap, Setter};

/// One declared member, configurable before the map is frozen.
pub struct MemberDecl {
    member_name: String,
    explicit_element_name: Option<String>,
    shape: TypeShape,
    getter: Getter,
    setter: Setter,
    explicit_serializer: Option<Arc<dyn ValueSerializer>>,
    default_value: Option<Value>,
    is_required: bool,
    ignore_if_null: Option<bool>,
    ignore_if_default: Option<bool>,
    order: Option<u32>,
}

impl MemberDecl {
    /// Override the element name, bypassing the naming convention.
    pub fn element_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.explicit_element_name = Some(name.into());
        self
    }

    /// Use a specific serializer instead of resolving one by type shape.
    pub fn serializer(&mut self, serializer: Arc<dyn ValueSerializer>) -> &mut Self {
        self.explicit_serializer = Some(serializer);
        self
    }

    /// Declare a default applied when the element is absent.
    pub fn default_value(&mut self, value: impl Into<Value>) -> &mut Self {
        self.default_value = Some(value.into());
        self
    }

    /// Require the element to be present when deserializing.
    pub fn required(&mut self) -> &mut Self {
        self.is_required = true;
        self
    }

    /// Skip this member during serialization when its value is null.
    pub fn ignore_if_null(&mut self, ignore: bool) -> &mut Self {
        self.ignore_if_null = Some(ignore);
        self
    }

    /// Skip this member during serialization when its value equals the
    /// declared default.
    pub fn ignore_if_default(&mut self, ignore: bool) -> &mut Self {
        self.ignore_if_default = Some(ignore);
        self
    }

    /// Set an explicit serialization position. Members with an explicit
    /// order precede the rest.
    pub fn order(&mut self, order: u32) -> &mut Self {
        self.order = Some(order);
        self
    }
}

/// Declares the mapping for one type; frozen into a [`ClassMap`] on first
/// lookup.
pub struct ClassMapBuilder<T: Default + 'static> {
    type_name: String,
    discriminator: Option<String>,
    discriminator_element: Option<String>,
    discriminator_style: Option<DiscriminatorStyle>,
    is_root_class: bool,
    base_init: Option<BaseInit>,
    id_member: Option<String>,
    ignore_extra_elements: bool,
    creator_args: Vec<String>,
    members: Vec<MemberDecl>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Default + 'static> ClassMapBuilder<T> {
    pub(crate) fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            discriminator: None,
            discriminator_element: None,
            discriminator_style: None,
            is_root_class: false,
            base_init: None,
            id_member: None,
            ignore_extra_elements: false,
            creator_args: Vec::new(),
            members: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Declare a member with its type shape and accessors.
    pub fn member<G, S>(
        &mut self,
        name: &str,
        shape: TypeShape,
        getter: G,
        setter: S,
    ) -> &mut MemberDecl
    where
        G: Fn(&T, &DocumentMapper) -> BsonResult<Value> + Send + Sync + 'static,
        S: Fn(&mut T, Value, &DocumentMapper) -> BsonResult<()> + Send + Sync + 'static,
    {
        let erased_getter: Getter = Arc::new(move |obj: &dyn Any, mapper: &DocumentMapper| {
            let typed = obj.downcast_ref::<T>().ok_or_else(|| {
                BsonError::serialization(format!(
                    "instance is not a {}",
                    std::any::type_name::<T>()
                ))
            })?;
            getter(typed, mapper)
        });
        let erased_setter: Setter =
            Arc::new(move |obj: &mut dyn Any, value: Value, mapper: &DocumentMapper| {
                let typed = obj.downcast_mut::<T>().ok_or_else(|| {
                    BsonError::serialization(format!(
                        "instance is not a {}",
                        std::any::type_name::<T>()
                    ))
                })?;
                setter(typed, value, mapper)
            });

        self.members.push(MemberDecl {
            member_name: name.to_string(),
            explicit_element_name: None,
            shape,
            getter: erased_getter,
            setter: erased_setter,
            explicit_serializer: None,
            default_value: None,
            is_required: false,
            ignore_if_null: None,
            ignore_if_default: None,
            order: None,
        });
        self.members.last_mut().expect("member just pushed")
    }

    /// Override the discriminator value (defaults to the type name).
    pub fn set_discriminator(&mut self, discriminator: impl Into<String>) -> &mut Self {
        self.discriminator = Some(discriminator.into());
        self
    }

    /// Override the discriminator element name for this type.
    pub fn set_discriminator_element(&mut self, name: impl Into<String>) -> &mut Self {
        self.discriminator_element = Some(name.into());
        self
    }

    /// Force a discriminator style for this type.
    pub fn set_discriminator_style(&mut self, style: DiscriminatorStyle) -> &mut Self {
        self.discriminator_style = Some(style);
        self
    }

    /// Declare this type as the root of a polymorphic hierarchy. Root
    /// hierarchies always serialize their discriminator and default to the
    /// hierarchical style.
    pub fn set_is_root_class(&mut self) -> &mut Self {
        self.is_root_class = true;
        self
    }

    /// Link this type's map under a base type's map.
    pub fn set_base<B: MappedDocument>(&mut self) -> &mut Self {
        self.base_init = Some(Box::new(|registry, conventions, resolving| {
            registry.lookup_chain::<B>(conventions, resolving)
        }));
        self
    }

    /// Explicitly pick the identifier member by name.
    pub fn set_id_member(&mut self, name: impl Into<String>) -> &mut Self {
        self.id_member = Some(name.into());
        self
    }

    /// Skip unknown elements during deserialization instead of failing.
    pub fn set_ignore_extra_elements(&mut self, ignore: bool) -> &mut Self {
        self.ignore_extra_elements = ignore;
        self
    }

    /// Declare constructor-style argument names; each must match a declared
    /// member or the map fails to build.
    pub fn set_creator_args(&mut self, names: &[&str]) -> &mut Self {
        self.creator_args = names.iter().map(|n| (*n).to_string()).collect();
        self
    }

    pub(crate) fn take_base_init(&mut self) -> Option<BaseInit> {
        self.base_init.take()
    }

    pub(crate) fn build(
        self,
        base: Option<Arc<ClassMap>>,
        conventions: &ResolvedConventions,
    ) -> BsonResult<ClassMap> {
        let type_name = self.type_name;

        // creator arguments must resolve to declared members
        for arg in &self.creator_args {
            if !self.members.iter().any(|m| m.member_name == *arg) {
                return Err(BsonError::mapping(format!(
                    "constructor argument '{arg}' of '{type_name}' does not match any member"
                )));
            }
        }

        // explicit id wins; otherwise the first member matching a candidate name
        let id_member_name = match &self.id_member {
            Some(name) => {
                if !self.members.iter().any(|m| m.member_name == *name) {
                    return Err(BsonError::mapping(format!(
                        "id member '{name}' of '{type_name}' does not match any member"
                    )));
                }
                Some(name.clone())
            }
            None => self
                .members
                .iter()
                .find(|m| conventions.id_candidates.iter().any(|c| *c == m.member_name))
                .map(|m| m.member_name.clone()),
        };

        let mut members: Vec<(usize, MemberMap)> = self
            .members
            .into_iter()
            .enumerate()
            .map(|(index, decl)| {
                let is_id = id_member_name.as_deref() == Some(decl.member_name.as_str());
                let element_name = if is_id {
                    "_id".to_string()
                } else {
                    decl.explicit_element_name
                        .unwrap_or_else(|| conventions.element_naming.apply(&decl.member_name))
                };
                let member = MemberMap::new(
                    decl.member_name,
                    element_name,
                    decl.shape,
                    decl.getter,
                    decl.setter,
                    decl.explicit_serializer,
                    decl.default_value,
                    decl.is_required,
                    decl.ignore_if_null.unwrap_or(conventions.ignore_if_null),
                    decl.ignore_if_default
                        .unwrap_or(conventions.ignore_if_default),
                    decl.order,
                );
                (index, member)
            })
            .collect();

        // explicit orders first, then declaration order
        members.sort_by_key(|(index, member)| (member.order().unwrap_or(u32::MAX), *index));
        let members: Vec<MemberMap> = members.into_iter().map(|(_, m)| m).collect();

        let mut element_names = HashSet::new();
        for member in &members {
            if !element_names.insert(member.element_name().to_string()) {
                return Err(BsonError::mapping(format!(
                    "duplicate element name '{}' in class map for '{type_name}'",
                    member.element_name()
                )));
            }
        }

        let id_member = id_member_name
            .as_deref()
            .and_then(|name| members.iter().position(|m| m.member_name() == name));

        let is_root_class = self.is_root_class;
        let has_root_class =
            is_root_class || base.as_ref().is_some_and(|b| b.has_root_class());
        let discriminator_style = self.discriminator_style.unwrap_or(if has_root_class {
            DiscriminatorStyle::Hierarchical
        } else {
            conventions.discriminator_style
        });
        let discriminator_element = self
            .discriminator_element
            .unwrap_or_else(|| conventions.discriminator_element.clone());

        let factory: Factory = Arc::new(|| Box::new(T::default()) as Box<dyn Any>);

        Ok(ClassMap::new(
            TypeId::of::<T>(),
            type_name.clone(),
            self.discriminator.unwrap_or(type_name),
            discriminator_element,
            discriminator_style,
            is_root_class,
            has_root_class,
            base,
            id_member,
            members,
            self.ignore_extra_elements,
            factory,
        ))
    }
}
