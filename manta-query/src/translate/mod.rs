//! Expression translation.
//!
//! Translation is recursive descent over [`Expr`](crate::expr::Expr) with
//! one handler per variant. The [`TranslationContext`] carries the current
//! result shape and the lambda parameters in scope; field references
//! resolve through it into element paths with serializers attached.

mod filter;
mod pipeline;

pub use filter::translate_filter;
pub use pipeline::PipelineTranslator;

use manta_bson::mapper::DocumentMapper;

use crate::error::{TranslationError, TranslationResult};
use crate::expr::Expr;
use crate::shape::Shape;

/// What a lambda parameter is bound to: a shape, and the element-path
/// prefix its fields resolve under (empty inside `$elemMatch` predicates,
/// a field name for joined documents).
#[derive(Clone)]
pub struct Binding {
    /// The bound shape.
    pub shape: Shape,
    /// Path prefix for fields resolved through this binding.
    pub prefix: String,
}

impl Binding {
    /// Bind a shape at the document root.
    pub fn root(shape: Shape) -> Self {
        Self {
            shape,
            prefix: String::new(),
        }
    }

    /// Bind a shape under a path prefix.
    pub fn at(shape: Shape, prefix: impl Into<String>) -> Self {
        Self {
            shape,
            prefix: prefix.into(),
        }
    }
}

/// Scoped state for one translation pass.
pub struct TranslationContext<'a> {
    mapper: &'a DocumentMapper,
    bindings: Vec<(String, Binding)>,
}

impl<'a> TranslationContext<'a> {
    /// Create a context with one root parameter bound to a shape.
    pub fn new(mapper: &'a DocumentMapper, parameter: impl Into<String>, shape: Shape) -> Self {
        Self {
            mapper,
            bindings: vec![(parameter.into(), Binding::root(shape))],
        }
    }

    /// The mapper translation resolves serializers through.
    pub fn mapper(&self) -> &'a DocumentMapper {
        self.mapper
    }

    /// Push a parameter binding; innermost bindings shadow outer ones.
    pub fn bind(&mut self, parameter: impl Into<String>, binding: Binding) {
        self.bindings.push((parameter.into(), binding));
    }

    /// Pop the innermost binding.
    pub fn unbind(&mut self) {
        self.bindings.pop();
    }

    /// Find a parameter's binding.
    pub fn binding(&self, parameter: &str) -> Option<&Binding> {
        self.bindings
            .iter()
            .rev()
            .find(|(name, _)| name == parameter)
            .map(|(_, binding)| binding)
    }
}

/// Resolve a field-path expression (a chain of member accesses rooted at a
/// bound parameter) to its element path and shape.
pub fn resolve_field(
    ctx: &TranslationContext<'_>,
    expr: &Expr,
) -> TranslationResult<(String, Shape)> {
    match expr {
        Expr::Parameter(name) => {
            let binding = ctx
                .binding(name)
                .ok_or_else(|| TranslationError::UnboundParameter {
                    parameter: name.clone(),
                })?;
            Ok((binding.prefix.clone(), binding.shape.clone()))
        }
        Expr::Field { source, name } => {
            let (prefix, shape) = resolve_field(ctx, source)?;
            let (element, member_shape) = shape.resolve_member(name, ctx.mapper())?;
            let path = if prefix.is_empty() {
                element
            } else {
                format!("{prefix}.{element}")
            };
            Ok((path, member_shape))
        }
        other => Err(TranslationError::not_a_field_path(other)),
    }
}
