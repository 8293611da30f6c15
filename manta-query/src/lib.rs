//! # manta-query
//!
//! Query expression translation and pipeline building for the Manta
//! driver core.
//!
//! This crate provides:
//! - A closed expression AST for the query surface (`expr`)
//! - Immutable filter trees with canonical server rendering (`filter`)
//! - Recursive-descent filter translation with idiom normalization
//! - Pipeline building with output-shape threading, one translator per
//!   chained query operator
//!
//! ## Example
//!
//! ```rust,ignore
//! use manta_query::prelude::*;
//!
//! let translator = PipelineTranslator::new(&mapper);
//! let pipeline = translator.source::<Customer>()?;
//! let pipeline = translator.translate_where(
//!     &pipeline,
//!     &Lambda::new("c", Expr::param_field("c", "age").gte(18)),
//! )?;
//! let stages = pipeline.render();
//! ```

pub mod error;
pub mod expr;
pub mod filter;
pub mod pipeline;
pub mod shape;
pub mod translate;

pub use error::{TranslationError, TranslationResult};
pub use expr::{ComparisonOp, Expr, Lambda, Lambda2, StringPredicate};
pub use filter::{FieldRef, FilterNode};
pub use pipeline::{
    GroupKey, Pipeline, Projection, PushSpec, SortDirection, SortField, Stage,
};
pub use shape::Shape;
pub use translate::{Binding, PipelineTranslator, TranslationContext, resolve_field, translate_filter};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{TranslationError, TranslationResult};
    pub use crate::expr::{ComparisonOp, Expr, Lambda, Lambda2};
    pub use crate::filter::{FieldRef, FilterNode};
    pub use crate::pipeline::{Pipeline, SortDirection, Stage};
    pub use crate::shape::Shape;
    pub use crate::translate::{PipelineTranslator, TranslationContext, translate_filter};
}
