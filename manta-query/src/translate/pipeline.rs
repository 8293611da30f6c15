//! Pipeline translation: one translator per chained query operator.
//!
//! Each translator receives the pipeline built so far, translates its own
//! selector expressions against the pipeline's output shape, and returns
//! the extended pipeline together with the new output shape. Pipelines are
//! never mutated in place.

use std::sync::Arc;

use indexmap::IndexMap;
use manta_bson::classmap::MappedDocument;
use manta_bson::mapper::DocumentMapper;
use manta_bson::serializer::StringSerializer;
use manta_bson::Value;
use tracing::debug;

use crate::error::{TranslationError, TranslationResult};
use crate::expr::{ComparisonOp, Expr, Lambda, Lambda2};
use crate::filter::{FieldRef, FilterNode};
use crate::pipeline::{
    GroupKey, Pipeline, Projection, PushSpec, SortDirection, SortField, Stage,
};
use crate::shape::Shape;

use super::{Binding, TranslationContext, resolve_field, translate_filter};

/// Translates chained query operators into pipeline stages.
pub struct PipelineTranslator<'a> {
    mapper: &'a DocumentMapper,
}

impl<'a> PipelineTranslator<'a> {
    /// Create a translator over a mapper.
    pub fn new(mapper: &'a DocumentMapper) -> Self {
        Self { mapper }
    }

    /// An empty pipeline over a mapped collection type.
    pub fn source<T: MappedDocument>(&self) -> TranslationResult<Pipeline> {
        let map = self.mapper.class_map::<T>()?;
        Ok(Pipeline::new(Shape::Mapped(map)))
    }

    /// `where(|x| predicate)`: a `$match` stage; the shape is unchanged.
    pub fn translate_where(
        &self,
        pipeline: &Pipeline,
        predicate: &Lambda,
    ) -> TranslationResult<Pipeline> {
        let mut ctx = self.context(&predicate.parameter, pipeline.output().clone());
        let filter = translate_filter(&mut ctx, &predicate.body)?;
        debug!(stage = "$match", "pipeline stage translated");
        Ok(pipeline.with_stage(Stage::Match(filter), pipeline.output().clone()))
    }

    /// `select(|x| selector)`: a `$project` stage. A field selector wraps
    /// the result under `_v`; a document constructor projects each field.
    pub fn translate_select(
        &self,
        pipeline: &Pipeline,
        selector: &Lambda,
    ) -> TranslationResult<Pipeline> {
        let ctx = self.context(&selector.parameter, pipeline.output().clone());
        match &selector.body {
            Expr::NewDocument(fields) => {
                let mut projected = Vec::with_capacity(fields.len());
                let mut output = IndexMap::new();
                for (name, value) in fields {
                    let (path, shape) = resolve_field(&ctx, value)
                        .map_err(|_| TranslationError::not_a_field_path(value))?;
                    projected.push((name.clone(), path));
                    output.insert(name.clone(), (name.clone(), shape));
                }
                Ok(pipeline.with_stage(
                    Stage::Project(Projection {
                        fields: projected,
                        exclude_id: true,
                    }),
                    Shape::Synthetic(output),
                ))
            }
            body => {
                let (path, shape) = resolve_field(&ctx, body)
                    .map_err(|_| TranslationError::not_a_field_path(body))?;
                Ok(pipeline.with_stage(
                    Stage::Project(Projection {
                        fields: vec![("_v".to_string(), path)],
                        exclude_id: true,
                    }),
                    Shape::wrapped(shape),
                ))
            }
        }
    }

    /// `order_by(|x| key)`: a `$sort` stage.
    pub fn translate_order_by(
        &self,
        pipeline: &Pipeline,
        selector: &Lambda,
        direction: SortDirection,
    ) -> TranslationResult<Pipeline> {
        let ctx = self.context(&selector.parameter, pipeline.output().clone());
        let (path, _) = resolve_field(&ctx, &selector.body)
            .map_err(|_| TranslationError::not_a_field_path(&selector.body))?;
        Ok(pipeline.with_stage(
            Stage::Sort(vec![SortField::new(path, direction)]),
            pipeline.output().clone(),
        ))
    }

    /// `then_by(|x| key)`: merges into the trailing `$sort` stage.
    pub fn translate_then_by(
        &self,
        pipeline: &Pipeline,
        selector: &Lambda,
        direction: SortDirection,
    ) -> TranslationResult<Pipeline> {
        let Some(Stage::Sort(existing)) = pipeline.stages().last() else {
            return Err(TranslationError::unsupported(format!(
                "then_by({selector}) without a preceding order_by"
            )));
        };
        let ctx = self.context(&selector.parameter, pipeline.output().clone());
        let (path, _) = resolve_field(&ctx, &selector.body)
            .map_err(|_| TranslationError::not_a_field_path(&selector.body))?;
        let mut fields = existing.clone();
        fields.push(SortField::new(path, direction));
        Ok(pipeline.with_replaced_last(Stage::Sort(fields), pipeline.output().clone()))
    }

    /// `skip(n)`: a `$skip` stage.
    pub fn translate_skip(&self, pipeline: &Pipeline, count: u64) -> Pipeline {
        pipeline.with_stage(Stage::Skip(count), pipeline.output().clone())
    }

    /// `take(n)`: a `$limit` stage.
    pub fn translate_take(&self, pipeline: &Pipeline, count: u64) -> Pipeline {
        pipeline.with_stage(Stage::Limit(count), pipeline.output().clone())
    }

    /// `distinct()`: `$group` on the value, then restore the shape.
    pub fn translate_distinct(&self, pipeline: &Pipeline) -> TranslationResult<Pipeline> {
        let output = pipeline.output().clone();
        if output.is_wrapped() {
            Ok(pipeline.with_stages(
                vec![
                    Stage::Group {
                        key: GroupKey::Path("_v".to_string()),
                        push: None,
                    },
                    Stage::Project(Projection {
                        fields: vec![("_v".to_string(), "_id".to_string())],
                        exclude_id: true,
                    }),
                ],
                output,
            ))
        } else {
            Ok(pipeline.with_stages(
                vec![
                    Stage::Group {
                        key: GroupKey::Root,
                        push: None,
                    },
                    Stage::ReplaceRoot {
                        path: "_id".to_string(),
                    },
                ],
                output,
            ))
        }
    }

    /// `group_by(|x| key)`: a `$group` stage accumulating whole elements.
    ///
    /// The key selector translates against the pre-group shape; the output
    /// is the synthetic group shape, whose `key` member resolves to `_id`
    /// and whose `elements` member resolves to the accumulated array.
    pub fn translate_group_by(
        &self,
        pipeline: &Pipeline,
        key: &Lambda,
    ) -> TranslationResult<Pipeline> {
        let ctx = self.context(&key.parameter, pipeline.output().clone());
        let (path, key_shape) = resolve_field(&ctx, &key.body)
            .map_err(|_| TranslationError::not_a_field_path(&key.body))?;

        let mut output = IndexMap::new();
        output.insert("key".to_string(), ("_id".to_string(), key_shape));
        output.insert(
            "elements".to_string(),
            (
                "_elements".to_string(),
                Shape::Sequence(Box::new(pipeline.output().clone())),
            ),
        );

        debug!(stage = "$group", key = %path, "pipeline stage translated");
        Ok(pipeline.with_stage(
            Stage::Group {
                key: GroupKey::Path(path),
                push: Some(("_elements".to_string(), PushSpec::Root)),
            },
            Shape::Synthetic(output),
        ))
    }

    /// `join(foreign, |outer| key, |inner| key, |outer, inner| result)` -
    /// `$lookup` + `$unwind` (inner join: non-matching rows are dropped)
    /// + `$project` of the result selector.
    ///
    /// Both key selectors must be simple field paths.
    pub fn translate_join<TForeign: MappedDocument>(
        &self,
        pipeline: &Pipeline,
        foreign_collection: &str,
        local_key: &Lambda,
        foreign_key: &Lambda,
        result: &Lambda2,
    ) -> TranslationResult<Pipeline> {
        let foreign_shape = Shape::Mapped(self.mapper.class_map::<TForeign>()?);

        let local_ctx = self.context(&local_key.parameter, pipeline.output().clone());
        let (local_path, _) = resolve_field(&local_ctx, &local_key.body)
            .map_err(|_| TranslationError::not_a_field_path(&local_key.body))?;

        let foreign_ctx = self.context(&foreign_key.parameter, foreign_shape.clone());
        let (foreign_path, _) = resolve_field(&foreign_ctx, &foreign_key.body)
            .map_err(|_| TranslationError::not_a_field_path(&foreign_key.body))?;

        let mut ctx = self.context(&result.parameter1, pipeline.output().clone());
        ctx.bind(
            result.parameter2.clone(),
            Binding::at(foreign_shape, "_inner"),
        );

        let Expr::NewDocument(fields) = &result.body else {
            return Err(TranslationError::unsupported(&result.body));
        };
        let mut projected = Vec::with_capacity(fields.len());
        let mut output = IndexMap::new();
        for (name, value) in fields {
            let (path, shape) = resolve_field(&ctx, value)
                .map_err(|_| TranslationError::not_a_field_path(value))?;
            projected.push((name.clone(), path));
            output.insert(name.clone(), (name.clone(), shape));
        }

        debug!(
            stage = "$lookup",
            from = %foreign_collection,
            local = %local_path,
            foreign = %foreign_path,
            "pipeline stage translated"
        );
        Ok(pipeline.with_stages(
            vec![
                Stage::Lookup {
                    from: foreign_collection.to_string(),
                    local_field: local_path,
                    foreign_field: foreign_path,
                    as_field: "_inner".to_string(),
                },
                Stage::Unwind {
                    path: "_inner".to_string(),
                },
                Stage::Project(Projection {
                    fields: projected,
                    exclude_id: true,
                }),
            ],
            Shape::Synthetic(output),
        ))
    }

    /// `select_many(|x| array_field)`: `$unwind` + rewrap each element
    /// under `_v`; the final materialization unwraps it.
    pub fn translate_select_many(
        &self,
        pipeline: &Pipeline,
        selector: &Lambda,
    ) -> TranslationResult<Pipeline> {
        let ctx = self.context(&selector.parameter, pipeline.output().clone());
        let (path, shape) = resolve_field(&ctx, &selector.body)
            .map_err(|_| TranslationError::not_a_field_path(&selector.body))?;
        let element = shape
            .element_shape()
            .cloned()
            .ok_or_else(|| TranslationError::unsupported(&selector.body))?;

        Ok(pipeline.with_stages(
            vec![
                Stage::Unwind { path: path.clone() },
                Stage::Project(Projection {
                    fields: vec![("_v".to_string(), path)],
                    exclude_id: true,
                }),
            ],
            Shape::wrapped(element),
        ))
    }

    /// `of_type::<Derived>()`: a `$match` on the derived type's
    /// discriminator; the shape narrows to the derived map.
    pub fn translate_of_type<TDerived: MappedDocument>(
        &self,
        pipeline: &Pipeline,
    ) -> TranslationResult<Pipeline> {
        let derived = self.mapper.class_map::<TDerived>()?;
        let Shape::Mapped(base) = pipeline.output() else {
            return Err(TranslationError::unsupported(format!(
                "of_type::<{}>() on a non-mapped result shape",
                derived.type_name()
            )));
        };
        if !derived.is_assignable_to(base.type_id()) {
            return Err(TranslationError::unsupported(format!(
                "of_type::<{}>() on a pipeline of '{}'",
                derived.type_name(),
                base.type_name()
            )));
        }

        // matching the leaf value also matches hierarchical arrays, since
        // an equality against an array field matches its elements
        let filter = FilterNode::Comparison {
            field: FieldRef::new(
                derived.discriminator_element(),
                Arc::new(StringSerializer),
            ),
            op: ComparisonOp::Eq,
            value: Value::String(derived.discriminator().to_string()),
        };
        Ok(pipeline.with_stage(Stage::Match(filter), Shape::Mapped(derived)))
    }

    fn context(&self, parameter: &str, shape: Shape) -> TranslationContext<'a> {
        TranslationContext::new(self.mapper, parameter, shape)
    }
}
