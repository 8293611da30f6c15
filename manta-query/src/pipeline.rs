//! Aggregation pipelines: ordered stage ASTs plus the output shape.

use manta_bson::{Document, Value, doc};

use crate::filter::FilterNode;
use crate::shape::Shape;

/// Sort direction for one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending.
    Ascending,
    /// Descending.
    Descending,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
    /// The element path.
    pub path: String,
    /// The direction.
    pub direction: SortDirection,
}

impl SortField {
    /// Create a sort key.
    pub fn new(path: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            path: path.into(),
            direction,
        }
    }
}

/// A field projection: output element name → source element path.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// `(output element, source path)` pairs, in output order.
    pub fields: Vec<(String, String)>,
    /// Whether the identifier element is suppressed.
    pub exclude_id: bool,
}

/// The grouping key of a `Group` stage.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    /// Group by an element path.
    Path(String),
    /// Group by the whole document.
    Root,
}

/// What a `Group` stage accumulates per group.
#[derive(Debug, Clone, PartialEq)]
pub enum PushSpec {
    /// Push the whole document.
    Root,
    /// Push one element.
    Path(String),
}

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Filter documents.
    Match(FilterNode),
    /// Reshape documents.
    Project(Projection),
    /// Group documents, optionally accumulating elements.
    Group {
        /// The grouping key.
        key: GroupKey,
        /// Optional `(element name, accumulator)` pushed per group.
        push: Option<(String, PushSpec)>,
    },
    /// Sort documents.
    Sort(Vec<SortField>),
    /// Skip a number of documents.
    Skip(u64),
    /// Limit the number of documents.
    Limit(u64),
    /// Equality join against another collection.
    Lookup {
        /// The foreign collection.
        from: String,
        /// The local key path.
        local_field: String,
        /// The foreign key path.
        foreign_field: String,
        /// The element the joined array lands under.
        as_field: String,
    },
    /// Flatten an array field to one document per element. Documents whose
    /// array is empty or missing are dropped (inner-join semantics).
    Unwind {
        /// The array element path.
        path: String,
    },
    /// Promote an embedded document to the root.
    ReplaceRoot {
        /// The element path to promote.
        path: String,
    },
}

impl Stage {
    /// Render this stage as its server document.
    pub fn render(&self) -> Document {
        match self {
            Self::Match(filter) => doc! { "$match": filter.render() },
            Self::Project(projection) => {
                let mut body = Document::new();
                for (output, source) in &projection.fields {
                    body.insert(output.clone(), format!("${source}"));
                }
                if projection.exclude_id && !body.contains_key("_id") {
                    body.insert("_id", 0);
                }
                doc! { "$project": body }
            }
            Self::Group { key, push } => {
                let mut body = Document::new();
                body.insert(
                    "_id",
                    match key {
                        GroupKey::Path(path) => Value::String(format!("${path}")),
                        GroupKey::Root => Value::String("$$ROOT".to_string()),
                    },
                );
                if let Some((element, spec)) = push {
                    let pushed = match spec {
                        PushSpec::Root => Value::String("$$ROOT".to_string()),
                        PushSpec::Path(path) => Value::String(format!("${path}")),
                    };
                    body.insert(element.clone(), Value::Document(doc! { "$push": pushed }));
                }
                doc! { "$group": body }
            }
            Self::Sort(fields) => {
                let mut body = Document::new();
                for field in fields {
                    let direction = match field.direction {
                        SortDirection::Ascending => 1,
                        SortDirection::Descending => -1,
                    };
                    body.insert(field.path.clone(), direction);
                }
                doc! { "$sort": body }
            }
            Self::Skip(n) => doc! { "$skip": *n as i64 },
            Self::Limit(n) => doc! { "$limit": *n as i64 },
            Self::Lookup {
                from,
                local_field,
                foreign_field,
                as_field,
            } => doc! {
                "$lookup": doc! {
                    "from": from.clone(),
                    "localField": local_field.clone(),
                    "foreignField": foreign_field.clone(),
                    "as": as_field.clone(),
                }
            },
            Self::Unwind { path } => doc! { "$unwind": format!("${path}") },
            Self::ReplaceRoot { path } => doc! {
                "$replaceRoot": doc! { "newRoot": format!("${path}") }
            },
        }
    }
}

/// An ordered stage list plus the shape of the elements it emits.
///
/// Pipelines are append-only: every translator returns a new pipeline
/// extending its input, never mutating it. The output shape is the field
/// resolution context for the next operator.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
    output: Shape,
}

impl Pipeline {
    /// An empty pipeline over a source shape.
    pub fn new(output: Shape) -> Self {
        Self {
            stages: Vec::new(),
            output,
        }
    }

    /// The stages so far.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The shape of elements emitted by the last stage.
    pub fn output(&self) -> &Shape {
        &self.output
    }

    /// Extend with one stage, producing a new pipeline.
    pub fn with_stage(&self, stage: Stage, output: Shape) -> Self {
        let mut stages = self.stages.clone();
        stages.push(stage);
        Self { stages, output }
    }

    /// Extend with several stages, producing a new pipeline.
    pub fn with_stages(&self, new_stages: Vec<Stage>, output: Shape) -> Self {
        let mut stages = self.stages.clone();
        stages.extend(new_stages);
        Self { stages, output }
    }

    /// Replace the trailing stage (used to merge sort keys), producing a
    /// new pipeline.
    pub fn with_replaced_last(&self, stage: Stage, output: Shape) -> Self {
        let mut stages = self.stages.clone();
        stages.pop();
        stages.push(stage);
        Self { stages, output }
    }

    /// Render the pipeline as server stage documents.
    pub fn render(&self) -> Vec<Document> {
        self.stages.iter().map(Stage::render).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_sort_and_paging() {
        let sort = Stage::Sort(vec![
            SortField::new("age", SortDirection::Descending),
            SortField::new("name", SortDirection::Ascending),
        ]);
        assert_eq!(
            sort.render(),
            doc! { "$sort": doc! { "age": -1, "name": 1 } }
        );
        assert_eq!(Stage::Skip(5).render(), doc! { "$skip": 5i64 });
        assert_eq!(Stage::Limit(10).render(), doc! { "$limit": 10i64 });
    }

    #[test]
    fn test_render_project_excludes_id() {
        let stage = Stage::Project(Projection {
            fields: vec![("_v".to_string(), "name".to_string())],
            exclude_id: true,
        });
        assert_eq!(
            stage.render(),
            doc! { "$project": doc! { "_v": "$name", "_id": 0 } }
        );
    }

    #[test]
    fn test_render_group_with_push() {
        let stage = Stage::Group {
            key: GroupKey::Path("city".to_string()),
            push: Some(("_elements".to_string(), PushSpec::Root)),
        };
        assert_eq!(
            stage.render(),
            doc! { "$group": doc! {
                "_id": "$city",
                "_elements": doc! { "$push": "$$ROOT" },
            } }
        );
    }

    #[test]
    fn test_render_lookup_and_unwind() {
        let lookup = Stage::Lookup {
            from: "orders".to_string(),
            local_field: "_id".to_string(),
            foreign_field: "customer_id".to_string(),
            as_field: "_inner".to_string(),
        };
        assert_eq!(
            lookup.render(),
            doc! { "$lookup": doc! {
                "from": "orders",
                "localField": "_id",
                "foreignField": "customer_id",
                "as": "_inner",
            } }
        );
        assert_eq!(
            Stage::Unwind { path: "_inner".to_string() }.render(),
            doc! { "$unwind": "$_inner" }
        );
    }

    #[test]
    fn test_pipeline_extension_does_not_mutate_source() {
        let base = Pipeline::new(Shape::wrapped(Shape::Scalar(std::sync::Arc::new(
            manta_bson::serializer::StringSerializer,
        ))));
        let extended = base.with_stage(Stage::Skip(1), base.output().clone());
        assert_eq!(base.stages().len(), 0);
        assert_eq!(extended.stages().len(), 1);
    }
}
