//! Immutable filter ASTs and their canonical rendering.

use std::fmt;
use std::sync::Arc;

use manta_bson::{Document, Value, ValueSerializer, doc};

use crate::expr::ComparisonOp;

/// A resolved field reference: the dotted element path plus the serializer
/// for values compared against the field.
///
/// Every comparison node carries one; translation cannot build a node
/// before the field's serializer is known, which is what guarantees that
/// constant operands are serialized against the field's declared wire
/// representation.
#[derive(Clone)]
pub struct FieldRef {
    path: String,
    serializer: Arc<dyn ValueSerializer>,
}

impl FieldRef {
    /// Create a field reference.
    pub fn new(path: impl Into<String>, serializer: Arc<dyn ValueSerializer>) -> Self {
        Self {
            path: path.into(),
            serializer,
        }
    }

    /// The dotted element path. Empty for the array element itself inside
    /// an `$elemMatch` predicate.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The serializer for operands compared against this field.
    pub fn serializer(&self) -> &Arc<dyn ValueSerializer> {
        &self.serializer
    }
}

impl fmt::Debug for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRef")
            .field("path", &self.path)
            .field("wire_type", &self.serializer.wire_type())
            .finish()
    }
}

// Structural equality: same path, same wire representation.
impl PartialEq for FieldRef {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.serializer.wire_type() == other.serializer.wire_type()
    }
}

/// An immutable filter tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    /// Matches every document.
    MatchesEverything,
    /// A comparison against a serialized constant.
    Comparison {
        /// The field.
        field: FieldRef,
        /// The operator.
        op: ComparisonOp,
        /// The serialized operand.
        value: Value,
    },
    /// Field value is one of the listed values.
    In {
        /// The field.
        field: FieldRef,
        /// The serialized candidates.
        values: Vec<Value>,
    },
    /// Regular-expression match.
    Regex {
        /// The field.
        field: FieldRef,
        /// The pattern.
        pattern: String,
        /// Regex options (e.g. `i`).
        options: String,
    },
    /// An array element matches a nested predicate.
    ElemMatch {
        /// The array field.
        field: FieldRef,
        /// The per-element predicate.
        predicate: Box<FilterNode>,
    },
    /// Array size equals a value.
    Size {
        /// The array field.
        field: FieldRef,
        /// The required length.
        size: i64,
    },
    /// Field presence check.
    Exists {
        /// The field.
        field: FieldRef,
        /// Whether the field must exist.
        exists: bool,
    },
    /// Conjunction.
    And(Vec<FilterNode>),
    /// Disjunction.
    Or(Vec<FilterNode>),
    /// Negation.
    Not(Box<FilterNode>),
}

impl FilterNode {
    /// Conjunction; flattens nested conjunctions and drops
    /// match-everything children.
    pub fn and(filters: impl IntoIterator<Item = FilterNode>) -> Self {
        let mut flattened = Vec::new();
        for filter in filters {
            match filter {
                Self::MatchesEverything => {}
                Self::And(children) => flattened.extend(children),
                other => flattened.push(other),
            }
        }
        match flattened.len() {
            0 => Self::MatchesEverything,
            1 => flattened.into_iter().next().expect("length checked"),
            _ => Self::And(flattened),
        }
    }

    /// Disjunction; flattens nested disjunctions.
    pub fn or(filters: impl IntoIterator<Item = FilterNode>) -> Self {
        let mut flattened = Vec::new();
        for filter in filters {
            match filter {
                Self::Or(children) => flattened.extend(children),
                other => flattened.push(other),
            }
        }
        match flattened.len() {
            1 => flattened.into_iter().next().expect("length checked"),
            _ => Self::Or(flattened),
        }
    }

    /// Negation.
    pub fn not(filter: FilterNode) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Check if this filter matches everything.
    pub fn matches_everything(&self) -> bool {
        matches!(self, Self::MatchesEverything)
    }

    /// Render the canonical server-side filter document.
    pub fn render(&self) -> Document {
        match self {
            Self::MatchesEverything => Document::new(),
            Self::Comparison { field, op, value } => {
                render_operator(field, op.operator_name(), value.clone())
            }
            Self::In { field, values } => render_operator(
                field,
                "$in",
                Value::Array(values.clone()),
            ),
            Self::Regex {
                field,
                pattern,
                options,
            } => {
                let mut condition = doc! { "$regex": pattern.clone() };
                if !options.is_empty() {
                    condition.insert("$options", options.clone());
                }
                wrap_field(field, Value::Document(condition))
            }
            Self::ElemMatch { field, predicate } => wrap_field(
                field,
                Value::Document(doc! { "$elemMatch": predicate.render() }),
            ),
            Self::Size { field, size } => render_operator(field, "$size", Value::Int64(*size)),
            Self::Exists { field, exists } => {
                render_operator(field, "$exists", Value::Boolean(*exists))
            }
            Self::And(children) => {
                let rendered: Vec<Value> = children
                    .iter()
                    .map(|c| Value::Document(c.render()))
                    .collect();
                doc! { "$and": rendered }
            }
            Self::Or(children) => {
                let rendered: Vec<Value> = children
                    .iter()
                    .map(|c| Value::Document(c.render()))
                    .collect();
                doc! { "$or": rendered }
            }
            Self::Not(inner) => doc! { "$nor": vec![Value::Document(inner.render())] },
        }
    }
}

// Equality renders as the bare `{field: value}` form; everything else nests
// under its operator.
fn render_operator(field: &FieldRef, operator: &str, value: Value) -> Document {
    if operator == "$eq" {
        return wrap_field(field, value);
    }
    let mut condition = Document::new();
    condition.insert(operator, value);
    wrap_field(field, Value::Document(condition))
}

// An empty path means "the array element itself" inside an $elemMatch.
fn wrap_field(field: &FieldRef, condition: Value) -> Document {
    let mut out = Document::new();
    if field.path().is_empty() {
        match condition {
            Value::Document(inner) => return inner,
            other => {
                out.insert("$eq", other);
                return out;
            }
        }
    }
    out.insert(field.path(), condition);
    out
}
