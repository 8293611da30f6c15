//! Query expression trees.
//!
//! [`Expr`] is a closed, tagged representation of the query surface: field
//! accesses rooted at named parameters, constants, comparisons, boolean
//! connectives, string predicate idioms, and collection idioms. The
//! translator dispatches on the variant; anything it has no handler for is
//! rejected with the expression's rendered form, so [`Expr`]'s `Display`
//! output appears verbatim in error messages.
//!
//! # Example
//!
//! ```rust
//! use manta_query::expr::Expr;
//!
//! let predicate = Expr::and(vec![
//!     Expr::field("status").eq("active"),
//!     Expr::field("age").gte(18),
//! ]);
//! assert_eq!(predicate.to_string(), r#"(doc.status == "active" && doc.age >= 18)"#);
//! ```

use std::fmt;

use manta_bson::Value;

/// The parameter name that the translation context binds to the document
/// being filtered.
pub const ROOT_PARAMETER: &str = "doc";

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
}

impl ComparisonOp {
    /// The server-side operator name.
    pub fn operator_name(&self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
        }
    }

    /// The operator that holds when the operands are swapped.
    pub fn reversed(&self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Gt => Self::Lt,
            Self::Gte => Self::Lte,
            Self::Lt => Self::Gt,
            Self::Lte => Self::Gte,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

/// String predicate idioms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPredicate {
    /// The string starts with a literal.
    StartsWith,
    /// The string ends with a literal.
    EndsWith,
    /// The string contains a literal.
    ContainsSubstring,
    /// The string is null or empty.
    IsNullOrEmpty,
    /// The string matches a regular expression.
    MatchesRegex,
}

/// A single-parameter lambda.
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    /// The parameter name bound inside the body.
    pub parameter: String,
    /// The lambda body.
    pub body: Expr,
}

impl Lambda {
    /// Create a lambda.
    pub fn new(parameter: impl Into<String>, body: Expr) -> Self {
        Self {
            parameter: parameter.into(),
            body,
        }
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "|{}| {}", self.parameter, self.body)
    }
}

/// A two-parameter lambda, used by join result selectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda2 {
    /// The first parameter name.
    pub parameter1: String,
    /// The second parameter name.
    pub parameter2: String,
    /// The lambda body.
    pub body: Expr,
}

impl Lambda2 {
    /// Create a two-parameter lambda.
    pub fn new(
        parameter1: impl Into<String>,
        parameter2: impl Into<String>,
        body: Expr,
    ) -> Self {
        Self {
            parameter1: parameter1.into(),
            parameter2: parameter2.into(),
            body,
        }
    }
}

impl fmt::Display for Lambda2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "|{}, {}| {}", self.parameter1, self.parameter2, self.body)
    }
}

/// A query expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A bound parameter reference.
    Parameter(String),
    /// A member access on a source expression.
    Field {
        /// The expression the member is accessed on.
        source: Box<Expr>,
        /// The member name.
        name: String,
    },
    /// A constant operand.
    Constant(Value),
    /// A binary comparison.
    Compare {
        /// The operator.
        op: ComparisonOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Conjunction.
    And(Vec<Expr>),
    /// Disjunction.
    Or(Vec<Expr>),
    /// Negation.
    Not(Box<Expr>),
    /// A string predicate idiom.
    StringOp {
        /// The predicate kind.
        kind: StringPredicate,
        /// The string-valued target.
        target: Box<Expr>,
        /// The literal operand (absent for `IsNullOrEmpty`).
        operand: Option<Box<Expr>>,
        /// Case-insensitive matching.
        case_insensitive: bool,
    },
    /// `source.any()` / `source.any(|x| predicate)`.
    Any {
        /// The collection-valued source.
        source: Box<Expr>,
        /// The element predicate, if any.
        predicate: Option<Box<Lambda>>,
    },
    /// `collection.contains(item)`.
    ContainsItem {
        /// The collection operand.
        collection: Box<Expr>,
        /// The item operand.
        item: Box<Expr>,
    },
    /// `source.filter(|x| predicate)`, composing with `any`.
    WhereElems {
        /// The collection-valued source.
        source: Box<Expr>,
        /// The element predicate.
        predicate: Box<Lambda>,
    },
    /// `source.len()`.
    CountOf {
        /// The collection-valued source.
        source: Box<Expr>,
    },
    /// A document constructor: `{name: expr, ...}` in projections.
    NewDocument(Vec<(String, Expr)>),
}

impl Expr {
    /// A field access on the root document.
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field {
            source: Box::new(Self::Parameter(ROOT_PARAMETER.to_string())),
            name: name.into(),
        }
    }

    /// A field access on a named parameter.
    pub fn param_field(parameter: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Field {
            source: Box::new(Self::Parameter(parameter.into())),
            name: name.into(),
        }
    }

    /// A constant.
    pub fn constant(value: impl Into<Value>) -> Self {
        Self::Constant(value.into())
    }

    /// A nested member access.
    pub fn member(self, name: impl Into<String>) -> Self {
        Self::Field {
            source: Box::new(self),
            name: name.into(),
        }
    }

    /// Conjunction of several expressions.
    pub fn and(exprs: Vec<Expr>) -> Self {
        Self::And(exprs)
    }

    /// Disjunction of several expressions.
    pub fn or(exprs: Vec<Expr>) -> Self {
        Self::Or(exprs)
    }

    /// Negation.
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    fn compare(self, op: ComparisonOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            op,
            lhs: Box::new(self),
            rhs: Box::new(Self::Constant(value.into())),
        }
    }

    /// `self == value`.
    pub fn eq(self, value: impl Into<Value>) -> Self {
        self.compare(ComparisonOp::Eq, value)
    }

    /// `self != value`.
    pub fn ne(self, value: impl Into<Value>) -> Self {
        self.compare(ComparisonOp::Ne, value)
    }

    /// `self > value`.
    pub fn gt(self, value: impl Into<Value>) -> Self {
        self.compare(ComparisonOp::Gt, value)
    }

    /// `self >= value`.
    pub fn gte(self, value: impl Into<Value>) -> Self {
        self.compare(ComparisonOp::Gte, value)
    }

    /// `self < value`.
    pub fn lt(self, value: impl Into<Value>) -> Self {
        self.compare(ComparisonOp::Lt, value)
    }

    /// `self <= value`.
    pub fn lte(self, value: impl Into<Value>) -> Self {
        self.compare(ComparisonOp::Lte, value)
    }

    fn string_op(self, kind: StringPredicate, operand: Option<Expr>) -> Self {
        Self::StringOp {
            kind,
            target: Box::new(self),
            operand: operand.map(Box::new),
            case_insensitive: false,
        }
    }

    /// `self.starts_with(literal)`.
    pub fn starts_with(self, literal: impl Into<String>) -> Self {
        self.string_op(
            StringPredicate::StartsWith,
            Some(Self::Constant(Value::String(literal.into()))),
        )
    }

    /// `self.ends_with(literal)`.
    pub fn ends_with(self, literal: impl Into<String>) -> Self {
        self.string_op(
            StringPredicate::EndsWith,
            Some(Self::Constant(Value::String(literal.into()))),
        )
    }

    /// `self.contains(literal)` on strings.
    pub fn contains_substring(self, literal: impl Into<String>) -> Self {
        self.string_op(
            StringPredicate::ContainsSubstring,
            Some(Self::Constant(Value::String(literal.into()))),
        )
    }

    /// `is_null_or_empty(self)`.
    pub fn is_null_or_empty(self) -> Self {
        self.string_op(StringPredicate::IsNullOrEmpty, None)
    }

    /// `self.matches_regex(pattern)`.
    pub fn matches_regex(self, pattern: impl Into<String>) -> Self {
        self.string_op(
            StringPredicate::MatchesRegex,
            Some(Self::Constant(Value::String(pattern.into()))),
        )
    }

    /// Make a string predicate case-insensitive.
    pub fn case_insensitive(self) -> Self {
        match self {
            Self::StringOp {
                kind,
                target,
                operand,
                ..
            } => Self::StringOp {
                kind,
                target,
                operand,
                case_insensitive: true,
            },
            other => other,
        }
    }

    /// `self.any()`.
    pub fn any(self) -> Self {
        Self::Any {
            source: Box::new(self),
            predicate: None,
        }
    }

    /// `self.any(|parameter| body)`.
    pub fn any_where(self, parameter: impl Into<String>, body: Expr) -> Self {
        Self::Any {
            source: Box::new(self),
            predicate: Some(Box::new(Lambda::new(parameter, body))),
        }
    }

    /// `self.contains(item)`.
    pub fn contains_item(self, item: Expr) -> Self {
        Self::ContainsItem {
            collection: Box::new(self),
            item: Box::new(item),
        }
    }

    /// `self.filter(|parameter| body)`.
    pub fn where_elems(self, parameter: impl Into<String>, body: Expr) -> Self {
        Self::WhereElems {
            source: Box::new(self),
            predicate: Box::new(Lambda::new(parameter, body)),
        }
    }

    /// `self.len()`.
    pub fn count(self) -> Self {
        Self::CountOf {
            source: Box::new(self),
        }
    }

    /// Rename every free occurrence of a parameter.
    pub fn rename_parameter(&self, from: &str, to: &str) -> Expr {
        match self {
            Self::Parameter(name) if name == from => Self::Parameter(to.to_string()),
            Self::Parameter(_) | Self::Constant(_) => self.clone(),
            Self::Field { source, name } => Self::Field {
                source: Box::new(source.rename_parameter(from, to)),
                name: name.clone(),
            },
            Self::Compare { op, lhs, rhs } => Self::Compare {
                op: *op,
                lhs: Box::new(lhs.rename_parameter(from, to)),
                rhs: Box::new(rhs.rename_parameter(from, to)),
            },
            Self::And(children) => Self::And(
                children
                    .iter()
                    .map(|c| c.rename_parameter(from, to))
                    .collect(),
            ),
            Self::Or(children) => Self::Or(
                children
                    .iter()
                    .map(|c| c.rename_parameter(from, to))
                    .collect(),
            ),
            Self::Not(inner) => Self::Not(Box::new(inner.rename_parameter(from, to))),
            Self::StringOp {
                kind,
                target,
                operand,
                case_insensitive,
            } => Self::StringOp {
                kind: *kind,
                target: Box::new(target.rename_parameter(from, to)),
                operand: operand
                    .as_ref()
                    .map(|o| Box::new(o.rename_parameter(from, to))),
                case_insensitive: *case_insensitive,
            },
            Self::Any { source, predicate } => Self::Any {
                source: Box::new(source.rename_parameter(from, to)),
                // the lambda's own parameter shadows the renamed one
                predicate: predicate.as_ref().map(|l| {
                    if l.parameter == from {
                        l.clone()
                    } else {
                        Box::new(Lambda::new(
                            l.parameter.clone(),
                            l.body.rename_parameter(from, to),
                        ))
                    }
                }),
            },
            Self::ContainsItem { collection, item } => Self::ContainsItem {
                collection: Box::new(collection.rename_parameter(from, to)),
                item: Box::new(item.rename_parameter(from, to)),
            },
            Self::WhereElems { source, predicate } => Self::WhereElems {
                source: Box::new(source.rename_parameter(from, to)),
                predicate: if predicate.parameter == from {
                    predicate.clone()
                } else {
                    Box::new(Lambda::new(
                        predicate.parameter.clone(),
                        predicate.body.rename_parameter(from, to),
                    ))
                },
            },
            Self::CountOf { source } => Self::CountOf {
                source: Box::new(source.rename_parameter(from, to)),
            },
            Self::NewDocument(fields) => Self::NewDocument(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.rename_parameter(from, to)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parameter(name) => f.write_str(name),
            Self::Field { source, name } => write!(f, "{source}.{name}"),
            Self::Constant(value) => write!(f, "{value}"),
            Self::Compare { op, lhs, rhs } => write!(f, "{lhs} {} {rhs}", op.symbol()),
            Self::And(children) => {
                f.write_str("(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" && ")?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
            Self::Or(children) => {
                f.write_str("(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" || ")?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
            Self::Not(inner) => write!(f, "!({inner})"),
            Self::StringOp {
                kind,
                target,
                operand,
                ..
            } => match kind {
                StringPredicate::StartsWith => {
                    write!(f, "{target}.starts_with({})", display_operand(operand))
                }
                StringPredicate::EndsWith => {
                    write!(f, "{target}.ends_with({})", display_operand(operand))
                }
                StringPredicate::ContainsSubstring => {
                    write!(f, "{target}.contains({})", display_operand(operand))
                }
                StringPredicate::IsNullOrEmpty => write!(f, "is_null_or_empty({target})"),
                StringPredicate::MatchesRegex => {
                    write!(f, "{target}.matches_regex({})", display_operand(operand))
                }
            },
            Self::Any { source, predicate } => match predicate {
                Some(lambda) => write!(f, "{source}.any({lambda})"),
                None => write!(f, "{source}.any()"),
            },
            Self::ContainsItem { collection, item } => {
                write!(f, "{collection}.contains({item})")
            }
            Self::WhereElems { source, predicate } => {
                write!(f, "{source}.filter({predicate})")
            }
            Self::CountOf { source } => write!(f, "{source}.len()"),
            Self::NewDocument(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

fn display_operand(operand: &Option<Box<Expr>>) -> String {
    operand
        .as_ref()
        .map(|o| o.to_string())
        .unwrap_or_default()
}
