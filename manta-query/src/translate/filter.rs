//! Filter translation: expression predicates to filter ASTs.

use manta_bson::Value;

use crate::error::{TranslationError, TranslationResult};
use crate::expr::{ComparisonOp, Expr, Lambda, StringPredicate};
use crate::filter::{FieldRef, FilterNode};
use crate::shape::Shape;

use super::{Binding, TranslationContext, resolve_field};

/// Translate a predicate expression into a filter AST.
///
/// Every comparison serializes its constant operand through the resolved
/// field's serializer, so filters compare against the field's wire
/// representation rather than the literal's natural type. Expression
/// shapes without a handler fail with the rendered sub-expression.
pub fn translate_filter(
    ctx: &mut TranslationContext<'_>,
    expr: &Expr,
) -> TranslationResult<FilterNode> {
    match expr {
        Expr::And(children) => {
            let translated: TranslationResult<Vec<FilterNode>> =
                children.iter().map(|c| translate_filter(ctx, c)).collect();
            Ok(FilterNode::and(translated?))
        }
        Expr::Or(children) => {
            let translated: TranslationResult<Vec<FilterNode>> =
                children.iter().map(|c| translate_filter(ctx, c)).collect();
            Ok(FilterNode::or(translated?))
        }
        Expr::Not(inner) => Ok(FilterNode::not(translate_filter(ctx, inner)?)),
        Expr::Compare { op, lhs, rhs } => translate_comparison(ctx, expr, *op, lhs, rhs),
        Expr::StringOp {
            kind,
            target,
            operand,
            case_insensitive,
        } => translate_string_op(ctx, expr, *kind, target, operand.as_deref(), *case_insensitive),
        Expr::Any { source, predicate } => {
            translate_any(ctx, expr, source, predicate.as_deref())
        }
        Expr::ContainsItem { collection, item } => {
            translate_contains(ctx, expr, collection, item)
        }
        // a bare boolean field is an equality against true
        field @ Expr::Field { .. } => {
            let (path, shape) = resolve_field(ctx, field)?;
            let serializer = shape.serializer()?;
            let value = serializer.to_wire(&Value::Boolean(true))?;
            Ok(FilterNode::Comparison {
                field: FieldRef::new(path, serializer),
                op: ComparisonOp::Eq,
                value,
            })
        }
        other => Err(TranslationError::unsupported(other)),
    }
}

fn translate_comparison(
    ctx: &mut TranslationContext<'_>,
    whole: &Expr,
    op: ComparisonOp,
    lhs: &Expr,
    rhs: &Expr,
) -> TranslationResult<FilterNode> {
    // len() comparisons lower to $size, which the server only supports as
    // an exact match
    if let Expr::CountOf { source } = lhs {
        return translate_size(ctx, whole, op, source, rhs);
    }
    if let Expr::CountOf { source } = rhs {
        return translate_size(ctx, whole, op.reversed(), source, lhs);
    }

    let (field_expr, constant, op) = match (lhs, rhs) {
        (field, Expr::Constant(value)) => (field, value, op),
        (Expr::Constant(value), field) => (field, value, op.reversed()),
        _ => return Err(TranslationError::unsupported(whole)),
    };

    let (path, shape) = resolve_field(ctx, field_expr)?;
    let serializer = shape.serializer()?;
    let value = if constant.is_null() {
        Value::Null
    } else {
        serializer.to_wire(constant)?
    };
    Ok(FilterNode::Comparison {
        field: FieldRef::new(path, serializer),
        op,
        value,
    })
}

fn translate_size(
    ctx: &mut TranslationContext<'_>,
    whole: &Expr,
    op: ComparisonOp,
    source: &Expr,
    count: &Expr,
) -> TranslationResult<FilterNode> {
    if op != ComparisonOp::Eq {
        return Err(TranslationError::unsupported(whole));
    }
    let Expr::Constant(count) = count else {
        return Err(TranslationError::unsupported(whole));
    };
    let (path, shape) = resolve_field(ctx, source)?;
    if shape.element_shape().is_none() {
        return Err(TranslationError::unsupported(whole));
    }
    Ok(FilterNode::Size {
        field: shape.field_ref(path)?,
        size: count.as_i64()?,
    })
}

fn translate_string_op(
    ctx: &mut TranslationContext<'_>,
    whole: &Expr,
    kind: StringPredicate,
    target: &Expr,
    operand: Option<&Expr>,
    case_insensitive: bool,
) -> TranslationResult<FilterNode> {
    let (path, shape) = resolve_field(ctx, target)?;
    let field = shape.field_ref(path)?;
    let options = if case_insensitive {
        "i".to_string()
    } else {
        String::new()
    };

    let literal = |operand: Option<&Expr>| -> TranslationResult<String> {
        match operand {
            Some(Expr::Constant(Value::String(s))) => Ok(s.clone()),
            _ => Err(TranslationError::unsupported(whole)),
        }
    };

    match kind {
        StringPredicate::StartsWith => Ok(FilterNode::Regex {
            field,
            pattern: format!("^{}", escape_regex_literal(&literal(operand)?)),
            options,
        }),
        StringPredicate::EndsWith => Ok(FilterNode::Regex {
            field,
            pattern: format!("{}$", escape_regex_literal(&literal(operand)?)),
            options,
        }),
        StringPredicate::ContainsSubstring => Ok(FilterNode::Regex {
            field,
            pattern: escape_regex_literal(&literal(operand)?),
            options,
        }),
        StringPredicate::MatchesRegex => Ok(FilterNode::Regex {
            field,
            pattern: literal(operand)?,
            options,
        }),
        StringPredicate::IsNullOrEmpty => Ok(FilterNode::or([
            FilterNode::Comparison {
                field: field.clone(),
                op: ComparisonOp::Eq,
                value: Value::Null,
            },
            FilterNode::Comparison {
                field,
                op: ComparisonOp::Eq,
                value: Value::String(String::new()),
            },
        ])),
    }
}

// The same semantic query arrives in several surface forms; everything is
// normalized here before a filter node is built:
//   s.filter(p1).any(p2)        =>  s.any(|x| p1(x) && p2(x))
//   xs.any(|x| consts.contains(x)) =>  {xs: {$in: consts}}
//   xs.any(|x| x == v)          =>  {xs: v}
fn translate_any(
    ctx: &mut TranslationContext<'_>,
    whole: &Expr,
    source: &Expr,
    predicate: Option<&Lambda>,
) -> TranslationResult<FilterNode> {
    let mut source = source.clone();
    let mut predicate = predicate.cloned();

    // fuse chained element filters into a single conjoined predicate,
    // preserving left-to-right evaluation order
    while let Expr::WhereElems {
        source: inner,
        predicate: where_predicate,
    } = source
    {
        predicate = Some(match predicate {
            None => (*where_predicate).clone(),
            Some(any_predicate) => {
                let rebound = any_predicate
                    .body
                    .rename_parameter(&any_predicate.parameter, &where_predicate.parameter);
                Lambda::new(
                    where_predicate.parameter.clone(),
                    Expr::And(vec![where_predicate.body.clone(), rebound]),
                )
            }
        });
        source = *inner;
    }

    let (path, shape) = resolve_field(ctx, &source)?;
    let element = shape
        .element_shape()
        .cloned()
        .ok_or_else(|| TranslationError::unsupported(whole))?;

    let Some(predicate) = predicate else {
        // a bare any(): the array exists and is not empty
        return Ok(FilterNode::and([
            FilterNode::Exists {
                field: shape.field_ref(path.clone())?,
                exists: true,
            },
            FilterNode::Comparison {
                field: shape.field_ref(path)?,
                op: ComparisonOp::Ne,
                value: Value::Array(Vec::new()),
            },
        ]));
    };

    // xs.any(|x| consts.contains(x)) is an $in on the array field
    if let Expr::ContainsItem { collection, item } = &predicate.body {
        if let (Expr::Constant(Value::Array(items)), Expr::Parameter(name)) =
            (collection.as_ref(), item.as_ref())
        {
            if *name == predicate.parameter {
                let serializer = element.serializer()?;
                let values = serialize_candidates(items, &element)?;
                return Ok(FilterNode::In {
                    field: FieldRef::new(path, serializer),
                    values,
                });
            }
        }
    }

    ctx.bind(predicate.parameter.clone(), Binding::root(element.clone()));
    let inner = translate_filter(ctx, &predicate.body);
    ctx.unbind();
    let inner = inner?;

    // xs.any(|x| x == v) is an equality against the array field
    if let FilterNode::Comparison {
        field,
        op: ComparisonOp::Eq,
        value,
    } = &inner
    {
        if field.path().is_empty() {
            return Ok(FilterNode::Comparison {
                field: FieldRef::new(path, element.serializer()?),
                op: ComparisonOp::Eq,
                value: value.clone(),
            });
        }
    }

    Ok(FilterNode::ElemMatch {
        field: shape.field_ref(path)?,
        predicate: Box::new(inner),
    })
}

fn translate_contains(
    ctx: &mut TranslationContext<'_>,
    whole: &Expr,
    collection: &Expr,
    item: &Expr,
) -> TranslationResult<FilterNode> {
    match (collection, item) {
        // constant-list.contains(field): the field's value is in the list
        (Expr::Constant(Value::Array(items)), field_expr) => {
            let (path, shape) = resolve_field(ctx, field_expr)?;
            let serializer = shape.serializer()?;
            let values = serialize_candidates(items, &shape)?;
            Ok(FilterNode::In {
                field: FieldRef::new(path, serializer),
                values,
            })
        }
        // array-field.contains(list): any of the listed values appears
        (field_expr, Expr::Constant(Value::Array(items))) => {
            let (path, shape) = resolve_field(ctx, field_expr)?;
            let element = shape
                .element_shape()
                .cloned()
                .ok_or_else(|| TranslationError::unsupported(whole))?;
            let values = serialize_candidates(items, &element)?;
            Ok(FilterNode::In {
                field: FieldRef::new(path, element.serializer()?),
                values,
            })
        }
        // array-field.contains(value): equality against the element
        (field_expr, Expr::Constant(value)) => {
            let (path, shape) = resolve_field(ctx, field_expr)?;
            let element = shape
                .element_shape()
                .cloned()
                .ok_or_else(|| TranslationError::unsupported(whole))?;
            let serializer = element.serializer()?;
            let value = serializer.to_wire(value)?;
            Ok(FilterNode::Comparison {
                field: FieldRef::new(path, serializer),
                op: ComparisonOp::Eq,
                value,
            })
        }
        _ => Err(TranslationError::unsupported(whole)),
    }
}

fn serialize_candidates(items: &[Value], shape: &Shape) -> TranslationResult<Vec<Value>> {
    let serializer = shape.serializer()?;
    items
        .iter()
        .map(|item| {
            if item.is_null() {
                Ok(Value::Null)
            } else {
                serializer.to_wire(item).map_err(TranslationError::from)
            }
        })
        .collect()
}

/// Escape a literal so the server's regex engine matches it verbatim.
fn escape_regex_literal(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for ch in literal.chars() {
        if matches!(
            ch,
            '\\' | '^' | '$' | '.' | '|' | '?' | '*' | '+' | '(' | ')' | '[' | ']' | '{' | '}'
        ) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
