use crate::ast::{self, Cmp, Expr, Op, Pred, Term};
use crate::parse::{Directives, Query};
use crate::plan::{
    Direction, OrderTerm, Plan, Prefer, UniqueMode, Value, DEFAULT_LIMIT, MAX_LIMIT,
};
use crate::registry::{ColonStrategy, Field, FieldKind, Registry};
use crate::value::{ColorExpr, ManaCost, ParsedValue};
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Lower a parsed query into an executable Plan.
///
/// The AST is first rewritten into negation normal form, so negation
/// reaches this pass only directly above leaves.
pub fn compile(registry: &Registry, query: &Query) -> Result<Plan> {
    let mut cx = Context {
        registry,
        parameters: BTreeMap::new(),
        next_param: 0,
    };
    let predicate_sql = match &query.expr {
        Some(expr) => cx.lower(&ast::normalize(expr.clone()))?,
        None => "TRUE".to_string(),
    };
    let (order_by, unique) = order_by(&query.directives)?;
    let limit = query
        .directives
        .limit
        .unwrap_or(DEFAULT_LIMIT)
        .min(MAX_LIMIT);

    tracing::debug!(%predicate_sql, params = cx.parameters.len(), "compiled query");
    Ok(Plan {
        predicate_sql,
        parameters: cx.parameters,
        order_by,
        limit,
        unique,
    })
}

struct Context<'r> {
    registry: &'r Registry,
    parameters: BTreeMap<String, Value>,
    next_param: usize,
}

impl<'r> Context<'r> {
    // Allocate the next `:pN` placeholder, in left-to-right lowering order.
    fn param(&mut self, value: Value) -> String {
        let name = format!("p{}", self.next_param);
        self.next_param += 1;
        self.parameters.insert(name.clone(), value);
        format!(":{name}")
    }

    fn lower(&mut self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::And(children) => self.lower_connective(children, " AND "),
            Expr::Or(children) => self.lower_connective(children, " OR "),
            Expr::Not(inner) => match inner.as_ref() {
                Expr::Pred(pred) => self.lower_pred(pred, true),
                Expr::Cmp(cmp) => self.lower_cmp(cmp, true),
                other => Err(Error::CompilerInvariant(format!(
                    "negation over a non-leaf after normalization: {other:?}"
                ))),
            },
            Expr::Pred(pred) => self.lower_pred(pred, false),
            Expr::Cmp(cmp) => self.lower_cmp(cmp, false),
        }
    }

    fn lower_connective(&mut self, children: &[Expr], joiner: &str) -> Result<String> {
        if children.len() < 2 {
            return Err(Error::CompilerInvariant(
                "connective with fewer than two children after normalization".to_string(),
            ));
        }
        let mut parts = Vec::with_capacity(children.len());
        for child in children {
            let sql = self.lower(child)?;
            // Mixed connectives need grouping; leaves do not.
            parts.push(match child {
                Expr::And(_) | Expr::Or(_) => format!("({sql})"),
                _ => sql,
            });
        }
        Ok(parts.join(joiner))
    }

    fn lower_pred(&mut self, pred: &Pred, negated: bool) -> Result<String> {
        let field = *self.registry.field(pred.field);
        let base = self.pred_sql(&field, pred)?;
        if !negated {
            return Ok(base);
        }
        // Each field declares whether NULL satisfies its negation.
        let col = field.column;
        Ok(if !field.nullable {
            format!("NOT ({base})")
        } else if field.null_negates {
            format!("({col} IS NULL OR NOT ({base}))")
        } else {
            format!("({col} IS NOT NULL AND NOT ({base}))")
        })
    }

    fn pred_sql(&mut self, field: &Field, pred: &Pred) -> Result<String> {
        let col = field.column;
        match (field.kind, &pred.value) {
            (FieldKind::Text, ParsedValue::Text(text)) => match (pred.op, field.colon) {
                (Op::Colon, ColonStrategy::Pattern) => {
                    let p = self.param(Value::String(like_pattern(text)));
                    Ok(format!("LOWER({col}) LIKE LOWER('%' || {p} || '%')"))
                }
                (Op::Colon | Op::Eq, ColonStrategy::Exact) => {
                    let p = self.param(Value::String(text.clone()));
                    Ok(format!("{col} = {p}"))
                }
                (Op::Eq, _) => {
                    let p = self.param(Value::String(text.clone()));
                    Ok(format!("LOWER({col}) = {p}"))
                }
                (op, _) => Err(Error::CompilerInvariant(format!(
                    "operator {} reached compilation for text field {:?}",
                    op.as_str(),
                    field.name
                ))),
            },
            (FieldKind::Text, ParsedValue::Word(word)) => {
                // Enumerated text fields (layout, border) match exactly.
                let p = self.param(Value::String(word.clone()));
                Ok(format!("{col} = {p}"))
            }
            (FieldKind::Numeric, value) => {
                let op = match pred.op {
                    Op::Colon => "=",
                    other => other.sql().ok_or_else(|| {
                        Error::CompilerInvariant(format!(
                            "operator {} reached compilation for numeric field {:?}",
                            other.as_str(),
                            field.name
                        ))
                    })?,
                };
                let p = self.param(numeric_value(field, value)?);
                Ok(format!("{col} {op} {p}"))
            }
            (FieldKind::Set, ParsedValue::Word(word)) => match pred.op {
                Op::Colon => {
                    let p = self.param(Value::String(word.clone()));
                    Ok(format!("{col} ? {p}"))
                }
                Op::Eq => {
                    let p = self.param(Value::StringArray(vec![word.clone()]));
                    Ok(format!("{col} = {p}"))
                }
                other => Err(Error::CompilerInvariant(format!(
                    "operator {} reached compilation for set field {:?}",
                    other.as_str(),
                    field.name
                ))),
            },
            (FieldKind::Set, ParsedValue::Colors(colors)) => self.color_sql(field, pred, *colors),
            (FieldKind::Set, ParsedValue::Mana(cost)) => self.mana_sql(field, pred, cost),
            (FieldKind::Map, ParsedValue::Word(key)) => {
                let status = field.map_value.ok_or_else(|| {
                    Error::CompilerInvariant(format!(
                        "map field {:?} has no status value",
                        field.name
                    ))
                })?;
                let key = self.param(Value::String(key.clone()));
                let status = self.param(Value::String(status.to_string()));
                Ok(format!("{col} ->> {key} = {status}"))
            }
            (FieldKind::Bool, ParsedValue::Word(tag)) => {
                let p = self.param(Value::String(tag.clone()));
                Ok(format!("{col} ? {p}"))
            }
            (kind, value) => Err(Error::CompilerInvariant(format!(
                "value {value:?} reached compilation for {kind:?} field {:?}",
                field.name
            ))),
        }
    }

    fn color_sql(&mut self, field: &Field, pred: &Pred, colors: ColorExpr) -> Result<String> {
        let col = field.column;
        let count = count_expr(field);

        let set = match colors {
            ColorExpr::Multicolored => {
                // `c:m` and `c=m` both mean two or more colors.
                return match pred.op {
                    Op::Colon | Op::Eq => Ok(format!("{count} >= 2")),
                    other => Err(Error::CompilerInvariant(format!(
                        "operator {} reached compilation for multicolored",
                        other.as_str()
                    ))),
                };
            }
            ColorExpr::Exactly(set) => set,
        };

        if set.is_empty() {
            // Colorless: subset and equality collapse to emptiness;
            // `>= {}` is vacuous and `> {}` means any color at all.
            return Ok(match pred.op {
                Op::Colon | Op::Eq | Op::Le => format!("{count} = 0"),
                Op::Lt => "FALSE".to_string(),
                Op::Ge => "TRUE".to_string(),
                Op::Gt => format!("{count} > 0"),
                Op::Ne => {
                    return Err(Error::CompilerInvariant(
                        "!= survived parse-time rewrite".to_string(),
                    ))
                }
            });
        }

        let n = set.len() as i64;
        let single = set.len() == 1;
        match pred.op {
            // The colon strategy for colors is Subset: the written value
            // must be a subset of the card's colors.
            Op::Colon | Op::Ge if single => {
                let p = self.param(Value::String(set.canonical()));
                Ok(format!("{col} ? {p}"))
            }
            Op::Colon | Op::Ge => {
                let p = self.param(Value::ColorSet(set.canonical()));
                Ok(format!("{col} @> {p}"))
            }
            Op::Eq => {
                let p = self.param(Value::ColorSet(set.canonical()));
                Ok(format!("{col} = {p}"))
            }
            Op::Gt => {
                let p = self.param(Value::ColorSet(set.canonical()));
                let limit = self.param(Value::Int(n));
                Ok(format!("({col} @> {p} AND {count} > {limit})"))
            }
            Op::Le => {
                let p = self.param(Value::ColorSet(set.canonical()));
                Ok(format!("{col} <@ {p}"))
            }
            Op::Lt => {
                let p = self.param(Value::ColorSet(set.canonical()));
                let limit = self.param(Value::Int(n));
                Ok(format!("({col} <@ {p} AND {count} < {limit})"))
            }
            Op::Ne => Err(Error::CompilerInvariant(
                "!= survived parse-time rewrite".to_string(),
            )),
        }
    }

    fn mana_sql(&mut self, field: &Field, pred: &Pred, cost: &ManaCost) -> Result<String> {
        let col = field.column;
        let count = count_expr(field);
        let n = cost.symbols.len() as i64;

        match pred.op {
            Op::Colon | Op::Ge if cost.symbols.len() == 1 => {
                let p = self.param(Value::String(cost.symbols[0].clone()));
                Ok(format!("{col} ? {p}"))
            }
            Op::Colon | Op::Ge => {
                let p = self.param(Value::StringArray(cost.symbols.clone()));
                Ok(format!("{col} @> {p}"))
            }
            Op::Eq => {
                let p = self.param(Value::StringArray(cost.symbols.clone()));
                Ok(format!("{col} = {p}"))
            }
            Op::Gt => {
                let p = self.param(Value::StringArray(cost.symbols.clone()));
                let limit = self.param(Value::Int(n));
                Ok(format!("({col} @> {p} AND {count} > {limit})"))
            }
            Op::Le => {
                let p = self.param(Value::StringArray(cost.symbols.clone()));
                Ok(format!("{col} <@ {p}"))
            }
            Op::Lt => {
                let p = self.param(Value::StringArray(cost.symbols.clone()));
                let limit = self.param(Value::Int(n));
                Ok(format!("({col} <@ {p} AND {count} < {limit})"))
            }
            Op::Ne => Err(Error::CompilerInvariant(
                "!= survived parse-time rewrite".to_string(),
            )),
        }
    }

    fn lower_cmp(&mut self, cmp: &Cmp, negated: bool) -> Result<String> {
        // NULL excludes the row from both the comparison and its
        // negation, so guards stay outside the negated operator.
        let mut fields = Vec::new();
        cmp.lhs.fields(&mut fields);
        cmp.rhs.fields(&mut fields);

        let mut clauses = Vec::new();
        let mut guarded = Vec::new();
        for id in fields {
            let field = self.registry.field(id);
            if field.nullable && !guarded.contains(&field.column) {
                guarded.push(field.column);
                clauses.push(format!("{} IS NOT NULL", field.column));
            }
        }

        let lhs = self.term_sql(&cmp.lhs)?;
        let rhs = self.term_sql(&cmp.rhs)?;
        let comparison = match (cmp.op, negated) {
            (Op::Ne, false) => format!("NOT ({lhs} = {rhs})"),
            (Op::Ne, true) => format!("{lhs} = {rhs}"),
            (op, negated) => {
                let sql = op.sql().ok_or_else(|| {
                    Error::CompilerInvariant(format!(
                        "operator {} reached arithmetic compilation",
                        op.as_str()
                    ))
                })?;
                if negated {
                    format!("NOT ({lhs} {sql} {rhs})")
                } else {
                    format!("{lhs} {sql} {rhs}")
                }
            }
        };
        clauses.push(comparison);
        Ok(clauses.join(" AND "))
    }

    fn term_sql(&mut self, term: &Term) -> Result<String> {
        Ok(match term {
            Term::Int(n) => self.param(Value::Int(*n)),
            Term::Float(f) => self.param(Value::Float(*f)),
            Term::Field(id) => self.registry.field(*id).column.to_string(),
            Term::Binary { op, lhs, rhs } => {
                let lhs = self.term_sql(lhs)?;
                let rhs = self.term_sql(rhs)?;
                format!("({lhs} {} {rhs})", op.sql())
            }
        })
    }
}

fn count_expr(field: &Field) -> String {
    match field.count_column {
        Some(count) => count.to_string(),
        None => format!("jsonb_array_length({})", field.column),
    }
}

fn numeric_value(field: &Field, value: &ParsedValue) -> Result<Value> {
    Ok(match value {
        ParsedValue::Int(n) => Value::Int(*n),
        ParsedValue::Float(f) => Value::Float(*f),
        ParsedValue::Rarity(r) => Value::Int(r.rank()),
        ParsedValue::Date(d) => Value::String(d.to_string()),
        other => {
            return Err(Error::CompilerInvariant(format!(
                "value {other:?} reached compilation for numeric field {:?}",
                field.name
            )))
        }
    })
}

// Map the query wildcard to the LIKE wildcard, escaping LIKE's own
// metacharacters first.
fn like_pattern(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
        .replace('*', "%")
}

/// Assemble ORDER BY terms per the fixed prefer/order/unique rule:
/// the dedup identity leads, then recency preference, then the
/// requested key, then the `edhrec` tiebreak.
fn order_by(directives: &Directives) -> Result<(Vec<OrderTerm>, UniqueMode)> {
    let unique = directives.unique.unwrap_or(UniqueMode::Cards);
    if directives.prefer.is_some() && unique == UniqueMode::Prints {
        return Err(Error::ValueParse {
            field: "prefer".to_string(),
            value: directives.prefer.unwrap().to_string(),
            message: "prefer has no effect when unique is prints".to_string(),
        });
    }

    let mut terms: Vec<OrderTerm> = Vec::new();
    let mut push = |terms: &mut Vec<OrderTerm>, term: OrderTerm| {
        if !terms.iter().any(|t| t.expr == term.expr) {
            terms.push(term);
        }
    };

    if let Some(identity) = unique.identity_column() {
        let released_dir = match directives.prefer.unwrap_or(Prefer::Default) {
            Prefer::Oldest => Direction::Asc,
            Prefer::Default | Prefer::Newest => Direction::Desc,
        };
        push(&mut terms, OrderTerm::new(identity, Direction::Asc));
        push(&mut terms, OrderTerm::new("prefer_score", Direction::Desc));
        push(&mut terms, OrderTerm::new("released_at", released_dir));
    }
    if let Some(key) = directives.order {
        let dir = directives.direction.unwrap_or(Direction::Asc);
        push(&mut terms, OrderTerm::new(key.column(), dir));
    }
    push(
        &mut terms,
        OrderTerm {
            expr: "edhrec_rank".to_string(),
            dir: Direction::Asc,
            nulls_last: true,
        },
    );
    Ok((terms, unique))
}
