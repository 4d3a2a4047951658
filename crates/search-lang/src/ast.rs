use crate::registry::FieldId;
use crate::value::ParsedValue;

/// Op is a comparison operator as written in query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Colon,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Colon => ":",
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
        }
    }

    /// The SQL comparison operator, where a direct translation exists.
    pub fn sql(&self) -> Option<&'static str> {
        match self {
            Op::Eq => Some("="),
            Op::Lt => Some("<"),
            Op::Le => Some("<="),
            Op::Gt => Some(">"),
            Op::Ge => Some(">="),
            Op::Colon | Op::Ne => None,
        }
    }

    pub fn is_relational(&self) -> bool {
        !matches!(self, Op::Colon)
    }
}

/// A field predicate leaf: `field op value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Pred {
    pub field: FieldId,
    pub op: Op,
    pub value: ParsedValue,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    pub fn sql(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

/// One side of an arithmetic comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Int(i64),
    Float(f64),
    Field(FieldId),
    Binary {
        op: ArithOp,
        lhs: Box<Term>,
        rhs: Box<Term>,
    },
}

impl Term {
    /// All field references of this term, in left-to-right order.
    pub fn fields(&self, out: &mut Vec<FieldId>) {
        match self {
            Term::Int(_) | Term::Float(_) => (),
            Term::Field(id) => out.push(*id),
            Term::Binary { lhs, rhs, .. } => {
                lhs.fields(out);
                rhs.fields(out);
            }
        }
    }
}

/// An arithmetic comparison leaf, e.g. `power = toughness` or `cmc + 1 < power`.
/// At least one side references a field; all referenced fields are numeric.
#[derive(Debug, Clone, PartialEq)]
pub struct Cmp {
    pub lhs: Term,
    pub op: Op,
    pub rhs: Term,
    pub offset: usize,
}

/// Expr is the query AST. `And` and `Or` hold two or more children after
/// normalization; `Not` wraps exactly one leaf after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Pred(Pred),
    Cmp(Cmp),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

/// Rewrite `expr` into negation normal form: negation is pushed onto
/// leaves via de Morgan's laws, double negation is eliminated, and
/// nested connectives of the same kind are flattened. Applying this
/// twice is a no-op.
pub fn normalize(expr: Expr) -> Expr {
    push_not(expr, false)
}

#[derive(Clone, Copy, PartialEq)]
enum Kind {
    And,
    Or,
}

fn push_not(expr: Expr, negate: bool) -> Expr {
    match expr {
        Expr::Not(inner) => push_not(*inner, !negate),
        Expr::And(children) => {
            let kind = if negate { Kind::Or } else { Kind::And };
            build(kind, children, negate)
        }
        Expr::Or(children) => {
            let kind = if negate { Kind::And } else { Kind::Or };
            build(kind, children, negate)
        }
        leaf @ (Expr::Pred(_) | Expr::Cmp(_)) => {
            if negate {
                Expr::Not(Box::new(leaf))
            } else {
                leaf
            }
        }
    }
}

// Normalize each child under `negate`, splicing grandchildren whose
// connective matches the connective this node resolves to.
fn build(kind: Kind, children: Vec<Expr>, negate: bool) -> Expr {
    let mut out = Vec::with_capacity(children.len());
    for child in children {
        match (push_not(child, negate), kind) {
            (Expr::And(grand), Kind::And) => out.extend(grand),
            (Expr::Or(grand), Kind::Or) => out.extend(grand),
            (other, _) => out.push(other),
        }
    }
    if out.len() == 1 {
        out.pop().unwrap()
    } else {
        match kind {
            Kind::And => Expr::And(out),
            Kind::Or => Expr::Or(out),
        }
    }
}
