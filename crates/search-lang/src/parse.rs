use crate::ast::{ArithOp, Cmp, Expr, Op, Pred, Term};
use crate::lexer::{Lexer, Spanned, Token};
use crate::plan::{Direction, OrderKey, Prefer, UniqueMode};
use crate::registry::{NumericDomain, Registry};
use crate::value::{ColorExpr, ParsedValue};
use crate::{Error, Result};

/// Queries longer than this are rejected before lexing.
pub const MAX_QUERY_BYTES: usize = 4096;

/// Query-level directives extracted during parsing. They shape ordering
/// and deduplication rather than the predicate itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Directives {
    pub order: Option<OrderKey>,
    pub direction: Option<Direction>,
    pub prefer: Option<Prefer>,
    pub unique: Option<UniqueMode>,
    pub limit: Option<u32>,
}

/// The parsed form of a query: an optional predicate AST (a query may
/// consist solely of directives) plus its directives.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub expr: Option<Expr>,
    pub directives: Directives,
}

/// Parse query text against the given registry.
pub fn parse(registry: &Registry, input: &str) -> Result<Query> {
    if input.len() > MAX_QUERY_BYTES {
        return Err(Error::syntax(
            MAX_QUERY_BYTES,
            format!("query exceeds {MAX_QUERY_BYTES} bytes"),
        ));
    }
    let tokens = Lexer::tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        registry,
        directives: Directives::default(),
    };
    let expr = parser.or_expr()?;
    if !matches!(parser.peek(), Token::Eof) {
        return Err(Error::syntax(
            parser.offset(),
            match parser.peek() {
                Token::RParen => "unbalanced ')'".to_string(),
                other => format!("unexpected {other:?}"),
            },
        ));
    }
    tracing::debug!(?expr, directives = ?parser.directives, "parsed query");
    Ok(Query {
        expr,
        directives: parser.directives,
    })
}

struct Parser<'q, 'r> {
    tokens: Vec<Spanned<'q>>,
    pos: usize,
    registry: &'r Registry,
    directives: Directives,
}

// Symbols of the arithmetic sub-grammar, produced by re-splitting words.
enum ASym {
    Term(Term),
    Op(ArithOp),
    LP,
    RP,
}

const EOF: Token<'static> = Token::Eof;

impl<'q, 'r> Parser<'q, 'r> {
    fn peek(&self) -> &Token<'q> {
        self.tokens.get(self.pos).map(|s| &s.token).unwrap_or(&EOF)
    }

    fn peek2(&self) -> &Token<'q> {
        self.tokens
            .get(self.pos + 1)
            .map(|s| &s.token)
            .unwrap_or(&EOF)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|s| s.offset)
            .unwrap_or_default()
    }

    fn advance(&mut self) {
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
    }

    // query := or_expr
    fn or_expr(&mut self) -> Result<Option<Expr>> {
        let mut sides = vec![self.and_expr()?];
        while matches!(self.peek(), Token::Or) {
            let offset = self.offset();
            self.advance();
            match self.and_expr()? {
                side @ Some(_) => sides.push(side),
                None => {
                    return Err(Error::syntax(
                        offset,
                        "expected an expression on both sides of 'or'",
                    ))
                }
            }
        }
        if sides.len() == 1 {
            return Ok(sides.pop().unwrap());
        }
        let mut exprs = Vec::with_capacity(sides.len());
        for side in sides {
            match side {
                Some(e) => exprs.push(e),
                None => {
                    return Err(Error::syntax(
                        self.offset(),
                        "expected an expression on both sides of 'or'",
                    ))
                }
            }
        }
        Ok(Some(Expr::Or(exprs)))
    }

    // and_expr := unary_expr ( (AND | ε) unary_expr )*
    fn and_expr(&mut self) -> Result<Option<Expr>> {
        let mut children = Vec::new();
        loop {
            match self.peek() {
                Token::Eof | Token::RParen | Token::Or => break,
                Token::And => {
                    let offset = self.offset();
                    self.advance();
                    if matches!(
                        self.peek(),
                        Token::Eof | Token::RParen | Token::Or | Token::And
                    ) {
                        return Err(Error::syntax(offset, "expected an expression after 'and'"));
                    }
                }
                _ => {
                    if let Some(expr) = self.unary()? {
                        children.push(expr);
                    }
                }
            }
        }
        Ok(match children.len() {
            0 => None,
            1 => children.pop(),
            _ => Some(Expr::And(children)),
        })
    }

    // unary_expr := ('-' | NOT) unary_expr | primary
    fn unary(&mut self) -> Result<Option<Expr>> {
        if matches!(self.peek(), Token::Not) {
            // `not:tag` is sugar for a negated `is:tag`.
            if matches!(self.peek2(), Token::Punct(Op::Colon)) {
                let offset = self.offset();
                self.advance();
                self.advance();
                let pred = self.finish_field_pred("is", Op::Colon, offset)?;
                return Ok(Some(Expr::Not(Box::new(pred))));
            }
            let offset = self.offset();
            self.advance();
            return match self.unary()? {
                Some(inner) => Ok(Some(Expr::Not(Box::new(inner)))),
                None => Err(Error::syntax(offset, "expected an expression after negation")),
            };
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Option<Expr>> {
        match self.peek().clone() {
            Token::LParen => {
                // A parenthesized arithmetic term is indistinguishable
                // from a group without looking for a comparison ahead.
                if self.relop_ahead() {
                    let start = self.pos;
                    match self.arith_pred() {
                        Ok(expr) => return Ok(Some(expr)),
                        Err(_) => self.pos = start,
                    }
                }
                let offset = self.offset();
                self.advance();
                let inner = self.or_expr()?;
                if !matches!(self.peek(), Token::RParen) {
                    return Err(Error::syntax(offset, "unbalanced '('"));
                }
                self.advance();
                Ok(inner)
            }
            Token::Quoted(text) => {
                let offset = self.offset();
                self.advance();
                self.bareword(&text, offset).map(Some)
            }
            Token::Word(_) | Token::Number(_) => self.word_primary(),
            Token::Punct(op) => Err(Error::syntax(
                self.offset(),
                format!("unexpected operator {:?}", op.as_str()),
            )),
            Token::RParen => Err(Error::syntax(self.offset(), "unbalanced ')'")),
            Token::Eof | Token::And | Token::Or | Token::Not => {
                Err(Error::syntax(self.offset(), "expected an expression"))
            }
        }
    }

    fn word_primary(&mut self) -> Result<Option<Expr>> {
        let offset = self.offset();
        let word = match self.peek() {
            Token::Word(w) | Token::Number(w) => *w,
            _ => return Err(Error::syntax(offset, "expected an expression")),
        };
        match self.peek2() {
            Token::Punct(Op::Colon) => {
                let lower = word.to_ascii_lowercase();
                if is_directive(&lower) {
                    self.directive(&lower, offset)?;
                    Ok(None)
                } else {
                    self.advance();
                    self.advance();
                    self.finish_field_pred(word, Op::Colon, offset).map(Some)
                }
            }
            Token::Punct(op) => {
                // `power=toughness` and `cmc+1<power` are arithmetic;
                // `color>=uw` is a field predicate. Try arithmetic first
                // and fall back to the field's own operator semantics.
                let op = *op;
                let start = self.pos;
                match self.arith_pred() {
                    Ok(expr) => Ok(Some(expr)),
                    Err(arith_err) => {
                        self.pos = start;
                        if self.registry.resolve(word).is_some() {
                            self.advance();
                            self.advance();
                            self.finish_field_pred(word, op, offset).map(Some)
                        } else {
                            Err(arith_err)
                        }
                    }
                }
            }
            _ => {
                // `cmc + 1 > power` splits across several words; only a
                // comparison ahead of the next connective makes this an
                // arithmetic context rather than barewords.
                if self.relop_ahead() {
                    let start = self.pos;
                    match self.arith_pred() {
                        Ok(expr) => return Ok(Some(expr)),
                        Err(_) => self.pos = start,
                    }
                }
                self.advance();
                self.bareword(word, offset).map(Some)
            }
        }
    }

    // Does a relational operator occur before the next connective, the
    // end of input, a closing paren of an enclosing group, or a ':'?
    fn relop_ahead(&self) -> bool {
        let mut depth = 0i32;
        for spanned in &self.tokens[self.pos..] {
            match &spanned.token {
                Token::Punct(op) if op.is_relational() => return true,
                Token::Punct(Op::Colon) => return false,
                Token::And | Token::Or | Token::Eof => return false,
                Token::LParen => depth += 1,
                Token::RParen => {
                    if depth == 0 {
                        return false;
                    }
                    depth -= 1;
                }
                _ => (),
            }
        }
        false
    }

    // The field word and operator are already consumed.
    fn finish_field_pred(&mut self, word: &str, op: Op, offset: usize) -> Result<Expr> {
        let (id, field) = match self.registry.resolve(word) {
            Some((id, field)) => (id, *field),
            None => {
                return Err(Error::UnknownField {
                    token: word.to_string(),
                    offset,
                })
            }
        };
        if !field.ops.contains(&op) {
            return Err(Error::OperatorNotAllowed {
                field: field.name.to_string(),
                op: op.as_str(),
            });
        }
        let raw = match self.peek().clone() {
            Token::Word(w) | Token::Number(w) => {
                self.advance();
                w.to_string()
            }
            Token::Quoted(s) => {
                self.advance();
                s
            }
            _ => {
                return Err(Error::syntax(
                    self.offset(),
                    format!("expected a value for field {:?}", field.name),
                ))
            }
        };
        let value = field.parser.parse(field.name, &raw)?;
        // Multicolored is a cardinality test, not a set, and cannot be
        // ordered against.
        if matches!(value, ParsedValue::Colors(ColorExpr::Multicolored))
            && matches!(op, Op::Lt | Op::Le | Op::Gt | Op::Ge)
        {
            return Err(Error::ValueParse {
                field: field.name.to_string(),
                value: raw,
                message: "multicolored combines only with ':', '=' or '!='".to_string(),
            });
        }
        // `!=` is always the negation of `=`.
        let pred = Pred {
            field: id,
            op: if op == Op::Ne { Op::Eq } else { op },
            value,
            offset,
        };
        if op == Op::Ne {
            Ok(Expr::Not(Box::new(Expr::Pred(pred))))
        } else {
            Ok(Expr::Pred(pred))
        }
    }

    // A bareword means "name contains".
    fn bareword(&mut self, text: &str, offset: usize) -> Result<Expr> {
        let (id, _) = self.registry.resolve("name").ok_or_else(|| Error::UnknownField {
            token: "name".to_string(),
            offset,
        })?;
        Ok(Expr::Pred(Pred {
            field: id,
            op: Op::Colon,
            value: ParsedValue::Text(text.to_lowercase()),
            offset,
        }))
    }

    fn directive(&mut self, name: &str, offset: usize) -> Result<()> {
        self.advance();
        self.advance();
        let raw = match self.peek().clone() {
            Token::Word(w) | Token::Number(w) => {
                self.advance();
                w.to_string()
            }
            Token::Quoted(s) => {
                self.advance();
                s
            }
            _ => {
                return Err(Error::syntax(
                    self.offset(),
                    format!("expected a value for directive {name:?}"),
                ))
            }
        };
        let bad_value = |message: &str| Error::ValueParse {
            field: name.to_string(),
            value: raw.clone(),
            message: message.to_string(),
        };
        let duplicate = || Error::syntax(offset, format!("duplicate directive {name:?}"));

        match name {
            "order" => {
                if self.directives.order.is_some() {
                    return Err(duplicate());
                }
                self.directives.order = Some(raw.parse().map_err(|_| bad_value("unknown sort key"))?);
            }
            "direction" | "dir" => {
                if self.directives.direction.is_some() {
                    return Err(duplicate());
                }
                self.directives.direction =
                    Some(raw.parse().map_err(|_| bad_value("expected asc or desc"))?);
            }
            "prefer" => {
                if self.directives.prefer.is_some() {
                    return Err(duplicate());
                }
                self.directives.prefer = Some(
                    raw.parse()
                        .map_err(|_| bad_value("expected default, newest or oldest"))?,
                );
            }
            "unique" => {
                if self.directives.unique.is_some() {
                    return Err(duplicate());
                }
                self.directives.unique = Some(
                    raw.parse()
                        .map_err(|_| bad_value("expected cards, art or prints"))?,
                );
            }
            "limit" => {
                if self.directives.limit.is_some() {
                    return Err(duplicate());
                }
                self.directives.limit =
                    Some(raw.parse().map_err(|_| bad_value("expected a row count"))?);
            }
            _ => unreachable!("is_directive gates the names"),
        }
        Ok(())
    }

    // arith_pred := arith_term relop arith_term
    fn arith_pred(&mut self) -> Result<Expr> {
        let offset = self.offset();
        let lhs = self.arith_side()?;
        let op = match self.peek() {
            Token::Punct(op) if op.is_relational() => *op,
            _ => {
                return Err(Error::syntax(
                    self.offset(),
                    "expected a comparison operator",
                ))
            }
        };
        self.advance();
        let rhs = self.arith_side()?;

        let mut fields = Vec::new();
        lhs.fields(&mut fields);
        rhs.fields(&mut fields);
        if fields.is_empty() {
            return Err(Error::syntax(
                offset,
                "comparison must reference at least one field",
            ));
        }

        // All referenced fields must accept the operator and share one
        // numeric domain; a decimal literal forces the decimal domain.
        let mut domain: Option<NumericDomain> = None;
        for id in &fields {
            let field = self.registry.field(*id);
            if !field.ops.contains(&op) {
                return Err(Error::OperatorNotAllowed {
                    field: field.name.to_string(),
                    op: op.as_str(),
                });
            }
            let d = field
                .domain
                .ok_or_else(|| Error::CompilerInvariant(format!(
                    "field {:?} resolved into an arithmetic term without a numeric domain",
                    field.name
                )))?;
            match domain {
                None => domain = Some(d),
                Some(prior) if prior == d => (),
                Some(_) => {
                    return Err(Error::ValueParse {
                        field: field.name.to_string(),
                        value: field.name.to_string(),
                        message: "cannot mix integer and decimal fields in one comparison"
                            .to_string(),
                    })
                }
            }
        }
        if domain == Some(NumericDomain::Integer) && (has_float(&lhs) || has_float(&rhs)) {
            return Err(Error::ValueParse {
                field: self.registry.field(fields[0]).name.to_string(),
                value: String::new(),
                message: "decimal literal compared against integer fields".to_string(),
            });
        }

        // A lone field against a lone literal is a plain field predicate.
        let simple = match (&lhs, &rhs) {
            (Term::Field(id), Term::Int(n)) => Some((*id, ParsedValue::Int(*n))),
            (Term::Field(id), Term::Float(f)) => Some((*id, ParsedValue::Float(*f))),
            _ => None,
        };
        if let Some((field, value)) = simple {
            let pred = Pred {
                field,
                op: if op == Op::Ne { Op::Eq } else { op },
                value,
                offset,
            };
            return Ok(if op == Op::Ne {
                Expr::Not(Box::new(Expr::Pred(pred)))
            } else {
                Expr::Pred(pred)
            });
        }
        Ok(Expr::Cmp(Cmp {
            lhs,
            op,
            rhs,
            offset,
        }))
    }

    fn arith_side(&mut self) -> Result<Term> {
        let offset = self.offset();
        let syms = self.collect_side()?;
        if syms.is_empty() {
            return Err(Error::syntax(offset, "expected a numeric expression"));
        }
        let mut ix = 0;
        let term = Self::sum(&syms, &mut ix, offset)?;
        if ix != syms.len() {
            return Err(Error::syntax(offset, "malformed numeric expression"));
        }
        Ok(term)
    }

    fn collect_side(&mut self) -> Result<Vec<ASym>> {
        let mut syms = Vec::new();
        let mut depth = 0i32;
        loop {
            let offset = self.offset();
            match self.peek().clone() {
                Token::Punct(op) if op.is_relational() => break,
                Token::And | Token::Or | Token::Eof => break,
                Token::LParen => {
                    depth += 1;
                    syms.push(ASym::LP);
                    self.advance();
                }
                Token::RParen => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    syms.push(ASym::RP);
                    self.advance();
                }
                Token::Number(text) => {
                    syms.push(ASym::Term(literal(text, offset)?));
                    self.advance();
                }
                Token::Word(word) => {
                    self.split_word(word, offset, &mut syms)?;
                    self.advance();
                }
                Token::Punct(_) | Token::Quoted(_) | Token::Not => {
                    return Err(Error::syntax(offset, "malformed numeric expression"));
                }
            }
        }
        if depth != 0 {
            return Err(Error::syntax(self.offset(), "unbalanced '('"));
        }
        Ok(syms)
    }

    // Re-split a word like `cmc+1` into arithmetic symbols.
    fn split_word(&self, word: &str, offset: usize, syms: &mut Vec<ASym>) -> Result<()> {
        let mut rest = word;
        while !rest.is_empty() {
            let c = rest.chars().next().unwrap();
            let op = match c {
                '+' => Some(ArithOp::Add),
                '-' => Some(ArithOp::Sub),
                '*' => Some(ArithOp::Mul),
                '/' => Some(ArithOp::Div),
                _ => None,
            };
            if let Some(op) = op {
                syms.push(ASym::Op(op));
                rest = &rest[1..];
                continue;
            }
            let end = rest
                .find(|ch| matches!(ch, '+' | '-' | '*' | '/'))
                .unwrap_or(rest.len());
            let atom = &rest[..end];
            rest = &rest[end..];

            if atom.starts_with(|ch: char| ch.is_ascii_digit() || ch == '.') {
                syms.push(ASym::Term(literal(atom, offset)?));
            } else {
                let (id, field) = self.registry.resolve(atom).ok_or_else(|| Error::UnknownField {
                    token: atom.to_string(),
                    offset,
                })?;
                if field.domain.is_none() {
                    return Err(Error::ValueParse {
                        field: field.name.to_string(),
                        value: word.to_string(),
                        message: "not a numeric field".to_string(),
                    });
                }
                syms.push(ASym::Term(Term::Field(id)));
            }
        }
        Ok(())
    }

    // arith_term := arith_term ('+'|'-') factor | factor
    fn sum(syms: &[ASym], ix: &mut usize, offset: usize) -> Result<Term> {
        let mut lhs = Self::product(syms, ix, offset)?;
        while let Some(ASym::Op(op @ (ArithOp::Add | ArithOp::Sub))) = syms.get(*ix) {
            let op = *op;
            *ix += 1;
            let rhs = Self::product(syms, ix, offset)?;
            lhs = Term::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    // factor := factor ('*'|'/') atom_num | atom_num
    fn product(syms: &[ASym], ix: &mut usize, offset: usize) -> Result<Term> {
        let mut lhs = Self::atom(syms, ix, offset)?;
        while let Some(ASym::Op(op @ (ArithOp::Mul | ArithOp::Div))) = syms.get(*ix) {
            let op = *op;
            *ix += 1;
            let rhs = Self::atom(syms, ix, offset)?;
            lhs = Term::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    // atom_num := number | field_ref | '(' arith_term ')'
    fn atom(syms: &[ASym], ix: &mut usize, offset: usize) -> Result<Term> {
        match syms.get(*ix) {
            Some(ASym::Term(t)) => {
                *ix += 1;
                Ok(t.clone())
            }
            Some(ASym::LP) => {
                *ix += 1;
                let term = Self::sum(syms, ix, offset)?;
                match syms.get(*ix) {
                    Some(ASym::RP) => {
                        *ix += 1;
                        Ok(term)
                    }
                    _ => Err(Error::syntax(offset, "unbalanced '(' in numeric expression")),
                }
            }
            _ => Err(Error::syntax(offset, "expected a number or numeric field")),
        }
    }
}

fn is_directive(lower: &str) -> bool {
    matches!(
        lower,
        "order" | "direction" | "dir" | "prefer" | "unique" | "limit"
    )
}

fn literal(text: &str, offset: usize) -> Result<Term> {
    if text.contains('.') {
        match text.parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(Term::Float(f)),
            _ => Err(Error::syntax(offset, format!("malformed number {text:?}"))),
        }
    } else {
        text.parse::<i64>()
            .map(Term::Int)
            .map_err(|_| Error::syntax(offset, format!("integer {text:?} is out of range")))
    }
}

fn has_float(term: &Term) -> bool {
    match term {
        Term::Float(_) => true,
        Term::Int(_) | Term::Field(_) => false,
        Term::Binary { lhs, rhs, .. } => has_float(lhs) || has_float(rhs),
    }
}
