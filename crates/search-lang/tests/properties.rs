use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;
use search_lang::ast::{self, Cmp, Expr, Op, Term};
use search_lang::lexer::{Lexer, Token};
use search_lang::Engine;

// For every input, the lexer either yields a token stream terminated by
// Eof or a structured error whose offset lies within the input.
#[quickcheck]
fn lexer_is_total(input: String) -> bool {
    match Lexer::tokenize(&input) {
        Ok(tokens) => matches!(tokens.last().map(|s| &s.token), Some(Token::Eof)),
        Err(err) => match err {
            search_lang::Error::UnterminatedString { offset }
            | search_lang::Error::Syntax { offset, .. } => offset <= input.len(),
            other => panic!("unexpected lexer error {other:?}"),
        },
    }
}

// Parsing never panics, whatever the input.
#[quickcheck]
fn parser_is_total(input: String) -> bool {
    let mut input = input;
    let mut cut = input.len().min(2048);
    while !input.is_char_boundary(cut) {
        cut -= 1;
    }
    input.truncate(cut);
    let _ = Engine::cards().parse(&input);
    true
}

#[derive(Debug, Clone)]
struct GenExpr(Expr);

impl Arbitrary for GenExpr {
    fn arbitrary(g: &mut Gen) -> Self {
        GenExpr(gen_expr(g, 4))
    }
}

fn gen_expr(g: &mut Gen, depth: usize) -> Expr {
    let leaf = depth == 0 || bool::arbitrary(g);
    if leaf {
        let op = *g
            .choose(&[Op::Eq, Op::Ne, Op::Lt, Op::Le, Op::Gt, Op::Ge])
            .unwrap();
        return Expr::Cmp(Cmp {
            lhs: Term::Int(i64::arbitrary(g) % 16),
            op,
            rhs: Term::Int(i64::arbitrary(g) % 16),
            offset: 0,
        });
    }
    match *g.choose(&[0u8, 1, 2]).unwrap() {
        0 => Expr::Not(Box::new(gen_expr(g, depth - 1))),
        1 => Expr::And(vec![gen_expr(g, depth - 1), gen_expr(g, depth - 1)]),
        _ => Expr::Or(vec![
            gen_expr(g, depth - 1),
            gen_expr(g, depth - 1),
            gen_expr(g, depth - 1),
        ]),
    }
}

// Negation normalization is idempotent.
#[quickcheck]
fn normalization_is_idempotent(expr: GenExpr) -> bool {
    let once = ast::normalize(expr.0);
    let twice = ast::normalize(once.clone());
    once == twice
}

// After normalization, negation sits only directly above leaves.
#[quickcheck]
fn normalization_pushes_negation_to_leaves(expr: GenExpr) -> bool {
    fn check(expr: &Expr, under_not: bool) -> bool {
        match expr {
            Expr::Pred(_) | Expr::Cmp(_) => true,
            Expr::Not(inner) => !under_not && check(inner, true),
            Expr::And(children) | Expr::Or(children) => {
                !under_not && children.iter().all(|c| check(c, false))
            }
        }
    }
    check(&ast::normalize(expr.0), false)
}
