// The card search language: a Scryfall-compatible query dialect that
// compiles to a parameterized SQL predicate plus ordering directives.
//
// Query text flows through Lexer -> Parser -> normalized AST -> Compiler,
// producing a Plan. The engine is stateless: one Engine may compile
// queries from many threads concurrently.

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("unterminated string starting at offset {offset}")]
    UnterminatedString { offset: usize },
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("unknown field {token:?} at offset {offset}")]
    UnknownField { token: String, offset: usize },
    #[error("operator {op} is not allowed for field {field:?}")]
    OperatorNotAllowed { field: String, op: &'static str },
    #[error("invalid value {value:?} for {field}: {message}")]
    ValueParse {
        field: String,
        value: String,
        message: String,
    },
    #[error("compiler invariant violated: {0}")]
    CompilerInvariant(String),
}

pub type Result<Ok> = std::result::Result<Ok, Error>;

impl Error {
    fn syntax(offset: usize, message: impl Into<String>) -> Error {
        Error::Syntax {
            offset,
            message: message.into(),
        }
    }
}

pub mod ast;
pub mod compile;
pub mod fields;
pub mod lexer;
pub mod parse;
pub mod plan;
pub mod registry;
pub mod value;

pub use ast::{Expr, Op};
pub use plan::{Direction, Plan, UniqueMode, Value};
pub use registry::Registry;

/// Engine compiles query text against an injected field registry.
pub struct Engine {
    registry: Registry,
}

impl Engine {
    pub fn new(registry: Registry) -> Engine {
        Engine { registry }
    }

    /// An Engine over the built-in card field table.
    pub fn cards() -> Engine {
        Engine::new(Registry::cards())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Parse query text into its AST and query-level directives.
    pub fn parse(&self, query: &str) -> Result<parse::Query> {
        parse::parse(&self.registry, query)
    }

    /// Parse and lower query text into an executable Plan.
    pub fn compile(&self, query: &str) -> Result<Plan> {
        let parsed = self.parse(query)?;
        compile::compile(&self.registry, &parsed)
    }
}
