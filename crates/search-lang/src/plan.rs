use serde::Serialize;
use std::collections::BTreeMap;

/// A named parameter value bound by the external SQL executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    StringArray(Vec<String>),
    /// Canonical color letters in WUBRG order.
    ColorSet(String),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }

    pub fn reversed(&self) -> Direction {
        match self {
            Direction::Asc => Direction::Desc,
            Direction::Desc => Direction::Asc,
        }
    }
}

/// How result rows are deduplicated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum UniqueMode {
    /// One row per oracle identity (the default).
    Cards,
    /// One row per illustration identity.
    Art,
    /// Every printing.
    Prints,
}

impl UniqueMode {
    /// The DISTINCT ON column, when this mode deduplicates.
    pub fn identity_column(&self) -> Option<&'static str> {
        match self {
            UniqueMode::Cards => Some("oracle_id"),
            UniqueMode::Art => Some("illustration_id"),
            UniqueMode::Prints => None,
        }
    }
}

/// Which printing is preferred when deduplicating.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Prefer {
    Default,
    Newest,
    Oldest,
}

/// A sortable key accepted by the `order:` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum OrderKey {
    Name,
    Cmc,
    Edhrec,
    #[strum(serialize = "price_usd", serialize = "usd")]
    PriceUsd,
    #[strum(serialize = "price_eur", serialize = "eur")]
    PriceEur,
    #[strum(serialize = "price_tix", serialize = "tix")]
    PriceTix,
    Released,
    Color,
    Rarity,
    Set,
    Prefer,
}

impl OrderKey {
    pub fn column(&self) -> &'static str {
        match self {
            OrderKey::Name => "card_name",
            OrderKey::Cmc => "cmc",
            OrderKey::Edhrec => "edhrec_rank",
            OrderKey::PriceUsd => "price_usd",
            OrderKey::PriceEur => "price_eur",
            OrderKey::PriceTix => "price_tix",
            OrderKey::Released => "released_at",
            OrderKey::Color => "color_sort_key",
            OrderKey::Rarity => "rarity_rank",
            OrderKey::Set => "set_code",
            OrderKey::Prefer => "prefer_score",
        }
    }
}

/// One ORDER BY term of a compiled plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderTerm {
    pub expr: String,
    pub dir: Direction,
    pub nulls_last: bool,
}

impl OrderTerm {
    pub fn new(expr: impl Into<String>, dir: Direction) -> OrderTerm {
        OrderTerm {
            expr: expr.into(),
            dir,
            nulls_last: false,
        }
    }
}

/// The compiled, executable form of a query: a parameterized SQL
/// predicate plus ordering, limit and deduplication directives.
/// A Plan is read-only once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub predicate_sql: String,
    pub parameters: BTreeMap<String, Value>,
    pub order_by: Vec<OrderTerm>,
    pub limit: u32,
    pub unique: UniqueMode,
}

/// The default and maximum row limits.
pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;
