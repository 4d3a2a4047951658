//! The built-in card field table. Everything the engine knows about a
//! field — aliases, storage, operator strategy, value parsing, null
//! policy — is declared here; no other module special-cases field names.

use crate::ast::Op;
use crate::registry::{ColonStrategy, Field, FieldKind, NumericDomain, ValueParser};

/// Tags understood by `is:` (and its negation `not:`).
pub const IS_TAGS: &[&str] = &[
    "commander",
    "dfc",
    "mdfc",
    "split",
    "flip",
    "transform",
    "meld",
    "leveler",
    "adventure",
    "spell",
    "permanent",
    "vanilla",
    "funny",
    "reprint",
    "reserved",
    "promo",
    "digital",
    "foil",
    "nonfoil",
    "etched",
    "fullart",
    "token",
    "booster",
];

pub const LAYOUTS: &[&str] = &[
    "normal",
    "split",
    "flip",
    "transform",
    "modal_dfc",
    "meld",
    "leveler",
    "class",
    "saga",
    "adventure",
    "battle",
    "planar",
    "scheme",
    "vanguard",
    "token",
    "emblem",
    "augment",
    "host",
    "mutate",
    "prototype",
];

pub const BORDERS: &[&str] = &["black", "white", "silver", "gold", "borderless"];

pub const FORMATS: &[&str] = &[
    "standard",
    "pioneer",
    "modern",
    "legacy",
    "vintage",
    "commander",
    "pauper",
    "brawl",
    "penny",
    "oathbreaker",
    "duel",
    "historic",
    "alchemy",
    "timeless",
    "future",
    "gladiator",
    "paupercommander",
    "predh",
    "oldschool",
    "premodern",
];

pub const GAMES: &[&str] = &["paper", "mtgo", "arena"];

const OPS_COLON: &[Op] = &[Op::Colon];
const OPS_TEXT: &[Op] = &[Op::Colon, Op::Eq, Op::Ne];
const OPS_ALL: &[Op] = &[Op::Colon, Op::Eq, Op::Ne, Op::Lt, Op::Le, Op::Gt, Op::Ge];

// A text field matched by case-insensitive substring.
const PATTERN: Field = Field {
    name: "",
    aliases: &[],
    column: "",
    count_column: None,
    map_value: None,
    kind: FieldKind::Text,
    colon: ColonStrategy::Pattern,
    ops: OPS_TEXT,
    parser: ValueParser::Text,
    domain: None,
    nullable: false,
    null_negates: false,
};

// A text field matched exactly.
const EXACT: Field = Field {
    colon: ColonStrategy::Exact,
    ..PATTERN
};

// An integer-domain numeric field.
const INTEGER: Field = Field {
    kind: FieldKind::Numeric,
    colon: ColonStrategy::Exact,
    ops: OPS_ALL,
    parser: ValueParser::Integer,
    domain: Some(NumericDomain::Integer),
    ..PATTERN
};

// A decimal-domain numeric field (prices).
const DECIMAL: Field = Field {
    parser: ValueParser::Decimal,
    domain: Some(NumericDomain::Decimal),
    nullable: true,
    ..INTEGER
};

// A set-valued field queried by membership.
const MEMBER: Field = Field {
    kind: FieldKind::Set,
    colon: ColonStrategy::Contains,
    ops: OPS_TEXT,
    parser: ValueParser::TitleCase,
    ..PATTERN
};

// A color-set field queried by subset/superset.
const COLORS: Field = Field {
    kind: FieldKind::Set,
    colon: ColonStrategy::Subset,
    ops: OPS_ALL,
    parser: ValueParser::Color,
    ..PATTERN
};

// A legality map field; `map_value` is the status the key must carry.
const LEGALITY: Field = Field {
    kind: FieldKind::Map,
    colon: ColonStrategy::Exact,
    ops: OPS_COLON,
    parser: ValueParser::Vocab(FORMATS),
    column: "legalities",
    map_value: Some("legal"),
    ..PATTERN
};

pub fn card_fields() -> Vec<Field> {
    vec![
        Field {
            name: "name",
            column: "card_name",
            ..PATTERN
        },
        Field {
            name: "oracle",
            aliases: &["o", "text"],
            column: "oracle_text",
            nullable: true,
            null_negates: true,
            ..PATTERN
        },
        Field {
            name: "flavor",
            aliases: &["ft"],
            column: "flavor_text",
            nullable: true,
            null_negates: true,
            ..PATTERN
        },
        Field {
            name: "artist",
            aliases: &["a"],
            column: "artist",
            ..PATTERN
        },
        Field {
            name: "type",
            aliases: &["t"],
            column: "types",
            ..MEMBER
        },
        Field {
            name: "keyword",
            aliases: &["kw", "k"],
            column: "keywords",
            ..MEMBER
        },
        Field {
            name: "color",
            aliases: &["c"],
            column: "colors",
            count_column: Some("color_count"),
            ..COLORS
        },
        Field {
            name: "identity",
            aliases: &["id", "ci", "commander"],
            column: "color_identity",
            count_column: Some("identity_count"),
            ..COLORS
        },
        Field {
            name: "produces",
            column: "produced_mana",
            count_column: Some("produced_count"),
            ..COLORS
        },
        Field {
            name: "mana",
            aliases: &["m"],
            column: "mana_cost",
            kind: FieldKind::Set,
            colon: ColonStrategy::Subset,
            ops: OPS_ALL,
            parser: ValueParser::Mana,
            nullable: true,
            null_negates: true,
            ..PATTERN
        },
        Field {
            name: "cmc",
            aliases: &["mv", "manavalue"],
            column: "cmc",
            ..INTEGER
        },
        Field {
            name: "power",
            aliases: &["pow"],
            column: "creature_power",
            nullable: true,
            ..INTEGER
        },
        Field {
            name: "toughness",
            aliases: &["tou"],
            column: "creature_toughness",
            nullable: true,
            ..INTEGER
        },
        Field {
            name: "loyalty",
            aliases: &["loy"],
            column: "loyalty",
            nullable: true,
            ..INTEGER
        },
        Field {
            name: "year",
            column: "release_year",
            ..INTEGER
        },
        Field {
            name: "edhrec",
            column: "edhrec_rank",
            nullable: true,
            ..INTEGER
        },
        Field {
            name: "usd",
            column: "price_usd",
            ..DECIMAL
        },
        Field {
            name: "eur",
            column: "price_eur",
            ..DECIMAL
        },
        Field {
            name: "tix",
            column: "price_tix",
            ..DECIMAL
        },
        Field {
            name: "rarity",
            aliases: &["r"],
            column: "rarity_rank",
            kind: FieldKind::Numeric,
            colon: ColonStrategy::Exact,
            ops: OPS_ALL,
            parser: ValueParser::Rarity,
            ..PATTERN
        },
        Field {
            name: "date",
            aliases: &["released"],
            column: "released_at",
            kind: FieldKind::Numeric,
            colon: ColonStrategy::Exact,
            ops: OPS_ALL,
            parser: ValueParser::Date,
            ..PATTERN
        },
        Field {
            name: "set",
            aliases: &["s", "e", "edition"],
            column: "set_code",
            parser: ValueParser::SetCode,
            ..EXACT
        },
        Field {
            name: "cn",
            aliases: &["number"],
            column: "collector_number",
            ..EXACT
        },
        Field {
            name: "layout",
            column: "layout",
            parser: ValueParser::Vocab(LAYOUTS),
            ..EXACT
        },
        Field {
            name: "border",
            column: "border_color",
            parser: ValueParser::Vocab(BORDERS),
            ..EXACT
        },
        Field {
            name: "game",
            column: "games",
            parser: ValueParser::Vocab(GAMES),
            ops: OPS_COLON,
            ..MEMBER
        },
        Field {
            name: "legal",
            aliases: &["f", "format"],
            ..LEGALITY
        },
        Field {
            name: "banned",
            map_value: Some("banned"),
            ..LEGALITY
        },
        Field {
            name: "restricted",
            map_value: Some("restricted"),
            ..LEGALITY
        },
        Field {
            name: "is",
            column: "is_tags",
            kind: FieldKind::Bool,
            ops: OPS_COLON,
            parser: ValueParser::Vocab(IS_TAGS),
            ..PATTERN
        },
    ]
}
