use crate::ast::Op;
use crate::value::{self, ParsedValue};
use crate::{Error, Result};
use std::collections::BTreeMap;

pub type FieldId = usize;

/// How a field's values are stored in the card schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Numeric,
    Set,
    Map,
    Bool,
}

/// What the `:` operator means for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColonStrategy {
    /// Identical to `=`.
    Exact,
    /// Case-insensitive substring match.
    Pattern,
    /// Membership test against a set-valued field.
    Contains,
    /// The provided value must be a subset of the field's value.
    Subset,
}

/// Numeric fields carrying a domain participate in arithmetic
/// comparisons; both sides of a comparison must share one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericDomain {
    Integer,
    Decimal,
}

/// Per-field value parser selection.
#[derive(Debug, Clone, Copy)]
pub enum ValueParser {
    /// Raw text, lower-cased.
    Text,
    Integer,
    Decimal,
    Color,
    Mana,
    Rarity,
    Date,
    /// An enumerated vocabulary with case-insensitive matching.
    Vocab(&'static [&'static str]),
    /// A type or keyword word, canonicalized to title case.
    TitleCase,
    /// A set code: short lowercase alphanumerics.
    SetCode,
}

impl ValueParser {
    pub fn parse(&self, field: &str, raw: &str) -> Result<ParsedValue> {
        match self {
            ValueParser::Text => Ok(ParsedValue::Text(raw.to_lowercase())),
            ValueParser::Integer => value::parse_int(field, raw).map(ParsedValue::Int),
            ValueParser::Decimal => value::parse_decimal(field, raw).map(ParsedValue::Float),
            ValueParser::Color => value::parse_colors(field, raw).map(ParsedValue::Colors),
            ValueParser::Mana => value::parse_mana(field, raw).map(ParsedValue::Mana),
            ValueParser::Rarity => value::parse_rarity(field, raw).map(ParsedValue::Rarity),
            ValueParser::Date => value::parse_date(field, raw).map(ParsedValue::Date),
            ValueParser::Vocab(vocab) => {
                value::parse_vocab(field, vocab, raw).map(ParsedValue::Word)
            }
            ValueParser::TitleCase => {
                if raw.is_empty() {
                    Err(Error::ValueParse {
                        field: field.to_string(),
                        value: raw.to_string(),
                        message: "expected a word".to_string(),
                    })
                } else {
                    Ok(ParsedValue::Word(value::title_case(raw)))
                }
            }
            ValueParser::SetCode => {
                let code = raw.to_ascii_lowercase();
                if (2..=6).contains(&code.len())
                    && code.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
                {
                    Ok(ParsedValue::Text(code))
                } else {
                    Err(Error::ValueParse {
                        field: field.to_string(),
                        value: raw.to_string(),
                        message: "expected a set code".to_string(),
                    })
                }
            }
        }
    }
}

/// One declarative entry of the field table.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub column: &'static str,
    /// Cardinality column used by set-valued relational comparisons.
    pub count_column: Option<&'static str>,
    /// For Map fields: the status value tested under the given key,
    /// e.g. `legal` for the `legal:` field over the legalities map.
    pub map_value: Option<&'static str>,
    pub kind: FieldKind,
    pub colon: ColonStrategy,
    pub ops: &'static [Op],
    pub parser: ValueParser,
    pub domain: Option<NumericDomain>,
    pub nullable: bool,
    /// Whether a NULL value satisfies the negation of a predicate over
    /// this field (a card with no rules text does not "contain" anything).
    pub null_negates: bool,
}

/// Registry resolves field names and aliases to their declarations.
/// It is injected into the engine; there is no global table.
pub struct Registry {
    fields: Vec<Field>,
    index: BTreeMap<String, FieldId>,
}

impl Registry {
    /// Build a registry, verifying that no name or alias is declared twice.
    pub fn new(fields: Vec<Field>) -> std::result::Result<Registry, String> {
        let mut index = BTreeMap::new();
        for (id, field) in fields.iter().enumerate() {
            for name in std::iter::once(&field.name).chain(field.aliases) {
                if let Some(prior) = index.insert(name.to_string(), id) {
                    return Err(format!(
                        "alias {name:?} of field {:?} is already claimed by field {:?}",
                        field.name, fields[prior].name,
                    ));
                }
            }
        }
        Ok(Registry { fields, index })
    }

    /// The built-in card field table.
    pub fn cards() -> Registry {
        Registry::new(crate::fields::card_fields()).expect("built-in card field table is consistent")
    }

    pub fn resolve(&self, token: &str) -> Option<(FieldId, &Field)> {
        let id = *self.index.get(&token.to_ascii_lowercase())?;
        Some((id, &self.fields[id]))
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id]
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}
