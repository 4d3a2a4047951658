use crate::{Error, Result};

/// A parsed, normalized query value, produced by a field's value parser.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedValue {
    /// Raw text, lower-cased for pattern fields.
    Text(String),
    Int(i64),
    Float(f64),
    Colors(ColorExpr),
    Mana(ManaCost),
    Rarity(Rarity),
    Date(time::Date),
    /// A canonical entry of an enumerated vocabulary, or a title-cased
    /// type/keyword word.
    Word(String),
}

/// ColorSet is a set of the five colors, stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColorSet(u8);

// Canonical WUBRG presentation order.
const COLORS: [(char, u8); 5] = [
    ('W', 1 << 0),
    ('U', 1 << 1),
    ('B', 1 << 2),
    ('R', 1 << 3),
    ('G', 1 << 4),
];

impl ColorSet {
    pub fn empty() -> ColorSet {
        ColorSet(0)
    }

    pub fn from_letters(letters: &str) -> Option<ColorSet> {
        let mut mask = 0;
        for c in letters.chars() {
            let c = c.to_ascii_uppercase();
            let (_, bit) = COLORS.iter().find(|(l, _)| *l == c)?;
            mask |= bit;
        }
        Some(ColorSet(mask))
    }

    pub fn len(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Letters in canonical WUBRG order.
    pub fn canonical(&self) -> String {
        COLORS
            .iter()
            .filter(|(_, bit)| self.0 & bit != 0)
            .map(|(l, _)| *l)
            .collect()
    }
}

/// A color query value. `Exactly(empty)` is colorless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorExpr {
    Exactly(ColorSet),
    Multicolored,
}

// Named color combinations: guilds, shards, wedges, and common words.
const COLOR_NAMES: &[(&str, &str)] = &[
    ("white", "w"),
    ("blue", "u"),
    ("black", "b"),
    ("red", "r"),
    ("green", "g"),
    ("azorius", "wu"),
    ("dimir", "ub"),
    ("rakdos", "br"),
    ("gruul", "rg"),
    ("selesnya", "gw"),
    ("orzhov", "wb"),
    ("izzet", "ur"),
    ("golgari", "bg"),
    ("boros", "rw"),
    ("simic", "gu"),
    ("bant", "gwu"),
    ("esper", "wub"),
    ("grixis", "ubr"),
    ("jund", "brg"),
    ("naya", "rgw"),
    ("abzan", "wbg"),
    ("jeskai", "urw"),
    ("sultai", "bgu"),
    ("mardu", "rwb"),
    ("temur", "gur"),
];

pub fn parse_colors(field: &str, raw: &str) -> Result<ColorExpr> {
    let text = raw.to_ascii_lowercase();
    let err = |message: &str| Error::ValueParse {
        field: field.to_string(),
        value: raw.to_string(),
        message: message.to_string(),
    };

    match text.as_str() {
        "c" | "colorless" => return Ok(ColorExpr::Exactly(ColorSet::empty())),
        "m" | "multicolor" | "multicolored" => return Ok(ColorExpr::Multicolored),
        _ => (),
    }
    if let Some((_, letters)) = COLOR_NAMES.iter().find(|(name, _)| *name == text) {
        return Ok(ColorExpr::Exactly(ColorSet::from_letters(letters).unwrap()));
    }
    if let Some(rest) = text.strip_prefix("mono-").or_else(|| text.strip_prefix("mono")) {
        let set = match COLOR_NAMES.iter().find(|(name, _)| *name == rest) {
            Some((_, letters)) => ColorSet::from_letters(letters),
            None => ColorSet::from_letters(rest),
        };
        return match set {
            Some(set) if set.len() == 1 => Ok(ColorExpr::Exactly(set)),
            _ => Err(err("expected a single color after mono-")),
        };
    }
    ColorSet::from_letters(&text)
        .map(ColorExpr::Exactly)
        .ok_or_else(|| err("expected color letters (wubrgc) or a color name"))
}

/// ManaCost is a multiset of mana symbols in canonical `{X}` notation,
/// sorted for order-insensitive comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManaCost {
    pub symbols: Vec<String>,
}

pub fn parse_mana(field: &str, raw: &str) -> Result<ManaCost> {
    let err = |message: String| Error::ValueParse {
        field: field.to_string(),
        value: raw.to_string(),
        message,
    };

    let mut symbols = Vec::new();
    let mut rest = raw;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix('{') {
            let Some(end) = tail.find('}') else {
                return Err(err("unterminated mana symbol".to_string()));
            };
            let body = tail[..end].to_ascii_uppercase();
            if !is_mana_symbol(&body) {
                return Err(err(format!("unknown mana symbol {{{body}}}")));
            }
            symbols.push(format!("{{{body}}}"));
            rest = &tail[end + 1..];
        } else {
            // Bare shorthand: digit runs and single letters, e.g. 2uu.
            let c = rest.chars().next().unwrap();
            if c.is_ascii_digit() {
                let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
                symbols.push(format!("{{{digits}}}"));
                rest = &rest[digits.len()..];
            } else if "wubrgcxs".contains(c.to_ascii_lowercase()) {
                symbols.push(format!("{{{}}}", c.to_ascii_uppercase()));
                rest = &rest[c.len_utf8()..];
            } else {
                return Err(err(format!("unexpected character {c:?} in mana cost")));
            }
        }
    }
    if symbols.is_empty() {
        return Err(err("empty mana cost".to_string()));
    }
    symbols.sort();
    Ok(ManaCost { symbols })
}

fn is_mana_symbol(body: &str) -> bool {
    if body.bytes().all(|b| b.is_ascii_digit()) && !body.is_empty() {
        return true;
    }
    match body {
        "W" | "U" | "B" | "R" | "G" | "C" | "X" | "Y" | "Z" | "S" => true,
        // Hybrid and phyrexian forms: {W/U}, {2/W}, {U/P}, {G/U/P}.
        _ => {
            body.split('/').count() >= 2
                && body.split('/').all(|part| {
                    matches!(part, "W" | "U" | "B" | "R" | "G" | "C" | "P" | "2")
                })
        }
    }
}

/// Card rarity, ordered from common upward.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Rarity {
    #[strum(serialize = "common", serialize = "c")]
    Common,
    #[strum(serialize = "uncommon", serialize = "u")]
    Uncommon,
    #[strum(serialize = "rare", serialize = "r")]
    Rare,
    #[strum(serialize = "mythic", serialize = "m")]
    Mythic,
    #[strum(serialize = "special", serialize = "s")]
    Special,
    #[strum(serialize = "bonus", serialize = "b")]
    Bonus,
}

impl Rarity {
    pub fn rank(&self) -> i64 {
        *self as i64
    }
}

pub fn parse_rarity(field: &str, raw: &str) -> Result<Rarity> {
    raw.parse().map_err(|_| Error::ValueParse {
        field: field.to_string(),
        value: raw.to_string(),
        message: "expected common, uncommon, rare, mythic, special or bonus".to_string(),
    })
}

pub fn parse_int(field: &str, raw: &str) -> Result<i64> {
    raw.parse().map_err(|_| Error::ValueParse {
        field: field.to_string(),
        value: raw.to_string(),
        message: "expected an integer".to_string(),
    })
}

pub fn parse_decimal(field: &str, raw: &str) -> Result<f64> {
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(Error::ValueParse {
            field: field.to_string(),
            value: raw.to_string(),
            message: "expected a number".to_string(),
        }),
    }
}

/// Parse `YYYY-MM-DD`, or a bare year meaning January 1st of that year.
pub fn parse_date(field: &str, raw: &str) -> Result<time::Date> {
    let err = || Error::ValueParse {
        field: field.to_string(),
        value: raw.to_string(),
        message: "expected YYYY-MM-DD or a year".to_string(),
    };

    if raw.len() == 4 && raw.bytes().all(|b| b.is_ascii_digit()) {
        let year: i32 = raw.parse().map_err(|_| err())?;
        return time::Date::from_calendar_date(year, time::Month::January, 1)
            .map_err(|_| err());
    }
    let format = time::macros::format_description!("[year]-[month]-[day]");
    time::Date::parse(raw, &format).map_err(|_| err())
}

/// Case-insensitive lookup into an enumerated vocabulary, returning the
/// canonical entry.
pub fn parse_vocab(field: &str, vocab: &'static [&'static str], raw: &str) -> Result<String> {
    vocab
        .iter()
        .find(|entry| entry.eq_ignore_ascii_case(raw))
        .map(|entry| entry.to_string())
        .ok_or_else(|| Error::ValueParse {
            field: field.to_string(),
            value: raw.to_string(),
            message: format!("expected one of: {}", vocab.join(", ")),
        })
}

/// Title-case a type or keyword word: `creature` => `Creature`,
/// `first-strike` => `First-strike`.
pub fn title_case(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_color_letters_and_names() {
        assert_eq!(
            parse_colors("color", "rg").unwrap(),
            ColorExpr::Exactly(ColorSet::from_letters("rg").unwrap())
        );
        assert_eq!(
            parse_colors("color", "azorius").unwrap(),
            ColorExpr::Exactly(ColorSet::from_letters("wu").unwrap())
        );
        assert_eq!(
            parse_colors("color", "Grixis").unwrap(),
            ColorExpr::Exactly(ColorSet::from_letters("ubr").unwrap())
        );
        assert_eq!(
            parse_colors("color", "mono-red").unwrap(),
            ColorExpr::Exactly(ColorSet::from_letters("r").unwrap())
        );
        assert_eq!(
            parse_colors("color", "colorless").unwrap(),
            ColorExpr::Exactly(ColorSet::empty())
        );
        assert_eq!(
            parse_colors("color", "multicolored").unwrap(),
            ColorExpr::Multicolored
        );
        assert!(parse_colors("color", "purple").is_err());
        assert!(parse_colors("color", "mono-wu").is_err());
    }

    #[test]
    fn test_color_canonical_order() {
        let set = ColorSet::from_letters("guw").unwrap();
        assert_eq!(set.canonical(), "WUG");
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_mana_shorthand_and_braces() {
        let a = parse_mana("mana", "2uu").unwrap();
        let b = parse_mana("mana", "{U}{2}{U}").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.symbols, vec!["{2}", "{U}", "{U}"]);
    }

    #[test]
    fn test_mana_hybrid_and_phyrexian() {
        let cost = parse_mana("mana", "{W/U}{2/G}{B/P}{X}").unwrap();
        assert_eq!(cost.symbols, vec!["{2/G}", "{B/P}", "{W/U}", "{X}"]);
        assert!(parse_mana("mana", "{Q}").is_err());
        assert!(parse_mana("mana", "{2").is_err());
    }

    #[test]
    fn test_rarity_ordering_and_aliases() {
        assert!(Rarity::Common < Rarity::Uncommon);
        assert!(Rarity::Rare < Rarity::Mythic);
        assert_eq!(parse_rarity("rarity", "R").unwrap(), Rarity::Rare);
        assert_eq!(parse_rarity("rarity", "m").unwrap(), Rarity::Mythic);
        assert!(parse_rarity("rarity", "legendary").is_err());

        let ranks: Vec<i64> = Rarity::iter().map(|r| r.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_dates() {
        let d = parse_date("date", "2015-03-27").unwrap();
        assert_eq!((d.year(), d.month() as u8, d.day()), (2015, 3, 27));
        let y = parse_date("date", "2015").unwrap();
        assert_eq!((y.year(), y.month() as u8, y.day()), (2015, 1, 1));
        assert!(parse_date("date", "03/27/2015").is_err());
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("creature"), "Creature");
        assert_eq!(title_case("FLYING"), "Flying");
        assert_eq!(title_case(""), "");
    }
}
