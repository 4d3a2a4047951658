use crate::ast::Op;
use crate::{Error, Result};

/// Token is one lexical atom of query text.
///
/// The arithmetic symbols `+ - * /` are not tokens of their own: adjacent
/// to other word characters they are folded into the surrounding `Word`
/// (`cmc+1`, `mono-red`, `1/2`), and the arithmetic sub-grammar re-splits
/// words when it is parsing an arithmetic context.
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'q> {
    Word(&'q str),
    /// A quoted string, with escapes already processed.
    Quoted(String),
    /// A numeric literal. The raw text is kept so the parser can decide
    /// between integer and decimal domains.
    Number(&'q str),
    Punct(Op),
    LParen,
    RParen,
    And,
    Or,
    Not,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<'q> {
    pub token: Token<'q>,
    pub offset: usize,
}

/// Lexer scans query text in a single pass, without backtracking.
pub struct Lexer<'q> {
    input: &'q str,
    pos: usize,
    // Set after a comparison operator, where a leading '-' introduces a
    // negative number rather than negation.
    in_value: bool,
    done: bool,
}

// Characters which always terminate a word.
fn is_reserved(c: char) -> bool {
    matches!(c, ':' | '=' | '!' | '<' | '>' | '(' | ')' | '\'' | '"')
}

fn is_word(c: char) -> bool {
    !c.is_whitespace() && !is_reserved(c)
}

fn is_number(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() {
        return false;
    }
    let (int, frac) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    all_digits(int) && frac.map(all_digits).unwrap_or(true)
}

impl<'q> Lexer<'q> {
    pub fn new(input: &'q str) -> Lexer<'q> {
        Lexer {
            input,
            pos: 0,
            in_value: false,
            done: false,
        }
    }

    /// Scan the entire input, returning tokens terminated by `Eof`.
    pub fn tokenize(input: &'q str) -> Result<Vec<Spanned<'q>>> {
        Lexer::new(input).collect()
    }

    fn rest(&self) -> &'q str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    pub fn next_token(&mut self) -> Result<Spanned<'q>> {
        while self.peek().map(char::is_whitespace).unwrap_or(false) {
            self.bump();
        }
        let offset = self.pos;
        let at = |token| Ok(Spanned { token, offset });

        let Some(c) = self.peek() else {
            self.done = true;
            return at(Token::Eof);
        };

        match c {
            '(' => {
                self.bump();
                self.in_value = false;
                at(Token::LParen)
            }
            ')' => {
                self.bump();
                self.in_value = false;
                at(Token::RParen)
            }
            '\'' | '"' => {
                self.in_value = false;
                let s = self.scan_string()?;
                at(Token::Quoted(s))
            }
            ':' => {
                self.bump();
                self.in_value = true;
                at(Token::Punct(Op::Colon))
            }
            '=' => {
                self.bump();
                self.in_value = true;
                at(Token::Punct(Op::Eq))
            }
            '!' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    self.in_value = true;
                    at(Token::Punct(Op::Ne))
                } else {
                    Err(Error::syntax(offset, "expected '=' after '!'"))
                }
            }
            '<' => {
                self.bump();
                self.in_value = true;
                if self.peek() == Some('=') {
                    self.bump();
                    at(Token::Punct(Op::Le))
                } else {
                    at(Token::Punct(Op::Lt))
                }
            }
            '>' => {
                self.bump();
                self.in_value = true;
                if self.peek() == Some('=') {
                    self.bump();
                    at(Token::Punct(Op::Ge))
                } else {
                    at(Token::Punct(Op::Gt))
                }
            }
            '-' if !self.in_value => {
                // A leading '-' negates the atom that follows it, unless
                // nothing follows.
                self.bump();
                match self.peek() {
                    Some(c) if !c.is_whitespace() => at(Token::Not),
                    _ => at(Token::Word(&self.input[offset..self.pos])),
                }
            }
            _ => {
                // Reserved words keep their plain meaning in value
                // position: `o:not` searches for the word "not".
                let in_value = std::mem::take(&mut self.in_value);
                while self.peek().map(is_word).unwrap_or(false) {
                    self.bump();
                }
                let word = &self.input[offset..self.pos];
                match () {
                    _ if is_number(word) => at(Token::Number(word)),
                    _ if in_value => at(Token::Word(word)),
                    _ if word.eq_ignore_ascii_case("and") => at(Token::And),
                    _ if word.eq_ignore_ascii_case("or") => at(Token::Or),
                    _ if word.eq_ignore_ascii_case("not") => at(Token::Not),
                    _ => at(Token::Word(word)),
                }
            }
        }
    }

    fn scan_string(&mut self) -> Result<String> {
        let offset = self.pos;
        let quote = self.bump().unwrap();
        let mut out = String::new();

        loop {
            match self.bump() {
                None => return Err(Error::UnterminatedString { offset }),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    None => return Err(Error::UnterminatedString { offset }),
                    Some(e @ ('\\' | '\'' | '"')) => out.push(e),
                    // Unknown escapes are kept verbatim.
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                },
                Some(c) => out.push(c),
            }
        }
    }
}

impl<'q> Iterator for Lexer<'q> {
    type Item = Result<Spanned<'q>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_token() {
            Ok(spanned) => Some(Ok(spanned)),
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        Lexer::tokenize(input)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_words_and_punct() {
        assert_eq!(
            tokens("t:creature cmc>=3"),
            vec![
                Token::Word("t"),
                Token::Punct(Op::Colon),
                Token::Word("creature"),
                Token::Word("cmc"),
                Token::Punct(Op::Ge),
                Token::Number("3"),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_arith_symbols_fold_into_words() {
        assert_eq!(
            tokens("cmc+1<power mono-red 1/2"),
            vec![
                Token::Word("cmc+1"),
                Token::Punct(Op::Lt),
                Token::Word("power"),
                Token::Word("mono-red"),
                Token::Word("1/2"),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_leading_dash_is_not() {
        assert_eq!(
            tokens("-t:land"),
            vec![
                Token::Not,
                Token::Word("t"),
                Token::Punct(Op::Colon),
                Token::Word("land"),
                Token::Eof,
            ]
        );
        // A bare dash is just a word.
        assert_eq!(tokens("-"), vec![Token::Word("-"), Token::Eof]);
    }

    #[test]
    fn test_negative_number_after_comparison() {
        assert_eq!(
            tokens("edhrec>-1"),
            vec![
                Token::Word("edhrec"),
                Token::Punct(Op::Gt),
                Token::Number("-1"),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_reserved_words_are_case_insensitive() {
        assert_eq!(
            tokens("a AND b oR not c"),
            vec![
                Token::Word("a"),
                Token::And,
                Token::Word("b"),
                Token::Or,
                Token::Not,
                Token::Word("c"),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            tokens(r#"o:"draw a card" name:'Juzám Djinn' "esc\"aped""#),
            vec![
                Token::Word("o"),
                Token::Punct(Op::Colon),
                Token::Quoted("draw a card".to_string()),
                Token::Word("name"),
                Token::Punct(Op::Colon),
                Token::Quoted("Juzám Djinn".to_string()),
                Token::Quoted("esc\"aped".to_string()),
                Token::Eof,
            ]
        );
        // The opposite quote kind nests without escaping.
        assert_eq!(
            tokens(r#""it's fine""#),
            vec![Token::Quoted("it's fine".to_string()), Token::Eof]
        );
    }

    #[test]
    fn test_unterminated_string() {
        assert_eq!(
            Lexer::tokenize(r#"o:"draw a"#),
            Err(Error::UnterminatedString { offset: 2 })
        );
    }

    #[test]
    fn test_bad_bang() {
        assert!(matches!(
            Lexer::tokenize("power!3"),
            Err(Error::Syntax { offset: 5, .. })
        ));
    }

    #[test]
    fn test_offsets() {
        let spanned = Lexer::tokenize("ab  cd:e").unwrap();
        let offsets: Vec<usize> = spanned.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![0, 4, 6, 7, 8]);
    }

    #[test]
    fn test_ne_and_comparison_chain() {
        assert_eq!(
            tokens("r!=rare cmc<=5"),
            vec![
                Token::Word("r"),
                Token::Punct(Op::Ne),
                Token::Word("rare"),
                Token::Word("cmc"),
                Token::Punct(Op::Le),
                Token::Number("5"),
                Token::Eof,
            ]
        );
    }
}
