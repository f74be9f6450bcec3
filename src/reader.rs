//! A minimal S-expression reader.
//!
//! The reader is explicitly named as a collaborator out of scope for
//! this crate's core (§1): the engine only needs *some* way to turn
//! boot-image text and `-e` expressions into cells, not a full R5RS
//! surface syntax (no `#(...)` vector literals, no block comments, no
//! bignums/rationals). It covers exactly enough surface syntax to
//! drive the boot file and the CLI's `-e` flag: lists (proper and
//! dotted), `quote`/`quasiquote`/`unquote`/`unquote-splicing` shorthand,
//! symbols, integers, strings, characters, and `#t`/`#f`.

use crate::cell::{CellIdx, Tag};
use crate::constructors::{cons, make_number, make_string};
use crate::error::{EngineError, EngineResult};
use crate::eval::Engine;

struct Reader<'a> {
    text: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(text: &'a str) -> Self {
        Reader { text: text.as_bytes(), pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.text.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_atmosphere(&mut self) {
        loop {
            match self.peek() {
                Some(b) if b.is_ascii_whitespace() => {
                    self.pos += 1;
                }
                Some(b';') => {
                    while let Some(b) = self.peek() {
                        self.pos += 1;
                        if b == b'\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn at_end(&mut self) -> bool {
        self.skip_atmosphere();
        self.pos >= self.text.len()
    }

    fn is_delimiter(b: u8) -> bool {
        b.is_ascii_whitespace() || matches!(b, b'(' | b')' | b'"' | b';' | b'\'' | b'`' | b',')
    }

    fn read_token(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if Self::is_delimiter(b) {
                break;
            }
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.text[start..self.pos]).into_owned()
    }

    fn read_form(&mut self, engine: &mut Engine) -> EngineResult<CellIdx> {
        self.skip_atmosphere();
        match self.peek() {
            None => Err(EngineError::ReaderSyntax("unexpected end of input".to_string())),
            Some(b'(') => {
                self.bump();
                self.read_list(engine)
            }
            Some(b')') => Err(EngineError::ReaderSyntax("unexpected ')'".to_string())),
            Some(b'\'') => {
                self.bump();
                self.read_wrapped(engine, "quote")
            }
            Some(b'`') => {
                self.bump();
                self.read_wrapped(engine, "quasiquote")
            }
            Some(b',') => {
                self.bump();
                if self.peek() == Some(b'@') {
                    self.bump();
                    self.read_wrapped(engine, "unquote-splicing")
                } else {
                    self.read_wrapped(engine, "unquote")
                }
            }
            Some(b'"') => self.read_string(engine),
            Some(b'#') => self.read_hash(engine),
            Some(_) => self.read_atom(engine),
        }
    }

    fn read_wrapped(&mut self, engine: &mut Engine, name: &str) -> EngineResult<CellIdx> {
        let inner = self.read_form(engine)?;
        let nil = engine.nil();
        let tail = cons(&mut engine.store, inner, nil)?;
        let sym = engine.symbols.intern(&mut engine.store, name)?;
        cons(&mut engine.store, sym, tail)
    }

    fn read_list(&mut self, engine: &mut Engine) -> EngineResult<CellIdx> {
        self.skip_atmosphere();
        if self.peek() == Some(b')') {
            self.bump();
            return Ok(engine.nil());
        }
        let head = self.read_form(engine)?;
        self.skip_atmosphere();

        // Dotted tail: `(a . b)`.
        if self.peek() == Some(b'.') {
            let save = self.pos;
            self.bump();
            if self.peek().map(Self::is_delimiter).unwrap_or(true) {
                let tail = self.read_form(engine)?;
                self.skip_atmosphere();
                if self.bump() != Some(b')') {
                    return Err(EngineError::ReaderSyntax("expected ')' after dotted tail".to_string()));
                }
                return cons(&mut engine.store, head, tail);
            }
            self.pos = save; // '.' was the start of a symbol like `...`
        }

        let rest = self.read_list(engine)?;
        cons(&mut engine.store, head, rest)
    }

    fn read_string(&mut self, engine: &mut Engine) -> EngineResult<CellIdx> {
        self.bump(); // opening quote
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(EngineError::ReaderSyntax("unterminated string literal".to_string())),
                Some(b'"') => break,
                Some(b'\\') => match self.bump() {
                    Some(b'n') => out.push('\n'),
                    Some(b't') => out.push('\t'),
                    Some(b'\\') => out.push('\\'),
                    Some(b'"') => out.push('"'),
                    Some(c) => out.push(c as char),
                    None => return Err(EngineError::ReaderSyntax("unterminated escape".to_string())),
                },
                Some(c) => out.push(c as char),
            }
        }
        make_string(&mut engine.store, &out)
    }

    fn read_hash(&mut self, engine: &mut Engine) -> EngineResult<CellIdx> {
        self.bump(); // '#'
        match self.peek() {
            Some(b't') => {
                self.read_token();
                Ok(engine.symbols.well_known_cached(crate::symbols::WellKnown::True))
            }
            Some(b'f') => {
                self.read_token();
                Ok(engine.symbols.well_known_cached(crate::symbols::WellKnown::False))
            }
            Some(b'\\') => {
                self.bump();
                let token = self.read_char_token();
                let value = char_from_token(&token)?;
                engine.store.make_cell(Tag::Char, value as CellIdx, 0)
            }
            _ => Err(EngineError::ReaderSyntax("unsupported '#' syntax".to_string())),
        }
    }

    fn read_char_token(&mut self) -> String {
        // A character name is at least one character, then continues
        // while the following bytes are non-delimiter (for names like
        // `space`/`newline`).
        let start = self.pos;
        if self.bump().is_none() {
            return String::new();
        }
        while let Some(b) = self.peek() {
            if Self::is_delimiter(b) {
                break;
            }
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.text[start..self.pos]).into_owned()
    }

    fn read_atom(&mut self, engine: &mut Engine) -> EngineResult<CellIdx> {
        let token = self.read_token();
        if token.is_empty() {
            return Err(EngineError::ReaderSyntax("empty token".to_string()));
        }
        if let Ok(n) = token.parse::<i64>() {
            return make_number(&mut engine.store, n);
        }
        engine.symbols.intern(&mut engine.store, &token)
    }
}

fn char_from_token(token: &str) -> EngineResult<char> {
    match token {
        "space" => Ok(' '),
        "newline" => Ok('\n'),
        "tab" => Ok('\t'),
        "nul" | "null" => Ok('\0'),
        _ => token
            .chars()
            .next()
            .ok_or_else(|| EngineError::ReaderSyntax("empty character literal".to_string())),
    }
}

/// Reads exactly one form from `text`, ignoring any trailing content.
pub fn read_one(engine: &mut Engine, text: &str) -> EngineResult<CellIdx> {
    let mut r = Reader::new(text);
    r.read_form(engine)
}

/// Reads every top-level form in `text` in order.
pub fn read_all(engine: &mut Engine, text: &str) -> EngineResult<Vec<CellIdx>> {
    let mut r = Reader::new(text);
    let mut forms = Vec::new();
    while !r.at_end() {
        forms.push(r.read_form(engine)?);
    }
    Ok(forms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap;
    use crate::config::Config;
    use crate::constructors::{car, cdr, number_value, string_value};

    fn engine() -> Engine {
        let mut e = Engine::new(Config::default()).unwrap();
        bootstrap::init_specials(&mut e).unwrap();
        e
    }

    #[test]
    fn reads_a_number() {
        let mut e = engine();
        let v = read_one(&mut e, "42").unwrap();
        assert_eq!(number_value(&e.store, v), 42);
    }

    #[test]
    fn reads_a_negative_number() {
        let mut e = engine();
        let v = read_one(&mut e, "-7").unwrap();
        assert_eq!(number_value(&e.store, v), -7);
    }

    #[test]
    fn reads_a_proper_list() {
        let mut e = engine();
        let v = read_one(&mut e, "(1 2 3)").unwrap();
        assert_eq!(number_value(&e.store, car(&e.store, v)), 1);
        let rest = cdr(&e.store, v);
        assert_eq!(number_value(&e.store, car(&e.store, rest)), 2);
    }

    #[test]
    fn reads_a_dotted_pair() {
        let mut e = engine();
        let v = read_one(&mut e, "(1 . 2)").unwrap();
        assert_eq!(number_value(&e.store, car(&e.store, v)), 1);
        assert_eq!(number_value(&e.store, cdr(&e.store, v)), 2);
    }

    #[test]
    fn reads_quote_shorthand() {
        let mut e = engine();
        let v = read_one(&mut e, "'foo").unwrap();
        let head = car(&e.store, v);
        assert_eq!(e.symbols.lookup_name("quote"), Some(head));
    }

    #[test]
    fn reads_a_string_with_escapes() {
        let mut e = engine();
        let v = read_one(&mut e, "\"a\\nb\"").unwrap();
        assert_eq!(string_value(&e.store, v), "a\nb");
    }

    #[test]
    fn reads_booleans() {
        let mut e = engine();
        let t = read_one(&mut e, "#t").unwrap();
        assert_eq!(t, e.symbols.well_known_cached(crate::symbols::WellKnown::True));
        let f = read_one(&mut e, "#f").unwrap();
        assert_eq!(f, e.symbols.well_known_cached(crate::symbols::WellKnown::False));
    }

    #[test]
    fn read_all_reads_multiple_top_level_forms() {
        let mut e = engine();
        let forms = read_all(&mut e, "(define x 1) (+ x 1)").unwrap();
        assert_eq!(forms.len(), 2);
    }
}
