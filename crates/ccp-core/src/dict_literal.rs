//! Parser for the dictionary literals stored in package variables.
//!
//! Values look like `{'%AIPsStore%': '/var/archivematica/...', "k": 1}`.
//! Keys and values may be single- or double-quoted strings; bare tokens
//! (`True`, `None`, numbers) are kept as their text.

use indexmap::IndexMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DictLiteralError {
    #[error("expected '{expected}' at offset {offset}")]
    Expected { expected: char, offset: usize },

    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("trailing characters at offset {0}")]
    Trailing(usize),
}

/// Parse a dictionary literal into an ordered map.
pub fn parse(input: &str) -> Result<IndexMap<String, String>, DictLiteralError> {
    let mut parser = Parser {
        chars: input.char_indices().collect(),
        pos: 0,
    };
    let map = parser.dict()?;
    parser.skip_ws();
    if let Some(&(offset, _)) = parser.chars.get(parser.pos) {
        return Err(DictLiteralError::Trailing(offset));
    }
    Ok(map)
}

struct Parser {
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.chars.get(self.pos).map(|&(o, _)| o).unwrap_or_else(|| {
            self.chars.last().map(|&(o, c)| o + c.len_utf8()).unwrap_or(0)
        })
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), DictLiteralError> {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(DictLiteralError::Expected {
                expected,
                offset: self.offset(),
            })
        }
    }

    fn dict(&mut self) -> Result<IndexMap<String, String>, DictLiteralError> {
        let mut map = IndexMap::new();
        self.expect('{')?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('}') => {
                    self.pos += 1;
                    return Ok(map);
                }
                None => return Err(DictLiteralError::UnexpectedEnd),
                _ => {}
            }
            let key = self.value()?;
            self.expect(':')?;
            let value = self.value()?;
            map.insert(key, value);

            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {}
                None => return Err(DictLiteralError::UnexpectedEnd),
                Some(_) => {
                    return Err(DictLiteralError::Expected {
                        expected: ',',
                        offset: self.offset(),
                    });
                }
            }
        }
    }

    fn value(&mut self) -> Result<String, DictLiteralError> {
        self.skip_ws();
        match self.peek() {
            Some(q @ ('\'' | '"')) => self.string(q),
            Some(_) => Ok(self.bare()),
            None => Err(DictLiteralError::UnexpectedEnd),
        }
    }

    fn string(&mut self, quote: char) -> Result<String, DictLiteralError> {
        let start = self.offset();
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '\\' => {
                    let escaped = self
                        .peek()
                        .ok_or(DictLiteralError::UnterminatedString(start))?;
                    self.pos += 1;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                c if c == quote => return Ok(out),
                c => out.push(c),
            }
        }
        Err(DictLiteralError::UnterminatedString(start))
    }

    fn bare(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == ',' || c == ':' || c == '}' || c.is_whitespace() {
                break;
            }
            out.push(c);
            self.pos += 1;
        }
        out
    }
}
