//! Tokenizer for the text (ASCII) flavour of FBX.
//!
//! ```text
//! ; comment
//! Geometry: 140, "Geometry::Cube", "Mesh" {
//!     Vertices: *6 {
//!         a: 0,0,0,1,0,0
//!     }
//! }
//! ```
//!
//! Produces the same [`Token`] stream as the binary decoder, so both share one tree builder.

use super::parser::{Token, parse_tokens};
use super::record::{Data, Record};
use crate::error::{ImportError, Result};

/// Parses a text FBX document into its node tree.
pub fn parse(src: &str) -> Result<Record> {
    let tokens = tokenize_text(src)?;
    if !tokens.iter().any(|t| matches!(t, Token::Key(_))) {
        return Err(ImportError::UnsupportedFormat(
            "no records in text document".to_string(),
        ));
    }
    parse_tokens(tokens)
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Skips whitespace, commas and `;` comments.
    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == ',' {
                self.bump();
            } else if c == ';' {
                match self.rest().find('\n') {
                    Some(n) => self.pos += n,
                    None => self.pos = self.src.len(),
                }
            } else {
                break;
            }
        }
    }

    /// Skips whitespace on the current line only.
    fn skip_inline_space(&mut self) {
        while let Some(c) = self.peek() {
            if c == ' ' || c == '\t' || c == '\r' {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn take_while(&mut self, f: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !f(c) {
                break;
            }
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn expect(&mut self, want: char) -> Result<()> {
        self.skip_trivia();
        match self.bump() {
            Some(c) if c == want => Ok(()),
            other => Err(ImportError::parse(
                self.pos,
                format!("expected {want:?}, found {other:?}"),
            )),
        }
    }

    fn read_quoted(&mut self) -> Result<String> {
        let start = self.pos;
        self.bump();
        let body = self.take_while(|c| c != '"');
        if self.bump() != Some('"') {
            return Err(ImportError::parse(start, "unterminated string"));
        }
        Ok(body.to_string())
    }

    /// `*N { a: v0,v1,... }`
    fn read_array(&mut self) -> Result<Data> {
        let start = self.pos;
        self.bump();
        let count = self.take_while(|c| c.is_ascii_digit());
        let count: usize = count
            .parse()
            .map_err(|_| ImportError::parse(start, "array without element count"))?;
        self.expect('{')?;
        self.skip_trivia();
        let mut ints = vec![];
        let mut floats = vec![];
        let mut is_float = false;
        if self.peek() != Some('}') {
            let key = self.take_while(is_ident);
            if key != "a" {
                return Err(ImportError::parse(self.pos, "array body must start with `a:`"));
            }
            self.expect(':')?;
            loop {
                self.skip_trivia();
                match self.peek() {
                    Some('}') | None => break,
                    _ => {}
                }
                let at = self.pos;
                let word = self.take_while(is_number);
                if word.is_empty() {
                    return Err(ImportError::parse(at, "expected a number in array"));
                }
                match parse_number(word) {
                    Some(Data::I64(i)) => {
                        ints.push(i);
                        floats.push(i as f64);
                    }
                    Some(Data::F64(f)) => {
                        is_float = true;
                        floats.push(f);
                    }
                    _ => return Err(ImportError::parse(at, format!("bad number {word:?}"))),
                }
            }
        }
        self.expect('}')?;
        let out = if is_float {
            Data::F64Arr(floats)
        } else {
            Data::I64Arr(ints)
        };
        if out.len() != count {
            log::debug!(
                "text array declares {count} elements but holds {}",
                out.len()
            );
        }
        Ok(out)
    }
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '|' || c == '-' || c == '.'
}

fn is_number(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')
}

fn parse_number(s: &str) -> Option<Data> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Data::I64(i));
    }
    s.parse::<f64>().ok().map(Data::F64)
}

pub fn tokenize_text(src: &str) -> Result<Vec<Token>> {
    let mut lx = Lexer { src, pos: 0 };
    let mut out = vec![];
    loop {
        lx.skip_trivia();
        let Some(c) = lx.peek() else { break };
        match c {
            '{' => {
                lx.bump();
                out.push(Token::ScopeStart);
            }
            '}' => {
                lx.bump();
                out.push(Token::ScopeEnd);
            }
            '"' => out.push(Token::Data(Data::String(lx.read_quoted()?))),
            '*' => out.push(Token::Data(lx.read_array()?)),
            c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                let at = lx.pos;
                let word = lx.take_while(is_number);
                let d = parse_number(word)
                    .ok_or_else(|| ImportError::parse(at, format!("bad number {word:?}")))?;
                out.push(Token::Data(d));
            }
            c if is_ident(c) => {
                let word = lx.take_while(is_ident);
                lx.skip_inline_space();
                if lx.peek() == Some(':') {
                    lx.bump();
                    out.push(Token::Key(word.to_string()));
                } else {
                    // bare words such as `T`, `Y` or `W` in older documents
                    out.push(Token::Data(Data::str(word)));
                }
            }
            c => {
                return Err(ImportError::parse(
                    lx.pos,
                    format!("unexpected character {c:?}"),
                ));
            }
        }
    }
    Ok(out)
}

#[test]
fn test_text_document() {
    let src = r#"; FBX 7.3.0 project file
FBXHeaderExtension:  {
    FBXVersion: 7300
}
Objects:  {
    Geometry: 140, "Geometry::Cube", "Mesh" {
        Vertices: *6 {
            a: 0,0,0,1.5,-2,3e2
        }
        PolygonVertexIndex: *3 {
            a: 0,1,-3
        }
    }
}
Connections:  {
    C: "OO",140,0
}
"#;
    let root = parse(src).unwrap();
    assert_eq!(root.children.len(), 3);
    let version = root.child("FBXHeaderExtension").unwrap();
    assert_eq!(version.child("FBXVersion").unwrap().prop_i64(0), Some(7300));

    let geom = root.child("Objects").unwrap().child("Geometry").unwrap();
    assert_eq!(geom.id(), Some(140));
    assert_eq!(geom.object_name(), "Cube");
    assert_eq!(
        geom.child_f64s("Vertices").unwrap(),
        vec![0., 0., 0., 1.5, -2., 300.]
    );
    assert_eq!(geom.child_i64s("PolygonVertexIndex").unwrap(), vec![0, 1, -3]);

    let c = root.child("Connections").unwrap().child("C").unwrap();
    assert_eq!(c.prop_str(0), Some("OO"));
    assert_eq!(c.prop_i64(2), Some(0));
}

#[test]
fn test_text_rejects_binary_garbage() {
    assert!(parse("\u{1}\u{2}garbage").is_err());
    assert!(parse("").is_err());
}
