// src/jsonc/parse.rs

//! Lossless JSONC parser
//!
//! Every byte of the input lands somewhere in the tree: significant tokens
//! as raw text, everything between them (whitespace, `//` and `/* */`
//! comments) as trivia strings. Trailing commas are accepted.

use super::{Array, Document, Kind, Member, Object, Value};
use thiserror::Error;

const MAX_DEPTH: usize = 128;

/// Syntax error with the byte offset where parsing stopped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub offset: usize,
    pub message: &'static str,
}

pub(super) fn parse_document(text: &str) -> Result<Document, ParseError> {
    let mut parser = Parser {
        text,
        bytes: text.as_bytes(),
        pos: 0,
    };

    let before = parser.trivia()?;
    let kind = parser.kind(0)?;
    let after = parser.trivia()?;
    if parser.pos != parser.bytes.len() {
        return Err(parser.error("unexpected content after document"));
    }

    Ok(Document {
        root: Value {
            before,
            kind,
            after,
        },
    })
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: &'static str) -> ParseError {
        ParseError {
            offset: self.pos,
            message,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn expect(&mut self, byte: u8, message: &'static str) -> Result<(), ParseError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(message))
        }
    }

    /// Consume whitespace and comments, returning them verbatim
    fn trivia(&mut self) -> Result<String, ParseError> {
        let start = self.pos;

        // Byte order mark is only legal at the very start
        if start == 0 && self.text.starts_with('\u{feff}') {
            self.pos += '\u{feff}'.len_utf8();
        }

        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\n' | b'\r') => self.pos += 1,
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(byte) = self.peek() {
                        if byte == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let body = self.pos + 2;
                    match self.text[body..].find("*/") {
                        Some(end) => self.pos = body + end + 2,
                        None => return Err(self.error("unterminated block comment")),
                    }
                }
                _ => break,
            }
        }

        Ok(self.text[start..self.pos].to_string())
    }

    fn kind(&mut self, depth: usize) -> Result<Kind, ParseError> {
        if depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        match self.peek() {
            Some(b'{') => self.object(depth).map(Kind::Object),
            Some(b'[') => self.array(depth).map(Kind::Array),
            Some(b'"') => self.string().map(Kind::Literal),
            Some(_) => self.word().map(Kind::Literal),
            None => Err(self.error("unexpected end of input")),
        }
    }

    /// Raw string token including quotes, validated as a JSON string
    fn string(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        self.expect(b'"', "expected string")?;

        loop {
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => self.pos += 2,
                Some(byte) if byte < 0x20 => {
                    return Err(self.error("control character in string"));
                }
                Some(_) => self.pos += 1,
                None => return Err(self.error("unterminated string")),
            }
        }

        let raw = &self.text[start..self.pos];
        if serde_json::from_str::<String>(raw).is_err() {
            self.pos = start;
            return Err(self.error("invalid string escape"));
        }
        Ok(raw.to_string())
    }

    /// Number, `true`, `false` or `null`
    fn word(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'+' | b'-' | b'.') {
                self.pos += 1;
            } else {
                break;
            }
        }

        let raw = &self.text[start..self.pos];
        let valid = !raw.is_empty()
            && matches!(
                serde_json::from_str::<serde_json::Value>(raw),
                Ok(serde_json::Value::Null | serde_json::Value::Bool(_) | serde_json::Value::Number(_))
            );
        if !valid {
            self.pos = start;
            return Err(self.error("unexpected token"));
        }
        Ok(raw.to_string())
    }

    fn object(&mut self, depth: usize) -> Result<Object, ParseError> {
        self.expect(b'{', "expected object")?;
        let mut object = Object::default();

        loop {
            let lead = self.trivia()?;
            match self.peek() {
                Some(b'}') => {
                    self.pos += 1;
                    object.trailing_comma = !object.members.is_empty();
                    object.close_trivia = lead;
                    return Ok(object);
                }
                Some(b'"') => {}
                _ => return Err(self.error("expected member name")),
            }

            let name_raw = self.string()?;
            let name_after = self.trivia()?;
            self.expect(b':', "expected ':'")?;
            let value_before = self.trivia()?;
            let kind = self.kind(depth + 1)?;
            let tail = self.trivia()?;

            let mut member = Member {
                name_before: lead,
                name_raw,
                name_after,
                value: Value {
                    before: value_before,
                    kind,
                    after: String::new(),
                },
            };

            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    member.value.after = tail;
                    object.members.push(member);
                }
                Some(b'}') => {
                    self.pos += 1;
                    object.members.push(member);
                    object.close_trivia = tail;
                    return Ok(object);
                }
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn array(&mut self, depth: usize) -> Result<Array, ParseError> {
        self.expect(b'[', "expected array")?;
        let mut array = Array::default();

        loop {
            let lead = self.trivia()?;
            if self.peek() == Some(b']') {
                self.pos += 1;
                array.trailing_comma = !array.elements.is_empty();
                array.close_trivia = lead;
                return Ok(array);
            }

            let kind = self.kind(depth + 1)?;
            let tail = self.trivia()?;
            let mut element = Value {
                before: lead,
                kind,
                after: String::new(),
            };

            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    element.after = tail;
                    array.elements.push(element);
                }
                Some(b']') => {
                    self.pos += 1;
                    array.elements.push(element);
                    array.close_trivia = tail;
                    return Ok(array);
                }
                _ => return Err(self.error("expected ',' or ']'")),
            }
        }
    }
}
