// src/jsonc/mod.rs

//! Structure-preserving JSON-with-comments documents
//!
//! [`Document::parse`] builds a concrete syntax tree that keeps every
//! comment and whitespace run as trivia attached to the neighbouring token.
//! Serializing an untouched tree reproduces the input byte for byte; adding
//! or removing object members leaves the formatting of every other member
//! alone.
//!
//! Trivia ownership:
//! - `Value::before` / `Value::after` surround a value (for the root value
//!   these are the document's leading and trailing text)
//! - `Member::name_before` precedes a member's name, `name_after` sits
//!   between the name and the colon
//! - `close_trivia` holds whatever precedes the closing bracket, after the
//!   last element or after a trailing comma

mod parse;

pub use parse::ParseError;

use std::fmt;

/// A parsed JSONC document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    root: Value,
}

/// A value plus the trivia around it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    pub before: String,
    pub kind: Kind,
    pub after: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    /// Raw token text: a quoted string, number, `true`, `false` or `null`
    Literal(String),
    Object(Object),
    Array(Array),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Object {
    pub members: Vec<Member>,
    pub trailing_comma: bool,
    pub close_trivia: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name_before: String,
    /// Name token including its quotes, exactly as written
    pub name_raw: String,
    pub name_after: String,
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Array {
    pub elements: Vec<Value>,
    pub trailing_comma: bool,
    pub close_trivia: String,
}

impl Document {
    /// Parse JSONC text; comments and trailing commas are allowed
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        parse::parse_document(text)
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Value {
        &mut self.root
    }

    /// Whether any `//` or `/* */` comment appears anywhere in the document
    pub fn has_comments(&self) -> bool {
        self.root.has_comments()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.root.write_to(&mut out);
        f.write_str(&out)
    }
}

impl Value {
    /// A bare value with no surrounding trivia
    pub fn new(kind: Kind) -> Self {
        Self {
            before: String::new(),
            kind,
            after: String::new(),
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(Kind::Literal(value.to_string()))
    }

    pub fn string(value: &str) -> Self {
        Self::new(Kind::Literal(quote(value)))
    }

    pub fn as_object(&self) -> Option<&Object> {
        match &self.kind {
            Kind::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Object> {
        match &mut self.kind {
            Kind::Object(object) => Some(object),
            _ => None,
        }
    }

    fn has_comments(&self) -> bool {
        if is_commented(&self.before) || is_commented(&self.after) {
            return true;
        }
        match &self.kind {
            Kind::Literal(_) => false,
            Kind::Object(object) => {
                is_commented(&object.close_trivia)
                    || object.members.iter().any(|member| {
                        is_commented(&member.name_before)
                            || is_commented(&member.name_after)
                            || member.value.has_comments()
                    })
            }
            Kind::Array(array) => {
                is_commented(&array.close_trivia)
                    || array.elements.iter().any(Value::has_comments)
            }
        }
    }

    fn write_to(&self, out: &mut String) {
        out.push_str(&self.before);
        match &self.kind {
            Kind::Literal(raw) => out.push_str(raw),
            Kind::Object(object) => {
                out.push('{');
                for (i, member) in object.members.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&member.name_before);
                    out.push_str(&member.name_raw);
                    out.push_str(&member.name_after);
                    out.push(':');
                    member.value.write_to(out);
                }
                if object.trailing_comma && !object.members.is_empty() {
                    out.push(',');
                }
                out.push_str(&object.close_trivia);
                out.push('}');
            }
            Kind::Array(array) => {
                out.push('[');
                for (i, element) in array.elements.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    element.write_to(out);
                }
                if array.trailing_comma && !array.elements.is_empty() {
                    out.push(',');
                }
                out.push_str(&array.close_trivia);
                out.push(']');
            }
        }
        out.push_str(&self.after);
    }
}

impl Member {
    /// New member whose name is preceded by `name_before` and whose value
    /// is preceded by `value_before`
    pub fn new(name: &str, mut value: Value, name_before: &str, value_before: &str) -> Self {
        value.before = value_before.to_string();
        Self {
            name_before: name_before.to_string(),
            name_raw: quote(name),
            name_after: String::new(),
            value,
        }
    }

    /// Decoded member name; `None` if the raw token is not a valid string
    pub fn name(&self) -> Option<String> {
        serde_json::from_str(&self.name_raw).ok()
    }
}

impl Object {
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Index of the first member named `name`
    pub fn position(&self, name: &str) -> Option<usize> {
        self.members
            .iter()
            .position(|member| member.name().as_deref() == Some(name))
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.position(name).map(|i| &self.members[i].value)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.position(name).map(|i| &mut self.members[i].value)
    }

    /// Append a member after the last one; separators are implicit
    pub fn push(&mut self, member: Member) {
        self.members.push(member);
    }

    /// Remove the first member named `name`
    pub fn remove(&mut self, name: &str) -> Option<Member> {
        self.position(name).map(|i| self.members.remove(i))
    }

    /// Indentation of the first member that starts on its own line
    pub fn member_indent(&self) -> Option<&str> {
        self.members
            .iter()
            .find_map(|member| indent_of(&member.name_before))
    }

    /// Smallest member indentation, or two spaces when none is visible
    pub fn indent_unit(&self) -> String {
        self.members
            .iter()
            .filter_map(|member| indent_of(&member.name_before))
            .min_by_key(|indent| indent.len())
            .unwrap_or("  ")
            .to_string()
    }
}

/// Leading spaces/tabs of the last line in `trivia`, if it follows a newline
fn indent_of(trivia: &str) -> Option<&str> {
    let (_, last_line) = trivia.rsplit_once('\n')?;
    let end = last_line
        .find(|c: char| c != ' ' && c != '\t')
        .unwrap_or(last_line.len());
    if end == 0 {
        return None;
    }
    Some(&last_line[..end])
}

/// Trivia only ever contains whitespace and comments
fn is_commented(trivia: &str) -> bool {
    trivia.contains('/')
}

fn quote(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
