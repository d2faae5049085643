//! Dotted member paths such as `Range("A1").Font.Bold`.
//!
//! A path is a chain of segments separated by dots. Each segment is a member
//! name optionally followed by a parenthesised list of literal arguments:
//! double-quoted strings (`""` escapes a quote), integers, floats, and
//! `True`/`False`. Dots inside quotes do not split.

use std::fmt;
use std::str::FromStr;

use crate::error::PathError;
use crate::value::{Args, DynamicValue};

/// One member access in a path.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub name: String,
    pub args: Args,
}

impl Segment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Args::new(),
        }
    }

    pub fn with_args(name: impl Into<String>, args: impl IntoIterator<Item = DynamicValue>) -> Self {
        Self {
            name: name.into(),
            args: args.into_iter().collect(),
        }
    }

    /// Canonical text used as the cache key, e.g. `Range("A1")`.
    ///
    /// Segments with different arguments name different objects.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.args.is_empty() {
            return Ok(());
        }
        f.write_str("(")?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match arg {
                DynamicValue::String(s) => write!(f, "\"{}\"", s.replace('"', "\"\""))?,
                DynamicValue::Bool(true) => f.write_str("True")?,
                DynamicValue::Bool(false) => f.write_str("False")?,
                DynamicValue::Double(n) if n.fract() == 0.0 && n.is_finite() => {
                    write!(f, "{n:.1}")?
                }
                other => write!(f, "{other}")?,
            }
        }
        f.write_str(")")
    }
}

/// A parsed, non-empty member path.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberPath {
    segments: Vec<Segment>,
}

impl MemberPath {
    pub fn parse(text: &str) -> Result<Self, PathError> {
        Parser::new(text).path()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Intermediate segments and the terminal one.
    pub fn split_last(&self) -> Option<(&Segment, &[Segment])> {
        self.segments.split_last()
    }
}

impl FromStr for MemberPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MemberPath::parse(s)
    }
}

impl From<Segment> for MemberPath {
    fn from(segment: Segment) -> Self {
        Self {
            segments: vec![segment],
        }
    }
}

impl fmt::Display for MemberPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

/// Parse a single literal (`"text"`, `42`, `1.5`, `True`).
pub fn parse_literal(text: &str) -> Result<DynamicValue, PathError> {
    let mut parser = Parser::new(text);
    parser.skip_ws();
    let value = parser.literal()?;
    parser.skip_ws();
    match parser.peek() {
        None => Ok(value),
        Some(ch) => Err(PathError::Unexpected {
            ch,
            offset: parser.pos,
        }),
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn path(&mut self) -> Result<MemberPath, PathError> {
        if self.src.trim().is_empty() {
            return Err(PathError::Empty);
        }
        let mut segments = vec![self.segment()?];
        loop {
            match self.peek() {
                None => break,
                Some('.') => {
                    self.bump();
                    segments.push(self.segment()?);
                }
                Some(ch) => {
                    return Err(PathError::Unexpected {
                        ch,
                        offset: self.pos,
                    })
                }
            }
        }
        Ok(MemberPath { segments })
    }

    fn segment(&mut self) -> Result<Segment, PathError> {
        self.skip_ws();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.bump();
        }
        if self.pos == start {
            return match self.peek() {
                None | Some('.') => Err(PathError::EmptySegment(start)),
                Some(ch) => Err(PathError::Unexpected { ch, offset: start }),
            };
        }
        let name = self.src[start..self.pos].to_string();

        self.skip_ws();
        let mut args = Args::new();
        if self.peek() == Some('(') {
            let open = self.pos;
            self.bump();
            self.skip_ws();
            if self.peek() == Some(')') {
                self.bump();
            } else {
                loop {
                    self.skip_ws();
                    if self.peek().is_none() {
                        return Err(PathError::UnclosedArgs(open));
                    }
                    args.push(self.literal()?);
                    self.skip_ws();
                    match self.bump() {
                        Some(',') => continue,
                        Some(')') => break,
                        None => return Err(PathError::UnclosedArgs(open)),
                        Some(ch) => {
                            return Err(PathError::Unexpected {
                                ch,
                                offset: self.pos - ch.len_utf8(),
                            })
                        }
                    }
                }
            }
            self.skip_ws();
        }
        Ok(Segment { name, args })
    }

    fn literal(&mut self) -> Result<DynamicValue, PathError> {
        match self.peek() {
            Some('"') => self.string(),
            Some(c) if c == '-' || c == '+' || c.is_ascii_digit() => self.number(),
            Some(c) if c.is_alphabetic() => {
                let start = self.pos;
                while self.peek().is_some_and(char::is_alphanumeric) {
                    self.bump();
                }
                let word = &self.src[start..self.pos];
                if word.eq_ignore_ascii_case("true") {
                    Ok(DynamicValue::Bool(true))
                } else if word.eq_ignore_ascii_case("false") {
                    Ok(DynamicValue::Bool(false))
                } else {
                    Err(PathError::BadLiteral(word.to_string()))
                }
            }
            Some(ch) => Err(PathError::Unexpected {
                ch,
                offset: self.pos,
            }),
            None => Err(PathError::BadLiteral(String::new())),
        }
    }

    fn string(&mut self) -> Result<DynamicValue, PathError> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(PathError::UnterminatedString(start)),
                Some('"') if self.peek() == Some('"') => {
                    self.bump();
                    out.push('"');
                }
                Some('"') => return Ok(DynamicValue::String(out)),
                Some(ch) => out.push(ch),
            }
        }
    }

    fn number(&mut self) -> Result<DynamicValue, PathError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-' | '+')) {
            self.bump();
        }
        let mut float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {}
                '.' | 'e' | 'E' => float = true,
                '-' | '+' if float => {}
                _ => break,
            }
            self.bump();
        }
        let text = &self.src[start..self.pos];
        let bad = || PathError::BadLiteral(text.to_string());
        if !float {
            if let Ok(n) = text.parse::<i32>() {
                return Ok(DynamicValue::Int(n));
            }
        }
        text.parse::<f64>()
            .map(DynamicValue::Double)
            .map_err(|_| bad())
    }
}
