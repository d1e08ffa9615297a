//! SQL templates with named placeholders
//!
//! Two placeholder forms are recognised:
//!
//! - `#{path}` binds a parameter. The renderer emits the pool's marker
//!   (`?`, `%s`, `$1`, ...) and appends the resolved value to the parameter
//!   list.
//! - `!{path}` substitutes the resolved value's string form directly into the
//!   SQL text. Use it for identifiers and other things a driver cannot
//!   parameterize.
//!
//! `path` is one or more `.`-separated identifiers (`[A-Za-z][A-Za-z0-9_]*`)
//! with no surrounding whitespace. A `#`, `!` or `{` that does not start a
//! placeholder is plain text, so JSON literals and comments pass through.
//!
//! ```
//! use std::collections::HashMap;
//! use dbind::{MungSymbol, Template, Value};
//!
//! let template = Template::parse("SELECT * FROM t WHERE !{col} = #{val}").unwrap();
//! let mut args = HashMap::new();
//! args.insert("col", Value::from("name"));
//! args.insert("val", Value::from("x"));
//!
//! let rendered = template
//!     .render(&mut *MungSymbol::FORMAT.generator(), &args)
//!     .unwrap();
//! assert_eq!(rendered.sql, "SELECT * FROM t WHERE name = %s");
//! assert_eq!(rendered.params, vec![Value::from("x")]);
//! ```

use std::collections::HashMap;
use std::fmt::{self, Write};
use std::str::FromStr;

use tracing::debug;

use crate::error::{Error, Result};
use crate::mung::SymbolGenerator;
use crate::traits::{resolve, Arguments};
use crate::value::Value;

/// A parsed template piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    Placeholder(Placeholder),
}

/// A `#{...}` or `!{...}` reference to an argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Placeholder {
    path: Vec<String>,
    literal: bool,
}

impl Placeholder {
    /// Identifiers from the root parameter down.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// True for `!{...}` substitutions.
    pub fn is_literal(&self) -> bool {
        self.literal
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sigil = if self.literal { '!' } else { '#' };
        write!(f, "{}{{{}}}", sigil, self.path.join("."))
    }
}

/// SQL and driver parameters produced by [`Template::render`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    /// One entry per `#{...}` occurrence, in source order.
    pub params: Vec<Value>,
}

/// An immutable, parsed SQL template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    fragments: Vec<Fragment>,
    arguments: Vec<Vec<String>>,
}

impl Template {
    /// Parse `source`, failing with [`Error::Template`] on malformed
    /// placeholders.
    pub fn parse(source: &str) -> Result<Self> {
        let fragments = Parser::new(source).parse()?;
        let mut arguments: Vec<Vec<String>> = Vec::new();
        for fragment in &fragments {
            if let Fragment::Placeholder(p) = fragment {
                if !arguments.iter().any(|a| a == &p.path) {
                    arguments.push(p.path.clone());
                }
            }
        }
        Ok(Self {
            source: source.to_string(),
            fragments,
            arguments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Distinct placeholder paths in order of first appearance.
    pub fn arguments(&self) -> &[Vec<String>] {
        &self.arguments
    }

    /// Render against `args`, asking `symbols` for one marker per bound
    /// parameter.
    ///
    /// Each distinct path is resolved once per call; repeated occurrences
    /// reuse the value but still get their own marker and parameter slot.
    pub fn render(
        &self,
        symbols: &mut dyn SymbolGenerator,
        args: &dyn Arguments,
    ) -> Result<RenderedSql> {
        let mut sql = String::with_capacity(self.source.len());
        let mut params = Vec::new();
        let mut resolved: HashMap<&[String], Value> = HashMap::new();

        for fragment in &self.fragments {
            let placeholder = match fragment {
                Fragment::Text(text) => {
                    sql.push_str(text);
                    continue;
                }
                Fragment::Placeholder(p) => p,
            };
            let value = match resolved.get(placeholder.path()) {
                Some(value) => value.clone(),
                None => {
                    let value = resolve(placeholder.path(), args)?;
                    resolved.insert(placeholder.path(), value.clone());
                    value
                }
            };
            if placeholder.is_literal() {
                // Writing into a String cannot fail
                let _ = write!(sql, "{value}");
            } else {
                sql.push_str(&symbols.next_symbol());
                params.push(value);
            }
        }

        debug!(sql = %sql, params = params.len(), "rendered template");
        Ok(RenderedSql { sql, params })
    }
}

impl FromStr for Template {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Template::parse(s)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

struct Parser<'a> {
    source: &'a str,
    bytes: &'a [u8],
    fragments: Vec<Fragment>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            fragments: Vec::new(),
        }
    }

    // Only ASCII bytes are significant, so slicing at their offsets always
    // lands on char boundaries.
    fn parse(mut self) -> Result<Vec<Fragment>> {
        let mut text_start = 0;
        let mut pos = 0;
        while pos < self.bytes.len() {
            let literal = match self.bytes[pos] {
                b'#' => false,
                b'!' => true,
                _ => {
                    pos += 1;
                    continue;
                }
            };
            if !self.opens_at(pos) {
                pos += 1;
                continue;
            }
            self.push_text(text_start, pos);
            let (path, end) = self.placeholder(pos)?;
            self.fragments
                .push(Fragment::Placeholder(Placeholder { path, literal }));
            pos = end;
            text_start = end;
        }
        self.push_text(text_start, self.bytes.len());
        Ok(self.fragments)
    }

    fn opens_at(&self, pos: usize) -> bool {
        matches!(self.bytes.get(pos), Some(b'#' | b'!')) && self.bytes.get(pos + 1) == Some(&b'{')
    }

    fn push_text(&mut self, start: usize, end: usize) {
        if start == end {
            return;
        }
        let text = &self.source[start..end];
        match self.fragments.last_mut() {
            Some(Fragment::Text(prev)) => prev.push_str(text),
            _ => self.fragments.push(Fragment::Text(text.to_string())),
        }
    }

    /// Parse the placeholder opening at `open`; returns its path and the
    /// offset just past the closing brace.
    fn placeholder(&self, open: usize) -> Result<(Vec<String>, usize)> {
        let mut pos = open + 2;
        let mut path = Vec::new();
        loop {
            match self.bytes.get(pos) {
                None => return Err(self.error(open, "Unterminated placeholder")),
                Some(b) if b.is_ascii_alphabetic() => {}
                Some(_) if self.opens_at(pos) => {
                    return Err(self.error(pos, "Placeholders cannot be nested"))
                }
                Some(b'}') if path.is_empty() => {
                    return Err(self.error(open, "Empty placeholder"))
                }
                Some(_) => return Err(self.error(pos, "Expected identifier")),
            }
            let start = pos;
            while self
                .bytes
                .get(pos)
                .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
            {
                pos += 1;
            }
            path.push(self.source[start..pos].to_string());
            match self.bytes.get(pos) {
                Some(b'.') => pos += 1,
                Some(b'}') => return Ok((path, pos + 1)),
                _ => return Err(self.error(open, "Unterminated placeholder, expected '}'")),
            }
        }
    }

    fn error(&self, offset: usize, message: &str) -> Error {
        let line_start = self.source[..offset].rfind('\n').map_or(0, |i| i + 1);
        let line_end = self.source[offset..]
            .find('\n')
            .map_or(self.source.len(), |i| offset + i);
        let line = self.source[..offset].matches('\n').count() + 1;
        let column = self.source[line_start..offset].chars().count() + 1;
        let text = &self.source[line_start..line_end];
        Error::Template {
            message: message.to_string(),
            line,
            column,
            snippet: format!("{}\n{}^", text, " ".repeat(column - 1)),
        }
    }
}
