//! Parameter markers ("mung symbols")
//!
//! Each driver expects its own marker where a bound parameter goes: `?` for
//! SQLite and MySQL, `%s` for format-style drivers, `$1, $2, ...` for
//! PostgreSQL. A pool advertises its policy as a [`MungSymbol`]; the template
//! renderer asks a fresh [`SymbolGenerator`] for one marker per `#{...}`.

use std::borrow::Cow;

/// Produces the marker for the next bound parameter.
pub trait SymbolGenerator {
    fn next_symbol(&mut self) -> String;
}

impl<F: FnMut() -> String> SymbolGenerator for F {
    fn next_symbol(&mut self) -> String {
        self()
    }
}

/// The same marker every time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticSymbol {
    symbol: Cow<'static, str>,
}

impl StaticSymbol {
    pub fn new(symbol: impl Into<Cow<'static, str>>) -> Self {
        Self {
            symbol: symbol.into(),
        }
    }
}

impl SymbolGenerator for StaticSymbol {
    fn next_symbol(&mut self) -> String {
        self.symbol.to_string()
    }
}

/// `prefix` followed by an incrementing number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedSymbols {
    prefix: Cow<'static, str>,
    next: usize,
}

impl NumberedSymbols {
    pub fn new(prefix: impl Into<Cow<'static, str>>, start: usize) -> Self {
        Self {
            prefix: prefix.into(),
            next: start,
        }
    }
}

impl Default for NumberedSymbols {
    fn default() -> Self {
        Self::new("$", 1)
    }
}

impl SymbolGenerator for NumberedSymbols {
    fn next_symbol(&mut self) -> String {
        let symbol = format!("{}{}", self.prefix, self.next);
        self.next += 1;
        symbol
    }
}

/// A pool's marker policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MungSymbol {
    Static(Cow<'static, str>),
    Numbered {
        prefix: Cow<'static, str>,
        start: usize,
    },
}

impl MungSymbol {
    /// `?`, used by SQLite and MySQL.
    pub const QMARK: MungSymbol = MungSymbol::Static(Cow::Borrowed("?"));

    /// `%s`, used by format-style drivers.
    pub const FORMAT: MungSymbol = MungSymbol::Static(Cow::Borrowed("%s"));

    /// `$1`, `$2`, ...
    pub const DOLLAR: MungSymbol = MungSymbol::Numbered {
        prefix: Cow::Borrowed("$"),
        start: 1,
    };

    /// A generator for one render. Numbering restarts on every call.
    pub fn generator(&self) -> Box<dyn SymbolGenerator + Send> {
        match self {
            MungSymbol::Static(symbol) => Box::new(StaticSymbol::new(symbol.clone())),
            MungSymbol::Numbered { prefix, start } => {
                Box::new(NumberedSymbols::new(prefix.clone(), *start))
            }
        }
    }
}
