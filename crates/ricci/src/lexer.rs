//! Lexer for the LaTeX tensor notation.
//!
//! The lexer turns one equation segment of a document into a list of tokens.
//! Whitespace, alignment markers (`&`), math delimiters (`$`), spacing macros (`\,`, `\quad`)
//! and environment markers (`\begin{align*}`) carry no meaning in the notation and are dropped.
//! Any other macro must be one of the recognized macros, otherwise lexing fails.

use crate::error::{Error, ErrorKind};
use crate::suggest;
use std::ops::Range;

/// Greek letters that may be used as names of tensors, scalars and indices.
pub const GREEK_LETTERS: [&str; 37] = [
    "alpha", "beta", "gamma", "delta", "epsilon", "varepsilon", "zeta", "eta", "theta",
    "vartheta", "iota", "kappa", "lambda", "mu", "nu", "xi", "rho", "varrho", "sigma", "tau",
    "upsilon", "phi", "varphi", "chi", "psi", "omega", "Gamma", "Delta", "Theta", "Lambda", "Xi",
    "Pi", "Sigma", "Upsilon", "Phi", "Psi", "Omega",
];

/// Scalar functions and the macros that denote them.
pub const FUNCTIONS: [(&str, algebra::Func); 15] = [
    ("sin", algebra::Func::Sin),
    ("cos", algebra::Func::Cos),
    ("tan", algebra::Func::Tan),
    ("sinh", algebra::Func::Sinh),
    ("cosh", algebra::Func::Cosh),
    ("tanh", algebra::Func::Tanh),
    ("arcsin", algebra::Func::Asin),
    ("arccos", algebra::Func::Acos),
    ("arctan", algebra::Func::Atan),
    ("arcsinh", algebra::Func::Asinh),
    ("arccosh", algebra::Func::Acosh),
    ("arctanh", algebra::Func::Atanh),
    ("ln", algebra::Func::Log),
    ("log", algebra::Func::Log),
    ("exp", algebra::Func::Exp),
];

const OTHER_COMMANDS: [&str; 15] = [
    "frac", "sqrt", "cdot", "times", "partial", "nabla", "hat", "bar", "tilde", "left", "right",
    "mathop", "mathrm", "operatorname", "pi",
];

const SPACING_COMMANDS: [&str; 2] = ["quad", "qquad"];

/// Token produced by the lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub value: TokenValue<'a>,
    /// Byte offsets of the token in the document.
    pub span: Range<usize>,
}

/// Value of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenValue<'a> {
    /// A recognized macro like `\frac`, without the leading backslash.
    Command(&'a str),
    Letter(char),
    /// A decimal number like `2` or `0.5`.
    Number(&'a str),
    Superscript,
    Subscript,
    BeginGroup,
    EndGroup,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Plus,
    Minus,
    Star,
    Slash,
    Equals,
    Comma,
    Semicolon,
    /// The `\\` line break.
    LineBreak,
}

/// Returns whether the name is a recognized macro.
pub fn is_known_command(name: &str) -> bool {
    known_commands().any(|known| known == name)
}

fn known_commands() -> impl Iterator<Item = &'static str> {
    GREEK_LETTERS
        .into_iter()
        .chain(FUNCTIONS.into_iter().map(|(name, _)| name))
        .chain(OTHER_COMMANDS)
}

/// Lexer for one segment of a document.
pub struct Lexer<'a> {
    /// The full document.
    source: &'a str,
    /// Current position in the document.
    pos: usize,
    /// Exclusive upper bound on the part of the document being lexed.
    end: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer for the part of the document in the given span.
    pub fn new(source: &'a str, span: Range<usize>) -> Self {
        Lexer {
            source,
            pos: span.start,
            end: span.end,
        }
    }

    /// Lexes the segment into a list of tokens.
    pub fn tokenize(mut self) -> Result<Vec<Token<'a>>, Error> {
        let mut tokens = vec![];
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn peek_char(&self) -> Option<char> {
        self.source[self.pos..self.end].chars().next()
    }

    fn next_token(&mut self) -> Result<Option<Token<'a>>, Error> {
        use TokenValue::*;
        loop {
            let start = self.pos;
            let Some(c) = self.peek_char() else {
                return Ok(None);
            };
            self.pos += c.len_utf8();
            let value = match c {
                '&' | '$' => continue,
                c if c.is_whitespace() => continue,
                '\\' => match self.command(start)? {
                    None => continue,
                    Some(value) => value,
                },
                '^' => Superscript,
                '_' => Subscript,
                '{' => BeginGroup,
                '}' => EndGroup,
                '(' => OpenParen,
                ')' => CloseParen,
                '[' => OpenBracket,
                ']' => CloseBracket,
                '+' => Plus,
                '-' => Minus,
                '*' => Star,
                '/' => Slash,
                '=' => Equals,
                ',' => Comma,
                ';' => Semicolon,
                c if c.is_ascii_digit() || c == '.' => self.number(start),
                c if c.is_ascii_alphabetic() => Letter(c),
                c => {
                    return Err(Error::new(
                        ErrorKind::Lex {
                            token: c.to_string(),
                            suggestions: vec![],
                        },
                        start..self.pos,
                    ))
                }
            };
            return Ok(Some(Token {
                value,
                span: start..self.pos,
            }));
        }
    }

    fn number(&mut self, start: usize) -> TokenValue<'a> {
        let mut seen_point = &self.source[start..self.pos] == ".";
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == '.' && !seen_point {
                seen_point = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        TokenValue::Number(&self.source[start..self.pos])
    }

    /// Lexes a control sequence; the backslash has already been consumed.
    ///
    /// Returns `None` for control sequences that are dropped.
    fn command(&mut self, start: usize) -> Result<Option<TokenValue<'a>>, Error> {
        let Some(c) = self.peek_char() else {
            return Err(Error::new(
                ErrorKind::Lex {
                    token: "\\".into(),
                    suggestions: vec![],
                },
                start..self.pos,
            ));
        };
        if !c.is_ascii_alphabetic() {
            self.pos += c.len_utf8();
            return match c {
                '\\' => Ok(Some(TokenValue::LineBreak)),
                ',' | ';' | ':' | '!' => Ok(None),
                c if c.is_whitespace() => Ok(None),
                c => Err(Error::new(
                    ErrorKind::Lex {
                        token: format!["\\{c}"],
                        suggestions: vec![],
                    },
                    start..self.pos,
                )),
            };
        }
        let name_start = self.pos;
        while let Some(c) = self.peek_char() {
            if !c.is_ascii_alphabetic() {
                break;
            }
            self.pos += 1;
        }
        let name = &self.source[name_start..self.pos];
        if name == "begin" || name == "end" {
            self.skip_environment_name();
            return Ok(None);
        }
        if SPACING_COMMANDS.contains(&name) {
            return Ok(None);
        }
        if !is_known_command(name) {
            return Err(Error::new(
                ErrorKind::Lex {
                    token: format!["\\{name}"],
                    suggestions: suggest::close_names(known_commands(), name)
                        .into_iter()
                        .map(|s| format!["\\{s}"])
                        .collect(),
                },
                start..self.pos,
            ));
        }
        Ok(Some(TokenValue::Command(name)))
    }

    /// Skips the `{align*}` after `\begin` or `\end`.
    fn skip_environment_name(&mut self) {
        let rest = &self.source[self.pos..self.end];
        let trimmed = rest.trim_start();
        if !trimmed.starts_with('{') {
            return;
        }
        if let Some(close) = trimmed.find('}') {
            self.pos += rest.len() - trimmed.len() + close + 1;
        }
    }
}
