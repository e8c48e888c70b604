//! Recursive-descent parser for equations in the tensor notation.
//!
//! The grammar is, roughly:
//!
//! ```text
//! equation    := lhs '=' expression
//! lhs         := name script*
//! expression  := ['+' | '-'] term (('+' | '-') term)*
//! term        := factor (('*' | '\cdot' | '\times' | '/')? factor)*
//! factor      := '-' factor | primary
//! primary     := atom postfix*
//! postfix     := '^' exponent | '_{,' index+ '}' | '_{;' index+ '}'
//! ```
//!
//! Whether a superscript is an index list or an exponent depends on the declarations:
//!     scripts on a declared tensor are always index lists,
//!     and scripts on other names are index lists only if they mention a named index.
//! Double braces (`x^{{2}}`) always denote an exponent.

use crate::ast::{Derivative, DerivativeKind, Diacritic, Equation, Height, Index, Node, TensorRef};
use crate::error::Error;
use crate::lexer::{Lexer, Token, TokenValue, FUNCTIONS, GREEK_LETTERS};
use crate::table::Table;
use algebra::{Func, Number};
use std::ops::Range;

/// Source of information about which names are tensors.
pub trait Declarations {
    /// Whether a tensor of positive rank has been declared with this base name.
    fn is_tensor(&self, base: &str) -> bool;
}

impl Declarations for Table {
    fn is_tensor(&self, base: &str) -> bool {
        self.is_tensor_base(base)
    }
}

/// Parses the equation in the given span of the document.
pub fn parse_equation(
    source: &str,
    span: Range<usize>,
    declarations: &dyn Declarations,
) -> Result<Equation, Error> {
    let mut parser = Parser::new(source, span, declarations)?;
    let equation = parser.equation()?;
    parser.expect_end()?;
    Ok(equation)
}

/// Parses the expression in the given span of the document.
pub fn parse_expression(
    source: &str,
    span: Range<usize>,
    declarations: &dyn Declarations,
) -> Result<Node, Error> {
    let mut parser = Parser::new(source, span, declarations)?;
    let expression = parser.expression()?;
    parser.expect_end()?;
    Ok(expression)
}

#[derive(Default)]
struct Script {
    indices: Vec<Index>,
    derivatives: Vec<(DerivativeKind, Index, Range<usize>)>,
}

struct Parser<'a, 'd> {
    source: &'a str,
    tokens: Vec<Token<'a>>,
    pos: usize,
    end: usize,
    declarations: &'d dyn Declarations,
}

impl<'a, 'd> Parser<'a, 'd> {
    fn new(
        source: &'a str,
        span: Range<usize>,
        declarations: &'d dyn Declarations,
    ) -> Result<Self, Error> {
        let end = span.end;
        let parser = Parser {
            source,
            tokens: Lexer::new(source, span).tokenize()?,
            pos: 0,
            end,
            declarations,
        };
        parser.check_braces()?;
        Ok(parser)
    }

    /// Reports a `}` without a matching `{` that ends an index script as malformed indexing.
    fn check_braces(&self) -> Result<(), Error> {
        let mut depth = 0_usize;
        for (i, token) in self.tokens.iter().enumerate() {
            match token.value {
                TokenValue::BeginGroup => depth += 1,
                TokenValue::EndGroup if depth > 0 => depth -= 1,
                TokenValue::EndGroup if self.ends_script(i) => {
                    return Err(Error::malformed(
                        "this `}` has no matching `{`",
                        token.span.clone(),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Whether the tokens before position `i` end with a script like `_{ij}` or `^\mu`.
    fn ends_script(&self, i: usize) -> bool {
        use TokenValue::*;
        for token in self.tokens[..i].iter().rev() {
            match token.value {
                Subscript | Superscript => return true,
                Letter(_) | Number(_) | BeginGroup | EndGroup | Comma | Semicolon => {}
                Command(name) if GREEK_LETTERS.contains(&name) => {}
                _ => return false,
            }
        }
        false
    }

    fn peek(&self) -> Option<TokenValue<'a>> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<TokenValue<'a>> {
        self.tokens.get(self.pos + offset).map(|t| t.value)
    }

    fn next(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Span of the next token, or an empty span at the end of the segment.
    fn here(&self) -> Range<usize> {
        match self.tokens.get(self.pos) {
            Some(token) => token.span.clone(),
            None => self.end..self.end,
        }
    }

    fn start(&self) -> usize {
        self.here().start
    }

    fn prev_end(&self) -> usize {
        match self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(token) => token.span.end,
            None => self.start(),
        }
    }

    fn text(&self, span: &Range<usize>) -> &'a str {
        self.source.get(span.clone()).unwrap_or_default()
    }

    fn eat(&mut self, value: TokenValue) -> bool {
        if self.peek() == Some(value) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, value: TokenValue, expected: &str) -> Result<Range<usize>, Error> {
        if self.peek() == Some(value) {
            let span = self.here();
            self.pos += 1;
            Ok(span)
        } else {
            Err(Error::syntax(expected, self.here()))
        }
    }

    fn expect_end(&self) -> Result<(), Error> {
        if self.pos < self.tokens.len() {
            return Err(Error::syntax("the end of the equation", self.here()));
        }
        Ok(())
    }

    fn equation(&mut self) -> Result<Equation, Error> {
        let start = self.start();
        let lhs = self.lhs()?;
        self.expect(TokenValue::Equals, "`=`")?;
        let rhs = self.expression()?;
        Ok(Equation {
            lhs,
            rhs,
            span: start..self.prev_end(),
        })
    }

    fn lhs(&mut self) -> Result<TensorRef, Error> {
        let start = self.start();
        let Some(base) = self.name()? else {
            return Err(Error::syntax(
                "a tensor or scalar name on the left-hand side",
                self.here(),
            ));
        };
        let mut indices = vec![];
        loop {
            self.skip_separator();
            let height = match self.peek() {
                Some(TokenValue::Superscript) => Height::Upper,
                Some(TokenValue::Subscript) => Height::Lower,
                _ => break,
            };
            self.next();
            let script = self.script(height)?;
            if let Some((_, _, span)) = script.derivatives.first() {
                return Err(Error::malformed(
                    "derivatives are not allowed on the left-hand side",
                    span.clone(),
                ));
            }
            indices.extend(script.indices);
        }
        Ok(TensorRef::new(base, indices).with_span(start..self.prev_end()))
    }

    fn expression(&mut self) -> Result<Node, Error> {
        let mut terms = vec![];
        let mut negate = match self.peek() {
            Some(TokenValue::Minus) => {
                self.next();
                true
            }
            Some(TokenValue::Plus) => {
                self.next();
                false
            }
            _ => false,
        };
        loop {
            let term = self.term()?;
            terms.push(if negate { term.negate() } else { term });
            negate = match self.peek() {
                Some(TokenValue::Plus) => false,
                Some(TokenValue::Minus) => true,
                _ => break,
            };
            self.next();
        }
        Ok(Node::sum(terms))
    }

    fn term(&mut self) -> Result<Node, Error> {
        let mut factors = vec![self.factor()?];
        loop {
            match self.peek() {
                Some(TokenValue::Star | TokenValue::Command("cdot") | TokenValue::Command("times")) => {
                    self.next();
                    factors.push(self.factor()?);
                }
                Some(TokenValue::Slash) => {
                    self.next();
                    let denominator = self.factor()?;
                    factors.push(Node::Power(Box::new(denominator), Box::new(Node::integer(-1))));
                }
                _ if self.starts_factor() => factors.push(self.factor()?),
                _ => break,
            }
        }
        Ok(Node::product(factors))
    }

    fn starts_factor(&self) -> bool {
        use TokenValue::*;
        match self.peek() {
            Some(Letter(_) | Number(_) | OpenParen | OpenBracket | BeginGroup) => true,
            Some(Command(name)) => !matches!(name, "right" | "cdot" | "times"),
            _ => false,
        }
    }

    fn factor(&mut self) -> Result<Node, Error> {
        if self.eat(TokenValue::Minus) {
            return Ok(self.factor()?.negate());
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Node, Error> {
        let node = self.atom()?;
        self.postfix(node)
    }

    fn atom(&mut self) -> Result<Node, Error> {
        use TokenValue::*;
        let start = self.start();
        let Some(token) = self.tokens.get(self.pos).cloned() else {
            return Err(Error::syntax("an expression", self.here()));
        };
        match token.value {
            Number(text) => {
                self.next();
                Ok(Node::Number(parse_number(text, token.span)?))
            }
            OpenParen => {
                self.next();
                let inner = self.expression()?;
                self.expect(CloseParen, "`)`")?;
                Ok(inner)
            }
            OpenBracket => {
                self.next();
                let inner = self.expression()?;
                self.expect(CloseBracket, "`]`")?;
                Ok(inner)
            }
            BeginGroup => self.group(),
            Command("left") => {
                self.next();
                if !matches!(self.next().map(|t| t.value), Some(OpenParen | OpenBracket | BeginGroup)) {
                    return Err(Error::syntax("a delimiter after `\\left`", token.span));
                }
                let inner = self.expression()?;
                self.expect(Command("right"), "`\\right`")?;
                if !matches!(self.next().map(|t| t.value), Some(CloseParen | CloseBracket | EndGroup)) {
                    return Err(Error::syntax("a delimiter after `\\right`", self.here()));
                }
                Ok(inner)
            }
            Command("frac") => {
                self.next();
                let numerator = self.group()?;
                let denominator = self.group()?;
                Ok(Node::Product(vec![
                    numerator,
                    Node::Power(Box::new(denominator), Box::new(Node::integer(-1))),
                ]))
            }
            Command("sqrt") => {
                self.next();
                let exponent = if self.eat(OpenBracket) {
                    let root = self.expression()?;
                    self.expect(CloseBracket, "`]`")?;
                    match root {
                        Node::Number(n) if n != algebra::Number::from_integer(0) => Node::Number(n.recip()),
                        root => Node::Power(Box::new(root), Box::new(Node::integer(-1))),
                    }
                } else {
                    Node::Number(algebra::Number::new(1, 2))
                };
                let radicand = self.group()?;
                Ok(Node::Power(Box::new(radicand), Box::new(exponent)))
            }
            Command("partial") => {
                self.next();
                self.derivative_operator(DerivativeKind::Partial, start)
            }
            Command("nabla") => {
                self.next();
                self.derivative_operator(DerivativeKind::Covariant(Diacritic::None), start)
            }
            Command("pi") => {
                self.next();
                Ok(Node::Symbol("pi".into()))
            }
            Command(name) => {
                if let Some(diacritic) = self.diacritic_nabla() {
                    self.pos += match self.peek_at(1) {
                        Some(BeginGroup) => 4,
                        _ => 2,
                    };
                    return self.derivative_operator(DerivativeKind::Covariant(diacritic), start);
                }
                if let Some((_, func)) = FUNCTIONS.iter().find(|(n, _)| *n == name) {
                    self.next();
                    return self.function(*func);
                }
                match self.name()? {
                    Some(base) => self.named(base, start),
                    None => Err(Error::syntax("an expression", token.span)),
                }
            }
            Letter(_) => match self.name()? {
                Some(base) => self.named(base, start),
                None => Err(Error::syntax("an expression", token.span)),
            },
            _ => Err(Error::syntax("an expression", token.span)),
        }
    }

    /// Parses a braced group as an expression.
    fn group(&mut self) -> Result<Node, Error> {
        let open = self.expect(TokenValue::BeginGroup, "`{`")?;
        if self.peek() == Some(TokenValue::EndGroup) {
            return Err(Error::syntax("an expression", open.start..self.here().end));
        }
        let inner = self.expression()?;
        self.expect(TokenValue::EndGroup, "`}`")?;
        Ok(inner)
    }

    fn postfix(&mut self, mut node: Node) -> Result<Node, Error> {
        let start = self.prev_end();
        loop {
            match self.peek() {
                Some(TokenValue::Superscript) => {
                    self.next();
                    let exponent = self.exponent()?;
                    node = Node::Power(Box::new(node), Box::new(exponent));
                }
                Some(TokenValue::Subscript) => {
                    let at = self.here();
                    self.next();
                    let script = self.script(Height::Lower)?;
                    if !script.indices.is_empty() {
                        return Err(Error::malformed(
                            "only derivative indices may follow an expression",
                            at.start..self.prev_end(),
                        ));
                    }
                    node = apply_derivatives(node, script.derivatives, start);
                }
                _ => return Ok(node),
            }
        }
    }

    fn exponent(&mut self) -> Result<Node, Error> {
        use TokenValue::*;
        if self.peek() == Some(BeginGroup) {
            return self.group();
        }
        let Some(token) = self.next() else {
            return Err(Error::syntax("an exponent", self.here()));
        };
        match token.value {
            Number(text) => Ok(Node::Number(parse_number(text, token.span)?)),
            Letter(c) => Ok(Node::Symbol(c.to_string())),
            Command("pi") => Ok(Node::Symbol("pi".into())),
            Command(name) if GREEK_LETTERS.contains(&name) => Ok(Node::Symbol(name.to_string())),
            _ => Err(Error::syntax("an exponent", token.span)),
        }
    }

    fn function(&mut self, func: Func) -> Result<Node, Error> {
        let mut func = func;
        let mut power = None;
        if self.eat(TokenValue::Superscript) {
            match self.exponent()? {
                Node::Number(n) if n == Number::from_integer(-1) => func = func.inverse(),
                exponent => power = Some(exponent),
            }
        }
        let argument = match self.peek() {
            Some(TokenValue::OpenParen | TokenValue::Command("left") | TokenValue::BeginGroup) => {
                self.atom()?
            }
            _ => self.primary()?,
        };
        let node = Node::Function(func, Box::new(argument));
        Ok(match power {
            None => node,
            Some(power) => Node::Power(Box::new(node), Box::new(power)),
        })
    }

    /// Parses `\partial_\mu E`, `\nabla^\nu E` and friends; the macro has been consumed.
    fn derivative_operator(&mut self, kind: DerivativeKind, start: usize) -> Result<Node, Error> {
        let height = match self.peek() {
            Some(TokenValue::Subscript) => Height::Lower,
            Some(TokenValue::Superscript) => Height::Upper,
            _ => {
                return Err(Error::malformed(
                    "a derivative operator needs an index",
                    start..self.prev_end(),
                ))
            }
        };
        self.next();
        let script = self.script(height)?;
        if script.indices.is_empty() || !script.derivatives.is_empty() {
            return Err(Error::malformed(
                "a derivative operator needs a list of indices",
                start..self.prev_end(),
            ));
        }
        let span = start..self.prev_end();
        let mut node = self.primary()?;
        for index in script.indices.into_iter().rev() {
            node = Node::derivative(kind, index, node, span.start..self.prev_end());
        }
        Ok(node)
    }

    /// Returns the diacritic if the cursor is at `\hat\nabla` or `\hat{\nabla}`.
    fn diacritic_nabla(&self) -> Option<Diacritic> {
        let Some(TokenValue::Command(name)) = self.peek() else {
            return None;
        };
        let diacritic = Diacritic::from_macro(name)?;
        let nabla = match self.peek_at(1) {
            Some(TokenValue::BeginGroup) => {
                self.peek_at(2) == Some(TokenValue::Command("nabla"))
                    && self.peek_at(3) == Some(TokenValue::EndGroup)
            }
            next => next == Some(TokenValue::Command("nabla")),
        };
        nabla.then_some(diacritic)
    }

    /// Parses a name: a letter, a Greek macro, `\mathop{...}`, or a diacritic applied to a name.
    fn name(&mut self) -> Result<Option<String>, Error> {
        use TokenValue::*;
        let Some(token) = self.tokens.get(self.pos).cloned() else {
            return Ok(None);
        };
        match token.value {
            Letter(c) => {
                self.next();
                Ok(Some(c.to_string()))
            }
            Command(name) if GREEK_LETTERS.contains(&name) => {
                self.next();
                Ok(Some(name.to_string()))
            }
            Command("mathop" | "mathrm" | "operatorname") => {
                self.next();
                let open = self.expect(BeginGroup, "`{`")?;
                let mut close = None;
                while let Some(inner) = self.next() {
                    if inner.value == EndGroup {
                        close = Some(inner.span);
                        break;
                    }
                }
                let Some(close) = close else {
                    return Err(Error::syntax("`}`", self.here()));
                };
                let name: String = self
                    .text(&(open.end..close.start))
                    .chars()
                    .filter(|c| !c.is_whitespace() && *c != '\\')
                    .collect();
                if name.is_empty() {
                    return Err(Error::syntax("a name", open.start..close.end));
                }
                Ok(Some(name))
            }
            Command(name) => {
                let Some(diacritic) = Diacritic::from_macro(name) else {
                    return Ok(None);
                };
                if self.diacritic_nabla().is_some() {
                    return Ok(None);
                }
                self.next();
                let braced = self.eat(BeginGroup);
                let Some(stem) = self.name()? else {
                    return Err(Error::syntax(
                        format!["a name after `\\{name}`"],
                        self.here(),
                    ));
                };
                if braced {
                    self.expect(EndGroup, "`}`")?;
                }
                Ok(Some(format!["{stem}{}", diacritic.suffix()]))
            }
            _ => Ok(None),
        }
    }

    /// Parses the scripts following a name.
    fn named(&mut self, base: String, start: usize) -> Result<Node, Error> {
        let is_tensor = self.declarations.is_tensor(&base);
        if base == "e" && !is_tensor && self.peek() == Some(TokenValue::Superscript) {
            self.next();
            let exponent = self.exponent()?;
            return Ok(Node::Function(Func::Exp, Box::new(exponent)));
        }
        let mut indices = vec![];
        let mut derivatives = vec![];
        loop {
            self.skip_separator();
            let height = match self.peek() {
                Some(TokenValue::Subscript) => Height::Lower,
                Some(TokenValue::Superscript) => {
                    let (index_like, named) = self.classify_script(self.pos + 1);
                    if !index_like || !(is_tensor || named) {
                        break;
                    }
                    Height::Upper
                }
                _ => break,
            };
            self.next();
            let script = self.script(height)?;
            indices.extend(script.indices);
            derivatives.extend(script.derivatives);
        }
        let node = if indices.is_empty() {
            Node::Symbol(base)
        } else {
            Node::Tensor(TensorRef::new(base, indices).with_span(start..self.prev_end()))
        };
        Ok(apply_derivatives(node, derivatives, start))
    }

    /// Skips an empty group `{}` used to separate scripts, as in `h^\mu{}_\mu`.
    fn skip_separator(&mut self) {
        if self.peek() == Some(TokenValue::BeginGroup)
            && self.peek_at(1) == Some(TokenValue::EndGroup)
            && matches!(
                self.peek_at(2),
                Some(TokenValue::Superscript | TokenValue::Subscript)
            )
        {
            self.pos += 2;
        }
    }

    /// Decides whether the script argument at the position reads as an index list.
    ///
    /// Returns whether it does, and whether it mentions a named index.
    fn classify_script(&self, pos: usize) -> (bool, bool) {
        use TokenValue::*;
        let is_digits = |text: &str| text.chars().all(|c| c.is_ascii_digit());
        match self.tokens.get(pos).map(|t| t.value) {
            Some(Letter(_)) => (true, true),
            Some(Command(name)) if GREEK_LETTERS.contains(&name) => (true, true),
            Some(Number(text)) => (is_digits(text), false),
            Some(BeginGroup) => {
                let mut named = false;
                for token in &self.tokens[pos + 1..] {
                    match token.value {
                        EndGroup => return (true, named),
                        Letter(_) => named = true,
                        Command(name) if GREEK_LETTERS.contains(&name) => named = true,
                        Number(text) if is_digits(text) => {}
                        Comma | Semicolon => {}
                        _ => return (false, false),
                    }
                }
                (true, named)
            }
            _ => (false, false),
        }
    }

    /// Parses a script argument as an index list; the `^` or `_` has been consumed.
    ///
    /// Indices after a `,` or `;` are derivative indices.
    fn script(&mut self, height: Height) -> Result<Script, Error> {
        use TokenValue::*;
        let mut script = Script::default();
        let Some(token) = self.next() else {
            return Err(Error::malformed("a script needs an index", self.here()));
        };
        if token.value != BeginGroup {
            self.push_index(&mut script, None, height, &token)?;
            return Ok(script);
        }
        let open = token.span;
        let mut kind = None;
        loop {
            let Some(token) = self.next() else {
                return Err(Error::malformed(
                    "the index group is not terminated",
                    open.start..self.end,
                ));
            };
            match token.value {
                EndGroup => return Ok(script),
                Comma => kind = Some(DerivativeKind::Partial),
                Semicolon => kind = Some(DerivativeKind::Covariant(Diacritic::None)),
                _ => self.push_index(&mut script, kind, height, &token)?,
            }
        }
    }

    fn push_index(
        &self,
        script: &mut Script,
        kind: Option<DerivativeKind>,
        height: Height,
        token: &Token,
    ) -> Result<(), Error> {
        let indices: Vec<Index> = match token.value {
            TokenValue::Letter(c) => vec![Index::named(c.to_string(), height)],
            TokenValue::Command(name) if GREEK_LETTERS.contains(&name) => {
                vec![Index::named(name, height)]
            }
            TokenValue::Number(text) if text.chars().all(|c| c.is_ascii_digit()) => text
                .chars()
                .filter_map(|c| c.to_digit(10))
                .map(|d| Index::fixed(d as usize, height))
                .collect(),
            _ => {
                return Err(Error::malformed(
                    format!["`{}` is not an index", self.text(&token.span)],
                    token.span.clone(),
                ))
            }
        };
        for index in indices {
            match kind {
                None => script.indices.push(index),
                Some(kind) => script.derivatives.push((kind, index, token.span.clone())),
            }
        }
        Ok(())
    }
}

fn apply_derivatives(
    mut node: Node,
    derivatives: Vec<(DerivativeKind, Index, Range<usize>)>,
    start: usize,
) -> Node {
    for (kind, index, span) in derivatives {
        node = Node::Derivative(Box::new(Derivative {
            kind,
            index,
            operand: node,
            dimension: None,
            span: start..span.end,
        }));
    }
    node
}

/// Converts a decimal literal to an exact rational number.
fn parse_number(text: &str, span: Range<usize>) -> Result<Number, Error> {
    let overflow = || Error::syntax("a number with at most 18 significant digits", span.clone());
    let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
    let mut numerator: i64 = 0;
    let mut denominator: i64 = 1;
    for (i, c) in whole.chars().chain(fraction.chars()).enumerate() {
        let digit = c.to_digit(10).ok_or_else(overflow)? as i64;
        numerator = numerator
            .checked_mul(10)
            .and_then(|n| n.checked_add(digit))
            .ok_or_else(overflow)?;
        if i >= whole.len() {
            denominator = denominator.checked_mul(10).ok_or_else(overflow)?;
        }
    }
    Ok(Number::new(numerator, denominator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    struct Tensors(&'static [&'static str]);

    impl Declarations for Tensors {
        fn is_tensor(&self, base: &str) -> bool {
            self.0.contains(&base)
        }
    }

    const DECLARED: Tensors = Tensors(&["T", "v", "w", "g", "ghat", "h", "F", "epsilon"]);

    fn expression(source: &str) -> Result<Node, Error> {
        parse_expression(source, 0..source.len(), &DECLARED)
    }

    fn equation(source: &str) -> Result<Equation, Error> {
        parse_equation(source, 0..source.len(), &DECLARED)
    }

    macro_rules! round_trip_tests {
        ( $( ($name: ident, $source: expr, $want: expr), )+ ) => {
            $(
            #[test]
            fn $name() {
                let node = expression($source).unwrap();
                assert_eq!(node.to_string(), $want);
            }
            )+
        };
    }

    round_trip_tests!(
        (index_groups, r"T^{\mu\nu}_{\ k}", r"T^{\mu \nu}_k"),
        (separator_group, r"h^\mu{}_\mu", r"h^\mu_\mu"),
        (scalar_power, r"x^2", r"x^{2}"),
        (forced_exponent, r"r^{{2}}", r"r^{2}"),
        (nested_nabla, r"\nabla_a \nabla_b v^\mu", r"\nabla_a \nabla_b v^\mu"),
        (comma_derivative, r"v_{i,j}", r"\partial_j v_i"),
        (
            comma_derivative_of_product,
            r"(v^i w^j)_{,k}",
            r"\partial_k (v^i (w^j))"
        ),
        (hat_nabla, r"\hat{\nabla}_\nu F^{\mu\nu}", r"\hat{\nabla}_\nu F^{\mu \nu}"),
        (hat_nabla_unbraced, r"\hat\nabla_\nu F^{\mu\nu}", r"\hat{\nabla}_\nu F^{\mu \nu}"),
        (hat_tensor, r"\hat{g}_{ij}", r"\hat{g}_{i j}"),
        (inverse_function, r"\sin^{-1} y", r"\arcsin(y)"),
        (multi_character_name, r"\mathop{r_s}", r"r_s"),
        (repeated_partial, r"\partial_{ab} f", r"\partial_a \partial_b f"),
    );

    #[test]
    fn tensor_names_carry_heights() {
        let Node::Tensor(t) = expression(r"\hat{g}_{ij}").unwrap() else {
            panic!("expected a tensor");
        };
        assert_eq!(t.name, "ghatDD");
        assert_eq!(t.base, "ghat");
        assert_eq!(t.span, 0..12);
    }

    #[test]
    fn greek_tensor_name() {
        let Node::Tensor(t) = expression(r"\epsilon_{ijk}").unwrap() else {
            panic!("expected a tensor");
        };
        assert_eq!(t.name, "epsilonDDD");
    }

    #[test]
    fn fixed_indices_on_left_hand_side() {
        let eq = equation(r"g^{0 0} = -1").unwrap();
        assert_eq!(eq.lhs.name, "gUU");
        assert_eq!(
            eq.lhs.indices,
            vec![Index::fixed(0, Height::Upper), Index::fixed(0, Height::Upper)]
        );
        assert_eq!(eq.rhs, Node::integer(-1));
    }

    #[test]
    fn undeclared_left_hand_side_scripts_are_indices() {
        let eq = equation(r"u_i = v_i").unwrap();
        assert_eq!(eq.lhs.name, "uD");
    }

    #[test]
    fn digits_on_undeclared_name_are_exponent() {
        let node = expression(r"r^2").unwrap();
        assert_eq!(
            node,
            Node::Power(Box::new(Node::Symbol("r".into())), Box::new(Node::integer(2)))
        );
    }

    #[test]
    fn letters_on_undeclared_name_are_indices() {
        let Node::Tensor(t) = expression(r"u^i").unwrap() else {
            panic!("expected a tensor");
        };
        assert_eq!(t.name, "uU");
    }

    #[test]
    fn decimal_numbers_are_exact() {
        assert_eq!(expression("0.25").unwrap(), Node::Number(Number::new(1, 4)));
    }

    #[test]
    fn exponential() {
        let node = expression(r"e^{\ln x}").unwrap();
        assert_eq!(node.to_string(), r"\exp(\ln(x))");
    }

    #[test]
    fn fraction_and_root() {
        let node = expression(r"\frac{2}{3}\sqrt[5]{x}").unwrap();
        let Node::Product(factors) = node else {
            panic!("expected a product");
        };
        assert_eq!(factors.len(), 2);
        assert_eq!(
            factors[1],
            Node::Power(
                Box::new(Node::Symbol("x".into())),
                Box::new(Node::Number(Number::new(1, 5)))
            )
        );
    }

    #[test]
    fn upper_derivative_index() {
        let Node::Derivative(d) = expression(r"\nabla^\nu v^\mu").unwrap() else {
            panic!("expected a derivative");
        };
        assert_eq!(d.index, Index::upper("nu"));
        assert_eq!(d.kind, DerivativeKind::Covariant(Diacritic::None));
    }

    macro_rules! error_tests {
        ( $( ($name: ident, $source: expr, $kind: pat), )+ ) => {
            $(
            #[test]
            fn $name() {
                let source = $source;
                let result = parse_equation(source, 0..source.len(), &DECLARED);
                let err = result.unwrap_err();
                assert!(matches!(err.kind(), $kind), "unexpected error {:?}", err);
            }
            )+
        };
    }

    error_tests!(
        (derivative_without_index, r"x = \partial f", ErrorKind::MalformedIndexing { .. }),
        (unterminated_index_group, r"x = v^{i", ErrorKind::MalformedIndexing { .. }),
        (number_as_index, r"x = v_{1.5}", ErrorKind::MalformedIndexing { .. }),
        (dangling_operator, r"x = y +", ErrorKind::Syntax { .. }),
        (missing_left_hand_side, r"= x", ErrorKind::Syntax { .. }),
        (missing_equals, r"x y", ErrorKind::Syntax { .. }),
        (unknown_macro, r"x = \foo", ErrorKind::Lex { .. }),
        (unbalanced_paren, r"x = (a + b", ErrorKind::Syntax { .. }),
        (unmatched_brace_after_index_group, r"w^{i}} = v^i", ErrorKind::MalformedIndexing { .. }),
        (unmatched_brace_after_index, r"w^i = v^i}", ErrorKind::MalformedIndexing { .. }),
        (unmatched_brace_after_sum, r"x = a + b}", ErrorKind::Syntax { .. }),
    );
}
