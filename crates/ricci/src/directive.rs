//! Document segmentation and `%` directives.
//!
//! A document is a sequence of statements.
//! A statement starting with `%` is a directive and runs to the next `;` or line break.
//! Any other statement is an equation; equations are ended by `;`, a line break or `\\`,
//!     provided the terminator is not nested inside braces, brackets or parentheses.
//!
//! The directives are:
//!
//! - `% def [modifiers] name [(n)], ...` declares tensors and scalars.
//! - `% redef ...` re-declares existing names, keeping their values where possible.
//! - `% parse <equation>` lowers an equation.
//! - `% eval name, ...` substitutes already computed values into a tensor.
//! - `% coord [x, y, z]` declares the coordinates.
//! - `% dim n` sets the default dimension.
//!
//! A `%` line with any other keyword is a comment.

use crate::ast::Height;
use crate::connection;
use crate::context::Context;
use crate::error::{Error, Warning};
use crate::lexer::Lexer;
use crate::lower;
use crate::parse;
use crate::permutation;
use crate::table::{self, Origin, Symmetry, TensorDecl, TensorValue};
use algebra::Expr;
use std::ops::Range;

/// Maximum number of substitution passes made by `% eval`.
const MAX_EVAL_PASSES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Statement {
    /// Span of the directive text after the `%`.
    Directive(Range<usize>),
    Equation(Range<usize>),
}

fn statements(source: &str) -> Vec<Statement> {
    let bytes = source.as_bytes();
    let mut statements = vec![];
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b';' => i += 1,
            b if b.is_ascii_whitespace() => i += 1,
            b'\\' if bytes.get(i + 1) == Some(&b'\\') => i += 2,
            b'%' => {
                let end = statement_end(bytes, i + 1, true);
                statements.push(Statement::Directive(i + 1..end));
                i = end;
            }
            _ => {
                let end = statement_end(bytes, i, false);
                statements.push(Statement::Equation(i..end));
                i = end;
            }
        }
    }
    statements
}

fn statement_end(bytes: &[u8], start: usize, directive: bool) -> usize {
    let mut depth = 0_usize;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'{' | b'(' | b'[' => depth += 1,
            b'}' | b')' | b']' => depth = depth.saturating_sub(1),
            b'\\' => {
                if depth == 0 && !directive && bytes.get(i + 1) == Some(&b'\\') {
                    return i;
                }
                // the escaped character
                i += 1;
            }
            b';' | b'\n' if depth == 0 => return i,
            b'%' if depth == 0 && !directive => return i,
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// Runs every statement of a document in order.
pub(crate) fn run(ctx: &mut Context, source: &str) -> Result<(), Error> {
    for statement in statements(source) {
        match statement {
            Statement::Directive(span) => directive(ctx, source, span)?,
            Statement::Equation(span) => equation(ctx, source, span)?,
        }
    }
    Ok(())
}

fn equation(ctx: &mut Context, source: &str, span: Range<usize>) -> Result<(), Error> {
    if Lexer::new(source, span.clone()).tokenize()?.is_empty() {
        return Ok(());
    }
    let equation = parse::parse_equation(source, span, ctx.table())?;
    tracing::debug!(equation = ?equation, "lowering");
    lower::lower_equation(ctx, equation)
}

fn directive(ctx: &mut Context, source: &str, span: Range<usize>) -> Result<(), Error> {
    let span = trim(source, span);
    let text = &source[span.clone()];
    let keyword_len = text
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(text.len());
    let keyword = &text[..keyword_len];
    let rest = trim(source, span.start + keyword_len..span.end);
    tracing::debug!(keyword, "directive");
    match keyword {
        "def" => split_list(source, rest)
            .into_iter()
            .try_for_each(|item| declare(ctx, source, item, false)),
        "redef" => split_list(source, rest)
            .into_iter()
            .try_for_each(|item| declare(ctx, source, item, true)),
        "parse" => {
            let equation = parse::parse_equation(source, rest, ctx.table())?;
            lower::lower_equation(ctx, equation)
        }
        "eval" => split_list(source, rest)
            .into_iter()
            .try_for_each(|item| evaluate(ctx, &source[item.clone()], item)),
        "coord" => coordinates(ctx, source, rest),
        "dim" => {
            let dimension = source[rest.clone()]
                .parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| Error::directive("expected a positive dimension", rest))?;
            ctx.set_dimension(dimension);
            Ok(())
        }
        _ => {
            tracing::trace!(text, "ignoring comment");
            Ok(())
        }
    }
}

/// Removes surrounding whitespace from a span.
fn trim(source: &str, span: Range<usize>) -> Range<usize> {
    let text = &source[span.clone()];
    let start = span.start + (text.len() - text.trim_start().len());
    let end = span.end - (text.len() - text.trim_end().len());
    start..end.max(start)
}

/// Splits a span at top-level commas, dropping empty items.
fn split_list(source: &str, span: Range<usize>) -> Vec<Range<usize>> {
    let mut items = vec![];
    let mut depth = 0_usize;
    let mut start = span.start;
    for (i, c) in source[span.clone()].char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                items.push(trim(source, start..span.start + i));
                start = span.start + i + 1;
            }
            _ => {}
        }
    }
    items.push(trim(source, start..span.end));
    items.retain(|item| !item.is_empty());
    items
}

/// Whitespace separated words of a span.
fn words(source: &str, span: Range<usize>) -> Vec<(&str, Range<usize>)> {
    let mut words = vec![];
    let mut start = None;
    for (i, c) in source[span.clone()].char_indices() {
        let i = span.start + i;
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                words.push((&source[s..i], s..i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        words.push((&source[s..span.end], s..span.end));
    }
    words
}

fn is_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Splits the trailing run of `U` and `D` letters off a name.
///
/// At least one character is always left for the base.
fn split_heights(name: &str) -> (&str, Vec<Height>) {
    let stem = name.trim_end_matches(['U', 'D']);
    let stem = if stem.is_empty() { &name[..1] } else { stem };
    let heights = name[stem.len()..]
        .chars()
        .filter_map(Height::from_letter)
        .collect();
    (stem, heights)
}

/// Runs one item of a `def` or `redef` directive, like `sym01 hDD (4)`.
fn declare(ctx: &mut Context, source: &str, item: Range<usize>, redef: bool) -> Result<(), Error> {
    let text = &source[item.clone()];
    let (words_span, dimension) = match text.find(['(', '[']) {
        None => (item.clone(), None),
        Some(open) => {
            let dimension_span = trim(source, item.start + open + 1..item.end);
            let digits = source[dimension_span.clone()]
                .strip_suffix([')', ']'])
                .map(str::trim);
            let dimension = digits
                .and_then(|d| d.parse::<usize>().ok())
                .filter(|&n| n > 0)
                .ok_or_else(|| {
                    Error::directive(
                        "expected a dimension like `(3)` after the name",
                        dimension_span,
                    )
                })?;
            (item.start..item.start + open, Some(dimension))
        }
    };
    let mut words = words(source, words_span);
    let Some((name, name_span)) = words.pop() else {
        return Err(Error::directive("expected a name to declare", item));
    };
    if !is_name(name) {
        return Err(Error::directive(
            format!["`{name}` is not a valid name"],
            name_span,
        ));
    }
    let mut symmetry = None;
    for (modifier, span) in words {
        let Some(parsed) = Symmetry::from_modifier(modifier) else {
            return Err(Error::directive(
                format!["unknown modifier `{modifier}`"],
                span,
            ));
        };
        if symmetry.replace(parsed).is_some() {
            return Err(Error::directive(
                "a declaration can have at most one symmetry modifier",
                span,
            ));
        }
    }
    let symmetry = symmetry.unwrap_or_default();
    let dimension = match dimension {
        Some(dimension) => dimension,
        None => ctx
            .table()
            .get(name)
            .filter(|_| redef)
            .map_or_else(|| ctx.default_dimension(), |decl| decl.dimension),
    };
    let (base, heights) = split_heights(name);
    let rank = heights.len();
    validate(name, rank, dimension, &symmetry, &name_span)?;

    if !redef && ctx.table().contains(name) {
        ctx.warn(Warning::Override {
            name: name.to_string(),
            span: name_span.clone(),
        });
    }
    tracing::debug!(name, rank, dimension, ?symmetry, redef, "declaring");
    if symmetry == Symmetry::Metric {
        return connection::declare(ctx, name, dimension, redef, &name_span);
    }
    let naming = ctx.config().component_naming;
    let kept = ctx
        .table()
        .get(name)
        .filter(|decl| redef && decl.rank() == rank && (rank == 0 || decl.dimension == dimension))
        .map(|decl| decl.value.clone());
    let value = match (&symmetry, kept) {
        (Symmetry::Permutation, _) => permutation::levi_civita(dimension),
        (Symmetry::Kronecker, _) => permutation::kronecker(dimension),
        (_, Some(mut value)) => {
            value.fill_aliases(&symmetry);
            value
        }
        (_, None) => TensorValue::symbolic(name, rank, dimension, &symmetry, naming),
    };
    ctx.table_mut().insert(
        TensorDecl::new(
            name,
            base,
            heights,
            dimension,
            symmetry,
            value,
            Origin::Declared,
        ),
        naming,
    );
    Ok(())
}

fn validate(
    name: &str,
    rank: usize,
    dimension: usize,
    symmetry: &Symmetry,
    span: &Range<usize>,
) -> Result<(), Error> {
    let reason = match symmetry {
        Symmetry::Const if rank > 0 => Some(format!["the constant `{name}` must be a scalar"]),
        Symmetry::Permutation if rank != dimension => Some(format![
            "the permutation symbol `{name}` must have rank equal to its dimension {dimension}"
        ]),
        Symmetry::Kronecker | Symmetry::Metric if rank != 2 => {
            Some(format!["`{name}` must have exactly two indices"])
        }
        _ => match symmetry.max_slot() {
            Some(slot) if slot >= rank => Some(format![
                "the symmetry refers to index {slot} but `{name}` has rank {rank}"
            ]),
            _ => None,
        },
    };
    let reason = reason.or_else(|| match table::component_count(rank, dimension) {
        Some(_) => None,
        None => Some(format![
            "`{name}` would have more than {} components",
            table::MAX_COMPONENTS
        ]),
    });
    match reason {
        Some(reason) => Err(Error::directive(reason, span.clone())),
        None => Ok(()),
    }
}

/// Substitutes computed values into the components of a tensor until nothing changes.
fn evaluate(ctx: &mut Context, name: &str, span: Range<usize>) -> Result<(), Error> {
    let Some(decl) = ctx.table().get(name) else {
        return Err(ctx.undeclared(name, span));
    };
    let mut value = decl.value.clone();
    for _ in 0..MAX_EVAL_PASSES {
        let next = value.map(|expr| expr.substitute(&mut |symbol: &algebra::Symbol| resolved_value(ctx, symbol.name())));
        if next == value {
            break;
        }
        value = next;
    }
    tracing::debug!(name, "evaluated");
    ctx.table_mut().set_value(name, value);
    Ok(())
}

/// The value of a component symbol, if it differs from the symbol itself.
fn resolved_value(ctx: &Context, symbol: &str) -> Option<Expr> {
    let (owner, index) = ctx.table().component_owner(symbol)?;
    let value = owner.value.get(index)?;
    match value.as_symbol() {
        Some(s) if s.name() == symbol => None,
        _ => Some(value.clone()),
    }
}

fn coordinates(ctx: &mut Context, source: &str, span: Range<usize>) -> Result<(), Error> {
    let text = source[span.clone()]
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']');
    let names: Vec<String> = text
        .split(',')
        .map(|name| name.trim().trim_start_matches('\\').to_string())
        .filter(|name| !name.is_empty())
        .collect();
    if names.is_empty() {
        return Err(Error::directive("expected a list of coordinates", span));
    }
    if let Some(bad) = names.iter().find(|name| !is_name(name)) {
        return Err(Error::directive(
            format!["`{bad}` is not a valid coordinate name"],
            span,
        ));
    }
    tracing::debug!(?names, "coordinates");
    ctx.set_coordinates(names);
    Ok(())
}
