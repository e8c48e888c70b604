//! Index-level expression trees.
//!
//! The parser produces these trees and the later passes rewrite them:
//!     covariant derivatives are expanded into partial derivatives and connection terms,
//!     and repeated indices are turned into explicit [`Contraction`] nodes.
//! The [`Display`](std::fmt::Display) implementations render trees back to LaTeX.

use crate::lexer::GREEK_LETTERS;
use algebra::{Func, Number};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

/// Height of an index slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Height {
    /// Contravariant index, written as a superscript.
    Upper,
    /// Covariant index, written as a subscript.
    Lower,
}

impl Height {
    /// The letter used for this height in tensor names.
    pub fn letter(self) -> char {
        match self {
            Height::Upper => 'U',
            Height::Lower => 'D',
        }
    }

    pub fn from_letter(c: char) -> Option<Height> {
        match c {
            'U' => Some(Height::Upper),
            'D' => Some(Height::Lower),
            _ => None,
        }
    }

    pub fn flip(self) -> Height {
        match self {
            Height::Upper => Height::Lower,
            Height::Lower => Height::Upper,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexValue {
    /// An index variable like `\mu` or `i`.
    Name(String),
    /// A concrete component like the `0` in `g^{0 0}`.
    Fixed(usize),
}

/// An index in a tensor reference or derivative operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Index {
    pub value: IndexValue,
    pub height: Height,
}

impl Index {
    pub fn named(name: impl Into<String>, height: Height) -> Index {
        Index {
            value: IndexValue::Name(name.into()),
            height,
        }
    }

    pub fn upper(name: impl Into<String>) -> Index {
        Index::named(name, Height::Upper)
    }

    pub fn lower(name: impl Into<String>) -> Index {
        Index::named(name, Height::Lower)
    }

    pub fn fixed(value: usize, height: Height) -> Index {
        Index {
            value: IndexValue::Fixed(value),
            height,
        }
    }

    /// The name of the index variable, or `None` for a concrete component.
    pub fn name(&self) -> Option<&str> {
        match &self.value {
            IndexValue::Name(name) => Some(name),
            IndexValue::Fixed(_) => None,
        }
    }

    /// Renders the index as it appears in error messages, e.g. `^mu`.
    pub(crate) fn describe(&self) -> String {
        let marker = match self.height {
            Height::Upper => '^',
            Height::Lower => '_',
        };
        match &self.value {
            IndexValue::Name(name) => format!["{marker}{name}"],
            IndexValue::Fixed(n) => format!["{marker}{n}"],
        }
    }
}

/// Connection namespace of a covariant derivative or metric.
///
/// Each namespace has its own metric (`gDD`, `ghatDD`, ...) and its own
/// connection (`GammaUDD`, `GammahatUDD`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Diacritic {
    #[default]
    None,
    Hat,
    Bar,
    Tilde,
}

impl Diacritic {
    /// Suffix appended to names in this namespace.
    pub fn suffix(self) -> &'static str {
        match self {
            Diacritic::None => "",
            Diacritic::Hat => "hat",
            Diacritic::Bar => "bar",
            Diacritic::Tilde => "tilde",
        }
    }

    pub fn from_macro(name: &str) -> Option<Diacritic> {
        match name {
            "hat" => Some(Diacritic::Hat),
            "bar" => Some(Diacritic::Bar),
            "tilde" => Some(Diacritic::Tilde),
            _ => None,
        }
    }

    /// Splits a diacritic suffix off a base name: `ghat` becomes `(g, Hat)`.
    ///
    /// Only a single letter or a Greek letter can carry a diacritic,
    ///     so `combat` keeps its name.
    pub fn split(base: &str) -> (&str, Diacritic) {
        for diacritic in [Diacritic::Hat, Diacritic::Bar, Diacritic::Tilde] {
            if let Some(stem) = base.strip_suffix(diacritic.suffix()) {
                let mut chars = stem.chars();
                let letter = matches!(
                    (chars.next(), chars.next()),
                    (Some(c), None) if c.is_ascii_alphabetic()
                );
                if letter || GREEK_LETTERS.contains(&stem) {
                    return (stem, diacritic);
                }
            }
        }
        (base, Diacritic::None)
    }

    /// Name of the connection in this namespace.
    pub fn connection_name(self) -> String {
        format!["Gamma{}UDD", self.suffix()]
    }
}

/// A reference to a tensor with a list of indices, like `T^{\mu\nu}_k`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorRef {
    /// Name of the tensor in the declaration table, e.g. `TUUD`.
    pub name: String,
    /// Base name used for rendering, e.g. `T`.
    pub base: String,
    pub indices: Vec<Index>,
    pub span: Range<usize>,
}

impl TensorRef {
    /// Creates a reference whose name is the base followed by one letter per index height.
    pub fn new(base: impl Into<String>, indices: Vec<Index>) -> TensorRef {
        let base = base.into();
        let mut name = base.clone();
        name.extend(indices.iter().map(|i| i.height.letter()));
        TensorRef {
            name,
            base,
            indices,
            span: 0..0,
        }
    }

    /// Creates a reference to a tensor whose name does not follow the base-and-heights pattern.
    pub fn with_name(name: impl Into<String>, indices: Vec<Index>) -> TensorRef {
        let name = name.into();
        TensorRef {
            base: name.clone(),
            name,
            indices,
            span: 0..0,
        }
    }

    pub fn with_span(mut self, span: Range<usize>) -> TensorRef {
        self.span = span;
        self
    }

    pub fn rank(&self) -> usize {
        self.indices.len()
    }

    /// Whether the name is the base followed by the index heights.
    pub(crate) fn has_conventional_name(&self) -> bool {
        self.name.len() == self.base.len() + self.indices.len()
            && self.name.starts_with(&self.base)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivativeKind {
    Partial,
    Covariant(Diacritic),
}

/// A derivative operator applied to an operand, like `\nabla_\beta T^\mu`.
#[derive(Debug, Clone, PartialEq)]
pub struct Derivative {
    pub kind: DerivativeKind,
    pub index: Index,
    pub operand: Node,
    /// Range of the derivative index, filled in during index resolution.
    pub dimension: Option<usize>,
    pub span: Range<usize>,
}

/// An explicit sum of the body over all values of a bound index.
#[derive(Debug, Clone, PartialEq)]
pub struct Contraction {
    pub index: String,
    pub dimension: usize,
    pub body: Node,
}

/// Node in an index-level expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Number(Number),
    /// A scalar: a constant, a coordinate, or a previously defined rank-0 quantity.
    Symbol(String),
    Tensor(TensorRef),
    Derivative(Box<Derivative>),
    Sum(Vec<Node>),
    Product(Vec<Node>),
    Power(Box<Node>, Box<Node>),
    Function(Func, Box<Node>),
    /// Only appears after summation expansion.
    Contraction(Box<Contraction>),
}

impl Node {
    pub fn integer(n: i64) -> Node {
        Node::Number(Number::from_integer(n))
    }

    pub fn derivative(kind: DerivativeKind, index: Index, operand: Node, span: Range<usize>) -> Node {
        Node::Derivative(Box::new(Derivative {
            kind,
            index,
            operand,
            dimension: None,
            span,
        }))
    }

    pub fn negate(self) -> Node {
        match self {
            Node::Number(n) => Node::Number(-n),
            other => Node::Product(vec![Node::integer(-1), other]),
        }
    }

    /// Product of the factors, or the single factor itself.
    pub fn product(mut factors: Vec<Node>) -> Node {
        if factors.len() == 1 {
            factors.swap_remove(0)
        } else {
            Node::Product(factors)
        }
    }

    /// Sum of the terms, or the single term itself.
    pub fn sum(mut terms: Vec<Node>) -> Node {
        if terms.len() == 1 {
            terms.swap_remove(0)
        } else {
            Node::Sum(terms)
        }
    }

    /// All index variable names appearing anywhere in the tree.
    pub fn index_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_index_names(&mut names);
        names
    }

    fn collect_index_names(&self, names: &mut BTreeSet<String>) {
        match self {
            Node::Number(_) | Node::Symbol(_) => {}
            Node::Tensor(t) => {
                names.extend(t.indices.iter().filter_map(Index::name).map(str::to_string))
            }
            Node::Derivative(d) => {
                if let Some(name) = d.index.name() {
                    names.insert(name.to_string());
                }
                d.operand.collect_index_names(names);
            }
            Node::Sum(children) | Node::Product(children) => {
                for child in children {
                    child.collect_index_names(names);
                }
            }
            Node::Power(base, exponent) => {
                base.collect_index_names(names);
                exponent.collect_index_names(names);
            }
            Node::Function(_, arg) => arg.collect_index_names(names),
            Node::Contraction(c) => {
                names.insert(c.index.clone());
                c.body.collect_index_names(names);
            }
        }
    }

    /// Renames every free occurrence of an index variable.
    pub fn rename_index(&mut self, from: &str, to: &str) {
        let rename = |index: &mut Index| {
            if index.name() == Some(from) {
                index.value = IndexValue::Name(to.to_string());
            }
        };
        match self {
            Node::Number(_) | Node::Symbol(_) => {}
            Node::Tensor(t) => t.indices.iter_mut().for_each(rename),
            Node::Derivative(d) => {
                rename(&mut d.index);
                d.operand.rename_index(from, to);
            }
            Node::Sum(children) | Node::Product(children) => {
                for child in children {
                    child.rename_index(from, to);
                }
            }
            Node::Power(base, exponent) => {
                base.rename_index(from, to);
                exponent.rename_index(from, to);
            }
            Node::Function(_, arg) => arg.rename_index(from, to),
            Node::Contraction(c) => {
                if c.index != from {
                    c.body.rename_index(from, to);
                }
            }
        }
    }

    fn is_negative_term(&self) -> bool {
        match self {
            Node::Number(n) => *n < Number::from_integer(0),
            Node::Product(factors) => {
                matches!(factors.first(), Some(Node::Number(n)) if *n < Number::from_integer(0))
            }
            _ => false,
        }
    }
}

/// An equation `lhs = rhs`.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    pub lhs: TensorRef,
    pub rhs: Node,
    pub span: Range<usize>,
}

fn write_name(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if GREEK_LETTERS.contains(&name) || name == "pi" {
        return write!(f, "\\{name}");
    }
    match Diacritic::split(name) {
        (_, Diacritic::None) => write!(f, "{name}"),
        (stem, diacritic) => {
            write!(f, "\\{}{{", diacritic.suffix())?;
            write_name(f, stem)?;
            write!(f, "}}")
        }
    }
}

fn write_index(f: &mut fmt::Formatter<'_>, index: &Index) -> fmt::Result {
    match &index.value {
        IndexValue::Name(name) => write_name(f, name),
        IndexValue::Fixed(n) => write!(f, "{n}"),
    }
}

fn write_script(f: &mut fmt::Formatter<'_>, height: Height, indices: &[&Index]) -> fmt::Result {
    match height {
        Height::Upper => write!(f, "^")?,
        Height::Lower => write!(f, "_")?,
    }
    if let [index] = indices {
        return write_index(f, index);
    }
    write!(f, "{{")?;
    for (i, index) in indices.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write_index(f, index)?;
    }
    write!(f, "}}")
}

impl fmt::Display for TensorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_name(f, &self.base)?;
        let mut runs: Vec<(Height, Vec<&Index>)> = vec![];
        for index in &self.indices {
            match runs.last_mut() {
                Some((height, run)) if *height == index.height => run.push(index),
                _ => runs.push((index.height, vec![index])),
            }
        }
        for (i, (height, run)) in runs.iter().enumerate() {
            // A third script on the same base needs an empty group before it.
            if i >= 2 {
                write!(f, "{{}}")?;
            }
            write_script(f, *height, run)?;
        }
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Number(n) => {
                if n.is_integer() {
                    write!(f, "{}", n.numer())
                } else {
                    write!(f, "\\frac{{{}}}{{{}}}", n.numer(), n.denom())
                }
            }
            Node::Symbol(name) => write_name(f, name),
            Node::Tensor(t) => write!(f, "{t}"),
            Node::Derivative(d) => {
                match d.kind {
                    DerivativeKind::Partial => write!(f, "\\partial")?,
                    DerivativeKind::Covariant(Diacritic::None) => write!(f, "\\nabla")?,
                    DerivativeKind::Covariant(diacritic) => {
                        write!(f, "\\{}{{\\nabla}}", diacritic.suffix())?
                    }
                }
                write_script(f, d.index.height, &[&d.index])?;
                match &d.operand {
                    Node::Tensor(_) | Node::Derivative(_) | Node::Symbol(_) => {
                        write!(f, " {}", d.operand)
                    }
                    other => write!(f, " ({other})"),
                }
            }
            Node::Sum(terms) => {
                for (i, term) in terms.iter().enumerate() {
                    let negative = term.is_negative_term();
                    match (i, negative) {
                        (0, true) => write!(f, "-")?,
                        (0, false) => {}
                        (_, true) => write!(f, " - ")?,
                        (_, false) => write!(f, " + ")?,
                    }
                    if negative {
                        write!(f, "{}", term.clone().negate_term())?;
                    } else {
                        write!(f, "{term}")?;
                    }
                }
                Ok(())
            }
            Node::Product(factors) => {
                let mut seen_operand = false;
                let mut need_space = false;
                for (i, factor) in factors.iter().enumerate() {
                    if let Node::Number(n) = factor {
                        if i == 0 && *n == Number::from_integer(-1) && factors.len() > 1 {
                            write!(f, "-")?;
                            continue;
                        }
                    }
                    if need_space {
                        write!(f, " ")?;
                    }
                    need_space = true;
                    match factor {
                        Node::Sum(_) => write!(f, "({factor})")?,
                        Node::Tensor(_) | Node::Derivative(_) if seen_operand => {
                            write!(f, "({factor})")?
                        }
                        _ => write!(f, "{factor}")?,
                    }
                    if !matches!(factor, Node::Number(_)) {
                        seen_operand = true;
                    }
                }
                Ok(())
            }
            Node::Power(base, exponent) => {
                match base.as_ref() {
                    Node::Symbol(_) | Node::Tensor(_) => write!(f, "{base}")?,
                    Node::Number(n) if n.is_integer() && *n >= Number::from_integer(0) => {
                        write!(f, "{base}")?
                    }
                    _ => write!(f, "({base})")?,
                }
                write!(f, "^{{{exponent}}}")
            }
            Node::Function(func, arg) => {
                let name = match func {
                    Func::Asin => "arcsin",
                    Func::Acos => "arccos",
                    Func::Atan => "arctan",
                    Func::Asinh => "arcsinh",
                    Func::Acosh => "arccosh",
                    Func::Atanh => "arctanh",
                    Func::Log => "ln",
                    other => other.name(),
                };
                write!(f, "\\{name}({arg})")
            }
            Node::Contraction(c) => {
                write!(
                    f,
                    "\\sum_{{{}=0}}^{{{}}} ({})",
                    c.index,
                    c.dimension.saturating_sub(1),
                    c.body
                )
            }
        }
    }
}

impl Node {
    /// Negates a term whose leading coefficient is negative, for rendering after ` - `.
    fn negate_term(self) -> Node {
        match self {
            Node::Number(n) => Node::Number(-n),
            Node::Product(mut factors) => {
                if let Some(Node::Number(n)) = factors.first() {
                    let n = -*n;
                    if n == Number::from_integer(1) {
                        factors.remove(0);
                    } else {
                        factors[0] = Node::Number(n);
                    }
                }
                Node::product(factors)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! display_tests {
        ( $( ($name: ident, $node: expr, $want: expr), )+ ) => {
            $(
            #[test]
            fn $name() {
                let node: Node = $node;
                assert_eq!(node.to_string(), $want);
            }
            )+
        };
    }

    fn t(base: &str, indices: Vec<Index>) -> Node {
        Node::Tensor(TensorRef::new(base, indices))
    }

    display_tests!(
        (
            single_upper_index,
            t("v", vec![Index::upper("mu")]),
            r"v^\mu"
        ),
        (
            grouped_indices,
            t("T", vec![Index::upper("mu"), Index::upper("nu"), Index::lower("k")]),
            r"T^{\mu \nu}_k"
        ),
        (
            third_script_gets_separator,
            t("R", vec![Index::upper("a"), Index::lower("b"), Index::upper("c")]),
            r"R^a_b{}^c"
        ),
        (
            hat_base,
            t("ghat", vec![Index::lower("a"), Index::lower("b")]),
            r"\hat{g}_{a b}"
        ),
        (
            connection_term,
            Node::Product(vec![
                t("Gamma", vec![Index::upper("mu"), Index::lower("a"), Index::lower("beta")]),
                t("T", vec![Index::upper("a")]),
            ]),
            r"\Gamma^\mu_{a \beta} (T^a)"
        ),
        (
            negative_connection_term,
            Node::Sum(vec![
                t("x", vec![Index::lower("b")]),
                Node::Product(vec![
                    Node::integer(-1),
                    t("Gamma", vec![Index::upper("a"), Index::lower("b"), Index::lower("c")]),
                    t("x", vec![Index::lower("a")]),
                ]),
            ]),
            r"x_b - \Gamma^a_{b c} (x_a)"
        ),
        (
            partial_of_sum,
            Node::derivative(
                DerivativeKind::Partial,
                Index::lower("a"),
                Node::Sum(vec![Node::Symbol("x".into()), Node::Symbol("y".into())]),
                0..0,
            ),
            r"\partial_a (x + y)"
        ),
        (
            hat_covariant_derivative,
            Node::derivative(
                DerivativeKind::Covariant(Diacritic::Hat),
                Index::lower("nu"),
                t("F", vec![Index::upper("mu"), Index::upper("nu")]),
                0..0,
            ),
            r"\hat{\nabla}_\nu F^{\mu \nu}"
        ),
        (
            scaled_product,
            Node::Product(vec![Node::Number(Number::new(1, 2)), Node::Symbol("R".into())]),
            r"\frac{1}{2} R"
        ),
    );

    #[test]
    fn rename_skips_shadowing_contraction() {
        let mut node = Node::Product(vec![
            t("v", vec![Index::upper("i")]),
            Node::Contraction(Box::new(Contraction {
                index: "i".into(),
                dimension: 3,
                body: t("w", vec![Index::upper("i")]),
            })),
        ]);
        node.rename_index("i", "a");
        assert_eq!(node.to_string(), r"v^a \sum_{i=0}^{2} (w^i)");
    }

    #[test]
    fn conventional_names() {
        assert!(TensorRef::new("v", vec![Index::upper("i")]).has_conventional_name());
        assert!(!TensorRef::with_name("vU_cdD", vec![Index::upper("i"), Index::lower("j")])
            .has_conventional_name());
    }

    #[test]
    fn diacritic_split() {
        assert_eq!(Diacritic::split("ghat"), ("g", Diacritic::Hat));
        assert_eq!(Diacritic::split("hat"), ("hat", Diacritic::None));
        assert_eq!(Diacritic::split("gamma"), ("gamma", Diacritic::None));
        assert_eq!(Diacritic::split("Gammahat"), ("Gamma", Diacritic::Hat));
        assert_eq!(Diacritic::split("combat"), ("combat", Diacritic::None));
        assert_eq!(Diacritic::split("alphabar"), ("alpha", Diacritic::Bar));
    }
}
