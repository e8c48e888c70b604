//! Index resolution and summation expansion.
//!
//! Resolution walks an expression tree bottom up and classifies the indices of each term.
//! An index that appears once is free.
//! An index that appears exactly twice, once upper and once lower, is bound:
//!     it is renamed to a fresh internal name and the smallest enclosing term
//!     is wrapped in an explicit [`Contraction`].
//! Any other repetition is an error.

use crate::ast::{Contraction, Height, Index, IndexValue, Node, TensorRef};
use crate::error::{Error, ErrorKind};
use std::collections::BTreeSet;
use std::ops::Range;

/// An occurrence of a named index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub name: String,
    pub height: Height,
    /// Range of the index, if it is fixed by a declared tensor or by the coordinates.
    pub dimension: Option<usize>,
    pub span: Range<usize>,
}

impl Occurrence {
    pub fn index(&self) -> Index {
        Index::named(self.name.clone(), self.height)
    }
}

/// Source of index ranges.
pub trait Dimensions {
    /// Dimension of the tensor being referenced, if it is known.
    fn tensor_dimension(&self, tensor: &TensorRef) -> Option<usize>;

    /// Number of declared coordinates, if any.
    fn coordinate_dimension(&self) -> Option<usize>;

    /// Dimension used when nothing else fixes the range of an index.
    fn default_dimension(&self) -> usize;
}

/// A tree whose bound indices have been turned into contractions.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub node: Node,
    /// Free indices in order of first appearance.
    pub free: Vec<Occurrence>,
}

/// Resolves the indices of a tree and expands its implicit summations.
pub fn resolve(node: Node, dimensions: &dyn Dimensions) -> Result<Resolved, Error> {
    let mut resolver = Resolver {
        dimensions,
        fresh: 0,
    };
    let (node, free) = resolver.resolve(node)?;
    Ok(Resolved { node, free })
}

/// The free indices of a tree, without rewriting it.
pub fn free_indices(node: &Node, dimensions: &dyn Dimensions) -> Result<Vec<Occurrence>, Error> {
    Ok(resolve(node.clone(), dimensions)?.free)
}

/// Dimension of the first declared tensor in the tree.
pub fn first_tensor_dimension(node: &Node, dimensions: &dyn Dimensions) -> Option<usize> {
    match node {
        Node::Number(_) | Node::Symbol(_) => None,
        Node::Tensor(t) => dimensions.tensor_dimension(t),
        Node::Derivative(d) => first_tensor_dimension(&d.operand, dimensions),
        Node::Sum(children) | Node::Product(children) => children
            .iter()
            .find_map(|child| first_tensor_dimension(child, dimensions)),
        Node::Power(base, exponent) => first_tensor_dimension(base, dimensions)
            .or_else(|| first_tensor_dimension(exponent, dimensions)),
        Node::Function(_, arg) => first_tensor_dimension(arg, dimensions),
        Node::Contraction(c) => first_tensor_dimension(&c.body, dimensions),
    }
}

struct Resolver<'d> {
    dimensions: &'d dyn Dimensions,
    fresh: usize,
}

impl<'d> Resolver<'d> {
    fn resolve(&mut self, node: Node) -> Result<(Node, Vec<Occurrence>), Error> {
        match node {
            Node::Number(_) | Node::Symbol(_) => Ok((node, vec![])),
            Node::Tensor(t) => {
                let dimension = self.dimensions.tensor_dimension(&t);
                let occurrences = t
                    .indices
                    .iter()
                    .filter_map(|index| {
                        index.name().map(|name| Occurrence {
                            name: name.to_string(),
                            height: index.height,
                            dimension,
                            span: t.span.clone(),
                        })
                    })
                    .collect();
                self.contract(Node::Tensor(t), occurrences)
            }
            Node::Derivative(mut d) => {
                let (operand, mut occurrences) = self.resolve(d.operand)?;
                let known = self
                    .dimensions
                    .coordinate_dimension()
                    .or_else(|| first_tensor_dimension(&operand, self.dimensions));
                d.operand = operand;
                d.dimension = Some(known.unwrap_or_else(|| self.dimensions.default_dimension()));
                if let Some(name) = d.index.name() {
                    occurrences.push(Occurrence {
                        name: name.to_string(),
                        height: d.index.height,
                        dimension: known,
                        span: d.span.clone(),
                    });
                }
                self.contract(Node::Derivative(d), occurrences)
            }
            Node::Product(factors) => {
                let mut resolved = Vec::with_capacity(factors.len());
                let mut occurrences = vec![];
                for factor in factors {
                    let (factor, free) = self.resolve(factor)?;
                    resolved.push(factor);
                    occurrences.extend(free);
                }
                self.contract(Node::Product(resolved), occurrences)
            }
            Node::Sum(terms) => {
                let mut resolved = Vec::with_capacity(terms.len());
                let mut result: Option<Vec<Occurrence>> = None;
                for term in terms {
                    let (term, free) = self.resolve(term)?;
                    resolved.push(term);
                    match &result {
                        None => result = Some(free),
                        Some(first) => {
                            if index_set(first) != index_set(&free) {
                                let span = free
                                    .first()
                                    .or(first.first())
                                    .map(|o| o.span.clone())
                                    .unwrap_or(0..0);
                                return Err(Error::malformed(
                                    format![
                                        "the terms of a sum have different free indices: [{}] and [{}]",
                                        describe(first).join(", "),
                                        describe(&free).join(", ")
                                    ],
                                    span,
                                ));
                            }
                        }
                    }
                }
                Ok((Node::Sum(resolved), result.unwrap_or_default()))
            }
            Node::Power(base, exponent) => {
                let (base, base_free) = self.resolve(*base)?;
                let (exponent, exponent_free) = self.resolve(*exponent)?;
                if let Some(o) = base_free.first().or(exponent_free.first()) {
                    return Err(Error::malformed(
                        format!["the free index `{}` appears in a power", o.name],
                        o.span.clone(),
                    ));
                }
                Ok((Node::Power(Box::new(base), Box::new(exponent)), vec![]))
            }
            Node::Function(f, arg) => {
                let (arg, free) = self.resolve(*arg)?;
                if let Some(o) = free.first() {
                    return Err(Error::malformed(
                        format!["the free index `{}` appears in the argument of {}", o.name, f.name()],
                        o.span.clone(),
                    ));
                }
                Ok((Node::Function(f, Box::new(arg)), vec![]))
            }
            Node::Contraction(mut c) => {
                let (body, free) = self.resolve(c.body)?;
                c.body = body;
                let index = c.index.clone();
                Ok((
                    Node::Contraction(c),
                    free.into_iter().filter(|o| o.name != index).collect(),
                ))
            }
        }
    }

    /// Classifies the occurrences of one term, wrapping the term in a contraction
    ///     for each bound index.
    fn contract(
        &mut self,
        mut node: Node,
        occurrences: Vec<Occurrence>,
    ) -> Result<(Node, Vec<Occurrence>), Error> {
        let mut free = vec![];
        let mut bound = vec![];
        let mut seen = BTreeSet::new();
        for occurrence in &occurrences {
            if !seen.insert(occurrence.name.as_str()) {
                continue;
            }
            let all: Vec<&Occurrence> = occurrences
                .iter()
                .filter(|o| o.name == occurrence.name)
                .collect();
            match all[..] {
                [single] => free.push(single.clone()),
                [a, b] if a.height != b.height => {
                    let dimension = match (a.dimension, b.dimension) {
                        (Some(first), Some(second)) if first != second => {
                            return Err(Error::new(
                                ErrorKind::DimensionMismatch {
                                    index: a.name.clone(),
                                    first,
                                    second,
                                },
                                b.span.clone(),
                            ))
                        }
                        (first, second) => first.or(second),
                    };
                    bound.push((a.name.clone(), dimension));
                }
                _ => {
                    let last = all[all.len() - 1];
                    return Err(Error::new(
                        ErrorKind::IllegalIndexRepetition {
                            index: last.name.clone(),
                            occurrences: all.len(),
                        },
                        last.span.clone(),
                    ));
                }
            }
        }
        for (name, dimension) in bound {
            let fresh = format!["_{}", self.fresh];
            self.fresh += 1;
            node.rename_index(&name, &fresh);
            node = Node::Contraction(Box::new(Contraction {
                index: fresh,
                dimension: dimension.unwrap_or_else(|| self.dimensions.default_dimension()),
                body: node,
            }));
        }
        Ok((node, free))
    }
}

fn index_set(occurrences: &[Occurrence]) -> BTreeSet<(&str, Height)> {
    occurrences
        .iter()
        .map(|o| (o.name.as_str(), o.height))
        .collect()
}

/// Renders occurrences for error messages, e.g. `^mu`.
pub(crate) fn describe(occurrences: &[Occurrence]) -> Vec<String> {
    occurrences.iter().map(|o| o.index().describe()).collect()
}

/// Named indices of a tensor reference that are not fixed.
pub(crate) fn named_indices(tensor: &TensorRef) -> Vec<(String, Height)> {
    tensor
        .indices
        .iter()
        .filter_map(|index| match &index.value {
            IndexValue::Name(name) => Some((name.clone(), index.height)),
            IndexValue::Fixed(_) => None,
        })
        .collect()
}
