//! Covariant derivative generator.
//!
//! A covariant derivative `\nabla_\beta E` expands into the partial derivative `\partial_\beta E`
//!     plus one connection term for each free index of `E`:
//!     `+\Gamma^\mu_{a \beta} E[\mu \to a]` for an upper index `\mu`
//!     and `-\Gamma^a_{\nu \beta} E[\nu \to a]` for a lower index `\nu`.
//! Chains of derivatives are expanded innermost first.
//! The outer step corrects only the indices of the tensor itself,
//!     and each of its connection terms carries the inner expansion of the renamed tensor:
//!     `\partial_a (\partial_b v^\mu + \Gamma^\mu_{c b} v^c) + \Gamma^\mu_{c a} (\partial_b v^c + \Gamma^c_{d b} v^d)`.
//!
//! Inside an equation, a covariant derivative of a declared tensor is not expanded in place.
//! Instead an auxiliary tensor like `vU_cdD` holding all components of the derivative
//!     is computed once and referenced from the tree.

use crate::ast::{DerivativeKind, Diacritic, Height, Index, IndexValue, Node, TensorRef};
use crate::connection;
use crate::context::Context;
use crate::error::{Error, ErrorKind};
use crate::lower;
use crate::table::{Origin, Symmetry, TensorDecl, TensorValue};
use std::collections::BTreeSet;
use std::ops::Range;

/// Expands `\nabla_{i_1} ... \nabla_{i_n} T` in the plain connection namespace.
///
/// The first index is the outermost derivative.
pub fn generate(tensor: &TensorRef, indices: &[Index]) -> Node {
    generate_with(tensor, indices, Diacritic::None)
}

/// Expands a chain of covariant derivatives in the given connection namespace.
pub fn generate_with(tensor: &TensorRef, indices: &[Index], diacritic: Diacritic) -> Node {
    let mut reserved = Node::Tensor(tensor.clone()).index_names();
    reserved.extend(indices.iter().filter_map(Index::name).map(str::to_string));
    chain(tensor, indices, diacritic, &reserved)
}

/// `\partial_\beta (\nabla ... T) + \sum \pm \Gamma (\nabla ... T[idx \to a])`,
///     where the inner chain is regenerated for every renamed copy of the tensor.
fn chain(
    tensor: &TensorRef,
    indices: &[Index],
    diacritic: Diacritic,
    reserved: &BTreeSet<String>,
) -> Node {
    let Some((outer, inner)) = indices.split_first() else {
        return Node::Tensor(tensor.clone());
    };
    let operand = Node::Tensor(tensor.clone());
    let mut avoid = reserved.clone();
    avoid.extend(operand.index_names());
    let dummy = fresh_name(&avoid);
    let beta = Index {
        value: outer.value.clone(),
        height: Height::Lower,
    };
    let gamma = |indices: Vec<Index>| {
        Node::Tensor(TensorRef::new(format!["Gamma{}", diacritic.suffix()], indices))
    };
    let mut terms = vec![Node::derivative(
        DerivativeKind::Partial,
        beta.clone(),
        chain(tensor, inner, diacritic, reserved),
        0..0,
    )];
    for (name, height) in free_names(&operand) {
        let mut renamed = tensor.clone();
        for index in &mut renamed.indices {
            if index.name() == Some(name.as_str()) {
                index.value = IndexValue::Name(dummy.clone());
            }
        }
        let rest = chain(&renamed, inner, diacritic, reserved);
        terms.push(match height {
            Height::Upper => Node::Product(vec![
                gamma(vec![Index::upper(name), Index::lower(dummy.clone()), beta.clone()]),
                rest,
            ]),
            Height::Lower => Node::Product(vec![
                Node::integer(-1),
                gamma(vec![Index::upper(dummy.clone()), Index::lower(name), beta.clone()]),
                rest,
            ]),
        });
    }
    Node::sum(terms)
}

/// Applies one covariant derivative to an operand that contains no covariant derivatives.
///
/// The dummy index of the connection terms avoids every name in `reserved`
///     and is added to it afterwards.
pub(crate) fn expand_once(
    operand: Node,
    index: &Index,
    diacritic: Diacritic,
    reserved: &mut BTreeSet<String>,
) -> Node {
    let free = free_names(&operand);
    let mut avoid = reserved.clone();
    avoid.extend(operand.index_names());
    avoid.extend(index.name().map(str::to_string));
    let dummy = fresh_name(&avoid);
    let beta = Index {
        value: index.value.clone(),
        height: Height::Lower,
    };
    let gamma = |indices: Vec<Index>| {
        Node::Tensor(TensorRef::new(format!["Gamma{}", diacritic.suffix()], indices))
    };
    let mut terms = vec![Node::derivative(
        DerivativeKind::Partial,
        beta.clone(),
        operand.clone(),
        0..0,
    )];
    for (name, height) in free {
        let mut renamed = operand.clone();
        renamed.rename_index(&name, &dummy);
        terms.push(match height {
            Height::Upper => Node::Product(vec![
                gamma(vec![Index::upper(name), Index::lower(dummy.clone()), beta.clone()]),
                renamed,
            ]),
            Height::Lower => Node::Product(vec![
                Node::integer(-1),
                gamma(vec![Index::upper(dummy.clone()), Index::lower(name), beta.clone()]),
                renamed,
            ]),
        });
    }
    reserved.insert(dummy);
    Node::sum(terms)
}

/// The first unused name among `a`, ..., `z`, `a1`, ..., `z1`, `a2`, ...
fn fresh_name(reserved: &BTreeSet<String>) -> String {
    (0..)
        .flat_map(|round: usize| {
            ('a'..='z').map(move |c| {
                if round == 0 {
                    c.to_string()
                } else {
                    format!["{c}{round}"]
                }
            })
        })
        .find(|name| !reserved.contains(name))
        .unwrap_or_default()
}

/// Free named indices of a tree, in order of first appearance.
///
/// Unlike full index resolution this never fails: repeated indices are simply not free.
fn free_names(node: &Node) -> Vec<(String, Height)> {
    let keep_single = |all: Vec<(String, Height)>| -> Vec<(String, Height)> {
        all.iter()
            .filter(|(name, _)| all.iter().filter(|(other, _)| other == name).count() == 1)
            .cloned()
            .collect()
    };
    match node {
        Node::Number(_) | Node::Symbol(_) | Node::Power(..) | Node::Function(..) => vec![],
        Node::Tensor(t) => keep_single(
            t.indices
                .iter()
                .filter_map(|i| i.name().map(|name| (name.to_string(), i.height)))
                .collect(),
        ),
        Node::Derivative(d) => {
            let mut all = free_names(&d.operand);
            all.extend(d.index.name().map(|name| (name.to_string(), d.index.height)));
            keep_single(all)
        }
        Node::Product(factors) => keep_single(factors.iter().flat_map(free_names).collect()),
        Node::Sum(terms) => terms.first().map(free_names).unwrap_or_default(),
        Node::Contraction(c) => free_names(&c.body)
            .into_iter()
            .filter(|(name, _)| *name != c.index)
            .collect(),
    }
}

/// Replaces every covariant derivative and every raised partial derivative in the tree.
///
/// `reserved` holds every index name in use in the equation.
pub(crate) fn expand(
    ctx: &mut Context,
    node: Node,
    reserved: &mut BTreeSet<String>,
) -> Result<Node, Error> {
    Ok(match node {
        Node::Number(_) | Node::Symbol(_) | Node::Tensor(_) => node,
        Node::Sum(terms) => Node::Sum(
            terms
                .into_iter()
                .map(|term| expand(ctx, term, reserved))
                .collect::<Result<_, _>>()?,
        ),
        Node::Product(factors) => Node::Product(
            factors
                .into_iter()
                .map(|factor| expand(ctx, factor, reserved))
                .collect::<Result<_, _>>()?,
        ),
        Node::Power(base, exponent) => Node::Power(
            Box::new(expand(ctx, *base, reserved)?),
            Box::new(expand(ctx, *exponent, reserved)?),
        ),
        Node::Function(f, arg) => Node::Function(f, Box::new(expand(ctx, *arg, reserved)?)),
        Node::Contraction(mut c) => {
            c.body = expand(ctx, c.body, reserved)?;
            Node::Contraction(c)
        }
        Node::Derivative(d) => {
            let d = *d;
            let operand = expand(ctx, d.operand, reserved)?;
            let diacritic = match d.kind {
                DerivativeKind::Partial => Diacritic::None,
                DerivativeKind::Covariant(diacritic) => diacritic,
            };
            if d.index.height == Height::Upper {
                return raise(ctx, d.kind, diacritic, d.index, operand, d.span, reserved);
            }
            match d.kind {
                DerivativeKind::Partial => {
                    Node::derivative(DerivativeKind::Partial, d.index, operand, d.span)
                }
                DerivativeKind::Covariant(diacritic) => {
                    connection::ensure(ctx, diacritic, &d.span)?;
                    match auxiliary_operand(ctx, &operand) {
                        Some(tensor) => {
                            let name = covariant_tensor(ctx, &tensor, diacritic, &d.span)?;
                            let mut indices = tensor.indices.clone();
                            indices.push(d.index);
                            Node::Tensor(TensorRef::with_name(name, indices).with_span(d.span))
                        }
                        None => expand_once(operand, &d.index, diacritic, reserved),
                    }
                }
            }
        }
    })
}

/// Rewrites `\nabla^\mu E` as `g^{\mu a} \nabla_a E`.
fn raise(
    ctx: &mut Context,
    kind: DerivativeKind,
    diacritic: Diacritic,
    index: Index,
    operand: Node,
    span: Range<usize>,
    reserved: &mut BTreeSet<String>,
) -> Result<Node, Error> {
    let Some(metric) = ctx.metric(diacritic).cloned() else {
        return Err(no_connection(diacritic, span));
    };
    if kind != DerivativeKind::Partial {
        connection::ensure(ctx, diacritic, &span)?;
        if let Some(tensor) = auxiliary_operand(ctx, &operand) {
            let lower = covariant_tensor(ctx, &tensor, diacritic, &span)?;
            let name = raised_tensor(ctx, &lower, &metric.base, &span)?;
            let mut indices = tensor.indices.clone();
            indices.push(index);
            return Ok(Node::Tensor(TensorRef::with_name(name, indices).with_span(span)));
        }
    }
    let mut avoid = reserved.clone();
    avoid.extend(operand.index_names());
    avoid.extend(index.name().map(str::to_string));
    let dummy = fresh_name(&avoid);
    reserved.insert(dummy.clone());
    let lowered = Node::derivative(kind, Index::lower(dummy.clone()), operand, span.clone());
    let lowered = expand(ctx, lowered, reserved)?;
    let raised = Index {
        height: Height::Upper,
        ..index
    };
    let inverse = TensorRef::new(metric.base.clone(), vec![raised, Index::upper(dummy)]);
    Ok(Node::Product(vec![Node::Tensor(inverse.with_span(span)), lowered]))
}

pub(crate) fn no_connection(diacritic: Diacritic, span: Range<usize>) -> Error {
    Error::new(
        ErrorKind::NoConnectionAvailable {
            metric: format!["g{}DD", diacritic.suffix()],
        },
        span,
    )
}

/// Returns the operand if its covariant derivative can be stored as an auxiliary tensor:
///     a declared tensor whose indices are distinct names.
fn auxiliary_operand(ctx: &Context, operand: &Node) -> Option<TensorRef> {
    let Node::Tensor(tensor) = operand else {
        return None;
    };
    let decl = ctx.table().get(&tensor.name)?;
    if decl.rank() != tensor.rank() || decl.rank() == 0 {
        return None;
    }
    let mut names = BTreeSet::new();
    for index in &tensor.indices {
        match &index.value {
            IndexValue::Name(name) if names.insert(name.clone()) => {}
            _ => return None,
        }
    }
    Some(tensor.clone())
}

fn generic_indices(heights: &[Height]) -> Vec<Index> {
    heights
        .iter()
        .enumerate()
        .map(|(i, height)| Index::named(format!["_s{i}"], *height))
        .collect()
}

/// Ensures the tensor of covariant derivatives of a declared tensor exists and returns its name.
fn covariant_tensor(
    ctx: &mut Context,
    tensor: &TensorRef,
    diacritic: Diacritic,
    span: &Range<usize>,
) -> Result<String, Error> {
    let Some(decl) = ctx.table().get(&tensor.name).cloned() else {
        return Err(ctx.undeclared(&tensor.name, span.clone()));
    };
    let name = match decl.origin {
        Origin::CovariantDerivative(d) if d == diacritic => format!["{}D", decl.name],
        _ => format!["{}_cd{}D", decl.name, diacritic.suffix()],
    };
    let connection = ctx.table().get(&diacritic.connection_name()).map(|c| c.id);
    if let Some(existing) = ctx.table().get(&name) {
        if existing.source == Some(decl.id) && connection.map_or(true, |id| existing.id > id) {
            return Ok(name);
        }
    }
    let mut heights = decl.heights.clone();
    heights.push(Height::Lower);
    let mut indices = generic_indices(&decl.heights);
    let operand = Node::Tensor(TensorRef {
        name: decl.name.clone(),
        base: decl.base.clone(),
        indices: indices.clone(),
        span: 0..0,
    });
    let mut reserved = operand.index_names();
    reserved.insert("_d".into());
    let derivative = Index::lower("_d");
    let rhs = expand_once(operand, &derivative, diacritic, &mut reserved);
    indices.push(derivative);
    let symmetry = Symmetry::from_pairs(&decl.symmetry.pairs());
    let target = TensorDecl::new(
        name.clone(),
        name.clone(),
        heights,
        decl.dimension,
        symmetry,
        TensorValue::zeros(0, 0),
        Origin::CovariantDerivative(diacritic),
    )
    .with_source(decl.id);
    tracing::trace!(tensor = %name, "computing covariant derivative tensor");
    lower::assign(ctx, target, &indices, &rhs, span)?;
    Ok(name)
}

/// Ensures the tensor `g^{\beta a} T_{...;a}` exists and returns its name.
fn raised_tensor(
    ctx: &mut Context,
    lower_name: &str,
    metric_base: &str,
    span: &Range<usize>,
) -> Result<String, Error> {
    let Some(decl) = ctx.table().get(lower_name).cloned() else {
        return Err(ctx.undeclared(lower_name, span.clone()));
    };
    let name = match lower_name.strip_suffix('D') {
        Some(stem) => format!["{stem}U"],
        None => format!["{lower_name}U"],
    };
    if let Some(existing) = ctx.table().get(&name) {
        if existing.source == Some(decl.id) {
            return Ok(name);
        }
    }
    let rank = decl.rank();
    let mut heights = decl.heights.clone();
    let mut target_indices = generic_indices(&heights[..rank - 1]);
    let mut operand_indices = target_indices.clone();
    operand_indices.push(Index::lower("_a"));
    target_indices.push(Index::upper("_d"));
    heights[rank - 1] = Height::Upper;
    let rhs = Node::Product(vec![
        Node::Tensor(TensorRef::new(
            metric_base,
            vec![Index::upper("_d"), Index::upper("_a")],
        )),
        Node::Tensor(TensorRef::with_name(lower_name, operand_indices)),
    ]);
    let target = TensorDecl::new(
        name.clone(),
        name.clone(),
        heights,
        decl.dimension,
        Symmetry::from_pairs(&decl.symmetry.pairs()),
        TensorValue::zeros(0, 0),
        Origin::Computed,
    )
    .with_source(decl.id);
    tracing::trace!(tensor = %name, "computing raised covariant derivative tensor");
    lower::assign(ctx, target, &target_indices, &rhs, span)?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! generate_tests {
        ( $( ($name: ident, $base: expr, $indices: expr, $derivatives: expr, $want: expr), )+ ) => {
            $(
            #[test]
            fn $name() {
                let tensor = TensorRef::new($base, $indices);
                let got = generate(&tensor, &$derivatives);
                assert_eq!(got.to_string(), $want);
            }
            )+
        };
    }

    generate_tests!(
        (
            rank_two_contravariant,
            "T",
            vec![Index::upper("mu"), Index::upper("nu")],
            [Index::lower("beta")],
            r"\partial_\beta T^{\mu \nu} + \Gamma^\mu_{a \beta} (T^{a \nu}) + \Gamma^\nu_{a \beta} (T^{\mu a})"
        ),
        (
            rank_two_mixed,
            "T",
            vec![Index::upper("mu"), Index::lower("nu")],
            [Index::lower("beta")],
            r"\partial_\beta T^\mu_\nu + \Gamma^\mu_{a \beta} (T^a_\nu) - \Gamma^a_{\nu \beta} (T^\mu_a)"
        ),
        (
            rank_two_covariant,
            "T",
            vec![Index::lower("mu"), Index::lower("nu")],
            [Index::lower("beta")],
            r"\partial_\beta T_{\mu \nu} - \Gamma^a_{\mu \beta} (T_{a \nu}) - \Gamma^a_{\nu \beta} (T_{\mu a})"
        ),
        (
            second_order_vector,
            "v",
            vec![Index::upper("mu")],
            [Index::lower("a"), Index::lower("b")],
            r"\partial_a (\partial_b v^\mu + \Gamma^\mu_{c b} (v^c)) + \Gamma^\mu_{c a} (\partial_b v^c + \Gamma^c_{d b} (v^d))"
        ),
        (
            scalar_is_partial,
            "f",
            vec![],
            [Index::lower("a")],
            r"\partial_a f"
        ),
    );

    fn count_terms(node: &Node) -> usize {
        match node {
            Node::Sum(terms) => terms.len(),
            _ => 1,
        }
    }

    #[test]
    fn first_order_term_count_is_one_plus_rank() {
        for rank in 0..5 {
            let indices = (0..rank)
                .map(|i| Index::upper(format!["i{i}"]))
                .collect();
            let tensor = TensorRef::new("T", indices);
            let node = generate(&tensor, &[Index::lower("beta")]);
            assert_eq!(count_terms(&node), 1 + rank);
        }
    }

    #[test]
    fn second_order_corrects_only_tensor_indices() {
        let tensor = TensorRef::new("v", vec![Index::upper("mu")]);
        let node = generate(&tensor, &[Index::lower("a"), Index::lower("b")]);
        let Node::Sum(terms) = node else {
            panic!("expected a sum");
        };
        assert_eq!(terms.len(), 2);
        assert_eq!(
            terms[0].to_string(),
            r"\partial_a (\partial_b v^\mu + \Gamma^\mu_{c b} (v^c))"
        );
        assert_eq!(
            terms[1].to_string(),
            r"\Gamma^\mu_{c a} (\partial_b v^c + \Gamma^c_{d b} (v^d))"
        );
    }

    #[test]
    fn third_order_term_count() {
        let tensor = TensorRef::new("v", vec![Index::upper("mu")]);
        let node = generate(
            &tensor,
            &[Index::lower("a"), Index::lower("b"), Index::lower("e")],
        );
        assert_eq!(count_terms(&node), 2);
    }

    #[test]
    fn hat_connection_uses_hat_christoffel() {
        let tensor = TensorRef::new("v", vec![Index::upper("mu")]);
        let node = generate_with(&tensor, &[Index::lower("beta")], Diacritic::Hat);
        assert_eq!(
            node.to_string(),
            r"\partial_\beta v^\mu + \hat{\Gamma}^\mu_{a \beta} (v^a)"
        );
        let Node::Sum(terms) = node else {
            panic!("expected a sum");
        };
        let Node::Product(factors) = &terms[1] else {
            panic!("expected a product");
        };
        let Node::Tensor(gamma) = &factors[0] else {
            panic!("expected a tensor");
        };
        assert_eq!(gamma.name, "GammahatUDD");
    }

    #[test]
    fn dummy_avoids_names_in_use() {
        let tensor = TensorRef::new("T", vec![Index::upper("a"), Index::lower("b")]);
        let node = generate(&tensor, &[Index::lower("c")]);
        assert_eq!(
            node.to_string(),
            r"\partial_c T^a_b + \Gamma^a_{d c} (T^d_b) - \Gamma^d_{b c} (T^a_d)"
        );
    }
}
