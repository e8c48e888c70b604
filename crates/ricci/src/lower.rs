//! Equation lowering.
//!
//! An equation with free indices is lowered by evaluating its right-hand side once for each
//!     distinct component of the left-hand side.
//! Components that are redundant by symmetry are not evaluated; they are filled in from
//!     their canonical partners afterwards.

use crate::ast::{DerivativeKind, Equation, Height, Index, IndexValue, Node, TensorRef};
use crate::context::Context;
use crate::covdrv;
use crate::error::{Error, ErrorKind};
use crate::index::{self, Occurrence};
use crate::table::{
    component_count, distinct_components, Origin, Sign, TensorDecl, TensorValue, MAX_COMPONENTS,
};
use algebra::Expr;
use std::collections::BTreeSet;
use std::ops::Range;

/// Lowers an equation and stores the result in the declaration table.
pub(crate) fn lower_equation(ctx: &mut Context, equation: Equation) -> Result<(), Error> {
    let Equation { lhs, rhs, span } = equation;
    let named = lhs.indices.iter().filter(|i| i.name().is_some()).count();
    if named == 0 && lhs.rank() > 0 {
        return assign_component(ctx, lhs, rhs, &span);
    }
    if named != lhs.rank() {
        return Err(Error::malformed(
            "the left-hand side mixes named and concrete indices",
            lhs.span,
        ));
    }
    for index in &lhs.indices {
        let occurrences = lhs
            .indices
            .iter()
            .filter(|other| other.name() == index.name())
            .count();
        if occurrences > 1 {
            return Err(Error::new(
                ErrorKind::IllegalIndexRepetition {
                    index: index.name().unwrap_or_default().to_string(),
                    occurrences,
                },
                lhs.span,
            ));
        }
    }

    let mut reserved: BTreeSet<String> = rhs.index_names();
    reserved.extend(lhs.indices.iter().filter_map(Index::name).map(str::to_string));
    let rhs = covdrv::expand(ctx, rhs, &mut reserved)?;
    let resolved = index::resolve(rhs, &*ctx)?;
    check_free(&lhs.indices, &resolved.free, &span)?;

    let existing = ctx
        .table()
        .get(&lhs.name)
        .filter(|decl| decl.rank() == lhs.rank())
        .cloned();
    let dimension = match &existing {
        Some(decl) if decl.rank() > 0 => decl.dimension,
        _ => resolved
            .free
            .iter()
            .find_map(|o| o.dimension)
            .unwrap_or_else(|| ctx.default_dimension()),
    };
    for occurrence in &resolved.free {
        match occurrence.dimension {
            Some(other) if other != dimension => {
                return Err(Error::new(
                    ErrorKind::DimensionMismatch {
                        index: occurrence.name.clone(),
                        first: dimension,
                        second: other,
                    },
                    occurrence.span.clone(),
                ))
            }
            _ => {}
        }
    }
    let symmetry = existing.map(|decl| decl.symmetry).unwrap_or_default();
    let target = TensorDecl::new(
        lhs.name.clone(),
        lhs.base.clone(),
        lhs.indices.iter().map(|i| i.height).collect(),
        dimension,
        symmetry,
        TensorValue::zeros(0, 0),
        Origin::Computed,
    );
    tracing::debug!(tensor = %lhs.name, dimension, "lowering equation");
    assign_resolved(ctx, target, &lhs.indices, &resolved.node, &span)
}

/// Assigns a single component, as in `g^{0 0} = -1`.
fn assign_component(
    ctx: &mut Context,
    lhs: TensorRef,
    rhs: Node,
    span: &Range<usize>,
) -> Result<(), Error> {
    let Some(decl) = ctx.table().get(&lhs.name).cloned() else {
        return Err(ctx.undeclared(&lhs.name, lhs.span));
    };
    let mut component: Vec<usize> = lhs
        .indices
        .iter()
        .filter_map(|index| match index.value {
            IndexValue::Fixed(n) => Some(n),
            IndexValue::Name(_) => None,
        })
        .collect();
    if component.iter().any(|&i| i >= decl.dimension) {
        return Err(Error::malformed(
            format![
                "component index out of range for `{}` of dimension {}",
                decl.name, decl.dimension
            ],
            lhs.span,
        ));
    }
    let mut reserved = rhs.index_names();
    let rhs = covdrv::expand(ctx, rhs, &mut reserved)?;
    let resolved = index::resolve(rhs, &*ctx)?;
    check_free(&lhs.indices, &resolved.free, span)?;
    let expr = Evaluator::new(ctx, vec![]).eval(&resolved.node)?;
    let sign = decl.symmetry.canonicalize(&mut component);
    if sign == Sign::Zero {
        if expr.is_zero() {
            return Ok(());
        }
        return Err(Error::malformed(
            format!["this component of `{}` vanishes by symmetry", decl.name],
            lhs.span,
        ));
    }
    let mut value = decl.value.clone();
    value.set(&component, sign.apply(expr));
    value.fill_aliases(&decl.symmetry);
    tracing::debug!(tensor = %decl.name, ?component, "assigning component");
    ctx.table_mut().set_value(&decl.name, value);
    Ok(())
}

fn check_free(lhs: &[Index], free: &[Occurrence], span: &Range<usize>) -> Result<(), Error> {
    let want: BTreeSet<(&str, Height)> = lhs
        .iter()
        .filter_map(|i| i.name().map(|name| (name, i.height)))
        .collect();
    let got: BTreeSet<(&str, Height)> = free.iter().map(|o| (o.name.as_str(), o.height)).collect();
    if want != got {
        return Err(Error::new(
            ErrorKind::IllFormedEquation {
                lhs: lhs
                    .iter()
                    .filter(|i| i.name().is_some())
                    .map(Index::describe)
                    .collect(),
                rhs: index::describe(free),
            },
            span.clone(),
        ));
    }
    Ok(())
}

/// Resolves the right-hand side and assigns it to the target tensor.
pub(crate) fn assign(
    ctx: &mut Context,
    target: TensorDecl,
    indices: &[Index],
    rhs: &Node,
    span: &Range<usize>,
) -> Result<(), Error> {
    let resolved = index::resolve(rhs.clone(), &*ctx)?;
    check_free(indices, &resolved.free, span)?;
    assign_resolved(ctx, target, indices, &resolved.node, span)
}

fn assign_resolved(
    ctx: &mut Context,
    mut target: TensorDecl,
    indices: &[Index],
    node: &Node,
    span: &Range<usize>,
) -> Result<(), Error> {
    let rank = target.rank();
    if component_count(rank, target.dimension).is_none() {
        return Err(Error::malformed(
            format![
                "`{}` would have more than {MAX_COMPONENTS} components",
                target.name
            ],
            span.clone(),
        ));
    }
    let mut value = if rank == 0 {
        TensorValue::scalar(Expr::zero())
    } else {
        TensorValue::zeros(rank, target.dimension)
    };
    let names: Vec<String> = indices
        .iter()
        .filter_map(Index::name)
        .map(str::to_string)
        .collect();
    if names.len() != rank {
        return Err(Error::malformed(
            "the left-hand side mixes named and concrete indices",
            span.clone(),
        ));
    }
    for component in distinct_components(rank, target.dimension, &target.symmetry) {
        let env = names.iter().cloned().zip(component.iter().copied()).collect();
        let expr = Evaluator::new(ctx, env).eval(node)?;
        value.set(&component, expr);
    }
    value.fill_aliases(&target.symmetry);
    target.value = value;
    let naming = ctx.config().component_naming;
    ctx.table_mut().insert(target, naming);
    Ok(())
}

/// Evaluates a resolved tree to a scalar expression for one assignment of its free indices.
pub(crate) struct Evaluator<'c> {
    ctx: &'c mut Context,
    /// Values of index variables; later entries shadow earlier ones.
    env: Vec<(String, usize)>,
}

impl<'c> Evaluator<'c> {
    pub(crate) fn new(ctx: &'c mut Context, env: Vec<(String, usize)>) -> Self {
        Evaluator { ctx, env }
    }

    pub(crate) fn eval(&mut self, node: &Node) -> Result<Expr, Error> {
        match node {
            Node::Number(n) => Ok(Expr::number(*n)),
            Node::Symbol(name) => Ok(self.ctx.scalar(name)),
            Node::Tensor(t) => {
                let component = self.concrete(&t.indices, &t.span)?;
                self.ctx.component(t, &component)
            }
            Node::Derivative(d) => {
                if d.kind != DerivativeKind::Partial {
                    return Err(Error::malformed(
                        "covariant derivative was not expanded",
                        d.span.clone(),
                    ));
                }
                let k = self.concrete(std::slice::from_ref(&d.index), &d.span)?[0];
                let dimension = d.dimension.unwrap_or_else(|| self.ctx.default_dimension());
                let operand = self.eval(&d.operand)?;
                self.ctx.differentiate(&operand, k, dimension, &d.span)
            }
            Node::Sum(terms) => {
                let terms = terms
                    .iter()
                    .map(|term| self.eval(term))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expr::add(terms))
            }
            Node::Product(factors) => {
                let factors = factors
                    .iter()
                    .map(|factor| self.eval(factor))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expr::mul(factors))
            }
            Node::Power(base, exponent) => {
                let base = self.eval(base)?;
                let exponent = self.eval(exponent)?;
                Ok(Expr::pow(base, exponent))
            }
            Node::Function(f, arg) => Ok(Expr::func(*f, self.eval(arg)?)),
            Node::Contraction(c) => {
                let mut terms = Vec::with_capacity(c.dimension);
                for value in 0..c.dimension {
                    self.env.push((c.index.clone(), value));
                    let term = self.eval(&c.body);
                    self.env.pop();
                    terms.push(term?);
                }
                Ok(Expr::add(terms))
            }
        }
    }

    fn concrete(&self, indices: &[Index], span: &Range<usize>) -> Result<Vec<usize>, Error> {
        indices
            .iter()
            .map(|index| match &index.value {
                IndexValue::Fixed(n) => Ok(*n),
                IndexValue::Name(name) => self
                    .env
                    .iter()
                    .rev()
                    .find(|(bound, _)| bound == name)
                    .map(|(_, value)| *value)
                    .ok_or_else(|| {
                        Error::malformed(format!["the index `{name}` has no value"], span.clone())
                    }),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Config;

    fn context(source: &str) -> Context {
        let mut ctx = Context::new(Config::default());
        ctx.parse(source).unwrap();
        ctx
    }

    fn value(ctx: &Context, name: &str) -> String {
        ctx.table().get(name).unwrap().value.to_string()
    }

    #[test]
    fn symmetric_left_hand_side_only_evaluates_canonical_components() {
        let ctx = context(
            r"
            % def sym01 SDD (3), vD (3);
            S_{ij} = v_i v_j
            ",
        );
        assert_eq!(
            value(&ctx, "SDD"),
            "[[vD0**2, vD0*vD1, vD0*vD2], [vD0*vD1, vD1**2, vD1*vD2], [vD0*vD2, vD1*vD2, vD2**2]]"
        );
    }

    #[test]
    fn antisymmetric_diagonal_is_zero() {
        let ctx = context(
            r"
            % def anti01 FDD (2), vD (2), wD (2);
            F_{ij} = v_i w_j - v_j w_i
            ",
        );
        assert_eq!(
            value(&ctx, "FDD"),
            "[[0, vD0*wD1 - vD1*wD0], [-vD0*wD1 + vD1*wD0, 0]]"
        );
    }

    #[test]
    fn component_assignment_fills_symmetric_partner() {
        let ctx = context(
            r"
            % def metric gDD (2);
            g_{0 1} = x
            ",
        );
        assert_eq!(value(&ctx, "gDD"), "[[gDD00, x], [x, gDD11]]");
    }

    #[test]
    fn component_assignment_out_of_range() {
        let mut ctx = Context::new(Config::default());
        let err = ctx
            .parse(
                r"
                % def vU (2);
                v^{2} = 1
                ",
            )
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MalformedIndexing { .. }));
    }

    #[test]
    fn oversized_left_hand_side() {
        let mut ctx = Context::new(Config::default());
        let err = ctx
            .parse(
                r"
                % dim 100
                % def vD;
                T_{abcd} = v_a v_b v_c v_d
                ",
            )
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MalformedIndexing { .. }));
    }

    #[test]
    fn mixed_left_hand_side_indices() {
        let mut ctx = Context::new(Config::default());
        let err = ctx
            .parse(
                r"
                % def TUU (2), vU (2);
                T^{0 i} = v^i
                ",
            )
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::MalformedIndexing { .. }));
    }

    #[test]
    fn repeated_left_hand_side_index() {
        let mut ctx = Context::new(Config::default());
        let err = ctx
            .parse(
                r"
                % def vU (2);
                T^{ii} = v^i
                ",
            )
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::IllegalIndexRepetition { occurrences: 2, .. }
        ));
    }

    #[test]
    fn free_indices_must_match() {
        let mut ctx = Context::new(Config::default());
        let err = ctx
            .parse(
                r"
                % def vU (2);
                w_i = v^i
                ",
            )
            .unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::IllFormedEquation {
                lhs: vec!["_i".into()],
                rhs: vec!["^i".into()],
            }
        );
    }

    #[test]
    fn declared_dimension_wins_over_default() {
        let ctx = context(
            r"
            % def vU (2);
            w^i = 2 v^i
            ",
        );
        assert_eq!(value(&ctx, "wU"), "[2*vU0, 2*vU1]");
    }

    #[test]
    fn scalars_are_registered_on_first_use() {
        let ctx = context("y = a x^2");
        assert_eq!(ctx.table().order(), ["a", "x", "y"]);
        assert_eq!(value(&ctx, "y"), "a*x**2");
    }
}
