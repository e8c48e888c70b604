//! Metrics and their Levi-Civita connections.
//!
//! Each diacritic defines a separate namespace: the metric `ghatDD` has the inverse `ghatUU`,
//!     the determinant `ghatdet` and the connection `GammahatUDD`.

use crate::ast::{Diacritic, Height};
use crate::context::Context;
use crate::covdrv;
use crate::error::Error;
use crate::permutation;
use crate::table::{distinct_components, Origin, Symmetry, TensorDecl, TensorValue};
use algebra::Expr;
use std::ops::Range;

/// The active metric of a connection namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    /// Base name, e.g. `g` or `ghat`.
    pub base: String,
    pub dimension: usize,
    /// Id of the declared metric entry, used to invalidate the cached connection.
    pub generation: u64,
}

/// Declares a metric from either its covariant or its contravariant form.
///
/// The other form and the determinant are derived immediately.
/// When `keep_value` is set and an entry of the right shape exists, its value is used
///     rather than fresh component symbols.
pub(crate) fn declare(
    ctx: &mut Context,
    name: &str,
    dimension: usize,
    keep_value: bool,
    span: &Range<usize>,
) -> Result<(), Error> {
    let (base, height) = if let Some(base) = name.strip_suffix("UU") {
        (base, Height::Upper)
    } else if let Some(base) = name.strip_suffix("DD") {
        (base, Height::Lower)
    } else {
        ("", Height::Lower)
    };
    if base.is_empty() {
        return Err(Error::directive(
            format!["the metric `{name}` must have two upper or two lower indices"],
            span.clone(),
        ));
    }
    let (_, diacritic) = Diacritic::split(base);
    let naming = ctx.config().component_naming;
    let value = ctx
        .table()
        .get(name)
        .filter(|decl| keep_value && decl.rank() == 2 && decl.dimension == dimension)
        .map(|decl| decl.value.clone())
        .unwrap_or_else(|| TensorValue::symbolic(name, 2, dimension, &Symmetry::Metric, naming));
    let (inverse, det) = permutation::inverse(&value);

    let generation = ctx.table_mut().insert(
        TensorDecl::new(
            name,
            base,
            vec![height; 2],
            dimension,
            Symmetry::Metric,
            value,
            Origin::Declared,
        ),
        naming,
    );
    let other = height.flip();
    ctx.table_mut().insert(
        TensorDecl::new(
            format!["{base}{0}{0}", other.letter()],
            base,
            vec![other; 2],
            dimension,
            Symmetry::Metric,
            inverse,
            Origin::Computed,
        ),
        naming,
    );
    let det = match height {
        Height::Lower => det,
        Height::Upper => Expr::pow(det, Expr::integer(-1)),
    };
    let det_name = format!["{base}det"];
    ctx.table_mut().insert(
        TensorDecl::new(
            det_name.clone(),
            det_name,
            vec![],
            dimension,
            Symmetry::None,
            TensorValue::scalar(det),
            Origin::Computed,
        ),
        naming,
    );
    tracing::debug!(metric = name, dimension, "declared metric");
    ctx.set_metric(
        diacritic,
        Metric {
            base: base.to_string(),
            dimension,
            generation,
        },
    );
    Ok(())
}

/// Ensures the connection of a namespace is computed from its current metric.
///
/// The Christoffel symbols of the second kind are
///     `Gamma^c_{ab} = 1/2 g^{cd} (d_a g_{db} + d_b g_{ad} - d_d g_{ab})`.
pub(crate) fn ensure(
    ctx: &mut Context,
    diacritic: Diacritic,
    span: &Range<usize>,
) -> Result<(), Error> {
    let Some(metric) = ctx.metric(diacritic).cloned() else {
        return Err(covdrv::no_connection(diacritic, span.clone()));
    };
    let name = diacritic.connection_name();
    if let Some(existing) = ctx.table().get(&name) {
        if existing.source == Some(metric.generation) {
            return Ok(());
        }
    }
    let lower = ctx
        .table()
        .get(&format!["{}DD", metric.base])
        .map(|decl| decl.value.clone());
    let upper = ctx
        .table()
        .get(&format!["{}UU", metric.base])
        .map(|decl| decl.value.clone());
    let (Some(lower), Some(upper)) = (lower, upper) else {
        return Err(covdrv::no_connection(diacritic, span.clone()));
    };
    let n = metric.dimension;

    // derivatives[a] holds d_a g_{ij}
    let mut derivatives = Vec::with_capacity(n);
    for a in 0..n {
        let mut d = TensorValue::zeros(2, n);
        for (index, g) in lower.iter() {
            d.set(&index, ctx.differentiate(g, a, n, span)?);
        }
        derivatives.push(d);
    }
    let entry = |t: &TensorValue, i: usize, j: usize| t.get(&[i, j]).cloned().unwrap_or_else(Expr::zero);

    let symmetry = Symmetry::Symmetric(1, 2);
    let mut gamma = TensorValue::zeros(3, n);
    for index in distinct_components(3, n, &symmetry) {
        let (c, a, b) = (index[0], index[1], index[2]);
        let terms = (0..n).map(|d| {
            Expr::mul([
                Expr::rational(1, 2),
                entry(&upper, c, d),
                Expr::add([
                    entry(&derivatives[a], d, b),
                    entry(&derivatives[b], a, d),
                    entry(&derivatives[d], a, b).neg(),
                ]),
            ])
        });
        gamma.set(&index, Expr::add(terms));
    }
    gamma.fill_aliases(&symmetry);
    let naming = ctx.config().component_naming;
    ctx.table_mut().insert(
        TensorDecl::new(
            name.clone(),
            format!["Gamma{}", diacritic.suffix()],
            vec![Height::Upper, Height::Lower, Height::Lower],
            n,
            symmetry,
            gamma,
            Origin::Computed,
        )
        .with_source(metric.generation),
        naming,
    );
    tracing::trace!(connection = %name, "computed Christoffel symbols");
    Ok(())
}
