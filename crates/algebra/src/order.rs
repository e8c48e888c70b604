//! Orderings used to sort the operands of sums and products.
//!
//! Both orderings compare the bases of factors by symbol name first,
//!     so that `gDD00*vU0` and `vU0*gDD00` print the same way
//!     and sums read roughly alphabetically.
//! Ties are broken using the derived [`Ord`] on [`Expr`].

use crate::Expr;
use std::cmp::Ordering;

pub(crate) fn term_cmp(a: &Expr, b: &Expr) -> Ordering {
    match (a, b) {
        (Expr::Number(_), Expr::Number(_)) => a.cmp(b),
        (Expr::Number(_), _) => Ordering::Greater,
        (_, Expr::Number(_)) => Ordering::Less,
        _ => bases(a)
            .iter()
            .zip(bases(b).iter())
            .map(|(x, y)| atom_cmp(x, y))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| bases(a).len().cmp(&bases(b).len()))
            .then_with(|| a.cmp(b)),
    }
}

pub(crate) fn factor_cmp(a: &Expr, b: &Expr) -> Ordering {
    atom_cmp(base(a), base(b)).then_with(|| a.cmp(b))
}

fn bases(e: &Expr) -> Vec<&Expr> {
    match e {
        Expr::Mul(factors) => factors
            .iter()
            .filter(|f| !matches!(f, Expr::Number(_)))
            .map(base)
            .collect(),
        other => vec![base(other)],
    }
}

fn base(e: &Expr) -> &Expr {
    match e {
        Expr::Pow(b, _) => b,
        other => other,
    }
}

fn atom_cmp(a: &Expr, b: &Expr) -> Ordering {
    match (a, b) {
        (Expr::Symbol(x), Expr::Symbol(y)) => x.name().cmp(y.name()),
        (Expr::Symbol(_), _) => Ordering::Less,
        (_, Expr::Symbol(_)) => Ordering::Greater,
        _ => a.cmp(b),
    }
}
