//! Differentiation.
//!
//! The derivative of an expression is computed structurally using the sum, product,
//!     power and chain rules.
//! The derivative of each symbol is supplied by the caller: this is how the tensor
//!     compiler maps `vU0` to `vU_dD01` when differentiating with respect to the
//!     second coordinate.

use crate::{Expr, Func, Symbol};
use std::convert::Infallible;

/// Differentiates an expression, with symbol derivatives given by `rule`.
pub fn diff<F>(expr: &Expr, rule: &mut F) -> Expr
where
    F: FnMut(&Symbol) -> Expr,
{
    let result: Result<Expr, Infallible> = try_diff(expr, &mut |s: &Symbol| Ok(rule(s)));
    match result {
        Ok(e) => e,
        Err(never) => match never {},
    }
}

/// Differentiates an expression, with a fallible rule for symbol derivatives.
pub fn try_diff<F, E>(expr: &Expr, rule: &mut F) -> Result<Expr, E>
where
    F: FnMut(&Symbol) -> Result<Expr, E>,
{
    Ok(match expr {
        Expr::Number(_) => Expr::zero(),
        Expr::Symbol(s) => rule(s)?,
        Expr::Add(terms) => {
            let mut derivatives = Vec::with_capacity(terms.len());
            for term in terms {
                derivatives.push(try_diff(term, rule)?);
            }
            Expr::add(derivatives)
        }
        Expr::Mul(factors) => {
            let mut terms = Vec::with_capacity(factors.len());
            for (i, factor) in factors.iter().enumerate() {
                let d = try_diff(factor, rule)?;
                if d.is_zero() {
                    continue;
                }
                let mut product = factors.clone();
                product[i] = d;
                terms.push(Expr::mul(product));
            }
            Expr::add(terms)
        }
        Expr::Pow(base, exponent) => {
            let d_base = try_diff(base, rule)?;
            let d_exponent = try_diff(exponent, rule)?;
            if d_exponent.is_zero() {
                // d(b^e) = e b^(e-1) b'
                Expr::mul([
                    (**exponent).clone(),
                    Expr::pow(
                        (**base).clone(),
                        Expr::add([(**exponent).clone(), Expr::integer(-1)]),
                    ),
                    d_base,
                ])
            } else {
                // d(b^e) = b^e (e' log(b) + e b'/b)
                Expr::mul([
                    expr.clone(),
                    Expr::add([
                        Expr::mul([d_exponent, Expr::func(Func::Log, (**base).clone())]),
                        Expr::mul([
                            (**exponent).clone(),
                            d_base,
                            Expr::pow((**base).clone(), Expr::integer(-1)),
                        ]),
                    ]),
                ])
            }
        }
        Expr::Func(f, arg) => {
            let d_arg = try_diff(arg, rule)?;
            if d_arg.is_zero() {
                return Ok(Expr::zero());
            }
            Expr::mul([outer_derivative(*f, arg), d_arg])
        }
    })
}

/// The derivative of `f` evaluated at `a`.
fn outer_derivative(f: Func, a: &Expr) -> Expr {
    let a = a.clone();
    let square = || Expr::pow(a.clone(), Expr::integer(2));
    let minus_half = || Expr::rational(-1, 2);
    match f {
        Func::Sin => Expr::func(Func::Cos, a),
        Func::Cos => Expr::func(Func::Sin, a).neg(),
        Func::Tan => Expr::add([
            Expr::one(),
            Expr::pow(Expr::func(Func::Tan, a), Expr::integer(2)),
        ]),
        Func::Sinh => Expr::func(Func::Cosh, a),
        Func::Cosh => Expr::func(Func::Sinh, a),
        Func::Tanh => Expr::add([
            Expr::one(),
            Expr::pow(Expr::func(Func::Tanh, a), Expr::integer(2)).neg(),
        ]),
        Func::Asin => Expr::pow(Expr::add([Expr::one(), square().neg()]), minus_half()),
        Func::Acos => Expr::pow(Expr::add([Expr::one(), square().neg()]), minus_half()).neg(),
        Func::Atan => Expr::pow(Expr::add([Expr::one(), square()]), Expr::integer(-1)),
        Func::Asinh => Expr::pow(Expr::add([square(), Expr::one()]), minus_half()),
        Func::Acosh => Expr::pow(Expr::add([square(), Expr::integer(-1)]), minus_half()),
        Func::Atanh => Expr::pow(Expr::add([Expr::one(), square().neg()]), Expr::integer(-1)),
        Func::Exp => Expr::func(Func::Exp, a),
        Func::Log => Expr::pow(a, Expr::integer(-1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrt_x(s: &Symbol) -> Expr {
        if s.name() == "x" {
            Expr::one()
        } else {
            Expr::zero()
        }
    }

    fn x() -> Expr {
        Expr::symbol("x")
    }

    #[test]
    fn power_rule() {
        let e = Expr::pow(x(), Expr::integer(3));
        let got = diff(&e, &mut wrt_x);
        assert_eq!(got.to_string(), "3*x**2");
    }

    #[test]
    fn product_rule() {
        let e = Expr::mul([x(), Expr::symbol("y")]);
        let got = diff(&e, &mut |s: &Symbol| Expr::symbol(&format!("{}_d", s.name())));
        assert_eq!(got.to_string(), "x*y_d + x_d*y");
    }

    #[test]
    fn chain_rule() {
        let e = Expr::func(Func::Sin, Expr::pow(x(), Expr::integer(2)));
        let got = diff(&e, &mut wrt_x);
        assert_eq!(got.to_string(), "2*x*cos(x**2)");
    }

    #[test]
    fn quotient() {
        let e = Expr::pow(x(), Expr::integer(-1));
        let got = diff(&e, &mut wrt_x);
        assert_eq!(got.to_string(), "-1/x**2");
    }

    #[test]
    fn constants_have_zero_derivative() {
        let e = Expr::add([Expr::symbol("k"), Expr::integer(7)]);
        assert_eq!(diff(&e, &mut wrt_x), Expr::zero());
    }

    #[test]
    fn fallible_rule_propagates_error() {
        let e = Expr::add([x(), Expr::symbol("bad")]);
        let got: Result<Expr, String> = try_diff(&e, &mut |s: &Symbol| {
            if s.name() == "bad" {
                Err(s.name().to_string())
            } else {
                Ok(Expr::one())
            }
        });
        assert_eq!(got, Err("bad".to_string()));
    }
}
