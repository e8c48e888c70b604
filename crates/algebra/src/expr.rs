use crate::order;
use num_rational::Rational64;
use num_traits::{CheckedAdd, CheckedMul, One, Signed, Zero};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Exact rational number used for all numeric coefficients.
pub type Number = Rational64;

/// A named scalar unknown.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn new(name: &str) -> Symbol {
        Symbol(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Elementary function of one argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Sinh,
    Cosh,
    Tanh,
    Asin,
    Acos,
    Atan,
    Asinh,
    Acosh,
    Atanh,
    Exp,
    Log,
}

impl Func {
    pub fn name(self) -> &'static str {
        use Func::*;
        match self {
            Sin => "sin",
            Cos => "cos",
            Tan => "tan",
            Sinh => "sinh",
            Cosh => "cosh",
            Tanh => "tanh",
            Asin => "asin",
            Acos => "acos",
            Atan => "atan",
            Asinh => "asinh",
            Acosh => "acosh",
            Atanh => "atanh",
            Exp => "exp",
            Log => "log",
        }
    }

    /// Returns the inverse function.
    pub fn inverse(self) -> Func {
        use Func::*;
        match self {
            Sin => Asin,
            Cos => Acos,
            Tan => Atan,
            Sinh => Asinh,
            Cosh => Acosh,
            Tanh => Atanh,
            Asin => Sin,
            Acos => Cos,
            Atan => Tan,
            Asinh => Sinh,
            Acosh => Cosh,
            Atanh => Tanh,
            Exp => Log,
            Log => Exp,
        }
    }

    /// Whether this function is the inverse of another, in the sense that
    ///     `f.inverse()(f(x))` always simplifies to `x`.
    fn is_inverse(self) -> bool {
        use Func::*;
        matches!(self, Asin | Acos | Atan | Asinh | Acosh | Atanh | Log)
    }

    fn at_zero(self) -> Option<Number> {
        use Func::*;
        match self {
            Sin | Tan | Sinh | Tanh | Asin | Atan | Asinh | Atanh => Some(Number::zero()),
            Cos | Cosh | Exp => Some(Number::one()),
            Acos | Acosh | Log => None,
        }
    }
}

/// A scalar expression in canonical form.
///
/// The variants are public for pattern matching,
///     but new values should be built with [`Expr::add`], [`Expr::mul`], [`Expr::pow`]
///     and [`Expr::func`] so that the canonical form is maintained.
/// The derived ordering is only used to make the canonical form deterministic.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Expr {
    Number(Number),
    Symbol(Symbol),
    Func(Func, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    /// Product of at least two factors.
    /// If there is a numeric coefficient it is the first factor.
    Mul(Vec<Expr>),
    /// Sum of at least two terms.
    Add(Vec<Expr>),
}

impl Expr {
    pub fn zero() -> Expr {
        Expr::Number(Number::zero())
    }

    pub fn one() -> Expr {
        Expr::Number(Number::one())
    }

    pub fn integer(n: i64) -> Expr {
        Expr::Number(Number::from_integer(n))
    }

    pub fn rational(numer: i64, denom: i64) -> Expr {
        Expr::Number(Number::new(numer, denom))
    }

    pub fn number(n: Number) -> Expr {
        Expr::Number(n)
    }

    pub fn symbol(name: &str) -> Expr {
        Expr::Symbol(Symbol::new(name))
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Number(n) if n.is_zero())
    }

    pub fn is_one(&self) -> bool {
        matches!(self, Expr::Number(n) if n.is_one())
    }

    pub fn as_number(&self) -> Option<Number> {
        match self {
            Expr::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Expr::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Sum of the provided terms.
    ///
    /// Numbers whose sum overflows are kept as separate terms.
    pub fn add<I: IntoIterator<Item = Expr>>(terms: I) -> Expr {
        let mut constant = Number::zero();
        let mut coefficients: BTreeMap<Expr, Number> = BTreeMap::new();
        let mut unmerged: Vec<Expr> = vec![];
        let mut pending: Vec<Expr> = terms.into_iter().collect();
        while let Some(term) = pending.pop() {
            match term {
                Expr::Number(n) => match constant.checked_add(&n) {
                    Some(sum) => constant = sum,
                    None => unmerged.push(Expr::Number(n)),
                },
                Expr::Add(inner) => pending.extend(inner),
                term => {
                    let (coefficient, rest) = term.split_coefficient();
                    match coefficients.get(&rest).map(|c| c.checked_add(&coefficient)) {
                        None => {
                            coefficients.insert(rest, coefficient);
                        }
                        Some(Some(sum)) => {
                            coefficients.insert(rest, sum);
                        }
                        Some(None) => unmerged.push(Expr::scale(coefficient, rest)),
                    }
                }
            }
        }
        let mut terms: Vec<Expr> = coefficients
            .into_iter()
            .filter(|(_, coefficient)| !coefficient.is_zero())
            .map(|(rest, coefficient)| Expr::scale(coefficient, rest))
            .collect();
        if !constant.is_zero() {
            terms.push(Expr::Number(constant));
        }
        terms.extend(unmerged);
        match terms.len() {
            0 => Expr::zero(),
            1 => terms.swap_remove(0),
            _ => {
                terms.sort_by(order::term_cmp);
                Expr::Add(terms)
            }
        }
    }

    /// Product of the provided factors.
    ///
    /// A rational coefficient multiplying a single sum is distributed over the sum,
    ///     so `2*(x + 1)` becomes `2*x + 2`.
    /// Numbers whose product overflows are kept as separate factors.
    pub fn mul<I: IntoIterator<Item = Expr>>(factors: I) -> Expr {
        let mut coefficient = Number::one();
        let mut unmerged: Vec<Expr> = vec![];
        let mut exponents: BTreeMap<Expr, Vec<Expr>> = BTreeMap::new();
        let mut pending: Vec<Expr> = factors.into_iter().collect();
        while let Some(factor) = pending.pop() {
            match factor {
                Expr::Number(n) => {
                    if n.is_zero() {
                        return Expr::zero();
                    }
                    match coefficient.checked_mul(&n) {
                        Some(product) => coefficient = product,
                        None => unmerged.push(Expr::Number(n)),
                    }
                }
                Expr::Mul(inner) => pending.extend(inner),
                Expr::Pow(base, exponent) => exponents.entry(*base).or_default().push(*exponent),
                other => exponents.entry(other).or_default().push(Expr::one()),
            }
        }
        let mut factors = Vec::with_capacity(exponents.len() + 1);
        let mut needs_merge = false;
        for (base, exponents) in exponents {
            match Expr::pow(base, Expr::add(exponents)) {
                Expr::Number(n) => match coefficient.checked_mul(&n) {
                    Some(product) => coefficient = product,
                    None => unmerged.push(Expr::Number(n)),
                },
                Expr::Mul(inner) => {
                    needs_merge = true;
                    factors.extend(inner);
                }
                other => factors.push(other),
            }
        }
        factors.extend(unmerged);
        if coefficient.is_zero() {
            return Expr::zero();
        }
        if needs_merge {
            factors.push(Expr::Number(coefficient));
            return Expr::mul(factors);
        }
        if factors.is_empty() {
            return Expr::Number(coefficient);
        }
        factors.sort_by(order::factor_cmp);
        if factors.len() == 1 {
            let factor = factors.swap_remove(0);
            if coefficient.is_one() {
                return factor;
            }
            if let Expr::Add(terms) = factor {
                return Expr::add(
                    terms
                        .into_iter()
                        .map(|term| Expr::mul([Expr::Number(coefficient), term])),
                );
            }
            return Expr::Mul(vec![Expr::Number(coefficient), factor]);
        }
        if !coefficient.is_one() {
            factors.insert(0, Expr::Number(coefficient));
        }
        Expr::Mul(factors)
    }

    /// The expression `base` raised to the power `exponent`.
    pub fn pow(base: Expr, exponent: Expr) -> Expr {
        if exponent.is_zero() {
            return Expr::one();
        }
        if exponent.is_one() {
            return base;
        }
        match (base, exponent) {
            (Expr::Number(b), _) if b.is_one() => Expr::one(),
            (Expr::Number(b), Expr::Number(e)) => match number_pow(b, e) {
                Some(n) => Expr::Number(n),
                None if b.is_zero() && e.is_positive() => Expr::zero(),
                None => Expr::Pow(Box::new(Expr::Number(b)), Box::new(Expr::Number(e))),
            },
            (Expr::Pow(b, e1), Expr::Number(e2)) if e2.is_integer() => {
                Expr::pow(*b, Expr::mul([*e1, Expr::Number(e2)]))
            }
            (Expr::Mul(factors), Expr::Number(e)) if e.is_integer() => Expr::mul(
                factors
                    .into_iter()
                    .map(|factor| Expr::pow(factor, Expr::Number(e))),
            ),
            (Expr::Func(Func::Exp, arg), e) => Expr::func(Func::Exp, Expr::mul([*arg, e])),
            (base, exponent) => Expr::Pow(Box::new(base), Box::new(exponent)),
        }
    }

    /// The function `f` applied to `arg`.
    pub fn func(f: Func, arg: Expr) -> Expr {
        if let Expr::Func(g, inner) = &arg {
            if g.is_inverse() && g.inverse() == f {
                return (**inner).clone();
            }
        }
        if arg.is_zero() {
            if let Some(n) = f.at_zero() {
                return Expr::Number(n);
            }
        }
        if f == Func::Log && arg.is_one() {
            return Expr::zero();
        }
        Expr::Func(f, Box::new(arg))
    }

    pub fn sqrt(arg: Expr) -> Expr {
        Expr::pow(arg, Expr::rational(1, 2))
    }

    pub fn neg(self) -> Expr {
        Expr::mul([Expr::integer(-1), self])
    }

    pub fn sub(self, rhs: Expr) -> Expr {
        Expr::add([self, rhs.neg()])
    }

    pub fn div(self, rhs: Expr) -> Expr {
        Expr::mul([self, Expr::pow(rhs, Expr::integer(-1))])
    }

    /// Replaces symbols using the provided function.
    ///
    /// Symbols for which the function returns `None` are left unchanged.
    /// The result is rebuilt through the constructors, so it is canonical.
    pub fn substitute<F: FnMut(&Symbol) -> Option<Expr>>(&self, f: &mut F) -> Expr {
        match self {
            Expr::Number(_) => self.clone(),
            Expr::Symbol(s) => f(s).unwrap_or_else(|| self.clone()),
            Expr::Func(g, arg) => Expr::func(*g, arg.substitute(f)),
            Expr::Pow(base, exponent) => Expr::pow(base.substitute(f), exponent.substitute(f)),
            Expr::Mul(factors) => Expr::mul(factors.iter().map(|factor| factor.substitute(f))),
            Expr::Add(terms) => Expr::add(terms.iter().map(|term| term.substitute(f))),
        }
    }

    /// All symbols that appear in this expression.
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        let mut symbols = BTreeSet::new();
        self.collect_symbols(&mut symbols);
        symbols
    }

    fn collect_symbols(&self, symbols: &mut BTreeSet<Symbol>) {
        match self {
            Expr::Number(_) => {}
            Expr::Symbol(s) => {
                symbols.insert(s.clone());
            }
            Expr::Func(_, arg) => arg.collect_symbols(symbols),
            Expr::Pow(base, exponent) => {
                base.collect_symbols(symbols);
                exponent.collect_symbols(symbols);
            }
            Expr::Mul(children) | Expr::Add(children) => {
                for child in children {
                    child.collect_symbols(symbols);
                }
            }
        }
    }

    /// Number of terms when the expression is viewed as a sum.
    pub fn num_terms(&self) -> usize {
        match self {
            Expr::Add(terms) => terms.len(),
            e if e.is_zero() => 0,
            _ => 1,
        }
    }

    /// Splits off the numeric coefficient of a term.
    pub(crate) fn split_coefficient(self) -> (Number, Expr) {
        match self {
            Expr::Mul(mut factors) => match factors.first() {
                Some(Expr::Number(n)) => {
                    let n = *n;
                    factors.remove(0);
                    let rest = if factors.len() == 1 {
                        factors.swap_remove(0)
                    } else {
                        Expr::Mul(factors)
                    };
                    (n, rest)
                }
                _ => (Number::one(), Expr::Mul(factors)),
            },
            Expr::Number(n) => (n, Expr::one()),
            other => (Number::one(), other),
        }
    }

    fn scale(coefficient: Number, expr: Expr) -> Expr {
        if coefficient.is_one() {
            return expr;
        }
        match expr {
            Expr::Mul(factors) => {
                let mut scaled = Vec::with_capacity(factors.len() + 1);
                scaled.push(Expr::Number(coefficient));
                scaled.extend(factors);
                Expr::Mul(scaled)
            }
            other => Expr::Mul(vec![Expr::Number(coefficient), other]),
        }
    }
}

fn number_pow(base: Number, exponent: Number) -> Option<Number> {
    if !exponent.is_integer() {
        return None;
    }
    let e = *exponent.numer();
    if e.unsigned_abs() > 64 || (base.is_zero() && e < 0) {
        return None;
    }
    let mut result = Number::one();
    for _ in 0..e.unsigned_abs() {
        result = result.checked_mul(&base)?;
    }
    Some(if e < 0 { result.recip() } else { result })
}

impl From<i64> for Expr {
    fn from(n: i64) -> Self {
        Expr::integer(n)
    }
}

impl From<Number> for Expr {
    fn from(n: Number) -> Self {
        Expr::Number(n)
    }
}

impl std::ops::Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::add([self, rhs])
    }
}

impl std::ops::Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::sub(self, rhs)
    }
}

impl std::ops::Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::mul([self, rhs])
    }
}

impl std::ops::Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::div(self, rhs)
    }
}

impl std::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::neg(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Expr {
        Expr::symbol("x")
    }

    fn y() -> Expr {
        Expr::symbol("y")
    }

    #[test]
    fn like_terms_combine() {
        let e = Expr::add([x(), Expr::mul([Expr::integer(2), x()]), y()]);
        assert_eq!(e, Expr::add([Expr::mul([Expr::integer(3), x()]), y()]));
    }

    #[test]
    fn terms_cancel_to_zero() {
        let e = Expr::add([x(), y(), x().neg(), y().neg()]);
        assert_eq!(e, Expr::zero());
    }

    #[test]
    fn product_is_commutative() {
        let a = Expr::mul([x(), y(), Expr::integer(2)]);
        let b = Expr::mul([Expr::integer(2), y(), x()]);
        assert_eq!(a, b);
    }

    #[test]
    fn overflowing_product_keeps_factors() {
        let big = Expr::integer(999_999_999_999);
        let e = Expr::mul([big.clone(), big]);
        assert_eq!(e.to_string(), "999999999999*999999999999");
    }

    #[test]
    fn overflowing_sum_keeps_terms() {
        let e = Expr::add([Expr::integer(i64::MAX), Expr::one()]);
        assert_eq!(e.to_string(), "1 + 9223372036854775807");
        let e = Expr::add([Expr::mul([Expr::integer(i64::MAX), x()]), x()]);
        assert!(matches!(e, Expr::Add(ref terms) if terms.len() == 2));
    }

    #[test]
    fn product_with_zero() {
        let e = Expr::mul([x(), Expr::zero(), y()]);
        assert_eq!(e, Expr::zero());
    }

    #[test]
    fn powers_of_same_base_combine() {
        let e = Expr::mul([x(), x(), Expr::pow(x(), Expr::integer(-2))]);
        assert_eq!(e, Expr::one());
    }

    #[test]
    fn nested_power_with_integer_exponent() {
        let e = Expr::pow(Expr::pow(x(), Expr::rational(1, 2)), Expr::integer(2));
        assert_eq!(e, x());
    }

    #[test]
    fn numeric_power() {
        assert_eq!(
            Expr::pow(Expr::rational(2, 3), Expr::integer(-2)),
            Expr::rational(9, 4)
        );
    }

    #[test]
    fn coefficient_distributes_over_single_sum() {
        let e = Expr::mul([Expr::integer(2), Expr::add([x(), Expr::one()])]);
        assert_eq!(
            e,
            Expr::add([Expr::mul([Expr::integer(2), x()]), Expr::integer(2)])
        );
    }

    #[test]
    fn inverse_functions_cancel() {
        let e = Expr::func(Func::Sin, Expr::func(Func::Asin, y()));
        assert_eq!(e, y());
        let e = Expr::func(Func::Exp, Expr::func(Func::Log, x()));
        assert_eq!(e, x());
    }

    #[test]
    fn forward_function_of_inverse_is_kept() {
        let e = Expr::func(Func::Asin, Expr::func(Func::Sin, y()));
        assert!(matches!(e, Expr::Func(Func::Asin, _)));
    }

    #[test]
    fn substitute_rebuilds_canonical_form() {
        let e = Expr::add([x(), y()]);
        let got = e.substitute(&mut |s: &Symbol| {
            if s.name() == "y" {
                Some(x())
            } else {
                None
            }
        });
        assert_eq!(got, Expr::mul([Expr::integer(2), x()]));
    }

    #[test]
    fn symbols_are_collected() {
        let e = Expr::add([x(), Expr::func(Func::Cos, y())]);
        let names: Vec<String> = e.symbols().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["x".to_string(), "y".to_string()]);
    }
}
