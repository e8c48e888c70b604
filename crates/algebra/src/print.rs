//! Plain-text rendering of expressions.
//!
//! The output uses `*` for multiplication and `**` for powers.
//! Factors with negative numeric exponents are collected into a denominator,
//!     and terms with negative coefficients are joined with ` - `.

use crate::{Expr, Func, Number};
use num_traits::{One, Signed};
use std::fmt;

const ADD: u8 = 1;
const MUL: u8 = 2;
const POW: u8 = 3;
const ATOM: u8 = 4;

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write_number(f, n),
            Expr::Symbol(s) => write!(f, "{s}"),
            Expr::Func(Func::Exp, arg) if arg.is_one() => write!(f, "E"),
            Expr::Func(g, arg) => write!(f, "{}({})", g.name(), arg),
            Expr::Pow(base, exponent) => {
                if is_negative_number(exponent) {
                    write_product(f, Number::one(), std::slice::from_ref(self))
                } else {
                    write_power(f, base, exponent)
                }
            }
            Expr::Mul(factors) => {
                let (coefficient, rest) = split_coefficient(factors);
                write_product(f, coefficient, rest)
            }
            Expr::Add(terms) => write_sum(f, terms),
        }
    }
}

fn write_number(f: &mut fmt::Formatter<'_>, n: &Number) -> fmt::Result {
    if n.is_integer() {
        write!(f, "{}", n.numer())
    } else {
        write!(f, "{}/{}", n.numer(), n.denom())
    }
}

fn write_sum(f: &mut fmt::Formatter<'_>, terms: &[Expr]) -> fmt::Result {
    for (i, term) in terms.iter().enumerate() {
        let negative = is_negative_term(term);
        match (i, negative) {
            (0, true) => write!(f, "-")?,
            (0, false) => {}
            (_, true) => write!(f, " - ")?,
            (_, false) => write!(f, " + ")?,
        }
        if !negative {
            write!(f, "{term}")?;
            continue;
        }
        match term {
            Expr::Number(n) => write_number(f, &-n)?,
            Expr::Mul(factors) => {
                let (coefficient, rest) = split_coefficient(factors);
                write_product(f, -coefficient, rest)?;
            }
            _ => write!(f, "{term}")?,
        }
    }
    Ok(())
}

fn write_product(f: &mut fmt::Formatter<'_>, coefficient: Number, factors: &[Expr]) -> fmt::Result {
    let mut coefficient = coefficient;
    if coefficient.is_negative() {
        write!(f, "-")?;
        coefficient = -coefficient;
    }
    let mut numerator: Vec<String> = vec![];
    // Each denominator factor is paired with whether it can stand alone after a `/`.
    let mut denominator: Vec<(String, bool)> = vec![];
    if !coefficient.numer().is_one() {
        numerator.push(coefficient.numer().to_string());
    }
    if !coefficient.denom().is_one() {
        denominator.push((coefficient.denom().to_string(), true));
    }
    for factor in factors {
        if let Expr::Pow(base, exponent) = factor {
            if let Expr::Number(n) = exponent.as_ref() {
                if n.is_negative() {
                    let inverted = Expr::pow((**base).clone(), Expr::Number(-n));
                    let p = precedence(&inverted);
                    denominator.push((wrap(&inverted, MUL), p >= POW || p == ADD));
                    continue;
                }
            }
        }
        numerator.push(wrap(factor, MUL));
    }
    if numerator.is_empty() {
        numerator.push("1".to_string());
    }
    write!(f, "{}", numerator.join("*"))?;
    match denominator.as_slice() {
        [] => Ok(()),
        [(text, true)] => write!(f, "/{text}"),
        _ => {
            let texts: Vec<&str> = denominator.iter().map(|(text, _)| text.as_str()).collect();
            write!(f, "/({})", texts.join("*"))
        }
    }
}

fn write_power(f: &mut fmt::Formatter<'_>, base: &Expr, exponent: &Expr) -> fmt::Result {
    if let Expr::Number(n) = exponent {
        if *n == Number::new(1, 2) {
            return write!(f, "sqrt({base})");
        }
    }
    write!(f, "{}**", wrap(base, ATOM))?;
    match exponent {
        Expr::Number(n) if n.is_integer() && !n.is_negative() => write!(f, "{}", n.numer()),
        Expr::Number(_) => write!(f, "({exponent})"),
        Expr::Symbol(_) | Expr::Func(..) => write!(f, "{exponent}"),
        _ => write!(f, "({exponent})"),
    }
}

fn split_coefficient(factors: &[Expr]) -> (Number, &[Expr]) {
    match factors.split_first() {
        Some((Expr::Number(n), rest)) => (*n, rest),
        _ => (Number::one(), factors),
    }
}

fn is_negative_number(e: &Expr) -> bool {
    matches!(e, Expr::Number(n) if n.is_negative())
}

fn is_negative_term(e: &Expr) -> bool {
    match e {
        Expr::Number(n) => n.is_negative(),
        Expr::Mul(factors) => matches!(factors.first(), Some(Expr::Number(n)) if n.is_negative()),
        _ => false,
    }
}

fn precedence(e: &Expr) -> u8 {
    match e {
        Expr::Add(_) => ADD,
        Expr::Mul(_) => MUL,
        Expr::Number(n) => {
            if n.is_integer() && !n.is_negative() {
                ATOM
            } else {
                MUL
            }
        }
        Expr::Pow(_, exponent) => {
            if is_negative_number(exponent) {
                MUL
            } else {
                POW
            }
        }
        Expr::Symbol(_) | Expr::Func(..) => ATOM,
    }
}

fn wrap(e: &Expr, min: u8) -> String {
    if precedence(e) < min {
        format!("({e})")
    } else {
        e.to_string()
    }
}
