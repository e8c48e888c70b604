//! Permutations, the Levi-Civita symbol and the Kronecker delta.

use crate::table::{all_components, Sign, Symmetry, TensorValue};
use algebra::Expr;

/// All permutations of `0..n` in lexicographic order, each with its sign.
pub fn permutations(n: usize) -> Vec<(Vec<usize>, Sign)> {
    let mut result = vec![];
    let mut current: Vec<usize> = (0..n).collect();
    loop {
        result.push((current.clone(), parity(&current)));
        if !next_permutation(&mut current) {
            return result;
        }
    }
}

/// Rearranges the slice into the next permutation in lexicographic order.
///
/// Returns false if the slice was already the last permutation.
fn next_permutation(p: &mut [usize]) -> bool {
    let Some(i) = (1..p.len()).rev().find(|&i| p[i - 1] < p[i]) else {
        return false;
    };
    let pivot = i - 1;
    let Some(j) = (i..p.len()).rev().find(|&j| p[j] > p[pivot]) else {
        return false;
    };
    p.swap(pivot, j);
    p[i..].reverse();
    true
}

/// Sign of the permutation needed to sort the index, or zero if it has a repeated value.
pub fn parity(index: &[usize]) -> Sign {
    let mut sorted = index.to_vec();
    Symmetry::Permutation.canonicalize(&mut sorted)
}

/// The Levi-Civita symbol of rank `dimension`.
pub fn levi_civita(dimension: usize) -> TensorValue {
    let mut value = TensorValue::zeros(dimension, dimension);
    for (index, sign) in permutations(dimension) {
        value.set(&index, sign.apply(Expr::one()));
    }
    value
}

/// The Kronecker delta in the given dimension.
pub fn kronecker(dimension: usize) -> TensorValue {
    let mut value = TensorValue::zeros(2, dimension);
    for i in 0..dimension {
        value.set(&[i, i], Expr::one());
    }
    value
}

/// Determinant of a square matrix given as a rank 2 tensor, by the Leibniz formula.
pub fn determinant(matrix: &TensorValue) -> Expr {
    let n = matrix.dimension();
    Expr::add(permutations(n).into_iter().map(|(p, sign)| {
        let factors = p
            .iter()
            .enumerate()
            .map(|(row, &column)| matrix.get(&[row, column]).cloned().unwrap_or_else(Expr::zero));
        sign.apply(Expr::mul(factors))
    }))
}

/// Inverse of a square matrix given as a rank 2 tensor, by the adjugate formula.
///
/// The determinant is returned alongside the inverse.
pub fn inverse(matrix: &TensorValue) -> (TensorValue, Expr) {
    let n = matrix.dimension();
    let det = determinant(matrix);
    let inverse_det = Expr::pow(det.clone(), Expr::integer(-1));
    let mut result = TensorValue::zeros(2, n);
    for index in all_components(2, n) {
        let (i, j) = (index[0], index[1]);
        // The (i, j) entry of the inverse is the (j, i) cofactor over the determinant.
        let mut minor = TensorValue::zeros(2, n - 1);
        for (r, row) in (0..n).filter(|&r| r != j).enumerate() {
            for (c, column) in (0..n).filter(|&c| c != i).enumerate() {
                if let Some(entry) = matrix.get(&[row, column]) {
                    minor.set(&[r, c], entry.clone());
                }
            }
        }
        let cofactor = if n == 1 {
            Expr::one()
        } else {
            determinant(&minor)
        };
        let cofactor = if (i + j) % 2 == 0 {
            cofactor
        } else {
            cofactor.neg()
        };
        result.set(&[i, j], Expr::mul([cofactor, inverse_det.clone()]));
    }
    (result, det)
}
