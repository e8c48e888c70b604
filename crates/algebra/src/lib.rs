//! # Algebra
//!
//! A small symbolic algebra system for the scalar expressions produced by the Ricci compiler.
//!
//! Every [`Expr`] is kept in a canonical form: sums and products are flattened,
//! numeric coefficients are folded into exact rationals,
//! like terms are combined and the operands are sorted.
//! Two expressions that are algebraically equal after this normalization compare equal
//! with `==`, which is what the tensor compiler relies on when it checks symmetry aliases.
//!
//! Expressions are built using the constructor functions rather than the enum variants directly:
//!
//! ```
//! use algebra::Expr;
//! let x = Expr::symbol("x");
//! let y = Expr::symbol("y");
//! let e = Expr::add([x.clone(), y.clone(), x.clone()]);
//! assert_eq!(e.to_string(), "2*x + y");
//! ```

mod diff;
mod expr;
mod order;
mod print;

pub use diff::diff;
pub use diff::try_diff;
pub use expr::Expr;
pub use expr::Func;
pub use expr::Number;
pub use expr::Symbol;
