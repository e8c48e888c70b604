//! # Ricci
//!
//! A compiler from tensor equations written in LaTeX Ricci-calculus notation to
//!     fully expanded component expressions.
//!
//! A document interleaves `%` directives, which declare tensors, metrics and coordinates,
//!     with equations such as `T^{\mu}_{\nu} = \nabla_\nu v^\mu`.
//! Each equation is lowered to one scalar expression per distinct component of its
//!     left-hand side, with Einstein summations expanded and covariant derivatives
//!     replaced by partial derivatives and Christoffel terms.
//!
//! ```
//! let document = ricci::parse_document(r"
//!     % def vU (2), wD (2);
//!     s = v^i w_i
//! ").unwrap();
//! assert_eq!(document.symbols(), ["vU", "wD", "s"]);
//! assert_eq!(document.get("s").unwrap().to_string(), "vU0*wD0 + vU1*wD1");
//! ```
//!
//! Names of tensors are formed from the base name and one letter per index:
//!     `v^\mu` is `vU` and `\Gamma^a_{bc}` is `GammaUDD`.
//! The scalar symbol of a component appends the index values: `gUU01`.
//!
//! State such as declarations and cached connections lives in a [`Context`].
//! [`parse_document`] uses a fresh context for every call; callers that want to keep
//!     declarations across documents can own a context and call [`Context::parse`].

pub mod ast;
pub mod connection;
mod context;
pub mod covdrv;
mod directive;
pub mod error;
pub mod index;
pub mod lexer;
mod lower;
pub mod parse;
pub mod permutation;
mod suggest;
pub mod table;

pub use context::{Config, Context, Document, Value};
pub use error::{Error, ErrorKind, Warning};

/// Compiles a document in a fresh context.
pub fn parse_document(source: &str) -> Result<Document, Error> {
    let mut ctx = Context::default();
    ctx.parse(source)?;
    Ok(ctx.into_document())
}

/// Evaluates a single expression with no free indices in a fresh context.
///
/// ```
/// let expr = ricci::parse_expr(r"-(\frac{2}{3} + 2\sqrt[5]{x+3})").unwrap();
/// assert_eq!(expr.to_string(), "-2*(x + 3)**(1/5) - 2/3");
/// ```
pub fn parse_expr(source: &str) -> Result<algebra::Expr, Error> {
    Context::default().parse_expr(source)
}
