//! This crate provides type inference and reduction for a typed lambda
//! calculus in which types are ordinary expressions.
//!
//! Every [Expr] carries a higher order that is itself an expression, so a
//! term such as `true` has the tower `true : bool : Fourth : DeadEnd`.
//! Missing annotations are written as [Expr::unspecified] and replaced by
//! inference placeholders; the [Environment] runs a four-phase traversal
//! (make-rewritable, infer, fixup, reduce) that unifies placeholders over a
//! topology of subtype edges and finally beta-reduces the expression.
//!
//! Types combine algebraically: `int && bool` narrows, `int || bool`
//! widens, and the [TypeCalculator] normalizes such combinations over the
//! subtype lattice described by a pluggable [Choicer].
//!
//! # Example
//! Infer the type of an application `a b` where nothing is annotated.  The
//! function side is forced into an arrow type and both sides stay linked
//! through placeholders:
//! ```
//! use lamtyc::{Environment, Expr};
//!
//! # fn main() -> lamtyc::Result<()> {
//! let env = Environment::new();
//! let expr = Expr::apply(Expr::variable("a"), Expr::variable("b"));
//! let inferred = env.infer(&expr)?;
//! // a : '0 -> '1,  b : '0,  (a b) : '1
//! assert_eq!(format!("{inferred}"), "a b");
//! # Ok(())
//! # }
//! ```
//!
//! Reduction applies lambdas call-by-name through the scope chain, so the
//! identity function applied to a literal collapses to the literal, typed
//! by what flowed through the placeholders:
//! ```
//! use lamtyc::{Environment, Expr};
//!
//! # fn main() -> lamtyc::Result<()> {
//! let env = Environment::new();
//! let identity = Expr::lambda(
//!     Expr::bound_variable("x", Expr::unspecified()),
//!     Expr::variable("x"),
//! );
//! let reduced = env.reduce(&Expr::apply(identity, Expr::bool_literal(true)))?;
//! assert_eq!(format!("{reduced}"), "true");
//! # Ok(())
//! # }
//! ```

#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    // missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    rustdoc::broken_intra_doc_links,
    unused_results
)]

mod calculator;
mod context;
mod environment;
mod error;
mod expr;
mod pretty;
#[cfg(test)]
mod tests;
mod topology;
mod unifier;

pub use calculator::{Choice, Choicer, TypeCalculator, TypeChoicer};
pub use environment::{Environment, VariableInfo};
pub use error::{InferError, Result};
pub use expr::{Expr, ExprRef, Literal, NativeFn, OrderHint};
pub use pretty::annotated;
