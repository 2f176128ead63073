use thiserror::Error;

/// Errors reported by the inference pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InferError {
    /// The unifier found two concrete expressions with no subtype relation.
    #[error("could not unify: {from} --> {to}")]
    CouldNotUnify {
        /// Pretty-printed source expression.
        from: String,
        /// Pretty-printed target expression.
        to: String,
    },

    /// Resolving a placeholder revisited an index already on the traversal
    /// path, e.g. `'0 ==> '2 ==> '0`.
    #[error("circular variable reference: {path}")]
    CircularVariable {
        /// The placeholder traversal path.
        path: String,
    },

    /// The same (symbol, expression) pair was bound twice.
    #[error("duplicate binding: {symbol}")]
    DuplicateBinding {
        /// The offending symbol.
        symbol: String,
    },
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, InferError>;
