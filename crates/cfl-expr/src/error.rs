use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExprError {
    /// Cardinality cannot be computed yet; callers keep the term residual.
    #[error("cardinality of {0} is not derivable")]
    NotDerivable(String),
    #[error("name '{0}' is not bound")]
    NotBound(String),
}

#[derive(Debug, Error)]
pub enum TicketEncodeError {
    #[error("failed to encode ticket identity: {0}")]
    Identity(#[from] serde_cbor::Error),
}
