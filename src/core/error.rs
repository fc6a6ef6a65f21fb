//! Core capability errors (identity, values, registry).
//!
//! These are bounded and stable: they represent domain refusal states, not
//! library implementation details.

use std::convert::Infallible;

use thiserror::Error;

use super::tag::AttrUid;

/// Attribute value (un)marshal failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ValueError {
    #[error("value payload malformed: {0}")]
    Decode(#[from] minicbor::decode::Error),

    #[error("value encode failed: {0}")]
    Encode(#[from] minicbor::encode::Error<Infallible>),

    #[error("value payload has {got} trailing bytes")]
    TrailingBytes { got: usize },
}

/// Registry lookup and registration failures.
///
/// `AttrNotFound` is the load-bearing failure of the whole protocol: a peer
/// referenced a type this process has never seen. It is recoverable per
/// operation and must never be escalated to a transport disconnect.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("attribute {uid} is not registered")]
    AttrNotFound { uid: AttrUid },

    #[error("no app registered for `{invocation}`")]
    AppNotFound { invocation: String },
}
