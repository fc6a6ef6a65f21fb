use thiserror::Error;

use crate::core::{RegistryError, ValueError};
use crate::pin::{PinError, TaskError};
use crate::tx::TxError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over canonical capability errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Tx(#[from] TxError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Pin(#[from] PinError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Value(_) => Transience::Permanent,
            // A registry miss is recoverable per operation, but retrying the
            // same lookup cannot succeed until something registers the type.
            Error::Registry(_) => Transience::Permanent,
            Error::Tx(e) if e.is_malformed() => Transience::Permanent,
            Error::Tx(_) => Transience::Unknown,
            Error::Task(TaskError::ShuttingDown) => Transience::Permanent,
            Error::Pin(PinError::Timeout) => Transience::Retryable,
            Error::Pin(e) if e.quiet() => Transience::Permanent,
            Error::Pin(_) => Transience::Unknown,
        }
    }

    /// Expected terminal conditions (shutdown, request closed) - completions
    /// to report quietly, never logged as failures.
    pub fn quiet(&self) -> bool {
        match self {
            Error::Task(TaskError::ShuttingDown) => true,
            Error::Pin(e) => e.quiet(),
            _ => false,
        }
    }
}
