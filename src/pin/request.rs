//! Pin requests and the requester contract.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::core::{RegistryError, TagId};
use crate::error::Error;
use crate::tx::{SharedTx, TxError};

use super::task::TaskError;

/// What a request wants pinned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PinTarget {
    /// A cell by identity; resolvable only if a registered app claims it.
    Cell(TagId),
    /// A human-typed invocation, e.g. `"files"`.
    Literal(String),
    /// An invocation URL, e.g. `"files:/photos/spring"`.
    Url(String),
}

impl fmt::Display for PinTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinTarget::Cell(id) => write!(f, "cell:{id}"),
            PinTarget::Literal(s) => f.write_str(s),
            PinTarget::Url(u) => f.write_str(u),
        }
    }
}

/// Whether a pin completes after the initial state push or keeps streaming.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Deliver the current state once, then complete.
    #[default]
    None,
    /// Keep the subscription open for further pushes until canceled.
    Maintain,
}

/// A client-issued wish to observe a cell.
///
/// Consumed by exactly one pin state machine instance; discarded on
/// completion or cancellation.
#[derive(Clone, Debug)]
pub struct PinRequest {
    /// Owning request identity; replies route by it.
    pub id: TagId,
    pub target: PinTarget,
    pub mode: SyncMode,
}

impl PinRequest {
    pub fn new(target: PinTarget, mode: SyncMode) -> Self {
        Self {
            id: TagId::now(),
            target,
            mode,
        }
    }
}

/// Delivery side of a pin: where Txs and the terminal status go.
///
/// `on_complete` is invoked at most once per request by the state machine,
/// but implementations should stay no-op on a second call rather than assume
/// every caller honors that.
pub trait Requester: Send + Sync {
    fn push_tx(&self, tx: SharedTx) -> Result<(), PinError>;
    fn on_complete(&self, err: Option<Error>);
}

pub type SharedRequester = Arc<dyn Requester>;

/// Pin lifecycle failures.
///
/// `ShuttingDown` and `RequestClosed` are expected terminal conditions, not
/// failures; [`PinError::quiet`] marks them so callers skip error logging.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PinError {
    #[error("cell not found: {target}")]
    CellNotFound { target: String },

    #[error(transparent)]
    AppNotFound(#[from] RegistryError),

    #[error("pin declined: {reason}")]
    PinFailed { reason: String },

    #[error("pin not supported by app")]
    Unimplemented,

    #[error("request closed")]
    RequestClosed,

    #[error("shutting down")]
    ShuttingDown,

    #[error("timed out")]
    Timeout,

    #[error("authentication failed")]
    AuthFailed,

    #[error("attribute marshal failed: {0}")]
    Marshal(#[from] TxError),
}

impl PinError {
    /// Expected terminal conditions - completions, not failures.
    pub fn quiet(&self) -> bool {
        matches!(self, PinError::ShuttingDown | PinError::RequestClosed)
    }
}

impl From<TaskError> for PinError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::ShuttingDown => PinError::ShuttingDown,
        }
    }
}
