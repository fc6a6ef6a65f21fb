#![forbid(unsafe_code)]

//! trellis - a runtime protocol for exposing hierarchical, typed, mutable
//! state ("cells") to observers and synchronizing updates over a byte-stream
//! transport. Observers pin a cell to receive its current state and,
//! optionally, a live stream of subsequent changes.

pub mod config;
pub mod core;
pub mod error;
pub mod pin;
pub mod telemetry;
pub mod transport;
pub mod tx;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::core::{
    AppDef, AppRuntime, AttrUid, AttrValue, AttrWriter, Limits, PinnedCell, Registry, SeriesIndex,
    TagId, TagSpec,
};
pub use crate::pin::{
    Host, PinError, PinRequest, PinTarget, PinUplink, Requester, SyncMode, Task,
};
pub use crate::tx::{OpCode, SharedTx, TxBuilder, TxMsg, TxPool};
