//! Tx: the transactional batch and its wire codec
//!
//! - op: data model (TxMsg, TxOp, TxInfo, opcodes)
//! - pool: reuse pool with exclusive handles and ref-counted fan-out
//! - codec: bit-exact wire encoding with delta-compressed op records
//! - build: the attribute-writer that assembles outgoing Txs

pub mod build;
pub mod codec;
pub mod op;
pub mod pool;

pub use build::TxBuilder;
pub use codec::{decode_tx, encode_tx, TX_VERSION};
pub use op::{OpCode, TxInfo, TxMsg, TxOp, TxStatus};
pub use pool::{SharedTx, TxHandle, TxPool};

use thiserror::Error;

use crate::core::ValueError;

/// Tx assembly and codec failures.
///
/// Everything in the malformed family rejects exactly one Tx and must never
/// escalate to a transport disconnect; only `Io` (and a corrupt fixed
/// header, surfaced as `MarkerMismatch`) is fatal to the connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TxError {
    #[error("tx marker mismatch")]
    MarkerMismatch,

    #[error("tx version {got} below minimum {min}")]
    VersionUnsupported { got: u8, min: u8 },

    #[error("tx truncated reading {context}")]
    Truncated { context: &'static str },

    #[error("varint overflow in {field}")]
    VarintOverflow { field: &'static str },

    #[error("tx length invalid: {reason}")]
    LengthInvalid { reason: &'static str },

    #[error("tx info malformed: {0}")]
    InfoDecode(#[from] minicbor::decode::Error),

    #[error("unknown opcode {got}")]
    UnknownOpCode { got: u64 },

    #[error("op has nil {field}")]
    NilOpField { field: &'static str },

    #[error("tx exceeds limit: {what} {got} > {max}")]
    LimitExceeded {
        what: &'static str,
        got: usize,
        max: usize,
    },

    #[error("op payload {ofs}+{len} outside data area of {data_len} bytes")]
    PayloadRange { ofs: u64, len: u64, data_len: usize },

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TxError {
    /// True for the malformed-transaction class: the Tx is wholly rejected
    /// but the connection survives.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, TxError::Io(_) | TxError::MarkerMismatch)
    }
}
