//! Protocol safety limits (normative defaults).

use serde::{Deserialize, Serialize};

/// Hard bounds on allocation and batching behavior.
///
/// Values are intentionally explicit about their units to avoid confusion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Upper bound on a Tx body section (TxInfo + op records).
    pub max_tx_body_bytes: usize,
    /// Upper bound on a Tx payload area.
    pub max_tx_data_bytes: usize,
    /// Upper bound on ops in one Tx.
    pub max_ops_per_tx: usize,

    /// Free TxMsg instances the pool retains.
    pub pool_max_free_msgs: usize,
    /// Buffers larger than this are dropped instead of pooled.
    pub pool_max_retained_bytes: usize,
    /// Fan-out payloads at or above this size are shared by reference;
    /// smaller ones are deep-copied per consumer.
    pub fanout_share_bytes: usize,

    /// Delay before an idle app instance closes itself.
    pub idle_close_ms: u64,
    /// Concurrent pins one app instance will carry.
    pub max_pins_per_app: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_tx_body_bytes: 4 * 1024 * 1024,
            max_tx_data_bytes: 16 * 1024 * 1024,
            max_ops_per_tx: 10_000,

            pool_max_free_msgs: 64,
            pool_max_retained_bytes: 1024 * 1024,
            fanout_share_bytes: 4 * 1024,

            idle_close_ms: 1_000,
            max_pins_per_app: 1_024,
        }
    }
}
