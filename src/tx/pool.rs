//! TxMsg reuse pool.
//!
//! Exclusive ownership while a Tx is assembled or decoded ([`TxHandle`]),
//! ref-counted read-only sharing for fan-out ([`SharedTx`]). Every handle
//! returns its message to the pool zeroed; a partially-filled Tx abandoned
//! on an error path goes through the same reset.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use crate::core::Limits;

use super::op::TxMsg;

/// Free list of reset TxMsg instances.
pub struct TxPool {
    free: Mutex<Vec<TxMsg>>,
    max_free_msgs: usize,
    max_retained_bytes: usize,
    fanout_share_bytes: usize,
}

impl TxPool {
    pub fn new(limits: &Limits) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            max_free_msgs: limits.pool_max_free_msgs,
            max_retained_bytes: limits.pool_max_retained_bytes,
            fanout_share_bytes: limits.fanout_share_bytes,
        })
    }

    /// Take a reset message from the free list, or allocate.
    pub fn acquire(self: &Arc<Self>) -> TxHandle {
        let msg = self
            .free
            .lock()
            .expect("tx pool lock")
            .pop()
            .unwrap_or_default();
        TxHandle {
            msg: Some(msg),
            pool: Arc::clone(self),
        }
    }

    /// Free messages currently held (test observability).
    pub fn free_count(&self) -> usize {
        self.free.lock().expect("tx pool lock").len()
    }

    fn reclaim(&self, mut msg: TxMsg) {
        msg.reset();
        if msg.data.capacity() > self.max_retained_bytes {
            return;
        }
        let mut free = self.free.lock().expect("tx pool lock");
        if free.len() < self.max_free_msgs {
            free.push(msg);
        }
    }
}

/// Exclusive handle on a pooled TxMsg. Dropping it releases the message back
/// to the pool; callers hold exactly one release responsibility.
pub struct TxHandle {
    msg: Option<TxMsg>,
    pool: Arc<TxPool>,
}

impl std::fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxHandle")
            .field("present", &self.msg.is_some())
            .finish()
    }
}

impl TxHandle {
    /// Convert to a ref-counted read-only handle for fan-out.
    pub fn share(self) -> SharedTx {
        SharedTx(Arc::new(self))
    }

    pub(crate) fn pool(&self) -> &Arc<TxPool> {
        &self.pool
    }
}

impl Deref for TxHandle {
    type Target = TxMsg;

    fn deref(&self) -> &TxMsg {
        self.msg.as_ref().expect("tx handle already released")
    }
}

impl DerefMut for TxHandle {
    fn deref_mut(&mut self) -> &mut TxMsg {
        self.msg.as_mut().expect("tx handle already released")
    }
}

impl Drop for TxHandle {
    fn drop(&mut self) {
        if let Some(msg) = self.msg.take() {
            self.pool.reclaim(msg);
        }
    }
}

/// Ref-counted, read-only view of a finished Tx.
///
/// No holder may mutate a shared Tx; the underlying message returns to the
/// pool when the last reference drops.
#[derive(Clone)]
pub struct SharedTx(Arc<TxHandle>);

impl SharedTx {
    /// Hand this Tx to one more independent consumer.
    ///
    /// Large payloads are shared by reference to bound memory growth under
    /// fan-out; small ones are deep-copied so consumers stay independent of
    /// each other's lifetimes. The threshold is `Limits::fanout_share_bytes`.
    pub fn fanout(&self) -> SharedTx {
        let pool = self.0.pool();
        if self.data.len() >= pool.fanout_share_bytes {
            return self.clone();
        }
        let mut copy = pool.acquire();
        copy.info = self.info;
        copy.ops.extend_from_slice(&self.ops);
        copy.data.extend_from_slice(&self.data);
        copy.share()
    }
}

impl Deref for SharedTx {
    type Target = TxMsg;

    fn deref(&self) -> &TxMsg {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SeriesIndex, TagId};
    use crate::tx::op::{OpCode, TxOp};

    fn pool_with(fanout_share_bytes: usize) -> Arc<TxPool> {
        TxPool::new(&Limits {
            fanout_share_bytes,
            ..Limits::default()
        })
    }

    fn filled(pool: &Arc<TxPool>, payload_len: usize) -> TxHandle {
        let mut tx = pool.acquire();
        tx.data.extend(std::iter::repeat(0xAB).take(payload_len));
        let mut op = TxOp::new(
            OpCode::UpsertAttr,
            TagId::from_literal("cell"),
            TagId::from_literal("attr").attr_uid(),
        );
        op.series = SeriesIndex::from(1);
        op.len = payload_len as u64;
        tx.ops.push(op);
        tx
    }

    #[test]
    fn released_messages_come_back_reset() {
        let pool = pool_with(4096);
        drop(filled(&pool, 64));
        assert_eq!(pool.free_count(), 1);

        let tx = pool.acquire();
        assert!(tx.ops.is_empty());
        assert!(tx.data.is_empty());
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn small_fanout_deep_copies() {
        let pool = pool_with(4096);
        let shared = filled(&pool, 16).share();
        let other = shared.fanout();
        assert_eq!(other.data, shared.data);
        assert!(!std::ptr::eq(other.data.as_ptr(), shared.data.as_ptr()));
    }

    #[test]
    fn large_fanout_shares_by_reference() {
        let pool = pool_with(64);
        let shared = filled(&pool, 128).share();
        let other = shared.fanout();
        assert!(std::ptr::eq(other.data.as_ptr(), shared.data.as_ptr()));

        // The message survives until every holder releases.
        drop(shared);
        assert_eq!(pool.free_count(), 0);
        drop(other);
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn oversized_buffers_are_not_retained() {
        let pool = TxPool::new(&Limits {
            pool_max_retained_bytes: 32,
            ..Limits::default()
        });
        drop(filled(&pool, 1024));
        assert_eq!(pool.free_count(), 0);
    }
}
