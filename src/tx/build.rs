//! Outgoing Tx assembly.
//!
//! `TxBuilder` is the attribute-writer handed to a pinned cell during
//! marshaling: each upsert serializes its value into the shared data store
//! and appends one op referencing it.

use std::sync::Arc;

use crate::core::cell::AttrWriter;
use crate::core::{AttrUid, AttrValue, SeriesIndex, TagId};

use super::op::{OpCode, TxOp, TxStatus};
use super::pool::{SharedTx, TxHandle, TxPool};
use super::TxError;

pub struct TxBuilder {
    tx: TxHandle,
    max_ops: usize,
    max_data_bytes: usize,
}

impl TxBuilder {
    pub fn new(pool: &Arc<TxPool>, max_ops: usize, max_data_bytes: usize) -> Self {
        Self {
            tx: pool.acquire(),
            max_ops,
            max_data_bytes,
        }
    }

    pub fn op_count(&self) -> usize {
        self.tx.ops.len()
    }

    /// Stamp identity and status and seal the Tx for delivery.
    ///
    /// The genesis ID is time-derived here; `route_id` routes replies back
    /// to the owning request.
    pub fn finish(mut self, route_id: TagId) -> Result<SharedTx, TxError> {
        self.tx.info.genesis_id = TagId::now();
        self.tx.info.route_id = route_id;
        self.tx.info.op_count = self.tx.ops.len() as u32;
        self.tx.info.status = TxStatus::Synced;
        debug_assert!(self.tx.accounting_holds());
        Ok(self.tx.share())
    }
}

impl AttrWriter for TxBuilder {
    fn upsert(
        &mut self,
        code: OpCode,
        target: TagId,
        parent: TagId,
        attr: AttrUid,
        series: SeriesIndex,
        value: &dyn AttrValue,
    ) -> Result<(), TxError> {
        if target.is_nil() {
            return Err(TxError::NilOpField { field: "cell_id" });
        }
        if attr.is_nil() {
            return Err(TxError::NilOpField { field: "attr_id" });
        }
        if self.tx.ops.len() >= self.max_ops {
            return Err(TxError::LimitExceeded {
                what: "ops",
                got: self.tx.ops.len() + 1,
                max: self.max_ops,
            });
        }

        let ofs = self.tx.data.len() as u64;
        value.marshal_to_store(&mut self.tx.data)?;
        if self.tx.data.len() > self.max_data_bytes {
            return Err(TxError::LimitExceeded {
                what: "payload bytes",
                got: self.tx.data.len(),
                max: self.max_data_bytes,
            });
        }

        let mut op = TxOp::new(code, target, attr);
        op.parent_id = parent;
        op.series = series;
        op.ofs = ofs;
        op.len = self.tx.data.len() as u64 - ofs;
        self.tx.ops.push(op);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Limits, TextValue};

    #[test]
    fn builder_accounts_every_payload_byte() {
        let pool = TxPool::new(&Limits::default());
        let mut b = TxBuilder::new(&pool, 100, 1 << 20);
        let cell = TagId::from_literal("cell");
        let attr = TagId::from_literal("attr.name").attr_uid();

        for i in 0..4u64 {
            b.upsert(
                OpCode::UpsertAttr,
                cell,
                TagId::NIL,
                attr,
                SeriesIndex::from(i),
                &TextValue(format!("entry-{i}")),
            )
            .unwrap();
        }

        let tx = b.finish(TagId::now()).unwrap();
        assert_eq!(tx.info.op_count, 4);
        assert_eq!(tx.info.status, TxStatus::Synced);
        assert!(tx.accounting_holds());

        let mut restored = TextValue::default();
        restored.unmarshal(tx.payload(&tx.ops[2]).unwrap()).unwrap();
        assert_eq!(restored.0, "entry-2");
    }

    #[test]
    fn nil_target_is_refused_before_the_op_lands() {
        let pool = TxPool::new(&Limits::default());
        let mut b = TxBuilder::new(&pool, 100, 1 << 20);
        let err = b
            .upsert(
                OpCode::UpsertAttr,
                TagId::NIL,
                TagId::NIL,
                TagId::from_literal("attr").attr_uid(),
                SeriesIndex::ZERO,
                &TextValue("x".into()),
            )
            .unwrap_err();
        assert!(matches!(err, TxError::NilOpField { field: "cell_id" }));
    }
}
