//! Tx data model: opcodes, op records, metadata block, message.

use crate::core::{AttrUid, AttrValue, Registry, SeriesIndex, TagId};

use super::TxError;

/// One mutation kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Set or replace an attribute value on the target cell.
    UpsertAttr = 1,
    /// Remove an attribute (the payload is empty).
    RemoveAttr = 2,
    /// Remove the target cell from its parent.
    RemoveCell = 3,
    /// Attribute describing the cell itself rather than its content.
    MetaAttr = 4,
}

impl OpCode {
    pub fn from_u64(raw: u64) -> Option<Self> {
        match raw {
            1 => Some(Self::UpsertAttr),
            2 => Some(Self::RemoveAttr),
            3 => Some(Self::RemoveCell),
            4 => Some(Self::MetaAttr),
            _ => None,
        }
    }

    pub fn as_u64(self) -> u64 {
        self as u64
    }
}

/// Delivery status carried in the metadata block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum TxStatus {
    /// Still being assembled; not valid to send.
    #[default]
    Draft = 0,
    /// Fully marshaled; payload accounting holds.
    Synced = 1,
}

impl TxStatus {
    pub fn from_u64(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(Self::Draft),
            1 => Some(Self::Synced),
            _ => None,
        }
    }
}

/// One mutation: opcode, identities, series index, payload reference.
///
/// `ofs`/`len` index into the owning [`TxMsg`]'s data store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxOp {
    pub code: OpCode,
    pub cell_id: TagId,
    pub parent_id: TagId,
    pub attr_id: AttrUid,
    pub series: SeriesIndex,
    pub ofs: u64,
    pub len: u64,
}

impl TxOp {
    pub fn new(code: OpCode, cell_id: TagId, attr_id: AttrUid) -> Self {
        Self {
            code,
            cell_id,
            parent_id: TagId::NIL,
            attr_id,
            series: SeriesIndex::ZERO,
            ofs: 0,
            len: 0,
        }
    }

    /// Target and attribute identity must both be non-nil.
    pub fn validate(&self) -> Result<(), TxError> {
        if self.cell_id.is_nil() {
            return Err(TxError::NilOpField { field: "cell_id" });
        }
        if self.attr_id.is_nil() {
            return Err(TxError::NilOpField { field: "attr_id" });
        }
        Ok(())
    }
}

/// Tx metadata block, sub-encoded at the head of the body section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxInfo {
    /// The Tx's own identity, time-derived at finish.
    pub genesis_id: TagId,
    /// Routing context: the request ID this Tx answers.
    pub route_id: TagId,
    pub status: TxStatus,
    pub op_count: u32,
}

/// An atomically-delivered ordered batch of cell mutations.
///
/// Instances cycle through [`super::TxPool`]; acquire one rather than
/// constructing it directly outside of tests.
#[derive(Debug, Default)]
pub struct TxMsg {
    pub info: TxInfo,
    pub ops: Vec<TxOp>,
    /// Shared payload area; each op references its slice by (ofs, len).
    pub data: Vec<u8>,
}

impl TxMsg {
    /// Payload slice for one op.
    pub fn payload(&self, op: &TxOp) -> Result<&[u8], TxError> {
        let out_of_range = || TxError::PayloadRange {
            ofs: op.ofs,
            len: op.len,
            data_len: self.data.len(),
        };
        let start = usize::try_from(op.ofs).map_err(|_| out_of_range())?;
        let end = start
            .checked_add(op.len as usize)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(out_of_range)?;
        Ok(&self.data[start..end])
    }

    /// Materialize one decoded op's payload as a typed value.
    ///
    /// A registry miss (`AttrNotFound`) fails this op alone - the Tx and
    /// its remaining ops stay usable. Callers must treat it as a per-op,
    /// recoverable failure, never as a transport-level problem.
    pub fn load_value(
        &self,
        op: &TxOp,
        registry: &Registry,
    ) -> crate::Result<Box<dyn AttrValue>> {
        let mut value = registry.make_value(op.attr_id)?;
        value.unmarshal(self.payload(op)?)?;
        Ok(value)
    }

    /// `sum(op.len) == data.len()` and offsets non-decreasing - the synced
    /// payload accounting invariant.
    pub fn accounting_holds(&self) -> bool {
        let mut sum = 0u64;
        let mut last_ofs = 0u64;
        for op in &self.ops {
            if op.ofs < last_ofs {
                return false;
            }
            last_ofs = op.ofs;
            sum = sum.saturating_add(op.len);
        }
        sum == self.data.len() as u64
    }

    /// Zero and empty all contents. Pool discipline: a partially-filled Tx
    /// must pass through here before reuse.
    pub(crate) fn reset(&mut self) {
        self.info = TxInfo::default();
        self.ops.clear();
        self.data.fill(0);
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_target_or_attr_is_invalid() {
        let mut op = TxOp::new(
            OpCode::UpsertAttr,
            TagId::from_literal("cell"),
            TagId::from_literal("attr").attr_uid(),
        );
        assert!(op.validate().is_ok());

        op.cell_id = TagId::NIL;
        assert!(matches!(
            op.validate(),
            Err(TxError::NilOpField { field: "cell_id" })
        ));

        op.cell_id = TagId::from_literal("cell");
        op.attr_id = AttrUid::NIL;
        assert!(matches!(
            op.validate(),
            Err(TxError::NilOpField { field: "attr_id" })
        ));
    }

    #[test]
    fn payload_range_is_bounds_checked() {
        let msg = TxMsg {
            data: vec![1, 2, 3, 4],
            ..TxMsg::default()
        };
        let mut op = TxOp::new(
            OpCode::UpsertAttr,
            TagId::from_literal("cell"),
            TagId::from_literal("attr").attr_uid(),
        );
        op.ofs = 2;
        op.len = 3;
        assert!(matches!(msg.payload(&op), Err(TxError::PayloadRange { .. })));

        op.ofs = 1;
        assert_eq!(msg.payload(&op).unwrap(), &[2, 3, 4]);
    }
}
