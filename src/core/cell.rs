//! Layer 4: Cell contracts
//!
//! The seams between the protocol core and application modules: how an app
//! produces a pinned cell, how the cell marshals its attributes into a Tx,
//! and how it pushes further state in maintain mode.

use std::sync::Arc;

use super::tag::{AttrUid, SeriesIndex, TagId};
use super::value::AttrValue;
use crate::pin::{PinError, PinRequest, PinUplink};
use crate::tx::{OpCode, TxError};

/// Writer the core hands to a cell during marshaling.
///
/// Implemented by the Tx builder; cells never see Tx internals.
pub trait AttrWriter {
    /// Record one attribute mutation. `target` and `attr` must be non-nil.
    fn upsert(
        &mut self,
        code: OpCode,
        target: TagId,
        parent: TagId,
        attr: AttrUid,
        series: SeriesIndex,
        value: &dyn AttrValue,
    ) -> Result<(), TxError>;
}

/// An application-owned cell actively being observed.
///
/// The protocol core holds a reference only for the duration of the active
/// subscription; the owning app instance outlives it.
pub trait PinnedCell: Send + Sync {
    fn cell_id(&self) -> TagId;

    /// Marshal current attributes (and those of owned child cells) into the
    /// writer. A failure here aborts the pin before any delivery.
    fn marshal_attrs(&self, w: &mut dyn AttrWriter) -> Result<(), PinError>;

    /// Called once when a maintain-mode pin enters its streaming phase.
    ///
    /// The uplink is the app's push handle; delivery through it never blocks
    /// the pin state machine. One-shot pins never see this call.
    fn on_maintain(&self, link: PinUplink) {
        let _ = link;
    }

    /// Release locks or resources acquired during pinning. Runs exactly once
    /// on the way to Closed, before the requester's completion hook.
    fn release_pin(&self) {}
}

/// One application's runtime, instantiated at most once per host session.
pub trait AppRuntime: Send + Sync {
    /// Produce a pinned cell for the request.
    ///
    /// `parent` is the already-pinned parent when the request is scoped to a
    /// child cell; apps resolve it recursively as needed.
    fn pin_cell(
        &self,
        parent: Option<&Arc<dyn PinnedCell>>,
        req: &PinRequest,
    ) -> Result<Arc<dyn PinnedCell>, PinError>;
}
